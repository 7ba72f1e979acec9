use super::{lock, Arg, MemCell};
use crate::{common::Blob, MemFlags, NdRange, Scalar, Status};
use std::{
    cell::{Ref, RefCell, RefMut},
    collections::HashMap,
    mem::size_of,
    slice::{from_raw_parts, from_raw_parts_mut},
    sync::MutexGuard,
};

/// 主机内核看到的一次发射：工作项空间、参数和编译时定义的宏。
///
/// 发射期间内核参数引用的所有存储都被锁定。
pub struct Launch<'a> {
    range: &'a NdRange,
    args: Vec<Slot<'a>>,
    mems: Vec<Locked<'a>>,
    defines: &'a HashMap<String, String>,
}

enum Slot<'a> {
    Mem(usize),
    Scalar(&'a [u8]),
    Local(usize),
}

struct Locked<'a> {
    data: RefCell<MutexGuard<'a, Blob>>,
    flags: MemFlags,
    len: usize,
}

#[inline]
fn addr(cell: &MemCell) -> usize {
    cell as *const MemCell as usize
}

impl<'a> Launch<'a> {
    pub(super) fn new(
        range: &'a NdRange,
        args: &'a [Arg],
        defines: &'a HashMap<String, String>,
    ) -> Self {
        // 按地址加锁，同一存储绑定到多个参数时只锁一次
        let mut cells = args
            .iter()
            .filter_map(|arg| match arg {
                Arg::Mem(cell) => Some(&**cell),
                _ => None,
            })
            .collect::<Vec<_>>();
        cells.sort_unstable_by_key(|cell| addr(cell));
        cells.dedup_by_key(|cell| addr(cell));

        let args = args
            .iter()
            .map(|arg| match arg {
                Arg::Mem(cell) => Slot::Mem(cells.partition_point(|c| addr(c) < addr(cell))),
                Arg::Scalar(bytes) => Slot::Scalar(bytes),
                Arg::Local(size) => Slot::Local(*size),
            })
            .collect();
        let mems = cells
            .into_iter()
            .map(|cell| {
                let data = lock(&cell.data);
                Locked {
                    len: data.len(),
                    data: RefCell::new(data),
                    flags: cell.flags,
                }
            })
            .collect();

        Self {
            range,
            args,
            mems,
            defines,
        }
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.range.dim()
    }

    #[inline]
    pub fn global_size(&self, d: usize) -> usize {
        self.range.global_size().get(d).copied().unwrap_or(1)
    }

    #[inline]
    pub fn global_offset(&self, d: usize) -> usize {
        self.range.global_offset().get(d).copied().unwrap_or(0)
    }

    /// 未指定工作组尺寸时每个工作组只有一个工作项。
    #[inline]
    pub fn local_size(&self, d: usize) -> usize {
        self.range
            .local_size()
            .and_then(|local| local.get(d).copied())
            .unwrap_or(1)
    }

    /// `-D` 定义的宏。
    #[inline]
    pub fn define(&self, name: &str) -> Option<&str> {
        self.defines.get(name).map(String::as_str)
    }

    fn slot(&self, i: usize) -> Result<&Slot<'a>, Status> {
        self.args.get(i).ok_or(Status::INVALID_ARG_INDEX)
    }

    fn mem<T: Scalar>(&self, i: usize) -> Result<&Locked<'a>, Status> {
        let &Slot::Mem(m) = self.slot(i)? else {
            return Err(Status::INVALID_ARG_VALUE);
        };
        let mem = &self.mems[m];
        let size = size_of::<T>();
        if size == 0 || mem.len % size != 0 {
            return Err(Status::INVALID_ARG_SIZE);
        }
        Ok(mem)
    }

    /// 以 `T` 的切片读第 `i` 个参数的存储。
    pub fn global<T: Scalar>(&self, i: usize) -> Result<Ref<[T]>, Status> {
        let data = self
            .mem::<T>(i)?
            .data
            .try_borrow()
            .map_err(|_| Status::INVALID_OPERATION)?;
        Ok(Ref::map(data, |data| unsafe {
            from_raw_parts(data.as_ptr().cast::<T>(), data.len() / size_of::<T>())
        }))
    }

    /// 以 `T` 的切片写第 `i` 个参数的存储。只读存储不可写。
    pub fn global_mut<T: Scalar>(&self, i: usize) -> Result<RefMut<[T]>, Status> {
        let mem = self.mem::<T>(i)?;
        if mem.flags == MemFlags::ReadOnly {
            return Err(Status::INVALID_OPERATION);
        }
        let data = mem
            .data
            .try_borrow_mut()
            .map_err(|_| Status::INVALID_OPERATION)?;
        Ok(RefMut::map(data, |data| unsafe {
            from_raw_parts_mut(data.as_mut_ptr().cast::<T>(), data.len() / size_of::<T>())
        }))
    }

    /// 第 `i` 个参数的值。
    pub fn scalar<T: Scalar>(&self, i: usize) -> Result<T, Status> {
        match self.slot(i)? {
            Slot::Scalar(bytes) if bytes.len() == size_of::<T>() => {
                Ok(unsafe { bytes.as_ptr().cast::<T>().read_unaligned() })
            }
            Slot::Scalar(_) => Err(Status::INVALID_ARG_SIZE),
            _ => Err(Status::INVALID_ARG_VALUE),
        }
    }

    /// 第 `i` 个 `__local` 参数的字节数。
    pub fn local_len(&self, i: usize) -> Result<usize, Status> {
        match self.slot(i)? {
            Slot::Local(size) => Ok(*size),
            _ => Err(Status::INVALID_ARG_VALUE),
        }
    }
}
