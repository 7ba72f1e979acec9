use crate::{
    allocation_failed,
    common::{as_bytes, as_bytes_mut, Blob},
    event::Staging,
    transfer_failed, CompletionHandle, Context, Hardware, Queue, Result, Scalar, Status,
};
use std::ptr::addr_eq;

/// 设备存储的访问方式。
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MemFlags {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

/// 上下文中的一块设备存储。
pub struct Buffer<'ctx, H: Hardware> {
    raw: H::Mem,
    size: usize,
    flags: MemFlags,
    ctx: &'ctx Context<H>,
}

impl<'ctx, H: Hardware> Buffer<'ctx, H> {
    pub fn new(ctx: &'ctx Context<H>, flags: MemFlags, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(allocation_failed(
                Status::INVALID_BUFFER_SIZE,
                "Create buffer of 0 bytes",
            ));
        }
        let raw = ctx
            .hw()
            .create_mem(ctx.raw(), flags, size)
            .map_err(|status| {
                allocation_failed(status, format!("Create {flags:?} buffer of {size} bytes"))
            })?;
        Ok(Self {
            raw,
            size,
            flags,
            ctx,
        })
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn flags(&self) -> MemFlags {
        self.flags
    }

    #[inline]
    pub fn raw(&self) -> &H::Mem {
        &self.raw
    }

    #[inline]
    pub fn ctx(&self) -> &'ctx Context<H> {
        self.ctx
    }

    #[inline]
    pub fn release(self) {}
}

impl<'ctx, H: Hardware> Queue<'ctx, H> {
    fn check_transfer(&self, buffer: &Buffer<H>, len: usize, what: &str) -> Result<()> {
        if !addr_eq(self.ctx(), buffer.ctx) {
            return Err(transfer_failed(
                Status::INVALID_CONTEXT,
                format!("{what}: buffer belongs to another context"),
            ));
        }
        if len > buffer.size {
            return Err(transfer_failed(
                Status::INVALID_VALUE,
                format!("{what}: {len} bytes with a {}-byte buffer", buffer.size),
            ));
        }
        Ok(())
    }

    /// 把 `src` 写入 `buffer` 的开头，不等待完成。
    ///
    /// `src` 在入队时复制，返回后即可修改。
    pub fn write_async<'a, T: Scalar>(
        &self,
        buffer: &'a mut Buffer<'_, H>,
        src: &[T],
    ) -> Result<CompletionHandle<'a, H>> {
        let src = as_bytes(src);
        self.check_transfer(buffer, src.len(), "Write buffer")?;
        let mut data = staging(src.len(), "Write buffer")?;
        data.copy_from_slice(src);

        let hw = buffer.ctx.hw();
        let raw = unsafe { hw.enqueue_write(self.raw(), &mut buffer.raw, &data) }
            .map_err(|status| transfer_failed(status, "Write buffer"))?;
        Ok(CompletionHandle::staged(
            hw,
            raw,
            "Write buffer",
            Staging::Write(data),
        ))
    }

    pub fn write_blocking<T: Scalar>(&self, buffer: &mut Buffer<H>, src: &[T]) -> Result<()> {
        self.write_async(buffer, src)?
            .wait_raw()
            .map_err(|status| transfer_failed(status, "Write buffer - blocking"))
    }

    /// 把 `buffer` 的开头读到 `dst`，不等待完成。
    ///
    /// 数据在句柄等待成功时才到达 `dst`。
    pub fn read_async<'a, T: Scalar>(
        &self,
        buffer: &'a Buffer<'_, H>,
        dst: &'a mut [T],
    ) -> Result<CompletionHandle<'a, H>> {
        let dst = as_bytes_mut(dst);
        self.check_transfer(buffer, dst.len(), "Read buffer")?;
        let mut data = staging(dst.len(), "Read buffer")?;

        let hw = buffer.ctx.hw();
        let raw = unsafe { hw.enqueue_read(self.raw(), &buffer.raw, &mut data) }
            .map_err(|status| transfer_failed(status, "Read buffer"))?;
        Ok(CompletionHandle::staged(
            hw,
            raw,
            "Read buffer",
            Staging::Read(data, dst),
        ))
    }

    pub fn read_blocking<T: Scalar>(&self, buffer: &Buffer<H>, dst: &mut [T]) -> Result<()> {
        self.read_async(buffer, dst)?
            .wait_raw()
            .map_err(|status| transfer_failed(status, "Read buffer - blocking"))
    }
}

fn staging(len: usize, what: &str) -> Result<Blob> {
    Blob::zeroed(len).ok_or_else(|| {
        transfer_failed(
            Status::OUT_OF_HOST_MEMORY,
            format!("{what}: staging {len} bytes"),
        )
    })
}
