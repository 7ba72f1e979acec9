use crate::{dispatch_failed, CompletionHandle, Hardware, Kernel, Queue, Result, Status};
use std::ptr::addr_eq;

/// 内核发射的工作项空间。
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct NdRange {
    global: Vec<usize>,
    offsets: Vec<usize>,
    local: Option<Vec<usize>>,
}

impl NdRange {
    /// 以 `global` 为全局尺寸，偏移为 0，工作组尺寸由设备决定。
    pub fn new(global: &[usize]) -> Self {
        Self {
            global: global.to_vec(),
            offsets: vec![0; global.len()],
            local: None,
        }
    }

    #[inline]
    pub fn d1(n: usize) -> Self {
        Self::new(&[n])
    }

    #[inline]
    pub fn d2(x: usize, y: usize) -> Self {
        Self::new(&[x, y])
    }

    pub fn offsets(mut self, offsets: &[usize]) -> Self {
        self.offsets = offsets.to_vec();
        self
    }

    pub fn local(mut self, local: &[usize]) -> Self {
        self.local = Some(local.to_vec());
        self
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.global.len()
    }

    #[inline]
    pub fn global_size(&self) -> &[usize] {
        &self.global
    }

    #[inline]
    pub fn global_offset(&self) -> &[usize] {
        &self.offsets
    }

    #[inline]
    pub fn local_size(&self) -> Option<&[usize]> {
        self.local.as_deref()
    }

    /// 工作项总数。
    pub fn items(&self) -> usize {
        self.global.iter().product()
    }

    /// 检查工作项空间在最大工作组尺寸为 `max_work_group_size` 的设备上是否合法。
    pub fn check(&self, max_work_group_size: usize) -> Result<(), Status> {
        let dim = self.dim();
        if !(1..=2).contains(&dim) {
            return Err(Status::INVALID_WORK_DIMENSION);
        }
        if self.offsets.len() != dim
            || self
                .global
                .iter()
                .zip(&self.offsets)
                .any(|(g, o)| g.checked_add(*o).is_none())
        {
            return Err(Status::INVALID_GLOBAL_OFFSET);
        }
        if self.global.contains(&0) {
            return Err(Status::INVALID_GLOBAL_WORK_SIZE);
        }
        if let Some(local) = &self.local {
            if local.len() != dim
                || local.contains(&0)
                || self.global.iter().zip(local).any(|(g, l)| g % l != 0)
                || local
                    .iter()
                    .try_fold(1usize, |acc, l| acc.checked_mul(*l))
                    .map_or(true, |n| n > max_work_group_size)
            {
                return Err(Status::INVALID_WORK_GROUP_SIZE);
            }
        }
        Ok(())
    }
}

impl<'ctx, H: Hardware> Queue<'ctx, H> {
    /// 在这个队列上发射内核，不等待完成。
    ///
    /// 内核的所有参数都必须已经绑定。
    pub fn run_async<'a>(
        &self,
        kernel: &Kernel<'a, H>,
        range: &NdRange,
    ) -> Result<CompletionHandle<'a, H>> {
        let ctx = kernel.program().ctx();
        let what = |e: &str| {
            format!("Run kernel `{}` on queue {}: {e}", kernel.name(), self.index())
        };

        if !addr_eq(self.ctx(), ctx) {
            return Err(dispatch_failed(
                Status::INVALID_CONTEXT,
                what("kernel belongs to another context"),
            ));
        }
        range
            .check(ctx.device().info().max_work_group_size)
            .map_err(|status| dispatch_failed(status, what(&format!("{range:?}"))))?;
        if let Some(i) = kernel.unbound() {
            return Err(dispatch_failed(
                Status::INVALID_KERNEL_ARGS,
                what(&format!("argument {i} is not bound")),
            ));
        }

        let hw = ctx.hw();
        let raw = unsafe { hw.enqueue_kernel(self.raw(), kernel.raw(), range) }
            .map_err(|status| dispatch_failed(status, what("enqueue")))?;
        Ok(CompletionHandle::new(hw, raw, "Run kernel"))
    }

    /// 发射内核并等待完成。
    pub fn run_blocking(&self, kernel: &Kernel<H>, range: &NdRange) -> Result<()> {
        self.run_async(kernel, range)?.wait()
    }
}

#[cfg(test)]
mod test {
    use super::NdRange;
    use crate::{
        common::test_utils::{context, cpu, NUMBERING},
        common_cpu::Cpu,
        Buffer, ErrorKind, MemFlags, ProgramBuilder, QueueSet, Source, Status,
    };

    #[test]
    fn test_check() {
        assert_eq!(NdRange::d1(16).check(1024), Ok(()));
        assert_eq!(NdRange::d2(16, 4).local(&[4, 4]).check(16), Ok(()));
        assert_eq!(NdRange::d1(16).offsets(&[8]).check(1), Ok(()));
        assert_eq!(NdRange::d2(3, 5).items(), 15);

        assert_eq!(
            NdRange::new(&[]).check(1024),
            Err(Status::INVALID_WORK_DIMENSION)
        );
        assert_eq!(
            NdRange::new(&[2, 2, 2]).check(1024),
            Err(Status::INVALID_WORK_DIMENSION)
        );
        assert_eq!(
            NdRange::d1(16).offsets(&[0, 0]).check(1024),
            Err(Status::INVALID_GLOBAL_OFFSET)
        );
        assert_eq!(
            NdRange::d2(16, 0).check(1024),
            Err(Status::INVALID_GLOBAL_WORK_SIZE)
        );
        assert_eq!(
            NdRange::d1(16).local(&[3]).check(1024),
            Err(Status::INVALID_WORK_GROUP_SIZE)
        );
        assert_eq!(
            NdRange::d1(16).local(&[0]).check(1024),
            Err(Status::INVALID_WORK_GROUP_SIZE)
        );
        assert_eq!(
            NdRange::d2(16, 16).local(&[8, 8]).check(32),
            Err(Status::INVALID_WORK_GROUP_SIZE)
        );
    }

    #[test]
    fn test_run() {
        let ctx = context(cpu());
        let queues = QueueSet::new(&ctx, 1).unwrap();
        let queue = queues.get(0).unwrap();
        let program = ProgramBuilder::new(Source::Text(NUMBERING))
            .build(&ctx)
            .unwrap();
        let buf = Buffer::new(&ctx, MemFlags::ReadWrite, 4 * 64).unwrap();

        let mut kernel = program.kernel("numbering").unwrap();
        kernel.bind_buffer(0, &buf).unwrap();
        queue
            .run_blocking(&kernel, &NdRange::d1(32).offsets(&[32]).local(&[8]))
            .unwrap();
        queue.run_async(&kernel, &NdRange::d1(32)).unwrap().wait().unwrap();
        drop(kernel);

        let mut back = [0u32; 64];
        queue.read_blocking(&buf, &mut back).unwrap();
        assert!(back.iter().enumerate().all(|(i, &x)| x == 2 * i as u32));
    }

    #[test]
    fn test_async_matches_blocking() {
        let ctx = context(cpu());
        let queues = QueueSet::new(&ctx, 1).unwrap();
        let queue = queues.get(0).unwrap();
        let program = ProgramBuilder::new(Source::Text(NUMBERING))
            .build(&ctx)
            .unwrap();
        let blocking = Buffer::new(&ctx, MemFlags::WriteOnly, 4 * 1024).unwrap();
        let pending = Buffer::new(&ctx, MemFlags::WriteOnly, 4 * 1024).unwrap();
        let range = NdRange::d1(1000).offsets(&[24]).local(&[8]);

        let mut a = program.kernel("numbering").unwrap();
        a.bind_buffer(0, &blocking).unwrap();
        let mut b = program.kernel("numbering").unwrap();
        b.bind_buffer(0, &pending).unwrap();

        queue.run_blocking(&a, &range).unwrap();
        let handle = queue.run_async(&b, &range).unwrap();
        handle.wait().unwrap();
        drop((a, b));

        let mut x = vec![0u32; 1024];
        let mut y = vec![1u32; 1024];
        queue.read_blocking(&blocking, &mut x).unwrap();
        queue.read_blocking(&pending, &mut y).unwrap();
        assert_eq!(x, y);
        assert_eq!(x[23], 0);
        assert_eq!(x[24], 48);
        assert_eq!(x[1023], 2046);
    }

    #[test]
    fn test_rejected() {
        let ctx = context(cpu());
        let queues = QueueSet::new(&ctx, 1).unwrap();
        let queue = queues.get(0).unwrap();
        let program = ProgramBuilder::new(Source::Text(NUMBERING))
            .build(&ctx)
            .unwrap();
        let buf = Buffer::new(&ctx, MemFlags::ReadWrite, 64).unwrap();

        let mut kernel = program.kernel("numbering").unwrap();
        let e = queue.run_async(&kernel, &NdRange::d1(16)).err().unwrap();
        assert_eq!(e.kind(), ErrorKind::DispatchFailed);
        assert_eq!(e.status(), Some(Status::INVALID_KERNEL_ARGS));

        kernel.bind_buffer(0, &buf).unwrap();
        let e = queue.run_async(&kernel, &NdRange::d1(0)).err().unwrap();
        assert_eq!(e.kind(), ErrorKind::DispatchFailed);
        assert_eq!(e.status(), Some(Status::INVALID_GLOBAL_WORK_SIZE));

        let e = queue
            .run_async(&kernel, &NdRange::d1(2048).local(&[2048]))
            .err()
            .unwrap();
        assert_eq!(e.status(), Some(Status::INVALID_WORK_GROUP_SIZE));
    }

    #[test]
    fn test_other_context() {
        let a = context(cpu());
        let b = context(Cpu::new());
        let queues = QueueSet::new(&b, 1).unwrap();
        let program = ProgramBuilder::new(Source::Text(NUMBERING))
            .build(&a)
            .unwrap();
        let buf = Buffer::new(&a, MemFlags::ReadWrite, 64).unwrap();
        let mut kernel = program.kernel("numbering").unwrap();
        kernel.bind_buffer(0, &buf).unwrap();

        let e = queues
            .get(0)
            .unwrap()
            .run_async(&kernel, &NdRange::d1(16))
            .err()
            .unwrap();
        assert_eq!(e.status(), Some(Status::INVALID_CONTEXT));
    }
}
