use crate::{
    index_out_of_range, Buffer, EventTable, Hardware, NdRange, Program, QueueSet, Result,
};
use log::{debug, trace};

/// 把同一个内核轮流发射到每个队列，重复若干轮。
///
/// 第 `j` 个队列总是写第 `j` 个存储，所以每个队列只需要在下一次发射前等待自己上一次的发射。
#[derive(Clone, Copy, Debug)]
pub struct Rounds {
    pub rounds: usize,
    /// 存储绑定到的参数序号。
    pub arg_index: usize,
}

impl Default for Rounds {
    fn default() -> Self {
        Self {
            rounds: 100,
            arg_index: 0,
        }
    }
}

impl Rounds {
    pub fn run<'a, H: Hardware>(
        &self,
        queues: &QueueSet<'a, H>,
        program: &'a Program<'a, H>,
        kernel: &str,
        buffers: &'a [Buffer<'a, H>],
        range: &NdRange,
    ) -> Result<()> {
        if buffers.len() < queues.len() {
            return Err(index_out_of_range(format!(
                "{} queues share {} buffers",
                queues.len(),
                buffers.len()
            )));
        }

        let mut events = EventTable::new(queues.len());
        for round in 0..self.rounds {
            trace!("round {round}");
            for (queue, buffer) in queues.iter().zip(buffers) {
                let j = queue.index();
                events.wait(j)?;
                let mut k = program.kernel(kernel)?;
                k.bind_buffer(self.arg_index, buffer)?;
                events.record(j, queue.run_async(&k, range)?)?;
            }
        }
        events.wait_all()?;
        debug!(
            "{} rounds of `{kernel}` on {} queues done",
            self.rounds,
            queues.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::Rounds;
    use crate::{
        common::test_utils::{context, cpu, numbering, NUMBERING},
        common_cpu::Cpu,
        Buffer, ErrorKind, Launch, MemFlags, NdRange, ProgramBuilder, QueueSet, Source, Status,
    };
    use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};

    const N: usize = 50000;

    #[test]
    fn test_numbering() {
        let cpu = cpu();
        let live = cpu.live();
        let ctx = context(cpu);
        {
            let queues = QueueSet::new(&ctx, 4).unwrap();
            let program = ProgramBuilder::new(Source::Text(NUMBERING))
                .entry("numbering")
                .build(&ctx)
                .unwrap();
            let buffers = (0..queues.len())
                .map(|_| Buffer::new(&ctx, MemFlags::WriteOnly, N * 4).unwrap())
                .collect::<Vec<_>>();

            Rounds::default()
                .run(&queues, &program, "numbering", &buffers, &NdRange::d1(N))
                .unwrap();

            for (queue, buffer) in queues.iter().zip(&buffers) {
                let mut back = vec![0u32; N];
                queue.read_blocking(buffer, &mut back).unwrap();
                assert!(back.iter().enumerate().all(|(i, &x)| x == 2 * i as u32));
            }
        }
        assert_eq!(live.queues(), 0);
        assert_eq!(live.buffers(), 0);
        assert_eq!(live.kernels(), 0);
    }

    static LAUNCHES: AtomicUsize = AtomicUsize::new(0);

    fn counting(l: &Launch) -> Result<(), Status> {
        LAUNCHES.fetch_add(1, SeqCst);
        numbering(l)
    }

    #[test]
    fn test_launch_count() {
        let ctx = context(Cpu::new().kernel("numbering", counting));
        let queues = QueueSet::new(&ctx, 3).unwrap();
        let program = ProgramBuilder::new(Source::Text(NUMBERING))
            .build(&ctx)
            .unwrap();
        let buffers = (0..3)
            .map(|_| Buffer::new(&ctx, MemFlags::ReadWrite, 64).unwrap())
            .collect::<Vec<_>>();

        let rounds = Rounds {
            rounds: 7,
            arg_index: 0,
        };
        rounds
            .run(&queues, &program, "numbering", &buffers, &NdRange::d1(16))
            .unwrap();
        assert_eq!(LAUNCHES.load(SeqCst), 21);
    }

    #[test]
    fn test_too_few_buffers() {
        let ctx = context(cpu());
        let queues = QueueSet::new(&ctx, 4).unwrap();
        let program = ProgramBuilder::new(Source::Text(NUMBERING))
            .build(&ctx)
            .unwrap();
        let buffers = (0..3)
            .map(|_| Buffer::new(&ctx, MemFlags::ReadWrite, 64).unwrap())
            .collect::<Vec<_>>();

        let e = Rounds::default()
            .run(&queues, &program, "numbering", &buffers, &NdRange::d1(16))
            .unwrap_err();
        assert_eq!(e.kind(), ErrorKind::IndexOutOfRange);
    }

    #[test]
    fn test_bad_range() {
        let ctx = context(cpu());
        let queues = QueueSet::new(&ctx, 2).unwrap();
        let program = ProgramBuilder::new(Source::Text(NUMBERING))
            .build(&ctx)
            .unwrap();
        let buffers = (0..2)
            .map(|_| Buffer::new(&ctx, MemFlags::ReadWrite, 64).unwrap())
            .collect::<Vec<_>>();

        let e = Rounds::default()
            .run(&queues, &program, "numbering", &buffers, &NdRange::d1(0))
            .unwrap_err();
        assert_eq!(e.kind(), ErrorKind::DispatchFailed);
    }
}
