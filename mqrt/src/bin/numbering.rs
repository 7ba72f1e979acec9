use log::info;
use mqrt::{
    Buffer, Config, Context, Hardware, MemFlags, NdRange, ProgramBuilder, QueueSet, Rounds, Source,
};
use std::{mem::size_of, process::ExitCode};

const NUMBERING: &str = "
__kernel void numbering(__global uint *global_mem)
{
  global_mem[get_global_id(0)] = 2 * get_global_id(0);
}
";

const N: usize = 50000;

fn main() -> ExitCode {
    env_logger::init();
    let config = Config::from_env();

    #[cfg(use_cl)]
    let result = run(mqrt::opencl::OpenCl, &config);
    #[cfg(all(use_cpu, not(use_cl)))]
    let result = run(host::cpu(), &config);
    #[cfg(not(any(use_cpu, use_cl)))]
    let result: mqrt::Result<Vec<u32>> = Err(mqrt::no_device_found("no backend enabled"));

    match result {
        Ok(out) => match out.iter().enumerate().find(|&(i, &x)| x != 2 * i as u32) {
            None => {
                for (i, x) in out.iter().take(10).enumerate() {
                    println!("{i} {x}")
                }
                println!("{N} items verified");
                ExitCode::SUCCESS
            }
            Some((i, x)) => {
                eprintln!("item {i} is {x}, expected {}", 2 * i);
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// 在每个队列上轮流发射 `numbering`，然后读回第一个队列的存储。
#[allow(dead_code)]
fn run<H: Hardware>(hw: H, config: &Config) -> mqrt::Result<Vec<u32>> {
    let ctx = Context::init(hw, config)?;
    info!("{}", ctx.device().info());

    let queues = QueueSet::new(&ctx, config.queues)?;
    let program = ProgramBuilder::new(Source::Text(NUMBERING))
        .options(&config.build_options)
        .entry("numbering")
        .build(&ctx)?;
    let buffers = (0..queues.len())
        .map(|_| Buffer::new(&ctx, MemFlags::WriteOnly, N * size_of::<u32>()))
        .collect::<mqrt::Result<Vec<_>>>()?;

    Rounds::default().run(&queues, &program, "numbering", &buffers, &NdRange::d1(N))?;

    let mut out = vec![0u32; N];
    queues.get(0)?.read_blocking(&buffers[0], &mut out)?;
    Ok(out)
}

#[cfg(all(use_cpu, not(use_cl)))]
mod host {
    use mqrt::{common_cpu::Cpu, Launch, Status};
    use rayon::prelude::*;

    pub fn cpu() -> Cpu {
        Cpu::new().kernel("numbering", numbering)
    }

    fn numbering(l: &Launch) -> Result<(), Status> {
        let mut mem = l.global_mut::<u32>(0)?;
        let (offset, size) = (l.global_offset(0), l.global_size(0));
        mem.get_mut(offset..offset + size)
            .ok_or(Status::INVALID_GLOBAL_OFFSET)?
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, x)| *x = 2 * (offset + i) as u32);
        Ok(())
    }
}
