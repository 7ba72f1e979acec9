use crate::{
    BuildFailure, DeviceInfo, DeviceKind, EventStatus, Hardware, MemFlags, NdRange, RawArg, Status,
};
use log::warn;
use opencl3::{
    command_queue::CommandQueue,
    context::Context,
    device::{
        Device, CL_DEVICE_TYPE_ACCELERATOR, CL_DEVICE_TYPE_CPU, CL_DEVICE_TYPE_GPU,
    },
    error_codes::ClError,
    event::Event,
    kernel::Kernel,
    memory::{Buffer, CL_MEM_READ_ONLY, CL_MEM_READ_WRITE, CL_MEM_WRITE_ONLY},
    platform::get_platforms,
    program::Program,
    types::{cl_uint, CL_NON_BLOCKING},
};
use std::ptr::{null, null_mut};

/// 第一个 OpenCL 平台。
#[derive(Clone, Copy, Default, Debug)]
pub struct OpenCl;

#[inline]
fn status(e: ClError) -> Status {
    Status(e.0)
}

macro_rules! set_bytes {
    ($kernel:expr, $index:expr, $bytes:expr; $($n:literal)+) => {
        match $bytes.len() {
            $(
                $n => {
                    let mut value = [0u8; $n];
                    value.copy_from_slice($bytes);
                    $kernel.set_arg($index, &value)
                }
            )+
            _ => return Err(Status::INVALID_ARG_SIZE),
        }
    };
}

impl Hardware for OpenCl {
    type Device = Device;
    type Context = Context;
    type Queue = CommandQueue;
    type Program = Program;
    type Kernel = Kernel;
    type Mem = Buffer<u8>;
    type Event = Event;

    /// 优先选择 GPU，没有 GPU 时选择 CPU 设备。
    fn devices(&self) -> Result<Vec<Device>, Status> {
        let platforms = get_platforms().map_err(status)?;
        let Some(platform) = platforms.first() else {
            return Ok(Vec::new());
        };
        let ids = match platform.get_devices(CL_DEVICE_TYPE_GPU) {
            Ok(ids) if !ids.is_empty() => ids,
            _ => {
                warn!("no GPU device found, try CPU devices");
                match platform.get_devices(CL_DEVICE_TYPE_CPU) {
                    Ok(ids) => ids,
                    Err(e) if status(e) == Status::DEVICE_NOT_FOUND => Vec::new(),
                    Err(e) => return Err(status(e)),
                }
            }
        };
        Ok(ids.into_iter().map(Device::new).collect())
    }

    fn device_info(&self, device: &Device) -> DeviceInfo {
        let ty = device.dev_type().unwrap_or(0);
        let kind = if ty & CL_DEVICE_TYPE_GPU != 0 {
            DeviceKind::Gpu
        } else if ty & CL_DEVICE_TYPE_CPU != 0 {
            DeviceKind::Cpu
        } else if ty & CL_DEVICE_TYPE_ACCELERATOR != 0 {
            DeviceKind::Accelerator
        } else {
            DeviceKind::Other
        };
        DeviceInfo {
            name: device.name().unwrap_or_default(),
            vendor: device.vendor().unwrap_or_default(),
            kind,
            max_work_group_size: device.max_work_group_size().unwrap_or(1),
            global_mem_size: device.global_mem_size().unwrap_or(0),
            compute_units: device.max_compute_units().unwrap_or(1),
        }
    }

    fn create_context(&self, device: &Device) -> Result<Context, Status> {
        Context::from_device(device).map_err(status)
    }

    fn create_queue(&self, context: &Context, _device: &Device) -> Result<CommandQueue, Status> {
        // 上下文只有一个设备
        #[allow(deprecated)]
        CommandQueue::create_default(context, 0).map_err(status)
    }

    fn build_program(
        &self,
        context: &Context,
        device: &Device,
        source: &str,
        options: &str,
    ) -> Result<Program, BuildFailure> {
        let mut program = Program::create_from_source(context, source)
            .map_err(|e| BuildFailure::from(status(e)))?;
        match program.build(context.devices(), options) {
            Ok(()) => Ok(program),
            Err(e) => Err(BuildFailure {
                status: status(e),
                log: program.get_build_log(device.id()).unwrap_or_default(),
            }),
        }
    }

    fn kernel_names(&self, program: &Program) -> Result<Vec<String>, Status> {
        Ok(program
            .kernel_names()
            .split(';')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(String::from)
            .collect())
    }

    fn create_kernel(&self, program: &Program, name: &str) -> Result<Kernel, Status> {
        Kernel::create(program, name).map_err(status)
    }

    fn kernel_arity(&self, kernel: &Kernel) -> Result<usize, Status> {
        kernel.num_args().map(|n| n as usize).map_err(status)
    }

    fn set_arg(
        &self,
        kernel: &mut Kernel,
        index: usize,
        arg: RawArg<Buffer<u8>>,
    ) -> Result<(), Status> {
        let index = cl_uint::try_from(index).map_err(|_| Status::INVALID_ARG_INDEX)?;
        let result = unsafe {
            match arg {
                RawArg::Mem(mem) => kernel.set_arg(index, &mem.get()),
                RawArg::Local(size) => kernel.set_arg_local_buffer(index, size),
                RawArg::Scalar(bytes) => set_bytes!(kernel, index, bytes; 1 2 4 8 16 32 64 128),
            }
        };
        result.map_err(status)
    }

    fn create_mem(
        &self,
        context: &Context,
        flags: MemFlags,
        size: usize,
    ) -> Result<Buffer<u8>, Status> {
        let flags = match flags {
            MemFlags::ReadOnly => CL_MEM_READ_ONLY,
            MemFlags::WriteOnly => CL_MEM_WRITE_ONLY,
            MemFlags::ReadWrite => CL_MEM_READ_WRITE,
        };
        let mem = unsafe { Buffer::<u8>::create(context, flags, size, null_mut()) };
        mem.map_err(status)
    }

    unsafe fn enqueue_write(
        &self,
        queue: &CommandQueue,
        mem: &mut Buffer<u8>,
        src: &[u8],
    ) -> Result<Event, Status> {
        queue
            .enqueue_write_buffer(mem, CL_NON_BLOCKING, 0, src, &[])
            .map_err(status)
    }

    unsafe fn enqueue_read(
        &self,
        queue: &CommandQueue,
        mem: &Buffer<u8>,
        dst: &mut [u8],
    ) -> Result<Event, Status> {
        queue
            .enqueue_read_buffer(mem, CL_NON_BLOCKING, 0, dst, &[])
            .map_err(status)
    }

    unsafe fn enqueue_kernel(
        &self,
        queue: &CommandQueue,
        kernel: &Kernel,
        range: &NdRange,
    ) -> Result<Event, Status> {
        // 工作组尺寸由设备检查
        range.check(usize::MAX)?;
        let local = range.local_size().map_or(null(), <[usize]>::as_ptr);
        queue
            .enqueue_nd_range_kernel(
                kernel.get(),
                range.dim() as cl_uint,
                range.global_offset().as_ptr(),
                range.global_size().as_ptr(),
                local,
                &[],
            )
            .map_err(status)
    }

    fn wait(&self, event: &Event) -> Result<(), Status> {
        match event.wait() {
            Ok(()) => Ok(()),
            // 报告命令自己的错误码而不是等待列表的错误码
            Err(e) => match self.event_status(event) {
                Ok(EventStatus::Failed(s)) => Err(s),
                _ => Err(status(e)),
            },
        }
    }

    fn event_status(&self, event: &Event) -> Result<EventStatus, Status> {
        let s = event.command_execution_status().map_err(status)?.0;
        Ok(match s {
            0 => EventStatus::Completed,
            s if s < 0 => EventStatus::Failed(Status(s)),
            _ => EventStatus::Enqueued,
        })
    }

    fn finish(&self, queue: &CommandQueue) -> Result<(), Status> {
        queue.finish().map_err(status)
    }
}

#[cfg(test)]
mod test {
    use super::OpenCl;
    use crate::{
        Buffer, Context, ErrorKind, Hardware, MemFlags, NdRange, ProgramBuilder, QueueSet, Rounds,
        Source,
    };

    const NUMBERING: &str = "
__kernel void numbering(__global uint *global_mem)
{
  global_mem[get_global_id(0)] = 2 * get_global_id(0);
}
";

    #[test]
    fn test_devices() {
        let Ok(devices) = OpenCl.devices() else {
            return;
        };
        for device in devices {
            let info = OpenCl.device_info(&device);
            println!("{info}");
            assert!(info.max_work_group_size > 0);
        }
    }

    #[test]
    fn test_numbering() {
        let Ok(ctx) = Context::init(OpenCl, &Default::default()) else {
            return;
        };
        const N: usize = 50000;
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

        let mut back = vec![0u32; N];
        queues
            .get(0)
            .unwrap()
            .read_blocking(&buffers[0], &mut back)
            .unwrap();
        assert!(back.iter().enumerate().all(|(i, &x)| x == 2 * i as u32));
    }

    #[test]
    fn test_build_log() {
        let Ok(ctx) = Context::init(OpenCl, &Default::default()) else {
            return;
        };
        let Err(e) = ProgramBuilder::new(Source::Text("__kernel void broken(__global uint *x) {"))
            .build(&ctx)
        else {
            panic!("unclosed brace")
        };
        assert_eq!(e.kind(), ErrorKind::CompileError);
        println!("{e}");
    }
}
