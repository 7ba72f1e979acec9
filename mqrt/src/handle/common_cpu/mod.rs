//! 在主机线程上模拟设备的后端。
//!
//! 每个队列是一个工作线程，存储是主机内存，内核由注册的 Rust 函数实现。
//! 源码只做语法检查和签名解析，资源上限可以配置，用于演练各种失败路径。

mod launch;
mod queue;
mod source;

pub use launch::Launch;
pub use queue::{Event, Worker};

use crate::{
    common::Blob, BuildFailure, DeviceInfo, DeviceKind, EventStatus, Hardware, MemFlags, NdRange,
    RawArg, Status,
};
use queue::{HostPtr, HostPtrMut};
use source::{KernelDecl, ParamKind};
use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering::SeqCst},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread::available_parallelism,
};

/// 主机内核。
pub type HostFn = Arc<dyn Fn(&Launch) -> Result<(), Status> + Send + Sync>;

#[derive(Clone)]
pub struct Cpu {
    devices: usize,
    max_work_group_size: usize,
    context_limit: usize,
    queue_limit: usize,
    mem_limit: usize,
    kernels: HashMap<String, HostFn>,
    live: Live,
}

impl Default for Cpu {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Cpu {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Cpu")
            .field("devices", &self.devices)
            .field("kernels", &self.kernels.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Cpu {
    /// 一个设备，没有资源上限，没有内核。
    pub fn new() -> Self {
        Self {
            devices: 1,
            max_work_group_size: 1024,
            context_limit: usize::MAX,
            queue_limit: usize::MAX,
            mem_limit: usize::MAX,
            kernels: HashMap::new(),
            live: Live::default(),
        }
    }

    pub fn devices(mut self, n: usize) -> Self {
        self.devices = n;
        self
    }

    pub fn max_work_group_size(mut self, n: usize) -> Self {
        self.max_work_group_size = n;
        self
    }

    /// 同时存在的上下文数上限，超出时创建失败。
    pub fn context_limit(mut self, n: usize) -> Self {
        self.context_limit = n;
        self
    }

    /// 同时存在的队列数上限，超出时创建失败。
    pub fn queue_limit(mut self, n: usize) -> Self {
        self.queue_limit = n;
        self
    }

    /// 存储总字节数上限，超出时分配失败。
    pub fn mem_limit(mut self, bytes: usize) -> Self {
        self.mem_limit = bytes;
        self
    }

    /// 注册名为 `name` 的内核的主机实现。源码中定义但没有实现的内核无法编译。
    pub fn kernel(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&Launch) -> Result<(), Status> + Send + Sync + 'static,
    ) -> Self {
        self.kernels.insert(name.into(), Arc::new(f));
        self
    }

    /// 存活对象计数，与这个后端及其克隆共享。
    #[inline]
    pub fn live(&self) -> Live {
        self.live.clone()
    }

    fn acquire(
        &self,
        counter: Counter,
        n: usize,
        limit: usize,
        status: Status,
    ) -> Result<Token, Status> {
        self.live.acquire(counter, n, limit).ok_or(status)
    }
}

/// 存活对象计数。
#[derive(Clone, Default)]
pub struct Live(Arc<Counters>);

#[derive(Default)]
struct Counters {
    contexts: AtomicUsize,
    queues: AtomicUsize,
    buffers: AtomicUsize,
    bytes: AtomicUsize,
    kernels: AtomicUsize,
}

#[derive(Clone, Copy, Debug)]
enum Counter {
    Contexts,
    Queues,
    Buffers,
    Bytes,
    Kernels,
}

impl Counters {
    fn get(&self, counter: Counter) -> &AtomicUsize {
        match counter {
            Counter::Contexts => &self.contexts,
            Counter::Queues => &self.queues,
            Counter::Buffers => &self.buffers,
            Counter::Bytes => &self.bytes,
            Counter::Kernels => &self.kernels,
        }
    }
}

impl Live {
    pub fn contexts(&self) -> usize {
        self.0.contexts.load(SeqCst)
    }

    pub fn queues(&self) -> usize {
        self.0.queues.load(SeqCst)
    }

    pub fn buffers(&self) -> usize {
        self.0.buffers.load(SeqCst)
    }

    /// 已分配的存储字节数。
    pub fn bytes(&self) -> usize {
        self.0.bytes.load(SeqCst)
    }

    pub fn kernels(&self) -> usize {
        self.0.kernels.load(SeqCst)
    }

    fn acquire(&self, counter: Counter, n: usize, limit: usize) -> Option<Token> {
        self.0
            .get(counter)
            .fetch_update(SeqCst, SeqCst, |x| x.checked_add(n).filter(|&y| y <= limit))
            .ok()?;
        Some(Token {
            live: self.clone(),
            counter,
            n,
        })
    }
}

/// 持有一份计数，丢弃时归还。
pub struct Token {
    live: Live,
    counter: Counter,
    n: usize,
}

impl Drop for Token {
    #[inline]
    fn drop(&mut self) {
        self.live.0.get(self.counter).fetch_sub(self.n, SeqCst);
    }
}

#[inline]
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct CpuContext {
    device: usize,
    _token: Token,
}

pub struct CpuProgram {
    kernels: Vec<Arc<Compiled>>,
    defines: Arc<HashMap<String, String>>,
}

struct Compiled {
    decl: KernelDecl,
    f: HostFn,
}

pub struct CpuKernel {
    compiled: Arc<Compiled>,
    defines: Arc<HashMap<String, String>>,
    args: Vec<Option<Arg>>,
    _token: Token,
}

#[derive(Clone)]
enum Arg {
    Mem(Arc<MemCell>),
    Scalar(Vec<u8>),
    Local(usize),
}

pub struct CpuMem {
    cell: Arc<MemCell>,
    size: usize,
}

/// 存储本体。内核参数也持有它，计数随最后一个持有者归还。
struct MemCell {
    data: Mutex<Blob>,
    flags: MemFlags,
    _tokens: [Token; 2],
}

impl MemCell {
    #[inline]
    fn new(blob: Blob, flags: MemFlags, tokens: [Token; 2]) -> Self {
        Self {
            data: Mutex::new(blob),
            flags,
            _tokens: tokens,
        }
    }
}

impl Hardware for Cpu {
    type Device = usize;
    type Context = CpuContext;
    type Queue = Worker;
    type Program = CpuProgram;
    type Kernel = CpuKernel;
    type Mem = CpuMem;
    type Event = Event;

    fn devices(&self) -> Result<Vec<usize>, Status> {
        Ok((0..self.devices).collect())
    }

    fn device_info(&self, device: &usize) -> DeviceInfo {
        DeviceInfo {
            name: format!("host device {device}"),
            vendor: "mqrt".into(),
            kind: DeviceKind::Cpu,
            max_work_group_size: self.max_work_group_size,
            global_mem_size: self.mem_limit as u64,
            compute_units: available_parallelism().map_or(1, |n| n.get() as u32),
        }
    }

    fn create_context(&self, device: &usize) -> Result<CpuContext, Status> {
        if *device >= self.devices {
            return Err(Status::INVALID_DEVICE);
        }
        let token = self.acquire(
            Counter::Contexts,
            1,
            self.context_limit,
            Status::OUT_OF_RESOURCES,
        )?;
        Ok(CpuContext {
            device: *device,
            _token: token,
        })
    }

    fn create_queue(&self, context: &CpuContext, device: &usize) -> Result<Worker, Status> {
        if context.device != *device {
            return Err(Status::INVALID_DEVICE);
        }
        let token = self.acquire(Counter::Queues, 1, self.queue_limit, Status::OUT_OF_RESOURCES)?;
        Worker::spawn(token)
    }

    fn build_program(
        &self,
        context: &CpuContext,
        device: &usize,
        source: &str,
        options: &str,
    ) -> Result<CpuProgram, BuildFailure> {
        if context.device != *device {
            return Err(Status::INVALID_DEVICE.into());
        }
        let defines = source::parse_options(options).map_err(|log| BuildFailure {
            status: Status::INVALID_BUILD_OPTIONS,
            log,
        })?;
        let decls = source::parse(source).map_err(|log| BuildFailure {
            status: Status::BUILD_PROGRAM_FAILURE,
            log,
        })?;

        let mut kernels = Vec::with_capacity(decls.len());
        let mut missing = Vec::new();
        for decl in decls {
            match self.kernels.get(&decl.name) {
                Some(f) => kernels.push(Arc::new(Compiled { f: f.clone(), decl })),
                None => missing.push(format!(
                    "error: kernel `{}` has no implementation on this device",
                    decl.name
                )),
            }
        }
        if !missing.is_empty() {
            return Err(BuildFailure {
                status: Status::BUILD_PROGRAM_FAILURE,
                log: missing.join("\n"),
            });
        }
        Ok(CpuProgram {
            kernels,
            defines: Arc::new(defines),
        })
    }

    fn kernel_names(&self, program: &CpuProgram) -> Result<Vec<String>, Status> {
        Ok(program.kernels.iter().map(|k| k.decl.name.clone()).collect())
    }

    fn create_kernel(&self, program: &CpuProgram, name: &str) -> Result<CpuKernel, Status> {
        let compiled = program
            .kernels
            .iter()
            .find(|k| k.decl.name == name)
            .ok_or(Status::INVALID_KERNEL_NAME)?;
        let token = self.acquire(Counter::Kernels, 1, usize::MAX, Status::OUT_OF_RESOURCES)?;
        Ok(CpuKernel {
            args: vec![None; compiled.decl.params.len()],
            compiled: compiled.clone(),
            defines: program.defines.clone(),
            _token: token,
        })
    }

    fn kernel_arity(&self, kernel: &CpuKernel) -> Result<usize, Status> {
        Ok(kernel.compiled.decl.params.len())
    }

    fn set_arg(
        &self,
        kernel: &mut CpuKernel,
        index: usize,
        arg: RawArg<CpuMem>,
    ) -> Result<(), Status> {
        let param = *kernel
            .compiled
            .decl
            .params
            .get(index)
            .ok_or(Status::INVALID_ARG_INDEX)?;
        let value = match (param, arg) {
            (ParamKind::Global, RawArg::Mem(mem)) => Arg::Mem(mem.cell.clone()),
            (ParamKind::Global, RawArg::Scalar(_)) => return Err(Status::INVALID_ARG_SIZE),
            (ParamKind::Local, RawArg::Local(0)) => return Err(Status::INVALID_ARG_SIZE),
            (ParamKind::Local, RawArg::Local(size)) => Arg::Local(size),
            (ParamKind::Scalar(Some(size)), RawArg::Scalar(bytes)) if bytes.len() != size => {
                return Err(Status::INVALID_ARG_SIZE)
            }
            (ParamKind::Scalar(_), RawArg::Scalar(bytes)) => Arg::Scalar(bytes.to_vec()),
            (_, _) => return Err(Status::INVALID_ARG_VALUE),
        };
        kernel.args[index] = Some(value);
        Ok(())
    }

    fn create_mem(
        &self,
        _context: &CpuContext,
        flags: MemFlags,
        size: usize,
    ) -> Result<CpuMem, Status> {
        if size == 0 {
            return Err(Status::INVALID_BUFFER_SIZE);
        }
        let bytes = self.acquire(
            Counter::Bytes,
            size,
            self.mem_limit,
            Status::MEM_OBJECT_ALLOCATION_FAILURE,
        )?;
        let blob = Blob::zeroed(size).ok_or(Status::MEM_OBJECT_ALLOCATION_FAILURE)?;
        let count = self.acquire(Counter::Buffers, 1, usize::MAX, Status::OUT_OF_RESOURCES)?;
        Ok(CpuMem {
            cell: Arc::new(MemCell::new(blob, flags, [count, bytes])),
            size,
        })
    }

    unsafe fn enqueue_write(
        &self,
        queue: &Worker,
        mem: &mut CpuMem,
        src: &[u8],
    ) -> Result<Event, Status> {
        if src.len() > mem.size {
            return Err(Status::INVALID_VALUE);
        }
        let cell = mem.cell.clone();
        let src = HostPtr::new(src);
        queue.submit(Box::new(move || {
            let src = unsafe { src.get() };
            lock(&cell.data)[..src.len()].copy_from_slice(src);
            Ok(())
        }))
    }

    unsafe fn enqueue_read(
        &self,
        queue: &Worker,
        mem: &CpuMem,
        dst: &mut [u8],
    ) -> Result<Event, Status> {
        if dst.len() > mem.size {
            return Err(Status::INVALID_VALUE);
        }
        let cell = mem.cell.clone();
        let dst = HostPtrMut::new(dst);
        queue.submit(Box::new(move || {
            let dst = unsafe { dst.get() };
            dst.copy_from_slice(&lock(&cell.data)[..dst.len()]);
            Ok(())
        }))
    }

    unsafe fn enqueue_kernel(
        &self,
        queue: &Worker,
        kernel: &CpuKernel,
        range: &NdRange,
    ) -> Result<Event, Status> {
        range.check(self.max_work_group_size)?;
        let args = kernel
            .args
            .iter()
            .cloned()
            .collect::<Option<Vec<_>>>()
            .ok_or(Status::INVALID_KERNEL_ARGS)?;
        let compiled = kernel.compiled.clone();
        let defines = kernel.defines.clone();
        let range = range.clone();
        queue.submit(Box::new(move || {
            let launch = Launch::new(&range, &args, &defines);
            (compiled.f)(&launch)
        }))
    }

    fn wait(&self, event: &Event) -> Result<(), Status> {
        event.wait()
    }

    fn event_status(&self, event: &Event) -> Result<EventStatus, Status> {
        Ok(event.status())
    }

    fn finish(&self, queue: &Worker) -> Result<(), Status> {
        queue.finish()
    }
}

#[cfg(test)]
mod test {
    use super::Cpu;
    use crate::{Hardware, MemFlags, NdRange, RawArg, Status};

    const SRC: &str = "__kernel void fill(__global uchar *out, uchar x) {}";

    #[test]
    fn test_limits() {
        let cpu = Cpu::new().mem_limit(100).queue_limit(1);
        let live = cpu.live();
        let ctx = cpu.create_context(&0).unwrap();
        assert_eq!(cpu.create_context(&1).err(), Some(Status::INVALID_DEVICE));

        let a = cpu.create_mem(&ctx, MemFlags::ReadWrite, 60).unwrap();
        assert_eq!(
            cpu.create_mem(&ctx, MemFlags::ReadWrite, 60).err(),
            Some(Status::MEM_OBJECT_ALLOCATION_FAILURE)
        );
        assert_eq!(live.bytes(), 60);
        drop(a);
        assert_eq!((live.bytes(), live.buffers()), (0, 0));

        let q = cpu.create_queue(&ctx, &0).unwrap();
        assert_eq!(cpu.create_queue(&ctx, &0).err(), Some(Status::OUT_OF_RESOURCES));
        drop(q);
        assert!(cpu.create_queue(&ctx, &0).is_ok());
    }

    #[test]
    fn test_unimplemented_kernel() {
        let cpu = Cpu::new();
        let ctx = cpu.create_context(&0).unwrap();
        let Err(e) = cpu.build_program(&ctx, &0, SRC, "") else {
            panic!("fill has no host implementation")
        };
        assert_eq!(e.status, Status::BUILD_PROGRAM_FAILURE);
        assert!(e.log.contains("`fill`"));
    }

    #[test]
    fn test_kernel_on_worker() {
        let cpu = Cpu::new().kernel("fill", |l| {
            let x = l.scalar::<u8>(1)?;
            l.global_mut::<u8>(0)?.fill(x);
            Ok(())
        });
        let ctx = cpu.create_context(&0).unwrap();
        let queue = cpu.create_queue(&ctx, &0).unwrap();
        let program = cpu.build_program(&ctx, &0, SRC, "").unwrap();
        assert_eq!(cpu.kernel_names(&program).unwrap(), ["fill"]);
        assert_eq!(cpu.create_kernel(&program, "copy").err(), Some(Status::INVALID_KERNEL_NAME));

        let mut kernel = cpu.create_kernel(&program, "fill").unwrap();
        let mem = cpu.create_mem(&ctx, MemFlags::WriteOnly, 8).unwrap();
        cpu.set_arg(&mut kernel, 0, RawArg::Mem(&mem)).unwrap();
        assert_eq!(
            cpu.set_arg(&mut kernel, 2, RawArg::Local(4)),
            Err(Status::INVALID_ARG_INDEX)
        );
        assert_eq!(
            unsafe { cpu.enqueue_kernel(&queue, &kernel, &NdRange::d1(1)) }.err(),
            Some(Status::INVALID_KERNEL_ARGS)
        );

        cpu.set_arg(&mut kernel, 1, RawArg::Scalar(&[9])).unwrap();
        let event = unsafe { cpu.enqueue_kernel(&queue, &kernel, &NdRange::d1(1)) }.unwrap();
        cpu.wait(&event).unwrap();

        let mut dst = [0u8; 8];
        let event = unsafe { cpu.enqueue_read(&queue, &mem, &mut dst) }.unwrap();
        cpu.wait(&event).unwrap();
        assert_eq!(dst, [9; 8]);
    }

    #[test]
    fn test_bound_storage_stays_counted() {
        let cpu = Cpu::new().kernel("fill", |_| Ok(()));
        let live = cpu.live();
        let ctx = cpu.create_context(&0).unwrap();
        let program = cpu.build_program(&ctx, &0, SRC, "").unwrap();
        let mut kernel = cpu.create_kernel(&program, "fill").unwrap();

        let mem = cpu.create_mem(&ctx, MemFlags::ReadWrite, 32).unwrap();
        cpu.set_arg(&mut kernel, 0, RawArg::Mem(&mem)).unwrap();
        drop(mem);
        // 内核参数仍然持有存储
        assert_eq!((live.buffers(), live.bytes()), (1, 32));

        let other = cpu.create_mem(&ctx, MemFlags::ReadWrite, 8).unwrap();
        cpu.set_arg(&mut kernel, 0, RawArg::Mem(&other)).unwrap();
        assert_eq!((live.buffers(), live.bytes()), (1, 8));
        drop((kernel, other));
        assert_eq!((live.buffers(), live.bytes()), (0, 0));
    }
}
