mod args;
mod buffer;
mod common;
mod config;
mod context;
mod dispatch;
mod event;
mod handle;
mod platform;
mod program;
mod queues;
mod rounds;

pub use buffer::{Buffer, MemFlags};
pub use common::*;
pub use config::Config;
pub use context::Context;
pub use dispatch::NdRange;
pub use event::{wait_all, CompletionHandle, EventStatus, EventTable};
pub use platform::{select_device, DeviceHandle, HintPolicy};
pub use program::{Kernel, Program, ProgramBuilder, Source};
pub use queues::{Queue, QueueSet};
pub use rounds::Rounds;

#[cfg(any(use_cpu, test))]
pub use handle::common_cpu::{self, Launch};

#[cfg(use_cl)]
pub use handle::opencl;
#[cfg(use_cl)]
pub extern crate opencl3;

use std::fmt;

/// 计算 API 抽象。
///
/// 约定平台、设备、上下文、队列、程序、内核、存储和事件这些句柄如何创建和使用。
/// 句柄的释放就是句柄的 [Drop]。
/// 所有可失败的调用都返回原始状态码，由上层转换为结构化的 [Error]。
pub trait Hardware {
    /// 设备标识。
    type Device: Clone;
    /// 设备上下文。
    type Context;
    /// 有序任务队列。
    type Queue;
    /// 编译后的程序。
    type Program;
    /// 带有参数表的内核实例。
    type Kernel;
    /// 设备存储区域。
    type Mem;
    /// 已入队操作的完成事件。
    type Event;

    /// 按优先顺序列出可用设备。
    fn devices(&self) -> Result<Vec<Self::Device>, Status>;
    fn device_info(&self, device: &Self::Device) -> DeviceInfo;

    fn create_context(&self, device: &Self::Device) -> Result<Self::Context, Status>;
    fn create_queue(
        &self,
        context: &Self::Context,
        device: &Self::Device,
    ) -> Result<Self::Queue, Status>;

    /// 编译程序，失败时带回编译日志。
    fn build_program(
        &self,
        context: &Self::Context,
        device: &Self::Device,
        source: &str,
        options: &str,
    ) -> Result<Self::Program, BuildFailure>;
    fn kernel_names(&self, program: &Self::Program) -> Result<Vec<String>, Status>;
    fn create_kernel(&self, program: &Self::Program, name: &str) -> Result<Self::Kernel, Status>;
    /// 内核声明的参数个数。
    fn kernel_arity(&self, kernel: &Self::Kernel) -> Result<usize, Status>;
    fn set_arg(
        &self,
        kernel: &mut Self::Kernel,
        index: usize,
        arg: RawArg<Self::Mem>,
    ) -> Result<(), Status>;

    fn create_mem(
        &self,
        context: &Self::Context,
        flags: MemFlags,
        size: usize,
    ) -> Result<Self::Mem, Status>;

    /// 把 `src` 非阻塞地写入 `mem` 的开头。
    ///
    /// # Safety
    ///
    /// `src` 必须在返回的事件完成前保持有效。
    unsafe fn enqueue_write(
        &self,
        queue: &Self::Queue,
        mem: &mut Self::Mem,
        src: &[u8],
    ) -> Result<Self::Event, Status>;

    /// 把 `mem` 的开头非阻塞地读到 `dst`。
    ///
    /// # Safety
    ///
    /// `dst` 必须在返回的事件完成前保持有效，且期间不被访问。
    unsafe fn enqueue_read(
        &self,
        queue: &Self::Queue,
        mem: &Self::Mem,
        dst: &mut [u8],
    ) -> Result<Self::Event, Status>;

    /// 以 `range` 发射内核。
    ///
    /// # Safety
    ///
    /// 内核参数引用的存储必须在返回的事件完成前保持有效。
    unsafe fn enqueue_kernel(
        &self,
        queue: &Self::Queue,
        kernel: &Self::Kernel,
        range: &NdRange,
    ) -> Result<Self::Event, Status>;

    /// 阻塞直到事件完成，操作失败时返回其状态码。
    fn wait(&self, event: &Self::Event) -> Result<(), Status>;
    /// 不阻塞地查询事件状态。
    fn event_status(&self, event: &Self::Event) -> Result<EventStatus, Status>;
    /// 阻塞直到队列中所有操作完成。
    fn finish(&self, queue: &Self::Queue) -> Result<(), Status>;
}

/// 传给 [Hardware::set_arg] 的参数值。
pub enum RawArg<'a, M> {
    Mem(&'a M),
    Scalar(&'a [u8]),
    Local(usize),
}

/// 编译失败的状态码和日志。
#[derive(Clone, Debug)]
pub struct BuildFailure {
    pub status: Status,
    pub log: String,
}

impl From<Status> for BuildFailure {
    #[inline]
    fn from(status: Status) -> Self {
        Self {
            status,
            log: String::new(),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DeviceKind {
    Gpu,
    Cpu,
    Accelerator,
    Other,
}

/// 设备的基本能力。
#[derive(Clone, Debug)]
pub struct DeviceInfo {
    pub name: String,
    pub vendor: String,
    pub kind: DeviceKind,
    pub max_work_group_size: usize,
    pub global_mem_size: u64,
    pub compute_units: u32,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind = match self.kind {
            DeviceKind::Gpu => "GPU",
            DeviceKind::Cpu => "CPU",
            DeviceKind::Accelerator => "Accelerator",
            DeviceKind::Other => "Other",
        };
        write!(f, "{kind} device: {}", self.name)
    }
}
