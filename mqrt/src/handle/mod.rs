#[cfg(any(use_cpu, test))]
pub mod common_cpu;

#[cfg(use_cl)]
pub mod opencl;
