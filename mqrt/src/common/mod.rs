mod blob;
mod error;
mod pool;
mod scalar;
mod status;

pub use error::{functions::*, Error, ErrorKind};
pub use pool::Pool;
pub use scalar::Scalar;
pub use status::Status;

pub(crate) use blob::Blob;
pub(crate) use scalar::{as_bytes, as_bytes_mut};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
pub(crate) mod test_utils {
    use crate::{common_cpu::Cpu, Context, Launch, Status};

    pub const NUMBERING: &str = "
__kernel void numbering(__global uint *global_mem)
{
  global_mem[get_global_id(0)] = 2 * get_global_id(0);
}
";

    /// `numbering` 的主机实现。
    pub fn numbering(l: &Launch) -> Result<(), Status> {
        let mut mem = l.global_mut::<u32>(0)?;
        let (offset, size) = (l.global_offset(0), l.global_size(0));
        let out = mem
            .get_mut(offset..offset + size)
            .ok_or(Status::INVALID_GLOBAL_OFFSET)?;
        for (i, x) in out.iter_mut().enumerate() {
            *x = 2 * (offset + i) as u32
        }
        Ok(())
    }

    pub fn cpu() -> Cpu {
        Cpu::new().kernel("numbering", numbering)
    }

    pub fn context(cpu: Cpu) -> Context<Cpu> {
        Context::init(cpu, &Default::default()).unwrap()
    }
}
