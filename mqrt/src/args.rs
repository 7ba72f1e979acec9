use crate::{
    argument_bind_failed, argument_index_rejected, common::as_bytes, invalid_argument_index,
    Buffer, Hardware, Kernel, RawArg, Result, Scalar, Status,
};
use std::slice::from_ref;

impl<'a, H: Hardware> Kernel<'a, H> {
    /// 内核声明的参数个数。
    #[inline]
    pub fn arity(&self) -> usize {
        self.bound.len()
    }

    #[inline]
    pub fn is_bound(&self, index: usize) -> bool {
        self.bound.get(index).copied().unwrap_or(false)
    }

    /// 第一个未绑定的参数。
    pub(crate) fn unbound(&self) -> Option<usize> {
        self.bound.iter().position(|&b| !b)
    }

    /// 把存储绑定到第 `index` 个参数。存储在内核的生命周期内保持被借用。
    pub fn bind_buffer(&mut self, index: usize, buffer: &'a Buffer<'a, H>) -> Result<()> {
        self.bind(index, RawArg::Mem(buffer.raw()))
    }

    /// 按值绑定一个标量或向量。
    pub fn bind_scalar<T: Scalar>(&mut self, index: usize, value: &T) -> Result<()> {
        self.bind(index, RawArg::Scalar(as_bytes(from_ref(value))))
    }

    /// 按字节绑定一个值，字节数必须等于参数类型的大小。
    pub fn bind_scalar_bytes(&mut self, index: usize, bytes: &[u8]) -> Result<()> {
        self.bind(index, RawArg::Scalar(bytes))
    }

    /// 为 `__local` 参数分配 `size` 字节的工作组存储。
    pub fn bind_local(&mut self, index: usize, size: usize) -> Result<()> {
        self.bind(index, RawArg::Local(size))
    }

    fn bind(&mut self, index: usize, arg: RawArg<H::Mem>) -> Result<()> {
        let arity = self.arity();
        if index >= arity {
            return Err(invalid_argument_index(format!(
                "Kernel `{}` takes {arity} arguments, no argument {index}",
                self.name
            )));
        }

        let hw = self.program.ctx().hw();
        match hw.set_arg(&mut self.raw, index, arg) {
            Ok(()) => {
                self.bound[index] = true;
                Ok(())
            }
            Err(status) => {
                let info = format!("Set argument {index} of kernel `{}`", self.name);
                Err(if status == Status::INVALID_ARG_INDEX {
                    argument_index_rejected(status, info)
                } else {
                    argument_bind_failed(status, info)
                })
            }
        }
    }
}
