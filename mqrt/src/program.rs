use crate::{
    compile_error, file_read_error, kernel_creation_failed, kernel_not_found, BuildFailure,
    Context, Hardware, Pool, Result, Status,
};
use log::debug;
use std::{borrow::Cow, collections::HashMap, fs, mem::ManuallyDrop, path::Path};

/// 程序源码的来源。
#[derive(Clone, Copy, Debug)]
pub enum Source<'a> {
    Text(&'a str),
    File(&'a Path),
}

impl Source<'_> {
    fn load(&self) -> Result<Cow<str>> {
        match *self {
            Self::Text(text) => Ok(Cow::Borrowed(text)),
            Self::File(path) => match fs::read_to_string(path) {
                Ok(text) if text.is_empty() => Err(file_read_error(format!(
                    "Could not load kernel source from [{}]",
                    path.display()
                ))),
                Ok(text) => Ok(Cow::Owned(text)),
                Err(e) => Err(file_read_error(format!(
                    "Cannot open [{}] for reading: {e}",
                    path.display()
                ))),
            },
        }
    }
}

pub struct ProgramBuilder<'a> {
    source: Source<'a>,
    options: &'a str,
    entries: Vec<&'a str>,
}

impl<'a> ProgramBuilder<'a> {
    #[inline]
    pub fn new(source: Source<'a>) -> Self {
        Self {
            source,
            options: "",
            entries: Vec::new(),
        }
    }

    /// 编译选项，如 `-D N=16`。
    #[inline]
    pub fn options(mut self, options: &'a str) -> Self {
        self.options = options;
        self
    }

    /// 要求程序必须定义的内核。
    #[inline]
    pub fn entry(mut self, name: &'a str) -> Self {
        self.entries.push(name);
        self
    }

    pub fn build<'ctx, H: Hardware>(self, ctx: &'ctx Context<H>) -> Result<Program<'ctx, H>> {
        let source = self.source.load()?;
        let hw = ctx.hw();
        let raw = hw
            .build_program(ctx.raw(), ctx.device().raw(), &source, self.options)
            .map_err(|BuildFailure { status, log }| compile_error(status, log))?;
        let names = hw
            .kernel_names(&raw)
            .map_err(|status| compile_error(status, "Query kernel names"))?;

        for entry in self.entries {
            if !names.iter().any(|name| name == entry) {
                return Err(kernel_not_found(format!(
                    "Kernel `{entry}` is not defined, program has [{}]",
                    names.join(", ")
                )));
            }
        }

        debug!("program built with kernels [{}]", names.join(", "));
        Ok(Program {
            kernels: names.into_iter().map(|name| (name, Pool::new())).collect(),
            raw,
            ctx,
        })
    }
}

/// 编译完成的程序。
pub struct Program<'ctx, H: Hardware> {
    // 空闲的内核实例先于程序释放
    kernels: HashMap<String, Pool<H::Kernel>>,
    raw: H::Program,
    ctx: &'ctx Context<H>,
}

impl<'ctx, H: Hardware> Program<'ctx, H> {
    #[inline]
    pub fn raw(&self) -> &H::Program {
        &self.raw
    }

    #[inline]
    pub fn ctx(&self) -> &'ctx Context<H> {
        self.ctx
    }

    pub fn kernel_names(&self) -> impl Iterator<Item = &str> {
        self.kernels.keys().map(String::as_str)
    }

    /// 取得名为 `name` 的内核实例。
    ///
    /// 每个实例有自己的参数表。实例丢弃后回到程序中等待复用，复用时所有参数都要重新绑定。
    pub fn kernel(&self, name: &str) -> Result<Kernel<H>> {
        let Some((name, pool)) = self.kernels.get_key_value(name) else {
            return Err(kernel_not_found(format!("Activate kernel {name}")));
        };
        let hw = self.ctx.hw();
        let raw = pool
            .pop_or_else(|| hw.create_kernel(&self.raw, name))
            .map_err(|status| activate_failed(status, name))?;
        let arity = match hw.kernel_arity(&raw) {
            Ok(n) => n,
            Err(status) => {
                pool.push(raw);
                return Err(activate_failed(status, name));
            }
        };
        Ok(Kernel {
            raw: ManuallyDrop::new(raw),
            name,
            bound: vec![false; arity],
            program: self,
        })
    }
}

fn activate_failed(status: Status, name: &str) -> crate::Error {
    let info = format!("Activate kernel {name}");
    if status == Status::INVALID_KERNEL_NAME {
        kernel_creation_failed(status, info)
    } else {
        compile_error(status, info)
    }
}

/// 程序中一个内核的实例。
///
/// 内核借用它的程序和所有绑定的存储。
pub struct Kernel<'a, H: Hardware> {
    pub(crate) raw: ManuallyDrop<H::Kernel>,
    pub(crate) name: &'a str,
    pub(crate) bound: Vec<bool>,
    pub(crate) program: &'a Program<'a, H>,
}

impl<'a, H: Hardware> Kernel<'a, H> {
    #[inline]
    pub fn name(&self) -> &'a str {
        self.name
    }

    #[inline]
    pub fn raw(&self) -> &H::Kernel {
        &self.raw
    }

    #[inline]
    pub fn program(&self) -> &'a Program<'a, H> {
        self.program
    }
}

impl<H: Hardware> Drop for Kernel<'_, H> {
    fn drop(&mut self) {
        let raw = unsafe { ManuallyDrop::take(&mut self.raw) };
        if let Some(pool) = self.program.kernels.get(self.name) {
            pool.push(raw)
        }
    }
}

#[cfg(test)]
mod test {
    use super::{ProgramBuilder, Source};
    use crate::{
        common::test_utils::{context, cpu, NUMBERING},
        Buffer, ErrorKind, MemFlags, Status,
    };
    use std::{env::temp_dir, fs, process};

    #[test]
    fn test_build() {
        let cpu = cpu();
        let live = cpu.live();
        let ctx = context(cpu);
        let program = ProgramBuilder::new(Source::Text(NUMBERING))
            .entry("numbering")
            .build(&ctx)
            .unwrap();
        assert_eq!(program.kernel_names().collect::<Vec<_>>(), ["numbering"]);

        let a = program.kernel("numbering").unwrap();
        let b = program.kernel("numbering").unwrap();
        assert_eq!(a.name(), "numbering");
        assert_eq!(live.kernels(), 2);
        drop(a);
        drop(b);
        let _c = program.kernel("numbering").unwrap();
        assert_eq!(live.kernels(), 2);

        drop(_c);
        drop(program);
        assert_eq!(live.kernels(), 0);
    }

    #[test]
    fn test_pooled_kernel_keeps_storage() {
        let cpu = cpu();
        let live = cpu.live();
        let ctx = context(cpu);
        let program = ProgramBuilder::new(Source::Text(NUMBERING))
            .build(&ctx)
            .unwrap();

        let buf = Buffer::new(&ctx, MemFlags::WriteOnly, 64).unwrap();
        let mut kernel = program.kernel("numbering").unwrap();
        kernel.bind_buffer(0, &buf).unwrap();
        drop(kernel);
        buf.release();
        assert_eq!((live.buffers(), live.bytes()), (1, 64));

        drop(program);
        assert_eq!((live.buffers(), live.bytes()), (0, 0));
    }

    #[test]
    fn test_compile_error() {
        let ctx = context(cpu());
        let src = "__kernel void numbering(__global uint *global_mem)\n{\n  global_mem[0] = 1;\n";
        let Err(e) = ProgramBuilder::new(Source::Text(src)).build(&ctx) else {
            panic!("unclosed brace")
        };
        assert_eq!(e.kind(), ErrorKind::CompileError);
        assert_eq!(e.status(), Some(Status::BUILD_PROGRAM_FAILURE));
        assert!(e.info.contains("line 2"), "{}", e.info);
    }

    #[test]
    fn test_build_options() {
        let ctx = context(cpu());
        let Err(e) = ProgramBuilder::new(Source::Text(NUMBERING))
            .options("fast")
            .build(&ctx)
        else {
            panic!("`fast` is not an option")
        };
        assert_eq!(e.kind(), ErrorKind::CompileError);
        assert_eq!(e.status(), Some(Status::INVALID_BUILD_OPTIONS));

        ProgramBuilder::new(Source::Text(NUMBERING))
            .options("-D N=16 -cl-fast-relaxed-math")
            .build(&ctx)
            .unwrap();
    }

    #[test]
    fn test_kernel_not_found() {
        let ctx = context(cpu());
        let Err(e) = ProgramBuilder::new(Source::Text(NUMBERING))
            .entry("numbering")
            .entry("square")
            .build(&ctx)
        else {
            panic!("square is not defined")
        };
        assert_eq!(e.kind(), ErrorKind::KernelNotFound);

        let program = ProgramBuilder::new(Source::Text(NUMBERING))
            .build(&ctx)
            .unwrap();
        let Err(e) = program.kernel("square") else {
            panic!("square is not defined")
        };
        assert_eq!(e.kind(), ErrorKind::KernelNotFound);
    }

    #[test]
    fn test_file() {
        let ctx = context(cpu());
        let dir = temp_dir().join(format!("mqrt-program-{}", process::id()));
        fs::create_dir_all(&dir).unwrap();

        let missing = dir.join("missing.cl");
        let Err(e) = ProgramBuilder::new(Source::File(&missing)).build(&ctx) else {
            panic!("file does not exist")
        };
        assert_eq!(e.kind(), ErrorKind::FileReadError);

        let empty = dir.join("empty.cl");
        fs::write(&empty, "").unwrap();
        let Err(e) = ProgramBuilder::new(Source::File(&empty)).build(&ctx) else {
            panic!("file is empty")
        };
        assert_eq!(e.kind(), ErrorKind::FileReadError);

        let file = dir.join("numbering.cl");
        fs::write(&file, NUMBERING).unwrap();
        let program = ProgramBuilder::new(Source::File(&file))
            .entry("numbering")
            .build(&ctx)
            .unwrap();
        assert!(program.kernel("numbering").is_ok());

        fs::remove_dir_all(&dir).unwrap();
    }
}
