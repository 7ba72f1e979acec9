use super::Status;
use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ErrorKind {
    NoDeviceFound,
    ContextCreationFailed,
    QueueCreationFailed,
    CompileError,
    KernelNotFound,
    InvalidArgumentIndex,
    ArgumentBindFailed,
    AllocationFailed,
    TransferFailed,
    DispatchFailed,
    WaitFailed,
    FileReadError,
    IndexOutOfRange,
}

impl ErrorKind {
    /// 出错的操作。
    pub const fn operation(self) -> &'static str {
        match self {
            Self::NoDeviceFound => "select device",
            Self::ContextCreationFailed => "create context",
            Self::QueueCreationFailed => "create command queue",
            Self::CompileError => "build program",
            Self::KernelNotFound => "activate kernel",
            Self::InvalidArgumentIndex | Self::ArgumentBindFailed => "set kernel argument",
            Self::AllocationFailed => "create buffer",
            Self::TransferFailed => "transfer buffer",
            Self::DispatchFailed => "enqueue kernel",
            Self::WaitFailed => "wait for event",
            Self::FileReadError => "read kernel file",
            Self::IndexOutOfRange => "index",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Error {
    pub kind: ErrorKind,
    /// 设备报告的原始状态码，纯主机侧的错误没有状态码。
    pub status: Option<Status>,
    /// 诊断信息，对 [ErrorKind::CompileError] 是编译日志。
    pub info: String,
}

impl Error {
    #[inline]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[inline]
    pub const fn status(&self) -> Option<Status> {
        self.status
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "*** ERROR at {}", self.kind.operation())?;
        if let Some(status) = self.status {
            write!(f, ": {status}")?
        }
        if !self.info.is_empty() {
            write!(f, "\n{}", self.info)?
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

pub(super) mod functions {
    use super::{super::Status, Error, ErrorKind::*};

    macro_rules! builder {
        ($name:ident $kind:expr) => {
            #[inline]
            pub fn $name(info: impl Into<String>) -> Error {
                Error {
                    kind: $kind,
                    status: None,
                    info: info.into(),
                }
            }
        };
        ($name:ident $kind:expr; status) => {
            #[inline]
            pub fn $name(status: Status, info: impl Into<String>) -> Error {
                Error {
                    kind: $kind,
                    status: Some(status),
                    info: info.into(),
                }
            }
        };
    }

    builder!(no_device_found          NoDeviceFound                 );
    builder!(file_read_error          FileReadError                 );
    builder!(index_out_of_range       IndexOutOfRange               );
    builder!(kernel_not_found         KernelNotFound                );
    builder!(invalid_argument_index   InvalidArgumentIndex          );

    builder!(device_query_failed      NoDeviceFound         ; status);
    builder!(context_creation_failed  ContextCreationFailed ; status);
    builder!(queue_creation_failed    QueueCreationFailed   ; status);
    builder!(compile_error            CompileError          ; status);
    builder!(kernel_creation_failed   KernelNotFound        ; status);
    builder!(argument_index_rejected  InvalidArgumentIndex  ; status);
    builder!(argument_bind_failed     ArgumentBindFailed    ; status);
    builder!(allocation_failed        AllocationFailed      ; status);
    builder!(transfer_failed          TransferFailed        ; status);
    builder!(dispatch_failed          DispatchFailed        ; status);
    builder!(wait_failed              WaitFailed            ; status);
}

#[test]
fn test_display() {
    use functions::*;

    let e = transfer_failed(Status::INVALID_VALUE, "64 bytes into a 32-byte buffer");
    assert_eq!(e.kind(), ErrorKind::TransferFailed);
    assert_eq!(
        e.to_string(),
        concat!(
            "*** ERROR at transfer buffer: CL_INVALID_VALUE (-30): Invalid value\n",
            "64 bytes into a 32-byte buffer",
        )
    );

    let e = index_out_of_range("");
    assert_eq!(e.status(), None);
    assert_eq!(e.to_string(), "*** ERROR at index");
}
