use std::fmt;

/// 计算 API 返回的原始状态码。
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Status(pub i32);

macro_rules! codes {
    ($($name:ident = $code:literal, $text:literal;)*) => {
        impl Status {
            $(pub const $name: Self = Self($code);)*

            /// 状态码的符号名，未知状态码返回 [None]。
            pub const fn name(self) -> Option<&'static str> {
                match self.0 {
                    $($code => Some(concat!("CL_", stringify!($name))),)*
                    _ => None,
                }
            }

            /// 状态码的可读说明。
            pub const fn describe(self) -> &'static str {
                match self.0 {
                    $($code => $text,)*
                    _ => "Unknown error code",
                }
            }
        }
    };
}

codes! {
    SUCCESS                                   =   0, "Success";
    DEVICE_NOT_FOUND                          =  -1, "Device not found";
    DEVICE_NOT_AVAILABLE                      =  -2, "Device not available";
    COMPILER_NOT_AVAILABLE                    =  -3, "Compiler not available";
    MEM_OBJECT_ALLOCATION_FAILURE             =  -4, "Cl_mem object allocation failure";
    OUT_OF_RESOURCES                          =  -5, "Out of resources";
    OUT_OF_HOST_MEMORY                        =  -6, "Out of host memory";
    PROFILING_INFO_NOT_AVAILABLE              =  -7, "Profiling information not available";
    MEM_COPY_OVERLAP                          =  -8, "Memory copy overlap";
    BUILD_PROGRAM_FAILURE                     = -11, "Build program failure";
    MAP_FAILURE                               = -12, "Map failure";
    EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST = -14, "A command in the wait list failed";
    INVALID_VALUE                             = -30, "Invalid value";
    INVALID_DEVICE_TYPE                       = -31, "Invalid device type";
    INVALID_PLATFORM                          = -32, "Invalid platform";
    INVALID_DEVICE                            = -33, "Invalid device";
    INVALID_CONTEXT                           = -34, "Invalid context";
    INVALID_QUEUE_PROPERTIES                  = -35, "Invalid queue properties";
    INVALID_COMMAND_QUEUE                     = -36, "Invalid command queue";
    INVALID_HOST_PTR                          = -37, "Invalid host pointer";
    INVALID_MEM_OBJECT                        = -38, "Not a valid buffer object";
    INVALID_BINARY                            = -42, "Invalid binary";
    INVALID_BUILD_OPTIONS                     = -43, "Invalid build options";
    INVALID_PROGRAM                           = -44, "Invalid program";
    INVALID_PROGRAM_EXECUTABLE                = -45, "Program has no successfully built executable";
    INVALID_KERNEL_NAME                       = -46, "Kernel name not found in program";
    INVALID_KERNEL_DEFINITION                 = -47, "Invalid kernel definition";
    INVALID_KERNEL                            = -48, "Invalid kernel";
    INVALID_ARG_INDEX                         = -49, "Invalid argument index";
    INVALID_ARG_VALUE                         = -50, "Invalid argument value";
    INVALID_ARG_SIZE                          = -51, "Argument size does not match the parameter";
    INVALID_KERNEL_ARGS                       = -52, "Kernel arguments are not all set";
    INVALID_WORK_DIMENSION                    = -53, "Invalid work dimension";
    INVALID_WORK_GROUP_SIZE                   = -54, "Invalid work-group size";
    INVALID_WORK_ITEM_SIZE                    = -55, "Invalid work-item size";
    INVALID_GLOBAL_OFFSET                     = -56, "Invalid global offset";
    INVALID_EVENT_WAIT_LIST                   = -57, "Invalid event wait list";
    INVALID_EVENT                             = -58, "Invalid event";
    INVALID_OPERATION                         = -59, "Invalid operation";
    INVALID_BUFFER_SIZE                       = -61, "Invalid buffer size";
    INVALID_GLOBAL_WORK_SIZE                  = -63, "Invalid global work size";
    INVALID_PROPERTY                          = -64, "Invalid property";
}

impl Status {
    #[inline]
    pub const fn is_success(self) -> bool {
        self.0 == Self::SUCCESS.0
    }

    /// 把原始状态码转换为 [Result]。
    #[inline]
    pub const fn check(self) -> Result<(), Self> {
        if self.is_success() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}({})", self.0),
            None => write!(f, "Status({})", self.0),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} ({}): {}", self.0, self.describe()),
            None => write!(f, "{} [{}]", self.describe(), self.0),
        }
    }
}

#[test]
fn test_status_table() {
    assert_eq!(Status::INVALID_ARG_INDEX.name(), Some("CL_INVALID_ARG_INDEX"));
    assert_eq!(Status(-49), Status::INVALID_ARG_INDEX);
    assert_eq!(Status(-1000).name(), None);
    assert!(Status::SUCCESS.check().is_ok());
    assert_eq!(Status::OUT_OF_RESOURCES.check(), Err(Status(-5)));
    assert_eq!(
        Status::OUT_OF_RESOURCES.to_string(),
        "CL_OUT_OF_RESOURCES (-5): Out of resources"
    );
    assert_eq!(Status(-1000).to_string(), "Unknown error code [-1000]");
}
