use crate::{context_creation_failed, select_device, Config, DeviceHandle, Hardware, Result};

/// 进程内唯一的设备上下文。
///
/// 队列、程序和存储都借用上下文，因此上下文总是最后释放。
pub struct Context<H: Hardware> {
    raw: H::Context,
    device: DeviceHandle<H>,
    hw: H,
}

impl<H: Hardware> Context<H> {
    pub fn new(hw: H, device: DeviceHandle<H>) -> Result<Self> {
        let raw = hw
            .create_context(device.raw())
            .map_err(|status| context_creation_failed(status, "Create Context"))?;
        Ok(Self { raw, device, hw })
    }

    /// 按配置选择设备并创建上下文。
    pub fn init(hw: H, config: &Config) -> Result<Self> {
        let device = select_device(&hw, config.device_hint, config.hint_policy)?;
        Self::new(hw, device)
    }

    #[inline]
    pub fn hw(&self) -> &H {
        &self.hw
    }

    #[inline]
    pub fn raw(&self) -> &H::Context {
        &self.raw
    }

    #[inline]
    pub fn device(&self) -> &DeviceHandle<H> {
        &self.device
    }

    #[inline]
    pub fn destroy(self) {}
}
