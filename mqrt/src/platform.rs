use crate::{device_query_failed, no_device_found, DeviceInfo, Hardware, Result};
use log::{info, warn};

/// 设备序号越界时的处理方式。
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum HintPolicy {
    /// 退回到第一个设备。
    #[default]
    Fallback,
    /// 报告 [NoDeviceFound](crate::ErrorKind::NoDeviceFound)。
    Strict,
}

/// 选定的设备，进程内不再改变。
pub struct DeviceHandle<H: Hardware> {
    raw: H::Device,
    index: usize,
    info: DeviceInfo,
}

impl<H: Hardware> Clone for DeviceHandle<H> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            index: self.index,
            info: self.info.clone(),
        }
    }
}

impl<H: Hardware> DeviceHandle<H> {
    #[inline]
    pub fn raw(&self) -> &H::Device {
        &self.raw
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }
}

/// 枚举设备并选择 `hint` 指定的一个，没有指定时选择第一个。
pub fn select_device<H: Hardware>(
    hw: &H,
    hint: Option<usize>,
    policy: HintPolicy,
) -> Result<DeviceHandle<H>> {
    let mut devices = hw
        .devices()
        .map_err(|status| device_query_failed(status, "Get device ID"))?;
    if devices.is_empty() {
        return Err(no_device_found("Sorry, no device could be found"));
    }

    let index = match hint {
        None => 0,
        Some(i) if i < devices.len() => i,
        Some(i) => match policy {
            HintPolicy::Fallback => {
                warn!("device {i} not found among {} devices, select device 0", devices.len());
                0
            }
            HintPolicy::Strict => {
                return Err(no_device_found(format!(
                    "device {i} requested, {} available",
                    devices.len()
                )))
            }
        },
    };

    let raw = devices.swap_remove(index);
    let info = hw.device_info(&raw);
    info!("{info}");
    Ok(DeviceHandle { raw, index, info })
}
