use crate::HintPolicy;
use log::warn;
use std::{env::var, str::FromStr};

#[derive(Clone, Debug)]
pub struct Config {
    /// 创建的任务队列数量。
    pub queues: usize,
    /// 优先选择的设备序号。
    pub device_hint: Option<usize>,
    pub hint_policy: HintPolicy,
    /// 传给设备编译器的选项。
    pub build_options: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queues: 4,
            device_hint: None,
            hint_policy: HintPolicy::Fallback,
            build_options: String::new(),
        }
    }
}

impl Config {
    /// 以默认值为基础，读取 `MQRT_QUEUES`、`MQRT_DEVICE`、`MQRT_STRICT_DEVICE` 和 `MQRT_BUILD_OPTIONS`。
    pub fn from_env() -> Self {
        Self::from_lookup(|key| var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(n) = parse(&lookup, "MQRT_QUEUES") {
            config.queues = n
        }
        if let Some(i) = parse(&lookup, "MQRT_DEVICE") {
            config.device_hint = Some(i)
        }
        if let Some(strict) = parse::<bool>(&lookup, "MQRT_STRICT_DEVICE") {
            config.hint_policy = if strict {
                HintPolicy::Strict
            } else {
                HintPolicy::Fallback
            }
        }
        if let Some(options) = lookup("MQRT_BUILD_OPTIONS") {
            config.build_options = options
        }
        config
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let val = lookup(key)?;
    match val.trim().parse() {
        Ok(val) => Some(val),
        Err(_) => {
            warn!("ignored {key}={val:?}");
            None
        }
    }
}
