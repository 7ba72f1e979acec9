use crate::{common::Blob, index_out_of_range, wait_failed, Hardware, Result, Status};
use log::warn;
use std::mem::replace;

/// 完成事件的状态。`Completed` 和 `Failed` 是终态。
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EventStatus {
    Enqueued,
    Completed,
    Failed(Status),
}

/// 传输使用的主机暂存区。设备只访问暂存区，不访问调用者的切片。
pub(crate) enum Staging<'a> {
    None,
    /// 写入的数据副本。
    Write(Blob),
    /// 读出的数据，完成后复制到调用者的切片。
    Read(Blob, &'a mut [u8]),
}

/// 一个已入队操作的完成句柄。
///
/// 句柄借用操作涉及的所有存储，等待会消耗句柄，所以终态的句柄不可能被再次等待。
/// 未等待就丢弃的句柄会在丢弃时阻塞到操作结束。
/// 被遗忘的句柄泄漏它的暂存区，读操作的结果不会到达调用者的切片。
#[must_use = "dropping a completion handle blocks until the operation ends"]
pub struct CompletionHandle<'a, H: Hardware> {
    hw: &'a H,
    raw: Option<H::Event>,
    what: &'static str,
    staging: Staging<'a>,
}

impl<'a, H: Hardware> CompletionHandle<'a, H> {
    #[inline]
    pub(crate) fn new(hw: &'a H, raw: H::Event, what: &'static str) -> Self {
        Self::staged(hw, raw, what, Staging::None)
    }

    #[inline]
    pub(crate) fn staged(
        hw: &'a H,
        raw: H::Event,
        what: &'static str,
        staging: Staging<'a>,
    ) -> Self {
        Self {
            hw,
            raw: Some(raw),
            what,
            staging,
        }
    }

    /// 阻塞直到操作完成。
    pub fn wait(self) -> Result<()> {
        let what = self.what;
        self.wait_raw().map_err(|status| wait_failed(status, what))
    }

    pub(crate) fn wait_raw(mut self) -> Result<(), Status> {
        if let Some(raw) = self.raw.take() {
            self.hw.wait(&raw)?
        }
        self.deliver();
        Ok(())
    }

    /// 操作成功完成后把暂存区交给调用者。
    fn deliver(&mut self) {
        if let Staging::Read(data, dst) = replace(&mut self.staging, Staging::None) {
            dst.copy_from_slice(&data[..dst.len()])
        }
    }

    /// 不阻塞地查询操作状态。
    pub fn status(&self) -> Result<EventStatus> {
        match &self.raw {
            Some(raw) => self
                .hw
                .event_status(raw)
                .map_err(|status| wait_failed(status, self.what)),
            None => Ok(EventStatus::Completed),
        }
    }

    #[inline]
    pub fn raw(&self) -> Option<&H::Event> {
        self.raw.as_ref()
    }
}

impl<H: Hardware> Drop for CompletionHandle<'_, H> {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            match self.hw.wait(&raw) {
                Ok(()) => self.deliver(),
                Err(status) => warn!("{} failed without being waited on: {status}", self.what),
            }
        }
    }
}

/// 按给定顺序等待所有句柄。某个失败后继续等待其余的，返回第一个错误。
pub fn wait_all<'a, H: Hardware + 'a>(
    handles: impl IntoIterator<Item = CompletionHandle<'a, H>>,
) -> Result<()> {
    let mut ans = Ok(());
    for handle in handles {
        let result = handle.wait();
        if ans.is_ok() {
            ans = result
        }
    }
    ans
}

/// 每个队列最近一个操作的完成句柄表。
pub struct EventTable<'a, H: Hardware> {
    slots: Vec<Option<CompletionHandle<'a, H>>>,
}

impl<'a, H: Hardware> EventTable<'a, H> {
    pub fn new(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| None).collect(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(&mut self, index: usize) -> Result<&mut Option<CompletionHandle<'a, H>>> {
        let len = self.slots.len();
        self.slots
            .get_mut(index)
            .ok_or_else(|| index_out_of_range(format!("event slot {index} of {len}")))
    }

    /// 记录队列 `index` 的最新句柄，并等待被替换的句柄。
    pub fn record(&mut self, index: usize, handle: CompletionHandle<'a, H>) -> Result<()> {
        match self.slot(index)?.replace(handle) {
            Some(previous) => previous.wait(),
            None => Ok(()),
        }
    }

    /// 等待并清空队列 `index` 的句柄，空槽直接返回。
    pub fn wait(&mut self, index: usize) -> Result<()> {
        match self.slot(index)?.take() {
            Some(handle) => handle.wait(),
            None => Ok(()),
        }
    }

    #[inline]
    pub fn is_pending(&self, index: usize) -> bool {
        matches!(self.slots.get(index), Some(Some(_)))
    }

    /// 按队列序号等待所有句柄。
    pub fn wait_all(&mut self) -> Result<()> {
        wait_all(self.slots.iter_mut().filter_map(Option::take))
    }
}
