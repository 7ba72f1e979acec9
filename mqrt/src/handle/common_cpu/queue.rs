use super::{lock, Token};
use crate::{EventStatus, Status};
use log::trace;
use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    slice::{from_raw_parts, from_raw_parts_mut},
    sync::{
        mpsc::{channel, Sender},
        Arc, Condvar, Mutex, PoisonError,
    },
    thread::{Builder, JoinHandle},
};

pub(super) type Job = Box<dyn FnOnce() -> Result<(), Status> + Send>;

/// 按提交顺序执行任务的工作线程。
pub struct Worker {
    sender: Option<Sender<(Job, Event)>>,
    thread: Option<JoinHandle<()>>,
    _token: Token,
}

impl Worker {
    pub(super) fn spawn(token: Token) -> Result<Self, Status> {
        let (sender, receiver) = channel::<(Job, Event)>();
        let thread = Builder::new()
            .name("mqrt-queue".into())
            .spawn(move || {
                for (job, event) in receiver {
                    // 内核 panic 当作设备故障
                    let result = catch_unwind(AssertUnwindSafe(job))
                        .unwrap_or(Err(Status::OUT_OF_RESOURCES));
                    event.complete(result)
                }
                trace!("queue worker exits")
            })
            .map_err(|_| Status::OUT_OF_HOST_MEMORY)?;
        Ok(Self {
            sender: Some(sender),
            thread: Some(thread),
            _token: token,
        })
    }

    pub(super) fn submit(&self, job: Job) -> Result<Event, Status> {
        let event = Event::new();
        self.sender
            .as_ref()
            .ok_or(Status::INVALID_COMMAND_QUEUE)?
            .send((job, event.clone()))
            .map_err(|_| Status::INVALID_COMMAND_QUEUE)?;
        Ok(event)
    }

    pub(super) fn finish(&self) -> Result<(), Status> {
        self.submit(Box::new(|| Ok(())))?.wait()
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // 关闭通道，线程执行完剩余任务后退出
        drop(self.sender.take());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// 任务的完成事件。
#[derive(Clone)]
pub struct Event(Arc<(Mutex<EventStatus>, Condvar)>);

impl Event {
    fn new() -> Self {
        Self(Arc::new((Mutex::new(EventStatus::Enqueued), Condvar::new())))
    }

    fn complete(&self, result: Result<(), Status>) {
        let (state, cond) = &*self.0;
        *lock(state) = match result {
            Ok(()) => EventStatus::Completed,
            Err(status) => EventStatus::Failed(status),
        };
        cond.notify_all()
    }

    pub(super) fn status(&self) -> EventStatus {
        *lock(&self.0 .0)
    }

    pub(super) fn wait(&self) -> Result<(), Status> {
        let (state, cond) = &*self.0;
        let state = cond
            .wait_while(lock(state), |s| *s == EventStatus::Enqueued)
            .unwrap_or_else(PoisonError::into_inner);
        match *state {
            EventStatus::Failed(status) => Err(status),
            _ => Ok(()),
        }
    }
}

/// 交给工作线程的主机指针。
pub(super) struct HostPtr(*const u8, usize);
pub(super) struct HostPtrMut(*mut u8, usize);

unsafe impl Send for HostPtr {}
unsafe impl Send for HostPtrMut {}

impl HostPtr {
    #[inline]
    pub fn new(data: &[u8]) -> Self {
        Self(data.as_ptr(), data.len())
    }

    /// # Safety
    ///
    /// 原切片必须仍然有效。
    #[inline]
    pub unsafe fn get<'a>(self) -> &'a [u8] {
        from_raw_parts(self.0, self.1)
    }
}

impl HostPtrMut {
    #[inline]
    pub fn new(data: &mut [u8]) -> Self {
        Self(data.as_mut_ptr(), data.len())
    }

    /// # Safety
    ///
    /// 原切片必须仍然有效，且没有别的访问。
    #[inline]
    pub unsafe fn get<'a>(self) -> &'a mut [u8] {
        from_raw_parts_mut(self.0, self.1)
    }
}
