use crate::{
    index_out_of_range, queue_creation_failed, wait_failed, Context, Hardware, Result, Status,
};
use log::{debug, warn};
use std::slice::Iter;

/// 绑定到上下文的一个有序任务队列。
pub struct Queue<'ctx, H: Hardware> {
    raw: H::Queue,
    index: usize,
    ctx: &'ctx Context<H>,
}

impl<'ctx, H: Hardware> Queue<'ctx, H> {
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn raw(&self) -> &H::Queue {
        &self.raw
    }

    #[inline]
    pub fn ctx(&self) -> &'ctx Context<H> {
        self.ctx
    }

    /// 阻塞直到队列中的所有操作完成。
    pub fn finish(&self) -> Result<()> {
        self.ctx
            .hw()
            .finish(&self.raw)
            .map_err(|status| wait_failed(status, format!("finish queue {}", self.index)))
    }
}

/// 一起创建、一起释放的一组对等任务队列。
pub struct QueueSet<'ctx, H: Hardware> {
    ctx: &'ctx Context<H>,
    queues: Vec<Queue<'ctx, H>>,
}

impl<'ctx, H: Hardware> QueueSet<'ctx, H> {
    /// 创建 `count` 个队列。任何一个失败时，已创建的队列都在返回前释放。
    pub fn new(ctx: &'ctx Context<H>, count: usize) -> Result<Self> {
        if count == 0 {
            return Err(queue_creation_failed(
                Status::INVALID_VALUE,
                "at least one queue is required",
            ));
        }

        let hw = ctx.hw();
        let device = ctx.device().raw();
        let mut queues = Vec::with_capacity(count);
        for index in 0..count {
            match hw.create_queue(ctx.raw(), device) {
                Ok(raw) => queues.push(Queue { raw, index, ctx }),
                Err(status) => {
                    debug!("roll back {} queues", queues.len());
                    drop(queues);
                    return Err(queue_creation_failed(
                        status,
                        format!("queue {index} of {count}"),
                    ));
                }
            }
        }
        debug!("{count} queues created");
        Ok(Self { ctx, queues })
    }

    #[inline]
    pub fn ctx(&self) -> &'ctx Context<H> {
        self.ctx
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queues.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&Queue<'ctx, H>> {
        self.queues.get(index).ok_or_else(|| {
            index_out_of_range(format!(
                "Command queue with index ({index}) does not exist, {} queues",
                self.queues.len()
            ))
        })
    }

    #[inline]
    pub fn iter(&self) -> Iter<Queue<'ctx, H>> {
        self.queues.iter()
    }

    /// 等待所有队列排空，返回遇到的第一个错误。
    pub fn finish_all(&self) -> Result<()> {
        let mut ans = Ok(());
        for queue in &self.queues {
            let result = queue.finish();
            if ans.is_ok() {
                ans = result
            }
        }
        ans
    }

    /// 排空并释放所有队列。再次调用什么也不做。
    pub fn release_all(&mut self) {
        if let Err(e) = self.finish_all() {
            warn!("{e}")
        }
        self.queues.clear()
    }
}

impl<'a, 'ctx, H: Hardware> IntoIterator for &'a QueueSet<'ctx, H> {
    type Item = &'a Queue<'ctx, H>;
    type IntoIter = Iter<'a, Queue<'ctx, H>>;
    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.queues.iter()
    }
}

impl<H: Hardware> Drop for QueueSet<'_, H> {
    #[inline]
    fn drop(&mut self) {
        self.release_all()
    }
}
