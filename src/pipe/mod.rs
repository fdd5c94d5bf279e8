pub mod cached;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::buf::{self, MultiBuffer};
use crate::common::{Error, Result};

pub use cached::CachedReader;

/// 管道选项
#[derive(Debug, Clone)]
pub struct PipeOptions {
    /// 队列字节数上限（高水位）
    pub limit: usize,
    /// 未显式限时的读取使用的默认超时
    pub read_timeout: Option<Duration>,
    /// 超过高水位时丢弃最旧数据而非阻塞写端
    pub discard_on_full: bool,
}

impl Default for PipeOptions {
    fn default() -> Self {
        Self {
            limit: 20 * buf::SIZE,
            read_timeout: None,
            discard_on_full: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Open,
    WriterClosed,
    Interrupted,
}

struct State {
    queue: VecDeque<MultiBuffer>,
    queued_bytes: usize,
    status: Status,
}

struct Inner {
    state: Mutex<State>,
    options: PipeOptions,
    /// 读端等待数据
    readable: Notify,
    /// 写端等待水位回落
    writable: Notify,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn interrupt(&self) {
        let released = {
            let mut st = self.lock();
            st.status = Status::Interrupted;
            st.queued_bytes = 0;
            std::mem::take(&mut st.queue)
        };
        // 锁外归还缓冲区
        drop(released);
        self.readable.notify_one();
        self.writable.notify_one();
    }
}

/// 内存双向字节流的单向管道。写端与读端各持有同一共享状态的句柄。
pub fn new(options: PipeOptions) -> (PipeReader, PipeWriter) {
    let inner = Arc::new(Inner {
        state: Mutex::new(State {
            queue: VecDeque::new(),
            queued_bytes: 0,
            status: Status::Open,
        }),
        options,
        readable: Notify::new(),
        writable: Notify::new(),
    });
    (
        PipeReader {
            inner: inner.clone(),
        },
        PipeWriter { inner },
    )
}

/// 按 MultiBuffer 粒度读取的流读端
#[async_trait]
pub trait StreamReader: Send + Sync {
    /// 读取下一段数据；写端关闭且队列读尽返回 PipeClosed
    async fn read(&self) -> Result<MultiBuffer>;
    /// 限时读取；超时返回 Timeout 且不改变管道状态
    async fn read_timeout(&self, timeout: Duration) -> Result<MultiBuffer>;
    /// 中断管道，释放全部排队数据并唤醒两端
    fn interrupt(&self);
}

pub struct PipeReader {
    inner: Arc<Inner>,
}

impl PipeReader {
    #[cfg(test)]
    fn queued_bytes(&self) -> usize {
        self.inner.lock().queued_bytes
    }

    async fn read_internal(&self) -> Result<MultiBuffer> {
        loop {
            let notified;
            {
                let mut st = self.inner.lock();
                if let Some(mb) = st.queue.pop_front() {
                    st.queued_bytes -= mb.total_len();
                    drop(st);
                    self.inner.writable.notify_one();
                    return Ok(mb);
                }
                match st.status {
                    Status::Interrupted => return Err(Error::PipeInterrupted),
                    Status::WriterClosed => return Err(Error::PipeClosed),
                    Status::Open => {}
                }
                notified = self.inner.readable.notified();
            }
            notified.await;
        }
    }
}

#[async_trait]
impl StreamReader for PipeReader {
    async fn read(&self) -> Result<MultiBuffer> {
        match self.inner.options.read_timeout {
            Some(d) => self.read_timeout(d).await,
            None => self.read_internal().await,
        }
    }

    async fn read_timeout(&self, timeout: Duration) -> Result<MultiBuffer> {
        match tokio::time::timeout(timeout, self.read_internal()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout),
        }
    }

    fn interrupt(&self) {
        self.inner.interrupt();
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        // 读端消失后写端不应再无限阻塞
        self.inner.interrupt();
    }
}

pub struct PipeWriter {
    inner: Arc<Inner>,
}

impl PipeWriter {
    /// 追加一段数据。队列超过高水位后挂起，直到读端排空到水位之下或状态变化。
    pub async fn write(&self, mb: MultiBuffer) -> Result<()> {
        let len = mb.total_len();
        if len == 0 {
            return Ok(());
        }
        {
            let mut st = self.inner.lock();
            match st.status {
                // mb 在此被丢弃，缓冲区归还池
                Status::Interrupted => return Err(Error::PipeInterrupted),
                Status::WriterClosed => return Err(Error::PipeClosed),
                Status::Open => {}
            }
            st.queue.push_back(mb);
            st.queued_bytes += len;

            if self.inner.options.discard_on_full {
                while st.queued_bytes > self.inner.options.limit && st.queue.len() > 1 {
                    if let Some(dropped) = st.queue.pop_front() {
                        st.queued_bytes -= dropped.total_len();
                    }
                }
                drop(st);
                self.inner.readable.notify_one();
                return Ok(());
            }
        }
        self.inner.readable.notify_one();

        loop {
            let notified;
            {
                let st = self.inner.lock();
                match st.status {
                    Status::Interrupted => return Err(Error::PipeInterrupted),
                    // 数据已入队，关闭不追溯
                    Status::WriterClosed => return Ok(()),
                    Status::Open => {}
                }
                if st.queued_bytes <= self.inner.options.limit {
                    return Ok(());
                }
                notified = self.inner.writable.notified();
            }
            notified.await;
        }
    }

    /// Open → WriterClosed，只生效一次；唤醒等待中的读端
    pub fn close(&self) {
        {
            let mut st = self.inner.lock();
            if st.status != Status::Open {
                return;
            }
            st.status = Status::WriterClosed;
        }
        self.inner.readable.notify_one();
    }

    pub fn interrupt(&self) {
        self.inner.interrupt();
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.close();
    }
}
