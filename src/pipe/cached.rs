use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::buf::{self, Buffer, MultiBuffer};
use crate::common::Result;

use super::{PipeReader, StreamReader};

/// 嗅探包装读端：窥视流前缀而不消费。
///
/// cache 只做快照拷贝，窥视过的数据仍按原顺序从 read 返回。
/// cache、read、interrupt 可来自不同任务；peek 队列由互斥锁保护，
/// 对底层读端的阻塞读取在锁外进行。
pub struct CachedReader {
    reader: PipeReader,
    cache: Mutex<MultiBuffer>,
}

impl CachedReader {
    pub fn new(reader: PipeReader) -> Self {
        Self {
            reader,
            cache: Mutex::new(MultiBuffer::new()),
        }
    }

    fn lock_cache(&self) -> MutexGuard<'_, MultiBuffer> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 从底层读端限时取一段数据并入 peek 队列，再把队列头部快照
    /// 写入 out（不从队列移除）。读取错误忽略，嗅探尽力而为。
    pub async fn cache(&self, out: &mut Buffer) {
        let fetched = self
            .reader
            .read_timeout(Duration::from_millis(100))
            .await
            .ok();

        let mut cache = self.lock_cache();
        if let Some(mb) = fetched {
            if !mb.is_empty() {
                cache.merge(mb);
            }
        }
        out.clear();
        let dst = out.extend(buf::SIZE);
        let n = cache.copy(dst);
        out.resize(0, n);
    }

    fn take_cached(&self) -> Option<MultiBuffer> {
        let mut cache = self.lock_cache();
        if cache.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut *cache))
        }
    }
}

#[async_trait]
impl StreamReader for CachedReader {
    async fn read(&self) -> Result<MultiBuffer> {
        if let Some(mb) = self.take_cached() {
            return Ok(mb);
        }
        self.reader.read().await
    }

    async fn read_timeout(&self, timeout: Duration) -> Result<MultiBuffer> {
        if let Some(mb) = self.take_cached() {
            return Ok(mb);
        }
        self.reader.read_timeout(timeout).await
    }

    fn interrupt(&self) {
        self.lock_cache().release();
        self.reader.interrupt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Error;
    use crate::pipe::{new, PipeOptions};

    #[tokio::test]
    async fn peek_is_non_destructive() {
        let (reader, writer) = new(PipeOptions::default());
        writer.write(MultiBuffer::from_bytes(b"hello world")).await.unwrap();
        writer.close();

        let cached = CachedReader::new(reader);
        let mut scratch = Buffer::new();
        cached.cache(&mut scratch).await;
        assert_eq!(scratch.bytes(), b"hello world");

        // 窥视过的字节仍然完整地从流中读出
        assert_eq!(cached.read().await.unwrap().flatten(), b"hello world");
        assert!(matches!(cached.read().await, Err(Error::PipeClosed)));
    }

    #[tokio::test]
    async fn successive_cache_calls_accumulate_prefix() {
        let (reader, writer) = new(PipeOptions::default());
        let cached = CachedReader::new(reader);
        let mut scratch = Buffer::new();

        writer.write(MultiBuffer::from_bytes(b"GET / ")).await.unwrap();
        cached.cache(&mut scratch).await;
        assert_eq!(scratch.bytes(), b"GET / ");

        writer.write(MultiBuffer::from_bytes(b"HTTP/1.1")).await.unwrap();
        cached.cache(&mut scratch).await;
        assert_eq!(scratch.bytes(), b"GET / HTTP/1.1");

        // 完整流 = 全部窥视数据 + 后续数据
        writer.write(MultiBuffer::from_bytes(b"\r\n")).await.unwrap();
        writer.close();
        let mut all = Vec::new();
        loop {
            match cached.read().await {
                Ok(mb) => all.extend_from_slice(&mb.flatten()),
                Err(Error::PipeClosed) => break,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(all, b"GET / HTTP/1.1\r\n");
    }

    #[tokio::test]
    async fn cache_on_empty_pipe_times_out_quietly() {
        let (reader, _writer) = new(PipeOptions::default());
        let cached = CachedReader::new(reader);
        let mut scratch = Buffer::new();
        let start = std::time::Instant::now();
        cached.cache(&mut scratch).await;
        assert!(scratch.is_empty());
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn cache_drains_underlying_reader() {
        let (reader, writer) = new(PipeOptions::default());
        writer.write(MultiBuffer::from_bytes(b"drained")).await.unwrap();

        let cached = CachedReader::new(reader);
        let mut scratch = Buffer::new();
        cached.cache(&mut scratch).await;
        assert_eq!(scratch.bytes(), b"drained");

        // 底层管道已被取空：关闭后直接 EOF，数据只存在于 peek 队列
        writer.close();
        assert_eq!(cached.read().await.unwrap().flatten(), b"drained");
        assert!(matches!(cached.read().await, Err(Error::PipeClosed)));
    }

    #[tokio::test]
    async fn read_timeout_drains_cache_first() {
        let (reader, writer) = new(PipeOptions::default());
        writer.write(MultiBuffer::from_bytes(b"cached")).await.unwrap();

        let cached = CachedReader::new(reader);
        let mut scratch = Buffer::new();
        cached.cache(&mut scratch).await;

        let mb = cached
            .read_timeout(Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(mb.flatten(), b"cached");
    }

    #[tokio::test]
    async fn interrupt_releases_peek_queue() {
        let (reader, writer) = new(PipeOptions::default());
        writer.write(MultiBuffer::from_bytes(b"data")).await.unwrap();

        let cached = CachedReader::new(reader);
        let mut scratch = Buffer::new();
        cached.cache(&mut scratch).await;
        assert_eq!(scratch.bytes(), b"data");

        cached.interrupt();
        // peek 队列被释放：读取不再返回窥视过的数据，而是直接失败
        assert!(matches!(cached.read().await, Err(Error::PipeInterrupted)));
        assert!(matches!(
            writer.write(MultiBuffer::from_bytes(b"x")).await,
            Err(Error::PipeInterrupted)
        ));
    }
}
