use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// 单个缓冲区容量
pub const SIZE: usize = 2048;

/// 池中最多保留的空闲缓冲区数量，超出的直接释放
const POOL_MAX: usize = 1024;

struct Pool {
    free: Mutex<Vec<Box<[u8]>>>,
    in_flight: AtomicUsize,
}

impl Pool {
    fn get(&self) -> Box<[u8]> {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut free) = self.free.lock() {
            if let Some(data) = free.pop() {
                return data;
            }
        }
        vec![0u8; SIZE].into_boxed_slice()
    }

    fn put(&self, data: Box<[u8]>) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        if data.len() != SIZE {
            return;
        }
        if let Ok(mut free) = self.free.lock() {
            if free.len() < POOL_MAX {
                free.push(data);
            }
        }
    }
}

fn pool() -> &'static Pool {
    static POOL: std::sync::OnceLock<Pool> = std::sync::OnceLock::new();
    POOL.get_or_init(|| Pool {
        free: Mutex::new(Vec::new()),
        in_flight: AtomicUsize::new(0),
    })
}

/// 固定容量缓冲区，[start, end) 为有效数据窗口。
/// Drop 时自动归还底层存储到全局池。
pub struct Buffer {
    data: Option<Box<[u8]>>,
    start: usize,
    end: usize,
}

impl Buffer {
    pub fn new() -> Self {
        Self {
            data: Some(pool().get()),
            start: 0,
            end: 0,
        }
    }

    /// 复制 slice 内容构造缓冲区；超出容量的部分截断
    pub fn from_slice(data: &[u8]) -> Self {
        let mut b = Self::new();
        b.write_slice(data);
        b
    }

    fn storage(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn capacity_left(&self) -> usize {
        SIZE - self.end
    }

    pub fn bytes(&self) -> &[u8] {
        &self.storage()[self.start..self.end]
    }

    /// 在窗口末尾预留 n 字节供写入，返回该区域的可变视图
    pub fn extend(&mut self, n: usize) -> &mut [u8] {
        let new_end = self.end + n;
        assert!(new_end <= SIZE, "buffer extend past capacity");
        let start = self.end;
        self.end = new_end;
        &mut self.data.as_deref_mut().unwrap()[start..new_end]
    }

    /// 收窄有效窗口到 [start, end)，以当前窗口起点为原点
    pub fn resize(&mut self, start: usize, end: usize) {
        assert!(start <= end, "buffer resize with inverted window");
        let base = self.start;
        assert!(base + end <= SIZE, "buffer resize past capacity");
        self.end = base + end;
        self.start = base + start;
    }

    pub fn clear(&mut self) {
        self.start = 0;
        self.end = 0;
    }

    /// 追加写入，返回实际写入的字节数
    pub fn write_slice(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.capacity_left());
        self.extend(n).copy_from_slice(&data[..n]);
        n
    }

    /// 从窗口头部消费 n 字节
    pub fn advance(&mut self, n: usize) {
        let n = n.min(self.len());
        self.start += n;
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            pool().put(data);
        }
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("start", &self.start)
            .field("end", &self.end)
            .finish()
    }
}

/// 有序缓冲区序列
#[derive(Debug, Default)]
pub struct MultiBuffer {
    buffers: VecDeque<Buffer>,
}

impl MultiBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 把任意长度数据切成缓冲区链
    pub fn from_bytes(mut data: &[u8]) -> Self {
        let mut mb = Self::new();
        while !data.is_empty() {
            let n = data.len().min(SIZE);
            mb.push(Buffer::from_slice(&data[..n]));
            data = &data[n..];
        }
        mb
    }

    pub fn push(&mut self, buffer: Buffer) {
        if !buffer.is_empty() {
            self.buffers.push_back(buffer);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn total_len(&self) -> usize {
        self.buffers.iter().map(|b| b.len()).sum()
    }

    /// 非破坏性拷贝：序列保持不变，返回拷入 dst 的字节数
    pub fn copy(&self, dst: &mut [u8]) -> usize {
        let mut copied = 0;
        for buffer in &self.buffers {
            if copied == dst.len() {
                break;
            }
            let bytes = buffer.bytes();
            let n = bytes.len().min(dst.len() - copied);
            dst[copied..copied + n].copy_from_slice(&bytes[..n]);
            copied += n;
        }
        copied
    }

    /// 弹出头部缓冲区，所有权转移给调用方
    pub fn split_first(&mut self) -> Option<Buffer> {
        self.buffers.pop_front()
    }

    /// 把另一条链整体接到尾部
    pub fn merge(&mut self, mut other: MultiBuffer) {
        self.buffers.append(&mut other.buffers);
    }

    /// 丢弃全部缓冲区（归还池），序列变空
    pub fn release(&mut self) {
        self.buffers.clear();
    }

    /// 展平成连续字节，测试和嗅探前缀使用
    pub fn flatten(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_len());
        for buffer in &self.buffers {
            out.extend_from_slice(buffer.bytes());
        }
        out
    }
}

impl Extend<Buffer> for MultiBuffer {
    fn extend<T: IntoIterator<Item = Buffer>>(&mut self, iter: T) {
        for buffer in iter {
            self.push(buffer);
        }
    }
}

impl From<Buffer> for MultiBuffer {
    fn from(buffer: Buffer) -> Self {
        let mut mb = MultiBuffer::new();
        mb.push(buffer);
        mb
    }
}
