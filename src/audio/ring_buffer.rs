//! DMA 环形缓冲区
//!
//! 游戏混音循环（生产者）与音频输出回调（消费者）之间共享的线性 PCM 缓冲区。
//! 名字沿用老式声卡驱动的叫法，实际并没有 DMA 发生。
//!
//! 设计目标：
//! - 零锁：回调路径上没有任何锁
//! - 零分配：所有内存在会话创建时预分配
//! - 缓存友好：游标使用 #[repr(align(64))] 避免 false sharing
//! - 内存锁定：可选 mlock 防止 page fault
//!
//! 游标以帧为单位（1 帧 = 每声道一个样本），永远满足
//! `cursor * frame_size < capacity`。只有回调推进游标；生产者按约定
//! 保持领先，不回写未消费的数据。字节拷贝本身不与生产者同步，
//! 竞争的代价是可闻的撕裂，而不是未定义的控制流。

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Cache line 对齐包装器
///
/// 使用 #[repr(align(64))] 确保包装的值独占一个 cache line，
/// 避免 false sharing
#[repr(align(64))]
pub struct CacheLine<T>(pub T);

impl<T> CacheLine<T> {
    pub fn new(val: T) -> Self {
        Self(val)
    }
}

impl<T: Default> Default for CacheLine<T> {
    fn default() -> Self {
        Self(T::default())
    }
}

/// 共享 PCM 环形缓冲区
///
/// 内存布局保证：
/// - 读游标独占一个 64 字节 cache line
/// - 存储区创建时清零，可选 mlock 锁定
pub struct DmaBuffer {
    buffer: Box<[UnsafeCell<u8>]>,
    capacity: usize,
    frame_size: usize,

    /// 读游标（帧下标，不是字节偏移）
    cursor: CacheLine<AtomicUsize>,

    // 是否已锁定内存
    memory_locked: AtomicBool,
}

// 共享访问由上层协议保证：游标只有回调写，生产者只写数据区。
unsafe impl Send for DmaBuffer {}
unsafe impl Sync for DmaBuffer {}

impl DmaBuffer {
    /// 创建指定字节容量的缓冲区，内容清零
    ///
    /// capacity 必须是 frame_size 的正整数倍
    pub fn new(capacity: usize, frame_size: usize) -> Self {
        assert!(frame_size > 0, "frame_size must be non-zero");
        assert!(
            capacity > 0 && capacity % frame_size == 0,
            "capacity must be a positive multiple of frame_size"
        );

        let buffer: Vec<UnsafeCell<u8>> = (0..capacity).map(|_| UnsafeCell::new(0)).collect();

        Self {
            buffer: buffer.into_boxed_slice(),
            capacity,
            frame_size,
            cursor: CacheLine::new(AtomicUsize::new(0)),
            memory_locked: AtomicBool::new(false),
        }
    }

    /// 锁定缓冲区内存，防止被换页
    ///
    /// 实时音频场景下 page fault 会导致严重的时序抖动。
    /// 返回是否成功锁定
    pub fn lock_memory(&self) -> bool {
        if self.memory_locked.load(Ordering::Acquire) {
            return true; // 已经锁定
        }

        let ptr = self.buffer.as_ptr() as *const libc::c_void;
        let len = self.capacity;

        let result = unsafe { libc::mlock(ptr, len) };

        if result == 0 {
            self.memory_locked.store(true, Ordering::Release);
            log::debug!("DMA buffer memory locked: {} bytes", len);
            true
        } else {
            log::warn!(
                "Failed to lock DMA buffer memory: {}",
                std::io::Error::last_os_error()
            );
            false
        }
    }

    /// 解锁缓冲区内存
    pub fn unlock_memory(&self) {
        if !self.memory_locked.load(Ordering::Acquire) {
            return;
        }

        let ptr = self.buffer.as_ptr() as *const libc::c_void;
        unsafe {
            libc::munlock(ptr, self.capacity);
        }

        self.memory_locked.store(false, Ordering::Release);
        log::debug!("DMA buffer memory unlocked");
    }

    /// 检查内存是否已锁定
    pub fn is_memory_locked(&self) -> bool {
        self.memory_locked.load(Ordering::Acquire)
    }

    /// 容量（字节）
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 容量（帧）
    #[inline]
    pub fn frames(&self) -> usize {
        self.capacity / self.frame_size
    }

    /// 每帧字节数
    #[inline]
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// 当前读游标（帧）
    ///
    /// 无锁读取，不与回调同步
    #[inline]
    pub fn position(&self) -> usize {
        self.cursor.0.load(Ordering::Acquire)
    }

    /// 生产者写入（混音循环调用）
    ///
    /// 从 byte_offset 开始的环绕写，不触碰游标。
    /// 此函数是 wait-free 的，绝不阻塞
    #[inline]
    pub fn write_bytes(&self, byte_offset: usize, data: &[u8]) {
        let mut src = data;
        let mut off = byte_offset % self.capacity;

        while !src.is_empty() {
            let n = src.len().min(self.capacity - off);
            unsafe {
                self.copy_in(off, &src[..n]);
            }
            src = &src[n..];
            off = (off + n) % self.capacity;
        }
    }

    /// 消费者读取（回调调用）：从当前游标拷贝 `out.len()` 字节并推进游标
    ///
    /// - 字节游标达到容量时回绕到 0
    /// - 块跨越缓冲区末尾时拆成尾段 + 头段两次拷贝，按序拼接
    /// - 新游标达到帧容量时回绕到 0
    /// - 请求超过容量时只拷贝完整一圈，多余部分填零，游标回到原位
    ///
    /// 返回推进后的游标（帧）。此函数是 wait-free 的，绝不阻塞；
    /// 不为真实 underrun 合成静音，陈旧数据会被原样播出。
    #[inline]
    pub fn read_chunk(&self, out: &mut [u8]) -> usize {
        let cursor = self.cursor.0.load(Ordering::Relaxed);
        if out.is_empty() {
            return cursor;
        }

        // 单次读取最多一圈，超出的部分填零
        let len = out.len().min(self.capacity);
        for byte in out[len..].iter_mut() {
            *byte = 0;
        }
        let out = &mut out[..len];

        let mut pos = cursor * self.frame_size;
        if pos >= self.capacity {
            pos = 0;
        }

        let to_end = self.capacity - pos;

        let mut new_cursor = if len <= to_end {
            unsafe {
                self.copy_out(pos, out);
            }
            pos / self.frame_size + len / self.frame_size
        } else {
            // 环绕：尾段 + 头段
            let head = len - to_end;
            let (first, second) = out.split_at_mut(to_end);
            unsafe {
                self.copy_out(pos, first);
                self.copy_out(0, second);
            }
            head / self.frame_size
        };

        if new_cursor >= self.frames() {
            new_cursor = 0;
        }

        self.cursor.0.store(new_cursor, Ordering::Release);
        new_cursor
    }

    #[inline]
    unsafe fn copy_out(&self, byte_offset: usize, out: &mut [u8]) {
        debug_assert!(byte_offset + out.len() <= self.capacity);
        let src = self.buffer[byte_offset].get() as *const u8;
        unsafe {
            std::ptr::copy_nonoverlapping(src, out.as_mut_ptr(), out.len());
        }
    }

    #[inline]
    unsafe fn copy_in(&self, byte_offset: usize, data: &[u8]) {
        debug_assert!(byte_offset + data.len() <= self.capacity);
        let dst = self.buffer[byte_offset].get();
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }
    }
}

impl Drop for DmaBuffer {
    fn drop(&mut self) {
        self.unlock_memory();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_read_chunk_no_wrap() {
        let dma = DmaBuffer::new(4096, 4);
        let data = pattern(4096);
        dma.write_bytes(0, &data);

        let mut out = vec![0u8; 1024];
        let cursor = dma.read_chunk(&mut out);

        assert_eq!(out, &data[..1024]);
        assert_eq!(cursor, 256);
        assert_eq!(dma.position(), 256);
    }

    #[test]
    fn test_read_chunk_wrap_concatenation() {
        let dma = DmaBuffer::new(4096, 4);
        let data = pattern(4096);
        dma.write_bytes(0, &data);

        // 先把游标推到 960 帧（字节 3840）
        let mut skip = vec![0u8; 3840];
        assert_eq!(dma.read_chunk(&mut skip), 960);

        let mut out = vec![0u8; 1024];
        let cursor = dma.read_chunk(&mut out);

        // 尾段 256 字节 + 头段 768 字节
        assert_eq!(&out[..256], &data[3840..4096]);
        assert_eq!(&out[256..], &data[..768]);
        assert_eq!(cursor, 192);
    }

    #[test]
    fn test_cursor_wraps_at_frame_capacity() {
        let dma = DmaBuffer::new(4096, 4);

        // 1024 帧 = 整个缓冲区，游标正好到达帧容量，回绕到 0
        let mut out = vec![0u8; 4096];
        assert_eq!(dma.read_chunk(&mut out), 0);

        let mut out = vec![0u8; 1024];
        assert_eq!(dma.read_chunk(&mut out), 256);
    }

    #[test]
    fn test_read_larger_than_capacity_is_truncated() {
        let dma = DmaBuffer::new(64, 4);
        let data = pattern(64);
        dma.write_bytes(0, &data);

        let mut out = vec![0xFFu8; 1024];
        let cursor = dma.read_chunk(&mut out);

        // 只拷贝一圈，剩余填零，游标回到原位
        assert_eq!(&out[..64], &data[..]);
        assert_eq!(&out[64..], &vec![0u8; 960][..]);
        assert_eq!(cursor, 0);
        assert_eq!(dma.position(), 0);
    }

    #[test]
    fn test_read_larger_than_capacity_mid_cursor() {
        let dma = DmaBuffer::new(64, 4);
        let data = pattern(64);
        dma.write_bytes(0, &data);

        // 游标先推进到 2 帧（字节 8）
        let mut skip = vec![0u8; 8];
        assert_eq!(dma.read_chunk(&mut skip), 2);

        let mut out = vec![0xFFu8; 100];
        let cursor = dma.read_chunk(&mut out);

        // 尾段 56 字节 + 头段 8 字节，整圈之后游标不动
        assert_eq!(&out[..56], &data[8..]);
        assert_eq!(&out[56..64], &data[..8]);
        assert_eq!(&out[64..], &vec![0u8; 36][..]);
        assert_eq!(cursor, 2);
    }

    #[test]
    fn test_sequential_reads_advance() {
        let dma = DmaBuffer::new(4096, 4);
        let mut out = vec![0u8; 1024];

        assert_eq!(dma.read_chunk(&mut out), 256);
        assert_eq!(dma.read_chunk(&mut out), 512);
        assert_eq!(dma.read_chunk(&mut out), 768);
        // 第四次读到缓冲区末尾，游标回绕
        assert_eq!(dma.read_chunk(&mut out), 0);
    }

    #[test]
    fn test_write_bytes_wraps() {
        let dma = DmaBuffer::new(64, 4);
        let data: Vec<u8> = (1..=12).collect();
        dma.write_bytes(58, &data);

        let mut all = vec![0u8; 64];
        dma.read_chunk(&mut all);

        assert_eq!(&all[58..64], &data[..6]);
        assert_eq!(&all[..6], &data[6..]);
        // 没写过的区域保持清零
        assert_eq!(&all[6..58], &vec![0u8; 52][..]);
    }

    #[test]
    fn test_cursor_invariant_holds() {
        let dma = DmaBuffer::new(4096, 4);
        let mut out = vec![0u8; 1000];

        for _ in 0..64 {
            let cursor = dma.read_chunk(&mut out);
            assert!(cursor * dma.frame_size() < dma.capacity());
        }
    }

    #[test]
    fn test_empty_read_keeps_cursor() {
        let dma = DmaBuffer::new(4096, 4);
        let mut out = vec![0u8; 1024];
        dma.read_chunk(&mut out);

        let mut empty: [u8; 0] = [];
        assert_eq!(dma.read_chunk(&mut empty), 256);
        assert_eq!(dma.position(), 256);
    }

    #[test]
    fn test_zero_filled_at_creation() {
        let dma = DmaBuffer::new(256, 4);
        let mut out = vec![0xFFu8; 256];
        dma.read_chunk(&mut out);
        assert_eq!(out, vec![0u8; 256]);
    }

    #[test]
    fn test_cache_line_alignment() {
        // 验证 CacheLine 确实是 64 字节对齐
        assert_eq!(std::mem::align_of::<CacheLine<AtomicUsize>>(), 64);
    }
}
