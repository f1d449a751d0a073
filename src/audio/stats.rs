//! 传输统计模块
//!
//! 在拉取回调中收集计数。回调里禁止日志和锁，
//! 所以全部走原子计数，事后由控制线程读取汇报。

use std::sync::atomic::{AtomicU64, Ordering};

/// 传输统计收集器
///
/// 所有操作都是 lock-free 的，适合在音频回调中使用
pub struct TransferStats {
    callback_count: AtomicU64,
    bytes_copied: AtomicU64,
    wrap_count: AtomicU64,
    silence_fills: AtomicU64,
    priming_count: AtomicU64,
    enqueue_failures: AtomicU64,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            callback_count: AtomicU64::new(0),
            bytes_copied: AtomicU64::new(0),
            wrap_count: AtomicU64::new(0),
            silence_fills: AtomicU64::new(0),
            priming_count: AtomicU64::new(0),
            enqueue_failures: AtomicU64::new(0),
        }
    }

    /// 每次回调进入时调用
    #[inline]
    pub fn record_callback(&self) {
        self.callback_count.fetch_add(1, Ordering::Relaxed);
    }

    /// 累计拷出的字节数
    #[inline]
    pub fn add_bytes_copied(&self, bytes: u64) {
        self.bytes_copied.fetch_add(bytes, Ordering::Relaxed);
    }

    /// 游标回绕一次
    #[inline]
    pub fn record_wrap(&self) {
        self.wrap_count.fetch_add(1, Ordering::Relaxed);
    }

    /// 会话未激活，本次回调输出了静音
    #[inline]
    pub fn record_silence_fill(&self) {
        self.silence_fills.fetch_add(1, Ordering::Relaxed);
    }

    /// 提交了一个引导缓冲
    #[inline]
    pub fn record_priming(&self) {
        self.priming_count.fetch_add(1, Ordering::Relaxed);
    }

    /// 回调内入队失败（只计数，不打日志）
    #[inline]
    pub fn record_enqueue_failure(&self) {
        self.enqueue_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn callback_count(&self) -> u64 {
        self.callback_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn bytes_copied(&self) -> u64 {
        self.bytes_copied.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn wrap_count(&self) -> u64 {
        self.wrap_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn silence_fills(&self) -> u64 {
        self.silence_fills.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn priming_count(&self) -> u64 {
        self.priming_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn enqueue_failures(&self) -> u64 {
        self.enqueue_failures.load(Ordering::Relaxed)
    }

    /// 生成报告快照
    pub fn report(&self) -> TransferReport {
        TransferReport {
            callback_count: self.callback_count(),
            bytes_copied: self.bytes_copied(),
            wrap_count: self.wrap_count(),
            silence_fills: self.silence_fills(),
            priming_count: self.priming_count(),
            enqueue_failures: self.enqueue_failures(),
        }
    }

    /// 重置统计
    pub fn reset(&self) {
        self.callback_count.store(0, Ordering::Relaxed);
        self.bytes_copied.store(0, Ordering::Relaxed);
        self.wrap_count.store(0, Ordering::Relaxed);
        self.silence_fills.store(0, Ordering::Relaxed);
        self.priming_count.store(0, Ordering::Relaxed);
        self.enqueue_failures.store(0, Ordering::Relaxed);
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}

/// 统计报告
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub callback_count: u64,
    pub bytes_copied: u64,
    pub wrap_count: u64,
    pub silence_fills: u64,
    pub priming_count: u64,
    pub enqueue_failures: u64,
}

impl std::fmt::Display for TransferReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Transfer Statistics")?;
        writeln!(f, "===================")?;
        writeln!(f, "Callbacks served: {}", self.callback_count)?;
        writeln!(f, "Bytes copied:     {}", self.bytes_copied)?;
        writeln!(f, "Buffer wraps:     {}", self.wrap_count)?;
        writeln!(f, "Silence fills:    {}", self.silence_fills)?;
        writeln!(f, "Priming buffers:  {}", self.priming_count)?;
        writeln!(f, "Enqueue failures: {}", self.enqueue_failures)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = TransferStats::new();
        stats.record_callback();
        stats.record_callback();
        stats.add_bytes_copied(1024);
        stats.record_wrap();
        stats.record_priming();

        let report = stats.report();
        assert_eq!(report.callback_count, 2);
        assert_eq!(report.bytes_copied, 1024);
        assert_eq!(report.wrap_count, 1);
        assert_eq!(report.priming_count, 1);
        assert_eq!(report.silence_fills, 0);
    }

    #[test]
    fn test_reset_clears_all() {
        let stats = TransferStats::new();
        stats.record_callback();
        stats.record_silence_fill();
        stats.record_enqueue_failure();
        stats.reset();

        let report = stats.report();
        assert_eq!(report.callback_count, 0);
        assert_eq!(report.silence_fills, 0);
        assert_eq!(report.enqueue_failures, 0);
    }

    #[test]
    fn test_report_display_format() {
        let stats = TransferStats::new();
        stats.record_callback();
        let text = stats.report().to_string();
        assert!(text.contains("Callbacks served: 1"));
        assert!(text.contains("Enqueue failures: 0"));
    }
}
