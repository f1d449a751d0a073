//! 传输控制
//!
//! 混音代码面向的薄门面：初始化、关闭、游标查询、写批次括号。
//! 核心设计：生产者直接写 DMA 缓冲区，消费端游标由拉取回调推进，
//! 门面本身不碰热路径。

use std::sync::Arc;

use crate::audio::format::AudioFormat;
use crate::audio::output::{OutputConfig, OutputSession};
use crate::audio::ring_buffer::DmaBuffer;
use crate::audio::stats::TransferStats;
use crate::audio::system::{default_system, AudioSystem};

/// 音频传输门面
///
/// 持有唯一的输出会话。生命周期操作假定由单一控制线程调用
pub struct Transport {
    session: OutputSession,
}

impl Transport {
    /// 使用当前平台的默认子系统创建
    pub fn new(config: OutputConfig) -> Self {
        Self::with_system(default_system(), config)
    }

    /// 注入指定子系统创建，测试用
    pub fn with_system(system: Box<dyn AudioSystem>, config: OutputConfig) -> Self {
        Self {
            session: OutputSession::new(system, config),
        }
    }

    /// 初始化输出；已初始化时返回 true 的空操作
    pub fn init(&mut self) -> bool {
        self.session.init()
    }

    /// 关闭输出；从未初始化时是安全的空操作
    pub fn shutdown(&mut self) {
        self.session.shutdown()
    }

    /// 当前消费游标（帧）；未激活时返回 0
    ///
    /// 生产者据此判断自己领先多少。无锁读取
    #[inline]
    pub fn position(&self) -> usize {
        self.session.position()
    }

    /// 暂停 / 恢复播放
    pub fn pause(&mut self, paused: bool) {
        self.session.pause(paused)
    }

    /// 标记一批生产者写入的开始
    ///
    /// 预留的同步挂钩，当前不做任何事
    pub fn begin_painting(&mut self) {}

    /// 标记一批生产者写入的结束
    ///
    /// 预留的同步挂钩，当前不做任何事
    pub fn submit(&mut self) {}

    /// 生产者写入用的 DMA 缓冲区
    pub fn dma(&self) -> Option<Arc<DmaBuffer>> {
        self.session.dma()
    }

    /// 协商后的输出格式
    pub fn format(&self) -> Option<AudioFormat> {
        self.session.format()
    }

    /// 传输统计
    pub fn stats(&self) -> Arc<TransferStats> {
        self.session.stats()
    }

    /// 是否有激活的会话
    pub fn is_active(&self) -> bool {
        self.session.is_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::output::InitPolicy;
    use crate::audio::sim::SimSystem;

    fn test_config() -> OutputConfig {
        OutputConfig {
            buffer_frames: 1024,
            chunk_bytes: 1024,
            policy: InitPolicy::FailFast,
            lock_memory: false,
            ..OutputConfig::default()
        }
    }

    #[test]
    fn test_init_shutdown_round_trip() {
        let mut transport = Transport::with_system(Box::new(SimSystem::new()), test_config());

        assert!(!transport.is_active());
        assert!(transport.init());
        assert!(transport.is_active());
        assert!(transport.dma().is_some());
        assert!(transport.format().is_some());

        transport.shutdown();
        assert!(!transport.is_active());
        assert_eq!(transport.position(), 0);
        assert!(transport.dma().is_none());
    }

    #[test]
    fn test_init_twice_reports_success() {
        let mut transport = Transport::with_system(Box::new(SimSystem::new()), test_config());

        assert!(transport.init());
        assert!(transport.init());
        assert!(transport.is_active());

        transport.shutdown();
    }

    #[test]
    fn test_shutdown_without_init_is_noop() {
        let mut transport = Transport::with_system(Box::new(SimSystem::new()), test_config());
        transport.shutdown();
        assert!(!transport.is_active());
        assert_eq!(transport.position(), 0);
    }

    #[test]
    fn test_painting_brackets_around_buffer_writes() {
        let mut transport = Transport::with_system(Box::new(SimSystem::new()), test_config());
        transport.init();

        let dma = transport.dma().unwrap();
        transport.begin_painting();
        dma.write_bytes(0, &[0x11u8; 512]);
        transport.submit();

        assert!(transport.position() < 1024);
        transport.shutdown();
    }
}
