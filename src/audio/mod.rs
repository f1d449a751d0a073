//! 音频核心模块
//!
//! 包含：
//! - Ring Buffer: DMA 环形缓冲区与游标
//! - Format: 音频格式与采样率候选
//! - System: 原生子系统能力边界
//! - Output: 输出会话与拉取回调
//! - Sim: 软件模拟设备
//! - OpenSL: Android OpenSL ES 输出设备（仅 Android 编译）
//! - Stats: 传输统计

pub mod format;
pub mod output;
#[cfg(target_os = "android")]
pub mod opensl;
pub mod ring_buffer;
pub mod sim;
pub mod stats;
pub mod system;

pub use format::{AudioFormat, TRY_RATES};
pub use output::{InitPolicy, OutputConfig, OutputError, OutputSession, SessionState};
pub use ring_buffer::DmaBuffer;
pub use stats::{TransferReport, TransferStats};
pub use system::{default_system, AudioSystem, BufferQueue, PlayState, PullHandler};
