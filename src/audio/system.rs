//! 原生音频子系统边界
//!
//! 会话管理器看到的外部能力：创建/实现/销毁原生对象、注册拉取回调、
//! 入队缓冲、切换播放状态。每一步单独返回 Result，继续还是中止
//! 由调用方决定，而不是埋在各处的诊断打印里。
//!
//! 两个实现：
//! - [`crate::audio::sim::SimSystem`]：软件模拟设备，任何平台可用
//! - `crate::audio::opensl::OpenSlSystem`：Android 上的 OpenSL ES 设备

use super::format::AudioFormat;

/// 原生播放状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Stopped,
    Paused,
    Playing,
}

/// 子系统边界错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysError {
    /// 资源创建失败（内存、设备句柄等）
    ResourceExhausted,
    /// 请求的 PCM 格式不被接受
    UnsupportedFormat,
    /// 调用顺序错误，目标对象尚不存在
    InvalidHandle,
    /// 原生层返回的原始错误码
    Internal(u32),
}

impl std::fmt::Display for SysError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ResourceExhausted => write!(f, "Native resource exhausted"),
            Self::UnsupportedFormat => write!(f, "PCM format not accepted"),
            Self::InvalidHandle => write!(f, "Object does not exist yet"),
            Self::Internal(code) => write!(f, "Native error code {}", code),
        }
    }
}

impl std::error::Error for SysError {}

pub type SysResult = Result<(), SysError>;

/// 回调线程拿到的缓冲队列视图
///
/// 拉取回调通过它把装好的块重新入队。实现必须有界、不阻塞。
pub trait BufferQueue {
    fn enqueue(&mut self, data: &[u8]) -> SysResult;
}

/// 注册到缓冲队列上的拉取回调
///
/// 由子系统自己的线程在需要下一块数据时调用，本侧绝不主动触发。
pub type PullHandler = Box<dyn FnMut(&mut dyn BufferQueue) + Send>;

/// 原生音频子系统能力
///
/// 方法按会话创建顺序排列，与创建顺序一致地调用：
/// engine → output mix → player → 接口获取 → 回调注册 → 播放。
/// 销毁方法不会失败，重复调用安全。
///
/// `enqueue` 是控制线程的入队路径（启动/恢复时的引导缓冲走这里）；
/// 回调自己的入队走 [`BufferQueue`] 视图。
pub trait AudioSystem: Send {
    fn create_engine(&mut self) -> SysResult;
    fn realize_engine(&mut self) -> SysResult;
    fn get_engine_interface(&mut self) -> SysResult;

    fn create_output_mix(&mut self) -> SysResult;
    fn realize_output_mix(&mut self) -> SysResult;

    /// 以给定 PCM 格式创建绑定到 output mix 的播放器
    ///
    /// 设备可以用 [`SysError::UnsupportedFormat`] 拒绝采样率，
    /// 调用方会换下一个候选再试
    fn create_player(&mut self, format: &AudioFormat) -> SysResult;
    fn realize_player(&mut self) -> SysResult;
    fn get_play_interface(&mut self) -> SysResult;
    fn get_queue_interface(&mut self) -> SysResult;

    fn register_callback(&mut self, handler: PullHandler) -> SysResult;

    fn set_play_state(&mut self, state: PlayState) -> SysResult;
    fn enqueue(&mut self, data: &[u8]) -> SysResult;

    fn destroy_player(&mut self);
    fn destroy_output_mix(&mut self);
    fn destroy_engine(&mut self);
}

/// 当前平台的默认子系统
pub fn default_system() -> Box<dyn AudioSystem> {
    #[cfg(target_os = "android")]
    {
        Box::new(super::opensl::OpenSlSystem::new())
    }
    #[cfg(not(target_os = "android"))]
    {
        Box::new(super::sim::SimSystem::new())
    }
}
