//! 输出会话管理 + 拉取回调
//!
//! 管理原生输出会话的完整生命周期：
//! 创建 → 配置 → 激活 → 播放 → 暂停/恢复 → 销毁。
//! 所有原生调用都走 [`AudioSystem`] 能力边界，每一步的失败策略
//! 由 [`InitPolicy`] 在一个地方决定。
//!
//! 拉取回调由子系统的线程在队列需要下一块数据时调用：
//! 从 DMA 缓冲区当前游标拷出固定大小的块，处理环绕，
//! 重新入队并推进游标。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::format::{AudioFormat, TRY_RATES};
use super::ring_buffer::{CacheLine, DmaBuffer};
use super::stats::TransferStats;
use super::system::{AudioSystem, BufferQueue, PlayState, PullHandler, SysError, SysResult};

/// 引导缓冲：单个零字节
///
/// 原生队列排空后就不再触发回调，启动和每次恢复播放时
/// 都要提交一个最小的占位缓冲把回调循环踢起来
const PRIMING_BUFFER: [u8; 1] = [0];

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Active,
    ShuttingDown,
}

/// init 中某一步失败后的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitPolicy {
    /// 记录日志并继续执行后续步骤，init 总是报告成功。
    /// 部分构造的会话可能产生，glitch 代替崩溃
    BestEffort,
    /// 第一步失败即中止，按创建反序销毁已创建的对象，init 报告失败
    FailFast,
}

/// 输出配置
#[derive(Clone, Debug)]
pub struct OutputConfig {
    /// DMA 缓冲区容量（帧）
    pub buffer_frames: usize,
    /// 每次回调传输的块大小（字节）
    pub chunk_bytes: usize,
    /// 采样率协商候选，按优先级排列
    pub try_rates: Vec<u32>,
    /// init 失败策略
    pub policy: InitPolicy,
    /// 是否 mlock DMA 缓冲区
    pub lock_memory: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            // 32 KiB @ 4 字节帧
            buffer_frames: 8192,
            chunk_bytes: 1024,
            try_rates: TRY_RATES.to_vec(),
            policy: InitPolicy::BestEffort,
            lock_memory: true,
        }
    }
}

/// 会话错误
#[derive(Debug)]
pub enum OutputError {
    /// 某个初始化步骤的原生调用失败
    Step {
        step: &'static str,
        source: SysError,
    },
    /// 候选表里没有任何采样率被接受
    NoRateAccepted,
}

impl std::fmt::Display for OutputError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Step { step, source } => write!(f, "Init step '{}' failed: {}", step, source),
            Self::NoRateAccepted => write!(f, "No candidate sample rate accepted"),
        }
    }
}

impl std::error::Error for OutputError {}

/// 拉取回调上下文
///
/// 所有字段在回调启动前预分配，回调内不做任何分配
struct CallbackContext {
    dma: Arc<DmaBuffer>,
    stats: Arc<TransferStats>,

    /// 会话激活标志，会话管理器在关闭时清除。
    /// 使用 CacheLine 包装避免与游标 false sharing
    active: Arc<CacheLine<AtomicBool>>,

    /// 预分配的传输块，至少容得下一帧
    chunk: Vec<u8>,
    chunk_bytes: usize,
    frame_size: usize,
}

/// 拉取处理逻辑
///
/// 供注册到缓冲队列上的闭包调用。
///
/// **绝对禁止：**
/// - 锁
/// - 分配
/// - I/O
fn pull_next_chunk(ctx: &mut CallbackContext, queue: &mut dyn BufferQueue) {
    ctx.stats.record_callback();

    if !ctx.active.0.load(Ordering::Acquire) {
        // 会话未激活：输出静音且不重新入队。
        // 数据流就此停住，直到下一次引导缓冲重启回调循环
        for byte in ctx.chunk.iter_mut() {
            *byte = 0;
        }
        ctx.stats.record_silence_fill();
        return;
    }

    let before = ctx.dma.position();
    let after = ctx.dma.read_chunk(&mut ctx.chunk[..ctx.chunk_bytes]);
    ctx.stats.add_bytes_copied(ctx.chunk_bytes as u64);
    // 游标原位不动的读取（不足一帧）不算回绕；整圈读取算一次
    if after < before || (after == before && ctx.chunk_bytes >= ctx.dma.capacity()) {
        ctx.stats.record_wrap();
    }

    // 帧数为零时强制凑一帧，避免向设备提交空缓冲
    let mut frame_count = ctx.chunk_bytes / ctx.frame_size;
    if frame_count == 0 {
        frame_count = 1;
    }
    let len = frame_count * ctx.frame_size;

    if queue.enqueue(&ctx.chunk[..len]).is_err() {
        ctx.stats.record_enqueue_failure();
    }
}

/// 输出会话管理器
///
/// 进程内同一时刻只应存在一个 Active 会话；重复 init 是报告成功的
/// 空操作，杜绝了第二个会话的产生
pub struct OutputSession {
    system: Box<dyn AudioSystem>,
    config: OutputConfig,
    state: SessionState,
    paused: bool,
    dma: Option<Arc<DmaBuffer>>,
    active: Option<Arc<CacheLine<AtomicBool>>>,
    stats: Arc<TransferStats>,
    format: Option<AudioFormat>,
}

impl OutputSession {
    pub fn new(system: Box<dyn AudioSystem>, config: OutputConfig) -> Self {
        assert!(config.buffer_frames > 0, "buffer_frames must be non-zero");
        assert!(config.chunk_bytes > 0, "chunk_bytes must be non-zero");

        Self {
            system,
            config,
            state: SessionState::Uninitialized,
            paused: false,
            dma: None,
            active: None,
            stats: Arc::new(TransferStats::new()),
            format: None,
        }
    }

    /// 初始化输出会话
    ///
    /// 已经 Active 时直接返回 true，不触碰任何状态。
    /// 成功后：游标 0、播放状态 PLAYING、首个回调即将到来
    pub fn init(&mut self) -> bool {
        if self.state == SessionState::Active {
            log::debug!("Audio output already initialized");
            return true;
        }

        self.stats.reset();

        let preferred = self
            .config
            .try_rates
            .first()
            .copied()
            .unwrap_or(TRY_RATES[0]);
        let provisional = AudioFormat::stereo16(preferred);
        let frame_size = provisional.bytes_per_frame();
        let capacity = self.config.buffer_frames * frame_size;

        // 单次传输最多一圈：过大的块按缓冲区容量截断
        let mut chunk_bytes = self.config.chunk_bytes;
        if chunk_bytes > capacity {
            log::warn!(
                "Transfer chunk ({} bytes) exceeds DMA buffer ({} bytes), clamping",
                chunk_bytes,
                capacity
            );
            chunk_bytes = capacity;
        }

        // 先分配清零的 DMA 缓冲区，再动原生对象
        let dma = Arc::new(DmaBuffer::new(capacity, frame_size));
        if self.config.lock_memory {
            // 锁定失败只降级，不影响初始化
            dma.lock_memory();
        }

        let active = Arc::new(CacheLine::new(AtomicBool::new(false)));

        let mut ctx = CallbackContext {
            dma: Arc::clone(&dma),
            stats: Arc::clone(&self.stats),
            active: Arc::clone(&active),
            chunk: vec![0u8; chunk_bytes.max(frame_size)],
            chunk_bytes,
            frame_size,
        };
        let handler: PullHandler = Box::new(move |queue| pull_next_chunk(&mut ctx, queue));

        match self.init_sequence(handler, provisional, &active) {
            Ok(format) => {
                self.dma = Some(dma);
                self.active = Some(active);
                self.format = Some(format);
                self.paused = false;
                self.state = SessionState::Active;
                log::info!("Audio output initialized: {}", format);
                true
            }
            Err(err) => {
                log::error!("Audio output init aborted: {}", err);
                active.0.store(false, Ordering::Release);
                // 按创建反序清理已创建的对象；销毁对不存在的对象安全
                self.system.destroy_player();
                self.system.destroy_output_mix();
                self.system.destroy_engine();
                self.state = SessionState::Uninitialized;
                false
            }
        }
    }

    /// 初始化步骤序列，与原生对象的创建顺序一一对应
    fn init_sequence(
        &mut self,
        handler: PullHandler,
        provisional: AudioFormat,
        active: &Arc<CacheLine<AtomicBool>>,
    ) -> Result<AudioFormat, OutputError> {
        self.step("create engine", |s| s.create_engine())?;
        self.step("realize engine", |s| s.realize_engine())?;
        self.step("get engine interface", |s| s.get_engine_interface())?;

        self.step("create output mix", |s| s.create_output_mix())?;
        self.step("realize output mix", |s| s.realize_output_mix())?;

        let format = self.negotiate_player(provisional)?;

        self.step("realize audio player", |s| s.realize_player())?;
        self.step("get play interface", |s| s.get_play_interface())?;
        self.step("get buffer queue interface", |s| s.get_queue_interface())?;
        self.step("register callback", move |s| s.register_callback(handler))?;

        // 激活必须先于 PLAYING：引导缓冲一提交，首个回调随时可能到来
        active.0.store(true, Ordering::Release);

        self.step("set play state", |s| s.set_play_state(PlayState::Playing))?;
        self.step("enqueue priming buffer", |s| s.enqueue(&PRIMING_BUFFER))?;
        self.stats.record_priming();

        Ok(format)
    }

    /// 单个初始化步骤：失败时按策略决定继续还是中止
    fn step<F>(&mut self, name: &'static str, f: F) -> Result<(), OutputError>
    where
        F: FnOnce(&mut dyn AudioSystem) -> SysResult,
    {
        match f(&mut *self.system) {
            Ok(()) => Ok(()),
            Err(source) => {
                log::warn!("Audio init step failed: {}: {}", name, source);
                match self.config.policy {
                    InitPolicy::BestEffort => Ok(()),
                    InitPolicy::FailFast => Err(OutputError::Step { step: name, source }),
                }
            }
        }
    }

    /// 逐个候选采样率创建播放器，第一个被接受的定为会话格式
    fn negotiate_player(&mut self, provisional: AudioFormat) -> Result<AudioFormat, OutputError> {
        let rates = self.config.try_rates.clone();
        for &rate in &rates {
            let format = AudioFormat::stereo16(rate);
            match self.system.create_player(&format) {
                Ok(()) => {
                    if rate != provisional.sample_rate {
                        log::info!(
                            "Sample rate {} selected ({} rejected by device)",
                            rate,
                            provisional.sample_rate
                        );
                    }
                    return Ok(format);
                }
                Err(err) => log::debug!("Sample rate {} not accepted: {}", rate, err),
            }
        }

        log::warn!("Audio init step failed: create audio player: no candidate sample rate accepted");
        match self.config.policy {
            InitPolicy::BestEffort => Ok(provisional),
            InitPolicy::FailFast => Err(OutputError::NoRateAccepted),
        }
    }

    /// 暂停 / 恢复
    ///
    /// 恢复时提交一个引导缓冲重启回调循环（队列排空后设备不再回调）。
    /// 同方向的重复调用不做任何事，保证每次恢复恰好一个引导缓冲
    pub fn pause(&mut self, paused: bool) {
        if self.state != SessionState::Active {
            return;
        }
        if paused == self.paused {
            return;
        }

        if paused {
            let result = self.system.set_play_state(PlayState::Paused);
            self.check("set play state", result);
            self.paused = true;
            log::info!("Audio output paused");
        } else {
            let result = self.system.set_play_state(PlayState::Playing);
            self.check("set play state", result);

            let result = self.system.enqueue(&PRIMING_BUFFER);
            self.check("enqueue priming buffer", result);
            self.stats.record_priming();

            self.paused = false;
            log::info!("Audio output resumed");
        }
    }

    /// 关闭会话
    ///
    /// 没有会话时是安全的空操作。先暂停，再按创建反序销毁，
    /// 最后清空句柄、标记未激活
    pub fn shutdown(&mut self) {
        if self.state != SessionState::Active {
            log::debug!("Audio output not initialized, nothing to shut down");
            return;
        }
        self.state = SessionState::ShuttingDown;

        let result = self.system.set_play_state(PlayState::Paused);
        self.check("set play state", result);

        self.system.destroy_player();
        self.system.destroy_output_mix();
        self.system.destroy_engine();

        if let Some(active) = self.active.take() {
            active.0.store(false, Ordering::Release);
        }
        self.dma = None;
        self.format = None;
        self.paused = false;
        self.state = SessionState::Uninitialized;

        log::info!("Audio output shut down");
    }

    /// 当前游标（帧）；未激活时返回 0
    ///
    /// 无锁读取，不与回调同步
    #[inline]
    pub fn position(&self) -> usize {
        if self.state != SessionState::Active {
            return 0;
        }
        self.dma.as_ref().map(|d| d.position()).unwrap_or(0)
    }

    /// 会话状态
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// 是否处于 Active
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// 是否已暂停
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// 生产者写入用的 DMA 缓冲区
    pub fn dma(&self) -> Option<Arc<DmaBuffer>> {
        self.dma.clone()
    }

    /// 协商后的会话格式
    pub fn format(&self) -> Option<AudioFormat> {
        self.format
    }

    /// 传输统计
    pub fn stats(&self) -> Arc<TransferStats> {
        Arc::clone(&self.stats)
    }

    /// 运行期原生调用的结果检查：只记录，不中止
    fn check(&self, step: &'static str, result: SysResult) {
        if let Err(err) = result {
            log::warn!("Audio call failed: {}: {}", step, err);
        }
    }
}

impl Drop for OutputSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
