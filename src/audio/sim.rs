//! 软件模拟的输出设备
//!
//! 设计目标：
//! - 任何平台可用，让上层逻辑不依赖真实硬件即可运行和测试
//! - 行为贴近真实设备：按采样率实时消费缓冲，队列排空后停止回调
//! - 暂停时保留队列内容，恢复后继续消费
//!
//! 投递线程按每个缓冲的时长睡眠，再调用注册的拉取回调索取下一块。
//! 队列为空时线程只能空转等待，这正是引导缓冲存在的原因。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::format::AudioFormat;
use super::system::{AudioSystem, BufferQueue, PlayState, PullHandler, SysResult};

/// 空闲轮询间隔
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// 投递线程与控制方的共享状态
struct SimState {
    /// 待消费的缓冲队列
    pending: Mutex<VecDeque<Vec<u8>>>,
    /// 注册的拉取回调；持锁调用，销毁播放器时等待在飞的回调结束
    handler: Mutex<Option<PullHandler>>,
    /// 是否处于 PLAYING
    playing: AtomicBool,
    /// 投递线程退出标志
    running: AtomicBool,
    /// 播放器格式，决定消费速率
    sample_rate: AtomicU32,
    frame_size: AtomicUsize,
}

/// 投递线程看到的队列视图
struct SimQueueView<'a> {
    state: &'a SimState,
}

impl BufferQueue for SimQueueView<'_> {
    fn enqueue(&mut self, data: &[u8]) -> SysResult {
        self.state.pending.lock().unwrap().push_back(data.to_vec());
        Ok(())
    }
}

/// 模拟子系统
pub struct SimSystem {
    state: Arc<SimState>,
    thread: Option<JoinHandle<()>>,
}

impl SimSystem {
    pub fn new() -> Self {
        Self {
            state: Arc::new(SimState {
                pending: Mutex::new(VecDeque::new()),
                handler: Mutex::new(None),
                playing: AtomicBool::new(false),
                running: AtomicBool::new(false),
                sample_rate: AtomicU32::new(22050),
                frame_size: AtomicUsize::new(4),
            }),
            thread: None,
        }
    }

    /// 投递线程主函数
    fn delivery_thread_main(state: Arc<SimState>) {
        log::debug!("Sim audio delivery thread started");

        while state.running.load(Ordering::Acquire) {
            if !state.playing.load(Ordering::Acquire) {
                thread::sleep(POLL_INTERVAL);
                continue;
            }

            let next = state.pending.lock().unwrap().pop_front();
            let buffer = match next {
                Some(buffer) => buffer,
                None => {
                    // 队列排空：真实设备此刻就不再回调，
                    // 直到有人重新入队（引导缓冲）
                    thread::sleep(POLL_INTERVAL);
                    continue;
                }
            };

            // 按实时速率消费（纯整数运算）
            let rate = state.sample_rate.load(Ordering::Relaxed) as u64;
            let frame = state.frame_size.load(Ordering::Relaxed) as u64;
            let bytes_per_sec = (rate * frame).max(1);
            let ns = buffer.len() as u64 * 1_000_000_000 / bytes_per_sec;
            thread::sleep(Duration::from_nanos(ns));

            // 缓冲消费完毕，向回调索取下一块
            let mut guard = state.handler.lock().unwrap();
            if let Some(handler) = guard.as_mut() {
                let mut view = SimQueueView { state: &state };
                handler(&mut view);
            }
        }

        log::debug!("Sim audio delivery thread stopped");
    }
}

impl Default for SimSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSystem for SimSystem {
    fn create_engine(&mut self) -> SysResult {
        if self.thread.is_some() {
            return Ok(());
        }

        self.state.running.store(true, Ordering::Release);
        let state = Arc::clone(&self.state);
        let thread = thread::Builder::new()
            .name("sim-audio".to_string())
            .spawn(move || {
                Self::delivery_thread_main(state);
            })
            .expect("Failed to spawn sim audio thread");
        self.thread = Some(thread);
        Ok(())
    }

    fn realize_engine(&mut self) -> SysResult {
        Ok(())
    }

    fn get_engine_interface(&mut self) -> SysResult {
        Ok(())
    }

    fn create_output_mix(&mut self) -> SysResult {
        Ok(())
    }

    fn realize_output_mix(&mut self) -> SysResult {
        Ok(())
    }

    /// 模拟设备接受任何采样率
    fn create_player(&mut self, format: &AudioFormat) -> SysResult {
        self.state
            .sample_rate
            .store(format.sample_rate, Ordering::Relaxed);
        self.state
            .frame_size
            .store(format.bytes_per_frame(), Ordering::Relaxed);
        Ok(())
    }

    fn realize_player(&mut self) -> SysResult {
        Ok(())
    }

    fn get_play_interface(&mut self) -> SysResult {
        Ok(())
    }

    fn get_queue_interface(&mut self) -> SysResult {
        Ok(())
    }

    fn register_callback(&mut self, handler: PullHandler) -> SysResult {
        *self.state.handler.lock().unwrap() = Some(handler);
        Ok(())
    }

    fn set_play_state(&mut self, state: PlayState) -> SysResult {
        self.state
            .playing
            .store(state == PlayState::Playing, Ordering::Release);
        Ok(())
    }

    fn enqueue(&mut self, data: &[u8]) -> SysResult {
        self.state.pending.lock().unwrap().push_back(data.to_vec());
        Ok(())
    }

    fn destroy_player(&mut self) {
        self.state.playing.store(false, Ordering::Release);
        // 等待在飞的回调结束后摘除
        *self.state.handler.lock().unwrap() = None;
        self.state.pending.lock().unwrap().clear();
    }

    fn destroy_output_mix(&mut self) {}

    fn destroy_engine(&mut self) {
        self.state.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SimSystem {
    fn drop(&mut self) {
        self.destroy_engine();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    fn feeding_handler(count: Arc<AtomicU64>, chunk: Vec<u8>) -> PullHandler {
        Box::new(move |queue| {
            count.fetch_add(1, Ordering::Relaxed);
            if !chunk.is_empty() {
                let _ = queue.enqueue(&chunk);
            }
        })
    }

    #[test]
    fn test_callback_loop_keeps_running_while_fed() {
        let mut sys = SimSystem::new();
        sys.create_engine().unwrap();
        sys.create_player(&AudioFormat::stereo16(48000)).unwrap();

        let count = Arc::new(AtomicU64::new(0));
        sys.register_callback(feeding_handler(Arc::clone(&count), vec![0u8; 64]))
            .unwrap();
        sys.set_play_state(PlayState::Playing).unwrap();
        sys.enqueue(&[0]).unwrap();

        thread::sleep(Duration::from_millis(50));
        assert!(count.load(Ordering::Relaxed) >= 3);

        sys.destroy_player();
        sys.destroy_engine();
    }

    #[test]
    fn test_stalls_when_callback_stops_feeding() {
        let mut sys = SimSystem::new();
        sys.create_engine().unwrap();
        sys.create_player(&AudioFormat::stereo16(22050)).unwrap();

        // 回调不入队，引导缓冲消费完后整个循环停住
        let count = Arc::new(AtomicU64::new(0));
        sys.register_callback(feeding_handler(Arc::clone(&count), Vec::new()))
            .unwrap();
        sys.set_play_state(PlayState::Playing).unwrap();
        sys.enqueue(&[0]).unwrap();

        thread::sleep(Duration::from_millis(30));
        assert_eq!(count.load(Ordering::Relaxed), 1);

        sys.destroy_engine();
    }

    #[test]
    fn test_priming_restarts_stalled_loop() {
        let mut sys = SimSystem::new();
        sys.create_engine().unwrap();
        sys.create_player(&AudioFormat::stereo16(22050)).unwrap();

        let count = Arc::new(AtomicU64::new(0));
        sys.register_callback(feeding_handler(Arc::clone(&count), Vec::new()))
            .unwrap();
        sys.set_play_state(PlayState::Playing).unwrap();
        sys.enqueue(&[0]).unwrap();

        thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::Relaxed), 1);

        // 只切播放状态救不回来，必须重新入队
        sys.set_play_state(PlayState::Paused).unwrap();
        sys.set_play_state(PlayState::Playing).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::Relaxed), 1);

        sys.enqueue(&[0]).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::Relaxed), 2);

        sys.destroy_engine();
    }

    #[test]
    fn test_destroy_player_stops_callbacks() {
        let mut sys = SimSystem::new();
        sys.create_engine().unwrap();
        sys.create_player(&AudioFormat::stereo16(48000)).unwrap();

        let count = Arc::new(AtomicU64::new(0));
        sys.register_callback(feeding_handler(Arc::clone(&count), vec![0u8; 64]))
            .unwrap();
        sys.set_play_state(PlayState::Playing).unwrap();
        sys.enqueue(&[0]).unwrap();

        thread::sleep(Duration::from_millis(30));
        assert!(count.load(Ordering::Relaxed) >= 1);

        sys.destroy_player();
        let after_destroy = count.load(Ordering::Relaxed);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::Relaxed), after_destroy);

        sys.destroy_engine();
    }

    #[test]
    fn test_pause_keeps_queue_contents() {
        let mut sys = SimSystem::new();
        sys.create_engine().unwrap();
        sys.create_player(&AudioFormat::stereo16(22050)).unwrap();

        let count = Arc::new(AtomicU64::new(0));
        sys.register_callback(feeding_handler(Arc::clone(&count), Vec::new()))
            .unwrap();

        // 暂停状态下入队不触发任何回调
        sys.enqueue(&[0]).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::Relaxed), 0);

        // 恢复后排队内容被消费
        sys.set_play_state(PlayState::Playing).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::Relaxed), 1);

        sys.destroy_engine();
    }
}
