//! Android OpenSL ES 输出设备
//!
//! 手写绑定，只覆盖播放路径用到的接口：
//! 引擎对象、输出混音器、带缓冲队列的播放器。
//! 接口句柄是指向虚表指针的指针，调用形如 `((**itf).realize)(itf, ..)`。
//!
//! 缓冲队列回调运行在 OpenSL 的内部线程上，通过注册时传入的
//! pContext 找回装箱的处理器。

use std::ffi::c_void;
use std::ptr;

use super::format::AudioFormat;
use super::system::{AudioSystem, BufferQueue, PlayState, PullHandler, SysError, SysResult};

/// OpenSL ES 类型定义
type SLresult = u32;
type SLuint32 = u32;
type SLboolean = u32;
type SLInterfaceID = *const c_void;
type SLObjectItf = *const *const SLObjectVtbl;
type SLEngineItf = *const *const SLEngineVtbl;
type SLPlayItf = *const *const SLPlayVtbl;
type SLAndroidSimpleBufferQueueItf = *const *const SLBufferQueueVtbl;

const SL_RESULT_SUCCESS: SLresult = 0x00000000;
const SL_RESULT_PARAMETER_INVALID: SLresult = 0x00000002;
const SL_RESULT_MEMORY_FAILURE: SLresult = 0x00000003;
const SL_RESULT_RESOURCE_ERROR: SLresult = 0x00000004;
const SL_RESULT_CONTENT_UNSUPPORTED: SLresult = 0x00000009;
const SL_RESULT_FEATURE_UNSUPPORTED: SLresult = 0x0000000C;

const SL_BOOLEAN_FALSE: SLboolean = 0;
const SL_BOOLEAN_TRUE: SLboolean = 1;

const SL_DATAFORMAT_PCM: SLuint32 = 0x00000002;
const SL_DATALOCATOR_OUTPUTMIX: SLuint32 = 0x00000004;
const SL_DATALOCATOR_ANDROIDSIMPLEBUFFERQUEUE: SLuint32 = 0x800007BD;

const SL_SPEAKER_FRONT_LEFT: SLuint32 = 0x00000001;
const SL_SPEAKER_FRONT_RIGHT: SLuint32 = 0x00000002;
const SL_BYTEORDER_LITTLEENDIAN: SLuint32 = 0x00000002;

const SL_PLAYSTATE_STOPPED: SLuint32 = 0x00000001;
const SL_PLAYSTATE_PAUSED: SLuint32 = 0x00000002;
const SL_PLAYSTATE_PLAYING: SLuint32 = 0x00000003;

/// 缓冲队列深度：两个在飞缓冲即可双缓冲衔接
const QUEUE_DEPTH: SLuint32 = 2;

/// 缓冲队列回调
type QueueCallback = extern "C" fn(queue: SLAndroidSimpleBufferQueueItf, context: *mut c_void);

// 未使用的虚表槽位以 *const c_void 占位，只保证布局

#[repr(C)]
struct SLObjectVtbl {
    realize: unsafe extern "C" fn(this: SLObjectItf, async_wanted: SLboolean) -> SLresult,
    resume: *const c_void,
    get_state: *const c_void,
    get_interface:
        unsafe extern "C" fn(this: SLObjectItf, iid: SLInterfaceID, interface: *mut c_void) -> SLresult,
    register_callback: *const c_void,
    abort_async_operation: *const c_void,
    destroy: unsafe extern "C" fn(this: SLObjectItf),
    set_priority: *const c_void,
    get_priority: *const c_void,
    set_loss_of_control_interfaces: *const c_void,
}

#[repr(C)]
struct SLEngineVtbl {
    create_led_device: *const c_void,
    create_vibra_device: *const c_void,
    create_audio_player: unsafe extern "C" fn(
        this: SLEngineItf,
        player: *mut SLObjectItf,
        source: *mut SLDataSource,
        sink: *mut SLDataSink,
        num_interfaces: SLuint32,
        interface_ids: *const SLInterfaceID,
        interface_required: *const SLboolean,
    ) -> SLresult,
    create_audio_recorder: *const c_void,
    create_midi_player: *const c_void,
    create_listener: *const c_void,
    create_3d_group: *const c_void,
    create_output_mix: unsafe extern "C" fn(
        this: SLEngineItf,
        mix: *mut SLObjectItf,
        num_interfaces: SLuint32,
        interface_ids: *const SLInterfaceID,
        interface_required: *const SLboolean,
    ) -> SLresult,
    create_metadata_extractor: *const c_void,
    create_extension_object: *const c_void,
    query_num_supported_interfaces: *const c_void,
    query_supported_interfaces: *const c_void,
    query_num_supported_extensions: *const c_void,
    query_supported_extension: *const c_void,
    is_extension_supported: *const c_void,
}

#[repr(C)]
struct SLPlayVtbl {
    set_play_state: unsafe extern "C" fn(this: SLPlayItf, state: SLuint32) -> SLresult,
    get_play_state: *const c_void,
    get_duration: *const c_void,
    get_position: *const c_void,
    register_callback: *const c_void,
    set_callback_events_mask: *const c_void,
    get_callback_events_mask: *const c_void,
    set_marker_position: *const c_void,
    clear_marker_position: *const c_void,
    set_position_update_period: *const c_void,
    get_position_update_period: *const c_void,
}

#[repr(C)]
struct SLBufferQueueVtbl {
    enqueue: unsafe extern "C" fn(
        this: SLAndroidSimpleBufferQueueItf,
        buffer: *const c_void,
        size: SLuint32,
    ) -> SLresult,
    clear: *const c_void,
    get_state: *const c_void,
    register_callback: unsafe extern "C" fn(
        this: SLAndroidSimpleBufferQueueItf,
        callback: QueueCallback,
        context: *mut c_void,
    ) -> SLresult,
}

#[repr(C)]
struct SLDataLocatorBufferQueue {
    locator_type: SLuint32,
    num_buffers: SLuint32,
}

#[repr(C)]
struct SLDataFormatPcm {
    format_type: SLuint32,
    num_channels: SLuint32,
    /// 单位是毫赫兹（22050 Hz 写作 22_050_000）
    samples_per_sec: SLuint32,
    bits_per_sample: SLuint32,
    container_size: SLuint32,
    channel_mask: SLuint32,
    endianness: SLuint32,
}

#[repr(C)]
struct SLDataSource {
    locator: *mut c_void,
    format: *mut c_void,
}

#[repr(C)]
struct SLDataLocatorOutputMix {
    locator_type: SLuint32,
    output_mix: SLObjectItf,
}

#[repr(C)]
struct SLDataSink {
    locator: *mut c_void,
    format: *mut c_void,
}

#[link(name = "OpenSLES")]
extern "C" {
    fn slCreateEngine(
        engine: *mut SLObjectItf,
        num_options: SLuint32,
        options: *const c_void,
        num_interfaces: SLuint32,
        interface_ids: *const SLInterfaceID,
        interface_required: *const SLboolean,
    ) -> SLresult;

    static SL_IID_ENGINE: SLInterfaceID;
    static SL_IID_PLAY: SLInterfaceID;
    static SL_IID_ANDROIDSIMPLEBUFFERQUEUE: SLInterfaceID;
}

fn sl_check(result: SLresult) -> SysResult {
    match result {
        SL_RESULT_SUCCESS => Ok(()),
        SL_RESULT_MEMORY_FAILURE | SL_RESULT_RESOURCE_ERROR => Err(SysError::ResourceExhausted),
        other => Err(SysError::Internal(other)),
    }
}

/// 回调上下文，注册后由 [`OpenSlSystem`] 持有
///
/// Box 的堆内容地址稳定，注册给原生层的裸指针在 Box 归还
/// 所有权后依然有效
struct SlCallbackContext {
    handler: PullHandler,
}

/// 原生缓冲队列视图，供回调重新入队
struct NativeQueue {
    itf: SLAndroidSimpleBufferQueueItf,
}

impl BufferQueue for NativeQueue {
    #[inline]
    fn enqueue(&mut self, data: &[u8]) -> SysResult {
        let result = unsafe {
            ((**self.itf).enqueue)(self.itf, data.as_ptr() as *const c_void, data.len() as SLuint32)
        };
        sl_check(result)
    }
}

/// 缓冲队列回调跳板
///
/// 运行在 OpenSL 的内部线程上
/// **绝对禁止：**
/// - 锁
/// - 分配
/// - I/O
/// - println!
extern "C" fn queue_callback(queue: SLAndroidSimpleBufferQueueItf, context: *mut c_void) {
    let ctx = unsafe { &mut *(context as *mut SlCallbackContext) };
    let mut view = NativeQueue { itf: queue };
    (ctx.handler)(&mut view);
}

/// OpenSL ES 子系统
pub struct OpenSlSystem {
    engine_object: SLObjectItf,
    engine: SLEngineItf,
    output_mix: SLObjectItf,
    player_object: SLObjectItf,
    play: SLPlayItf,
    queue: SLAndroidSimpleBufferQueueItf,
    context: Option<Box<SlCallbackContext>>,
}

// Android 的 OpenSL 实现在接口层自带同步，句柄可以跨线程使用
unsafe impl Send for OpenSlSystem {}

impl OpenSlSystem {
    pub fn new() -> Self {
        Self {
            engine_object: ptr::null(),
            engine: ptr::null(),
            output_mix: ptr::null(),
            player_object: ptr::null(),
            play: ptr::null(),
            queue: ptr::null(),
            context: None,
        }
    }
}

impl Default for OpenSlSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSystem for OpenSlSystem {
    fn create_engine(&mut self) -> SysResult {
        let result = unsafe {
            slCreateEngine(
                &mut self.engine_object,
                0,
                ptr::null(),
                0,
                ptr::null(),
                ptr::null(),
            )
        };
        sl_check(result)
    }

    fn realize_engine(&mut self) -> SysResult {
        if self.engine_object.is_null() {
            return Err(SysError::InvalidHandle);
        }
        sl_check(unsafe { ((**self.engine_object).realize)(self.engine_object, SL_BOOLEAN_FALSE) })
    }

    fn get_engine_interface(&mut self) -> SysResult {
        if self.engine_object.is_null() {
            return Err(SysError::InvalidHandle);
        }
        sl_check(unsafe {
            ((**self.engine_object).get_interface)(
                self.engine_object,
                SL_IID_ENGINE,
                &mut self.engine as *mut _ as *mut c_void,
            )
        })
    }

    fn create_output_mix(&mut self) -> SysResult {
        if self.engine.is_null() {
            return Err(SysError::InvalidHandle);
        }
        sl_check(unsafe {
            ((**self.engine).create_output_mix)(
                self.engine,
                &mut self.output_mix,
                0,
                ptr::null(),
                ptr::null(),
            )
        })
    }

    fn realize_output_mix(&mut self) -> SysResult {
        if self.output_mix.is_null() {
            return Err(SysError::InvalidHandle);
        }
        sl_check(unsafe { ((**self.output_mix).realize)(self.output_mix, SL_BOOLEAN_FALSE) })
    }

    fn create_player(&mut self, format: &AudioFormat) -> SysResult {
        if self.engine.is_null() {
            return Err(SysError::InvalidHandle);
        }

        let mut locator = SLDataLocatorBufferQueue {
            locator_type: SL_DATALOCATOR_ANDROIDSIMPLEBUFFERQUEUE,
            num_buffers: QUEUE_DEPTH,
        };
        let mut pcm = SLDataFormatPcm {
            format_type: SL_DATAFORMAT_PCM,
            num_channels: format.channels as SLuint32,
            samples_per_sec: format.sample_rate * 1000,
            bits_per_sample: format.bits_per_sample as SLuint32,
            container_size: format.bits_per_sample as SLuint32,
            channel_mask: SL_SPEAKER_FRONT_LEFT | SL_SPEAKER_FRONT_RIGHT,
            endianness: SL_BYTEORDER_LITTLEENDIAN,
        };
        let mut source = SLDataSource {
            locator: &mut locator as *mut _ as *mut c_void,
            format: &mut pcm as *mut _ as *mut c_void,
        };
        let mut sink_locator = SLDataLocatorOutputMix {
            locator_type: SL_DATALOCATOR_OUTPUTMIX,
            output_mix: self.output_mix,
        };
        let mut sink = SLDataSink {
            locator: &mut sink_locator as *mut _ as *mut c_void,
            format: ptr::null_mut(),
        };

        let result = unsafe {
            let ids = [SL_IID_ANDROIDSIMPLEBUFFERQUEUE];
            let req = [SL_BOOLEAN_TRUE];
            ((**self.engine).create_audio_player)(
                self.engine,
                &mut self.player_object,
                &mut source,
                &mut sink,
                1,
                ids.as_ptr(),
                req.as_ptr(),
            )
        };

        match result {
            SL_RESULT_PARAMETER_INVALID
            | SL_RESULT_CONTENT_UNSUPPORTED
            | SL_RESULT_FEATURE_UNSUPPORTED => Err(SysError::UnsupportedFormat),
            other => sl_check(other),
        }
    }

    fn realize_player(&mut self) -> SysResult {
        if self.player_object.is_null() {
            return Err(SysError::InvalidHandle);
        }
        sl_check(unsafe { ((**self.player_object).realize)(self.player_object, SL_BOOLEAN_FALSE) })
    }

    fn get_play_interface(&mut self) -> SysResult {
        if self.player_object.is_null() {
            return Err(SysError::InvalidHandle);
        }
        sl_check(unsafe {
            ((**self.player_object).get_interface)(
                self.player_object,
                SL_IID_PLAY,
                &mut self.play as *mut _ as *mut c_void,
            )
        })
    }

    fn get_queue_interface(&mut self) -> SysResult {
        if self.player_object.is_null() {
            return Err(SysError::InvalidHandle);
        }
        sl_check(unsafe {
            ((**self.player_object).get_interface)(
                self.player_object,
                SL_IID_ANDROIDSIMPLEBUFFERQUEUE,
                &mut self.queue as *mut _ as *mut c_void,
            )
        })
    }

    fn register_callback(&mut self, handler: PullHandler) -> SysResult {
        if self.queue.is_null() {
            return Err(SysError::InvalidHandle);
        }

        let context = Box::new(SlCallbackContext { handler });
        let context_ptr = Box::into_raw(context);

        let result = unsafe {
            ((**self.queue).register_callback)(self.queue, queue_callback, context_ptr as *mut c_void)
        };
        if result != SL_RESULT_SUCCESS {
            unsafe {
                let _ = Box::from_raw(context_ptr);
            }
            return sl_check(result);
        }

        self.context = Some(unsafe { Box::from_raw(context_ptr) });
        Ok(())
    }

    fn set_play_state(&mut self, state: PlayState) -> SysResult {
        if self.play.is_null() {
            return Err(SysError::InvalidHandle);
        }
        let native = match state {
            PlayState::Stopped => SL_PLAYSTATE_STOPPED,
            PlayState::Paused => SL_PLAYSTATE_PAUSED,
            PlayState::Playing => SL_PLAYSTATE_PLAYING,
        };
        sl_check(unsafe { ((**self.play).set_play_state)(self.play, native) })
    }

    fn enqueue(&mut self, data: &[u8]) -> SysResult {
        if self.queue.is_null() {
            return Err(SysError::InvalidHandle);
        }
        let result = unsafe {
            ((**self.queue).enqueue)(self.queue, data.as_ptr() as *const c_void, data.len() as SLuint32)
        };
        sl_check(result)
    }

    fn destroy_player(&mut self) {
        if !self.player_object.is_null() {
            unsafe { ((**self.player_object).destroy)(self.player_object) };
        }
        self.player_object = ptr::null();
        self.play = ptr::null();
        self.queue = ptr::null();
        // Destroy 返回后不会再有回调，上下文可以安全释放
        self.context = None;
    }

    fn destroy_output_mix(&mut self) {
        if !self.output_mix.is_null() {
            unsafe { ((**self.output_mix).destroy)(self.output_mix) };
        }
        self.output_mix = ptr::null();
    }

    fn destroy_engine(&mut self) {
        if !self.engine_object.is_null() {
            unsafe { ((**self.engine_object).destroy)(self.engine_object) };
        }
        self.engine_object = ptr::null();
        self.engine = ptr::null();
    }
}

impl Drop for OpenSlSystem {
    fn drop(&mut self) {
        self.destroy_player();
        self.destroy_output_mix();
        self.destroy_engine();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore] // 需要 Android 音频设备
    fn test_open_and_close_device() {
        let mut sys = OpenSlSystem::new();
        sys.create_engine().unwrap();
        sys.realize_engine().unwrap();
        sys.get_engine_interface().unwrap();
        sys.create_output_mix().unwrap();
        sys.realize_output_mix().unwrap();
        sys.create_player(&AudioFormat::stereo16(22050)).unwrap();
        sys.realize_player().unwrap();
        sys.get_play_interface().unwrap();
        sys.get_queue_interface().unwrap();
        sys.set_play_state(PlayState::Playing).unwrap();
        sys.destroy_player();
        sys.destroy_output_mix();
        sys.destroy_engine();
    }
}
