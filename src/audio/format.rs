//! 音频格式
//!
//! 本驱动只传输一种格式：16-bit 有符号小端 PCM、双声道、
//! 采样率从候选表协商。帧 = 每声道一个样本 = 4 字节。

/// 采样率协商候选表，按优先级排列
///
/// 有些设备只接受 48000
pub const TRY_RATES: [u32; 5] = [22050, 11025, 44100, 48000, 8000];

/// 音频格式
///
/// 会话存续期间不可变
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl AudioFormat {
    /// 16-bit 双声道，指定采样率
    pub fn stereo16(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 2,
            bits_per_sample: 16,
        }
    }

    /// 每样本的字节数
    #[inline]
    pub fn bytes_per_sample(&self) -> usize {
        self.bits_per_sample as usize / 8
    }

    /// 每帧的字节数（= 声道数 × 样本字节数）
    #[inline]
    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_sample() * self.channels as usize
    }

    /// 每帧的样本数（= 声道数）
    #[inline]
    pub fn samples_per_frame(&self) -> usize {
        self.channels as usize
    }

    /// 指定帧数对应的播放时长（秒）
    #[inline]
    pub fn frames_to_secs(&self, frames: usize) -> f64 {
        frames as f64 / self.sample_rate as f64
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}Hz {}ch {}bit",
            self.sample_rate, self.channels, self.bits_per_sample
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stereo16_frame_size() {
        let fmt = AudioFormat::stereo16(22050);
        assert_eq!(fmt.bytes_per_sample(), 2);
        assert_eq!(fmt.bytes_per_frame(), 4);
        assert_eq!(fmt.samples_per_frame(), 2);
    }

    #[test]
    fn test_frames_to_secs() {
        let fmt = AudioFormat::stereo16(22050);
        let secs = fmt.frames_to_secs(22050);
        assert!((secs - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_try_rates_prefers_22050() {
        assert_eq!(TRY_RATES[0], 22050);
        assert!(TRY_RATES.contains(&48000));
    }
}
