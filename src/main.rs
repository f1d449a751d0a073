//! Sndout - PCM 传输演示
//!
//! 设计目标：
//! - 复现真实混音循环的写入节奏：生产者保持半个缓冲区的领先
//! - 游标解环绕统计消费量，不依赖任何回调侧状态
//! - 可做烟雾测试：正弦/噪声信号 + 传输统计输出

#![allow(dead_code, unused_mut)]

mod audio;
mod transport;

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use rand::Rng;

use crate::audio::{InitPolicy, OutputConfig};
use crate::transport::Transport;

/// 每次写入 DMA 缓冲区的块大小（帧）
const WRITE_BLOCK_FRAMES: usize = 256;

/// 正弦振幅，约满刻度的 30%
const TONE_AMPLITUDE: f64 = 9830.0;

/// Sndout - PCM transport demo
#[derive(Parser)]
#[command(name = "sndout")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Playback duration in seconds
    #[arg(short, long, default_value = "5")]
    seconds: u64,

    /// Sine tone frequency in Hz
    #[arg(short, long, default_value = "440")]
    freq: f64,

    /// Produce white noise instead of a sine tone
    #[arg(long)]
    noise: bool,

    /// DMA buffer capacity in frames
    #[arg(long, default_value = "8192")]
    buffer_frames: usize,

    /// Bytes transferred per callback
    #[arg(long, default_value = "1024")]
    chunk_bytes: usize,

    /// Abort on the first failed init step instead of continuing
    #[arg(long)]
    fail_fast: bool,

    /// Skip locking the DMA buffer into resident memory
    #[arg(long)]
    no_mlock: bool,

    /// Pause and resume halfway through playback
    #[arg(long)]
    exercise_pause: bool,

    /// Show verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    }

    let config = OutputConfig {
        buffer_frames: cli.buffer_frames,
        chunk_bytes: cli.chunk_bytes,
        policy: if cli.fail_fast {
            InitPolicy::FailFast
        } else {
            InitPolicy::BestEffort
        },
        lock_memory: !cli.no_mlock,
        ..OutputConfig::default()
    };

    let mut transport = Transport::new(config);
    if !transport.init() {
        return Err(anyhow::anyhow!("Audio output initialization failed"));
    }

    let format = transport
        .format()
        .ok_or_else(|| anyhow::anyhow!("No output format negotiated"))?;
    let dma = transport
        .dma()
        .ok_or_else(|| anyhow::anyhow!("No DMA buffer allocated"))?;
    let stats = transport.stats();

    println!("Sndout - PCM transport demo");
    println!(
        "Format: {} | Buffer: {} frames | Chunk: {} bytes | Signal: {}",
        format,
        dma.frames(),
        cli.chunk_bytes,
        if cli.noise {
            "noise".to_string()
        } else {
            format!("{:.0}Hz sine", cli.freq)
        }
    );
    println!("Press Ctrl+C to stop.\n");

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    // 信号发生器状态
    let mut phase: f64 = 0.0;
    let phase_step = 2.0 * std::f64::consts::PI * cli.freq / format.sample_rate as f64;
    let mut rng = rand::thread_rng();

    // 写入推进状态：游标解环绕，总量单调递增
    let frames = dma.frames();
    let frame_size = dma.frame_size();
    let mut last_pos = 0usize;
    let mut consumed: u64 = 0;
    let mut written: u64 = 0;
    let lead = (frames / 2) as u64;
    let mut block = vec![0u8; WRITE_BLOCK_FRAMES * frame_size];

    let start = Instant::now();
    let deadline = Duration::from_secs(cli.seconds);
    let mut pause_exercised = false;

    while running.load(Ordering::SeqCst) && start.elapsed() < deadline {
        let pos = transport.position();
        let delta = if pos >= last_pos {
            pos - last_pos
        } else {
            frames - last_pos + pos
        };
        consumed += delta as u64;
        last_pos = pos;

        // 补写到领先半个缓冲区
        let target = consumed + lead;
        while written < target {
            if cli.noise {
                fill_noise(&mut block, &mut rng);
            } else {
                fill_sine(&mut block, &mut phase, phase_step);
            }
            let offset = (written as usize % frames) * frame_size;
            transport.begin_painting();
            dma.write_bytes(offset, &block);
            transport.submit();
            written += WRITE_BLOCK_FRAMES as u64;
        }

        if cli.exercise_pause && !pause_exercised && start.elapsed() >= deadline / 2 {
            println!("\n--- Pausing for 300ms ---");
            transport.pause(true);
            thread::sleep(Duration::from_millis(300));
            transport.pause(false);
            pause_exercised = true;
        }

        print!(
            "\r  {:5.1}s | Cursor: {:6} | Callbacks: {:7} | Wraps: {:4}  ",
            start.elapsed().as_secs_f64(),
            pos,
            stats.callback_count(),
            stats.wrap_count()
        );
        io::stdout().flush()?;

        thread::sleep(Duration::from_millis(50));
    }

    println!();
    transport.shutdown();

    println!("\n{}", stats.report());

    Ok(())
}

/// 生成一块立体声正弦信号
fn fill_sine(block: &mut [u8], phase: &mut f64, step: f64) {
    for frame in block.chunks_exact_mut(4) {
        let value = (phase.sin() * TONE_AMPLITUDE) as i16;
        let bytes = value.to_le_bytes();
        frame[0] = bytes[0];
        frame[1] = bytes[1];
        frame[2] = bytes[0];
        frame[3] = bytes[1];

        *phase += step;
        if *phase >= 2.0 * std::f64::consts::PI {
            *phase -= 2.0 * std::f64::consts::PI;
        }
    }
}

/// 生成一块立体声白噪声
fn fill_noise(block: &mut [u8], rng: &mut impl Rng) {
    for frame in block.chunks_exact_mut(4) {
        let value: i16 = rng.gen_range(-8000..=8000);
        let bytes = value.to_le_bytes();
        frame[0] = bytes[0];
        frame[1] = bytes[1];
        frame[2] = bytes[0];
        frame[3] = bytes[1];
    }
}
