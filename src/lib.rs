//! Sndout Library
//!
//! Fixed-latency audio output transport bridging a PCM ring buffer
//! to a pull-callback native audio subsystem.

#![allow(dead_code, unused_mut)]

pub mod audio;
pub mod stream;
pub mod transport;
