//! # Stream Audio
//!
//! Streaming audio playback core: plays a remotely fetched bytestream while
//! the download is still in progress.
//!
//! ## Overview
//!
//! This crate handles:
//! - An append-only stream buffer with independent replay readers
//! - A backpressure-gated background parsing loop
//! - A bounded pending-packet queue feeding the output device
//! - The playback lifecycle state machine (created → playing → paused →
//!   stopping → stopped → disposed)
//!
//! The network source, the container parser, and the platform output device
//! are external collaborators injected through the traits in [`traits`].

pub mod buffer;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod pipeline;
pub mod queue;
pub mod source;
pub mod traits;

pub use buffer::{ReadChunk, StreamBuffer, StreamBufferReader};
pub use config::{StreamConfig, StreamStats};
pub use error::{Result, StreamAudioError};
pub use lifecycle::{PlaybackController, PlaybackState};
pub use pipeline::{PacketFeed, StreamingPlayer};
pub use queue::{BackpressureGate, PacketQueue, PoppedPacket};
pub use traits::{
    AudioCodec, AudioFormat, AudioPacket, ByteSource, FillData, OutputDevice,
    OutputDeviceFactory, PacketDescription, StreamParser,
};
