//! # Collaborator Contracts
//!
//! Shared types and the trait seams between the streaming core and its three
//! external collaborators: the format parser, the output device, and the byte
//! source.
//!
//! ## Architecture
//!
//! The core runs a **producer-consumer model**:
//!
//! - **Producer (background task)**: reads raw bytes from the append-only
//!   stream buffer, hands them to a [`StreamParser`], and pushes the resulting
//!   packets into the bounded pending queue.
//! - **Consumer (output device)**: a platform audio engine that pulls one
//!   packet at a time through [`crate::pipeline::PacketFeed`] from its own
//!   scheduling context, potentially a real-time priority thread.
//!
//! ## Threading Model
//!
//! Parser calls happen only on the background task, so [`StreamParser`] needs
//! `Send` but takes `&mut self`. Device calls can arrive from the public API,
//! the background task, and the device's own callback thread, so
//! [`OutputDevice`] is `Send + Sync` and must answer without blocking.

use crate::error::Result;
use crate::pipeline::PacketFeed;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ============================================================================
// Audio Format Types
// ============================================================================

/// Source codec of the encoded stream, as detected by the parser.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    /// MPEG-1 Audio Layer 3
    Mp3,
    /// Advanced Audio Coding (AAC/M4A)
    Aac,
    /// Free Lossless Audio Codec
    Flac,
    /// Waveform Audio File Format
    Wav,
    /// Codec not recognized
    Unknown,
    /// Custom or proprietary codec
    Other(String),
}

impl AudioCodec {
    /// Returns `true` if this is a lossless codec.
    pub fn is_lossless(&self) -> bool {
        matches!(self, AudioCodec::Flac | AudioCodec::Wav)
    }
}

/// Format descriptor the parser extracts from the container.
///
/// Carries everything the output device needs to configure itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Source codec (before decoding).
    pub codec: AudioCodec,
    /// Sample rate in Hz (e.g., 44100, 48000).
    pub sample_rate: u32,
    /// Number of audio channels (1 = mono, 2 = stereo, ...).
    pub channels: u16,
    /// Bits per sample in the source format, when meaningful.
    pub bits_per_sample: Option<u16>,
    /// Average bitrate in bits per second, for lossy codecs.
    pub bitrate: Option<u32>,
}

impl AudioFormat {
    /// Create a new format descriptor.
    pub fn new(
        codec: AudioCodec,
        sample_rate: u32,
        channels: u16,
        bits_per_sample: Option<u16>,
        bitrate: Option<u32>,
    ) -> Self {
        Self {
            codec,
            sample_rate,
            channels,
            bits_per_sample,
            bitrate,
        }
    }

    /// Standard CD quality (44.1 kHz, 16-bit stereo PCM).
    pub fn cd_quality() -> Self {
        Self {
            codec: AudioCodec::Wav,
            sample_rate: 44100,
            channels: 2,
            bits_per_sample: Some(16),
            bitrate: None,
        }
    }
}

// ============================================================================
// Packet Types
// ============================================================================

/// Placement metadata for one packet inside a variable-bitrate stream.
///
/// Constant-bitrate formats have no per-packet metadata and leave this out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketDescription {
    /// Byte offset of the packet within the parsed audio data.
    pub start_offset: i64,
    /// Frames in this packet when it differs per packet, 0 otherwise.
    pub variable_frames: u32,
    /// Size of the packet payload in bytes.
    pub byte_size: u32,
}

/// A discrete, independently decodable unit of encoded audio produced by the
/// format parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPacket {
    /// Encoded payload bytes.
    pub data: Bytes,
    /// Per-packet placement metadata, for variable-bitrate formats.
    pub description: Option<PacketDescription>,
}

impl AudioPacket {
    /// Create a packet without per-packet metadata.
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            description: None,
        }
    }

    /// Create a packet with placement metadata.
    pub fn with_description(data: Bytes, description: PacketDescription) -> Self {
        Self {
            data,
            description: Some(description),
        }
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the packet carries no payload.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Answer to one fill-callback request from the output device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FillData {
    /// The next packet in playback order.
    HasMoreData(AudioPacket),
    /// The queue is empty but more input is still being parsed; the device
    /// should pause until new data is announced.
    NoDataYet,
    /// The queue is empty and all input has been parsed; the device should
    /// flush and stop.
    Eof,
}

// ============================================================================
// Collaborator Traits
// ============================================================================

/// Incremental container parser.
///
/// Fed raw bytes in arrival order by the background task. The parser may
/// buffer internally and produce zero packets for many calls until it has
/// seen enough of the container to recognize the audio format; once
/// [`StreamParser::is_format_ready`] turns `true` it never reverts.
pub trait StreamParser: Send {
    /// Parse the next chunk of raw bytes, returning any packets recognized.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StreamAudioError::Parser`] if the input is malformed.
    /// A parse error terminates the background loop; packets already queued
    /// still play out.
    fn parse(&mut self, chunk: &[u8]) -> Result<Vec<AudioPacket>>;

    /// Returns `true` once enough input has arrived to describe the stream.
    fn is_format_ready(&self) -> bool;

    /// The detected format descriptor. `None` until
    /// [`StreamParser::is_format_ready`] is `true`.
    fn detected_format(&self) -> Option<AudioFormat>;
}

/// Platform audio output driving playback of queued packets.
///
/// Implementations own the device-side buffer management and invoke
/// [`PacketFeed::on_fill_data`] from their own scheduling context whenever
/// they need the next packet. Control calls must be fast and non-blocking.
pub trait OutputDevice: Send + Sync {
    /// Start or resume audio output.
    fn start(&self) -> Result<()>;

    /// Pause output, preserving position. The device keeps its buffers.
    fn pause(&self) -> Result<()>;

    /// Stop output. With `immediate` set, discard buffered audio; otherwise
    /// flush what has already been handed over before stopping.
    fn stop(&self, immediate: bool) -> Result<()>;
}

/// Constructs an [`OutputDevice`] once the stream format is known.
///
/// The core calls this exactly once, on the background task, the first time
/// the parser reports a recognized format. The returned device must pull its
/// data exclusively through the provided feed.
pub trait OutputDeviceFactory: Send + Sync {
    /// Open an output device for the detected format.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StreamAudioError::Device`] if the device cannot be
    /// created; the error is surfaced through `play()`/`wait_for_stop()`.
    fn open(&self, format: &AudioFormat, feed: Arc<PacketFeed>) -> Result<Box<dyn OutputDevice>>;
}

/// Asynchronous producer of raw stream bytes (the network side).
///
/// The core does not perform any I/O itself; a byte source is pumped into the
/// stream buffer by [`crate::source::pump`].
#[async_trait]
pub trait ByteSource: Send {
    /// Pull the next chunk of bytes.
    ///
    /// Returns `Ok(None)` when the stream is complete.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StreamAudioError::Source`] on delivery failure. The
    /// buffer is still finished so already-received audio plays out.
    async fn next_chunk(&mut self) -> Result<Option<Bytes>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_codec_classification() {
        assert!(AudioCodec::Flac.is_lossless());
        assert!(AudioCodec::Wav.is_lossless());
        assert!(!AudioCodec::Mp3.is_lossless());
        assert!(!AudioCodec::Unknown.is_lossless());
    }

    #[test]
    fn audio_format_cd_preset() {
        let cd = AudioFormat::cd_quality();
        assert_eq!(cd.sample_rate, 44100);
        assert_eq!(cd.channels, 2);
        assert_eq!(cd.bits_per_sample, Some(16));
    }

    #[test]
    fn packet_construction() {
        let plain = AudioPacket::new(Bytes::from_static(b"abcd"));
        assert_eq!(plain.len(), 4);
        assert!(plain.description.is_none());
        assert!(!plain.is_empty());

        let described = AudioPacket::with_description(
            Bytes::from_static(b"ab"),
            PacketDescription {
                start_offset: 128,
                variable_frames: 0,
                byte_size: 2,
            },
        );
        assert_eq!(described.description.unwrap().byte_size, 2);
    }
}
