//! # Streaming Configuration
//!
//! Configuration and statistics types for the streaming playback pipeline.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Streaming pipeline configuration.
///
/// Controls the pending-packet limit that bounds producer memory, the read
/// granularity of the parsing loop, and the retry delay used while waiting
/// for the download to catch up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Maximum number of parsed packets held in the pending queue before the
    /// parsing loop yields to the backpressure gate.
    ///
    /// Bounds memory to O(limit) packets. Default: 50.
    #[serde(default = "default_packet_queue_limit")]
    pub packet_queue_limit: usize,

    /// Number of bytes requested from the stream buffer per parse step.
    ///
    /// Larger values reduce parser call overhead but delay format detection.
    /// Default: 20 KiB.
    #[serde(default = "default_read_chunk_bytes")]
    pub read_chunk_bytes: usize,

    /// Fixed delay before re-polling the stream buffer after a short read.
    ///
    /// Default: 100 ms.
    #[serde(default = "default_retry_delay")]
    pub retry_delay: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            packet_queue_limit: default_packet_queue_limit(),
            read_chunk_bytes: default_read_chunk_bytes(),
            retry_delay: default_retry_delay(),
        }
    }
}

impl StreamConfig {
    /// Configuration tuned for fast startup on thin streams.
    ///
    /// - Shallower packet queue
    /// - Smaller reads so the format is detected sooner
    /// - Shorter retry delay
    pub fn low_latency() -> Self {
        Self {
            packet_queue_limit: 16,
            read_chunk_bytes: 4 * 1024,
            retry_delay: Duration::from_millis(25),
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> crate::Result<()> {
        if self.packet_queue_limit == 0 {
            return Err(crate::StreamAudioError::InvalidConfig(
                "packet_queue_limit must be > 0".to_string(),
            ));
        }

        if self.read_chunk_bytes == 0 {
            return Err(crate::StreamAudioError::InvalidConfig(
                "read_chunk_bytes must be > 0".to_string(),
            ));
        }

        if self.retry_delay.is_zero() {
            return Err(crate::StreamAudioError::InvalidConfig(
                "retry_delay must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn default_packet_queue_limit() -> usize {
    50
}

fn default_read_chunk_bytes() -> usize {
    20 * 1024
}

fn default_retry_delay() -> Duration {
    Duration::from_millis(100)
}

/// Snapshot of pipeline counters.
///
/// Updated by the producer loop and the fill callback; read via
/// [`crate::pipeline::StreamingPlayer::stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Total bytes appended to the stream buffer.
    pub bytes_ingested: u64,
    /// Total packets produced by the parser and queued.
    pub packets_parsed: u64,
    /// Total packets handed to the output device.
    pub packets_delivered: u64,
    /// Times the fill callback ran dry and paused playback.
    pub pause_events: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = StreamConfig::default();
        assert_eq!(config.packet_queue_limit, 50);
        assert_eq!(config.read_chunk_bytes, 20 * 1024);
        assert_eq!(config.retry_delay, Duration::from_millis(100));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_low_latency_preset() {
        let low = StreamConfig::low_latency();
        let default = StreamConfig::default();
        assert!(low.packet_queue_limit < default.packet_queue_limit);
        assert!(low.read_chunk_bytes < default.read_chunk_bytes);
        assert!(low.retry_delay < default.retry_delay);
        assert!(low.validate().is_ok());
    }

    #[test]
    fn config_rejects_zero_values() {
        let config = StreamConfig {
            packet_queue_limit: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = StreamConfig {
            read_chunk_bytes: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = StreamConfig {
            retry_delay: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn stats_default_is_zeroed() {
        let stats = StreamStats::default();
        assert_eq!(stats.bytes_ingested, 0);
        assert_eq!(stats.packets_parsed, 0);
        assert_eq!(stats.packets_delivered, 0);
        assert_eq!(stats.pause_events, 0);
    }
}
