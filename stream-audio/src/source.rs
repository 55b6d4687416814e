//! # Byte Source Pump
//!
//! Bridges an asynchronous [`ByteSource`] (the network side) onto the
//! pipeline's write path. The pump pulls chunks until the source reports
//! completion or fails, and finishes the stream buffer in **both** cases:
//! a failed download still flushes whatever was parsed, so audio that
//! already reached the queue plays out instead of being undone.

use crate::pipeline::StreamingPlayer;
use crate::traits::ByteSource;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Spawn a task pumping `source` into `player`.
///
/// The returned handle can be awaited to observe when delivery finished; the
/// pipeline itself does not need it. Source failures are recorded on the
/// player and surface through [`StreamingPlayer::wait_for_stop`].
pub fn pump(player: Arc<StreamingPlayer>, mut source: Box<dyn ByteSource>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match source.next_chunk().await {
                Ok(Some(chunk)) => {
                    debug!(bytes = chunk.len(), "received stream data");
                    if let Err(err) = player.write_data(chunk) {
                        // StreamClosed means the consumer side already
                        // finished the stream; that is not a failure worth
                        // surfacing to waiters.
                        error!(%err, "write to stream buffer failed");
                        if !err.is_fatal_to_write_path() {
                            player.record_source_error(err);
                        }
                        break;
                    }
                }
                Ok(None) => {
                    debug!("byte source complete");
                    break;
                }
                Err(err) => {
                    error!(%err, "byte source failed");
                    player.record_source_error(err);
                    break;
                }
            }
        }
        player.finish_data();
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamConfig;
    use crate::error::{Result, StreamAudioError};
    use crate::traits::{
        AudioFormat, AudioPacket, OutputDevice, OutputDeviceFactory, StreamParser,
    };
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::VecDeque;

    struct ScriptedSource {
        chunks: VecDeque<Result<Option<Bytes>>>,
    }

    #[async_trait]
    impl ByteSource for ScriptedSource {
        async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
            self.chunks.pop_front().unwrap_or(Ok(None))
        }
    }

    struct NeverReadyParser;

    impl StreamParser for NeverReadyParser {
        fn parse(&mut self, _chunk: &[u8]) -> Result<Vec<AudioPacket>> {
            Ok(Vec::new())
        }
        fn is_format_ready(&self) -> bool {
            false
        }
        fn detected_format(&self) -> Option<AudioFormat> {
            None
        }
    }

    struct NoDeviceFactory;

    impl OutputDeviceFactory for NoDeviceFactory {
        fn open(
            &self,
            _format: &AudioFormat,
            _feed: Arc<crate::pipeline::PacketFeed>,
        ) -> Result<Box<dyn OutputDevice>> {
            unreachable!("parser never becomes ready")
        }
    }

    fn player() -> Arc<StreamingPlayer> {
        Arc::new(
            StreamingPlayer::new(
                Box::new(NeverReadyParser),
                Box::new(NoDeviceFactory),
                StreamConfig::default(),
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn pump_delivers_all_chunks_then_finishes() {
        let player = player();
        let source = ScriptedSource {
            chunks: VecDeque::from([
                Ok(Some(Bytes::from_static(b"abc"))),
                Ok(Some(Bytes::from_static(b"defg"))),
                Ok(None),
            ]),
        };

        pump(Arc::clone(&player), Box::new(source)).await.unwrap();

        assert_eq!(player.stats().bytes_ingested, 7);
        let mut reader = player.new_reader();
        match reader.read_exact(7) {
            crate::buffer::ReadChunk::Data(data) => {
                assert_eq!(data, Bytes::from_static(b"abcdefg"));
            }
            other => panic!("expected data, got {:?}", other),
        }
        // Buffer is finished: the pump closed it.
        assert!(matches!(
            reader.read_exact(1),
            crate::buffer::ReadChunk::Eof
        ));
    }

    #[tokio::test]
    async fn pump_finishes_buffer_on_source_failure() {
        let player = player();
        let source = ScriptedSource {
            chunks: VecDeque::from([
                Ok(Some(Bytes::from_static(b"partial"))),
                Err(StreamAudioError::Source("connection reset".into())),
            ]),
        };

        pump(Arc::clone(&player), Box::new(source)).await.unwrap();

        // Received bytes were flushed and the stream was closed.
        assert_eq!(player.stats().bytes_ingested, 7);
        assert_eq!(
            player.write_data(Bytes::from_static(b"late")),
            Err(StreamAudioError::StreamClosed)
        );
    }
}
