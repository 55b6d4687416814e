//! # Streaming Orchestrator
//!
//! Composes the stream buffer, the pending-packet queue, the backpressure
//! gate, and the playback lifecycle into a playing pipeline. Runs as a pure
//! async component: one long-lived background task reads buffered bytes,
//! feeds the format parser, and queues packets; the output device pulls them
//! back out through [`PacketFeed`] from its own scheduling context.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        network side (ByteSource)        │
//! │   write_data / finish_data              │
//! └────────────┬────────────────────────────┘
//!              │ raw bytes
//!              ▼
//! ┌─────────────────────────────────────────┐
//! │  StreamBuffer ──▶ background task       │
//! │  reader ──▶ StreamParser ──▶ packets    │
//! └────────────┬────────────────────────────┘
//!              │ AudioPacket (gated)
//!              ▼
//! ┌─────────────────────────────────────────┐
//! │  PacketQueue ──▶ PacketFeed             │
//! │  (device fill callback, own thread)     │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Cancellation
//!
//! The background task checks its token at every loop iteration and inside
//! both suspension points (gate acquisition and the retry delay). Whatever
//! path the task exits through, `mark_all_input_parsed` runs so a blocked
//! consumer observes EOF instead of hanging, and both the ready and stopped
//! signals resolve so no public waiter is left suspended.

use crate::buffer::{ReadChunk, StreamBuffer, StreamBufferReader};
use crate::config::{StreamConfig, StreamStats};
use crate::error::{Result, StreamAudioError};
use crate::lifecycle::{PlaybackController, PlaybackState};
use crate::queue::{BackpressureGate, PacketQueue, PoppedPacket};
use crate::traits::{FillData, OutputDeviceFactory, StreamParser};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// ============================================================================
// Fill-Callback Surface
// ============================================================================

/// The output device's view of the pipeline.
///
/// Handed to [`OutputDeviceFactory::open`]; the device calls
/// [`PacketFeed::on_fill_data`] whenever it wants the next packet, from
/// whatever thread its engine schedules. Every call is non-blocking: one
/// queue pop, one gate release, and at most one state nudge.
pub struct PacketFeed {
    queue: Arc<PacketQueue>,
    gate: Arc<BackpressureGate>,
    controller: OnceLock<Weak<PlaybackController>>,
    stats: Arc<Mutex<StreamStats>>,
}

impl PacketFeed {
    fn new(
        queue: Arc<PacketQueue>,
        gate: Arc<BackpressureGate>,
        stats: Arc<Mutex<StreamStats>>,
    ) -> Self {
        Self {
            queue,
            gate,
            controller: OnceLock::new(),
            stats,
        }
    }

    pub(crate) fn bind_controller(&self, controller: &Arc<PlaybackController>) {
        let _ = self.controller.set(Arc::downgrade(controller));
    }

    fn controller(&self) -> Option<Arc<PlaybackController>> {
        self.controller.get().and_then(Weak::upgrade)
    }

    /// Answer one fill request from the output device.
    ///
    /// - [`FillData::HasMoreData`]: the oldest packet, in parse order.
    /// - [`FillData::NoDataYet`]: queue ran dry mid-stream; playback pauses
    ///   and resumes automatically when new packets arrive.
    /// - [`FillData::Eof`]: all input parsed and drained; playback stops with
    ///   a flush.
    pub fn on_fill_data(&self) -> FillData {
        match self.queue.pop_front() {
            PoppedPacket::Packet(packet) => {
                self.gate.release();
                self.stats.lock().packets_delivered += 1;
                FillData::HasMoreData(packet)
            }
            PoppedPacket::Pending => {
                // Wake a gate-blocked producer even though nothing was
                // popped; the consumer is out of work until it does.
                self.gate.release();
                self.stats.lock().pause_events += 1;
                if let Some(controller) = self.controller() {
                    if let Err(err) = controller.pause() {
                        debug!(%err, "pause from fill callback failed");
                    }
                }
                FillData::NoDataYet
            }
            PoppedPacket::Eof => {
                if let Some(controller) = self.controller() {
                    if let Err(err) = controller.stop(false) {
                        debug!(%err, "stop from fill callback failed");
                    }
                }
                FillData::Eof
            }
        }
    }

    /// Packets currently queued (diagnostics only).
    pub fn queued_packets(&self) -> usize {
        self.queue.len()
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

#[derive(Debug, Clone)]
enum ReadyState {
    Pending,
    Ready,
    Failed(StreamAudioError),
}

struct PipelineShared {
    config: StreamConfig,
    buffer: Arc<StreamBuffer>,
    queue: Arc<PacketQueue>,
    gate: Arc<BackpressureGate>,
    feed: Arc<PacketFeed>,
    controller: Mutex<Option<Arc<PlaybackController>>>,
    ready_tx: watch::Sender<ReadyState>,
    stopped_tx: Arc<watch::Sender<bool>>,
    first_error: Mutex<Option<StreamAudioError>>,
    stats: Arc<Mutex<StreamStats>>,
}

impl PipelineShared {
    fn record_error(&self, err: StreamAudioError) {
        self.first_error.lock().get_or_insert(err);
    }

    fn fail_ready(&self, err: StreamAudioError) {
        self.ready_tx.send_if_modified(|state| {
            if matches!(state, ReadyState::Pending) {
                *state = ReadyState::Failed(err);
                true
            } else {
                false
            }
        });
    }
}

/// Streams a remotely fetched audio bytestream into continuous playback
/// while the download is still in progress.
///
/// Construct one per stream with the two collaborators: a [`StreamParser`]
/// that recognizes the container, and an [`OutputDeviceFactory`] that opens
/// the platform device once the format is known. Bytes arrive through
/// [`StreamingPlayer::write_data`]; [`StreamingPlayer::play`] suspends until
/// the first audio is ready.
pub struct StreamingPlayer {
    shared: Arc<PipelineShared>,
    parser: Mutex<Option<Box<dyn StreamParser>>>,
    device_factory: Arc<dyn OutputDeviceFactory>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    ready_rx: watch::Receiver<ReadyState>,
    stopped_rx: watch::Receiver<bool>,
}

impl StreamingPlayer {
    /// Create a pipeline over the given collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`StreamAudioError::InvalidConfig`] if the configuration fails
    /// validation.
    pub fn new(
        parser: Box<dyn StreamParser>,
        device_factory: Box<dyn OutputDeviceFactory>,
        config: StreamConfig,
    ) -> Result<Self> {
        config.validate()?;

        let buffer = StreamBuffer::new();
        let queue = Arc::new(PacketQueue::new());
        let gate = Arc::new(BackpressureGate::new());
        let stats = Arc::new(Mutex::new(StreamStats::default()));
        let feed = Arc::new(PacketFeed::new(
            Arc::clone(&queue),
            Arc::clone(&gate),
            Arc::clone(&stats),
        ));
        let (ready_tx, ready_rx) = watch::channel(ReadyState::Pending);
        let (stopped_tx, stopped_rx) = watch::channel(false);

        Ok(Self {
            shared: Arc::new(PipelineShared {
                config,
                buffer,
                queue,
                gate,
                feed,
                controller: Mutex::new(None),
                ready_tx,
                stopped_tx: Arc::new(stopped_tx),
                first_error: Mutex::new(None),
                stats,
            }),
            parser: Mutex::new(Some(parser)),
            device_factory: Arc::from(device_factory),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
            ready_rx,
            stopped_rx,
        })
    }

    /// Append raw stream bytes as they arrive from the network side.
    ///
    /// # Errors
    ///
    /// [`StreamAudioError::StreamClosed`] once [`StreamingPlayer::finish_data`]
    /// has been called.
    pub fn write_data(&self, bytes: Bytes) -> Result<()> {
        let len = bytes.len() as u64;
        self.shared.buffer.append(bytes)?;
        self.shared.stats.lock().bytes_ingested += len;
        Ok(())
    }

    /// Mark the download complete (success or failure). Idempotent.
    pub fn finish_data(&self) {
        debug!("stream input finished");
        self.shared.buffer.finish();
    }

    /// Begin playback.
    ///
    /// Starts the background parsing task if it is not already running, then
    /// suspends until the parser has detected the audio format and the output
    /// device exists, then starts the device.
    ///
    /// # Errors
    ///
    /// Surfaces parser and device errors that occurred before format
    /// detection, [`StreamAudioError::Cancelled`] if the pipeline was stopped
    /// first, and [`StreamAudioError::InvalidStateTransition`] if already
    /// playing.
    pub async fn play(&self) -> Result<()> {
        self.start_background_task();

        let mut ready = self.ready_rx.clone();
        let state = ready
            .wait_for(|state| !matches!(state, ReadyState::Pending))
            .await
            .map_err(|_| StreamAudioError::Internal("pipeline dropped while waiting".into()))?
            .clone();

        match state {
            ReadyState::Ready => {}
            ReadyState::Failed(err) => return Err(err),
            ReadyState::Pending => unreachable!("wait_for filters the pending state"),
        }

        let controller = self
            .shared
            .controller
            .lock()
            .clone()
            .ok_or_else(|| StreamAudioError::Internal("ready without a controller".into()))?;
        controller.play()
    }

    /// Stop playback and cancel the background task cooperatively.
    ///
    /// Buffered device audio is discarded (immediate stop). Safe to call at
    /// any time, including after the stream already ended.
    pub fn stop(&self) -> Result<()> {
        info!("stop requested");
        self.cancel.cancel();

        let controller = self.shared.controller.lock().clone();
        match controller {
            Some(controller) => controller.stop(true),
            None => {
                // No device ever existed; resolve the stop signal ourselves.
                self.shared.stopped_tx.send_replace(true);
                Ok(())
            }
        }
    }

    /// Suspend until playback has fully stopped.
    ///
    /// # Errors
    ///
    /// Surfaces the first background parser/device/source error; cooperative
    /// cancellation resolves as `Ok`.
    pub async fn wait_for_stop(&self) -> Result<()> {
        let mut stopped = self.stopped_rx.clone();
        stopped
            .wait_for(|stopped| *stopped)
            .await
            .map_err(|_| StreamAudioError::Internal("pipeline dropped while waiting".into()))?;

        match self.shared.first_error.lock().clone() {
            Some(err) if !err.is_cancelled() => Err(err),
            _ => Ok(()),
        }
    }

    /// Record a failure observed by the byte source. The stored error
    /// surfaces through [`StreamingPlayer::wait_for_stop`].
    pub(crate) fn record_source_error(&self, err: StreamAudioError) {
        self.shared.record_error(err);
    }

    /// A fresh reader over the underlying byte stream, positioned at the
    /// start. Useful for replaying the download (e.g., caching to disk).
    pub fn new_reader(&self) -> StreamBufferReader {
        self.shared.buffer.new_reader()
    }

    /// Current lifecycle state, once the output device exists.
    pub fn playback_state(&self) -> Option<PlaybackState> {
        self.shared
            .controller
            .lock()
            .as_ref()
            .map(|controller| controller.state())
    }

    /// Snapshot of the pipeline counters.
    pub fn stats(&self) -> StreamStats {
        self.shared.stats.lock().clone()
    }

    fn start_background_task(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }

        let Some(parser) = self.parser.lock().take() else {
            // The previous task consumed the parser; nothing to restart.
            return;
        };

        debug!("starting background parsing task");
        let shared = Arc::clone(&self.shared);
        let factory = Arc::clone(&self.device_factory);
        let cancel = self.cancel.clone();
        *task = Some(tokio::spawn(run_pipeline(shared, parser, factory, cancel)));
    }
}

impl Drop for StreamingPlayer {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(controller) = self.shared.controller.lock().clone() {
            controller.dispose();
        }
    }
}

// ============================================================================
// Background Parsing Task
// ============================================================================

enum ParseProgress {
    HasMoreData,
    Eof,
}

async fn run_pipeline(
    shared: Arc<PipelineShared>,
    mut parser: Box<dyn StreamParser>,
    factory: Arc<dyn OutputDeviceFactory>,
    cancel: CancellationToken,
) {
    let reader = shared.buffer.new_reader();
    let mut result = parse_loop(&shared, parser.as_mut(), factory.as_ref(), reader, &cancel).await;

    // Guaranteed on every exit path so a blocked consumer sees EOF.
    shared.queue.mark_all_input_parsed();

    if result.is_ok() && matches!(*shared.ready_tx.borrow(), ReadyState::Pending) {
        result = Err(StreamAudioError::Parser(
            "stream ended before any audio format was detected".into(),
        ));
    }

    match &result {
        Ok(()) => {
            let stats = shared.stats.lock().clone();
            info!(
                packets_parsed = stats.packets_parsed,
                bytes_ingested = stats.bytes_ingested,
                "background parsing task finished"
            );
        }
        Err(err) if err.is_cancelled() => debug!("background parsing task cancelled"),
        Err(err) => {
            error!(%err, "background parsing task failed");
            shared.record_error(err.clone());
        }
    }

    if let Err(err) = result {
        // Unblock play() callers who were still waiting on format detection.
        shared.fail_ready(err);
    }

    let controller = shared.controller.lock().clone();
    match controller {
        Some(controller) => {
            if shared.queue.is_empty() {
                // Nothing left to flush; stop directly. Already-played audio
                // is not undone.
                if let Err(err) = controller.stop(false) {
                    warn!(%err, "device stop after parse exit failed");
                }
            } else if let Err(err) = controller.notify_new_data() {
                // A paused device must wake to drain the remaining packets
                // and observe EOF on its own.
                warn!(%err, "device wake after parse exit failed");
            }
        }
        None => {
            shared.stopped_tx.send_replace(true);
        }
    }
}

async fn parse_loop(
    shared: &PipelineShared,
    parser: &mut dyn StreamParser,
    factory: &dyn OutputDeviceFactory,
    mut reader: StreamBufferReader,
    cancel: &CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Err(StreamAudioError::Cancelled),
            _ = shared.gate.acquire() => {}
        }

        match fill_packets(shared, parser, factory, &mut reader, cancel).await? {
            ParseProgress::Eof => {
                info!(total_bytes = reader.position(), "reached end of stream");
                return Ok(());
            }
            ParseProgress::HasMoreData => {}
        }
    }
}

/// One gate-permit burst: parse until the queue is over the limit or the
/// input is exhausted.
async fn fill_packets(
    shared: &PipelineShared,
    parser: &mut dyn StreamParser,
    factory: &dyn OutputDeviceFactory,
    reader: &mut StreamBufferReader,
    cancel: &CancellationToken,
) -> Result<ParseProgress> {
    while shared.queue.len() <= shared.config.packet_queue_limit {
        if cancel.is_cancelled() {
            return Err(StreamAudioError::Cancelled);
        }

        match reader.read_exact(shared.config.read_chunk_bytes) {
            ReadChunk::Eof => return Ok(ParseProgress::Eof),
            ReadChunk::Retry => {
                debug!("not enough data buffered, backing off");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(StreamAudioError::Cancelled),
                    _ = sleep(shared.config.retry_delay) => {}
                }
            }
            ReadChunk::Data(data) => handle_chunk(shared, parser, factory, &data)?,
        }
    }

    Ok(ParseProgress::HasMoreData)
}

fn handle_chunk(
    shared: &PipelineShared,
    parser: &mut dyn StreamParser,
    factory: &dyn OutputDeviceFactory,
    data: &[u8],
) -> Result<()> {
    let packets = parser.parse(data)?;

    if !parser.is_format_ready() {
        debug!(bytes = data.len(), "parsed chunk, format not detected yet");
        return Ok(());
    }

    ensure_controller(shared, parser, factory)?;

    if packets.is_empty() {
        return Ok(());
    }

    debug!(count = packets.len(), "queueing parsed packets");
    shared.stats.lock().packets_parsed += packets.len() as u64;
    shared.queue.push_all(packets);

    let controller = shared.controller.lock().clone();
    if let Some(controller) = controller {
        // Edge-triggered: a consumer that paused on empty resumes here.
        controller.notify_new_data()?;
    }
    Ok(())
}

/// On the first format-ready report, open the output device and resolve the
/// ready signal. No pipeline lock is held across the factory call.
fn ensure_controller(
    shared: &PipelineShared,
    parser: &dyn StreamParser,
    factory: &dyn OutputDeviceFactory,
) -> Result<()> {
    if shared.controller.lock().is_some() {
        return Ok(());
    }

    let format = parser
        .detected_format()
        .ok_or_else(|| StreamAudioError::Parser("format ready without a descriptor".into()))?;
    info!(codec = ?format.codec, sample_rate = format.sample_rate, channels = format.channels,
        "audio format detected, opening output device");

    let device = factory.open(&format, Arc::clone(&shared.feed))?;
    let controller = Arc::new(PlaybackController::new(
        device,
        Arc::clone(&shared.stopped_tx),
    ));
    shared.feed.bind_controller(&controller);
    *shared.controller.lock() = Some(controller);
    shared.ready_tx.send_replace(ReadyState::Ready);
    Ok(())
}
