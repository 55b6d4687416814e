//! # Playback Lifecycle
//!
//! State machine tying playback control calls, the background parsing task,
//! and the output device together under concurrent access.
//!
//! ## Threading Model
//!
//! Three contexts touch the controller: public API callers, the background
//! parsing task (via [`PlaybackController::notify_new_data`]), and the output
//! device's fill-callback thread (pause on underrun, stop on EOF). The current
//! state sits behind its own short-lived mutex and no lock is held across a
//! call into the device, so a control call arriving from inside a device
//! callback cannot deadlock.
//!
//! Control calls that race naturally at end-of-stream (`play`/`pause`/`stop`
//! against an already stopped or disposed controller) are debug-logged no-ops,
//! never errors. Calling `play()` while already playing is a genuine caller
//! bug and fails with [`StreamAudioError::InvalidStateTransition`].

use crate::error::{Result, StreamAudioError};
use crate::traits::OutputDevice;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Current lifecycle state of a playback session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// Device exists but has never started.
    Created,
    /// Audio output is running.
    Playing,
    /// Output paused waiting for new data (or by explicit request).
    Paused,
    /// Stop requested; the device is flushing.
    Stopping,
    /// Output fully stopped. `play()` is a no-op from here.
    Stopped,
    /// Terminal: the device has been released.
    Disposed,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaybackState::Created => "created",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Stopping => "stopping",
            PlaybackState::Stopped => "stopped",
            PlaybackState::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

/// Lifecycle state machine wrapping one [`OutputDevice`].
///
/// Created by the orchestrator once the stream format has been detected.
pub struct PlaybackController {
    state: Mutex<PlaybackState>,
    device: Mutex<Option<Arc<dyn OutputDevice>>>,
    stopped_tx: Arc<watch::Sender<bool>>,
}

impl PlaybackController {
    /// Wrap a freshly opened device. The stopped signal resolves once the
    /// controller reaches `Stopped` or `Disposed`.
    pub fn new(device: Box<dyn OutputDevice>, stopped_tx: Arc<watch::Sender<bool>>) -> Self {
        Self {
            state: Mutex::new(PlaybackState::Created),
            device: Mutex::new(Some(Arc::from(device))),
            stopped_tx,
        }
    }

    /// Current state snapshot.
    pub fn state(&self) -> PlaybackState {
        *self.state.lock()
    }

    /// Start (or resume) audio output.
    ///
    /// # Errors
    ///
    /// [`StreamAudioError::InvalidStateTransition`] if already playing;
    /// [`StreamAudioError::Device`] if the device fails to start.
    pub fn play(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            match *state {
                PlaybackState::Created | PlaybackState::Paused => {
                    *state = PlaybackState::Playing;
                }
                PlaybackState::Playing => {
                    return Err(StreamAudioError::InvalidStateTransition {
                        from: PlaybackState::Playing,
                        operation: "play",
                    });
                }
                terminal @ (PlaybackState::Stopping
                | PlaybackState::Stopped
                | PlaybackState::Disposed) => {
                    debug!(state = %terminal, "play ignored");
                    return Ok(());
                }
            }
        }

        info!("starting audio output");
        self.with_device("play", |device| device.start())?;
        Ok(())
    }

    /// Pause output, keeping the session resumable.
    pub fn pause(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != PlaybackState::Playing {
                debug!(state = %*state, "pause ignored");
                return Ok(());
            }
            *state = PlaybackState::Paused;
        }

        debug!("pausing audio output");
        self.with_device("pause", |device| device.pause())?;
        Ok(())
    }

    /// Edge-triggered resume: new packets arrived while paused.
    ///
    /// Called by the parsing loop after every push, so a consumer that ran
    /// dry picks back up without any caller intervention.
    pub fn notify_new_data(&self) -> Result<()> {
        if self.state() == PlaybackState::Paused {
            debug!("new data while paused, resuming");
            return self.play();
        }
        Ok(())
    }

    /// Stop output. With `immediate` set, buffered audio is discarded;
    /// otherwise the device flushes what it already holds.
    ///
    /// Always resolves the stopped signal, even if the device errors.
    pub fn stop(&self, immediate: bool) -> Result<()> {
        {
            let mut state = self.state.lock();
            match *state {
                PlaybackState::Stopping | PlaybackState::Stopped | PlaybackState::Disposed => {
                    debug!(state = %*state, "stop ignored");
                    return Ok(());
                }
                PlaybackState::Created => {
                    // Nothing ever started; skip the device flush.
                    *state = PlaybackState::Stopped;
                    drop(state);
                    self.signal_stopped();
                    return Ok(());
                }
                PlaybackState::Playing | PlaybackState::Paused => {
                    *state = PlaybackState::Stopping;
                }
            }
        }

        info!(immediate, "stopping audio output");
        let result = self.with_device("stop", |device| device.stop(immediate));

        *self.state.lock() = PlaybackState::Stopped;
        self.signal_stopped();
        result
    }

    /// Terminal teardown: release the device. Irreversible.
    pub fn dispose(&self) {
        {
            let mut state = self.state.lock();
            if *state == PlaybackState::Disposed {
                debug!("dispose ignored, already disposed");
                return;
            }
            *state = PlaybackState::Disposed;
        }

        debug!("disposing output device");
        self.device.lock().take();
        self.signal_stopped();
    }

    fn signal_stopped(&self) {
        self.stopped_tx.send_replace(true);
    }

    /// Run a control call against the device without holding any lock across
    /// it. The device slot is only empty after dispose.
    fn with_device<F>(&self, operation: &'static str, f: F) -> Result<()>
    where
        F: FnOnce(&dyn OutputDevice) -> Result<()>,
    {
        let device = self.device.lock().clone();
        match device {
            Some(device) => f(device.as_ref()).map_err(|err| {
                warn!(operation, %err, "output device call failed");
                err
            }),
            None => {
                debug!(operation, "no device attached, ignoring");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingDevice {
        calls: Mutex<Vec<String>>,
        fail_start: bool,
    }

    impl RecordingDevice {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    impl OutputDevice for RecordingDevice {
        fn start(&self) -> Result<()> {
            if self.fail_start {
                return Err(StreamAudioError::Device("start refused".into()));
            }
            self.calls.lock().push("start".into());
            Ok(())
        }

        fn pause(&self) -> Result<()> {
            self.calls.lock().push("pause".into());
            Ok(())
        }

        fn stop(&self, immediate: bool) -> Result<()> {
            self.calls.lock().push(format!("stop({immediate})"));
            Ok(())
        }
    }

    fn controller_with_device(
        device: Arc<RecordingDevice>,
    ) -> (PlaybackController, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        let controller = PlaybackController::new(
            Box::new(SharedDevice(device)) as Box<dyn OutputDevice>,
            Arc::new(tx),
        );
        (controller, rx)
    }

    // Lets the test keep a handle to the device the controller owns.
    struct SharedDevice(Arc<RecordingDevice>);

    impl OutputDevice for SharedDevice {
        fn start(&self) -> Result<()> {
            self.0.start()
        }
        fn pause(&self) -> Result<()> {
            self.0.pause()
        }
        fn stop(&self, immediate: bool) -> Result<()> {
            self.0.stop(immediate)
        }
    }

    #[test]
    fn created_to_playing_on_play() {
        let device = Arc::new(RecordingDevice::default());
        let (controller, _rx) = controller_with_device(Arc::clone(&device));

        assert_eq!(controller.state(), PlaybackState::Created);
        controller.play().unwrap();
        assert_eq!(controller.state(), PlaybackState::Playing);
        assert_eq!(device.calls(), vec!["start"]);
    }

    #[test]
    fn double_play_is_an_error() {
        let device = Arc::new(RecordingDevice::default());
        let (controller, _rx) = controller_with_device(device);

        controller.play().unwrap();
        let err = controller.play().unwrap_err();
        assert_eq!(
            err,
            StreamAudioError::InvalidStateTransition {
                from: PlaybackState::Playing,
                operation: "play",
            }
        );
    }

    #[test]
    fn pause_then_notify_new_data_resumes() {
        let device = Arc::new(RecordingDevice::default());
        let (controller, _rx) = controller_with_device(Arc::clone(&device));

        controller.play().unwrap();
        controller.pause().unwrap();
        assert_eq!(controller.state(), PlaybackState::Paused);

        controller.notify_new_data().unwrap();
        assert_eq!(controller.state(), PlaybackState::Playing);
        assert_eq!(device.calls(), vec!["start", "pause", "start"]);
    }

    #[test]
    fn notify_new_data_is_a_no_op_while_playing() {
        let device = Arc::new(RecordingDevice::default());
        let (controller, _rx) = controller_with_device(Arc::clone(&device));

        controller.play().unwrap();
        controller.notify_new_data().unwrap();
        assert_eq!(device.calls(), vec!["start"]);
    }

    #[test]
    fn stop_flushes_and_signals() {
        let device = Arc::new(RecordingDevice::default());
        let (controller, rx) = controller_with_device(Arc::clone(&device));

        controller.play().unwrap();
        controller.stop(false).unwrap();
        assert_eq!(controller.state(), PlaybackState::Stopped);
        assert!(*rx.borrow());
        assert_eq!(device.calls(), vec!["start", "stop(false)"]);

        // End-of-stream races arrive as repeated calls; all ignored.
        controller.stop(true).unwrap();
        controller.play().unwrap();
        controller.pause().unwrap();
        assert_eq!(controller.state(), PlaybackState::Stopped);
        assert_eq!(device.calls(), vec!["start", "stop(false)"]);
    }

    #[test]
    fn stop_before_start_skips_the_device() {
        let device = Arc::new(RecordingDevice::default());
        let (controller, rx) = controller_with_device(Arc::clone(&device));

        controller.stop(true).unwrap();
        assert_eq!(controller.state(), PlaybackState::Stopped);
        assert!(*rx.borrow());
        assert!(device.calls().is_empty());
    }

    #[test]
    fn dispose_is_terminal() {
        let device = Arc::new(RecordingDevice::default());
        let (controller, rx) = controller_with_device(device);

        controller.dispose();
        assert_eq!(controller.state(), PlaybackState::Disposed);
        assert!(*rx.borrow());

        // Nothing revives a disposed controller.
        controller.play().unwrap();
        controller.stop(true).unwrap();
        assert_eq!(controller.state(), PlaybackState::Disposed);
    }

    #[test]
    fn failed_device_start_propagates() {
        let (tx, _rx) = watch::channel(false);
        let controller = PlaybackController::new(
            Box::new(RecordingDevice {
                fail_start: true,
                ..Default::default()
            }),
            Arc::new(tx),
        );

        let err = controller.play().unwrap_err();
        assert_eq!(err, StreamAudioError::Device("start refused".into()));
    }
}
