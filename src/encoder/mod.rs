//! Video encoding: codec backend, drain loop, session clock.
//!
//! `VideoEncoder` owns the whole recording tail: it hands the compositor an
//! [`EncoderSurface`] to render into, runs the codec backend, and drives a
//! drain thread that rebases timestamps and feeds the MP4 muxer.

pub mod backend;
pub mod clock;
pub mod drain;
pub mod openh264;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::RecorderConfig;
use crate::encoder::backend::{EncoderBackend, InputFrame, InputMessage};
use crate::encoder::clock::RecordClock;
use crate::encoder::drain::{DrainHandle, DrainMessage};
use crate::encoder::openh264::OpenH264Backend;
use crate::error::CamrecResult;
use crate::mux::Mp4Muxer;
use crate::sync::{FrameGate, SignalFlag};

/// How long shutdown waits for the drain thread to finalize the container.
const FINALIZE_TIMEOUT: Duration = Duration::from_secs(10);

/// The encoder's input side, held by the compositor. Submitting a frame
/// stamps it with the session clock, queues it for encoding, and nudges the
/// drain loop.
#[derive(Clone)]
pub struct EncoderSurface {
    width: u32,
    height: u32,
    input: flume::Sender<InputMessage>,
    drain_tx: flume::Sender<DrainMessage>,
    clock: RecordClock,
}

impl EncoderSurface {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Submits one RGBA frame read back from the encoder render target.
    pub fn submit_rgba(&self, rgba: Vec<u8>) {
        let pts_micros = self.clock.wall_clock_micros();
        let _ = self.input.send(InputMessage::Frame(InputFrame {
            rgba,
            width: self.width,
            height: self.height,
            pts_micros,
        }));
        let _ = self.drain_tx.send(DrainMessage::FrameAvailable);
    }
}

/// Owns the codec backend and the drain thread for one recording session.
///
/// Lifecycle: configure (`new`), acquire the input surface, `start`, frames
/// flow, then `shutdown_and_finalize`. The instance is not reusable after
/// shutdown.
pub struct VideoEncoder {
    config: RecorderConfig,
    output_path: PathBuf,
    backend: Arc<dyn EncoderBackend>,
    clock: RecordClock,
    drain_tx: flume::Sender<DrainMessage>,
    drain_rx: Mutex<Option<flume::Receiver<DrainMessage>>>,
    drain: Mutex<Option<DrainHandle>>,
    surface: Mutex<Option<EncoderSurface>>,
    gate: FrameGate,
    started: AtomicBool,
}

impl VideoEncoder {
    /// Configures a software H.264 session writing to `output_path`.
    pub fn new(output_path: &Path, config: RecorderConfig) -> CamrecResult<Self> {
        let backend = Arc::new(OpenH264Backend::new(&config)?);
        Ok(Self::with_backend(output_path, config, backend))
    }

    /// Seam for swapping the codec backend.
    pub fn with_backend(
        output_path: &Path,
        config: RecorderConfig,
        backend: Arc<dyn EncoderBackend>,
    ) -> Self {
        let (drain_tx, drain_rx) = flume::unbounded();
        Self {
            config,
            output_path: output_path.to_path_buf(),
            backend,
            clock: RecordClock::new(),
            drain_tx,
            drain_rx: Mutex::new(Some(drain_rx)),
            drain: Mutex::new(None),
            surface: Mutex::new(None),
            gate: FrameGate::new(),
            started: AtomicBool::new(false),
        }
    }

    /// The GPU-facing input sink. Idempotent; every call returns a handle to
    /// the same underlying channel.
    pub fn acquire_input_surface(&self) -> EncoderSurface {
        let mut surface = self.surface.lock();
        surface
            .get_or_insert_with(|| EncoderSurface {
                width: self.config.recording_width,
                height: self.config.recording_height,
                input: self.backend.input(),
                drain_tx: self.drain_tx.clone(),
                clock: self.clock.clone(),
            })
            .clone()
    }

    /// Spawns the drain thread, waits until it is consuming, then starts
    /// the codec.
    pub fn start(&self) -> CamrecResult<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            log::warn!("[ENCODER] start called twice, ignoring");
            return Ok(());
        }
        let rx = self
            .drain_rx
            .lock()
            .take()
            .ok_or("drain queue already consumed")?;
        let ready = SignalFlag::new();
        let handle = drain::spawn(
            self.backend.clone(),
            self.clock.clone(),
            Mp4Muxer::new(&self.output_path),
            self.config.frame_duration_micros() as u32,
            rx,
            self.drain_tx.clone(),
            ready.clone(),
            self.gate.clone(),
        )?;
        ready.block();
        *self.drain.lock() = Some(handle);
        self.backend.start()?;
        log::info!("[ENCODER] session started -> {}", self.output_path.display());
        Ok(())
    }

    /// Hints the drain loop that output may be ready.
    pub fn notify_frame_produced(&self) {
        let _ = self.drain_tx.send(DrainMessage::FrameAvailable);
    }

    /// Stops the session clock; wall time spent paused is excluded from
    /// sample timestamps.
    pub fn pause(&self) {
        self.clock.pause();
    }

    pub fn resume(&self) {
        self.clock.resume();
    }

    pub fn clock(&self) -> RecordClock {
        self.clock.clone()
    }

    /// Blocks until at least one sample has been muxed, or the timeout
    /// expires. Returns true when a frame was written.
    pub fn wait_for_first_frame(&self, timeout: Duration) -> bool {
        self.gate.wait_for_first(timeout) > 0
    }

    /// Flushes the codec, finalizes the container, and releases the
    /// backend. Returns false when finalization failed (zero samples or a
    /// container error); the caller decides user messaging.
    pub fn shutdown_and_finalize(&self) -> bool {
        let Some(handle) = self.drain.lock().take() else {
            log::warn!("[ENCODER] shutdown without a running session");
            return false;
        };
        self.backend.signal_end_of_stream();
        let _ = handle.tx.send(DrainMessage::Shutdown);
        if !handle.done.block_timeout(FINALIZE_TIMEOUT) {
            log::error!("[ENCODER] timed out waiting for drain loop to finalize");
            self.backend.stop();
            return false;
        }
        let success = handle.thread.join().unwrap_or_else(|_| {
            log::error!("[ENCODER] drain thread panicked");
            false
        });
        self.backend.stop();
        log::info!("[ENCODER] session finished, success={success}");
        success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::backend::testing::ScriptedBackend;
    use crate::encoder::backend::{EncodedSample, PollOutput, SampleFlags};

    fn scripted_session(dir: &tempfile::TempDir, script: Vec<PollOutput>) -> VideoEncoder {
        VideoEncoder::with_backend(
            &dir.path().join("out.mp4"),
            RecorderConfig::default(),
            Arc::new(ScriptedBackend::new(script)),
        )
    }

    fn frame_output(pts_micros: u64) -> PollOutput {
        PollOutput::Buffer(EncodedSample {
            data: vec![0, 0, 0, 1, 0x65, 0x88, 0x80],
            pts_micros,
            flags: SampleFlags {
                codec_config: false,
                key_frame: true,
            },
        })
    }

    #[test]
    fn test_acquire_input_surface_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::new(vec![]));
        let input_rx = backend.input_rx();
        let encoder = VideoEncoder::with_backend(
            &dir.path().join("out.mp4"),
            RecorderConfig::default(),
            backend,
        );
        let a = encoder.acquire_input_surface();
        let b = encoder.acquire_input_surface();
        assert_eq!(a.width(), 120);
        assert_eq!(a.height(), b.height());
        // both handles feed the same backend channel
        a.submit_rgba(vec![0u8; (120 * 160 * 4) as usize]);
        b.submit_rgba(vec![0u8; (120 * 160 * 4) as usize]);
        assert_eq!(input_rx.len(), 2);
    }

    #[test]
    fn test_submit_stamps_and_notifies() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::new(vec![]));
        let input_rx = backend.input_rx();
        let encoder = VideoEncoder::with_backend(
            &dir.path().join("out.mp4"),
            RecorderConfig::default(),
            backend,
        );
        let surface = encoder.acquire_input_surface();
        surface.submit_rgba(vec![0u8; (120 * 160 * 4) as usize]);

        match input_rx.try_recv().unwrap() {
            InputMessage::Frame(frame) => {
                assert_eq!(frame.width, 120);
                assert_eq!(frame.height, 160);
            }
            InputMessage::EndOfStream => panic!("expected a frame"),
        }
    }

    #[test]
    fn test_full_session_with_scripted_backend() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = scripted_session(
            &dir,
            vec![
                PollOutput::FormatChanged(crate::mux::tests::test_format()),
                frame_output(0),
                frame_output(33_333),
                PollOutput::EndOfStream,
            ],
        );
        encoder.start().unwrap();
        encoder.notify_frame_produced();
        assert!(encoder.wait_for_first_frame(Duration::from_secs(5)));
        assert!(encoder.shutdown_and_finalize());
        assert!(dir.path().join("out.mp4").exists());
    }

    #[test]
    fn test_shutdown_without_start_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = scripted_session(&dir, vec![]);
        assert!(!encoder.shutdown_and_finalize());
    }

    #[test]
    fn test_double_start_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = scripted_session(&dir, vec![PollOutput::EndOfStream]);
        encoder.start().unwrap();
        encoder.start().unwrap();
        encoder.shutdown_and_finalize();
    }
}
