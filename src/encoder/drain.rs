//! Encoder drain loop.
//!
//! A dedicated thread pulls encoded buffers out of the backend and feeds the
//! muxer. It reacts to two messages: `FrameAvailable` (drain whatever the
//! codec has ready, zero-timeout) and `Shutdown` (drain to end-of-stream,
//! finalize the container, exit). The container is started lazily at the
//! first frame payload so an aborted session leaves no half-written file
//! with zero samples.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::encoder::backend::{EncoderBackend, PollOutput, VideoFormat};
use crate::encoder::clock::RecordClock;
use crate::error::{CamrecError, CamrecResult};
use crate::mux::Mp4Muxer;
use crate::sync::{FrameGate, SignalFlag};

/// How long the shutdown drain waits for the backend to flush.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub enum DrainMessage {
    /// A new frame may be waiting in the codec output queue. A hint, not a
    /// guarantee; draining more often than strictly necessary is harmless.
    FrameAvailable,
    /// Flush, finalize the container, exit the loop.
    Shutdown,
}

/// Mutable per-recording state owned by the drain thread.
struct DrainState {
    muxer: Mp4Muxer,
    clock: RecordClock,
    /// Captured once from the first FormatChanged; later changes are logged
    /// and ignored.
    format: Option<VideoFormat>,
    /// Rebased timestamp of the last muxed sample.
    last_emitted_micros: Option<u64>,
    frame_duration_micros: u32,
    reached_eos: bool,
}

impl DrainState {
    fn new(muxer: Mp4Muxer, clock: RecordClock, frame_duration_micros: u32) -> Self {
        Self {
            muxer,
            clock,
            format: None,
            last_emitted_micros: None,
            frame_duration_micros,
            reached_eos: false,
        }
    }

    /// Polls the backend until it reports nothing ready. Returns the number
    /// of samples written to the container.
    fn drain_available(&mut self, backend: &dyn EncoderBackend) -> usize {
        let mut written = 0;
        if self.reached_eos {
            return 0;
        }
        loop {
            match backend.try_dequeue() {
                PollOutput::TryAgain => break,
                PollOutput::FormatChanged(format) => {
                    if self.format.is_some() {
                        log::warn!("[DRAIN] format changed twice, keeping the first");
                    } else {
                        log::debug!(
                            "[DRAIN] captured output format {}x{}",
                            format.width,
                            format.height
                        );
                        self.format = Some(format);
                    }
                }
                PollOutput::Buffer(sample) => {
                    // Codec config travels in the track header, not as a
                    // sample; treat its payload as empty.
                    let payload_len = if sample.flags.codec_config {
                        log::debug!("[DRAIN] discarding codec config buffer");
                        0
                    } else {
                        sample.data.len()
                    };
                    if payload_len == 0 {
                        continue;
                    }
                    match self.write_sample(&sample.data, sample.pts_micros, sample.flags.key_frame)
                    {
                        Ok(()) => written += 1,
                        Err(e) => log::error!("[DRAIN] dropping sample: {e}"),
                    }
                }
                PollOutput::EndOfStream => {
                    log::warn!("[DRAIN] reached end of stream");
                    self.reached_eos = true;
                    break;
                }
            }
        }
        written
    }

    fn write_sample(&mut self, annex_b: &[u8], producer_pts: u64, key_frame: bool) -> CamrecResult<()> {
        if !self.muxer.is_started() {
            let format = self
                .format
                .as_ref()
                .ok_or_else(|| CamrecError::Other("frame arrived before format".to_string()))?;
            self.muxer.start(format)?;
        }

        // First sample keeps the producer timestamp; every later sample is
        // rebased onto the pause-corrected session clock, clamped so the
        // track never goes backwards.
        let pts = match self.last_emitted_micros {
            None => producer_pts,
            Some(last) => self.clock.media_time_micros().max(last),
        };
        self.last_emitted_micros = Some(pts);
        self.muxer
            .write_sample(annex_b, pts, self.frame_duration_micros, key_frame)
    }

    /// Keeps draining until the backend signals end-of-stream or the
    /// timeout expires.
    fn drain_to_end(&mut self, backend: &dyn EncoderBackend) -> usize {
        let deadline = Instant::now() + SHUTDOWN_DRAIN_TIMEOUT;
        let mut written = 0;
        while !self.reached_eos {
            written += self.drain_available(backend);
            if self.reached_eos {
                break;
            }
            if Instant::now() >= deadline {
                log::error!("[DRAIN] timed out waiting for end of stream, finalizing anyway");
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        written
    }

    /// Finalizes the container. True only if the file closed cleanly with
    /// at least one sample.
    fn finalize(mut self) -> bool {
        let samples = self.muxer.samples_written();
        match self.muxer.finalize() {
            Ok(()) if samples > 0 => true,
            Ok(()) => {
                log::warn!("[DRAIN] finalized with zero samples");
                false
            }
            Err(e) => {
                log::error!("[DRAIN] finalization failed: {e}");
                false
            }
        }
    }
}

pub(crate) struct DrainHandle {
    pub tx: flume::Sender<DrainMessage>,
    pub thread: JoinHandle<bool>,
    pub done: SignalFlag,
}

/// Spawns the drain thread. The ready signal opens before the thread starts
/// consuming messages, so the owner can sequence backend startup after it.
pub(crate) fn spawn(
    backend: Arc<dyn EncoderBackend>,
    clock: RecordClock,
    muxer: Mp4Muxer,
    frame_duration_micros: u32,
    rx: flume::Receiver<DrainMessage>,
    tx: flume::Sender<DrainMessage>,
    ready: SignalFlag,
    gate: FrameGate,
) -> CamrecResult<DrainHandle> {
    let done = SignalFlag::new();
    let thread_done = done.clone();
    let thread = std::thread::Builder::new()
        .name("camrec-drain".to_string())
        .spawn(move || {
            let mut state = DrainState::new(muxer, clock, frame_duration_micros);
            ready.open();
            log::debug!("[DRAIN] loop running");
            let success = loop {
                match rx.recv() {
                    Ok(DrainMessage::FrameAvailable) => {
                        if state.drain_available(backend.as_ref()) > 0 {
                            gate.increment();
                        }
                    }
                    Ok(DrainMessage::Shutdown) | Err(_) => {
                        if state.drain_to_end(backend.as_ref()) > 0 {
                            gate.increment();
                        }
                        break state.finalize();
                    }
                }
            };
            thread_done.open();
            log::debug!("[DRAIN] loop exited, success={success}");
            success
        })
        .map_err(|e| CamrecError::Other(format!("failed to spawn drain thread: {e}")))?;
    Ok(DrainHandle { tx, thread, done })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::backend::testing::ScriptedBackend;
    use crate::encoder::backend::{EncodedSample, SampleFlags};

    fn format_output() -> PollOutput {
        PollOutput::FormatChanged(crate::mux::tests::test_format())
    }

    fn config_buffer() -> PollOutput {
        PollOutput::Buffer(EncodedSample {
            data: vec![0, 0, 0, 1, 0x67, 0x42, 0, 0, 0, 1, 0x68, 0xce],
            pts_micros: 0,
            flags: SampleFlags {
                codec_config: true,
                key_frame: false,
            },
        })
    }

    fn frame_buffer(pts_micros: u64, key_frame: bool) -> PollOutput {
        PollOutput::Buffer(EncodedSample {
            data: vec![0, 0, 0, 1, 0x65, 0x88, 0x80, 0x40],
            pts_micros,
            flags: SampleFlags {
                codec_config: false,
                key_frame,
            },
        })
    }

    fn state(dir: &tempfile::TempDir) -> DrainState {
        let muxer = Mp4Muxer::new(&dir.path().join("out.mp4"));
        DrainState::new(muxer, RecordClock::new(), 33_333)
    }

    #[test]
    fn test_config_buffer_is_not_muxed() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = state(&dir);
        let backend = ScriptedBackend::new(vec![
            format_output(),
            config_buffer(),
            frame_buffer(0, true),
        ]);
        let written = state.drain_available(&backend);
        assert_eq!(written, 1);
        assert_eq!(state.muxer.samples_written(), 1);
    }

    #[test]
    fn test_container_starts_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = state(&dir);
        let backend = ScriptedBackend::new(vec![format_output(), config_buffer()]);
        assert_eq!(state.drain_available(&backend), 0);
        // format and config seen, but no payload yet: no container
        assert!(!state.muxer.is_started());
        assert!(!dir.path().join("out.mp4").exists());

        let backend = ScriptedBackend::new(vec![frame_buffer(0, true)]);
        assert_eq!(state.drain_available(&backend), 1);
        assert!(state.muxer.is_started());
    }

    #[test]
    fn test_second_format_change_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = state(&dir);
        let mut other = crate::mux::tests::test_format();
        other.width = 640;
        let backend = ScriptedBackend::new(vec![
            format_output(),
            PollOutput::FormatChanged(other),
            frame_buffer(0, true),
        ]);
        state.drain_available(&backend);
        assert_eq!(state.format.as_ref().unwrap().width, 120);
    }

    #[test]
    fn test_first_sample_keeps_producer_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = state(&dir);
        // Producer pts far ahead of the session clock: the first sample
        // seeds the track, later samples clamp to it.
        let backend = ScriptedBackend::new(vec![
            format_output(),
            frame_buffer(5_000_000, true),
            frame_buffer(5_033_333, false),
        ]);
        assert_eq!(state.drain_available(&backend), 2);
        assert_eq!(state.last_emitted_micros, Some(5_000_000));
    }

    #[test]
    fn test_rebasing_excludes_paused_time() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = state(&dir);
        let clock = state.clock.clone();

        let backend = ScriptedBackend::new(vec![format_output(), frame_buffer(0, true)]);
        state.drain_available(&backend);

        clock.pause();
        std::thread::sleep(Duration::from_millis(60));
        clock.resume();
        std::thread::sleep(Duration::from_millis(10));

        let backend = ScriptedBackend::new(vec![frame_buffer(70_000, false)]);
        state.drain_available(&backend);

        let pts = state.last_emitted_micros.unwrap();
        let wall = clock.wall_clock_micros();
        // paused time must not appear in the track
        assert!(pts + 50_000 <= wall, "pts {pts} too close to wall {wall}");
    }

    #[test]
    fn test_timestamps_never_decrease() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = state(&dir);
        let backend = ScriptedBackend::new(vec![
            format_output(),
            frame_buffer(9_000_000, true),
            frame_buffer(9_033_333, false),
            frame_buffer(9_066_666, false),
        ]);
        state.drain_available(&backend);
        // session clock is near zero, so every later sample clamps up to
        // the seeded first timestamp
        assert_eq!(state.last_emitted_micros, Some(9_000_000));
    }

    #[test]
    fn test_end_of_stream_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = state(&dir);
        let backend = ScriptedBackend::new(vec![
            format_output(),
            PollOutput::EndOfStream,
            frame_buffer(0, true),
        ]);
        assert_eq!(state.drain_available(&backend), 0);
        assert!(state.reached_eos);
        // the frame after EOS is never drained
        assert_eq!(state.drain_available(&backend), 0);
    }

    #[test]
    fn test_spawned_loop_writes_and_finalizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mp4");
        let backend = Arc::new(ScriptedBackend::new(vec![
            format_output(),
            config_buffer(),
            frame_buffer(0, true),
            frame_buffer(33_333, false),
            PollOutput::EndOfStream,
        ]));
        let (tx, rx) = flume::unbounded();
        let ready = SignalFlag::new();
        let gate = FrameGate::new();
        let handle = spawn(
            backend,
            RecordClock::new(),
            Mp4Muxer::new(&path),
            33_333,
            rx,
            tx.clone(),
            ready.clone(),
            gate.clone(),
        )
        .unwrap();
        ready.block();

        tx.send(DrainMessage::FrameAvailable).unwrap();
        tx.send(DrainMessage::Shutdown).unwrap();
        let success = handle.thread.join().unwrap();
        assert!(success);
        assert!(handle.done.is_open());
        assert!(gate.count() >= 1);
        assert!(path.exists());
    }

    #[test]
    fn test_shutdown_with_no_samples_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::new(vec![PollOutput::EndOfStream]));
        let (tx, rx) = flume::unbounded();
        let ready = SignalFlag::new();
        let handle = spawn(
            backend,
            RecordClock::new(),
            Mp4Muxer::new(&dir.path().join("out.mp4")),
            33_333,
            rx,
            tx.clone(),
            ready.clone(),
            FrameGate::new(),
        )
        .unwrap();
        tx.send(DrainMessage::Shutdown).unwrap();
        assert!(!handle.thread.join().unwrap());
    }
}
