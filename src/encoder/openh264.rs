//! Software H.264 backend.
//!
//! Frames arrive as RGBA over the input channel, get converted to I420 and
//! encoded on a dedicated worker thread, and come back out of `try_dequeue`
//! as the codec-queue state machine the drain loop expects: format first,
//! then a codec-config sample, then frame samples, then end-of-stream once
//! the input channel is flushed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use openh264::encoder::{Encoder, EncoderConfig};
use openh264::formats::YUVBuffer;
use parking_lot::Mutex;

use crate::config::RecorderConfig;
use crate::encoder::backend::{
    EncodedSample, EncoderBackend, InputMessage, PollOutput, SampleFlags, VideoFormat,
};
use crate::error::{CamrecError, CamrecResult};
use crate::h264;

#[derive(Clone)]
struct EncoderSettings {
    width: u32,
    height: u32,
    bitrate: u32,
    frame_rate: u32,
    i_frame_interval_micros: u64,
}

fn make_encoder(settings: &EncoderSettings) -> CamrecResult<Encoder> {
    let config = EncoderConfig::new(settings.width, settings.height)
        .max_frame_rate(settings.frame_rate as f32)
        .set_bitrate_bps(settings.bitrate);
    Encoder::with_config(config).map_err(|e| CamrecError::EncoderUnavailable(e.to_string()))
}

pub struct OpenH264Backend {
    settings: EncoderSettings,
    input_tx: flume::Sender<InputMessage>,
    input_rx: flume::Receiver<InputMessage>,
    output_rx: flume::Receiver<PollOutput>,
    output_tx: flume::Sender<PollOutput>,
    worker: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl OpenH264Backend {
    /// Validates that the codec accepts the configured parameters. The
    /// actual encoder instance is created on the worker thread at `start`.
    pub fn new(config: &RecorderConfig) -> CamrecResult<Self> {
        let settings = EncoderSettings {
            width: config.recording_width,
            height: config.recording_height,
            bitrate: config.bitrate,
            frame_rate: config.frame_rate,
            i_frame_interval_micros: config.i_frame_interval_secs as u64 * 1_000_000,
        };
        drop(make_encoder(&settings)?);

        let (input_tx, input_rx) = flume::unbounded();
        let (output_tx, output_rx) = flume::unbounded();
        Ok(Self {
            settings,
            input_tx,
            input_rx,
            output_rx,
            output_tx,
            worker: Mutex::new(None),
            started: AtomicBool::new(false),
        })
    }
}

impl EncoderBackend for OpenH264Backend {
    fn start(&self) -> CamrecResult<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            log::warn!("[ENCODER] start called twice, ignoring");
            return Ok(());
        }
        let settings = self.settings.clone();
        let input_rx = self.input_rx.clone();
        let output_tx = self.output_tx.clone();
        let handle = std::thread::Builder::new()
            .name("camrec-encode".to_string())
            .spawn(move || encode_loop(settings, input_rx, output_tx))
            .map_err(|e| CamrecError::Other(format!("failed to spawn encode thread: {e}")))?;
        *self.worker.lock() = Some(handle);
        log::info!(
            "[ENCODER] started {}x{} @ {}fps, {}bps",
            self.settings.width,
            self.settings.height,
            self.settings.frame_rate,
            self.settings.bitrate
        );
        Ok(())
    }

    fn input(&self) -> flume::Sender<InputMessage> {
        self.input_tx.clone()
    }

    fn try_dequeue(&self) -> PollOutput {
        match self.output_rx.try_recv() {
            Ok(output) => output,
            Err(_) => PollOutput::TryAgain,
        }
    }

    fn stop(&self) {
        // Unblocks the worker if end-of-stream was never signalled.
        let _ = self.input_tx.send(InputMessage::EndOfStream);
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                log::error!("[ENCODER] encode thread panicked");
            }
        }
        log::info!("[ENCODER] stopped");
    }
}

fn encode_loop(
    settings: EncoderSettings,
    input_rx: flume::Receiver<InputMessage>,
    output_tx: flume::Sender<PollOutput>,
) {
    let mut encoder = match make_encoder(&settings) {
        Ok(encoder) => encoder,
        Err(e) => {
            log::error!("[ENCODER] could not create encoder on worker: {e}");
            let _ = output_tx.send(PollOutput::EndOfStream);
            return;
        }
    };

    let expected_len = (settings.width * settings.height * 4) as usize;
    let mut format_emitted = false;
    let mut last_idr_pts: Option<u64> = None;

    while let Ok(message) = input_rx.recv() {
        let frame = match message {
            InputMessage::Frame(frame) => frame,
            InputMessage::EndOfStream => break,
        };
        if frame.rgba.len() != expected_len {
            log::warn!(
                "[ENCODER] dropping frame with unexpected size {} (want {})",
                frame.rgba.len(),
                expected_len
            );
            continue;
        }

        if let Some(last) = last_idr_pts {
            if frame.pts_micros.saturating_sub(last) >= settings.i_frame_interval_micros {
                // SAFETY: forwards a single flag to the C encoder; no
                // pointers or buffers cross the boundary.
                unsafe { encoder.raw_api().force_intra_frame(true) };
            }
        }

        let rgb = rgba_to_rgb(&frame.rgba);
        let yuv = YUVBuffer::with_rgb(settings.width as usize, settings.height as usize, &rgb);
        let bitstream = match encoder.encode(&yuv) {
            Ok(bitstream) => bitstream,
            Err(e) => {
                log::error!("[ENCODER] encode failed, dropping frame: {e}");
                continue;
            }
        };
        let data = bitstream.to_vec();
        if data.is_empty() {
            continue;
        }

        let key_frame = h264::contains_idr(&data);
        if key_frame {
            last_idr_pts = Some(frame.pts_micros);
        }

        if !format_emitted {
            if let Some((sps, pps)) = h264::extract_parameter_sets(&data) {
                log::info!(
                    "[ENCODER] output format: {}x{}, sps {}B, pps {}B",
                    settings.width,
                    settings.height,
                    sps.len(),
                    pps.len()
                );
                let _ = output_tx.send(PollOutput::FormatChanged(VideoFormat {
                    width: settings.width,
                    height: settings.height,
                    sps: sps.clone(),
                    pps: pps.clone(),
                }));
                let mut config_payload = Vec::new();
                for unit in [&sps, &pps] {
                    config_payload.extend_from_slice(&[0, 0, 0, 1]);
                    config_payload.extend_from_slice(unit);
                }
                let _ = output_tx.send(PollOutput::Buffer(EncodedSample {
                    data: config_payload,
                    pts_micros: frame.pts_micros,
                    flags: SampleFlags {
                        codec_config: true,
                        key_frame: false,
                    },
                }));
                format_emitted = true;
            }
        }

        let _ = output_tx.send(PollOutput::Buffer(EncodedSample {
            data,
            pts_micros: frame.pts_micros,
            flags: SampleFlags {
                codec_config: false,
                key_frame,
            },
        }));
    }

    let _ = output_tx.send(PollOutput::EndOfStream);
    log::debug!("[ENCODER] encode loop exited");
}

fn rgba_to_rgb(rgba: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(rgba.len() / 4 * 3);
    for px in rgba.chunks_exact(4) {
        rgb.extend_from_slice(&px[..3]);
    }
    rgb
}
