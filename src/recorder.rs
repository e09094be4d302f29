//! High-level recording facade.
//!
//! Ties the compositor and the encoder together the way a host application
//! drives them: initialize once, arm a record request per clip, start/stop,
//! release.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::RecorderConfig;
use crate::encoder::VideoEncoder;
use crate::error::CamrecResult;
use crate::pipeline::{Compositor, PreviewTarget};
use crate::source::FrameProducer;

/// Stop waits this long for the first sample so very short taps still
/// produce a playable file.
const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(2);

pub struct Recorder {
    compositor: Compositor,
    encoder: Mutex<Option<Arc<VideoEncoder>>>,
    config: RecorderConfig,
}

impl Recorder {
    pub fn new(config: RecorderConfig) -> CamrecResult<Self> {
        Ok(Self {
            compositor: Compositor::new(config.clone())?,
            encoder: Mutex::new(None),
            config,
        })
    }

    /// Kicks off GPU resource creation for the given preview destination.
    pub fn init(&self, preview: PreviewTarget) {
        self.compositor.create_resources(preview);
    }

    /// Blocks until initialization finished; returns the handle the camera
    /// collaborator publishes frames through.
    pub fn camera_targets(&self) -> CamrecResult<FrameProducer> {
        self.compositor.camera_targets()
    }

    pub fn set_mirror(&self, mirrored: bool) {
        self.compositor.set_mirror(mirrored);
    }

    pub fn set_filter_enabled(&self, enabled: bool) {
        self.compositor.set_filter_enabled(enabled);
    }

    pub fn set_preview_size(&self, width: u32, height: u32) {
        self.compositor.set_preview_size(width, height);
    }

    /// Configures an encoder session for `output_path` and arms the
    /// compositor's encode pass with its input surface.
    pub fn create_record_request(&self, output_path: &Path) -> CamrecResult<()> {
        let encoder = Arc::new(VideoEncoder::new(output_path, self.config.clone())?);
        self.compositor
            .arm_encoder_surface(encoder.acquire_input_surface())?;
        *self.encoder.lock() = Some(encoder);
        log::info!("[RECORDER] record request ready -> {}", output_path.display());
        Ok(())
    }

    /// Starts the encoder session and opens the recording gate.
    pub fn start_recording(&self) -> CamrecResult<()> {
        let guard = self.encoder.lock();
        let encoder = guard.as_ref().ok_or("no record request was created")?;
        encoder.start()?;
        self.compositor.start_recording();
        Ok(())
    }

    /// Closes the recording gate and freezes the session clock. Pass 3
    /// stops running, so no frames reach the encoder until resume.
    pub fn pause_recording(&self) {
        if let Some(encoder) = self.encoder.lock().as_ref() {
            self.compositor.stop_recording();
            encoder.pause();
        }
    }

    pub fn resume_recording(&self) {
        if let Some(encoder) = self.encoder.lock().as_ref() {
            self.compositor.start_recording();
            encoder.resume();
        }
    }

    pub fn is_recording(&self) -> bool {
        self.compositor.is_recording()
    }

    /// Closes the recording gate, waits briefly for at least one muxed
    /// sample, and finalizes the container. Returns false when no playable
    /// file was produced.
    pub fn stop_recording(&self) -> bool {
        self.compositor.stop_recording();
        let Some(encoder) = self.encoder.lock().take() else {
            log::warn!("[RECORDER] stop without a record request");
            return false;
        };
        if !encoder.wait_for_first_frame(FIRST_FRAME_TIMEOUT) {
            log::warn!("[RECORDER] no frames arrived before stop");
        }
        encoder.shutdown_and_finalize()
    }

    pub fn destroy_preview_surface(&self) {
        self.compositor.destroy_preview_surface();
    }

    pub fn clear_frame_listener(&self) {
        self.compositor.clear_frame_listener();
    }

    pub fn cleanup(&self) {
        self.compositor.cleanup();
    }

    /// Full teardown: abandons any in-flight session and stops the
    /// graphics thread.
    pub fn release(&self) {
        if let Some(encoder) = self.encoder.lock().take() {
            encoder.shutdown_and_finalize();
        }
        self.compositor.release();
    }
}
