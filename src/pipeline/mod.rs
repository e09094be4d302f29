//! Compositing pipeline.
//!
//! All GPU work happens on one dedicated graphics thread that consumes a
//! command queue. Each camera frame flows through three copy passes:
//!
//! 1. camera texture -> intermediate render texture (filter or passthrough)
//! 2. render texture -> preview target, letterboxed to the recording aspect
//! 3. render texture -> encoder target (mirror or passthrough), read back
//!    and submitted to the encoder — only while recording and armed
//!
//! Control-thread operations post commands and, where the original
//! synchronous semantics demand it, block on a completion signal.

pub mod viewport;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::config::{self, RecorderConfig};
use crate::encoder::EncoderSurface;
use crate::error::{CamrecError, CamrecResult};
use crate::gfx::{GraphicsContext, RenderTarget, ShaderPass};
use crate::pipeline::viewport::Viewport;
use crate::source::{FrameProducer, FrameSource};
use crate::sync::SignalFlag;

/// Where the preview pass draws.
pub enum PreviewTarget {
    Window {
        window: Box<dyn wgpu::WindowHandle>,
        width: u32,
        height: u32,
    },
    /// Headless preview into an offscreen texture.
    Offscreen { width: u32, height: u32 },
}

enum RenderCommand {
    CreateResources { preview: PreviewTarget },
    DestroyPreviewSurface,
    ArmEncoderSurface {
        surface: EncoderSurface,
        reply: flume::Sender<CamrecResult<()>>,
    },
    ClearFrameListener,
    Cleanup,
    FrameAvailable,
    Shutdown,
}

struct Shared {
    resources_ready: SignalFlag,
    destroy_done: SignalFlag,
    clear_done: SignalFlag,
    cleanup_done: SignalFlag,
    recording: AtomicBool,
    mirror: AtomicBool,
    filter: AtomicBool,
    preview_size: Mutex<(u32, u32)>,
    producer: Mutex<Option<FrameProducer>>,
    config: RecorderConfig,
}

/// Control-thread handle to the graphics thread.
pub struct Compositor {
    tx: flume::Sender<RenderCommand>,
    thread: Mutex<Option<JoinHandle<()>>>,
    shared: Arc<Shared>,
}

impl Compositor {
    pub fn new(config: RecorderConfig) -> CamrecResult<Self> {
        let (tx, rx) = flume::unbounded();
        let shared = Arc::new(Shared {
            resources_ready: SignalFlag::new(),
            destroy_done: SignalFlag::new(),
            clear_done: SignalFlag::new(),
            cleanup_done: SignalFlag::new(),
            recording: AtomicBool::new(false),
            mirror: AtomicBool::new(false),
            filter: AtomicBool::new(false),
            preview_size: Mutex::new((config.preview_width, config.preview_height)),
            producer: Mutex::new(None),
            config,
        });
        let loop_shared = shared.clone();
        let loop_tx = tx.clone();
        let thread = std::thread::Builder::new()
            .name("camrec-render".to_string())
            .spawn(move || render_loop(rx, loop_tx, loop_shared))
            .map_err(|e| CamrecError::Other(format!("failed to spawn render thread: {e}")))?;
        Ok(Self {
            tx,
            thread: Mutex::new(Some(thread)),
            shared,
        })
    }

    /// Initializes GPU resources on the graphics thread. Asynchronous;
    /// `camera_targets` blocks until initialization finished. Expected once
    /// per pipeline lifetime; repeated calls are ignored by the worker.
    pub fn create_resources(&self, preview: PreviewTarget) {
        let _ = self.tx.send(RenderCommand::CreateResources { preview });
    }

    /// Blocks until resources are created, then returns the camera-facing
    /// producer handle.
    pub fn camera_targets(&self) -> CamrecResult<FrameProducer> {
        self.shared.resources_ready.block();
        self.shared
            .producer
            .lock()
            .clone()
            .ok_or_else(|| CamrecError::ContextInit("pipeline failed to initialize".to_string()))
    }

    /// Creates the encoder-bound render target; pass 3 starts running on
    /// the next recorded frame.
    pub fn arm_encoder_surface(&self, surface: EncoderSurface) -> CamrecResult<()> {
        let (reply_tx, reply_rx) = flume::bounded(1);
        self.tx
            .send(RenderCommand::ArmEncoderSurface {
                surface,
                reply: reply_tx,
            })
            .map_err(|_| CamrecError::Other("render thread is gone".to_string()))?;
        reply_rx
            .recv()
            .map_err(|_| CamrecError::Timeout("encoder surface arming"))?
    }

    /// Selects mirror vs. passthrough for the encode pass only; front
    /// cameras record un-mirrored otherwise.
    pub fn set_mirror(&self, mirrored: bool) {
        self.shared.mirror.store(mirrored, Ordering::Release);
    }

    pub fn set_filter_enabled(&self, enabled: bool) {
        self.shared.filter.store(enabled, Ordering::Release);
    }

    /// Updates the letterbox inputs for the preview pass.
    pub fn set_preview_size(&self, width: u32, height: u32) {
        *self.shared.preview_size.lock() = (width, height);
    }

    /// Frames begin flowing to the encoder surface starting with the next
    /// frame whose processing starts after this call.
    pub fn start_recording(&self) {
        log::info!("[RENDER] recording on");
        self.shared.recording.store(true, Ordering::Release);
    }

    pub fn stop_recording(&self) {
        log::info!("[RENDER] recording off");
        self.shared.recording.store(false, Ordering::Release);
    }

    pub fn is_recording(&self) -> bool {
        self.shared.recording.load(Ordering::Acquire)
    }

    /// Tears down the preview target. Blocks until the graphics thread has
    /// released it; subsequent frames skip the preview pass.
    pub fn destroy_preview_surface(&self) {
        self.blocking_command(RenderCommand::DestroyPreviewSurface, &self.shared.destroy_done);
    }

    /// Detaches the frame listener so teardown cannot race new
    /// frame-available notifications.
    pub fn clear_frame_listener(&self) {
        self.blocking_command(RenderCommand::ClearFrameListener, &self.shared.clear_done);
    }

    /// Destroys every GPU resource. Idempotent; a second call finds nothing
    /// to destroy and returns once the worker confirms.
    pub fn cleanup(&self) {
        self.blocking_command(RenderCommand::Cleanup, &self.shared.cleanup_done);
    }

    /// Full teardown: cleanup plus graphics thread exit.
    pub fn release(&self) {
        self.cleanup();
        let _ = self.tx.send(RenderCommand::Shutdown);
        if let Some(thread) = self.thread.lock().take() {
            if thread.join().is_err() {
                log::error!("[RENDER] render thread panicked");
            }
        }
    }

    fn blocking_command(&self, command: RenderCommand, done: &SignalFlag) {
        done.close();
        if self.tx.send(command).is_err() {
            // Worker already gone; nothing left to wait for.
            done.open();
            return;
        }
        done.block();
    }
}

impl Drop for Compositor {
    fn drop(&mut self) {
        let _ = self.tx.send(RenderCommand::Shutdown);
        if let Some(thread) = self.thread.lock().take() {
            let _ = thread.join();
        }
    }
}

/// Everything the graphics thread owns once resources exist.
struct RenderState {
    ctx: GraphicsContext,
    source: FrameSource,
    camera_texture: wgpu::Texture,
    render_target: RenderTarget,
    preview: Option<RenderTarget>,
    encoder_target: Option<(RenderTarget, EncoderSurface)>,
    pass_plain: ShaderPass,
    pass_mirror: ShaderPass,
    pass_vignette: ShaderPass,
    pass_preview: Option<ShaderPass>,
    camera_transform: [f32; 16],
}

fn render_loop(
    rx: flume::Receiver<RenderCommand>,
    tx: flume::Sender<RenderCommand>,
    shared: Arc<Shared>,
) {
    log::debug!("[RENDER] graphics thread running");
    let mut state: Option<RenderState> = None;

    while let Ok(command) = rx.recv() {
        match command {
            RenderCommand::CreateResources { preview } => {
                if state.is_some() {
                    log::warn!("[RENDER] resources already created, ignoring");
                    continue;
                }
                match create_resources(&shared, &tx, preview) {
                    Ok(new_state) => {
                        *shared.producer.lock() = Some(new_state.source.producer());
                        if let Some(target) = &new_state.preview {
                            *shared.preview_size.lock() = target.size();
                        }
                        state = Some(new_state);
                        log::info!("[RENDER] resources created");
                    }
                    Err(e) => log::error!("[RENDER] resource creation failed: {e}"),
                }
                shared.resources_ready.open();
            }
            RenderCommand::DestroyPreviewSurface => {
                if let Some(state) = state.as_mut() {
                    state.preview = None;
                    state.pass_preview = None;
                    log::info!("[RENDER] preview surface destroyed");
                }
                shared.destroy_done.open();
            }
            RenderCommand::ArmEncoderSurface { surface, reply } => {
                let result = match state.as_mut() {
                    Some(state) => {
                        let target = state.ctx.create_texture_target(
                            surface.width(),
                            surface.height(),
                            "camrec-encoder-target",
                        );
                        log::info!(
                            "[RENDER] encoder surface armed {}x{}",
                            surface.width(),
                            surface.height()
                        );
                        state.encoder_target = Some((target, surface));
                        Ok(())
                    }
                    None => Err(CamrecError::SurfaceCreation(
                        "cannot arm encoder surface before resources exist".to_string(),
                    )),
                };
                let _ = reply.send(result);
            }
            RenderCommand::ClearFrameListener => {
                if let Some(state) = state.as_ref() {
                    state.source.clear_frame_listener();
                    log::debug!("[RENDER] frame listener cleared");
                }
                shared.clear_done.open();
            }
            RenderCommand::Cleanup => {
                if state.take().is_some() {
                    *shared.producer.lock() = None;
                    log::info!("[RENDER] resources destroyed");
                }
                shared.cleanup_done.open();
            }
            RenderCommand::FrameAvailable => {
                if let Some(state) = state.as_mut() {
                    on_frame_available(state, &shared);
                }
            }
            RenderCommand::Shutdown => break,
        }
    }
    log::debug!("[RENDER] graphics thread exited");
}

fn create_resources(
    shared: &Shared,
    tx: &flume::Sender<RenderCommand>,
    preview: PreviewTarget,
) -> CamrecResult<RenderState> {
    let ctx = GraphicsContext::new()?;
    let config = &shared.config;

    let source = FrameSource::new(config.preview_width, config.preview_height);
    let queue_tx = tx.clone();
    source.set_frame_listener(Box::new(move || {
        let _ = queue_tx.send(RenderCommand::FrameAvailable);
    }));
    let camera_texture = ctx.create_sampled_texture(
        config.preview_width,
        config.preview_height,
        "camrec-camera-texture",
    );
    let render_target = ctx.create_texture_target(
        config.preview_width,
        config.preview_height,
        "camrec-render-texture",
    );
    let preview = match preview {
        PreviewTarget::Window {
            window,
            width,
            height,
        } => ctx.create_window_target(window, width, height)?,
        PreviewTarget::Offscreen { width, height } => {
            ctx.create_texture_target(width, height, "camrec-preview-texture")
        }
    };

    let device = ctx.device();
    let pass_plain = ShaderPass::compile(
        device,
        config::PASSTHROUGH_FRAGMENT_SHADER,
        wgpu::TextureFormat::Rgba8Unorm,
        "passthrough",
    )?;
    let pass_mirror = ShaderPass::compile(
        device,
        config::MIRROR_FRAGMENT_SHADER,
        wgpu::TextureFormat::Rgba8Unorm,
        "mirror",
    )?;
    let pass_vignette = ShaderPass::compile(
        device,
        config::VIGNETTE_FRAGMENT_SHADER,
        wgpu::TextureFormat::Rgba8Unorm,
        "vignette",
    )?;
    let pass_preview = ShaderPass::compile(
        device,
        config::PASSTHROUGH_FRAGMENT_SHADER,
        preview.format(),
        "preview",
    )?;

    Ok(RenderState {
        ctx,
        source,
        camera_texture,
        render_target,
        preview: Some(preview),
        encoder_target: None,
        pass_plain,
        pass_mirror,
        pass_vignette,
        pass_preview: Some(pass_preview),
        camera_transform: config::IDENTITY_MATRIX,
    })
}

fn on_frame_available(state: &mut RenderState, shared: &Shared) {
    // Sampled once; a stop_recording mid-frame takes effect next frame.
    let recording = shared.recording.load(Ordering::Acquire);

    if let Some(transform) = state
        .source
        .update_current_image(&state.ctx, &state.camera_texture)
    {
        state.camera_transform = transform;
    }

    let device = state.ctx.device();
    let queue = state.ctx.queue();
    let camera_view = state
        .camera_texture
        .create_view(&wgpu::TextureViewDescriptor::default());

    // Pass 1: camera -> render texture. Orientation is preserved; the
    // producer transform already carries any rotation the camera needs.
    let (render_w, render_h) = state.render_target.size();
    let render_frame = match state.render_target.begin_frame() {
        Ok(frame) => frame,
        Err(e) => {
            log::error!("[RENDER] render target acquire failed: {e}");
            return;
        }
    };
    let pass1 = if shared.filter.load(Ordering::Acquire) {
        &state.pass_vignette
    } else {
        &state.pass_plain
    };
    pass1.draw(
        device,
        queue,
        render_frame.view(),
        &camera_view,
        &state.camera_transform,
        Viewport::full(render_w, render_h),
        false,
    );
    render_frame.present();

    let render_view = match state.render_target.texture() {
        Some(texture) => texture.create_view(&wgpu::TextureViewDescriptor::default()),
        None => return,
    };

    // Pass 2: render texture -> preview, letterboxed.
    if let (Some(preview), Some(pass)) = (&state.preview, &state.pass_preview) {
        let (preview_w, preview_h) = *shared.preview_size.lock();
        let vp = viewport::letterbox(
            preview_w,
            preview_h,
            shared.config.recording_width,
            shared.config.recording_height,
        );
        match preview.begin_frame() {
            Ok(frame) => {
                pass.draw(
                    device,
                    queue,
                    frame.view(),
                    &render_view,
                    &config::IDENTITY_MATRIX,
                    vp,
                    false,
                );
                frame.present();
            }
            Err(e) => log::warn!("[RENDER] skipping preview pass: {e}"),
        }
    }

    // Pass 3: render texture -> encoder target, then read back and hand the
    // pixels to the encoder.
    if !recording {
        return;
    }
    let Some((target, surface)) = &state.encoder_target else {
        return;
    };
    let frame = match target.begin_frame() {
        Ok(frame) => frame,
        Err(e) => {
            log::error!("[RENDER] encoder target acquire failed: {e}");
            return;
        }
    };
    let pass3 = if shared.mirror.load(Ordering::Acquire) {
        &state.pass_mirror
    } else {
        &state.pass_plain
    };
    pass3.draw(
        device,
        queue,
        frame.view(),
        &render_view,
        &config::IDENTITY_MATRIX,
        Viewport::full(surface.width(), surface.height()),
        false,
    );
    frame.present();

    let Some(texture) = target.texture() else {
        return;
    };
    match state
        .ctx
        .read_texture_rgba(texture, surface.width(), surface.height())
    {
        Ok(rgba) => surface.submit_rgba(rgba),
        Err(e) => log::error!("[RENDER] encoder readback failed: {e}"),
    }
}
