//! End-to-end pipeline tests.
//!
//! GPU-dependent tests skip themselves when no adapter is available (CI
//! machines without a GPU or software rasterizer).

use std::time::Duration;

use camrec::config::{IDENTITY_MATRIX, MIRROR_FRAGMENT_SHADER, PASSTHROUGH_FRAGMENT_SHADER};
use camrec::gfx::{GraphicsContext, ShaderPass};
use camrec::pipeline::viewport::Viewport;
use camrec::{CameraImage, FrameProducer, PreviewTarget, Recorder, RecorderConfig};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn gradient_frame(width: u32, height: u32, seed: u8) -> Vec<u8> {
    let mut rgba = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            rgba.push((x % 256) as u8);
            rgba.push((y % 256) as u8);
            rgba.push(seed);
            rgba.push(255);
        }
    }
    rgba
}

fn publish(producer: &FrameProducer, width: u32, height: u32, seed: u8) {
    producer.publish(CameraImage {
        rgba: gradient_frame(width, height, seed),
        width,
        height,
        transform: IDENTITY_MATRIX,
    });
}

/// Initializes a recorder with an offscreen preview, or None without a GPU.
fn init_recorder() -> Option<(Recorder, FrameProducer)> {
    init_logging();
    let recorder = Recorder::new(RecorderConfig::default()).unwrap();
    recorder.init(PreviewTarget::Offscreen {
        width: 360,
        height: 480,
    });
    match recorder.camera_targets() {
        Ok(producer) => Some((recorder, producer)),
        Err(e) => {
            eprintln!("skipping GPU test: {e}");
            recorder.release();
            None
        }
    }
}

#[test]
fn test_records_a_playable_file() {
    let Some((recorder, producer)) = init_recorder() else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clip.mp4");

    recorder.create_record_request(&path).unwrap();
    recorder.start_recording().unwrap();
    for i in 0..20u8 {
        publish(&producer, 360, 480, i * 10);
        std::thread::sleep(Duration::from_millis(33));
    }
    assert!(recorder.stop_recording(), "finalization should succeed");

    let size = std::fs::metadata(&path).unwrap().len();
    assert!(size > 500, "suspiciously small file: {size} bytes");
    recorder.release();
}

#[test]
fn test_no_encoder_input_while_not_recording() {
    let Some((recorder, producer)) = init_recorder() else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clip.mp4");

    recorder.create_record_request(&path).unwrap();
    // armed but never started: the encode pass must not run
    for i in 0..10u8 {
        publish(&producer, 360, 480, i);
        std::thread::sleep(Duration::from_millis(10));
    }
    // let the queue fully drain before opening and closing the gate
    std::thread::sleep(Duration::from_millis(200));
    recorder.start_recording().unwrap();
    assert!(!recorder.stop_recording());
    // lazy container start means no file was ever created
    assert!(!path.exists());
    recorder.release();
}

#[test]
fn test_pause_shortens_the_track() {
    let Some((recorder, producer)) = init_recorder() else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clip.mp4");

    recorder.create_record_request(&path).unwrap();
    recorder.start_recording().unwrap();
    for i in 0..5u8 {
        publish(&producer, 360, 480, i);
        std::thread::sleep(Duration::from_millis(33));
    }
    recorder.pause_recording();
    std::thread::sleep(Duration::from_millis(200));
    recorder.resume_recording();
    for i in 0..5u8 {
        publish(&producer, 360, 480, 100 + i);
        std::thread::sleep(Duration::from_millis(33));
    }
    assert!(recorder.stop_recording());
    assert!(path.exists());
    recorder.release();
}

#[test]
fn test_paused_frames_never_reach_the_encoder() {
    let Some((recorder, producer)) = init_recorder() else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clip.mp4");

    recorder.create_record_request(&path).unwrap();
    recorder.start_recording().unwrap();
    assert!(recorder.is_recording());

    // Pause closes the recording gate: pass 3 must not run even though
    // camera frames keep arriving.
    recorder.pause_recording();
    assert!(!recorder.is_recording());
    for i in 0..10u8 {
        publish(&producer, 360, 480, i);
        std::thread::sleep(Duration::from_millis(10));
    }
    std::thread::sleep(Duration::from_millis(200));

    recorder.resume_recording();
    assert!(recorder.is_recording());

    // Nothing was published outside the pause, so the encoder saw zero
    // frames and the container was never started.
    assert!(!recorder.stop_recording());
    assert!(!path.exists());
    recorder.release();
}

#[test]
fn test_cleanup_is_idempotent() {
    init_logging();
    // No GPU needed: cleanup with nothing created is a confirmed no-op.
    let recorder = Recorder::new(RecorderConfig::default()).unwrap();
    recorder.cleanup();
    recorder.cleanup();
    recorder.destroy_preview_surface();
    recorder.clear_frame_listener();
    recorder.release();
}

#[test]
fn test_frames_after_cleanup_are_harmless() {
    let Some((recorder, producer)) = init_recorder() else {
        return;
    };
    recorder.cleanup();
    // the producer outlives the pipeline's resources; publishing must not
    // crash or deadlock
    publish(&producer, 360, 480, 1);
    publish(&producer, 360, 480, 2);
    recorder.release();
}

#[test]
fn test_mirror_pass_swaps_horizontally() {
    init_logging();
    let ctx = match GraphicsContext::new() {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("skipping GPU test: {e}");
            return;
        }
    };
    let source = ctx.create_sampled_texture(2, 1, "mirror-src");
    // left red, right green
    ctx.upload_rgba(&source, 2, 1, &[255, 0, 0, 255, 0, 255, 0, 255]);
    let target = ctx.create_texture_target(2, 1, "mirror-dst");

    let pass = ShaderPass::compile(
        ctx.device(),
        MIRROR_FRAGMENT_SHADER,
        wgpu::TextureFormat::Rgba8Unorm,
        "mirror",
    )
    .unwrap();
    let frame = target.begin_frame().unwrap();
    pass.draw(
        ctx.device(),
        ctx.queue(),
        frame.view(),
        &source.create_view(&wgpu::TextureViewDescriptor::default()),
        &IDENTITY_MATRIX,
        Viewport::full(2, 1),
        false,
    );
    frame.present();

    let pixels = ctx
        .read_texture_rgba(target.texture().unwrap(), 2, 1)
        .unwrap();
    assert_eq!(&pixels[0..3], &[0, 255, 0], "left pixel should be green");
    assert_eq!(&pixels[4..7], &[255, 0, 0], "right pixel should be red");
}

#[test]
fn test_copy_chain_preserves_vertical_orientation() {
    init_logging();
    let ctx = match GraphicsContext::new() {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("skipping GPU test: {e}");
            return;
        }
    };
    let camera = ctx.create_sampled_texture(1, 2, "orient-src");
    // top red, bottom green
    ctx.upload_rgba(&camera, 1, 2, &[255, 0, 0, 255, 0, 255, 0, 255]);
    let render = ctx.create_texture_target(1, 2, "orient-render");
    let preview = ctx.create_texture_target(1, 2, "orient-preview");

    let pass = ShaderPass::compile(
        ctx.device(),
        PASSTHROUGH_FRAGMENT_SHADER,
        wgpu::TextureFormat::Rgba8Unorm,
        "passthrough",
    )
    .unwrap();

    // camera -> render -> preview, the same two copies every frame makes
    let frame = render.begin_frame().unwrap();
    pass.draw(
        ctx.device(),
        ctx.queue(),
        frame.view(),
        &camera.create_view(&wgpu::TextureViewDescriptor::default()),
        &IDENTITY_MATRIX,
        Viewport::full(1, 2),
        false,
    );
    frame.present();

    let frame = preview.begin_frame().unwrap();
    pass.draw(
        ctx.device(),
        ctx.queue(),
        frame.view(),
        &render
            .texture()
            .unwrap()
            .create_view(&wgpu::TextureViewDescriptor::default()),
        &IDENTITY_MATRIX,
        Viewport::full(1, 2),
        false,
    );
    frame.present();

    let pixels = ctx
        .read_texture_rgba(preview.texture().unwrap(), 1, 2)
        .unwrap();
    assert_eq!(&pixels[0..3], &[255, 0, 0], "top pixel should stay red");
    assert_eq!(&pixels[4..7], &[0, 255, 0], "bottom pixel should stay green");
}

#[test]
fn test_flip_inverts_vertical_orientation() {
    init_logging();
    let ctx = match GraphicsContext::new() {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("skipping GPU test: {e}");
            return;
        }
    };
    let source = ctx.create_sampled_texture(1, 2, "flip-src");
    ctx.upload_rgba(&source, 1, 2, &[255, 0, 0, 255, 0, 255, 0, 255]);
    let target = ctx.create_texture_target(1, 2, "flip-dst");

    let pass = ShaderPass::compile(
        ctx.device(),
        PASSTHROUGH_FRAGMENT_SHADER,
        wgpu::TextureFormat::Rgba8Unorm,
        "passthrough",
    )
    .unwrap();
    let frame = target.begin_frame().unwrap();
    pass.draw(
        ctx.device(),
        ctx.queue(),
        frame.view(),
        &source.create_view(&wgpu::TextureViewDescriptor::default()),
        &IDENTITY_MATRIX,
        Viewport::full(1, 2),
        true,
    );
    frame.present();

    let pixels = ctx
        .read_texture_rgba(target.texture().unwrap(), 1, 2)
        .unwrap();
    assert_eq!(&pixels[0..3], &[0, 255, 0], "top pixel should be green");
    assert_eq!(&pixels[4..7], &[255, 0, 0], "bottom pixel should be red");
}
