//! Camera frame intake.
//!
//! The camera collaborator owns a [`FrameProducer`] and publishes RGBA
//! frames into a latest-image mailbox from its own thread. The compositor
//! owns the matching [`FrameSource`] on the graphics thread and uploads the
//! most recent frame to the GPU once per frame-available notification.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::gfx::GraphicsContext;

/// One published camera frame: tightly packed RGBA plus the producer's
/// texture-coordinate transform (orientation, scaling).
pub struct CameraImage {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub transform: [f32; 16],
}

type FrameListener = Box<dyn Fn() + Send + Sync>;

struct SourceInner {
    latest: Mutex<Option<CameraImage>>,
    listener: Mutex<Option<FrameListener>>,
    default_size: Mutex<(u32, u32)>,
}

/// Graphics-thread side of the camera texture.
pub struct FrameSource {
    inner: Arc<SourceInner>,
}

impl FrameSource {
    pub fn new(default_width: u32, default_height: u32) -> Self {
        Self {
            inner: Arc::new(SourceInner {
                latest: Mutex::new(None),
                listener: Mutex::new(None),
                default_size: Mutex::new((default_width, default_height)),
            }),
        }
    }

    /// Handle for the camera collaborator.
    pub fn producer(&self) -> FrameProducer {
        FrameProducer {
            inner: self.inner.clone(),
        }
    }

    /// Registers the frame-available callback. It runs on the producer's
    /// thread and must only enqueue work (the compositor posts to its
    /// command queue here).
    pub fn set_frame_listener(&self, listener: FrameListener) {
        *self.inner.listener.lock() = Some(listener);
    }

    pub fn clear_frame_listener(&self) {
        *self.inner.listener.lock() = None;
    }

    pub fn default_size(&self) -> (u32, u32) {
        *self.inner.default_size.lock()
    }

    /// Uploads the most recently published frame into `texture` and returns
    /// its transform. Consumes the mailbox: a second call without a new
    /// publish is a stale frame and uploads nothing (the previous texture
    /// contents get sampled; recoverable, not an error).
    pub fn update_current_image(
        &self,
        ctx: &GraphicsContext,
        texture: &wgpu::Texture,
    ) -> Option<[f32; 16]> {
        let image = self.inner.latest.lock().take()?;
        let (want_w, want_h) = self.default_size();
        if image.width != want_w || image.height != want_h {
            log::warn!(
                "[SOURCE] dropping {}x{} frame, texture is {}x{}",
                image.width,
                image.height,
                want_w,
                want_h
            );
            return None;
        }
        ctx.upload_rgba(texture, image.width, image.height, &image.rgba);
        Some(image.transform)
    }
}

/// Camera-side publishing handle. Cloneable; safe to use from any thread.
#[derive(Clone)]
pub struct FrameProducer {
    inner: Arc<SourceInner>,
}

impl FrameProducer {
    /// Declares the resolution the producer intends to publish at.
    pub fn set_default_size(&self, width: u32, height: u32) {
        *self.inner.default_size.lock() = (width, height);
    }

    pub fn default_size(&self) -> (u32, u32) {
        *self.inner.default_size.lock()
    }

    /// Stores the frame as the latest image and fires the frame listener.
    /// An unconsumed previous frame is replaced (the compositor only ever
    /// wants the newest one).
    pub fn publish(&self, image: CameraImage) {
        *self.inner.latest.lock() = Some(image);
        if let Some(listener) = self.inner.listener.lock().as_ref() {
            listener();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IDENTITY_MATRIX;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn image(width: u32, height: u32) -> CameraImage {
        CameraImage {
            rgba: vec![0u8; (width * height * 4) as usize],
            width,
            height,
            transform: IDENTITY_MATRIX,
        }
    }

    #[test]
    fn test_publish_fires_listener() {
        let source = FrameSource::new(4, 4);
        let count = Arc::new(AtomicUsize::new(0));
        let listener_count = count.clone();
        source.set_frame_listener(Box::new(move || {
            listener_count.fetch_add(1, Ordering::SeqCst);
        }));

        let producer = source.producer();
        producer.publish(image(4, 4));
        producer.publish(image(4, 4));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_clear_listener_stops_callbacks() {
        let source = FrameSource::new(4, 4);
        let count = Arc::new(AtomicUsize::new(0));
        let listener_count = count.clone();
        source.set_frame_listener(Box::new(move || {
            listener_count.fetch_add(1, Ordering::SeqCst);
        }));
        source.clear_frame_listener();
        source.producer().publish(image(4, 4));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_latest_frame_replaces_unconsumed() {
        let source = FrameSource::new(2, 2);
        let producer = source.producer();
        let mut first = image(2, 2);
        first.rgba[0] = 1;
        let mut second = image(2, 2);
        second.rgba[0] = 2;
        producer.publish(first);
        producer.publish(second);
        let latest = source.inner.latest.lock().take().unwrap();
        assert_eq!(latest.rgba[0], 2);
    }

    #[test]
    fn test_default_size_round_trips() {
        let source = FrameSource::new(4, 4);
        let producer = source.producer();
        producer.set_default_size(360, 480);
        assert_eq!(source.default_size(), (360, 480));
    }
}
