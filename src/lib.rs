//! Real-time GPU camera compositing and H.264 recording.
//!
//! A camera collaborator publishes RGBA frames into a [`source::FrameSource`];
//! a dedicated graphics thread composites each frame through three wgpu copy
//! passes (camera -> render texture -> preview, and while recording,
//! -> encoder target); encoded output is drained on its own thread, rebased
//! onto a pause-aware session clock, and muxed into an MP4.
//!
//! [`Recorder`] is the high-level entry point; the `pipeline` and `encoder`
//! modules expose the two halves individually.

pub mod config;
pub mod encoder;
pub mod error;
pub mod gfx;
pub mod h264;
pub mod mux;
pub mod pipeline;
pub mod recorder;
pub mod source;
pub mod sync;

pub use config::RecorderConfig;
pub use encoder::{EncoderSurface, VideoEncoder};
pub use error::{CamrecError, CamrecResult};
pub use pipeline::{Compositor, PreviewTarget};
pub use recorder::Recorder;
pub use source::{CameraImage, FrameProducer, FrameSource};
