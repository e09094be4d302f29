//! GPU plumbing: context, render targets, shader passes.

pub mod context;
pub mod shader;
pub mod target;

pub use context::GraphicsContext;
pub use shader::ShaderPass;
pub use target::{RenderTarget, TargetFrame};
