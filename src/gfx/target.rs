//! Render destinations.
//!
//! A target is either a platform window swapchain or an offscreen texture.
//! `begin_frame` selects the attachment to draw into; `present` on the
//! returned frame swaps it (a no-op for offscreen targets).

use crate::error::{CamrecError, CamrecResult};

pub struct WindowTarget {
    pub(crate) surface: wgpu::Surface<'static>,
    pub(crate) config: wgpu::SurfaceConfiguration,
}

pub struct TextureTarget {
    pub(crate) texture: wgpu::Texture,
    pub(crate) width: u32,
    pub(crate) height: u32,
}

pub enum RenderTarget {
    Window(WindowTarget),
    Texture(TextureTarget),
}

impl RenderTarget {
    pub fn size(&self) -> (u32, u32) {
        match self {
            RenderTarget::Window(target) => (target.config.width, target.config.height),
            RenderTarget::Texture(target) => (target.width, target.height),
        }
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        match self {
            RenderTarget::Window(target) => target.config.format,
            RenderTarget::Texture(_) => wgpu::TextureFormat::Rgba8Unorm,
        }
    }

    /// Offscreen targets expose their texture for sampling and read-back.
    pub fn texture(&self) -> Option<&wgpu::Texture> {
        match self {
            RenderTarget::Window(_) => None,
            RenderTarget::Texture(target) => Some(&target.texture),
        }
    }

    /// Acquires the attachment for this frame.
    pub fn begin_frame(&self) -> CamrecResult<TargetFrame> {
        match self {
            RenderTarget::Window(target) => {
                let surface_texture = target
                    .surface
                    .get_current_texture()
                    .map_err(|e| CamrecError::SurfaceCreation(format!("acquire failed: {e}")))?;
                let view = surface_texture
                    .texture
                    .create_view(&wgpu::TextureViewDescriptor::default());
                Ok(TargetFrame {
                    view,
                    surface_texture: Some(surface_texture),
                })
            }
            RenderTarget::Texture(target) => Ok(TargetFrame {
                view: target
                    .texture
                    .create_view(&wgpu::TextureViewDescriptor::default()),
                surface_texture: None,
            }),
        }
    }
}

pub struct TargetFrame {
    view: wgpu::TextureView,
    surface_texture: Option<wgpu::SurfaceTexture>,
}

impl TargetFrame {
    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    /// Swaps the frame to screen for window targets.
    pub fn present(self) {
        if let Some(surface_texture) = self.surface_texture {
            surface_texture.present();
        }
    }
}
