//! wgpu device ownership and texture transfer helpers.

use crate::error::{CamrecError, CamrecResult};
use crate::gfx::target::{RenderTarget, TextureTarget, WindowTarget};

/// Owns the single wgpu instance/adapter/device/queue of the pipeline.
///
/// Created lazily on the graphics thread; every draw and transfer goes
/// through the queue held here, so GPU work is serialized by construction.
pub struct GraphicsContext {
    instance: wgpu::Instance,
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
}

impl GraphicsContext {
    pub fn new() -> CamrecResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| CamrecError::ContextInit(format!("no compatible adapter: {e}")))?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("camrec-device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            ..Default::default()
        }))
        .map_err(|e| CamrecError::ContextInit(format!("device request failed: {e}")))?;

        log::info!(
            "[RENDER] graphics context ready on {}",
            adapter.get_info().name
        );
        Ok(Self {
            instance,
            adapter,
            device,
            queue,
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Creates a sampleable texture the camera frames are uploaded into.
    pub fn create_sampled_texture(&self, width: u32, height: u32, label: &str) -> wgpu::Texture {
        self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        })
    }

    /// Creates an offscreen render target that can also be sampled and read
    /// back (intermediate render texture, encoder target, headless preview).
    pub fn create_texture_target(&self, width: u32, height: u32, label: &str) -> RenderTarget {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        RenderTarget::Texture(TextureTarget {
            texture,
            width,
            height,
        })
    }

    /// Wraps a platform window into a configured swapchain target.
    pub fn create_window_target(
        &self,
        window: Box<dyn wgpu::WindowHandle>,
        width: u32,
        height: u32,
    ) -> CamrecResult<RenderTarget> {
        let surface = self
            .instance
            .create_surface(wgpu::SurfaceTarget::Window(window))
            .map_err(|e| CamrecError::SurfaceCreation(e.to_string()))?;
        let config = surface
            .get_default_config(&self.adapter, width, height)
            .ok_or_else(|| {
                CamrecError::SurfaceCreation("surface is incompatible with the adapter".to_string())
            })?;
        surface.configure(&self.device, &config);
        log::info!("[RENDER] window surface configured {}x{}", width, height);
        Ok(RenderTarget::Window(WindowTarget { surface, config }))
    }

    /// Uploads tightly packed RGBA8 pixels into a texture.
    pub fn upload_rgba(&self, texture: &wgpu::Texture, width: u32, height: u32, data: &[u8]) {
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }

    /// Reads a texture back as tightly packed RGBA8, handling the 256-byte
    /// row pitch the copy requires.
    pub fn read_texture_rgba(
        &self,
        texture: &wgpu::Texture,
        width: u32,
        height: u32,
    ) -> CamrecResult<Vec<u8>> {
        let unpadded_bytes_per_row = width * 4;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(align) * align;

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("camrec-readback"),
            size: (padded_bytes_per_row * height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("camrec-readback-encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = buffer.slice(..);
        let (tx, rx) = flume::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::PollType::Wait);
        rx.recv()
            .map_err(|_| CamrecError::Other("readback callback dropped".to_string()))?
            .map_err(|e| CamrecError::Other(format!("readback map failed: {e:?}")))?;

        let mapped = slice.get_mapped_range();
        let mut pixels = Vec::with_capacity((unpadded_bytes_per_row * height) as usize);
        for row in 0..height {
            let start = (row * padded_bytes_per_row) as usize;
            pixels.extend_from_slice(&mapped[start..start + unpadded_bytes_per_row as usize]);
        }
        drop(mapped);
        buffer.unmap();
        Ok(pixels)
    }
}
