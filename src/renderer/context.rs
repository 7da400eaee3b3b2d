//! Renderer Context
//!
//! [`RendererContext`] is created once at startup and passed by reference to
//! every pass constructor and every pass call. It replaces process-wide
//! globals: the fallback textures every material or disabled pass binds live
//! here as plain fields, next to the device, the samplers and the render
//! target registry.

use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use wgpu::util::DeviceExt;

use crate::errors::Result;
use crate::renderer::settings::RenderSettings;
use crate::renderer::targets::RenderTargets;

/// Optional device features the pipeline uses when the adapter has them.
pub const OPTIONAL_FEATURES: wgpu::Features = wgpu::Features::TIMESTAMP_QUERY
    .union(wgpu::Features::TIMESTAMP_QUERY_INSIDE_ENCODERS)
    .union(wgpu::Features::CONSERVATIVE_RASTERIZATION);

// ============================================================================
// Tracked Buffers
// ============================================================================

/// A `wgpu::Buffer` counted in the context's live buffer total while alive.
#[derive(Debug)]
pub struct TrackedBuffer {
    buffer: wgpu::Buffer,
    live: Arc<AtomicUsize>,
}

impl Deref for TrackedBuffer {
    type Target = wgpu::Buffer;
    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

impl Drop for TrackedBuffer {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::Relaxed);
    }
}

// ============================================================================
// Default Resources
// ============================================================================

/// Always-valid fallback textures, one texel each.
#[derive(Debug)]
pub struct DefaultTextures {
    /// `(1, 1, 1, 1)`, default albedo.
    pub white: wgpu::TextureView,
    /// `(0.5, 0.5, 1, 1)`, flat tangent-space normal.
    pub normal: wgpu::TextureView,
    /// `(1, 1, 1, 1)`, metallic/roughness read through material factors.
    pub metallic_roughness: wgpu::TextureView,
    /// `(0, 0, 0, 1)`, stands in for disabled bloom.
    pub black: wgpu::TextureView,
    /// Transparent black 3D texture, stands in for a disabled voxel volume.
    pub black_3d: wgpu::TextureView,
}

impl DefaultTextures {
    /// Number of textures owned by this set.
    pub const COUNT: usize = 5;

    fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let texel = |label: &str, rgba: [u8; 4], dimension: wgpu::TextureDimension| {
            let texture = device.create_texture_with_data(
                queue,
                &wgpu::TextureDescriptor {
                    label: Some(label),
                    size: wgpu::Extent3d {
                        width: 1,
                        height: 1,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension,
                    format: wgpu::TextureFormat::Rgba8Unorm,
                    usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                    view_formats: &[],
                },
                wgpu::util::TextureDataOrder::LayerMajor,
                &rgba,
            );
            texture.create_view(&wgpu::TextureViewDescriptor::default())
        };

        Self {
            white: texel("Default White", [255, 255, 255, 255], wgpu::TextureDimension::D2),
            normal: texel("Default Normal", [128, 128, 255, 255], wgpu::TextureDimension::D2),
            metallic_roughness: texel(
                "Default Metallic Roughness",
                [255, 255, 255, 255],
                wgpu::TextureDimension::D2,
            ),
            black: texel("Default Black", [0, 0, 0, 255], wgpu::TextureDimension::D2),
            black_3d: texel("Default Black 3D", [0, 0, 0, 0], wgpu::TextureDimension::D3),
        }
    }
}

#[derive(Debug)]
pub struct Samplers {
    pub linear_clamp: wgpu::Sampler,
    pub nearest_clamp: wgpu::Sampler,
    /// Trilinear, for mip-mapped volumes and cubemaps.
    pub trilinear_clamp: wgpu::Sampler,
    pub linear_repeat: wgpu::Sampler,
    /// `LessEqual` comparison sampler for the cascade array.
    pub shadow: wgpu::Sampler,
}

impl Samplers {
    fn new(device: &wgpu::Device) -> Self {
        let clamp = wgpu::AddressMode::ClampToEdge;
        Self {
            linear_clamp: device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some("Linear Clamp Sampler"),
                address_mode_u: clamp,
                address_mode_v: clamp,
                address_mode_w: clamp,
                mag_filter: wgpu::FilterMode::Linear,
                min_filter: wgpu::FilterMode::Linear,
                ..Default::default()
            }),
            nearest_clamp: device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some("Nearest Clamp Sampler"),
                ..Default::default()
            }),
            trilinear_clamp: device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some("Trilinear Clamp Sampler"),
                address_mode_u: clamp,
                address_mode_v: clamp,
                address_mode_w: clamp,
                mag_filter: wgpu::FilterMode::Linear,
                min_filter: wgpu::FilterMode::Linear,
                mipmap_filter: wgpu::MipmapFilterMode::Linear,
                ..Default::default()
            }),
            linear_repeat: device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some("Linear Repeat Sampler"),
                address_mode_u: wgpu::AddressMode::Repeat,
                address_mode_v: wgpu::AddressMode::Repeat,
                mag_filter: wgpu::FilterMode::Linear,
                min_filter: wgpu::FilterMode::Linear,
                ..Default::default()
            }),
            shadow: device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some("Shadow Compare Sampler"),
                address_mode_u: clamp,
                address_mode_v: clamp,
                mag_filter: wgpu::FilterMode::Linear,
                min_filter: wgpu::FilterMode::Linear,
                compare: Some(wgpu::CompareFunction::LessEqual),
                ..Default::default()
            }),
        }
    }
}

// ============================================================================
// RendererContext
// ============================================================================

pub struct RendererContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: wgpu::AdapterInfo,
    pub defaults: DefaultTextures,
    pub samplers: Samplers,
    pub targets: RenderTargets,
    live_buffers: Arc<AtomicUsize>,
}

impl RendererContext {
    /// Wraps a device the host already created (e.g. for a window surface).
    #[must_use]
    pub fn from_device(
        device: wgpu::Device,
        queue: wgpu::Queue,
        adapter_info: wgpu::AdapterInfo,
    ) -> Self {
        let defaults = DefaultTextures::new(&device, &queue);
        let samplers = Samplers::new(&device);
        Self {
            device,
            queue,
            adapter_info,
            defaults,
            samplers,
            targets: RenderTargets::new(),
            live_buffers: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Creates a device without a surface.
    pub async fn request_headless(settings: &RenderSettings) -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: settings.power_preference,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await?;

        let required_features = adapter.features() & OPTIONAL_FEATURES;
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Strata Device"),
                required_features,
                required_limits: adapter.limits(),
                memory_hints: wgpu::MemoryHints::Performance,
                ..Default::default()
            })
            .await?;

        let info = adapter.get_info();
        log::info!(
            "using adapter '{}' ({:?}), features {:?}",
            info.name,
            info.backend,
            required_features
        );
        Ok(Self::from_device(device, queue, info))
    }

    /// Blocking [`request_headless`](Self::request_headless).
    pub fn new_headless(settings: &RenderSettings) -> Result<Self> {
        pollster::block_on(Self::request_headless(settings))
    }

    #[inline]
    #[must_use]
    pub fn supports(&self, features: wgpu::Features) -> bool {
        self.device.features().contains(features)
    }

    pub fn track_buffer(&self, buffer: wgpu::Buffer) -> TrackedBuffer {
        self.live_buffers.fetch_add(1, Ordering::Relaxed);
        TrackedBuffer {
            buffer,
            live: Arc::clone(&self.live_buffers),
        }
    }

    pub fn create_buffer(&self, desc: &wgpu::BufferDescriptor) -> TrackedBuffer {
        self.track_buffer(self.device.create_buffer(desc))
    }

    pub fn create_uniform<T: bytemuck::Pod>(&self, label: &str, value: &T) -> TrackedBuffer {
        self.track_buffer(
            self.device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(label),
                    contents: bytemuck::bytes_of(value),
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                }),
        )
    }

    #[must_use]
    pub fn live_buffer_count(&self) -> usize {
        self.live_buffers.load(Ordering::Relaxed)
    }

    /// Registered targets plus the default textures.
    #[must_use]
    pub fn live_texture_count(&self) -> usize {
        self.targets.len() + DefaultTextures::COUNT
    }
}
