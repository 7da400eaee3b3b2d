//! Render Target Registry
//!
//! Every viewport-sized (and persistent) pass texture is allocated here and
//! referred to by a [`TextureHandle`]. A pass owns the handles it created and
//! hands them to downstream passes through the orchestrator; nobody reaches
//! into another pass's fields.
//!
//! The registry length is the live texture count reported in GPU stats, which
//! makes leaked targets visible: after a resize the count must not change.

use std::ops::Index;

use slotmap::{SlotMap, new_key_type};

new_key_type! {
    /// Stable key of a registered texture. Invalidated by [`RenderTargets::destroy`].
    pub struct TextureHandle;
}

/// A registered texture plus its default full view.
#[derive(Debug)]
pub struct RenderTarget {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub label: String,
}

impl RenderTarget {
    #[inline]
    #[must_use]
    pub fn size(&self) -> wgpu::Extent3d {
        self.texture.size()
    }

    #[inline]
    #[must_use]
    pub fn format(&self) -> wgpu::TextureFormat {
        self.texture.format()
    }

    /// View of a single mip level.
    #[must_use]
    pub fn mip_view(&self, level: u32) -> wgpu::TextureView {
        self.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(&format!("{} mip {level}", self.label)),
            base_mip_level: level,
            mip_level_count: Some(1),
            ..Default::default()
        })
    }

    /// 2D view of a single array layer.
    #[must_use]
    pub fn layer_view(&self, layer: u32) -> wgpu::TextureView {
        self.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(&format!("{} layer {layer}", self.label)),
            dimension: Some(wgpu::TextureViewDimension::D2),
            base_array_layer: layer,
            array_layer_count: Some(1),
            ..Default::default()
        })
    }
}

#[derive(Debug, Default)]
pub struct RenderTargets {
    targets: SlotMap<TextureHandle, RenderTarget>,
}

impl RenderTargets {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a texture; `view_desc` customizes the default view (cube,
    /// 2D array, ...).
    pub fn create(
        &mut self,
        device: &wgpu::Device,
        desc: &wgpu::TextureDescriptor,
        view_desc: Option<wgpu::TextureViewDescriptor>,
    ) -> TextureHandle {
        let texture = device.create_texture(desc);
        let view = texture.create_view(&view_desc.unwrap_or_default());
        let label = desc.label.unwrap_or("Render Target").to_string();
        log::debug!(
            "create target '{label}' {}x{}x{} {:?}",
            desc.size.width,
            desc.size.height,
            desc.size.depth_or_array_layers,
            desc.format
        );
        self.targets.insert(RenderTarget {
            texture,
            view,
            label,
        })
    }

    /// Shorthand for a single-mip 2D texture.
    pub fn create_2d(
        &mut self,
        device: &wgpu::Device,
        label: &str,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
    ) -> TextureHandle {
        self.create(
            device,
            &wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width: width.max(1),
                    height: height.max(1),
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage,
                view_formats: &[],
            },
            None,
        )
    }

    /// Releases the GPU memory immediately. Returns `false` for a stale handle.
    pub fn destroy(&mut self, handle: TextureHandle) -> bool {
        match self.targets.remove(handle) {
            Some(target) => {
                log::debug!("destroy target '{}'", target.label);
                target.texture.destroy();
                true
            }
            None => false,
        }
    }

    #[inline]
    #[must_use]
    pub fn get(&self, handle: TextureHandle) -> Option<&RenderTarget> {
        self.targets.get(handle)
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, handle: TextureHandle) -> bool {
        self.targets.contains_key(handle)
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl Index<TextureHandle> for RenderTargets {
    type Output = RenderTarget;

    fn index(&self, handle: TextureHandle) -> &RenderTarget {
        &self.targets[handle]
    }
}

// ============================================================================
// Ping-Pong Pair
// ============================================================================

/// Two same-format targets whose roles exchange every frame.
///
/// `target()` is where this frame writes, `history()` holds the previous
/// frame's output. [`swap`](Self::swap) exchanges ownership (no copy) and
/// returns the handle now holding the newest result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingPong {
    target: TextureHandle,
    history: TextureHandle,
}

impl PingPong {
    #[must_use]
    pub fn new(target: TextureHandle, history: TextureHandle) -> Self {
        Self { target, history }
    }

    #[inline]
    #[must_use]
    pub fn target(&self) -> TextureHandle {
        self.target
    }

    #[inline]
    #[must_use]
    pub fn history(&self) -> TextureHandle {
        self.history
    }

    pub fn swap(&mut self) -> TextureHandle {
        std::mem::swap(&mut self.target, &mut self.history);
        self.history
    }

    #[must_use]
    pub fn handles(&self) -> [TextureHandle; 2] {
        [self.target, self.history]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handles() -> (TextureHandle, TextureHandle) {
        let mut map: SlotMap<TextureHandle, ()> = SlotMap::with_key();
        (map.insert(()), map.insert(()))
    }

    #[test]
    fn swap_returns_the_buffer_just_written() {
        let (a, b) = handles();
        let mut pair = PingPong::new(a, b);
        assert_eq!(pair.target(), a);
        let newest = pair.swap();
        assert_eq!(newest, a);
        assert_eq!(pair.history(), a);
        assert_eq!(pair.target(), b);
    }

    #[test]
    fn consecutive_swaps_alternate_identity() {
        let (a, b) = handles();
        let mut pair = PingPong::new(a, b);
        let first = pair.swap();
        let second = pair.swap();
        assert_ne!(first, second);
        assert_eq!(pair.swap(), first);
    }
}
