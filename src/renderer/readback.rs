//! Blocking GPU → CPU texture downloads.
//!
//! Used by entity picking, skinned-vertex inspection and by tests. Rows are copied with the 256-byte
//! alignment wgpu requires and de-padded before returning.

use crate::errors::{Result, StrataError};

fn align_bpr(value: u32) -> u32 {
    value.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT
}

/// Copies `extent` texels of `mip_level` starting at `origin` into tightly
/// packed rows (slice after slice for 3D textures and layer ranges).
pub fn download(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    mip_level: u32,
    origin: wgpu::Origin3d,
    extent: wgpu::Extent3d,
) -> Result<Vec<u8>> {
    let format = texture.format();
    let bytes_per_pixel = format
        .block_copy_size(Some(wgpu::TextureAspect::All))
        .ok_or_else(|| StrataError::Readback(format!("{format:?} is not copyable")))?;

    let rows = extent.height * extent.depth_or_array_layers;
    let tight_bpr = bytes_per_pixel * extent.width;
    let padded_bpr = align_bpr(tight_bpr);
    let buffer_size = wgpu::BufferAddress::from(padded_bpr) * wgpu::BufferAddress::from(rows);

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Readback Staging"),
        size: buffer_size,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Readback Encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level,
            origin,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &staging,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_bpr),
                rows_per_image: Some(extent.height),
            },
        },
        extent,
    );
    queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (sender, receiver) = flume::bounded(1);
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    device.poll(wgpu::PollType::wait_indefinitely())?;

    receiver
        .recv()
        .map_err(|_| StrataError::Readback("map_async callback dropped".to_string()))??;

    let data = slice.get_mapped_range();
    let (tight_bpr, padded_bpr) = (tight_bpr as usize, padded_bpr as usize);
    let mut tight = vec![0u8; tight_bpr * rows as usize];
    for (row, dst) in tight.chunks_exact_mut(tight_bpr).enumerate() {
        let src = row * padded_bpr;
        dst.copy_from_slice(&data[src..src + tight_bpr]);
    }
    drop(data);
    staging.unmap();

    Ok(tight)
}

/// Copies the whole of `buffer` (which needs `COPY_SRC`).
pub fn read_buffer(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    buffer: &wgpu::Buffer,
) -> Result<Vec<u8>> {
    let size = buffer.size();
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Readback Staging"),
        size,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Readback Encoder"),
    });
    encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
    queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (sender, receiver) = flume::bounded(1);
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    device.poll(wgpu::PollType::wait_indefinitely())?;
    receiver
        .recv()
        .map_err(|_| StrataError::Readback("map_async callback dropped".to_string()))??;

    let bytes = slice.get_mapped_range().to_vec();
    staging.unmap();
    Ok(bytes)
}

/// Copies a `width × height` region starting at `origin` of mip 0 / layer 0.
pub fn read_texture_region(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    origin: (u32, u32),
    width: u32,
    height: u32,
) -> Result<Vec<u8>> {
    download(
        device,
        queue,
        texture,
        0,
        wgpu::Origin3d {
            x: origin.0,
            y: origin.1,
            z: 0,
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    )
}

/// Every texel of one mip level of a 3D texture, x fastest, then y, then z.
pub fn read_volume_level(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    level: u32,
) -> Result<Vec<u8>> {
    let extent = texture.size().mip_level_size(level, texture.dimension());
    download(device, queue, texture, level, wgpu::Origin3d::ZERO, extent)
}

/// Whole-texture download of mip 0.
pub fn read_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
) -> Result<Vec<u8>> {
    let size = texture.size();
    read_texture_region(device, queue, texture, (0, 0), size.width, size.height)
}

/// Reads one texel of a 32-bit single-channel texture (`R32Uint`).
pub fn read_texel_u32(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    x: u32,
    y: u32,
) -> Result<u32> {
    let bytes = read_texture_region(device, queue, texture, (x, y), 1, 1)?;
    let word: [u8; 4] = bytes
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| StrataError::Readback("short texel read".to_string()))?;
    Ok(u32::from_le_bytes(word))
}

/// Decodes `Rgba16Float` bytes into linear RGBA floats.
#[must_use]
pub fn decode_rgba16f(bytes: &[u8]) -> Vec<[f32; 4]> {
    bytes
        .chunks_exact(8)
        .map(|px| {
            let channel = |i: usize| half::f16::from_le_bytes([px[i * 2], px[i * 2 + 1]]).to_f32();
            [channel(0), channel(1), channel(2), channel(3)]
        })
        .collect()
}

/// Decodes `Rgba8Unorm` bytes into `[0, 1]` floats.
#[must_use]
pub fn decode_rgba8(bytes: &[u8]) -> Vec<[f32; 4]> {
    bytes
        .chunks_exact(4)
        .map(|px| {
            let channel = |i: usize| f32::from(px[i]) / 255.0;
            [channel(0), channel(1), channel(2), channel(3)]
        })
        .collect()
}
