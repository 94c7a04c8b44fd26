//! Scratch pixel buffer shared between frame staging and encode dispatch

use anyhow::{Context, Result};
use memmap2::MmapMut;
use std::os::fd::OwnedFd;

/// 4-byte-per-pixel layouts understood by the stager and the encoder backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelFormat {
    #[default]
    Rgba8,
    Bgra8,
    Abgr8,
    Argb8,
}

impl PixelFormat {
    pub const BYTES_PER_PIXEL: usize = 4;

    /// Byte offsets of the R, G, B and A channels within one pixel
    fn channel_offsets(self) -> [usize; 4] {
        match self {
            PixelFormat::Rgba8 => [0, 1, 2, 3],
            PixelFormat::Bgra8 => [2, 1, 0, 3],
            PixelFormat::Abgr8 => [3, 2, 1, 0],
            PixelFormat::Argb8 => [1, 2, 3, 0],
        }
    }

    /// Copy `src` pixels in this format into `dst` laid out as `target`
    ///
    /// Both slices must hold the same whole number of pixels.
    pub fn convert_into(self, target: PixelFormat, src: &[u8], dst: &mut [u8]) {
        debug_assert_eq!(src.len(), dst.len());
        if self == target {
            dst.copy_from_slice(src);
            return;
        }

        let from = self.channel_offsets();
        let to = target.channel_offsets();
        for (s, d) in src
            .chunks_exact(Self::BYTES_PER_PIXEL)
            .zip(dst.chunks_exact_mut(Self::BYTES_PER_PIXEL))
        {
            for channel in 0..4 {
                d[to[channel]] = s[from[channel]];
            }
        }
    }
}

/// Fixed-size pixel buffer backed by an anonymous memfd mapping
///
/// Created once when a recording starts and refilled for every admitted frame.
pub struct ScratchBuffer {
    width: u32,
    height: u32,
    format: PixelFormat,
    map: MmapMut,
    // Keeps the backing storage alive for the lifetime of the mapping
    _fd: OwnedFd,
}

impl ScratchBuffer {
    /// Allocate a zeroed buffer of `width` x `height` pixels
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        anyhow::ensure!(
            width > 0 && height > 0,
            "Scratch buffer dimensions must be non-zero ({}x{})",
            width,
            height
        );

        let len = width as u64 * height as u64 * PixelFormat::BYTES_PER_PIXEL as u64;
        let fd = rustix::fs::memfd_create(c"framerec-scratch", rustix::fs::MemfdFlags::CLOEXEC)
            .context("Failed to create memfd for scratch buffer")?;
        rustix::fs::ftruncate(&fd, len)
            .with_context(|| format!("Failed to size scratch buffer to {} bytes", len))?;

        // SAFETY: the memfd is private to this buffer and never resized after mapping.
        let map = unsafe { MmapMut::map_mut(&fd) }
            .context("Failed to map scratch buffer")?;

        log::debug!("Allocated scratch buffer {}x{} {:?} ({} bytes)", width, height, format, len);

        Ok(Self {
            width,
            height,
            format,
            map,
            _fd: fd,
        })
    }

    /// Whether this buffer can hold frames of the given size and format
    pub fn matches(&self, width: u32, height: u32, format: PixelFormat) -> bool {
        self.width == width && self.height == height && self.format == format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Bytes per row
    pub fn stride(&self) -> usize {
        self.width as usize * PixelFormat::BYTES_PER_PIXEL
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn pixels(&self) -> &[u8] {
        &self.map
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.map
    }
}

impl std::fmt::Debug for ScratchBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScratchBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .finish()
    }
}
