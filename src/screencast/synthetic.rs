//! Synthetic render and audio sources for exercising the recorder without a
//! real host application

use anyhow::{Result, bail};

use super::host::{AudioSource, CopyPass, FrameView, RenderHost};
use crate::buffer::PixelFormat;

/// SMPTE-style bar colours as RGB
const BARS: [[u8; 3]; 7] = [
    [192, 192, 192],
    [192, 192, 0],
    [0, 192, 192],
    [0, 192, 0],
    [192, 0, 192],
    [192, 0, 0],
    [0, 0, 192],
];

/// Render host producing scrolling BGRA colour bars
pub struct TestPattern {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    copy_pass: Option<CopyPass>,
}

impl TestPattern {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            bail!("Invalid test pattern size {}x{}", width, height);
        }
        let mut pattern = Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * PixelFormat::BYTES_PER_PIXEL],
            copy_pass: None,
        };
        pattern.render(0);
        Ok(pattern)
    }

    pub fn copy_pass(&self) -> Option<CopyPass> {
        self.copy_pass
    }

    /// Draw frame `frame_index`; the bars shift one pixel per frame
    pub fn render(&mut self, frame_index: u64) {
        let width = self.width as usize;
        let bar_width = width.div_ceil(BARS.len()).max(1);
        let shift = (frame_index % width as u64) as usize;

        for (y, row) in self
            .pixels
            .chunks_exact_mut(width * PixelFormat::BYTES_PER_PIXEL)
            .enumerate()
        {
            // Dim the bottom quarter so vertical orientation is visible
            let dim = y >= self.height as usize * 3 / 4;
            for (x, pixel) in row.chunks_exact_mut(PixelFormat::BYTES_PER_PIXEL).enumerate() {
                let [r, g, b] = BARS[((x + shift) % width) / bar_width % BARS.len()];
                let (r, g, b) = if dim { (r / 4, g / 4, b / 4) } else { (r, g, b) };
                pixel.copy_from_slice(&[b, g, r, 255]);
            }
        }
    }
}

impl RenderHost for TestPattern {
    fn frame_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn install_copy_pass(&mut self, pass: CopyPass) -> Result<()> {
        if (pass.width, pass.height) != (self.width, self.height) {
            bail!(
                "Copy pass is {}x{}, pattern renders {}x{}",
                pass.width,
                pass.height,
                self.width,
                self.height
            );
        }
        log::debug!("Installed copy pass {:?}", pass);
        self.copy_pass = Some(pass);
        Ok(())
    }

    fn remove_copy_pass(&mut self) {
        if self.copy_pass.take().is_some() {
            log::debug!("Removed copy pass");
        }
    }

    fn current_frame(&self) -> Result<FrameView<'_>> {
        Ok(FrameView {
            width: self.width,
            height: self.height,
            format: PixelFormat::Bgra8,
            stride: self.width as usize * PixelFormat::BYTES_PER_PIXEL,
            data: &self.pixels,
        })
    }
}

/// Interleaved sine tone generator
pub struct ToneGenerator {
    sample_rate: u32,
    channels: u32,
    frequency: f32,
    amplitude: f32,
    phase: f32,
}

impl ToneGenerator {
    pub fn new(sample_rate: u32, channels: u32, frequency: f32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            channels: channels.max(1),
            frequency,
            amplitude: 0.25,
            phase: 0.0,
        }
    }

    /// Produce `frames` sample frames, every channel carrying the same tone
    pub fn next_block(&mut self, frames: usize) -> Vec<f32> {
        let step = std::f32::consts::TAU * self.frequency / self.sample_rate as f32;
        let mut samples = Vec::with_capacity(frames * self.channels as usize);
        for _ in 0..frames {
            let value = self.phase.sin() * self.amplitude;
            samples.extend(std::iter::repeat_n(value, self.channels as usize));
            self.phase = (self.phase + step) % std::f32::consts::TAU;
        }
        samples
    }
}

impl AudioSource for ToneGenerator {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u32 {
        self.channels
    }
}
