//! Interfaces the recorder needs from the hosting application

use anyhow::Result;

use crate::buffer::PixelFormat;

/// Read-only view of the frame the host just finished rendering
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Bytes per row, at least `width * 4`
    pub stride: usize,
    pub data: &'a [u8],
}

impl FrameView<'_> {
    /// Pixel bytes of row `y` without stride padding
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        &self.data[start..start + self.width as usize * PixelFormat::BYTES_PER_PIXEL]
    }
}

/// Description of the copy pass installed into the host's render timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyPass {
    pub width: u32,
    pub height: u32,
    /// Layout the encoder expects the staged pixels in
    pub target_format: PixelFormat,
}

/// The render timeline a recording samples frames from
///
/// While a copy pass is installed the host calls
/// [`crate::screencast::RecordingSession::on_frame`] once per rendered frame,
/// after that frame's contents are stable.
pub trait RenderHost: Send {
    /// Size in pixels of the frames the host renders
    fn frame_size(&self) -> (u32, u32);

    /// Start calling the recorder each frame and executing `pass`
    fn install_copy_pass(&mut self, pass: CopyPass) -> Result<()>;

    /// Stop calling the recorder; no frame is admitted after this returns
    fn remove_copy_pass(&mut self);

    /// The most recently completed frame
    fn current_frame(&self) -> Result<FrameView<'_>>;
}

/// Format of the blocks the host's audio callback delivers
pub trait AudioSource: Send {
    fn sample_rate(&self) -> u32;
    fn channels(&self) -> u32;
}
