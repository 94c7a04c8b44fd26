//! Copies the host's rendered frame into the scratch buffer

use anyhow::{Context, Result};

use super::host::{CopyPass, RenderHost};
use crate::buffer::{PixelFormat, ScratchBuffer};

/// Stages rendered frames into a scratch buffer on the render timeline
#[derive(Debug, Clone, Copy)]
pub struct FrameStager {
    pass: CopyPass,
}

impl FrameStager {
    /// Stager filling buffers shaped like `scratch`
    pub fn for_buffer(scratch: &ScratchBuffer) -> Self {
        Self {
            pass: CopyPass {
                width: scratch.width(),
                height: scratch.height(),
                target_format: scratch.format(),
            },
        }
    }

    pub fn pass(&self) -> CopyPass {
        self.pass
    }

    /// Blit the host's current frame into `scratch`, converting pixel layout
    pub fn stage(&self, host: &dyn RenderHost, scratch: &mut ScratchBuffer) -> Result<()> {
        let frame = host.current_frame().context("Failed to read rendered frame")?;

        anyhow::ensure!(
            frame.width == self.pass.width && frame.height == self.pass.height,
            "Rendered frame is {}x{}, recording expects {}x{}",
            frame.width,
            frame.height,
            self.pass.width,
            self.pass.height
        );
        anyhow::ensure!(
            scratch.matches(self.pass.width, self.pass.height, self.pass.target_format),
            "Scratch buffer {:?} does not match copy pass {:?}",
            scratch,
            self.pass
        );
        let row_bytes = frame.width as usize * PixelFormat::BYTES_PER_PIXEL;
        let needed = frame.stride * (frame.height as usize - 1) + row_bytes;
        anyhow::ensure!(
            frame.stride >= row_bytes && frame.data.len() >= needed,
            "Rendered frame data is too short ({} bytes, stride {})",
            frame.data.len(),
            frame.stride
        );

        let stride = scratch.stride();
        let target = self.pass.target_format;
        let dst = scratch.pixels_mut();
        for y in 0..frame.height {
            let start = y as usize * stride;
            frame
                .format
                .convert_into(target, frame.row(y), &mut dst[start..start + row_bytes]);
        }

        Ok(())
    }
}
