//! Logical cursor over scanlines and image slots

use crate::config::{ImageConfig, ViewportConfig};
use crate::protocol::{LineTag, ScanlineRequest};
use crate::viewport::ViewportState;

/// Fewest rows queued per worker per block
pub const MIN_LINES_PER_BLOCK: u16 = 2;

/// Most rows a worker's command queue holds per block without stalling
pub const MAX_LINES_PER_BLOCK: u16 = 18;

/// Rows per block for `workers` workers, even and clamped to the queue depth
pub fn lines_per_block(height: u16, workers: usize) -> u16 {
    let lines = (usize::from(height) / (workers + 1)) & !1;
    (lines.min(usize::from(MAX_LINES_PER_BLOCK)) as u16).max(MIN_LINES_PER_BLOCK)
}

/// Requests issued at activation: two blocks per worker, at most one frame
pub fn seed_count(height: u16, workers: usize, lines_per_block: u16) -> usize {
    (2 * workers * usize::from(lines_per_block)).min(usize::from(height))
}

/// Hands out the next row to compute
///
/// Rows are issued in order. Crossing the last row moves on to the next image
/// slot and advances the viewport, so every row of one slot shares one view.
#[derive(Debug, Clone)]
pub struct ScanlineScheduler {
    width: u16,
    height: u16,
    slots: usize,
    scanline: u16,
    image_slot: u8,
    viewport: ViewportState,
}

impl ScanlineScheduler {
    pub fn new(image: ImageConfig, viewport: ViewportConfig) -> Self {
        Self {
            width: image.width,
            height: image.height,
            slots: image.image_slots.max(1),
            scanline: 0,
            image_slot: 0,
            viewport: ViewportState::new(viewport, image.width, image.height),
        }
    }

    pub fn resize(&mut self, width: u16, height: u16) {
        self.width = width;
        self.height = height;
        self.scanline = 0;
        self.image_slot = 0;
        self.viewport.resize(width, height);
    }

    /// Rewind to the first row of slot 0 and the default view
    pub fn restart(&mut self) {
        self.scanline = 0;
        self.image_slot = 0;
        self.viewport.restart();
    }

    /// Build the request for the current row and advance the cursor
    pub fn next_request(&mut self, worker: u8) -> ScanlineRequest {
        let tag = LineTag {
            scanline: self.scanline,
            image_slot: self.image_slot,
            worker,
        };
        let request = ScanlineRequest {
            line: tag.pack(),
            size: self.width,
            ax: self.viewport.fixed_left_x(),
            ay: self.viewport.fixed_row_y(self.scanline),
            incr: self.viewport.fixed_scale(),
        };

        self.scanline += 1;
        if self.scanline >= self.height {
            self.scanline = 0;
            self.image_slot = ((usize::from(self.image_slot) + 1) % self.slots) as u8;
            self.viewport.zoom_frame();
        }
        request
    }

    /// Current `(scanline, image_slot)`
    pub fn cursor(&self) -> (u16, u8) {
        (self.scanline, self.image_slot)
    }

    pub fn viewport(&self) -> &ViewportState {
        &self.viewport
    }

    pub fn viewport_mut(&mut self) -> &mut ViewportState {
        &mut self.viewport
    }
}
