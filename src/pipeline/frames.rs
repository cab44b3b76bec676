//! In-flight image buffers

use serde::{Deserialize, Serialize};
use std::io::Write;

/// Pixel value a fresh buffer is filled with
const BLANK_PIXEL: u8 = 255;

/// A completed image, ready for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedFrame {
    /// Row-major 8-bit indexed pixels
    pub pixels: Vec<u8>,
    pub width: u16,
    pub height: u16,
    /// Slot the frame was assembled in
    pub image_slot: u8,
    /// Frames completed before this one since the buffers were sized
    pub sequence: u64,
}

impl RenderedFrame {
    pub fn row(&self, scanline: u16) -> Option<&[u8]> {
        let width = usize::from(self.width);
        let start = usize::from(scanline) * width;
        self.pixels.get(start..start + width)
    }

    /// Write the frame as a binary PGM image
    pub fn write_pgm<W: Write>(&self, mut out: W) -> std::io::Result<()> {
        write!(out, "P5\n{} {}\n255\n", self.width, self.height)?;
        out.write_all(&self.pixels)
    }

    pub fn to_pgm(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.pixels.len() + 16);
        // Writing into a Vec cannot fail
        let _ = self.write_pgm(&mut out);
        out
    }
}

/// One image slot: pixels plus the rows still missing
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    width: u16,
    height: u16,
    pixels: Vec<u8>,
    lines_remaining: u16,
    filled: Vec<bool>,
}

impl FrameBuffer {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            pixels: vec![BLANK_PIXEL; usize::from(width) * usize::from(height)],
            lines_remaining: height,
            filled: vec![false; usize::from(height)],
        }
    }

    pub fn lines_remaining(&self) -> u16 {
        self.lines_remaining
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Store one row; returns `true` when this row completes the frame
    ///
    /// A row delivered twice before completion overwrites the first copy and
    /// does not count again. Callers guarantee `scanline < height` and
    /// `row.len() == width`.
    pub fn write_row(&mut self, scanline: u16, row: &[u8]) -> RowOutcome {
        let width = usize::from(self.width);
        let start = usize::from(scanline) * width;
        if let Some(dst) = self.pixels.get_mut(start..start + width) {
            dst.copy_from_slice(&row[..width.min(row.len())]);
        }
        let Some(seen) = self.filled.get_mut(usize::from(scanline)) else {
            return RowOutcome::Stored;
        };
        if *seen {
            return RowOutcome::Duplicate;
        }
        *seen = true;
        self.lines_remaining -= 1;
        if self.lines_remaining == 0 {
            RowOutcome::Completed
        } else {
            RowOutcome::Stored
        }
    }

    /// Re-arm the counter after a completed frame was emitted
    pub fn reset(&mut self) {
        self.lines_remaining = self.height;
        self.filled.iter_mut().for_each(|f| *f = false);
    }
}

/// What storing a row did to its frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    Stored,
    Duplicate,
    Completed,
}

/// Every image slot of the pipeline
#[derive(Debug, Clone)]
pub struct FrameSet {
    width: u16,
    height: u16,
    slots: Vec<FrameBuffer>,
    sequence: u64,
}

impl FrameSet {
    pub fn new(width: u16, height: u16, slots: usize) -> Self {
        Self {
            width,
            height,
            slots: (0..slots).map(|_| FrameBuffer::new(width, height)).collect(),
            sequence: 0,
        }
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, index: usize) -> Option<&FrameBuffer> {
        self.slots.get(index)
    }

    /// Discard partially assembled frames
    pub fn reset_all(&mut self) {
        self.slots.iter_mut().for_each(FrameBuffer::reset);
    }

    /// Store a row, returning the finished frame if it completed one
    ///
    /// The second element reports whether the row was a duplicate.
    pub fn store(&mut self, slot: u8, scanline: u16, row: &[u8]) -> (Option<RenderedFrame>, bool) {
        let Some(buffer) = self.slots.get_mut(usize::from(slot)) else {
            return (None, false);
        };
        match buffer.write_row(scanline, row) {
            RowOutcome::Stored => (None, false),
            RowOutcome::Duplicate => (None, true),
            RowOutcome::Completed => {
                let frame = RenderedFrame {
                    pixels: buffer.pixels.clone(),
                    width: self.width,
                    height: self.height,
                    image_slot: slot,
                    sequence: self.sequence,
                };
                buffer.reset();
                self.sequence += 1;
                (Some(frame), false)
            }
        }
    }
}
