//! Logical view onto the complex plane
//!
//! The view is kept in floating point but only its fixed-point projection
//! goes on the wire. Changes requested by the user are latched and applied
//! by [`ViewportState::zoom_frame`], which the scheduler runs exactly when a
//! frame boundary is crossed, so every row of one frame shares one view.

use crate::config::ViewportConfig;
use crate::protocol::to_fixed_point;

/// Current view plus pending user input
#[derive(Debug, Clone)]
pub struct ViewportState {
    settings: ViewportConfig,
    width: u16,
    height: u16,
    center_x: f64,
    center_y: f64,
    scale: f64,
    fixed_left_x: i64,
    fixed_scale: i64,
    next_center: Option<(f64, f64)>,
    next_zoom_reset: bool,
}

impl ViewportState {
    pub fn new(settings: ViewportConfig, width: u16, height: u16) -> Self {
        let mut state = Self {
            settings,
            width,
            height,
            center_x: settings.default_center_x,
            center_y: settings.default_center_y,
            scale: settings.default_scale,
            fixed_left_x: 0,
            fixed_scale: 0,
            next_center: None,
            next_zoom_reset: false,
        };
        state.update_fixed();
        state
    }

    /// Change the image geometry the fixed-point cache is derived for
    pub fn resize(&mut self, width: u16, height: u16) {
        self.width = width;
        self.height = height;
        self.update_fixed();
    }

    /// Restart the zoom loop from the default view
    ///
    /// Pending latches survive and are applied at the next frame boundary.
    pub fn restart(&mut self) {
        self.center_x = self.settings.default_center_x;
        self.center_y = self.settings.default_center_y;
        self.scale = self.settings.default_scale;
        self.update_fixed();
    }

    /// Latch a new center, applied at the next frame boundary
    pub fn set_target(&mut self, x: f64, y: f64) {
        self.next_center = Some((x, y));
    }

    /// Latch a zoom reset, applied at the next frame boundary
    pub fn request_zoom_reset(&mut self) {
        self.next_zoom_reset = true;
    }

    pub fn has_pending_target(&self) -> bool {
        self.next_center.is_some()
    }

    /// Advance the view by one frame
    pub fn zoom_frame(&mut self) {
        if let Some((x, y)) = self.next_center.take() {
            self.center_x = x;
            self.center_y = y;
        } else {
            self.scale *= self.settings.zoom_in_factor;
            if self.scale < self.settings.min_scale {
                self.center_x = self.settings.default_center_x;
                self.center_y = self.settings.default_center_y;
                self.scale = self.settings.default_scale;
            }
        }
        if self.next_zoom_reset {
            self.next_zoom_reset = false;
            self.scale = self.settings.default_scale;
        }
        self.update_fixed();
    }

    fn update_fixed(&mut self) {
        let half_width = f64::from(self.width / 2);
        self.fixed_left_x = to_fixed_point(self.center_x - half_width * self.scale);
        self.fixed_scale = to_fixed_point(self.scale);
    }

    /// Fixed-point X of the leftmost pixel
    pub fn fixed_left_x(&self) -> i64 {
        self.fixed_left_x
    }

    /// Fixed-point X step per pixel
    pub fn fixed_scale(&self) -> i64 {
        self.fixed_scale
    }

    /// Fixed-point Y of the given row
    pub fn fixed_row_y(&self, scanline: u16) -> i64 {
        let offset = i32::from(scanline) - i32::from(self.height / 2);
        to_fixed_point(f64::from(offset) * self.scale + self.center_y)
    }

    /// Complex-plane point under a pixel of the current view
    ///
    /// Useful for turning a click into [`ViewportState::set_target`].
    pub fn point_at(&self, px: f64, py: f64) -> (f64, f64) {
        let x = self.center_x + (px - f64::from(self.width / 2)) * self.scale;
        let y = self.center_y + (py - f64::from(self.height / 2)) * self.scale;
        (x, y)
    }

    pub fn center(&self) -> (f64, f64) {
        (self.center_x, self.center_y)
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn settings(&self) -> &ViewportConfig {
        &self.settings
    }
}
