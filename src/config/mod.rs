//! Configuration module for fabric-fractal
//!
//! This module handles pipeline configuration:
//! - Image geometry and the number of frames kept in flight
//! - Connectivity limits used by the fallback ladder
//! - Viewport defaults and zoom behaviour
//! - Runtime knobs of the backend thread
//!
//! The fabric floorplan lives in [`topology`].
//!
//! # Files
//!
//! Configuration is stored as TOML (`.toml`) or JSON (any other extension).
//! The default location is platform specific:
//! - **Linux**: `~/.config/fabric-fractal/pipeline.toml`
//! - **macOS**: `~/Library/Application Support/fabric-fractal/pipeline.toml`
//! - **Windows**: `%APPDATA%\fabric-fractal\pipeline.toml`
//!
//! # Example
//!
//! ```ignore
//! use fabric_fractal::config::PipelineConfig;
//!
//! let mut config = PipelineConfig::load_or_default(PipelineConfig::default_path()?);
//! config.image.width = 320;
//! config.validate()?;
//! config.save("pipeline.toml")?;
//! ```

pub mod topology;

pub use topology::{FabricTopology, NodeKind, Rect, TopologyNode};

use crate::error::{FractalError, Result, ResultExt};
use crate::protocol::{MAX_IMAGE_HEIGHT, MAX_IMAGE_SLOTS, MAX_WORKERS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for config directories
pub const APP_ID: &str = "fabric-fractal";

/// Default config filename
pub const CONFIG_FILE: &str = "pipeline.toml";

/// Bitstream loaded into each worker region
pub const DEFAULT_WORKER_BITSTREAM: &str = "mandelbrot";

/// Function name of the aggregation nodes in the floorplan
pub const MUX_FUNCTION: &str = "mux";

/// Get the default config file path
pub fn default_config_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID).join(CONFIG_FILE))
}

// ==================== Image ====================

/// Rendered image geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Pixels per scanline
    pub width: u16,
    /// Scanlines per image
    pub height: u16,
    /// Frame buffers kept in flight
    pub image_slots: usize,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            image_slots: 2,
        }
    }
}

// ==================== Connectivity ====================

/// Limits for worker acquisition and wiring
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// Upper bound on workers requested at activation
    pub max_workers: usize,
    /// Most workers given their own DMA ring before muxing is preferred
    pub max_direct_dma_channels: usize,
    /// Blocks per DMA ring
    pub dma_ring_depth: usize,
    /// Worker outputs per mux node
    pub mux_fan_in: usize,
    /// Bitstream requested for each worker
    pub worker_bitstream: String,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            max_direct_dma_channels: 2,
            dma_ring_depth: 8,
            mux_fan_in: 4,
            worker_bitstream: DEFAULT_WORKER_BITSTREAM.to_string(),
        }
    }
}

// ==================== Viewport ====================

/// Start point and zoom behaviour
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewportConfig {
    pub default_center_x: f64,
    pub default_center_y: f64,
    /// Complex-plane units per pixel at the start of the zoom loop
    pub default_scale: f64,
    /// Scale below which the zoom loop restarts
    pub min_scale: f64,
    /// Scale multiplier applied per frame
    pub zoom_in_factor: f64,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            default_center_x: -0.861_225_622_963_997_4,
            default_center_y: -0.231_391_311_236_533_86,
            default_scale: 0.005,
            min_scale: 0.000_000_000_000_1,
            zoom_in_factor: 0.950,
        }
    }
}

impl ViewportConfig {
    pub fn default_center(&self) -> (f64, f64) {
        (self.default_center_x, self.default_center_y)
    }
}

// ==================== Runtime ====================

/// Backend thread settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Longest wait for fabric readiness per reactor turn
    pub poll_timeout_ms: u64,
    /// Capacity of the backend -> frontend event queue
    pub event_queue_depth: usize,
    /// Capacity of the frontend -> backend command queue
    pub command_queue_depth: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 20,
            event_queue_depth: 64,
            command_queue_depth: 64,
        }
    }
}

impl RuntimeConfig {
    pub fn poll_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_timeout_ms)
    }
}

// ==================== Pipeline Config ====================

/// Complete pipeline configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub image: ImageConfig,

    #[serde(default)]
    pub connectivity: ConnectivityConfig,

    #[serde(default)]
    pub viewport: ViewportConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl PipelineConfig {
    /// Default config location, see the module docs
    pub fn default_path() -> Result<PathBuf> {
        default_config_path().ok_or_else(|| {
            FractalError::Config("Could not determine config directory".to_string())
        })
    }

    /// Check every value against what the wire format and hardware accept
    pub fn validate(&self) -> Result<()> {
        validate_image_size(self.image.width, self.image.height)?;

        if !(2..=MAX_IMAGE_SLOTS).contains(&self.image.image_slots) {
            return Err(FractalError::Config(format!(
                "image_slots must be within 2..={}, got {}",
                MAX_IMAGE_SLOTS, self.image.image_slots
            )));
        }

        let c = &self.connectivity;
        if !(1..=MAX_WORKERS).contains(&c.max_workers) {
            return Err(FractalError::Config(format!(
                "max_workers must be within 1..={}, got {}",
                MAX_WORKERS, c.max_workers
            )));
        }
        if !(4..=8).contains(&c.dma_ring_depth) {
            return Err(FractalError::Config(format!(
                "dma_ring_depth must be within 4..=8, got {}",
                c.dma_ring_depth
            )));
        }
        if !(1..=4).contains(&c.mux_fan_in) {
            return Err(FractalError::Config(format!(
                "mux_fan_in must be within 1..=4, got {}",
                c.mux_fan_in
            )));
        }
        if c.worker_bitstream.is_empty() {
            return Err(FractalError::Config(
                "worker_bitstream must not be empty".to_string(),
            ));
        }

        let v = &self.viewport;
        if !(v.zoom_in_factor > 0.0 && v.zoom_in_factor < 1.0) {
            return Err(FractalError::Config(format!(
                "zoom_in_factor must be between 0 and 1, got {}",
                v.zoom_in_factor
            )));
        }
        if !(v.min_scale > 0.0 && v.min_scale < v.default_scale) {
            return Err(FractalError::Config(format!(
                "min_scale must be positive and below default_scale ({} vs {})",
                v.min_scale, v.default_scale
            )));
        }

        Ok(())
    }

    /// Load a config file, TOML or JSON depending on the extension
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;

        let config: Self = if is_toml(path) {
            toml::from_str(&content).map_err(|e| {
                FractalError::Config(format!("Failed to parse config file {:?}: {}", path, e))
            })?
        } else {
            serde_json::from_str(&content).map_err(|e| {
                FractalError::Config(format!("Failed to parse config file {:?}: {}", path, e))
            })?
        };

        config.validate()?;
        Ok(config)
    }

    /// Load a config file, returning defaults if any error occurs
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                if path.exists() {
                    tracing::warn!("Ignoring config {:?}: {}", path, e);
                }
                Self::default()
            }
        }
    }

    /// Save to disk, TOML or JSON depending on the extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        let content = if is_toml(path) {
            toml::to_string_pretty(self)
                .map_err(|e| FractalError::Serialization(format!("{}", e)))?
        } else {
            serde_json::to_string_pretty(self)
                .map_err(|e| FractalError::Serialization(format!("{}", e)))?
        };

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file {:?}", path))
    }
}

/// Reject sizes the line tag or record header cannot express
pub fn validate_image_size(width: u16, height: u16) -> Result<()> {
    let invalid = |reason: String| FractalError::InvalidSize {
        width: u32::from(width),
        height: u32::from(height),
        reason,
    };
    if width == 0 || height == 0 {
        return Err(invalid("dimensions must be non-zero".to_string()));
    }
    if u32::from(height) > MAX_IMAGE_HEIGHT {
        return Err(invalid(format!(
            "height exceeds {} addressable scanlines",
            MAX_IMAGE_HEIGHT
        )));
    }
    Ok(())
}

fn is_toml(path: &Path) -> bool {
    path.extension()
        .map(|e| e.eq_ignore_ascii_case("toml"))
        .unwrap_or(false)
}
