//! # fabric-fractal: Mandelbrot rendering on reconfigurable fabric
//!
//! Programs fractal compute images into the free partial-reconfiguration
//! regions of an FPGA fabric, streams scanline requests to them and
//! reassembles the rows they send back into frames. The host side is a single
//! threaded reactor; the hardware is reached only through the [`Fabric`]
//! capability trait.
//!
//! ## Architecture
//!
//! - **Pipeline**: worker pool, connectivity fallback ladder (direct DMA, mux,
//!   per-node DMA, CPU polling), demultiplexer and frame reassembly
//! - **Backend**: hosts the pipeline on its own thread behind crossbeam
//!   channels
//! - **Fabric**: the hardware boundary, with a simulated implementation for
//!   tests and the demo binary (feature `mock-fabric`)
//!
//! ## Configuration
//!
//! [`PipelineConfig`] is read from TOML or JSON; the default file lives in the
//! platform config directory under `fabric-fractal/`. The node layout of the
//! board comes from a floorplan file, see [`config::topology`].
//!
//! ## Example
//!
//! ```ignore
//! use fabric_fractal::{
//!     backend::{FabricBackend, PipelineEvent},
//!     config::{FabricTopology, PipelineConfig},
//!     fabric::MockFabricBackend,
//! };
//!
//! let topology = FabricTopology::load_or_default();
//! let fabric = MockFabricBackend::new(topology.clone());
//! let (backend, frontend) =
//!     FabricBackend::new(PipelineConfig::default(), topology, Box::new(fabric))?;
//!
//! std::thread::spawn(move || backend.run());
//! frontend.activate(8);
//!
//! while let Some(event) = frontend.recv_timeout(std::time::Duration::from_secs(1)) {
//!     if let PipelineEvent::RenderedFrame(frame) = event {
//!         println!("frame {} ready", frame.sequence);
//!     }
//! }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod fabric;
pub mod pipeline;
pub mod protocol;
pub mod types;
pub mod viewport;

// Re-export commonly used types
pub use backend::{FabricBackend, FrontendHandle, PipelineCommand};
pub use config::{FabricTopology, PipelineConfig};
pub use error::{FractalError, Result};
pub use fabric::{Fabric, FabricError};
pub use pipeline::{MandelbrotPipeline, PipelineEvent, RenderedFrame, StatsSnapshot};
pub use types::{NodeId, NodeResource, QueueId, WiringTier};
