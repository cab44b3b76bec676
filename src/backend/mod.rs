//! Backend thread hosting the pipeline
//!
//! The pipeline is single threaded and must never block on the UI, so it runs
//! on its own thread and talks to the frontend through crossbeam channels.
//! Commands use a bounded queue; events use the two lanes of
//! [`event_channel`], so a full frame queue never holds back a fault.
//!
//! # Architecture
//!
//! - [`PipelineCommand`] - Messages sent from the frontend to the backend
//! - [`PipelineEvent`] - Messages sent from the backend to the frontend
//! - [`FrontendHandle`] - Frontend side: send commands, receive events
//! - [`FabricBackend`] - Entry point that owns the pipeline until `run`
//! - [`BackendWorker`] - The loop: drain commands, run one reactor turn
//!
//! # Example
//!
//! ```ignore
//! use fabric_fractal::backend::FabricBackend;
//! use fabric_fractal::config::{FabricTopology, PipelineConfig};
//! use fabric_fractal::fabric::MockFabricBackend;
//!
//! let topology = FabricTopology::zynq_7030();
//! let fabric = MockFabricBackend::new(topology.clone());
//! let (backend, frontend) =
//!     FabricBackend::new(PipelineConfig::default(), topology, Box::new(fabric))?;
//!
//! std::thread::spawn(move || backend.run());
//! frontend.activate(4);
//!
//! for event in frontend.drain() {
//!     if let PipelineEvent::RenderedFrame(frame) = event {
//!         // display frame.pixels
//!     }
//! }
//! ```

pub mod worker;

pub use worker::BackendWorker;

pub use crate::pipeline::PipelineEvent;

use crate::config::{FabricTopology, PipelineConfig};
use crate::error::Result;
use crate::fabric::Fabric;
use crate::pipeline::{event_channel, EventReceiver, EventSender, MandelbrotPipeline};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

/// Message sent from the frontend to the backend
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineCommand {
    /// Start rendering with up to this many workers
    Activate { max_workers: usize },
    /// Stop rendering and release the fabric
    Deactivate,
    /// Change the image size (only while inactive)
    SetSize { width: u16, height: u16 },
    /// Pan to a point, applied at the next frame boundary
    SetViewportTarget { x: f64, y: f64 },
    /// Return to the default zoom at the next frame boundary
    ResetZoom,
    /// Ask for the held nodes
    RequestResources,
    /// Ask for current statistics
    RequestStats,
    /// Shutdown the backend
    Shutdown,
}

/// Frontend side of the backend channels
pub struct FrontendHandle {
    /// Receiver for pipeline events
    pub receiver: EventReceiver,
    /// Sender for commands to the backend
    pub command_sender: Sender<PipelineCommand>,
}

impl FrontendHandle {
    /// Try to receive an event without blocking
    pub fn try_recv(&self) -> Option<PipelineEvent> {
        self.receiver.try_recv().ok()
    }

    /// Wait up to `timeout` for the next event
    pub fn recv_timeout(&self, timeout: Duration) -> Option<PipelineEvent> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Receive all pending events
    pub fn drain(&self) -> Vec<PipelineEvent> {
        self.receiver.try_iter().collect()
    }

    /// Send a command to the backend
    pub fn send_command(&self, cmd: PipelineCommand) -> bool {
        self.command_sender.send(cmd).is_ok()
    }

    pub fn activate(&self, max_workers: usize) {
        let _ = self
            .command_sender
            .send(PipelineCommand::Activate { max_workers });
    }

    pub fn deactivate(&self) {
        let _ = self.command_sender.send(PipelineCommand::Deactivate);
    }

    pub fn set_size(&self, width: u16, height: u16) {
        let _ = self
            .command_sender
            .send(PipelineCommand::SetSize { width, height });
    }

    /// Pan to a point of the complex plane
    pub fn set_viewport_target(&self, x: f64, y: f64) {
        let _ = self
            .command_sender
            .send(PipelineCommand::SetViewportTarget { x, y });
    }

    pub fn reset_zoom(&self) {
        let _ = self.command_sender.send(PipelineCommand::ResetZoom);
    }

    pub fn request_resources(&self) {
        let _ = self.command_sender.send(PipelineCommand::RequestResources);
    }

    pub fn request_stats(&self) {
        let _ = self.command_sender.send(PipelineCommand::RequestStats);
    }

    /// Request shutdown
    pub fn shutdown(&self) {
        let _ = self.command_sender.send(PipelineCommand::Shutdown);
    }
}

/// The pipeline backend that runs in a separate thread
pub struct FabricBackend {
    pipeline: MandelbrotPipeline,
    command_receiver: Receiver<PipelineCommand>,
    event_sender: EventSender,
    poll_timeout: Duration,
    running: Arc<AtomicBool>,
}

impl FabricBackend {
    /// Build the pipeline and the channels connecting it to a frontend
    pub fn new(
        config: PipelineConfig,
        topology: FabricTopology,
        fabric: Box<dyn Fabric>,
    ) -> Result<(Self, FrontendHandle)> {
        let (cmd_tx, cmd_rx) = bounded(config.runtime.command_queue_depth.max(1));
        let (event_tx, event_rx) = event_channel(config.runtime.event_queue_depth);
        let poll_timeout = config.runtime.poll_timeout();
        let pipeline = MandelbrotPipeline::new(config, topology, fabric, event_tx.clone())?;

        let backend = Self {
            pipeline,
            command_receiver: cmd_rx,
            event_sender: event_tx,
            poll_timeout,
            running: Arc::new(AtomicBool::new(true)),
        };
        let frontend = FrontendHandle {
            receiver: event_rx,
            command_sender: cmd_tx,
        };
        Ok((backend, frontend))
    }

    /// Run the backend loop until shutdown
    pub fn run(self) {
        let mut worker = BackendWorker::new(
            self.pipeline,
            self.command_receiver,
            self.event_sender,
            self.poll_timeout,
            self.running,
        );
        worker.run();
    }

    /// Get a handle to stop the backend
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }
}
