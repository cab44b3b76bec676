//! Scanline pipeline driving the compute workers
//!
//! The pipeline keeps every worker's command queue full: it seeds each worker
//! with a couple of blocks of rows at activation and then, for every row that
//! comes back, queues exactly one replacement request on the worker that
//! produced it. Rows come back out of order across workers, so each record
//! carries its row, image slot and worker in its header.
//!
//! # Architecture
//!
//! ```text
//!            requests (28 B each)
//! Scheduler ──────────────────────► Worker ──► [PR region]
//!     ▲                                             │
//!     │ one replacement per row                     ▼
//! Demuxer ◄── IncomingChannel (DMA / mux / polled) ◄┘
//!     │
//!     └──► FrameSet ──► PipelineEvent::RenderedFrame
//! ```
//!
//! # Design
//!
//! - **Single threaded reactor**: [`MandelbrotPipeline::poll`] waits for
//!   readable queues and drains each one. Nothing in a turn blocks.
//! - **Scheduled aborts**: a fault found while draining is recorded and acted
//!   on at the end of the turn, never from inside the drain.
//! - **Explicit teardown**: channels, then muxes, then workers, routes always
//!   removed before a node is released.

pub mod channel;
pub mod demux;
pub mod events;
pub mod frames;
pub mod planner;
pub mod scheduler;
pub mod stats;
pub mod worker;

pub use channel::{DmaRing, IncomingChannel, PolledReader};
pub use demux::{ResultDemuxer, ScanlineRecord};
pub use events::{event_channel, EventReceiver, EventSender};
pub use frames::{FrameBuffer, FrameSet, RenderedFrame, RowOutcome};
pub use planner::{Connectivity, ConnectivityPlanner, MuxNode};
pub use scheduler::{lines_per_block, seed_count, ScanlineScheduler};
pub use stats::{FrameRateCounter, PipelineStats, StatsSnapshot};
pub use worker::Worker;

use crate::config::{validate_image_size, FabricTopology, PipelineConfig};
use crate::error::{FractalError, Result};
use crate::fabric::Fabric;
use crate::types::{NodeResource, QueueId, WiringTier};
use crate::viewport::ViewportState;
use std::ops::ControlFlow;
use std::time::Duration;

/// Notifications from the pipeline to whoever displays its output
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A frame finished
    RenderedFrame(RenderedFrame),
    /// The pipeline started or stopped
    ActiveStateChanged(bool),
    /// A fatal fault stopped the pipeline
    Fault(String),
    /// Nodes held by the pipeline
    Resources(Vec<NodeResource>),
    Stats(StatsSnapshot),
    /// The backend thread is exiting
    Shutdown,
}

/// Worker-pool scanline pipeline
pub struct MandelbrotPipeline {
    config: PipelineConfig,
    topology: FabricTopology,
    fabric: Box<dyn Fabric>,
    events: EventSender,
    frames: FrameSet,
    demuxer: ResultDemuxer,
    scheduler: ScanlineScheduler,
    session: Option<Connectivity>,
    abort_pending: Option<String>,
    stats: PipelineStats,
}

impl std::fmt::Debug for MandelbrotPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MandelbrotPipeline")
            .field("image", &self.config.image)
            .field("active", &self.is_active())
            .field("abort_pending", &self.abort_pending)
            .finish_non_exhaustive()
    }
}

impl MandelbrotPipeline {
    pub fn new(
        config: PipelineConfig,
        topology: FabricTopology,
        fabric: Box<dyn Fabric>,
        events: EventSender,
    ) -> Result<Self> {
        config.validate()?;
        let image = config.image;
        Ok(Self {
            frames: FrameSet::new(image.width, image.height, image.image_slots),
            demuxer: ResultDemuxer::new(image.width, image.height, image.image_slots),
            scheduler: ScanlineScheduler::new(image, config.viewport),
            config,
            topology,
            fabric,
            events,
            session: None,
            abort_pending: None,
            stats: PipelineStats::default(),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn topology(&self) -> &FabricTopology {
        &self.topology
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Resize the frame buffers; refused while running
    pub fn set_size(&mut self, width: u16, height: u16) -> Result<()> {
        if self.is_active() {
            return Err(FractalError::Active);
        }
        validate_image_size(width, height)?;
        let slots = self.config.image.image_slots;
        self.config.image.width = width;
        self.config.image.height = height;
        self.frames = FrameSet::new(width, height, slots);
        self.demuxer = ResultDemuxer::new(width, height, slots);
        self.scheduler.resize(width, height);
        tracing::debug!("Image size set to {}x{}", width, height);
        Ok(())
    }

    /// Acquire and wire up to `max_workers` workers and start rendering
    ///
    /// Returns the number of connected workers. On failure nothing stays
    /// acquired.
    pub fn activate(&mut self, max_workers: usize) -> Result<usize> {
        if self.is_active() {
            return Err(FractalError::Active);
        }
        self.abort_pending = None;
        self.scheduler.restart();
        self.frames.reset_all();

        let planner =
            ConnectivityPlanner::new(&self.topology, &self.config.connectivity, self.config.image);
        let mut plan = planner.plan(self.fabric.as_mut(), max_workers)?;

        let workers = plan.workers.len();
        let lines = seed_count(self.config.image.height, workers, plan.lines_per_block);
        for line in 0..lines {
            let index = line % workers;
            let request = self.scheduler.next_request(index as u8);
            plan.workers[index].queue_work(request);
        }
        let fabric = self.fabric.as_mut();
        let seeded = plan
            .workers
            .iter_mut()
            .try_for_each(|worker| worker.flush(&mut *fabric).map(drop));
        if let Err(e) = seeded {
            tracing::error!("Seeding failed: {}", e);
            plan.release(fabric);
            return Err(e);
        }
        self.stats.requests_issued += lines as u64;
        self.stats.activations += 1;
        self.stats.frame_rate.reset();
        tracing::info!(
            "Pipeline active: {} worker(s), {} lines per block, {} line(s) seeded",
            workers,
            plan.lines_per_block,
            lines
        );
        self.session = Some(plan);
        self.events.send_state(PipelineEvent::ActiveStateChanged(true));
        Ok(workers)
    }

    /// Tear everything down; a no-op when inactive
    pub fn deactivate(&mut self) {
        self.abort_pending = None;
        if let Some(plan) = self.session.take() {
            plan.release(self.fabric.as_mut());
            tracing::info!("Pipeline inactive");
            self.events.send_state(PipelineEvent::ActiveStateChanged(false));
        }
    }

    /// Latch a new view center, applied at the next frame boundary
    pub fn set_viewport_target(&mut self, x: f64, y: f64) {
        self.scheduler.viewport_mut().set_target(x, y);
    }

    /// Latch a zoom reset, applied at the next frame boundary
    pub fn reset_zoom(&mut self) {
        self.scheduler.viewport_mut().request_zoom_reset();
    }

    pub fn viewport(&self) -> &ViewportState {
        self.scheduler.viewport()
    }

    /// `(node, function)` of every node held
    pub fn resources(&self) -> Vec<NodeResource> {
        self.session
            .as_ref()
            .map(|plan| plan.resources(&self.config.connectivity.worker_bitstream))
            .unwrap_or_default()
    }

    pub fn worker_count(&self) -> usize {
        self.session.as_ref().map_or(0, Connectivity::worker_count)
    }

    /// Wiring tier of each connected worker
    pub fn tiers(&self) -> Vec<WiringTier> {
        self.session
            .as_ref()
            .map(|plan| plan.tiers.clone())
            .unwrap_or_default()
    }

    /// Host queues to wait on
    pub fn watched_queues(&self) -> Vec<QueueId> {
        self.session
            .as_ref()
            .map(|plan| plan.channels.iter().map(IncomingChannel::queue).collect())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn abort_pending(&self) -> bool {
        self.abort_pending.is_some()
    }

    /// Drain one readable queue and replenish the workers
    ///
    /// Returns the number of rows consumed. Unknown queues are ignored.
    pub fn handle_ready(&mut self, queue: QueueId) -> Result<usize> {
        if self.abort_pending.is_some() {
            return Ok(0);
        }
        let Self {
            fabric,
            session,
            frames,
            demuxer,
            scheduler,
            stats,
            events,
            abort_pending,
            ..
        } = self;
        let Some(plan) = session.as_mut() else {
            return Ok(0);
        };
        let Connectivity {
            workers, channels, ..
        } = plan;
        let Some(channel) = channels.iter_mut().find(|c| c.queue() == queue) else {
            tracing::trace!("Ignoring readiness of unknown {}", queue);
            return Ok(0);
        };

        let mut reassembly = Reassembly {
            frames,
            demuxer: *demuxer,
            scheduler,
            stats: &mut *stats,
            events,
            workers: workers.as_mut_slice(),
            abort_pending: &mut *abort_pending,
            consumed: 0,
        };
        let drained = channel.service(fabric.as_mut(), &mut |bytes: &[u8]| reassembly.consume(bytes));
        let consumed = reassembly.consumed;
        if let Err(e) = drained {
            schedule_abort(abort_pending, stats, format!("channel {} failed: {}", queue, e));
            return Err(e);
        }
        if abort_pending.is_some() {
            return Ok(consumed);
        }

        for worker in workers.iter_mut() {
            if let Err(e) = worker.flush(fabric.as_mut()) {
                schedule_abort(abort_pending, stats, e.to_string());
                return Err(e);
            }
        }
        Ok(consumed)
    }

    /// One reactor turn: wait up to `timeout`, drain ready queues, act on
    /// faults
    ///
    /// Returns the number of rows consumed.
    pub fn poll(&mut self, timeout: Duration) -> Result<usize> {
        self.run_pending_abort();
        if !self.is_active() {
            return Ok(0);
        }
        let queues = self.watched_queues();
        let ready = match self.fabric.wait_readable(&queues, timeout) {
            Ok(ready) => ready,
            Err(e) => {
                schedule_abort(&mut self.abort_pending, &mut self.stats, e.to_string());
                self.run_pending_abort();
                return Err(e.into());
            }
        };

        let mut consumed = 0;
        let mut failure = None;
        for queue in ready {
            if self.abort_pending.is_some() {
                break;
            }
            match self.handle_ready(queue) {
                Ok(n) => consumed += n,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        self.run_pending_abort();
        match failure {
            Some(e) => Err(e),
            None => Ok(consumed),
        }
    }

    fn run_pending_abort(&mut self) {
        if let Some(reason) = self.abort_pending.take() {
            tracing::error!("Aborting pipeline: {}", reason);
            self.events.send_state(PipelineEvent::Fault(reason));
            self.deactivate();
        }
    }
}

impl Drop for MandelbrotPipeline {
    fn drop(&mut self) {
        if let Some(plan) = self.session.take() {
            plan.release(self.fabric.as_mut());
        }
    }
}

fn schedule_abort(abort_pending: &mut Option<String>, stats: &mut PipelineStats, reason: String) {
    if abort_pending.is_none() {
        stats.faults += 1;
        *abort_pending = Some(reason);
    }
}

/// Per-drain view of the state a received record touches
struct Reassembly<'a> {
    frames: &'a mut FrameSet,
    demuxer: ResultDemuxer,
    scheduler: &'a mut ScanlineScheduler,
    stats: &'a mut PipelineStats,
    events: &'a EventSender,
    workers: &'a mut [Worker],
    abort_pending: &'a mut Option<String>,
    consumed: usize,
}

impl Reassembly<'_> {
    fn consume(&mut self, bytes: &[u8]) -> ControlFlow<()> {
        self.stats.bytes_received += bytes.len() as u64;
        let record_size = self.demuxer.record_size();
        if bytes.len() < record_size {
            if !bytes.is_empty() {
                tracing::warn!("Ignoring {} byte(s), less than one record", bytes.len());
            }
            return ControlFlow::Continue(());
        }
        let trailing = self.demuxer.trailing_bytes(bytes.len());
        if trailing != 0 {
            tracing::warn!(
                "Strange size: {} bytes, expected a multiple of {} ({} trailing byte(s) ignored)",
                bytes.len(),
                record_size,
                trailing
            );
        }

        for record in self.demuxer.records(bytes, self.workers.len()) {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    tracing::error!("Invalid record: {}", e);
                    schedule_abort(self.abort_pending, self.stats, format!("protocol desync: {}", e));
                    return ControlFlow::Break(());
                }
            };
            let tag = record.tag;
            self.stats.scanlines_received += 1;
            self.consumed += 1;

            let (frame, duplicate) = self.frames.store(tag.image_slot, tag.scanline, record.pixels);
            if duplicate {
                tracing::debug!("Duplicate scanline {} in slot {}", tag.scanline, tag.image_slot);
                self.stats.duplicate_lines += 1;
            }
            if let Some(frame) = frame {
                self.stats.frames_rendered += 1;
                if let Some(rate) = self.stats.frame_rate.frame() {
                    tracing::debug!("{:.1} frames per second", rate);
                }
                if !self.events.send_frame(frame) {
                    self.stats.dropped_frames += 1;
                }
            }

            let request = self.scheduler.next_request(tag.worker);
            if let Some(worker) = self.workers.get_mut(usize::from(tag.worker)) {
                worker.queue_work(request);
                self.stats.requests_issued += 1;
            }
        }
        ControlFlow::Continue(())
    }
}
