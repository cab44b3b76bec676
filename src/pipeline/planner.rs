//! Acquiring workers and wiring them to incoming channels
//!
//! Workers are taken first, as many as the fabric gives. They are then wired
//! through a fallback ladder, each tier picking up where the previous one ran
//! out of resources:
//!
//! 1. direct DMA, one ring per worker, only if every worker gets one
//! 2. mux aggregation, up to `mux_fan_in` workers per mux and one ring each
//! 3. per-node DMA for whatever is left while rings remain
//! 4. a CPU-polled read fifo per remaining worker
//!
//! Exhaustion only moves on to the next tier. Workers no tier could wire are
//! released; zero wired workers fails the whole plan.

use super::channel::{DmaRing, IncomingChannel, PolledReader};
use super::scheduler::lines_per_block;
use super::worker::Worker;
use crate::config::{ConnectivityConfig, FabricTopology, ImageConfig, MUX_FUNCTION};
use crate::error::{FractalError, Result};
use crate::fabric::{DmaConfig, Fabric, FabricError, FabricResult};
use crate::protocol::{record_size, MAX_WORKERS};
use crate::types::{Endpoint, NodeId, NodeResource, WiringTier};

/// A fixed mux node held for the lifetime of a plan
#[derive(Debug)]
pub struct MuxNode {
    node: NodeId,
}

impl MuxNode {
    pub fn acquire(fabric: &mut dyn Fabric, node: NodeId) -> FabricResult<Self> {
        fabric.acquire_fixed_node(node)?;
        if let Err(e) = fabric.enable_node(node) {
            fabric.release_node(node);
            return Err(e);
        }
        Ok(Self { node })
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Drop the fan-in routes, then disable and release
    pub fn release(self, fabric: &mut dyn Fabric) {
        if let Err(e) = fabric.delete_routes(self.node) {
            tracing::warn!("Failed to delete routes of mux {}: {}", self.node, e);
        }
        if let Err(e) = fabric.disable_node(self.node) {
            tracing::warn!("Failed to disable mux {}: {}", self.node, e);
        }
        fabric.release_node(self.node);
    }
}

/// Everything a successful plan holds
#[derive(Debug, Default)]
pub struct Connectivity {
    pub workers: Vec<Worker>,
    pub channels: Vec<IncomingChannel>,
    pub muxes: Vec<MuxNode>,
    /// Tier each worker was wired by, indexed like `workers`
    pub tiers: Vec<WiringTier>,
    pub lines_per_block: u16,
}

impl Connectivity {
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Workers wired by `tier`
    pub fn count_tier(&self, tier: WiringTier) -> usize {
        self.tiers.iter().filter(|t| **t == tier).count()
    }

    /// `(node, function)` of every held node
    pub fn resources(&self, bitstream: &str) -> Vec<NodeResource> {
        self.workers
            .iter()
            .map(|w| NodeResource::new(w.node(), bitstream))
            .chain(
                self.muxes
                    .iter()
                    .map(|m| NodeResource::new(m.node(), MUX_FUNCTION)),
            )
            .collect()
    }

    /// Tear down: channels, then muxes, then workers
    pub fn release(self, fabric: &mut dyn Fabric) {
        for channel in self.channels {
            channel.release(fabric);
        }
        for mux in self.muxes {
            mux.release(fabric);
        }
        for worker in self.workers {
            worker.release(fabric);
        }
    }
}

/// Builds a [`Connectivity`] against the current state of the fabric
#[derive(Debug, Clone)]
pub struct ConnectivityPlanner<'a> {
    topology: &'a FabricTopology,
    settings: &'a ConnectivityConfig,
    image: ImageConfig,
}

impl<'a> ConnectivityPlanner<'a> {
    pub fn new(
        topology: &'a FabricTopology,
        settings: &'a ConnectivityConfig,
        image: ImageConfig,
    ) -> Self {
        Self {
            topology,
            settings,
            image,
        }
    }

    /// Acquire up to `max_workers` workers and wire as many as possible
    pub fn plan(&self, fabric: &mut dyn Fabric, max_workers: usize) -> Result<Connectivity> {
        let mut built = Connectivity::default();
        if let Err(e) = self.acquire_workers(fabric, max_workers, &mut built) {
            built.release(fabric);
            return Err(e);
        }
        let acquired = built.workers.len();
        if acquired == 0 {
            tracing::warn!("No worker could be acquired");
            return Err(FractalError::NoConnectivity { acquired: 0 });
        }
        built.lines_per_block = lines_per_block(self.image.height, acquired);

        if let Err(e) = self.wire(fabric, &mut built) {
            tracing::error!("Wiring failed: {}", e);
            built.release(fabric);
            return Err(e);
        }

        let connected = built.tiers.len();
        if connected == 0 {
            tracing::warn!("None of {} worker(s) could be connected", acquired);
            built.release(fabric);
            return Err(FractalError::NoConnectivity { acquired });
        }
        for worker in built.workers.split_off(connected) {
            tracing::info!("Releasing unconnected worker on node {}", worker.node());
            worker.release(fabric);
        }

        tracing::info!(
            "Connected {} of {} worker(s): {} direct, {} mux, {} per-node, {} polled, {} lines per block",
            connected,
            acquired,
            built.count_tier(WiringTier::DirectDma),
            built.count_tier(WiringTier::Mux),
            built.count_tier(WiringTier::PerNodeDma),
            built.count_tier(WiringTier::CpuPolled),
            built.lines_per_block
        );
        Ok(built)
    }

    fn acquire_workers(
        &self,
        fabric: &mut dyn Fabric,
        max_workers: usize,
        built: &mut Connectivity,
    ) -> Result<()> {
        let wanted = max_workers.min(self.settings.max_workers).min(MAX_WORKERS);
        for index in 0..wanted {
            match Worker::acquire(fabric, index as u8, &self.settings.worker_bitstream) {
                Ok(worker) => built.workers.push(worker),
                Err(e) if e.is_exhaustion() => {
                    tracing::debug!("Stopped at {} worker(s): {}", index, e);
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn dma_config(&self, lines_per_block: u16) -> DmaConfig {
        DmaConfig {
            block_size: usize::from(lines_per_block) * record_size(self.image.width),
            block_count: self.settings.dma_ring_depth,
        }
    }

    fn wire(&self, fabric: &mut dyn Fabric, built: &mut Connectivity) -> Result<()> {
        let total = built.workers.len();
        let config = self.dma_config(built.lines_per_block);

        let direct_limit = self
            .settings
            .max_direct_dma_channels
            .min(fabric.free_dma_channels());
        if total <= direct_limit {
            self.wire_direct(fabric, built, config)?;
        } else {
            tracing::debug!(
                "{} worker(s) exceed {} direct DMA channel(s)",
                total,
                direct_limit
            );
        }
        if built.tiers.len() < total {
            self.wire_muxes(fabric, built, config)?;
        }
        if built.tiers.len() < total {
            self.wire_per_node(fabric, built, config)?;
        }
        if built.tiers.len() < total {
            self.wire_polled(fabric, built)?;
        }
        Ok(())
    }

    /// All workers get their own ring, or none do
    fn wire_direct(
        &self,
        fabric: &mut dyn Fabric,
        built: &mut Connectivity,
        config: DmaConfig,
    ) -> Result<()> {
        let mut rings = Vec::with_capacity(built.workers.len());
        for worker in &built.workers {
            match DmaRing::open(fabric, worker.node(), config) {
                Ok(ring) => rings.push(ring),
                Err(e) => {
                    for ring in rings {
                        ring.release(fabric);
                    }
                    if e.is_exhaustion() {
                        tracing::warn!("Direct DMA unavailable: {}", e);
                        return Ok(());
                    }
                    return Err(e.into());
                }
            }
        }
        for (worker, ring) in rings.into_iter().enumerate() {
            built.channels.push(IncomingChannel::DirectDma { ring, worker });
            built.tiers.push(WiringTier::DirectDma);
        }
        Ok(())
    }

    fn wire_muxes(
        &self,
        fabric: &mut dyn Fabric,
        built: &mut Connectivity,
        config: DmaConfig,
    ) -> Result<()> {
        let total = built.workers.len();
        let fan_in = self.settings.mux_fan_in;
        for node in self.topology.mux_nodes() {
            if built.tiers.len() == total {
                break;
            }
            let mux = match MuxNode::acquire(fabric, node) {
                Ok(mux) => mux,
                Err(e) if e.is_exhaustion() => {
                    // Another user may hold it, try the next one
                    tracing::debug!("Failed to acquire mux {}: {}", node, e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let ring = match DmaRing::open(fabric, node, config) {
                Ok(ring) => ring,
                Err(e) => {
                    mux.release(fabric);
                    if e.is_exhaustion() {
                        tracing::warn!("No DMA channel for mux {}: {}", node, e);
                        return Ok(());
                    }
                    return Err(e.into());
                }
            };
            // Held from here on so a failed route still tears it down
            built.muxes.push(mux);

            let mut group = Vec::with_capacity(fan_in);
            for input in 0..fan_in {
                let index = built.tiers.len();
                let Some(worker) = built.workers.get(index) else {
                    break;
                };
                let from = Endpoint::new(worker.node(), 0);
                let to = Endpoint::new(node, input as u8);
                if let Err(e) = fabric.route_add(from, to) {
                    ring.release(fabric);
                    return Err(e.into());
                }
                tracing::debug!("Node {} to mux {} input {}", worker.node(), node, input);
                group.push(index);
                built.tiers.push(WiringTier::Mux);
            }
            built.channels.push(IncomingChannel::MuxAggregated {
                ring,
                mux: node,
                workers: group,
            });
        }
        Ok(())
    }

    fn wire_per_node(
        &self,
        fabric: &mut dyn Fabric,
        built: &mut Connectivity,
        config: DmaConfig,
    ) -> Result<()> {
        while let Some(worker) = built.workers.get(built.tiers.len()) {
            let index = built.tiers.len();
            match DmaRing::open(fabric, worker.node(), config) {
                Ok(ring) => {
                    tracing::debug!("Node {} on its own DMA channel", worker.node());
                    built.channels.push(IncomingChannel::DirectDma { ring, worker: index });
                    built.tiers.push(WiringTier::PerNodeDma);
                }
                Err(e) if e.is_exhaustion() => {
                    tracing::debug!("Per-node DMA exhausted: {}", e);
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn wire_polled(&self, fabric: &mut dyn Fabric, built: &mut Connectivity) -> Result<()> {
        let size = record_size(self.image.width);
        while let Some(worker) = built.workers.get(built.tiers.len()) {
            let index = built.tiers.len();
            match PolledReader::open(fabric, worker.node(), size) {
                Ok(reader) => {
                    tracing::warn!("Node {} falls back to CPU polling", worker.node());
                    built.channels.push(IncomingChannel::CpuPolled { reader, worker: index });
                    built.tiers.push(WiringTier::CpuPolled);
                }
                Err(FabricError::NoFifo) => {
                    tracing::debug!("No read fifo left");
                    break;
                }
                Err(e) if e.is_exhaustion() => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
