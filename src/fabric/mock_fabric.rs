//! Simulated fabric for testing
//!
//! This module provides a [`Fabric`] implementation that behaves like the
//! hardware closely enough to run the whole pipeline without a board.
//!
//! # Features
//!
//! - **Floorplan driven**: PR regions, mux nodes and DMA engines come from a
//!   [`FabricTopology`]
//! - **Routing**: worker outputs follow their routes into DMA rings, muxes or
//!   plain read fifos
//! - **DMA rings**: blocks move between host-owned, hardware-free and filled
//!   states like a coherent-mode ring
//! - **Compute**: in auto-compute mode every request written to a worker is
//!   evaluated (fixed-point Mandelbrot) and its record is emitted at once
//! - **Fault injection**: short writes, busy mux nodes, regions held by
//!   another user
//!
//! # Example
//!
//! ```ignore
//! use fabric_fractal::config::FabricTopology;
//! use fabric_fractal::fabric::MockFabricBackend;
//!
//! let fabric = MockFabricBackend::new(FabricTopology::zynq_7030())
//!     .with_dma_channels(1)
//!     .with_max_iterations(32);
//! let handle = fabric.handle();
//!
//! // hand `fabric` to the pipeline, then inspect through `handle`
//! assert_eq!(handle.free_dma_channels(), 1);
//! ```
//!
//! # Enabling
//!
//! Outside unit tests the simulated fabric needs the `mock-fabric` feature:
//!
//! ```bash
//! cargo run --features mock-fabric
//! ```

use super::{DmaBlock, DmaConfig, Fabric, FabricError, FabricResult};
use crate::config::topology::{FabricTopology, NodeKind};
use crate::config::MUX_FUNCTION;
use crate::protocol::{from_fixed_point, RecordHeader, ScanlineRequest, REQUEST_SIZE};
use crate::types::{Endpoint, NodeId, QueueId};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Requests remembered per node before the oldest are dropped
const REQUEST_LOG_LIMIT: usize = 65_536;

/// Default iteration cap of the simulated compute image
pub const DEFAULT_MAX_ITERATIONS: u32 = 64;

/// Operations recorded by the simulated fabric, in call order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOp {
    Acquire(NodeId),
    AcquireFixed(NodeId),
    Release(NodeId),
    Enable(NodeId),
    Disable(NodeId),
    RouteAdd(Endpoint, Endpoint),
    DeleteRoutes(NodeId),
    OpenDmaReader { queue: QueueId, from: NodeId },
    OpenWriteQueue { queue: QueueId, to: NodeId },
    OpenReadQueue { queue: QueueId, from: NodeId },
    Close(QueueId),
    Write { queue: QueueId, bytes: usize },
}

#[derive(Debug)]
struct NodeState {
    kind: NodeKind,
    acquired: bool,
    /// Held by a simulated competitor rather than the caller
    foreign: bool,
    enabled: bool,
    function: Option<String>,
}

#[derive(Debug)]
enum QueueKind {
    Write {
        to: NodeId,
    },
    DmaRead {
        from: NodeId,
        config: DmaConfig,
        host_owned: VecDeque<DmaBlock>,
        hw_free: VecDeque<DmaBlock>,
        filled: VecDeque<DmaBlock>,
        stream: VecDeque<u8>,
    },
    Read {
        from: NodeId,
        buffer: VecDeque<u8>,
        threshold: usize,
    },
}

#[derive(Debug)]
struct QueueState {
    kind: QueueKind,
    nonblocking: bool,
    routed: bool,
}

impl QueueState {
    fn source(&self) -> Option<NodeId> {
        match self.kind {
            QueueKind::DmaRead { from, .. } | QueueKind::Read { from, .. } => Some(from),
            QueueKind::Write { .. } => None,
        }
    }

    fn touches(&self, node: NodeId) -> bool {
        match self.kind {
            QueueKind::Write { to } => to == node,
            QueueKind::DmaRead { from, .. } | QueueKind::Read { from, .. } => from == node,
        }
    }

    /// Move streamed bytes into free DMA blocks
    fn pump(&mut self) {
        if let QueueKind::DmaRead {
            config,
            hw_free,
            filled,
            stream,
            ..
        } = &mut self.kind
        {
            while !stream.is_empty() {
                let Some(mut block) = hw_free.pop_front() else {
                    break;
                };
                let n = config.block_size.min(stream.len());
                block.data.resize(config.block_size, 0);
                for (dst, src) in block.data.iter_mut().zip(stream.drain(..n)) {
                    *dst = src;
                }
                block.bytes_used = n;
                filled.push_back(block);
            }
        }
    }

    fn readable(&mut self) -> bool {
        self.pump();
        match &self.kind {
            QueueKind::DmaRead { filled, .. } => !filled.is_empty(),
            QueueKind::Read {
                buffer, threshold, ..
            } => !buffer.is_empty() && buffer.len() >= *threshold,
            QueueKind::Write { .. } => false,
        }
    }
}

#[derive(Debug)]
struct MockState {
    nodes: BTreeMap<NodeId, NodeState>,
    queues: BTreeMap<QueueId, QueueState>,
    next_queue: u32,
    edges: Vec<(Endpoint, Endpoint)>,
    dma_total: usize,
    write_fifos_total: usize,
    read_fifos_total: usize,
    written: BTreeMap<NodeId, VecDeque<ScanlineRequest>>,
    ops: Vec<MockOp>,
    auto_compute: bool,
    max_iterations: u32,
    short_write: Option<usize>,
    busy_fixed: HashSet<NodeId>,
    dangling_releases: usize,
}

impl MockState {
    fn new(topology: &FabricTopology) -> Self {
        let nodes = topology
            .nodes()
            .iter()
            .map(|n| {
                (
                    n.id,
                    NodeState {
                        kind: n.kind.clone(),
                        acquired: false,
                        foreign: false,
                        enabled: false,
                        function: None,
                    },
                )
            })
            .collect();
        let fifos = 4 * topology.cpu_node_count().max(1);
        Self {
            nodes,
            queues: BTreeMap::new(),
            next_queue: 0,
            edges: Vec::new(),
            dma_total: topology.dma_channel_count(),
            write_fifos_total: fifos,
            read_fifos_total: fifos,
            written: BTreeMap::new(),
            ops: Vec::new(),
            auto_compute: true,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            short_write: None,
            busy_fixed: HashSet::new(),
            dangling_releases: 0,
        }
    }

    fn node_mut(&mut self, node: NodeId) -> FabricResult<&mut NodeState> {
        self.nodes
            .get_mut(&node)
            .ok_or(FabricError::UnknownNode(node))
    }

    fn queue_mut(&mut self, queue: QueueId) -> FabricResult<&mut QueueState> {
        self.queues
            .get_mut(&queue)
            .ok_or(FabricError::UnknownQueue(queue))
    }

    fn count_queues(&self, pred: impl Fn(&QueueKind) -> bool) -> usize {
        self.queues.values().filter(|q| pred(&q.kind)).count()
    }

    fn dma_in_use(&self) -> usize {
        self.count_queues(|k| matches!(k, QueueKind::DmaRead { .. }))
    }

    fn new_queue(&mut self, kind: QueueKind) -> QueueId {
        let id = QueueId(self.next_queue);
        self.next_queue += 1;
        self.queues.insert(
            id,
            QueueState {
                kind,
                nonblocking: false,
                routed: true,
            },
        );
        id
    }

    /// Whether the output of `node` already goes somewhere
    fn output_routed(&self, node: NodeId) -> bool {
        self.edges.iter().any(|(from, _)| from.node == node)
            || self
                .queues
                .values()
                .any(|q| q.routed && q.source() == Some(node))
    }

    fn require_owned(&self, node: NodeId) -> FabricResult<()> {
        match self.nodes.get(&node) {
            Some(n) if n.acquired && !n.foreign => Ok(()),
            Some(_) => Err(FabricError::Driver(format!("node {} is not held", node))),
            None => Err(FabricError::UnknownNode(node)),
        }
    }

    fn acquire_node(&mut self, bitstream: &str) -> FabricResult<NodeId> {
        let free = self
            .nodes
            .iter_mut()
            .find(|(_, n)| n.kind == NodeKind::Pr && !n.acquired);
        let Some((&id, node)) = free else {
            return Err(FabricError::NoFreeRegion {
                bitstream: bitstream.to_string(),
            });
        };
        node.acquired = true;
        node.function = Some(bitstream.to_string());
        self.ops.push(MockOp::Acquire(id));
        Ok(id)
    }

    fn acquire_fixed_node(&mut self, id: NodeId) -> FabricResult<()> {
        if self.busy_fixed.contains(&id) {
            return Err(FabricError::NodeBusy(id));
        }
        let node = self.node_mut(id)?;
        let NodeKind::Fixed(function) = &node.kind else {
            return Err(FabricError::Driver(format!("node {} is not fixed logic", id)));
        };
        if node.acquired {
            return Err(FabricError::NodeBusy(id));
        }
        node.function = Some(function.clone());
        node.acquired = true;
        self.ops.push(MockOp::AcquireFixed(id));
        Ok(())
    }

    fn release_node(&mut self, id: NodeId) {
        let dangling = self
            .edges
            .iter()
            .any(|(from, to)| from.node == id || to.node == id)
            || self.queues.values().any(|q| q.routed && q.touches(id));
        if dangling {
            tracing::warn!("Releasing node {} with routes still attached", id);
            self.dangling_releases += 1;
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            if matches!(node.kind, NodeKind::Pr) {
                node.function = None;
            }
            node.acquired = false;
            node.enabled = false;
        }
        self.ops.push(MockOp::Release(id));
    }

    fn set_enabled(&mut self, id: NodeId, enabled: bool) -> FabricResult<()> {
        self.require_owned(id)?;
        self.node_mut(id)?.enabled = enabled;
        self.ops.push(if enabled {
            MockOp::Enable(id)
        } else {
            MockOp::Disable(id)
        });
        Ok(())
    }

    fn route_add(&mut self, from: Endpoint, to: Endpoint) -> FabricResult<()> {
        self.require_owned(from.node)?;
        self.require_owned(to.node)?;
        if self.output_routed(from.node) {
            return Err(FabricError::Driver(format!(
                "output of node {} is already routed",
                from.node
            )));
        }
        self.edges.push((from, to));
        self.ops.push(MockOp::RouteAdd(from, to));
        Ok(())
    }

    fn delete_routes(&mut self, id: NodeId) -> FabricResult<()> {
        self.edges
            .retain(|(from, to)| from.node != id && to.node != id);
        for queue in self.queues.values_mut() {
            if queue.touches(id) {
                queue.routed = false;
            }
        }
        self.ops.push(MockOp::DeleteRoutes(id));
        Ok(())
    }

    fn open_dma_reader(&mut self, from: NodeId, config: DmaConfig) -> FabricResult<QueueId> {
        self.require_owned(from)?;
        if self.dma_in_use() >= self.dma_total {
            return Err(FabricError::NoDmaChannel);
        }
        if config.block_size == 0 || config.block_count == 0 {
            return Err(FabricError::Driver("empty DMA ring".to_string()));
        }
        if self.output_routed(from) {
            return Err(FabricError::Driver(format!(
                "output of node {} is already routed",
                from
            )));
        }
        let host_owned = (0..config.block_count)
            .map(|index| DmaBlock {
                index,
                data: vec![0; config.block_size],
                bytes_used: 0,
            })
            .collect();
        let queue = self.new_queue(QueueKind::DmaRead {
            from,
            config,
            host_owned,
            hw_free: VecDeque::new(),
            filled: VecDeque::new(),
            stream: VecDeque::new(),
        });
        self.ops.push(MockOp::OpenDmaReader { queue, from });
        Ok(queue)
    }

    fn open_write_queue(&mut self, to: NodeId) -> FabricResult<QueueId> {
        self.require_owned(to)?;
        if self.count_queues(|k| matches!(k, QueueKind::Write { .. })) >= self.write_fifos_total {
            return Err(FabricError::NoFifo);
        }
        let queue = self.new_queue(QueueKind::Write { to });
        self.ops.push(MockOp::OpenWriteQueue { queue, to });
        Ok(queue)
    }

    fn open_read_queue(&mut self, from: NodeId) -> FabricResult<QueueId> {
        self.require_owned(from)?;
        if self.count_queues(|k| matches!(k, QueueKind::Read { .. })) >= self.read_fifos_total {
            return Err(FabricError::NoFifo);
        }
        if self.output_routed(from) {
            return Err(FabricError::Driver(format!(
                "output of node {} is already routed",
                from
            )));
        }
        let queue = self.new_queue(QueueKind::Read {
            from,
            buffer: VecDeque::new(),
            threshold: 1,
        });
        self.ops.push(MockOp::OpenReadQueue { queue, from });
        Ok(queue)
    }

    fn dequeue_block(&mut self, queue: QueueId) -> FabricResult<Option<DmaBlock>> {
        let q = self.queue_mut(queue)?;
        q.pump();
        match &mut q.kind {
            QueueKind::DmaRead {
                host_owned, filled, ..
            } => Ok(host_owned.pop_front().or_else(|| filled.pop_front())),
            _ => Err(FabricError::Driver(format!("{} is not a DMA ring", queue))),
        }
    }

    fn enqueue_block(&mut self, queue: QueueId, mut block: DmaBlock) -> FabricResult<()> {
        let q = self.queue_mut(queue)?;
        match &mut q.kind {
            QueueKind::DmaRead {
                config, hw_free, ..
            } => {
                if block.index >= config.block_count {
                    return Err(FabricError::Driver(format!(
                        "block {} does not belong to {}",
                        block.index, queue
                    )));
                }
                block.bytes_used = 0;
                hw_free.push_back(block);
            }
            _ => return Err(FabricError::Driver(format!("{} is not a DMA ring", queue))),
        }
        q.pump();
        Ok(())
    }

    fn write(&mut self, queue: QueueId, data: &[u8]) -> FabricResult<usize> {
        let to = match self.queue_mut(queue)?.kind {
            QueueKind::Write { to } => to,
            _ => return Err(FabricError::Driver(format!("{} is not writable", queue))),
        };
        self.ops.push(MockOp::Write {
            queue,
            bytes: data.len(),
        });
        if let Some(accepted) = self.short_write.take() {
            return Ok(accepted.min(data.len()));
        }

        let requests: Vec<ScanlineRequest> = data
            .chunks_exact(REQUEST_SIZE)
            .filter_map(ScanlineRequest::decode)
            .collect();
        let log = self.written.entry(to).or_default();
        for req in &requests {
            if log.len() == REQUEST_LOG_LIMIT {
                log.pop_front();
            }
            log.push_back(*req);
        }

        let computes = self.auto_compute
            && self
                .nodes
                .get(&to)
                .map(|n| n.enabled && n.kind == NodeKind::Pr)
                .unwrap_or(false);
        if computes {
            for req in &requests {
                let record = render_record(req, self.max_iterations);
                self.emit(to, &record);
            }
        }
        Ok(data.len())
    }

    fn read(&mut self, queue: QueueId, buf: &mut [u8]) -> FabricResult<usize> {
        let q = self.queue_mut(queue)?;
        match &mut q.kind {
            QueueKind::Read { buffer, .. } => {
                if buffer.is_empty() {
                    return Err(FabricError::WouldBlock);
                }
                let n = buf.len().min(buffer.len());
                for (dst, src) in buf.iter_mut().zip(buffer.drain(..n)) {
                    *dst = src;
                }
                Ok(n)
            }
            _ => Err(FabricError::Driver(format!("{} is not readable", queue))),
        }
    }

    fn close_queue(&mut self, queue: QueueId) {
        self.queues.remove(&queue);
        self.ops.push(MockOp::Close(queue));
    }

    /// Push bytes produced by `node` along its output route
    fn emit(&mut self, node: NodeId, bytes: &[u8]) {
        let mut source = node;
        // Follow node -> node edges (worker into mux) at most a few hops
        for _ in 0..4 {
            let enabled = self.nodes.get(&source).map(|n| n.enabled).unwrap_or(false);
            if !enabled {
                tracing::trace!("Node {} disabled, dropping {} bytes", source, bytes.len());
                return;
            }
            let sink = self
                .queues
                .values_mut()
                .find(|q| q.routed && q.source() == Some(source));
            if let Some(queue) = sink {
                match &mut queue.kind {
                    QueueKind::DmaRead { stream, .. } => stream.extend(bytes),
                    QueueKind::Read { buffer, .. } => buffer.extend(bytes),
                    QueueKind::Write { .. } => {}
                }
                queue.pump();
                return;
            }
            match self.edges.iter().find(|(from, _)| from.node == source) {
                Some((_, to)) => source = to.node,
                None => break,
            }
        }
        tracing::trace!("Output of node {} is not routed, dropping", node);
    }

    fn ready_queues(&mut self, queues: &[QueueId]) -> Vec<QueueId> {
        queues
            .iter()
            .copied()
            .filter(|id| self.queues.get_mut(id).map(|q| q.readable()).unwrap_or(false))
            .collect()
    }
}

/// Evaluate one request the way the compute image does
fn render_record(req: &ScanlineRequest, max_iterations: u32) -> Vec<u8> {
    let header = RecordHeader {
        line: req.line,
        size: req.size,
    };
    let mut record = Vec::with_capacity(4 + req.size as usize);
    record.extend_from_slice(&header.encode());
    let cy = from_fixed_point(req.ay);
    for i in 0..i64::from(req.size) {
        let cx = from_fixed_point(req.ax.wrapping_add(req.incr.wrapping_mul(i)));
        record.push(escape_time(cx, cy, max_iterations));
    }
    record
}

fn escape_time(cx: f64, cy: f64, max_iterations: u32) -> u8 {
    let (mut x, mut y) = (0.0f64, 0.0f64);
    for i in 0..max_iterations {
        let (xx, yy) = (x * x, y * y);
        if xx + yy > 4.0 {
            return i.min(254) as u8;
        }
        y = 2.0 * x * y + cy;
        x = xx - yy + cx;
    }
    255
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Simulated fabric implementing [`Fabric`]
#[derive(Debug, Clone)]
pub struct MockFabricBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockFabricBackend {
    /// Create a simulated fabric for the given floorplan
    pub fn new(topology: FabricTopology) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::new(&topology))),
        }
    }

    /// Limit the number of DMA engines
    pub fn with_dma_channels(self, count: usize) -> Self {
        lock(&self.state).dma_total = count;
        self
    }

    /// Limit the number of host -> fabric fifos
    pub fn with_write_fifos(self, count: usize) -> Self {
        lock(&self.state).write_fifos_total = count;
        self
    }

    /// Limit the number of fabric -> host fifos
    pub fn with_read_fifos(self, count: usize) -> Self {
        lock(&self.state).read_fifos_total = count;
        self
    }

    /// Iteration cap of the simulated compute image
    pub fn with_max_iterations(self, iterations: u32) -> Self {
        lock(&self.state).max_iterations = iterations.max(1);
        self
    }

    /// Whether written requests are evaluated and answered
    pub fn with_auto_compute(self, enabled: bool) -> Self {
        lock(&self.state).auto_compute = enabled;
        self
    }

    /// Inspection and fault-injection handle sharing this fabric's state
    pub fn handle(&self) -> MockFabricHandle {
        MockFabricHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for MockFabricBackend {
    fn default() -> Self {
        Self::new(FabricTopology::default())
    }
}

impl Fabric for MockFabricBackend {
    fn acquire_node(&mut self, bitstream: &str) -> FabricResult<NodeId> {
        lock(&self.state).acquire_node(bitstream)
    }

    fn acquire_fixed_node(&mut self, node: NodeId) -> FabricResult<()> {
        lock(&self.state).acquire_fixed_node(node)
    }

    fn release_node(&mut self, node: NodeId) {
        lock(&self.state).release_node(node)
    }

    fn enable_node(&mut self, node: NodeId) -> FabricResult<()> {
        lock(&self.state).set_enabled(node, true)
    }

    fn disable_node(&mut self, node: NodeId) -> FabricResult<()> {
        lock(&self.state).set_enabled(node, false)
    }

    fn route_add(&mut self, from: Endpoint, to: Endpoint) -> FabricResult<()> {
        lock(&self.state).route_add(from, to)
    }

    fn delete_routes(&mut self, node: NodeId) -> FabricResult<()> {
        lock(&self.state).delete_routes(node)
    }

    fn free_dma_channels(&self) -> usize {
        let state = lock(&self.state);
        state.dma_total.saturating_sub(state.dma_in_use())
    }

    fn open_dma_reader(&mut self, from: NodeId, config: DmaConfig) -> FabricResult<QueueId> {
        lock(&self.state).open_dma_reader(from, config)
    }

    fn dma_block_count(&self, queue: QueueId) -> FabricResult<usize> {
        match lock(&self.state).queues.get(&queue).map(|q| &q.kind) {
            Some(QueueKind::DmaRead { config, .. }) => Ok(config.block_count),
            Some(_) => Err(FabricError::Driver(format!("{} is not a DMA ring", queue))),
            None => Err(FabricError::UnknownQueue(queue)),
        }
    }

    fn dequeue_block(&mut self, queue: QueueId) -> FabricResult<Option<DmaBlock>> {
        lock(&self.state).dequeue_block(queue)
    }

    fn enqueue_block(&mut self, queue: QueueId, block: DmaBlock) -> FabricResult<()> {
        lock(&self.state).enqueue_block(queue, block)
    }

    fn open_write_queue(&mut self, to: NodeId) -> FabricResult<QueueId> {
        lock(&self.state).open_write_queue(to)
    }

    fn open_read_queue(&mut self, from: NodeId) -> FabricResult<QueueId> {
        lock(&self.state).open_read_queue(from)
    }

    fn set_nonblocking(&mut self, queue: QueueId) -> FabricResult<()> {
        lock(&self.state).queue_mut(queue)?.nonblocking = true;
        Ok(())
    }

    fn set_data_threshold(&mut self, queue: QueueId, bytes: usize) -> FabricResult<()> {
        let mut state = lock(&self.state);
        match &mut state.queue_mut(queue)?.kind {
            QueueKind::Read { threshold, .. } => {
                *threshold = bytes.max(1);
                Ok(())
            }
            _ => Err(FabricError::Driver(format!("{} has no threshold", queue))),
        }
    }

    fn write(&mut self, queue: QueueId, data: &[u8]) -> FabricResult<usize> {
        lock(&self.state).write(queue, data)
    }

    fn read(&mut self, queue: QueueId, buf: &mut [u8]) -> FabricResult<usize> {
        lock(&self.state).read(queue, buf)
    }

    fn close_queue(&mut self, queue: QueueId) {
        lock(&self.state).close_queue(queue)
    }

    fn wait_readable(
        &mut self,
        queues: &[QueueId],
        timeout: Duration,
    ) -> FabricResult<Vec<QueueId>> {
        let ready = lock(&self.state).ready_queues(queues);
        if !ready.is_empty() || timeout.is_zero() {
            return Ok(ready);
        }
        // Nothing is produced while nobody writes, so a short nap is enough
        std::thread::sleep(timeout.min(Duration::from_millis(1)));
        Ok(lock(&self.state).ready_queues(queues))
    }
}

/// Inspection and fault-injection handle for a [`MockFabricBackend`]
#[derive(Debug, Clone)]
pub struct MockFabricHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockFabricHandle {
    /// Nodes currently held by the caller, in id order
    pub fn acquired_nodes(&self) -> Vec<NodeId> {
        lock(&self.state)
            .nodes
            .iter()
            .filter(|(_, n)| n.acquired && !n.foreign)
            .map(|(&id, _)| id)
            .collect()
    }

    pub fn enabled_nodes(&self) -> Vec<NodeId> {
        lock(&self.state)
            .nodes
            .iter()
            .filter(|(_, n)| n.enabled)
            .map(|(&id, _)| id)
            .collect()
    }

    /// Bitstream or fixed function loaded in a node
    pub fn node_function(&self, node: NodeId) -> Option<String> {
        lock(&self.state)
            .nodes
            .get(&node)
            .and_then(|n| n.function.clone())
    }

    /// Node -> node routing edges
    pub fn edges(&self) -> Vec<(Endpoint, Endpoint)> {
        lock(&self.state).edges.clone()
    }

    pub fn open_queue_count(&self) -> usize {
        lock(&self.state).queues.len()
    }

    /// Source node of an open read queue or DMA ring
    pub fn queue_source(&self, queue: QueueId) -> Option<NodeId> {
        lock(&self.state)
            .queues
            .get(&queue)
            .and_then(QueueState::source)
    }

    /// Whether a queue is a DMA ring
    pub fn is_dma_queue(&self, queue: QueueId) -> bool {
        matches!(
            lock(&self.state).queues.get(&queue).map(|q| &q.kind),
            Some(QueueKind::DmaRead { .. })
        )
    }

    pub fn free_dma_channels(&self) -> usize {
        let state = lock(&self.state);
        state.dma_total.saturating_sub(state.dma_in_use())
    }

    /// Requests written to a node so far
    pub fn written_requests(&self, node: NodeId) -> Vec<ScanlineRequest> {
        lock(&self.state)
            .written
            .get(&node)
            .map(|log| log.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Requests written to all nodes so far
    pub fn total_requests(&self) -> usize {
        lock(&self.state).written.values().map(VecDeque::len).sum()
    }

    /// Operation log, in call order
    pub fn ops(&self) -> Vec<MockOp> {
        lock(&self.state).ops.clone()
    }

    /// Releases that happened while routes were still attached
    pub fn dangling_releases(&self) -> usize {
        lock(&self.state).dangling_releases
    }

    /// Push bytes as if `node` had produced them
    pub fn inject_output(&self, node: NodeId, bytes: &[u8]) {
        lock(&self.state).emit(node, bytes)
    }

    /// Mark up to `count` free PR regions as taken by another user
    pub fn occupy_pr_regions(&self, count: usize) -> Vec<NodeId> {
        let mut state = lock(&self.state);
        let mut taken = Vec::new();
        for (&id, node) in state.nodes.iter_mut() {
            if taken.len() == count {
                break;
            }
            if node.kind == NodeKind::Pr && !node.acquired {
                node.acquired = true;
                node.foreign = true;
                node.function = Some("foreign".to_string());
                taken.push(id);
            }
        }
        taken
    }

    /// Make the next write accept only `accepted` bytes
    pub fn fail_next_write(&self, accepted: usize) {
        lock(&self.state).short_write = Some(accepted);
    }

    /// Make a fixed node report busy on acquisition
    pub fn mark_fixed_busy(&self, node: NodeId) {
        lock(&self.state).busy_fixed.insert(node);
    }

    pub fn set_auto_compute(&self, enabled: bool) {
        lock(&self.state).auto_compute = enabled;
    }

    /// Mux nodes currently held
    pub fn acquired_muxes(&self) -> Vec<NodeId> {
        lock(&self.state)
            .nodes
            .iter()
            .filter(|(_, n)| {
                n.acquired && matches!(&n.kind, NodeKind::Fixed(f) if f == MUX_FUNCTION)
            })
            .map(|(&id, _)| id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{to_fixed_point, LineTag};

    fn fabric() -> MockFabricBackend {
        MockFabricBackend::new(FabricTopology::zynq_7030()).with_max_iterations(16)
    }

    fn request(line: u16, size: u16) -> ScanlineRequest {
        ScanlineRequest {
            line,
            size,
            ax: to_fixed_point(-2.0),
            ay: to_fixed_point(0.0),
            incr: to_fixed_point(0.5),
        }
    }

    #[test]
    fn test_mock_acquire_until_exhausted() {
        let mut f = fabric();
        let mut nodes = Vec::new();
        loop {
            match f.acquire_node("mandelbrot") {
                Ok(n) => nodes.push(n),
                Err(e) => {
                    assert!(e.is_exhaustion());
                    break;
                }
            }
        }
        assert_eq!(nodes, (4..=11).collect::<Vec<_>>());
    }

    #[test]
    fn test_mock_fixed_node_busy() {
        let mut f = fabric();
        f.acquire_fixed_node(2).unwrap();
        assert!(matches!(
            f.acquire_fixed_node(2),
            Err(FabricError::NodeBusy(2))
        ));
        assert!(f.acquire_fixed_node(4).is_err());
    }

    #[test]
    fn test_mock_dma_limit() {
        let mut f = fabric().with_dma_channels(1);
        let a = f.acquire_node("mandelbrot").unwrap();
        let b = f.acquire_node("mandelbrot").unwrap();
        let config = DmaConfig {
            block_size: 8,
            block_count: 4,
        };
        f.open_dma_reader(a, config).unwrap();
        assert_eq!(f.free_dma_channels(), 0);
        assert!(matches!(
            f.open_dma_reader(b, config),
            Err(FabricError::NoDmaChannel)
        ));
    }

    #[test]
    fn test_mock_compute_reaches_dma_ring() {
        let mut f = fabric();
        let node = f.acquire_node("mandelbrot").unwrap();
        let sink = f.open_write_queue(node).unwrap();
        f.enable_node(node).unwrap();
        let ring = f
            .open_dma_reader(
                node,
                DmaConfig {
                    block_size: 2 * 12,
                    block_count: 4,
                },
            )
            .unwrap();
        for _ in 0..4 {
            let block = f.dequeue_block(ring).unwrap().unwrap();
            f.enqueue_block(ring, block).unwrap();
        }
        f.set_nonblocking(ring).unwrap();
        assert!(f.dequeue_block(ring).unwrap().is_none());

        let line = LineTag::new(3, 1, 0).unwrap().pack();
        let mut bytes = Vec::new();
        request(line, 8).encode_into(&mut bytes);
        assert_eq!(f.write(sink, &bytes).unwrap(), REQUEST_SIZE);

        assert_eq!(
            f.wait_readable(&[ring], Duration::ZERO).unwrap(),
            vec![ring]
        );
        let block = f.dequeue_block(ring).unwrap().unwrap();
        assert_eq!(block.bytes_used, 12);
        let header = RecordHeader::decode(block.payload()).unwrap();
        assert_eq!(header.line, line);
        assert_eq!(header.size, 8);
        // x = 0 lies inside the set
        assert_eq!(block.payload()[4 + 4], 255);
    }

    #[test]
    fn test_mock_mux_forwarding() {
        let mut f = fabric();
        let handle = f.handle();
        let node = f.acquire_node("mandelbrot").unwrap();
        f.enable_node(node).unwrap();
        f.acquire_fixed_node(2).unwrap();
        f.enable_node(2).unwrap();
        let ring = f
            .open_dma_reader(
                2,
                DmaConfig {
                    block_size: 64,
                    block_count: 4,
                },
            )
            .unwrap();
        for _ in 0..4 {
            let block = f.dequeue_block(ring).unwrap().unwrap();
            f.enqueue_block(ring, block).unwrap();
        }
        f.route_add(Endpoint::new(node, 0), Endpoint::new(2, 1)).unwrap();

        handle.inject_output(node, &[1, 2, 3, 4, 5]);
        let block = f.dequeue_block(ring).unwrap().unwrap();
        assert_eq!(block.payload(), &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_mock_read_queue_threshold() {
        let mut f = fabric();
        let handle = f.handle();
        let node = f.acquire_node("mandelbrot").unwrap();
        f.enable_node(node).unwrap();
        let q = f.open_read_queue(node).unwrap();
        f.set_nonblocking(q).unwrap();
        f.set_data_threshold(q, 4).unwrap();

        let mut buf = [0u8; 8];
        assert!(matches!(f.read(q, &mut buf), Err(FabricError::WouldBlock)));
        handle.inject_output(node, &[9, 9]);
        assert!(f.wait_readable(&[q], Duration::ZERO).unwrap().is_empty());
        handle.inject_output(node, &[9, 9]);
        assert_eq!(f.wait_readable(&[q], Duration::ZERO).unwrap(), vec![q]);
        assert_eq!(f.read(q, &mut buf).unwrap(), 4);
    }

    #[test]
    fn test_mock_short_write() {
        let mut f = fabric();
        let handle = f.handle();
        let node = f.acquire_node("mandelbrot").unwrap();
        let sink = f.open_write_queue(node).unwrap();
        handle.fail_next_write(10);
        assert_eq!(f.write(sink, &[0u8; 56]).unwrap(), 10);
        assert_eq!(f.write(sink, &[0u8; 56]).unwrap(), 56);
    }

    #[test]
    fn test_mock_dangling_release_detected() {
        let mut f = fabric();
        let handle = f.handle();
        let node = f.acquire_node("mandelbrot").unwrap();
        let sink = f.open_write_queue(node).unwrap();
        f.release_node(node);
        assert_eq!(handle.dangling_releases(), 1);
        f.close_queue(sink);

        let node = f.acquire_node("mandelbrot").unwrap();
        let sink = f.open_write_queue(node).unwrap();
        f.close_queue(sink);
        f.delete_routes(node).unwrap();
        f.release_node(node);
        assert_eq!(handle.dangling_releases(), 1);
    }

    #[test]
    fn test_mock_occupied_regions() {
        let mut f = fabric();
        let handle = f.handle();
        assert_eq!(handle.occupy_pr_regions(7).len(), 7);
        assert_eq!(f.acquire_node("mandelbrot").unwrap(), 11);
        assert!(f.acquire_node("mandelbrot").is_err());
        assert_eq!(handle.acquired_nodes(), vec![11]);
    }

    #[test]
    fn test_escape_time_inside_and_outside() {
        assert_eq!(escape_time(0.0, 0.0, 32), 255);
        assert!(escape_time(2.0, 2.0, 32) < 2);
    }
}
