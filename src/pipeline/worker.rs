//! One compute node and its command queue

use crate::error::{FractalError, Result};
use crate::fabric::{Fabric, FabricResult};
use crate::protocol::{ScanlineRequest, REQUEST_SIZE};
use crate::types::{NodeId, QueueId};

/// A PR region running the compute image, fed by its own write fifo
///
/// Requests are batched with [`Worker::queue_work`] and sent in one write by
/// [`Worker::flush`]. The worker owns its node and queue; give them back with
/// [`Worker::release`].
#[derive(Debug)]
pub struct Worker {
    index: u8,
    node: NodeId,
    sink: QueueId,
    pending: Vec<ScanlineRequest>,
    buffer: Vec<u8>,
}

impl Worker {
    /// Take a free region, load `bitstream`, open its command queue and enable it
    ///
    /// Fails with an exhaustion error when no region or fifo is free; nothing
    /// stays acquired on failure.
    pub fn acquire(fabric: &mut dyn Fabric, index: u8, bitstream: &str) -> FabricResult<Self> {
        let node = fabric.acquire_node(bitstream)?;
        let sink = match fabric.open_write_queue(node) {
            Ok(sink) => sink,
            Err(e) => {
                fabric.release_node(node);
                return Err(e);
            }
        };
        if let Err(e) = fabric.enable_node(node) {
            fabric.close_queue(sink);
            if let Err(e) = fabric.delete_routes(node) {
                tracing::warn!("Failed to delete routes of node {}: {}", node, e);
            }
            fabric.release_node(node);
            return Err(e);
        }
        tracing::debug!("Worker {} acquired node {} ({})", index, node, bitstream);
        Ok(Self {
            index,
            node,
            sink,
            pending: Vec::new(),
            buffer: Vec::new(),
        })
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn sink(&self) -> QueueId {
        self.sink
    }

    /// Append a request to the next batch; no I/O
    pub fn queue_work(&mut self, request: ScanlineRequest) {
        self.pending.push(request);
    }

    /// Requests waiting for the next flush
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Send every pending request in one write
    ///
    /// Returns the number of requests sent. A short write is fatal.
    pub fn flush(&mut self, fabric: &mut dyn Fabric) -> Result<usize> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        self.buffer.clear();
        self.buffer.reserve(self.pending.len() * REQUEST_SIZE);
        for request in &self.pending {
            request.encode_into(&mut self.buffer);
        }
        let count = self.pending.len();
        self.pending.clear();

        let written = fabric.write(self.sink, &self.buffer)?;
        if written != self.buffer.len() {
            return Err(FractalError::PartialWrite {
                node: self.node,
                expected: self.buffer.len(),
                written,
            });
        }
        Ok(count)
    }

    /// Close the command queue and give the node back
    ///
    /// Routes are removed before the node is disabled and released.
    pub fn release(self, fabric: &mut dyn Fabric) {
        fabric.close_queue(self.sink);
        if let Err(e) = fabric.delete_routes(self.node) {
            tracing::warn!("Failed to delete routes of node {}: {}", self.node, e);
        }
        if let Err(e) = fabric.disable_node(self.node) {
            tracing::warn!("Failed to disable node {}: {}", self.node, e);
        }
        fabric.release_node(self.node);
        tracing::debug!("Worker {} released node {}", self.index, self.node);
    }
}
