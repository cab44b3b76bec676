//! Fabric capability: the boundary to the reconfigurable hardware
//!
//! The driver library that programs regions, routes streams and moves data is
//! outside this crate. Everything the pipeline needs from it is expressed by
//! the [`Fabric`] trait, and every failure it can report is mapped onto
//! [`FabricError`] so the connectivity ladder can match on outcomes.
//!
//! Handles are plain ids ([`NodeId`], [`QueueId`]); whoever acquired a handle
//! gives it back explicitly, because teardown has to happen in a fixed order
//! (routes first, then disable, then release).
//!
//! # Implementations
//!
//! - [`MockFabricBackend`](mock_fabric::MockFabricBackend) - simulated fabric
//!   for tests and the demo binary (feature `mock-fabric`)

#[cfg(any(test, feature = "mock-fabric"))]
pub mod mock_fabric;

#[cfg(any(test, feature = "mock-fabric"))]
pub use mock_fabric::{MockFabricBackend, MockFabricHandle, MockOp};

use crate::types::{Endpoint, NodeId, QueueId};
use std::time::Duration;
use thiserror::Error;

/// Errors reported by a fabric implementation
#[derive(Error, Debug)]
pub enum FabricError {
    /// Every PR region is taken
    #[error("no free region for bitstream '{bitstream}'")]
    NoFreeRegion { bitstream: String },

    /// Every DMA engine is taken
    #[error("no free DMA channel")]
    NoDmaChannel,

    /// Every plain fifo in the requested direction is taken
    #[error("no free fifo")]
    NoFifo,

    /// The node is held by someone else
    #[error("node {0} is busy")]
    NodeBusy(NodeId),

    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    #[error("unknown queue {0}")]
    UnknownQueue(QueueId),

    /// Non-blocking queue has nothing to offer yet
    #[error("operation would block")]
    WouldBlock,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other driver failure
    #[error("driver error: {0}")]
    Driver(String),
}

impl FabricError {
    /// Whether the failure only means a shared pool is empty right now
    ///
    /// These are expected under contention and select the next fallback.
    pub fn is_exhaustion(&self) -> bool {
        matches!(
            self,
            FabricError::NoFreeRegion { .. }
                | FabricError::NoDmaChannel
                | FabricError::NoFifo
                | FabricError::NodeBusy(_)
        )
    }
}

/// Result type for fabric operations
pub type FabricResult<T> = std::result::Result<T, FabricError>;

/// Geometry of a DMA ring (always opened in coherent mode)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaConfig {
    /// Bytes per block
    pub block_size: usize,
    /// Blocks in the ring
    pub block_count: usize,
}

/// A DMA block lent to the host between dequeue and enqueue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmaBlock {
    /// Position of the block in its ring
    pub index: usize,
    pub data: Vec<u8>,
    /// Valid bytes at the front of `data`
    pub bytes_used: usize,
}

impl DmaBlock {
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.bytes_used.min(self.data.len())]
    }
}

/// Operations the pipeline needs from the hardware
///
/// Implementations must be `Send` so the pipeline can live on its own thread.
#[cfg_attr(test, mockall::automock)]
pub trait Fabric: Send {
    /// Program a free PR region with `bitstream` and take it
    fn acquire_node(&mut self, bitstream: &str) -> FabricResult<NodeId>;

    /// Take a fixed-function node by id
    fn acquire_fixed_node(&mut self, node: NodeId) -> FabricResult<()>;

    /// Give a node back
    fn release_node(&mut self, node: NodeId);

    fn enable_node(&mut self, node: NodeId) -> FabricResult<()>;

    fn disable_node(&mut self, node: NodeId) -> FabricResult<()>;

    /// Add a routing edge
    fn route_add(&mut self, from: Endpoint, to: Endpoint) -> FabricResult<()>;

    /// Remove every routing edge into or out of `node`
    fn delete_routes(&mut self, node: NodeId) -> FabricResult<()>;

    /// DMA engines not currently in use
    fn free_dma_channels(&self) -> usize;

    /// Open a DMA ring fed by the output of `from`
    fn open_dma_reader(&mut self, from: NodeId, config: DmaConfig) -> FabricResult<QueueId>;

    /// Blocks in a DMA ring
    fn dma_block_count(&self, queue: QueueId) -> FabricResult<usize>;

    /// Take the next block from a DMA ring, `None` if nothing is ready
    fn dequeue_block(&mut self, queue: QueueId) -> FabricResult<Option<DmaBlock>>;

    /// Hand a block back to the hardware
    fn enqueue_block(&mut self, queue: QueueId, block: DmaBlock) -> FabricResult<()>;

    /// Open a plain fifo writing into `to`
    fn open_write_queue(&mut self, to: NodeId) -> FabricResult<QueueId>;

    /// Open a plain fifo fed by the output of `from`
    fn open_read_queue(&mut self, from: NodeId) -> FabricResult<QueueId>;

    fn set_nonblocking(&mut self, queue: QueueId) -> FabricResult<()>;

    /// Bytes that must be buffered before a read queue reports readable
    fn set_data_threshold(&mut self, queue: QueueId, bytes: usize) -> FabricResult<()>;

    /// Write to a queue, returning the bytes accepted
    fn write(&mut self, queue: QueueId, data: &[u8]) -> FabricResult<usize>;

    /// Read from a queue; [`FabricError::WouldBlock`] when empty and non-blocking
    fn read(&mut self, queue: QueueId, buf: &mut [u8]) -> FabricResult<usize>;

    /// Close a queue and drop its routes
    fn close_queue(&mut self, queue: QueueId);

    /// Wait up to `timeout` for any of `queues` to become readable
    fn wait_readable(&mut self, queues: &[QueueId], timeout: Duration)
        -> FabricResult<Vec<QueueId>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhaustion_classification() {
        assert!(FabricError::NoFreeRegion {
            bitstream: "mandelbrot".into()
        }
        .is_exhaustion());
        assert!(FabricError::NoDmaChannel.is_exhaustion());
        assert!(FabricError::NoFifo.is_exhaustion());
        assert!(FabricError::NodeBusy(3).is_exhaustion());
        assert!(!FabricError::WouldBlock.is_exhaustion());
        assert!(!FabricError::Driver("timeout".into()).is_exhaustion());
    }

    #[test]
    fn test_block_payload_clamped() {
        let block = DmaBlock {
            index: 0,
            data: vec![1, 2, 3],
            bytes_used: 10,
        };
        assert_eq!(block.payload(), &[1, 2, 3]);
    }
}
