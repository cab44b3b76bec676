//! Incoming result channels
//!
//! A channel turns readiness of one host queue into byte runs of whole
//! records. Three wirings exist, and all of them hand the consumer the same
//! thing: a contiguous run of back-to-back records.
//!
//! - [`IncomingChannel::DirectDma`]: a DMA ring reading one worker, whether
//!   wired first or as the per-node fallback after the muxes ran out
//! - [`IncomingChannel::MuxAggregated`]: a DMA ring reading a mux that
//!   merges several workers
//! - [`IncomingChannel::CpuPolled`]: a plain read fifo, assembled host side

use crate::error::Result;
use crate::fabric::{DmaConfig, Fabric, FabricError, FabricResult};
use crate::types::{NodeId, QueueId};
use std::ops::ControlFlow;

/// A DMA ring in coherent mode, primed and non-blocking
#[derive(Debug)]
pub struct DmaRing {
    queue: QueueId,
    source: NodeId,
    block_size: usize,
}

impl DmaRing {
    /// Open a ring reading the output of `source` and hand every block to the
    /// hardware
    pub fn open(fabric: &mut dyn Fabric, source: NodeId, config: DmaConfig) -> FabricResult<Self> {
        let queue = fabric.open_dma_reader(source, config)?;
        let ring = Self {
            queue,
            source,
            block_size: config.block_size,
        };
        if let Err(e) = ring.prime(fabric) {
            fabric.close_queue(queue);
            return Err(e);
        }
        Ok(ring)
    }

    fn prime(&self, fabric: &mut dyn Fabric) -> FabricResult<()> {
        let count = fabric.dma_block_count(self.queue)?;
        for _ in 0..count {
            let Some(mut block) = fabric.dequeue_block(self.queue)? else {
                break;
            };
            block.bytes_used = self.block_size;
            fabric.enqueue_block(self.queue, block)?;
        }
        fabric.set_nonblocking(self.queue)
    }

    pub fn queue(&self) -> QueueId {
        self.queue
    }

    pub fn source(&self) -> NodeId {
        self.source
    }

    /// Hand every filled block to `deliver` and give it back to the hardware
    ///
    /// Returns the bytes delivered. Stops early when `deliver` breaks.
    pub fn service(
        &mut self,
        fabric: &mut dyn Fabric,
        deliver: &mut dyn FnMut(&[u8]) -> ControlFlow<()>,
    ) -> FabricResult<usize> {
        let mut delivered = 0;
        while let Some(mut block) = fabric.dequeue_block(self.queue)? {
            let flow = deliver(block.payload());
            delivered += block.bytes_used;
            block.bytes_used = self.block_size;
            fabric.enqueue_block(self.queue, block)?;
            if flow.is_break() {
                break;
            }
        }
        Ok(delivered)
    }

    pub fn release(self, fabric: &mut dyn Fabric) {
        fabric.close_queue(self.queue);
    }
}

/// Fixed host buffer filled from a plain read fifo
#[derive(Debug)]
pub struct PolledReader {
    queue: QueueId,
    source: NodeId,
    buffer: Vec<u8>,
    filled: usize,
}

impl PolledReader {
    /// Open a non-blocking read fifo from `source`, readable once a whole
    /// record of `record_size` bytes is buffered
    pub fn open(fabric: &mut dyn Fabric, source: NodeId, record_size: usize) -> FabricResult<Self> {
        let queue = fabric.open_read_queue(source)?;
        let setup = fabric
            .set_nonblocking(queue)
            .and_then(|_| fabric.set_data_threshold(queue, record_size));
        if let Err(e) = setup {
            fabric.close_queue(queue);
            return Err(e);
        }
        Ok(Self {
            queue,
            source,
            buffer: vec![0; record_size],
            filled: 0,
        })
    }

    pub fn queue(&self) -> QueueId {
        self.queue
    }

    pub fn source(&self) -> NodeId {
        self.source
    }

    /// Bytes of an incomplete record held host side
    pub fn buffered(&self) -> usize {
        self.filled
    }

    /// Read until the fifo is empty, delivering each whole record
    pub fn service(
        &mut self,
        fabric: &mut dyn Fabric,
        deliver: &mut dyn FnMut(&[u8]) -> ControlFlow<()>,
    ) -> FabricResult<usize> {
        let mut delivered = 0;
        loop {
            let n = match fabric.read(self.queue, &mut self.buffer[self.filled..]) {
                Ok(0) | Err(FabricError::WouldBlock) => break,
                Ok(n) => n,
                Err(e) => return Err(e),
            };
            self.filled += n;
            if self.filled < self.buffer.len() {
                continue;
            }
            self.filled = 0;
            delivered += self.buffer.len();
            if deliver(&self.buffer).is_break() {
                break;
            }
        }
        Ok(delivered)
    }

    pub fn release(self, fabric: &mut dyn Fabric) {
        fabric.close_queue(self.queue);
    }
}

/// One incoming channel, tagged by how it is wired
#[derive(Debug)]
pub enum IncomingChannel {
    /// Own ring per worker
    DirectDma { ring: DmaRing, worker: usize },
    /// Shared ring behind a mux; the mux itself is owned by the planner
    MuxAggregated {
        ring: DmaRing,
        mux: NodeId,
        workers: Vec<usize>,
    },
    /// Plain fifo per worker
    CpuPolled { reader: PolledReader, worker: usize },
}

impl IncomingChannel {
    pub fn queue(&self) -> QueueId {
        match self {
            IncomingChannel::DirectDma { ring, .. } | IncomingChannel::MuxAggregated { ring, .. } => {
                ring.queue()
            }
            IncomingChannel::CpuPolled { reader, .. } => reader.queue(),
        }
    }

    /// Indices of the workers feeding this channel
    pub fn workers(&self) -> Vec<usize> {
        match self {
            IncomingChannel::DirectDma { worker, .. } | IncomingChannel::CpuPolled { worker, .. } => {
                vec![*worker]
            }
            IncomingChannel::MuxAggregated { workers, .. } => workers.clone(),
        }
    }

    /// Drain everything available and re-arm
    pub fn service(
        &mut self,
        fabric: &mut dyn Fabric,
        deliver: &mut dyn FnMut(&[u8]) -> ControlFlow<()>,
    ) -> Result<usize> {
        let delivered = match self {
            IncomingChannel::DirectDma { ring, .. } | IncomingChannel::MuxAggregated { ring, .. } => {
                ring.service(fabric, deliver)?
            }
            IncomingChannel::CpuPolled { reader, .. } => reader.service(fabric, deliver)?,
        };
        Ok(delivered)
    }

    pub fn release(self, fabric: &mut dyn Fabric) {
        match self {
            IncomingChannel::DirectDma { ring, .. } | IncomingChannel::MuxAggregated { ring, .. } => {
                ring.release(fabric)
            }
            IncomingChannel::CpuPolled { reader, .. } => reader.release(fabric),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FabricTopology;
    use crate::fabric::{MockFabric, MockFabricBackend};

    fn fabric_with_node() -> (MockFabricBackend, NodeId) {
        let mut fabric = MockFabricBackend::new(FabricTopology::zynq_7030()).with_auto_compute(false);
        let node = fabric.acquire_node("mandelbrot").unwrap();
        fabric.enable_node(node).unwrap();
        (fabric, node)
    }

    fn collect(
        channel: &mut IncomingChannel,
        fabric: &mut dyn Fabric,
    ) -> (usize, Vec<Vec<u8>>) {
        let mut runs = Vec::new();
        let n = channel
            .service(fabric, &mut |bytes: &[u8]| {
                runs.push(bytes.to_vec());
                ControlFlow::Continue(())
            })
            .unwrap();
        (n, runs)
    }

    #[test]
    fn test_dma_ring_delivers_and_rearms() {
        let (mut fabric, node) = fabric_with_node();
        let handle = fabric.handle();
        let ring = DmaRing::open(
            &mut fabric,
            node,
            DmaConfig {
                block_size: 16,
                block_count: 4,
            },
        )
        .unwrap();
        let mut channel = IncomingChannel::DirectDma { ring, worker: 0 };
        assert_eq!(collect(&mut channel, &mut fabric).0, 0);

        // More blocks than the ring holds, all arrive after re-arming
        for i in 0..6u8 {
            handle.inject_output(node, &[i; 16]);
        }
        let (n, runs) = collect(&mut channel, &mut fabric);
        assert_eq!(n, 16 * 6);
        assert_eq!(runs.len(), 6);
        assert_eq!(runs[5], vec![5u8; 16]);
    }

    #[test]
    fn test_dma_ring_stops_on_break() {
        let (mut fabric, node) = fabric_with_node();
        let handle = fabric.handle();
        let ring = DmaRing::open(
            &mut fabric,
            node,
            DmaConfig {
                block_size: 4,
                block_count: 4,
            },
        )
        .unwrap();
        handle.inject_output(node, &[1; 12]);
        let mut channel = IncomingChannel::DirectDma { ring, worker: 0 };
        let mut calls = 0;
        channel
            .service(&mut fabric, &mut |_: &[u8]| {
                calls += 1;
                ControlFlow::Break(())
            })
            .unwrap();
        assert_eq!(calls, 1);
        assert_eq!(collect(&mut channel, &mut fabric).1.len(), 2);
    }

    #[test]
    fn test_dma_ring_open_failure_closes_queue() {
        let mut mock = MockFabric::new();
        mock.expect_open_dma_reader()
            .returning(|_, _| Ok(QueueId(3)));
        mock.expect_dma_block_count()
            .returning(|_| Err(FabricError::Driver("ring".into())));
        mock.expect_close_queue()
            .withf(|q| *q == QueueId(3))
            .times(1)
            .return_const(());
        let config = DmaConfig {
            block_size: 8,
            block_count: 8,
        };
        assert!(DmaRing::open(&mut mock, 4, config).is_err());
    }

    #[test]
    fn test_polled_reader_assembles_records() {
        let (mut fabric, node) = fabric_with_node();
        let handle = fabric.handle();
        let reader = PolledReader::open(&mut fabric, node, 6).unwrap();
        let mut channel = IncomingChannel::CpuPolled { reader, worker: 0 };

        handle.inject_output(node, &[1, 1, 1, 1]);
        assert_eq!(collect(&mut channel, &mut fabric).0, 0);
        if let IncomingChannel::CpuPolled { reader, .. } = &channel {
            assert_eq!(reader.buffered(), 4);
        }

        handle.inject_output(node, &[1, 1, 2, 2, 2, 2, 2, 2, 3]);
        let (n, runs) = collect(&mut channel, &mut fabric);
        assert_eq!(n, 12);
        assert_eq!(runs, vec![vec![1u8; 6], vec![2u8; 6]]);
        if let IncomingChannel::CpuPolled { reader, .. } = &channel {
            assert_eq!(reader.buffered(), 1);
        }
        assert_eq!(channel.workers(), vec![0]);
    }
}
