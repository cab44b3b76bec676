//! Core handle and resource types shared across the crate
//!
//! # Main Types
//!
//! - [`NodeId`] - Identifier of a node on the fabric (CPU port, PR region, mux, DMA engine)
//! - [`QueueId`] - Opaque handle of an open hardware queue (fifo or DMA ring)
//! - [`Endpoint`] - A node/port pair, the unit of routing
//! - [`NodeResource`] - A node held by the pipeline, for UI display
//! - [`WiringTier`] - Which rung of the fallback ladder connected a worker

use serde::{Deserialize, Serialize};

/// Identifier of a node on the fabric
pub type NodeId = u32;

/// Handle of an open hardware queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueueId(pub u32);

impl std::fmt::Display for QueueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "q{}", self.0)
    }
}

/// A node/port pair used as either end of a routing edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub node: NodeId,
    pub port: u8,
}

impl Endpoint {
    pub fn new(node: NodeId, port: u8) -> Self {
        Self { node, port }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.node, self.port)
    }
}

/// A fabric node held by the pipeline together with the function loaded in it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeResource {
    /// Node identifier
    pub node: NodeId,
    /// Bitstream or fixed-function name
    pub function: String,
}

impl NodeResource {
    pub fn new(node: NodeId, function: impl Into<String>) -> Self {
        Self {
            node,
            function: function.into(),
        }
    }
}

/// How a worker's output reaches the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WiringTier {
    /// Own DMA ring, chosen up front because enough engines were free
    DirectDma,
    /// Shared DMA ring behind a mux node
    Mux,
    /// Own DMA ring, picked up after mux acquisition ran out
    PerNodeDma,
    /// Plain read fifo drained by the CPU
    CpuPolled,
}

impl std::fmt::Display for WiringTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WiringTier::DirectDma => write!(f, "direct DMA"),
            WiringTier::Mux => write!(f, "mux"),
            WiringTier::PerNodeDma => write!(f, "per-node DMA"),
            WiringTier::CpuPolled => write!(f, "CPU polled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_display() {
        assert_eq!(Endpoint::new(4, 0).to_string(), "4:0");
        assert_eq!(QueueId(7).to_string(), "q7");
    }

    #[test]
    fn test_tier_display() {
        assert_eq!(WiringTier::CpuPolled.to_string(), "CPU polled");
        assert_eq!(WiringTier::Mux.to_string(), "mux");
    }
}
