//! Fabric floorplan: which node ids exist and what each one is
//!
//! Board variants number their nodes differently, so the layout is an
//! explicit value handed to whoever needs it. It can be read from a
//! floorplan file with one node per line:
//!
//! ```text
//! id TYPE x y w h
//! ```
//!
//! `TYPE` is `CPU`, `PR`, `DMA` or `ICAP`; any other word names a fixed
//! function such as `mux`. The geometry is only used for display.

use crate::config::MUX_FUNCTION;
use crate::error::{FractalError, Result, ResultExt};
use crate::types::NodeId;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Places searched by [`FabricTopology::load_or_default`], in order
pub const FLOORPLAN_PATHS: &[&str] = &["/usr/share/floorplan-config", "floorplan-config"];

/// Kind of node in the fabric
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// Host-facing fifo node
    Cpu,
    /// Fixed logic, named by its function
    Fixed(String),
    /// Partially reconfigurable region
    Pr,
    /// DMA engine
    Dma,
    /// Configuration access port
    Icap,
}

impl NodeKind {
    fn parse(word: &str) -> Self {
        match word {
            "CPU" => NodeKind::Cpu,
            "PR" => NodeKind::Pr,
            "DMA" => NodeKind::Dma,
            "ICAP" => NodeKind::Icap,
            other => NodeKind::Fixed(other.to_string()),
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKind::Cpu => write!(f, "CPU"),
            NodeKind::Fixed(function) => write!(f, "{}", function),
            NodeKind::Pr => write!(f, "PR"),
            NodeKind::Dma => write!(f, "DMA"),
            NodeKind::Icap => write!(f, "ICAP"),
        }
    }
}

/// Display rectangle of a node on the floorplan picture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }
}

/// One node of the floorplan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub geometry: Rect,
}

impl TopologyNode {
    pub fn new(id: NodeId, kind: NodeKind, geometry: Rect) -> Self {
        Self { id, kind, geometry }
    }
}

impl std::fmt::Display for TopologyNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {}",
            self.id, self.kind, self.geometry.x, self.geometry.y, self.geometry.w, self.geometry.h
        )
    }
}

/// Node layout of one board variant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FabricTopology {
    nodes: Vec<TopologyNode>,
}

impl Default for FabricTopology {
    fn default() -> Self {
        Self::zynq_7030()
    }
}

impl FabricTopology {
    pub fn new(nodes: Vec<TopologyNode>) -> Self {
        Self { nodes }
    }

    /// 7030 layout: CPU 0-1, mux 2-3, PR 4-11, DMA 12-14, ICAP 15
    pub fn zynq_7030() -> Self {
        let mux = || NodeKind::Fixed(MUX_FUNCTION.to_string());
        Self::new(vec![
            TopologyNode::new(0, NodeKind::Cpu, Rect::new(110, 90, 91, 41)),
            TopologyNode::new(1, NodeKind::Cpu, Rect::new(110, 140, 91, 41)),
            TopologyNode::new(2, mux(), Rect::new(330, 430, 71, 81)),
            TopologyNode::new(3, mux(), Rect::new(330, 520, 71, 81)),
            TopologyNode::new(4, NodeKind::Pr, Rect::new(210, 35, 110, 192)),
            TopologyNode::new(5, NodeKind::Pr, Rect::new(210, 227, 110, 192)),
            TopologyNode::new(6, NodeKind::Pr, Rect::new(450, 35, 120, 192)),
            TopologyNode::new(7, NodeKind::Pr, Rect::new(450, 227, 120, 192)),
            TopologyNode::new(8, NodeKind::Pr, Rect::new(450, 419, 120, 192)),
            TopologyNode::new(9, NodeKind::Pr, Rect::new(426, 613, 142, 192)),
            TopologyNode::new(10, NodeKind::Pr, Rect::new(184, 613, 120, 192)),
            TopologyNode::new(11, NodeKind::Pr, Rect::new(50, 613, 114, 192)),
            TopologyNode::new(12, NodeKind::Dma, Rect::new(110, 240, 91, 41)),
            TopologyNode::new(13, NodeKind::Dma, Rect::new(110, 290, 91, 41)),
            TopologyNode::new(14, NodeKind::Dma, Rect::new(110, 340, 91, 41)),
            TopologyNode::new(15, NodeKind::Icap, Rect::default()),
        ])
    }

    /// 7015 layout: CPU 0, PR 1-4, DMA 5-6, ICAP 7
    pub fn zynq_7015() -> Self {
        Self::new(vec![
            TopologyNode::new(0, NodeKind::Cpu, Rect::new(110, 90, 91, 41)),
            TopologyNode::new(1, NodeKind::Pr, Rect::new(210, 35, 110, 192)),
            TopologyNode::new(2, NodeKind::Pr, Rect::new(210, 227, 110, 192)),
            TopologyNode::new(3, NodeKind::Pr, Rect::new(450, 35, 120, 192)),
            TopologyNode::new(4, NodeKind::Pr, Rect::new(450, 227, 120, 192)),
            TopologyNode::new(5, NodeKind::Dma, Rect::new(110, 240, 91, 41)),
            TopologyNode::new(6, NodeKind::Dma, Rect::new(110, 290, 91, 41)),
            TopologyNode::new(7, NodeKind::Icap, Rect::default()),
        ])
    }

    /// Parse floorplan text, see the module docs for the format
    ///
    /// Blank lines and lines starting with `#` are skipped.
    pub fn parse_floorplan(text: &str) -> Result<Self> {
        let mut nodes = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != 6 {
                return Err(FractalError::Config(format!(
                    "floorplan line {}: expected 6 fields, found {}",
                    lineno + 1,
                    fields.len()
                )));
            }
            let number = |s: &str| -> Result<i32> {
                s.parse().map_err(|_| {
                    FractalError::Config(format!(
                        "floorplan line {}: '{}' is not a number",
                        lineno + 1,
                        s
                    ))
                })
            };
            let id: NodeId = fields[0].parse().map_err(|_| {
                FractalError::Config(format!(
                    "floorplan line {}: invalid node id '{}'",
                    lineno + 1,
                    fields[0]
                ))
            })?;
            let geometry = Rect::new(
                number(fields[2])?,
                number(fields[3])?,
                number(fields[4])?,
                number(fields[5])?,
            );
            nodes.push(TopologyNode::new(id, NodeKind::parse(fields[1]), geometry));
        }
        Ok(Self::new(nodes))
    }

    /// Read a floorplan file
    pub fn load_floorplan(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read floorplan {:?}", path))?;
        Self::parse_floorplan(&text)
    }

    /// Search [`FLOORPLAN_PATHS`], falling back to the 7030 layout
    pub fn load_or_default() -> Self {
        for candidate in FLOORPLAN_PATHS {
            let path = Path::new(candidate);
            if !path.exists() {
                continue;
            }
            match Self::load_floorplan(path) {
                Ok(topology) => {
                    tracing::info!("Loaded floorplan from {:?}", path);
                    return topology;
                }
                Err(e) => tracing::warn!("Ignoring floorplan {:?}: {}", path, e),
            }
        }
        tracing::warn!("{} not found, using defaults.", FLOORPLAN_PATHS[0]);
        Self::zynq_7030()
    }

    pub fn nodes(&self) -> &[TopologyNode] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&TopologyNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Fixed nodes implementing the mux function, in id order
    pub fn mux_nodes(&self) -> Vec<NodeId> {
        self.ids_where(|k| matches!(k, NodeKind::Fixed(f) if f == MUX_FUNCTION))
    }

    /// Partially reconfigurable regions, in id order
    pub fn pr_regions(&self) -> Vec<NodeId> {
        self.ids_where(|k| *k == NodeKind::Pr)
    }

    /// DMA engine nodes, in id order
    pub fn dma_nodes(&self) -> Vec<NodeId> {
        self.ids_where(|k| *k == NodeKind::Dma)
    }

    pub fn dma_channel_count(&self) -> usize {
        self.dma_nodes().len()
    }

    pub fn cpu_node_count(&self) -> usize {
        self.ids_where(|k| *k == NodeKind::Cpu).len()
    }

    fn ids_where(&self, pred: impl Fn(&NodeKind) -> bool) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|n| pred(&n.kind))
            .map(|n| n.id)
            .collect();
        ids.sort_unstable();
        ids
    }
}

impl std::fmt::Display for FabricTopology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for node in &self.nodes {
            writeln!(f, "{}", node)?;
        }
        Ok(())
    }
}
