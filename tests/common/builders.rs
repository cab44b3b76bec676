//! Test data builders for creating test objects

use fabric_fractal::config::{
    FabricTopology, ImageConfig, NodeKind, PipelineConfig, Rect, TopologyNode,
};

/// Builder for small pipeline configs that render quickly
pub struct ConfigBuilder {
    config: PipelineConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        let mut config = PipelineConfig::default();
        config.image = ImageConfig {
            width: 48,
            height: 40,
            image_slots: 2,
        };
        config.runtime.poll_timeout_ms = 2;
        Self { config }
    }

    pub fn size(mut self, width: u16, height: u16) -> Self {
        self.config.image.width = width;
        self.config.image.height = height;
        self
    }

    pub fn slots(mut self, slots: usize) -> Self {
        self.config.image.image_slots = slots;
        self
    }

    pub fn max_workers(mut self, workers: usize) -> Self {
        self.config.connectivity.max_workers = workers;
        self
    }

    pub fn max_direct(mut self, channels: usize) -> Self {
        self.config.connectivity.max_direct_dma_channels = channels;
        self
    }

    pub fn fan_in(mut self, fan_in: usize) -> Self {
        self.config.connectivity.mux_fan_in = fan_in;
        self
    }

    pub fn event_queue_depth(mut self, depth: usize) -> Self {
        self.config.runtime.event_queue_depth = depth;
        self
    }

    pub fn build(self) -> PipelineConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for hand-made floorplans
pub struct TopologyBuilder {
    nodes: Vec<TopologyNode>,
}

impl TopologyBuilder {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    fn push(mut self, kind: NodeKind) -> Self {
        let id = self.nodes.len() as u32;
        self.nodes
            .push(TopologyNode::new(id, kind, Rect::new(0, 0, 10, 10)));
        self
    }

    pub fn cpu(self) -> Self {
        self.push(NodeKind::Cpu)
    }

    pub fn mux(self) -> Self {
        self.push(NodeKind::Fixed("mux".to_string()))
    }

    pub fn pr_regions(mut self, count: usize) -> Self {
        for _ in 0..count {
            self = self.push(NodeKind::Pr);
        }
        self
    }

    pub fn dma(mut self, count: usize) -> Self {
        for _ in 0..count {
            self = self.push(NodeKind::Dma);
        }
        self
    }

    pub fn build(self) -> FabricTopology {
        FabricTopology::new(self.nodes)
    }
}

impl Default for TopologyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new().size(64, 32).slots(3).max_workers(5).build();
        assert_eq!(config.image.width, 64);
        assert_eq!(config.image.height, 32);
        assert_eq!(config.image.image_slots, 3);
        assert_eq!(config.connectivity.max_workers, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_topology_builder() {
        let topology = TopologyBuilder::new().cpu().mux().pr_regions(3).dma(1).build();
        assert_eq!(topology.mux_nodes(), vec![1]);
        assert_eq!(topology.pr_regions(), vec![2, 3, 4]);
        assert_eq!(topology.dma_channel_count(), 1);
    }
}
