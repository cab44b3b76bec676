//! Mock construction helpers

use crossbeam_channel::{bounded, Receiver, Sender};
use fabric_fractal::config::{FabricTopology, PipelineConfig};
use fabric_fractal::fabric::{MockFabricBackend, MockFabricHandle};
use fabric_fractal::pipeline::{
    event_channel, EventReceiver, MandelbrotPipeline, PipelineEvent, RenderedFrame,
};
use std::time::Duration;

/// Create test channels with default size
pub fn create_test_channels<T, U>() -> (Sender<T>, Receiver<T>, Sender<U>, Receiver<U>) {
    let (tx1, rx1) = bounded(16);
    let (tx2, rx2) = bounded(16);
    (tx1, rx1, tx2, rx2)
}

/// Simulated fabric with a low iteration cap so rows compute quickly
pub fn create_test_fabric(topology: &FabricTopology, dma_channels: usize) -> MockFabricBackend {
    MockFabricBackend::new(topology.clone())
        .with_dma_channels(dma_channels)
        .with_max_iterations(16)
}

/// A pipeline on the simulated fabric plus its inspection handle and events
pub fn create_test_pipeline(
    config: PipelineConfig,
    topology: FabricTopology,
    dma_channels: usize,
) -> (MandelbrotPipeline, MockFabricHandle, EventReceiver) {
    let fabric = create_test_fabric(&topology, dma_channels);
    let handle = fabric.handle();
    let (tx, rx) = event_channel(4096);
    let pipeline = MandelbrotPipeline::new(config, topology, Box::new(fabric), tx)
        .expect("test config must be valid");
    (pipeline, handle, rx)
}

/// Run reactor turns until `count` frames arrived or `max_turns` ran out
pub fn render_frames(
    pipeline: &mut MandelbrotPipeline,
    events: &EventReceiver,
    count: usize,
    max_turns: usize,
) -> Vec<RenderedFrame> {
    let mut frames = Vec::new();
    for _ in 0..max_turns {
        if pipeline.poll(Duration::from_millis(1)).is_err() {
            break;
        }
        frames.extend(events.try_iter().filter_map(|event| match event {
            PipelineEvent::RenderedFrame(frame) => Some(frame),
            _ => None,
        }));
        if frames.len() >= count {
            break;
        }
    }
    frames
}

/// Assert the fabric holds nothing: no nodes, queues or dangling routes
pub fn assert_fabric_clean(handle: &MockFabricHandle) {
    assert!(
        handle.acquired_nodes().is_empty(),
        "nodes still held: {:?}",
        handle.acquired_nodes()
    );
    assert_eq!(handle.open_queue_count(), 0, "queues still open");
    assert!(handle.edges().is_empty(), "routes left: {:?}", handle.edges());
    assert_eq!(handle.dangling_releases(), 0, "node released with routes");
}
