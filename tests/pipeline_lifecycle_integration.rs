//! Integration tests for the backend lifecycle
//!
//! These tests run the backend on its own thread against the simulated fabric
//! and validate the complete workflow:
//! - Activation, rendering and deactivation
//! - Commands accepted only while inactive
//! - Fault reporting and recovery
//! - Shutdown releasing every node

#![cfg(feature = "mock-fabric")]

mod common;

use common::builders::ConfigBuilder;
use common::event_timeout;
use common::mock_helpers::{assert_fabric_clean, create_test_fabric};
use fabric_fractal::backend::{FabricBackend, FrontendHandle, PipelineEvent};
use fabric_fractal::config::{FabricTopology, PipelineConfig};
use fabric_fractal::fabric::MockFabricHandle;
use fabric_fractal::{RenderedFrame, StatsSnapshot};
use std::thread::{self, JoinHandle};

fn spawn_backend(config: PipelineConfig) -> (FrontendHandle, MockFabricHandle, JoinHandle<()>) {
    let topology = FabricTopology::zynq_7030();
    let fabric = create_test_fabric(&topology, 3);
    let handle = fabric.handle();
    let (backend, frontend) = FabricBackend::new(config, topology, Box::new(fabric)).unwrap();
    let thread = thread::spawn(move || backend.run());
    (frontend, handle, thread)
}

/// Wait for the next event matching `pred`, failing on timeout
fn wait_for(
    frontend: &FrontendHandle,
    mut pred: impl FnMut(&PipelineEvent) -> bool,
) -> PipelineEvent {
    loop {
        match frontend.recv_timeout(event_timeout()) {
            Some(event) if pred(&event) => return event,
            Some(_) => continue,
            None => panic!("timed out waiting for event"),
        }
    }
}

fn wait_frames(frontend: &FrontendHandle, count: usize) -> Vec<RenderedFrame> {
    (0..count)
        .map(|_| match wait_for(frontend, |e| matches!(e, PipelineEvent::RenderedFrame(_))) {
            PipelineEvent::RenderedFrame(frame) => frame,
            _ => unreachable!(),
        })
        .collect()
}

fn wait_stats(frontend: &FrontendHandle) -> StatsSnapshot {
    frontend.request_stats();
    match wait_for(frontend, |e| matches!(e, PipelineEvent::Stats(_))) {
        PipelineEvent::Stats(stats) => stats,
        _ => unreachable!(),
    }
}

fn shutdown(frontend: FrontendHandle, thread: JoinHandle<()>) {
    frontend.shutdown();
    wait_for(&frontend, |e| matches!(e, PipelineEvent::Shutdown));
    thread.join().expect("backend thread should exit cleanly");
}

#[test]
fn test_backend_creation_and_shutdown() {
    let (frontend, handle, thread) = spawn_backend(ConfigBuilder::new().build());
    shutdown(frontend, thread);
    assert_fabric_clean(&handle);
}

#[test]
fn test_activate_renders_frames() {
    let (frontend, handle, thread) = spawn_backend(ConfigBuilder::new().build());

    frontend.activate(4);
    wait_for(&frontend, |e| matches!(e, PipelineEvent::ActiveStateChanged(true)));
    let resources = match wait_for(&frontend, |e| matches!(e, PipelineEvent::Resources(_))) {
        PipelineEvent::Resources(resources) => resources,
        _ => unreachable!(),
    };
    assert_eq!(
        resources
            .iter()
            .filter(|r| r.function == "mandelbrot")
            .count(),
        4
    );

    let frames = wait_frames(&frontend, 3);
    for frame in &frames {
        assert_eq!(frame.width, 48);
        assert_eq!(frame.height, 40);
        assert_eq!(frame.pixels.len(), 48 * 40);
        assert!(frame.image_slot < 2);
    }
    assert!(frames.windows(2).all(|w| w[0].sequence < w[1].sequence));

    let stats = wait_stats(&frontend);
    assert!(stats.frames_rendered >= 3);
    assert!(stats.scanlines_received >= 3 * 40);
    assert_eq!(stats.activations, 1);
    assert_eq!(stats.faults, 0);

    shutdown(frontend, thread);
    assert_fabric_clean(&handle);
}

#[test]
fn test_deactivate_and_reactivate() {
    let (frontend, handle, thread) = spawn_backend(ConfigBuilder::new().build());

    frontend.activate(2);
    wait_frames(&frontend, 1);
    frontend.deactivate();
    wait_for(&frontend, |e| matches!(e, PipelineEvent::ActiveStateChanged(false)));
    assert!(handle.acquired_nodes().is_empty());

    frontend.activate(2);
    wait_for(&frontend, |e| matches!(e, PipelineEvent::ActiveStateChanged(true)));
    wait_frames(&frontend, 1);
    assert_eq!(wait_stats(&frontend).activations, 2);

    shutdown(frontend, thread);
    assert_fabric_clean(&handle);
}

#[test]
fn test_resize_only_while_inactive() {
    let (frontend, handle, thread) = spawn_backend(ConfigBuilder::new().build());

    frontend.set_size(64, 24);
    frontend.activate(2);
    let frame = wait_frames(&frontend, 1).remove(0);
    assert_eq!((frame.width, frame.height), (64, 24));

    frontend.set_size(32, 32);
    wait_for(&frontend, |e| matches!(e, PipelineEvent::Fault(_)));
    let frame = wait_frames(&frontend, 1).remove(0);
    assert_eq!((frame.width, frame.height), (64, 24));

    shutdown(frontend, thread);
    assert_fabric_clean(&handle);
}

#[test]
fn test_fault_stops_pipeline_and_allows_recovery() {
    let (frontend, handle, thread) = spawn_backend(ConfigBuilder::new().build());

    frontend.activate(2);
    wait_frames(&frontend, 1);
    handle.fail_next_write(3);
    wait_for(&frontend, |e| matches!(e, PipelineEvent::Fault(_)));
    wait_for(&frontend, |e| matches!(e, PipelineEvent::ActiveStateChanged(false)));
    assert!(handle.acquired_nodes().is_empty());
    assert_eq!(wait_stats(&frontend).faults, 1);

    frontend.activate(2);
    wait_frames(&frontend, 1);

    shutdown(frontend, thread);
    assert_fabric_clean(&handle);
}

#[test]
fn test_activation_failure_reported() {
    let (frontend, handle, thread) = spawn_backend(ConfigBuilder::new().build());
    handle.occupy_pr_regions(8);

    frontend.activate(4);
    let event = wait_for(&frontend, |_| true);
    assert!(matches!(event, PipelineEvent::Fault(_)), "got {:?}", event);

    shutdown(frontend, thread);
    assert!(handle.acquired_nodes().is_empty());
}

#[test]
fn test_slow_frontend_drops_frames() {
    let config = ConfigBuilder::new().event_queue_depth(2).build();
    let (frontend, handle, thread) = spawn_backend(config);

    frontend.activate(4);
    // Let the queue fill up while nobody reads
    thread::sleep(std::time::Duration::from_millis(300));
    frontend.deactivate();
    wait_for(&frontend, |e| matches!(e, PipelineEvent::ActiveStateChanged(false)));
    let stats = wait_stats(&frontend);
    assert!(stats.dropped_frames > 0);

    shutdown(frontend, thread);
    assert_fabric_clean(&handle);
}

#[test]
fn test_viewport_commands_accepted() {
    let (frontend, handle, thread) = spawn_backend(ConfigBuilder::new().build());

    frontend.activate(2);
    let first = wait_frames(&frontend, 1).remove(0);
    frontend.set_viewport_target(0.3, 0.5);
    frontend.reset_zoom();
    // Frames keep coming after the latch is applied at a frame boundary
    let later = wait_frames(&frontend, 4);
    assert!(later.iter().all(|f| f.sequence > first.sequence));

    frontend.request_resources();
    wait_for(&frontend, |e| matches!(e, PipelineEvent::Resources(_)));

    shutdown(frontend, thread);
    assert_fabric_clean(&handle);
}
