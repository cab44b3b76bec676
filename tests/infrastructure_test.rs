//! Test to verify test infrastructure works correctly

mod common;

use common::builders::{ConfigBuilder, TopologyBuilder};

#[test]
fn test_infrastructure_setup() {
    // Test that builders work
    let config = ConfigBuilder::new().size(80, 60).max_workers(2).build();
    assert_eq!(config.image.width, 80);
    assert_eq!(config.image.height, 60);
    assert_eq!(config.connectivity.max_workers, 2);

    let topology = TopologyBuilder::new().cpu().pr_regions(2).dma(1).build();
    assert_eq!(topology.nodes().len(), 4);
}

#[test]
#[cfg(feature = "mock-fabric")]
fn test_channels() {
    let (tx, rx, _tx2, _rx2) = common::mock_helpers::create_test_channels::<u32, u32>();
    tx.send(7).unwrap();
    assert_eq!(rx.recv_timeout(common::test_timeout()).unwrap(), 7);
}

#[test]
fn test_float_comparison() {
    common::assert_float_eq(1.0, 1.0000001, 0.001);
}

#[test]
#[should_panic]
fn test_float_comparison_fails() {
    common::assert_float_eq(1.0, 2.0, 0.001);
}
