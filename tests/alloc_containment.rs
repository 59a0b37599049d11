use std::alloc::System;

use stats_alloc::{Region, StatsAlloc, INSTRUMENTED_SYSTEM};

use fencewatch::{Geofence, InMemoryRegionStore, LatLng, Location, RegionStore, TransitionDetector};

#[global_allocator]
static GLOBAL: &StatsAlloc<System> = &INSTRUMENTED_SYSTEM;

fn ring(n: usize) -> Vec<LatLng> {
    let center = LatLng::new(16.2, 77.3);
    (0..n)
        .map(|i| {
            #[allow(clippy::cast_precision_loss)]
            let bearing = 360.0 * i as f64 / n as f64;
            center.destination(bearing, 500.0 + if i % 2 == 0 { 0.0 } else { 200.0 })
        })
        .collect()
}

#[test]
fn containment_does_not_allocate() {
    let circle = Geofence::circle("c", LatLng::new(16.2, 77.3), 300.0);
    let polygon = Geofence::polygon("p", ring(64));
    let sample_points: Vec<LatLng> = (0..100)
        .map(|i| LatLng::new(16.2 + f64::from(i) * 1e-4, 77.3))
        .collect();

    let region = Region::new(GLOBAL);
    let mut inside = 0usize;
    for p in &sample_points {
        inside += usize::from(circle.contains(*p).unwrap());
        inside += usize::from(polygon.contains(*p).unwrap());
    }
    let stats = region.change();

    assert!(inside > 0);
    assert_eq!(stats.allocations, 0, "containment allocated: {stats:?}");
}

#[test]
fn steady_state_tick_allocation_budget() {
    let store = InMemoryRegionStore::with_regions(vec![
        Geofence::circle("c", LatLng::new(16.2, 77.3), 300.0),
        Geofence::polygon("p", ring(32)),
    ])
    .unwrap();
    let snapshot = store.snapshot().unwrap();
    let locations: Vec<Location> = (0..100)
        .map(|i| Location::new(format!("dev-{i}"), 16.2 + f64::from(i) * 1e-5, 77.3, 1))
        .collect();

    let mut detector = TransitionDetector::new();
    // Warm up: every pair baselines and its state slot is created.
    detector.evaluate_tick(&locations, &snapshot);

    let region = Region::new(GLOBAL);
    let report = detector.evaluate_tick(&locations, &snapshot);
    let stats = region.change();

    assert!(report.transitions.is_empty());
    assert_eq!(report.evaluated_pairs, 200);
    // Budgets are conservative; the point is that a quiet tick does not
    // allocate per pair.
    assert!(stats.allocations <= 16, "quiet tick allocated too much: {stats:?}");
}
