//! Feeding a tracker from a simulated SDK on another thread.
//!
//! Run with: cargo run --example async_tracking --features runtime

use std::sync::Arc;
use std::time::Duration;

use ride_tracker::{
    RouteStore,
    InMemoryRouteStore, Location, RouteReconciler, RouteTracker, SimulatedEventSource,
};

#[tokio::main]
async fn main() {
    let store = Arc::new(InMemoryRouteStore::new());
    let source = Arc::new(SimulatedEventSource::new());
    let tracker = RouteTracker::start(RouteReconciler::new(Arc::clone(&store), Arc::clone(&source)));

    // SDK callbacks arrive on their own thread
    let sdk = {
        let source = Arc::clone(&source);
        std::thread::spawn(move || {
            for i in 0..5i64 {
                let lat = 51.50 + i as f64 * 0.01;
                source.simulate_ride(
                    Location::new(lat, -0.12, i * 1_000),
                    Location::new(lat + 0.005, -0.13, i * 1_000 + 500),
                );
            }
            // A ride still in progress when the app quits
            source.emit(ride_tracker::ActivityEvent::start(Location::new(51.60, -0.12, 9_000)));
            source.record_location(Location::new(51.61, -0.13, 9_500));
        })
    };
    let _ = sdk.join();
    tokio::time::sleep(Duration::from_millis(50)).await;

    println!("processed {} events", tracker.processed_events());
    match tracker.shutdown().await {
        Ok(closed) => println!("finalized {} open routes", closed),
        Err(e) => println!("finalize failed: {}", e),
    }

    for route in store.all_routes().unwrap_or_default() {
        println!(
            "route {}: ({:.3}, {:.3}) -> {:?}",
            route.id,
            route.origin.latitude,
            route.origin.longitude,
            route.destination.map(|d| (d.latitude, d.longitude))
        );
    }
}
