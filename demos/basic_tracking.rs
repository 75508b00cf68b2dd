//! Basic example of turning ride events into routes.
//!
//! Run with: cargo run --example basic_tracking

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ride_tracker::{
    ActivityEvent, Clock, HandleOutcome, InMemoryRouteStore, Location, ManualClock, RouteReconciler,
    SimulatedEventSource, TrackerConfig,
};

fn main() {
    let store = Arc::new(InMemoryRouteStore::new());
    let source = Arc::new(SimulatedEventSource::new());
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let reconciler = RouteReconciler::with_clock(
        Arc::clone(&store),
        Arc::clone(&source),
        clock.clone(),
        TrackerConfig::default(),
    );

    let finished = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&finished);
    reconciler.add_observer(Arc::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    println!("Ride Tracking Example\n");

    // A messy event stream (London area): two starts in a row, a proper
    // end, then a duplicate end.
    let events = vec![
        ActivityEvent::start(Location::new(51.5074, -0.1278, clock.now_millis() + 600_000)),
        ActivityEvent::start(Location::new(51.5155, -0.1410, clock.now_millis() + 1_200_000)),
        ActivityEvent::end(Location::new(51.5200, -0.1500, clock.now_millis() + 1_800_000)),
        ActivityEvent::end(Location::new(51.5201, -0.1501, clock.now_millis() + 2_400_000)),
    ];

    for (i, event) in events.iter().enumerate() {
        clock.advance(600_000);
        source.record_location(event.location);

        match reconciler.handle(event) {
            Ok(HandleOutcome::Opened { route, orphan_closed }) => {
                println!("{}. start -> opened route {}", i + 1, route.id);
                for id in orphan_closed {
                    println!("   orphan-closed route {}", id);
                }
            }
            Ok(HandleOutcome::Closed { route }) => {
                println!("{}. end   -> closed route {}", i + 1, route.id);
            }
            Ok(HandleOutcome::DanglingEnd) => {
                println!("{}. end   -> nothing open, ignored", i + 1);
            }
            Err(e) => println!("{}. failed: {}", i + 1, e),
        }
    }

    println!("\nRoutes:");
    for route in reconciler.all_routes().unwrap_or_default() {
        let track = reconciler.route_track(&route);
        println!(
            "   #{} {}..{} straight {:.0}m, recorded {:.0}m over {} fixes",
            route.id,
            route.start_time,
            route.effective_end(clock.now_millis()),
            route.straight_line_distance().unwrap_or(0.0),
            track.distance_meters,
            track.locations.len()
        );
    }

    println!("\nroute-finished notifications: {}", finished.load(Ordering::SeqCst));
}
