//! Simulated planter telemetry.
//!
//! Drives serpentine passes over a rectangular field and streams the
//! resulting GNSS fixes to connected monitors through the gateway's
//! broadcast primitive. The gateway never depends on this crate; it is a
//! producer like any real GNSS feed would be.

mod route;

pub use route::{RouteSample, RouteSimulator};
