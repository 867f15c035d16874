pub mod source;

use std::ops::RangeInclusive;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

pub use source::{ReplayTelemetrySource, SimulatedTelemetrySource, TelemetrySource};

/// Number of predicted waypoints carried by every snapshot.
pub const WAYPOINT_COUNT: usize = 3;

/// Fixed range the steering gauge is drawn against, in degrees.
pub const STEERING_GAUGE_RANGE: RangeInclusive<f64> = -45.0..=45.0;
/// Fixed range the throttle gauge is drawn against, in percent.
pub const THROTTLE_GAUGE_RANGE: RangeInclusive<f64> = 0.0..=100.0;

/// A (latitude, longitude) pair in decimal degrees.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Waypoint {
    pub lat: f64,
    pub lon: f64,
}

impl Waypoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// One complete, internally consistent set of telemetry values for a single tick.
///
/// Snapshots are never mutated after the source hands them out. The dispatcher
/// stamps the tick index on a copy right before fan-out, so every binding of a
/// cycle observes the same value.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TelemetrySnapshot {
    /// Tick index this snapshot was dispatched on, 0 until dispatched
    #[serde(default)]
    pub tick: u64,
    /// Latency of the logical communication link, ms
    pub server_comm_ms: f64,
    /// Latency of the logical response path, ms
    pub server_resp_ms: f64,
    /// Predicted waypoints, index 0 is the current position
    pub waypoints: [Waypoint; WAYPOINT_COUNT],
    /// Vehicle speed, km/h
    pub velocity_kmh: f64,
    /// Instantaneous power draw, watts
    pub energy_watts: u32,
    /// Steering angle, degrees. Negative is left
    pub steering_deg: f64,
    /// Throttle position, percent
    pub throttle_pct: f64,
}

impl TelemetrySnapshot {
    /// Current GPS position. Always the first predicted waypoint.
    pub fn gps(&self) -> Waypoint {
        self.waypoints[0]
    }

    pub(crate) fn stamped(&self, tick: u64) -> Self {
        Self {
            tick,
            ..self.clone()
        }
    }

    /// Waypoints formatted as a list of `(lat, lon)` tuples.
    pub fn waypoints_label(&self) -> String {
        format!(
            "[{}]",
            self.waypoints
                .iter()
                .map(|w| format!("({}, {})", format_coord(w.lat), format_coord(w.lon)))
                .join(", ")
        )
    }
}

/// Formats a coordinate keeping at least one decimal digit, so 35.0 does not
/// collapse to "35".
pub(crate) fn format_coord(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}

/// Rounds to two decimal digits.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
pub(crate) fn sample_snapshot() -> TelemetrySnapshot {
    TelemetrySnapshot {
        tick: 0,
        server_comm_ms: 12.3456,
        server_resp_ms: 55.5,
        waypoints: [
            Waypoint::new(34.12, -118.45),
            Waypoint::new(35.0, -118.9),
            Waypoint::new(34.5, -119.0),
        ],
        velocity_kmh: 42.126,
        energy_watts: 873,
        steering_deg: -12.5,
        throttle_pct: 64.0,
    }
}
