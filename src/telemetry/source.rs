use std::{ops::Range, path::Path};

use log::{debug, info};
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::DashboardError;

use super::{TelemetrySnapshot, WAYPOINT_COUNT, Waypoint, round2};

const SERVER_COMM_MS: Range<f64> = 10.0..30.0;
const SERVER_RESP_MS: Range<f64> = 40.0..80.0;
const WAYPOINT_LAT: Range<f64> = 34.0..35.0;
const WAYPOINT_LON: Range<f64> = -119.0..-118.0;
const VELOCITY_KMH: Range<f64> = 0.0..60.0;
const ENERGY_WATTS_MIN: u32 = 500;
const ENERGY_WATTS_MAX: u32 = 1200;
const STEERING_DEG_MAX: f64 = 30.0;
const THROTTLE_PCT_MAX: f64 = 100.0;

/// A trait for producing telemetry snapshots for the dashboard.
///
/// This is the substitution point between the synthetic generator used for demos
/// and a real vehicle link. The dispatcher only ever talks to this trait, so a
/// new data source needs no change to dispatch or rendering.
///
/// # Contract
///
/// `next_snapshot()` is called exactly once per tick and must be callable
/// repeatedly. Sources backed by a real link report a failed read as
/// `DashboardError::SourceUnavailable`; the dispatcher contains it within the
/// tick and keeps scheduling.
pub trait TelemetrySource {
    /// Produce the snapshot for the current tick.
    ///
    /// # Errors
    ///
    /// Returns `SourceUnavailable` if the underlying data could not be read.
    fn next_snapshot(&mut self) -> Result<TelemetrySnapshot, DashboardError>;
}

impl<S: TelemetrySource + ?Sized> TelemetrySource for Box<S> {
    fn next_snapshot(&mut self) -> Result<TelemetrySnapshot, DashboardError> {
        (**self).next_snapshot()
    }
}

/// Synthetic source drawing every field uniformly from its documented range.
///
/// Each call is independent; the only state carried across calls is the RNG
/// stream, so two sources built from the same seed produce the same sequence.
pub struct SimulatedTelemetrySource {
    rng: StdRng,
}

impl Default for SimulatedTelemetrySource {
    fn default() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }
}

impl SimulatedTelemetrySource {
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn waypoint(&mut self) -> Waypoint {
        Waypoint {
            lat: round2(self.rng.gen_range(WAYPOINT_LAT)),
            lon: round2(self.rng.gen_range(WAYPOINT_LON)),
        }
    }

    /// Generate one snapshot. Infallible, unlike the trait method it backs.
    pub fn generate(&mut self) -> TelemetrySnapshot {
        let server_comm_ms = self.rng.gen_range(SERVER_COMM_MS);
        let server_resp_ms = self.rng.gen_range(SERVER_RESP_MS);
        let waypoints: [Waypoint; WAYPOINT_COUNT] = std::array::from_fn(|_| self.waypoint());
        let velocity_kmh = self.rng.gen_range(VELOCITY_KMH);
        let energy_watts = self.rng.gen_range(ENERGY_WATTS_MIN..=ENERGY_WATTS_MAX);
        let steering_deg = self.rng.gen_range(-STEERING_DEG_MAX..=STEERING_DEG_MAX);
        let throttle_pct = self.rng.gen_range(0.0..=THROTTLE_PCT_MAX);

        TelemetrySnapshot {
            tick: 0,
            server_comm_ms,
            server_resp_ms,
            waypoints,
            velocity_kmh,
            energy_watts,
            steering_deg,
            throttle_pct,
        }
    }
}

impl TelemetrySource for SimulatedTelemetrySource {
    fn next_snapshot(&mut self) -> Result<TelemetrySnapshot, DashboardError> {
        Ok(self.generate())
    }
}

/// A source replaying previously captured snapshots.
///
/// ReplayTelemetrySource stands in for a real vehicle link: it reads snapshots
/// from memory or from a JSON Lines file (as written by `avdash live --format json`)
/// and reports `SourceUnavailable` once it runs out of data, unless it was built
/// to loop.
pub struct ReplayTelemetrySource {
    cur_point: usize,
    snapshots: Vec<TelemetrySnapshot>,
    looping: bool,
}

impl ReplayTelemetrySource {
    pub fn from_snapshots(snapshots: Vec<TelemetrySnapshot>) -> Self {
        Self {
            cur_point: 0,
            snapshots,
            looping: false,
        }
    }

    /// Load snapshots from a JSON Lines file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file does not exist
    /// - The file cannot be read or a line is not a valid snapshot
    pub fn from_file(file: &Path) -> Result<Self, DashboardError> {
        if !file.exists() {
            return Err(DashboardError::InvalidTelemetryFile {
                path: format!("{:?}", file),
            });
        }

        let snapshots = serde_jsonlines::json_lines(file)
            .map_err(|e| DashboardError::TelemetryLoaderError { source: e })?
            .collect::<Result<Vec<TelemetrySnapshot>, std::io::Error>>()
            .map_err(|e| DashboardError::TelemetryLoaderError { source: e })?;

        info!(
            "Loaded {} telemetry snapshots from {:?}",
            snapshots.len(),
            file
        );
        Ok(Self::from_snapshots(snapshots))
    }

    /// Restart from the first snapshot once the data is exhausted.
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn remaining(&self) -> usize {
        self.snapshots.len().saturating_sub(self.cur_point)
    }
}

impl TelemetrySource for ReplayTelemetrySource {
    fn next_snapshot(&mut self) -> Result<TelemetrySnapshot, DashboardError> {
        if self.cur_point >= self.snapshots.len() {
            if !self.looping || self.snapshots.is_empty() {
                return Err(DashboardError::SourceUnavailable {
                    description: "replay exhausted".to_string(),
                });
            }
            debug!("Replay reached the end, restarting from the first snapshot");
            self.cur_point = 0;
        }

        // replayed snapshots keep the tick they were captured on until the
        // dispatcher re-stamps them
        let snapshot = self.snapshots[self.cur_point].clone();
        self.cur_point += 1;

        Ok(snapshot)
    }
}
