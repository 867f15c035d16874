pub mod board;

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

use crate::{
    DashboardError,
    dispatcher::Dispatcher,
    telemetry::{STEERING_GAUGE_RANGE, THROTTLE_GAUGE_RANGE, TelemetrySnapshot, format_coord},
};

pub use board::{BoardView, DisplayBoard, ElementState};

pub type SharedBoard = Arc<Mutex<DisplayBoard>>;

/// The visual elements of the dashboard, in the order they are bound.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ElementId {
    ServerComm,
    ServerResp,
    Waypoints,
    Gps,
    Velocity,
    Energy,
    Steering,
    Throttle,
}

impl ElementId {
    pub const ALL: [ElementId; 8] = [
        ElementId::ServerComm,
        ElementId::ServerResp,
        ElementId::Waypoints,
        ElementId::Gps,
        ElementId::Velocity,
        ElementId::Energy,
        ElementId::Steering,
        ElementId::Throttle,
    ];

    /// Name the element's binding is registered under.
    pub fn binding_name(&self) -> &'static str {
        match self {
            ElementId::ServerComm => "server-comm",
            ElementId::ServerResp => "server-resp",
            ElementId::Waypoints => "waypoints",
            ElementId::Gps => "gps",
            ElementId::Velocity => "velocity",
            ElementId::Energy => "energy",
            ElementId::Steering => "steering",
            ElementId::Throttle => "throttle",
        }
    }

    /// What the element shows before the first tick arrives.
    pub(crate) fn initial_value(&self) -> ElementValue {
        match self {
            ElementId::ServerComm => ElementValue::Text("Server Comm. Time: 0 ms".to_string()),
            ElementId::ServerResp => ElementValue::Text("Server Resp. Time: 0 ms".to_string()),
            ElementId::Waypoints => ElementValue::Text("Predicted Waypoints: []".to_string()),
            ElementId::Gps => ElementValue::Text("GPS Coordinates: 0° N, 0° W".to_string()),
            ElementId::Velocity => ElementValue::Text("Velocity: 0 km/h".to_string()),
            ElementId::Energy => ElementValue::Text("Current Output: 0 watts".to_string()),
            ElementId::Steering => ElementValue::Gauge(Gauge::steering(0.)),
            ElementId::Throttle => ElementValue::Gauge(Gauge::throttle(0.)),
        }
    }

    /// Render this element's slice of a snapshot.
    pub fn render(&self, snapshot: &TelemetrySnapshot) -> ElementValue {
        match self {
            ElementId::ServerComm => ElementValue::Text(format!(
                "Server Comm. Time: {:.2} ms",
                snapshot.server_comm_ms
            )),
            ElementId::ServerResp => ElementValue::Text(format!(
                "Server Resp. Time: {:.2} ms",
                snapshot.server_resp_ms
            )),
            ElementId::Waypoints => ElementValue::Text(format!(
                "Predicted Waypoints: {}",
                snapshot.waypoints_label()
            )),
            ElementId::Gps => {
                let gps = snapshot.gps();
                let ns = if gps.lat < 0. { 'S' } else { 'N' };
                let ew = if gps.lon < 0. { 'W' } else { 'E' };
                ElementValue::Text(format!(
                    "GPS Coordinates: {}° {}, {}° {}",
                    format_coord(gps.lat.abs()),
                    ns,
                    format_coord(gps.lon.abs()),
                    ew
                ))
            }
            ElementId::Velocity => {
                ElementValue::Text(format!("Velocity: {:.2} km/h", snapshot.velocity_kmh))
            }
            ElementId::Energy => {
                ElementValue::Text(format!("Current Output: {} watts", snapshot.energy_watts))
            }
            ElementId::Steering => ElementValue::Gauge(Gauge::steering(snapshot.steering_deg)),
            ElementId::Throttle => ElementValue::Gauge(Gauge::throttle(snapshot.throttle_pct)),
        }
    }
}

/// A dial with a fixed range. Values outside the range are shown pinned to the edge.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Gauge {
    pub label: &'static str,
    pub min: f64,
    pub max: f64,
    pub value: f64,
}

impl Gauge {
    pub fn steering(value: f64) -> Self {
        Self {
            label: "Steering",
            min: *STEERING_GAUGE_RANGE.start(),
            max: *STEERING_GAUGE_RANGE.end(),
            value,
        }
    }

    pub fn throttle(value: f64) -> Self {
        Self {
            label: "Throttle",
            min: *THROTTLE_GAUGE_RANGE.start(),
            max: *THROTTLE_GAUGE_RANGE.end(),
            value,
        }
    }

    /// Needle position as a fraction of the dial, 0 at `min` and 1 at `max`.
    pub fn fraction(&self) -> f64 {
        ((self.value - self.min) / (self.max - self.min)).clamp(0., 1.)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum ElementValue {
    Text(String),
    Gauge(Gauge),
}

/// Binding that closes out each tick on the board. Registered after the element
/// bindings so it runs once all of them have had their turn.
pub const BOARD_COMMIT_BINDING: &str = "board-commit";

/// Register one binding per dashboard element, each rendering into `board`, then
/// the [`BOARD_COMMIT_BINDING`] that publishes the tick's frame.
pub fn register_standard_bindings(
    dispatcher: &Dispatcher,
    board: &SharedBoard,
) -> Result<(), DashboardError> {
    for element in ElementId::ALL {
        let board = board.clone();
        dispatcher.register_binding(element.binding_name(), move |snapshot| {
            let value = element.render(snapshot);
            board
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .write(element, snapshot.tick, value);
            Ok(())
        })?;
    }
    let board = board.clone();
    dispatcher.register_binding(BOARD_COMMIT_BINDING, move |snapshot| {
        board
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .commit(snapshot.tick);
        Ok(())
    })
}
