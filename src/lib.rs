// Library interface for avdash
// This allows integration tests to access internal modules

pub mod config;
pub mod dispatcher;
pub mod display;
pub mod errors;
pub mod telemetry;

// Re-export commonly used types
pub use config::{AppConfig, OutputFormat};
pub use dispatcher::{Dispatcher, DispatcherState, TickOutcome, UnavailablePolicy};
pub use display::{
    BOARD_COMMIT_BINDING, BoardView, DisplayBoard, ElementId, SharedBoard,
    register_standard_bindings,
};
pub use errors::DashboardError;
pub use telemetry::{
    ReplayTelemetrySource, SimulatedTelemetrySource, TelemetrySnapshot, TelemetrySource, Waypoint,
};
