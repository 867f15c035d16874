// Error types for avdash

use snafu::Snafu;
use std::io;

#[derive(Debug, Snafu)]
pub enum DashboardError {
    // Binding registry errors
    #[snafu(display("A display binding named '{name}' is already registered"))]
    DuplicateBinding { name: String },
    #[snafu(display("No display binding named '{name}' is registered"))]
    UnknownBinding { name: String },

    // Scheduler lifecycle errors
    #[snafu(display("Dispatcher is already running, stop it before starting again"))]
    AlreadyRunning,
    #[snafu(display("Tick interval must be greater than zero"))]
    InvalidTickInterval,
    #[snafu(display("Could not spawn the telemetry scheduler thread"))]
    SchedulerSpawn { source: io::Error },

    // Errors contained within a single tick
    #[snafu(display("Telemetry source unavailable: {description}"))]
    SourceUnavailable { description: String },
    #[snafu(display("Display binding '{binding}' failed to render: {description}"))]
    BindingRender {
        binding: String,
        description: String,
    },

    // Config management errors
    #[snafu(display("Could not find application data directory to save config file"))]
    NoConfigDir,
    #[snafu(display("Error reading or writing config file"))]
    ConfigIOError { source: io::Error },
    #[snafu(display("Error serializing config file"))]
    ConfigSerializeError { source: serde_json::Error },
    #[snafu(display("Invalid configuration: {field} - {reason}"))]
    InvalidConfig { field: String, reason: String },

    // Replay and output errors
    #[snafu(display("Invalid telemetry file: {path}"))]
    InvalidTelemetryFile { path: String },
    #[snafu(display("Error loading telemetry file"))]
    TelemetryLoaderError { source: io::Error },
    #[snafu(display("Error writing telemetry output"))]
    OutputError { source: io::Error },

    // Shell errors
    #[snafu(display("Could not install the Ctrl-C handler"))]
    SignalHandlerError { source: ctrlc::Error },
}
