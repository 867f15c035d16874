use std::{
    io,
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError, mpsc},
    time::Duration,
};

use avdash::{
    AppConfig, DashboardError, Dispatcher, DisplayBoard, OutputFormat, ReplayTelemetrySource,
    SharedBoard, SimulatedTelemetrySource, TelemetrySource, UnavailablePolicy,
    register_standard_bindings,
};
use clap::{Parser, Subcommand};
use log::info;
use serde_jsonlines::JsonLinesWriter;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

/// Settings that override the saved config file for this run.
#[derive(clap::Args, Debug)]
struct ConfigOverrides {
    /// Milliseconds between dashboard refreshes
    #[arg(short, long)]
    interval_ms: Option<u64>,

    /// Seed for the simulated telemetry source
    #[arg(short, long)]
    seed: Option<u64>,

    #[arg(short, long, value_enum)]
    format: Option<OutputFormat>,

    /// Re-deliver the last good snapshot when the source is unavailable
    #[arg(long)]
    replay_last_good: bool,
}

impl ConfigOverrides {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(interval_ms) = self.interval_ms {
            config.tick_interval_ms = interval_ms;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        if let Some(format) = self.format {
            config.output_format = format;
        }
        if self.replay_last_good {
            config.unavailable_policy = UnavailablePolicy::ReplayLastGood;
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Refresh the dashboard until Ctrl-C
    Live {
        #[command(flatten)]
        overrides: ConfigOverrides,

        /// Replay snapshots from a JSON Lines file instead of simulating them
        #[arg(short, long)]
        replay: Option<PathBuf>,

        /// Restart the replay from the top once it runs out
        #[arg(long = "loop", requires = "replay")]
        loop_replay: bool,

        /// Stop on its own after this many seconds
        #[arg(short, long)]
        duration_s: Option<u64>,
    },
    /// Print the effective configuration
    Config {
        #[command(flatten)]
        overrides: ConfigOverrides,

        /// Write the effective configuration to the config file
        #[arg(long)]
        save: bool,
    },
}

fn load_config(overrides: &ConfigOverrides) -> Result<AppConfig, DashboardError> {
    let mut config = AppConfig::from_local_file()?.unwrap_or_default();
    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}

fn live(
    overrides: &ConfigOverrides,
    replay: Option<&PathBuf>,
    loop_replay: bool,
    duration_s: Option<u64>,
) -> Result<(), DashboardError> {
    let config = load_config(overrides)?;

    let source: Box<dyn TelemetrySource + Send> = match replay {
        Some(path) => Box::new(ReplayTelemetrySource::from_file(path)?.looping(loop_replay)),
        None => match config.seed {
            Some(seed) => Box::new(SimulatedTelemetrySource::with_seed(seed)),
            None => Box::new(SimulatedTelemetrySource::default()),
        },
    };

    let mut dispatcher = Dispatcher::with_policy(source, config.unavailable_policy);
    let board: SharedBoard = Arc::new(Mutex::new(DisplayBoard::new(
        &config.model_name,
        &config.compute_unit,
    )));
    register_standard_bindings(&dispatcher, &board)?;

    // registered after the element bindings so it sees the board once they are done
    match config.output_format {
        OutputFormat::Text => {
            dispatcher.register_binding("console", move |_| {
                let view = board.lock().unwrap_or_else(PoisonError::into_inner).view();
                println!("{}", view);
                Ok(())
            })?;
        }
        OutputFormat::Json => {
            let mut writer = JsonLinesWriter::new(io::stdout());
            dispatcher.register_binding("json-lines", move |snapshot| {
                writer
                    .write(snapshot)
                    .map_err(|e| DashboardError::OutputError { source: e })?;
                writer
                    .flush()
                    .map_err(|e| DashboardError::OutputError { source: e })
            })?;
        }
    }

    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    })
    .map_err(|e| DashboardError::SignalHandlerError { source: e })?;

    dispatcher.start(config.tick_interval())?;
    match duration_s {
        Some(seconds) => {
            let _ = shutdown_rx.recv_timeout(Duration::from_secs(seconds));
        }
        None => {
            let _ = shutdown_rx.recv();
        }
    }
    info!("Exiting...");
    dispatcher.stop();
    Ok(())
}

fn config(overrides: &ConfigOverrides, save: bool) -> Result<(), DashboardError> {
    let config = load_config(overrides)?;
    let json = serde_json::to_string_pretty(&config)
        .map_err(|e| DashboardError::ConfigSerializeError { source: e })?;
    println!("{}", json);
    if save {
        let path = config.save()?;
        info!("Saved config to {:?}", path);
    }
    Ok(())
}

fn main() {
    #[cfg(debug_assertions)]
    colog::init();

    let cli = Args::parse();
    let result = match &cli.command {
        Commands::Live {
            overrides,
            replay,
            loop_replay,
            duration_s,
        } => live(overrides, replay.as_ref(), *loop_replay, *duration_s),
        Commands::Config { overrides, save } => config(overrides, *save),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", snafu::Report::from_error(e));
        std::process::exit(1);
    }
}
