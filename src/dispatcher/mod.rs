pub mod registry;

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
        mpsc::{self, RecvTimeoutError, Sender},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    DashboardError,
    telemetry::{TelemetrySnapshot, TelemetrySource},
};

pub use registry::{BindingRegistry, FanOutReport, RenderFn};
use registry::panic_message;

pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1000;
const SCHEDULER_THREAD_NAME: &str = "telemetry-ticker";

/// What a tick does when the source cannot produce a snapshot.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum UnavailablePolicy {
    /// Render nothing for the tick; the display keeps the previous values
    #[default]
    Skip,
    /// Deliver the last good snapshot again, stamped with the new tick index
    ReplayLastGood,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatcherState {
    Stopped,
    Running,
}

/// What happened during a single tick.
#[derive(Debug)]
pub enum TickOutcome {
    Delivered {
        tick: u64,
        report: FanOutReport,
        replayed: bool,
    },
    Skipped {
        tick: u64,
        cause: DashboardError,
    },
}

impl TickOutcome {
    pub fn tick(&self) -> u64 {
        match self {
            TickOutcome::Delivered { tick, .. } | TickOutcome::Skipped { tick, .. } => *tick,
        }
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // poisoned locks are recovered, the guarded state stays valid between ticks
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Shared {
    source: Mutex<Box<dyn TelemetrySource + Send>>,
    bindings: Mutex<BindingRegistry>,
    last_good: Mutex<Option<TelemetrySnapshot>>,
    ticks: AtomicU64,
    policy: UnavailablePolicy,
}

impl Shared {
    fn next_snapshot(&self) -> Result<TelemetrySnapshot, DashboardError> {
        let mut source = lock(&self.source);
        match catch_unwind(AssertUnwindSafe(|| source.next_snapshot())) {
            Ok(result) => result,
            Err(panic) => Err(DashboardError::SourceUnavailable {
                description: format!("source panicked: {}", panic_message(panic.as_ref())),
            }),
        }
    }

    /// One tick: a single source read, then the full fan-out. The registry lock
    /// is held throughout, which serializes ticks and keeps them from overlapping.
    fn tick(&self) -> TickOutcome {
        let mut bindings = lock(&self.bindings);
        let tick = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;

        let (snapshot, replayed) = match self.next_snapshot() {
            Ok(snapshot) => {
                let snapshot = snapshot.stamped(tick);
                if self.policy == UnavailablePolicy::ReplayLastGood {
                    *lock(&self.last_good) = Some(snapshot.clone());
                }
                (snapshot, false)
            }
            Err(cause) => {
                let last_good = match self.policy {
                    UnavailablePolicy::Skip => None,
                    UnavailablePolicy::ReplayLastGood => lock(&self.last_good).clone(),
                };
                match last_good {
                    Some(snapshot) => {
                        warn!(
                            "Tick {}: {}, replaying snapshot from tick {}",
                            tick, cause, snapshot.tick
                        );
                        (snapshot.stamped(tick), true)
                    }
                    None => {
                        warn!("Tick {}: {}, skipping render", tick, cause);
                        return TickOutcome::Skipped { tick, cause };
                    }
                }
            }
        };

        let report = bindings.fan_out(&snapshot);
        debug!(
            "Tick {}: delivered to {} bindings, {} failed",
            tick,
            report.delivered,
            report.failures.len()
        );
        TickOutcome::Delivered {
            tick,
            report,
            replayed,
        }
    }
}

struct Ticker {
    stop_sender: Sender<()>,
    handle: JoinHandle<()>,
}

fn run_ticks(
    shared: Arc<Shared>,
    interval: Duration,
    mut next_tick: Instant,
    stop_receiver: mpsc::Receiver<()>,
) {
    loop {
        let wait = next_tick.saturating_duration_since(Instant::now());
        match stop_receiver.recv_timeout(wait) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }

        shared.tick();

        let Some(following) = next_tick.checked_add(interval) else {
            warn!("Tick deadline no longer representable, scheduler exiting");
            break;
        };
        next_tick = following;
        let now = Instant::now();
        if next_tick < now {
            // fan-out overran the interval, start the next tick right away
            // instead of bursting through the missed ones
            debug!("Tick overran its interval by {:?}", now - next_tick);
            next_tick = now;
        }
    }
}

/// `Dispatcher` drives the telemetry refresh pipeline.
///
/// It owns a telemetry source, an ordered registry of display bindings and, while
/// running, one scheduler thread that ticks at a fixed interval. Every tick reads
/// exactly one snapshot and hands that same snapshot to each binding in
/// registration order before the next tick may begin.
///
/// # Lifecycle
///
/// `Stopped -> Running` on [`Dispatcher::start`], `Running -> Stopped` on
/// [`Dispatcher::stop`]. Starting twice is an error; stopping twice is a no-op.
/// Dropping a running dispatcher stops it.
pub struct Dispatcher {
    shared: Arc<Shared>,
    ticker: Option<Ticker>,
}

impl Dispatcher {
    pub fn new(source: impl TelemetrySource + Send + 'static) -> Self {
        Self::with_policy(source, UnavailablePolicy::default())
    }

    pub fn with_policy(
        source: impl TelemetrySource + Send + 'static,
        policy: UnavailablePolicy,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                source: Mutex::new(Box::new(source)),
                bindings: Mutex::new(BindingRegistry::default()),
                last_good: Mutex::new(None),
                ticks: AtomicU64::new(0),
                policy,
            }),
            ticker: None,
        }
    }

    /// Add a named binding. It receives every snapshot from the next fan-out on.
    ///
    /// Registration waits for an in-flight fan-out, so it must not be called from
    /// inside a binding.
    pub fn register_binding<F>(&self, name: &str, render: F) -> Result<(), DashboardError>
    where
        F: FnMut(&TelemetrySnapshot) -> Result<(), DashboardError> + Send + 'static,
    {
        lock(&self.shared.bindings).register(name, Box::new(render))
    }

    pub fn unregister_binding(&self, name: &str) -> Result<(), DashboardError> {
        lock(&self.shared.bindings).unregister(name)
    }

    pub fn binding_names(&self) -> Vec<String> {
        lock(&self.shared.bindings).names()
    }

    /// Start ticking every `interval`. The first tick fires one interval from now.
    ///
    /// # Errors
    ///
    /// `AlreadyRunning` if the scheduler is running, `InvalidTickInterval` for a
    /// zero interval or one too large to schedule, `SchedulerSpawn` if the thread
    /// could not be created.
    pub fn start(&mut self, interval: Duration) -> Result<(), DashboardError> {
        if self.ticker.is_some() {
            return Err(DashboardError::AlreadyRunning);
        }
        if interval.is_zero() {
            return Err(DashboardError::InvalidTickInterval);
        }
        let first_tick = Instant::now()
            .checked_add(interval)
            .ok_or(DashboardError::InvalidTickInterval)?;

        let (stop_sender, stop_receiver) = mpsc::channel();
        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name(SCHEDULER_THREAD_NAME.to_string())
            .spawn(move || run_ticks(shared, interval, first_tick, stop_receiver))
            .map_err(|e| DashboardError::SchedulerSpawn { source: e })?;

        info!("Telemetry dispatcher started, ticking every {:?}", interval);
        self.ticker = Some(Ticker {
            stop_sender,
            handle,
        });
        Ok(())
    }

    /// Stop ticking. A tick already in flight finishes its fan-out first.
    pub fn stop(&mut self) {
        let Some(ticker) = self.ticker.take() else {
            return;
        };
        // the receiver only disappears if the thread already exited
        let _ = ticker.stop_sender.send(());
        if ticker.handle.join().is_err() {
            warn!("Telemetry scheduler thread exited with a panic");
        }
        info!("Telemetry dispatcher stopped after {} ticks", self.ticks());
    }

    /// Run one tick on the calling thread, serialized with scheduled ticks.
    /// Not reentrant: calling it from a binding deadlocks.
    pub fn tick_now(&self) -> TickOutcome {
        self.shared.tick()
    }

    pub fn state(&self) -> DispatcherState {
        if self.ticker.is_some() {
            DispatcherState::Running
        } else {
            DispatcherState::Stopped
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == DispatcherState::Running
    }

    /// Number of ticks run so far, scheduled or manual.
    pub fn ticks(&self) -> u64 {
        self.shared.ticks.load(Ordering::SeqCst)
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
