use std::{
    any::Any,
    panic::{AssertUnwindSafe, catch_unwind},
};

use log::error;

use crate::{DashboardError, telemetry::TelemetrySnapshot};

/// Render step of a display binding. Runs on the scheduler thread.
pub type RenderFn = Box<dyn FnMut(&TelemetrySnapshot) -> Result<(), DashboardError> + Send>;

struct Binding {
    name: String,
    render: RenderFn,
}

/// Result of delivering one snapshot to every binding.
#[derive(Debug, Default)]
pub struct FanOutReport {
    pub delivered: usize,
    pub failures: Vec<DashboardError>,
}

/// Ordered list of uniquely named display bindings.
#[derive(Default)]
pub struct BindingRegistry {
    bindings: Vec<Binding>,
}

impl BindingRegistry {
    pub fn register(&mut self, name: &str, render: RenderFn) -> Result<(), DashboardError> {
        if self.contains(name) {
            return Err(DashboardError::DuplicateBinding {
                name: name.to_string(),
            });
        }
        self.bindings.push(Binding {
            name: name.to_string(),
            render,
        });
        Ok(())
    }

    pub fn unregister(&mut self, name: &str) -> Result<(), DashboardError> {
        let position = self
            .bindings
            .iter()
            .position(|b| b.name == name)
            .ok_or_else(|| DashboardError::UnknownBinding {
                name: name.to_string(),
            })?;
        self.bindings.remove(position);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.iter().any(|b| b.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.bindings.iter().map(|b| b.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Deliver `snapshot` to every binding in registration order.
    ///
    /// A binding that returns an error or panics is logged and skipped; the
    /// remaining bindings still receive the same snapshot.
    pub fn fan_out(&mut self, snapshot: &TelemetrySnapshot) -> FanOutReport {
        let mut report = FanOutReport::default();
        for binding in self.bindings.iter_mut() {
            let outcome = catch_unwind(AssertUnwindSafe(|| (binding.render)(snapshot)));
            let failure = match outcome {
                Ok(Ok(())) => {
                    report.delivered += 1;
                    continue;
                }
                Ok(Err(DashboardError::BindingRender {
                    binding: _,
                    description,
                })) => description,
                Ok(Err(e)) => e.to_string(),
                Err(panic) => format!("render panicked: {}", panic_message(panic.as_ref())),
            };
            error!(
                "Display binding '{}' failed on tick {}: {}",
                binding.name, snapshot.tick, failure
            );
            report.failures.push(DashboardError::BindingRender {
                binding: binding.name.clone(),
                description: failure,
            });
        }
        report
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
