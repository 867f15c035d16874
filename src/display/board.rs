use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use log::{debug, warn};
use serde::Serialize;

use super::{ElementId, ElementValue, Gauge};

pub(crate) const DEFAULT_MODEL_NAME: &str = "VisionPilotNet-XL";
pub(crate) const DEFAULT_COMPUTE_UNIT: &str = "NVIDIA Jetson AGX Orin";

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ElementState {
    pub value: ElementValue,
    /// Tick the value was rendered from
    pub tick: u64,
    /// Set when the element's binding did not render on `BoardView::tick`
    pub stale: bool,
}

/// What a viewer sees: every element, all rendered from `tick` unless flagged stale.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BoardView {
    pub tick: u64,
    pub model_name: String,
    pub compute_unit: String,
    pub elements: BTreeMap<ElementId, ElementState>,
}

impl BoardView {
    pub fn text(&self, element: ElementId) -> Option<&str> {
        match &self.elements.get(&element)?.value {
            ElementValue::Text(text) => Some(text),
            ElementValue::Gauge(_) => None,
        }
    }

    pub fn gauge(&self, element: ElementId) -> Option<&Gauge> {
        match &self.elements.get(&element)?.value {
            ElementValue::Gauge(gauge) => Some(gauge),
            ElementValue::Text(_) => None,
        }
    }

    pub fn stale_elements(&self) -> Vec<ElementId> {
        self.elements
            .iter()
            .filter(|(_, state)| state.stale)
            .map(|(id, _)| *id)
            .collect()
    }

    /// True when every element was rendered from the same tick.
    pub fn is_consistent(&self) -> bool {
        self.elements.values().all(|state| state.tick == self.tick)
    }

    fn line(&self, f: &mut fmt::Formatter<'_>, element: ElementId) -> fmt::Result {
        let Some(state) = self.elements.get(&element) else {
            return Ok(());
        };
        match &state.value {
            ElementValue::Text(text) => write!(f, "  {}", text)?,
            ElementValue::Gauge(gauge) => write!(
                f,
                "  {}: {:.2} [{}..{}] {:>3.0}%",
                gauge.label,
                gauge.value,
                gauge.min,
                gauge.max,
                gauge.fraction() * 100.
            )?,
        }
        if state.stale {
            write!(f, " (stale, tick {})", state.tick)?;
        }
        writeln!(f)
    }
}

impl fmt::Display for BoardView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Autonomous Vehicle Dashboard (tick {})", self.tick)?;
        writeln!(f, "[System Status]")?;
        writeln!(f, "  Model Name: {}", self.model_name)?;
        writeln!(f, "  GPU: {}", self.compute_unit)?;
        self.line(f, ElementId::ServerComm)?;
        self.line(f, ElementId::ServerResp)?;
        self.line(f, ElementId::Waypoints)?;
        writeln!(f, "[Sensor Output]")?;
        self.line(f, ElementId::Gps)?;
        self.line(f, ElementId::Velocity)?;
        writeln!(f, "[Car Energy Consumption Data]")?;
        self.line(f, ElementId::Energy)?;
        writeln!(f, "[Vehicle Control]")?;
        self.line(f, ElementId::Steering)?;
        self.line(f, ElementId::Throttle)
    }
}

struct Staging {
    tick: u64,
    elements: BTreeMap<ElementId, ElementState>,
    written: BTreeSet<ElementId>,
}

/// In-memory display state written to by the element bindings.
///
/// Writes are staged per tick. The staged frame replaces the published view as soon
/// as every element has been written for that tick, or when the tick is committed
/// at the end of its fan-out. Elements left unwritten (their binding failed) are
/// flagged stale and keep their previous value. A frame that was never committed
/// is published the same way when the next tick's first write arrives. Readers
/// only ever see the published view.
pub struct DisplayBoard {
    published: BoardView,
    staging: Option<Staging>,
}

impl Default for DisplayBoard {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL_NAME, DEFAULT_COMPUTE_UNIT)
    }
}

impl DisplayBoard {
    pub fn new(model_name: &str, compute_unit: &str) -> Self {
        let elements = ElementId::ALL
            .iter()
            .map(|id| {
                (
                    *id,
                    ElementState {
                        value: id.initial_value(),
                        tick: 0,
                        stale: false,
                    },
                )
            })
            .collect();
        Self {
            published: BoardView {
                tick: 0,
                model_name: model_name.to_string(),
                compute_unit: compute_unit.to_string(),
                elements,
            },
            staging: None,
        }
    }

    /// Latest consistent view.
    pub fn view(&self) -> BoardView {
        self.published.clone()
    }

    pub fn write(&mut self, element: ElementId, tick: u64, value: ElementValue) {
        let staged_tick = self.staging.as_ref().map(|s| s.tick);
        if tick <= self.published.tick || staged_tick.is_some_and(|t| tick < t) {
            debug!("Ignoring late write for {:?} from tick {}", element, tick);
            return;
        }
        if staged_tick != Some(tick) {
            self.publish_partial();
            self.staging = Some(Staging {
                tick,
                elements: self.published.elements.clone(),
                written: BTreeSet::new(),
            });
        }

        let Some(staging) = self.staging.as_mut() else {
            return;
        };
        staging.elements.insert(
            element,
            ElementState {
                value,
                tick,
                stale: false,
            },
        );
        staging.written.insert(element);
        if staging.written.len() == ElementId::ALL.len() {
            self.publish(false);
        }
    }

    /// Close out `tick`: publish whatever was staged for it, flagging the elements
    /// that were not written as stale. Commits for an already published or an
    /// older tick are ignored.
    pub fn commit(&mut self, tick: u64) {
        let staged_tick = self.staging.as_ref().map(|s| s.tick);
        match staged_tick {
            Some(staged) if staged == tick => self.publish_partial(),
            Some(staged) if staged > tick => {}
            _ if tick <= self.published.tick => {}
            _ => {
                // nothing was written for this tick at all
                self.publish_partial();
                self.staging = Some(Staging {
                    tick,
                    elements: self.published.elements.clone(),
                    written: BTreeSet::new(),
                });
                self.publish_partial();
            }
        }
    }

    fn publish_partial(&mut self) {
        if self.staging.is_some() {
            self.publish(true);
        }
    }

    fn publish(&mut self, partial: bool) {
        let Some(staging) = self.staging.take() else {
            return;
        };
        let mut elements = staging.elements;
        if partial {
            for (id, state) in elements.iter_mut() {
                if !staging.written.contains(id) {
                    state.stale = true;
                }
            }
            warn!(
                "Tick {} left {} display elements unrendered",
                staging.tick,
                ElementId::ALL.len() - staging.written.len()
            );
        }
        self.published.tick = staging.tick;
        self.published.elements = elements;
    }
}
