//! `ferment-control` – the fermentation temperature control loop.
//!
//! # Modules
//!
//! - [`engine`] – [`ControlLoop`] (the cycle and the long-running task),
//!   [`ControlHandle`] and [`CycleReport`].
//! - [`hysteresis`] – the pure threshold planner.
//! - [`overrides`] – time-bounded manual overrides ([`OverrideHandle`]).
//! - [`state`] – per-batch and idle actuator runtime state ([`StateStore`]).
//! - [`settings`] – typed settings and their defaults ([`ControlSettings`]).
//! - [`ports`] – batch, reading and event collaborators; [`CompositeSink`].
//! - [`telemetry`] – `tracing` subscriber and OTLP export.

mod controller;
pub mod engine;
pub mod hysteresis;
mod idle;
pub mod overrides;
pub mod ports;
pub mod settings;
pub mod state;
pub mod telemetry;

#[cfg(test)]
mod testing;

pub use engine::{Collaborators, ControlHandle, ControlLoop, CycleReport};
pub use hysteresis::{Thresholds, Zone};
pub use overrides::{ActiveOverride, ManualOverride, OverrideHandle};
pub use ports::{BatchSource, CompositeSink, EventSink, ReadingSource};
pub use settings::{ControlSettings, SettingKey, SettingValue, SettingsSource, StaticSettings};
pub use state::{ActuatorRuntime, ControlKey, ControlState, StateStore};
