//! `ferment-types` – shared vocabulary for the fermentation control stack.
//!
//! Every other crate speaks in these types: the HAL reports
//! [`SwitchState`]s, the control loop reads [`BatchControl`] assignments and
//! emits [`ControlEvent`]s, and the middleware bus wraps everything in an
//! [`Event`] envelope.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Identifier of a brewing batch as assigned by the persistence layer.
pub type BatchId = i64;

// ─────────────────────────────────────────────────────────────────────────────
// Switch state
// ─────────────────────────────────────────────────────────────────────────────

/// Binary state of a switch-like actuator.
///
/// "Unknown" is deliberately not a variant: adapters report an unreachable or
/// non-boolean device as `None`, and callers must never read that as `Off`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchState {
    On,
    Off,
}

impl SwitchState {
    pub fn is_on(self) -> bool {
        matches!(self, SwitchState::On)
    }

    pub fn from_bool(on: bool) -> Self {
        if on { SwitchState::On } else { SwitchState::Off }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SwitchState::On => "on",
            SwitchState::Off => "off",
        }
    }
}

impl fmt::Display for SwitchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SwitchState {
    type Err = FermentError;

    /// Accepts exactly `on` / `off` (case-insensitive). Anything else is
    /// rejected so that no network call is ever made for a bogus value.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on" => Ok(SwitchState::On),
            "off" => Ok(SwitchState::Off),
            other => Err(FermentError::InvalidState(other.to_string())),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Device type
// ─────────────────────────────────────────────────────────────────────────────

/// The two actuator roles a batch can have assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Heater,
    Cooler,
}

impl DeviceType {
    /// The device that must never be on at the same time as `self`.
    pub fn opposite(self) -> Self {
        match self {
            DeviceType::Heater => DeviceType::Cooler,
            DeviceType::Cooler => DeviceType::Heater,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceType::Heater => "heater",
            DeviceType::Cooler => "cooler",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = FermentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "heater" => Ok(DeviceType::Heater),
            "cooler" => Ok(DeviceType::Cooler),
            other => Err(FermentError::InvalidOverride(format!(
                "unknown device type '{other}'"
            ))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Batches
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle status of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Planning,
    Brewing,
    Fermenting,
    Conditioning,
    Completed,
    Archived,
}

impl BatchStatus {
    /// Pre-pitch phases: only the cooler may act so wort can be chilled
    /// without any risk of heating it.
    pub fn is_chilling(self) -> bool {
        matches!(self, BatchStatus::Planning | BatchStatus::Brewing)
    }

    /// Statuses for which the control loop drives actuators at all.
    pub fn is_controllable(self) -> bool {
        matches!(
            self,
            BatchStatus::Planning
                | BatchStatus::Brewing
                | BatchStatus::Fermenting
                | BatchStatus::Conditioning
        )
    }
}

/// Actuator assignment of a single batch, read from the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchControl {
    pub id: BatchId,
    pub status: BatchStatus,
    /// Address of the heater, e.g. `hub://switch.ferm_heater`.
    pub heater_entity: Option<String>,
    /// Address of the cooler, e.g. `direct://192.168.1.40/0`.
    pub cooler_entity: Option<String>,
    /// Per-batch target in °C; the global default applies when absent.
    pub target_temp: Option<f64>,
    /// Per-batch hysteresis band in °C; the global default applies when absent.
    pub hysteresis: Option<f64>,
    /// Sensor whose latest reading represents this batch's wort temperature.
    pub device_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl BatchControl {
    pub fn entity(&self, device: DeviceType) -> Option<&str> {
        match device {
            DeviceType::Heater => self.heater_entity.as_deref(),
            DeviceType::Cooler => self.cooler_entity.as_deref(),
        }
    }

    pub fn has_actuators(&self) -> bool {
        self.heater_entity.is_some() || self.cooler_entity.is_some()
    }
}

/// Latest temperature sample for a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub temperature: f64,
    /// Signal strength reported alongside the sample, when the sensor has one.
    pub rssi: Option<i32>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Discovery
// ─────────────────────────────────────────────────────────────────────────────

/// A switchable device reported by an adapter's discovery call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Fully scheme-prefixed address usable with the router.
    pub entity_id: String,
    pub name: String,
    pub device_type: String,
    pub state: Option<SwitchState>,
    pub power_w: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Control events
// ─────────────────────────────────────────────────────────────────────────────

/// What a successful actuator write did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    HeatOn,
    HeatOff,
    CoolOn,
    CoolOff,
}

impl ControlAction {
    pub fn new(device: DeviceType, state: SwitchState) -> Self {
        match (device, state) {
            (DeviceType::Heater, SwitchState::On) => ControlAction::HeatOn,
            (DeviceType::Heater, SwitchState::Off) => ControlAction::HeatOff,
            (DeviceType::Cooler, SwitchState::On) => ControlAction::CoolOn,
            (DeviceType::Cooler, SwitchState::Off) => ControlAction::CoolOff,
        }
    }
}

/// Record of one confirmed actuator write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlEvent {
    pub action: ControlAction,
    /// Wort temperature for batch control, chamber temperature in idle mode.
    pub temperature: f64,
    pub ambient_temp: Option<f64>,
    pub target_temp: f64,
    pub device_id: Option<String>,
    /// `None` for idle-mode (chamber) events.
    pub batch_id: Option<BatchId>,
    pub timestamp: DateTime<Utc>,
}

/// One-shot notifications raised by the control loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// A chilling batch reached its target: the wort can be pitched.
    PitchReady {
        batch_id: BatchId,
        temperature: f64,
        target_temp: f64,
    },
}

/// Envelope for everything broadcast to live listeners.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `"ferment-control::engine"`
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    Control(ControlEvent),
    Notification(Notification),
    /// An actuator could not be read or written this cycle.
    ActuatorFault {
        entity_id: String,
        batch_id: Option<BatchId>,
        details: String,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Error type shared by the HAL, the control loop and the CLI.
///
/// Unreachable devices are *not* errors: adapters report them as `None` /
/// `false`. Everything here indicates operator or collaborator trouble.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FermentError {
    #[error("No adapter configured for scheme '{scheme}'")]
    NoAdapter { scheme: String },

    #[error("Invalid actuator address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Invalid switch state '{0}' (expected 'on' or 'off')")]
    InvalidState(String),

    #[error("Collaborator unavailable: {0}")]
    Source(String),

    #[error("Override conflict on batch {batch_id}: {device} cannot be forced on while the opposite device is forced on")]
    OverrideConflict { batch_id: BatchId, device: DeviceType },

    #[error("Invalid override: {0}")]
    InvalidOverride(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
