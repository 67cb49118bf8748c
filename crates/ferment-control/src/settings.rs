//! Typed control settings resolved from a key/value configuration source.
//!
//! The control loop re-reads its settings at the start of every cycle so an
//! operator can retune targets or disable control without restarting the
//! task. [`ControlSettings::load`] resolves every [`SettingKey`] against a
//! [`SettingsSource`] and falls back to the defaults below.
//!
//! | Key | Default |
//! |---|---|
//! | `temp_control_enabled` | `true` |
//! | `temp_control_target` | 20.0 °C |
//! | `temp_control_hysteresis` | 0.5 °C |
//! | `temp_control_interval` | 60 s |
//! | `idle_control_enabled` | `false` |
//! | `idle_control_target` | global target |
//! | `idle_control_hysteresis` | 1.0 °C |
//! | `temp_control_min_cycle` | 300 s (floor) |

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use ferment_types::{BatchControl, FermentError};
use tracing::warn;

/// Minimum time between automatic writes to the same actuator.
pub const MIN_CYCLE_FLOOR: Duration = Duration::from_secs(5 * 60);

const DEFAULT_TARGET: f64 = 20.0;
const DEFAULT_HYSTERESIS: f64 = 0.5;
const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_IDLE_HYSTERESIS: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKey {
    ControlEnabled,
    Target,
    Hysteresis,
    Interval,
    IdleEnabled,
    IdleTarget,
    IdleHysteresis,
    MinCycle,
}

impl SettingKey {
    pub const ALL: [SettingKey; 8] = [
        SettingKey::ControlEnabled,
        SettingKey::Target,
        SettingKey::Hysteresis,
        SettingKey::Interval,
        SettingKey::IdleEnabled,
        SettingKey::IdleTarget,
        SettingKey::IdleHysteresis,
        SettingKey::MinCycle,
    ];

    /// Storage name of the key.
    pub fn name(self) -> &'static str {
        match self {
            SettingKey::ControlEnabled => "temp_control_enabled",
            SettingKey::Target => "temp_control_target",
            SettingKey::Hysteresis => "temp_control_hysteresis",
            SettingKey::Interval => "temp_control_interval",
            SettingKey::IdleEnabled => "idle_control_enabled",
            SettingKey::IdleTarget => "idle_control_target",
            SettingKey::IdleHysteresis => "idle_control_hysteresis",
            SettingKey::MinCycle => "temp_control_min_cycle",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SettingValue {
    Bool(bool),
    Float(f64),
    Seconds(u64),
}

/// Read side of the configuration store.
///
/// `Ok(None)` means the key is unset. An `Err` means the store itself is
/// unavailable and aborts the cycle.
#[async_trait]
pub trait SettingsSource: Send + Sync {
    async fn get(&self, key: SettingKey) -> Result<Option<SettingValue>, FermentError>;
}

/// In-memory [`SettingsSource`], used by embedders with static configuration
/// and by tests.
#[derive(Debug, Clone, Default)]
pub struct StaticSettings {
    values: HashMap<SettingKey, SettingValue>,
}

impl StaticSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: SettingKey, value: SettingValue) -> Self {
        self.values.insert(key, value);
        self
    }

    pub fn set(&mut self, key: SettingKey, value: SettingValue) {
        self.values.insert(key, value);
    }
}

#[async_trait]
impl SettingsSource for StaticSettings {
    async fn get(&self, key: SettingKey) -> Result<Option<SettingValue>, FermentError> {
        Ok(self.values.get(&key).copied())
    }
}

/// Settings snapshot for one control cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlSettings {
    pub enabled: bool,
    pub target: f64,
    pub hysteresis: f64,
    pub interval: Duration,
    pub idle_enabled: bool,
    pub idle_target: f64,
    pub idle_hysteresis: f64,
    pub min_cycle: Duration,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            target: DEFAULT_TARGET,
            hysteresis: DEFAULT_HYSTERESIS,
            interval: DEFAULT_INTERVAL,
            idle_enabled: false,
            idle_target: DEFAULT_TARGET,
            idle_hysteresis: DEFAULT_IDLE_HYSTERESIS,
            min_cycle: MIN_CYCLE_FLOOR,
        }
    }
}

impl ControlSettings {
    /// Resolve every key against `source`.
    ///
    /// Values of the wrong type or out of range are logged and replaced by
    /// the default. The minimum cycle time can only be raised above
    /// [`MIN_CYCLE_FLOOR`].
    pub async fn load(source: &dyn SettingsSource) -> Result<Self, FermentError> {
        let defaults = Self::default();

        let enabled = bool_or(source, SettingKey::ControlEnabled, defaults.enabled).await?;
        let target = float_or(source, SettingKey::Target, defaults.target).await?;
        let hysteresis = non_negative(
            SettingKey::Hysteresis,
            float_or(source, SettingKey::Hysteresis, defaults.hysteresis).await?,
            defaults.hysteresis,
        );
        let interval = match secs_or(source, SettingKey::Interval, defaults.interval).await? {
            d if d.is_zero() => {
                warn!(key = SettingKey::Interval.name(), "zero interval ignored");
                defaults.interval
            }
            d => d,
        };
        let idle_enabled = bool_or(source, SettingKey::IdleEnabled, defaults.idle_enabled).await?;
        let idle_target = float_or(source, SettingKey::IdleTarget, target).await?;
        let idle_hysteresis = non_negative(
            SettingKey::IdleHysteresis,
            float_or(source, SettingKey::IdleHysteresis, defaults.idle_hysteresis).await?,
            defaults.idle_hysteresis,
        );
        let min_cycle = secs_or(source, SettingKey::MinCycle, MIN_CYCLE_FLOOR)
            .await?
            .max(MIN_CYCLE_FLOOR);

        Ok(Self {
            enabled,
            target,
            hysteresis,
            interval,
            idle_enabled,
            idle_target,
            idle_hysteresis,
            min_cycle,
        })
    }

    /// Effective target for `batch`: its own, else the global default.
    pub fn target_for(&self, batch: &BatchControl) -> f64 {
        batch.target_temp.unwrap_or(self.target)
    }

    pub fn hysteresis_for(&self, batch: &BatchControl) -> f64 {
        match batch.hysteresis {
            Some(h) if h >= 0.0 => h,
            _ => self.hysteresis,
        }
    }
}

async fn bool_or(
    source: &dyn SettingsSource,
    key: SettingKey,
    default: bool,
) -> Result<bool, FermentError> {
    Ok(match source.get(key).await? {
        Some(SettingValue::Bool(v)) => v,
        None => default,
        Some(other) => mistyped(key, other, default),
    })
}

async fn float_or(
    source: &dyn SettingsSource,
    key: SettingKey,
    default: f64,
) -> Result<f64, FermentError> {
    Ok(match source.get(key).await? {
        Some(SettingValue::Float(v)) if v.is_finite() => v,
        None => default,
        Some(other) => mistyped(key, other, default),
    })
}

async fn secs_or(
    source: &dyn SettingsSource,
    key: SettingKey,
    default: Duration,
) -> Result<Duration, FermentError> {
    Ok(match source.get(key).await? {
        Some(SettingValue::Seconds(v)) => Duration::from_secs(v),
        None => default,
        Some(other) => mistyped(key, other, default),
    })
}

fn mistyped<T>(key: SettingKey, value: SettingValue, default: T) -> T {
    warn!(key = key.name(), ?value, "unusable setting value; using default");
    default
}

fn non_negative(key: SettingKey, value: f64, default: f64) -> f64 {
    if value < 0.0 {
        warn!(key = key.name(), value, "negative hysteresis ignored");
        default
    } else {
        value
    }
}
