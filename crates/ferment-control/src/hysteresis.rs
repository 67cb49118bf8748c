//! Pure hysteresis planner.
//!
//! Given the current temperature, the thresholds and the polled actuator
//! states, [`plan`] returns an ordered chain of writes. The executor stops at
//! the first write that fails or is blocked, so an "off" for the opposite
//! device always precedes and guards the "on" that follows it.

use ferment_types::{DeviceType, SwitchState};

/// Switching thresholds derived from a target and a hysteresis band.
///
/// Devices switch on at the band edge and off exactly at the target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub heat_on: f64,
    pub heat_off: f64,
    pub cool_on: f64,
    pub cool_off: f64,
}

impl Thresholds {
    pub fn new(target: f64, hysteresis: f64) -> Self {
        Self {
            heat_on: target - hysteresis,
            heat_off: target,
            cool_on: target + hysteresis,
            cool_off: target,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    /// At or below `heat_on`.
    Heat,
    /// At or above `cool_on`.
    Cool,
    Deadband,
}

impl Zone {
    pub fn classify(current: f64, thresholds: &Thresholds) -> Self {
        if current <= thresholds.heat_on {
            Zone::Heat
        } else if current >= thresholds.cool_on {
            Zone::Cool
        } else {
            Zone::Deadband
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Write {
    pub device: DeviceType,
    pub state: SwitchState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub zone: Zone,
    pub writes: Vec<Write>,
}

/// Plan the writes for one evaluation.
///
/// `heater`/`cooler` are the polled states; `None` covers both an
/// unconfigured and an unreachable device and is never written to.
pub fn plan(
    current: f64,
    thresholds: &Thresholds,
    heater: Option<SwitchState>,
    cooler: Option<SwitchState>,
) -> Plan {
    let zone = Zone::classify(current, thresholds);
    let mut writes = Vec::new();

    match zone {
        Zone::Heat => {
            ensure(&mut writes, DeviceType::Cooler, cooler, SwitchState::Off);
            ensure(&mut writes, DeviceType::Heater, heater, SwitchState::On);
        }
        Zone::Cool => {
            ensure(&mut writes, DeviceType::Heater, heater, SwitchState::Off);
            ensure(&mut writes, DeviceType::Cooler, cooler, SwitchState::On);
        }
        Zone::Deadband => {
            if heater == Some(SwitchState::On) && current >= thresholds.heat_off {
                writes.push(Write {
                    device: DeviceType::Heater,
                    state: SwitchState::Off,
                });
            } else if cooler == Some(SwitchState::On) && current <= thresholds.cool_off {
                writes.push(Write {
                    device: DeviceType::Cooler,
                    state: SwitchState::Off,
                });
            }
        }
    }

    Plan { zone, writes }
}

fn ensure(
    writes: &mut Vec<Write>,
    device: DeviceType,
    polled: Option<SwitchState>,
    desired: SwitchState,
) {
    if polled.is_some_and(|state| state != desired) {
        writes.push(Write {
            device,
            state: desired,
        });
    }
}
