//! Runtime state owned by the control loop.
//!
//! One [`ControlState`] per [`ControlKey`] (each eligible batch plus the
//! single idle controller), and the set of batches that already raised a
//! pitch-ready notification. Only the loop task mutates a [`StateStore`].

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use ferment_types::{BatchId, DeviceType, SwitchState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlKey {
    Batch(BatchId),
    Idle,
}

/// What the loop knows about one actuator.
#[derive(Debug, Clone, PartialEq)]
pub struct ActuatorRuntime {
    pub entity_id: String,
    /// State polled this cycle, updated on every confirmed write. `None` when
    /// the device did not answer.
    pub state: Option<SwitchState>,
    /// Time of the last confirmed write by the loop.
    pub last_change: Option<DateTime<Utc>>,
}

impl ActuatorRuntime {
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            state: None,
            last_change: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlState {
    heater: Option<ActuatorRuntime>,
    cooler: Option<ActuatorRuntime>,
}

impl ControlState {
    pub fn get(&self, device: DeviceType) -> Option<&ActuatorRuntime> {
        match device {
            DeviceType::Heater => self.heater.as_ref(),
            DeviceType::Cooler => self.cooler.as_ref(),
        }
    }

    pub fn get_mut(&mut self, device: DeviceType) -> Option<&mut ActuatorRuntime> {
        self.slot(device).as_mut()
    }

    pub fn state_of(&self, device: DeviceType) -> Option<SwitchState> {
        self.get(device).and_then(|rt| rt.state)
    }

    /// Point `device` at `entity`. Switching to a different entity starts
    /// from a blank history; `None` forgets the device.
    pub fn bind(&mut self, device: DeviceType, entity: Option<&str>) {
        let slot = self.slot(device);
        match entity {
            None => *slot = None,
            Some(entity) => {
                if slot.as_ref().is_none_or(|rt| rt.entity_id != entity) {
                    *slot = Some(ActuatorRuntime::new(entity));
                }
            }
        }
    }

    /// Both devices recorded as on.
    pub fn both_on(&self) -> bool {
        self.state_of(DeviceType::Heater) == Some(SwitchState::On)
            && self.state_of(DeviceType::Cooler) == Some(SwitchState::On)
    }

    fn slot(&mut self, device: DeviceType) -> &mut Option<ActuatorRuntime> {
        match device {
            DeviceType::Heater => &mut self.heater,
            DeviceType::Cooler => &mut self.cooler,
        }
    }
}

#[derive(Debug, Default)]
pub struct StateStore {
    runtime: HashMap<ControlKey, ControlState>,
    pitch_notified: HashSet<BatchId>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: ControlKey) -> Option<&ControlState> {
        self.runtime.get(&key)
    }

    /// Remove the entry for `key` so an evaluation can own it; hand it back
    /// with [`StateStore::put`].
    pub fn take(&mut self, key: ControlKey) -> ControlState {
        self.runtime.remove(&key).unwrap_or_default()
    }

    pub fn put(&mut self, key: ControlKey, state: ControlState) {
        self.runtime.insert(key, state);
    }

    /// Drop batch entries not in `eligible`. The idle entry is untouched.
    pub fn retain_batches(&mut self, eligible: &HashSet<BatchId>) {
        self.runtime.retain(|key, _| match key {
            ControlKey::Batch(id) => eligible.contains(id),
            ControlKey::Idle => true,
        });
    }

    pub fn clear_idle(&mut self) {
        self.runtime.remove(&ControlKey::Idle);
    }

    pub fn pitch_notified(&self, batch_id: BatchId) -> bool {
        self.pitch_notified.contains(&batch_id)
    }

    pub fn mark_pitch_notified(&mut self, batch_id: BatchId) {
        self.pitch_notified.insert(batch_id);
    }

    /// Forget the pitch-ready flag of every batch no longer chilling.
    pub fn retain_pitch_flags(&mut self, chilling: &HashSet<BatchId>) {
        self.pitch_notified.retain(|id| chilling.contains(id));
    }

    pub fn len(&self) -> usize {
        self.runtime.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runtime.is_empty()
    }
}
