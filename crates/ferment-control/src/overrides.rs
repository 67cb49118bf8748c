//! Manual actuator overrides.
//!
//! An override forces one device of one batch to a fixed state, optionally
//! until a deadline. It bypasses hysteresis and the minimum cycle time.
//! Expired overrides are pruned lazily at the start of each cycle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use ferment_types::{BatchId, DeviceType, FermentError, SwitchState};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ManualOverride {
    pub state: SwitchState,
    /// `None` holds until cancelled.
    pub until: Option<DateTime<Utc>>,
}

impl ManualOverride {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.until.is_none_or(|until| now < until)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveOverride {
    pub batch_id: BatchId,
    pub device: DeviceType,
    #[serde(flatten)]
    pub manual: ManualOverride,
}

type Table = HashMap<(BatchId, DeviceType), ManualOverride>;

/// Shared override table. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct OverrideHandle {
    inner: Arc<Mutex<Table>>,
}

impl OverrideHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or cancel (`state = None`) the override for `(batch_id, device)`.
    ///
    /// Returns the stored override, or `None` after a cancel. Forcing a
    /// device on while the opposite device holds an active "on" override is
    /// rejected.
    pub fn set(
        &self,
        batch_id: BatchId,
        device: DeviceType,
        state: Option<SwitchState>,
        duration_minutes: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<Option<ManualOverride>, FermentError> {
        let mut table = self.lock();

        let Some(state) = state else {
            if table.remove(&(batch_id, device)).is_some() {
                info!(batch_id, %device, "override cancelled");
            }
            return Ok(None);
        };

        if duration_minutes == Some(0) {
            return Err(FermentError::InvalidOverride(
                "duration must be at least one minute".into(),
            ));
        }

        if state.is_on() {
            let opposite = table.get(&(batch_id, device.opposite()));
            if opposite.is_some_and(|o| o.state.is_on() && o.is_active(now)) {
                return Err(FermentError::OverrideConflict { batch_id, device });
            }
        }

        let manual = ManualOverride {
            state,
            until: duration_minutes.map(|m| now + Duration::minutes(i64::from(m))),
        };
        table.insert((batch_id, device), manual);
        info!(batch_id, %device, %state, until = ?manual.until, "override set");
        Ok(Some(manual))
    }

    /// The override for `(batch_id, device)` if it is still active at `now`.
    pub fn get(
        &self,
        batch_id: BatchId,
        device: DeviceType,
        now: DateTime<Utc>,
    ) -> Option<ManualOverride> {
        self.lock()
            .get(&(batch_id, device))
            .filter(|o| o.is_active(now))
            .copied()
    }

    /// Every override still active at `now`, ordered by batch then device.
    pub fn active(&self, now: DateTime<Utc>) -> Vec<ActiveOverride> {
        let mut active: Vec<ActiveOverride> = self
            .lock()
            .iter()
            .filter(|(_, o)| o.is_active(now))
            .map(|(&(batch_id, device), &manual)| ActiveOverride {
                batch_id,
                device,
                manual,
            })
            .collect();
        active.sort_by_key(|o| (o.batch_id, o.device));
        active
    }

    /// Forced states for `batch_id`, heater first.
    pub(crate) fn forced_states(
        &self,
        batch_id: BatchId,
        now: DateTime<Utc>,
    ) -> Vec<(DeviceType, SwitchState)> {
        [DeviceType::Heater, DeviceType::Cooler]
            .into_iter()
            .filter_map(|device| self.get(batch_id, device, now).map(|o| (device, o.state)))
            .collect()
    }

    /// Remove overrides whose deadline has passed; returns what was removed.
    pub(crate) fn prune_expired(&self, now: DateTime<Utc>) -> Vec<(BatchId, DeviceType)> {
        let mut table = self.lock();
        let expired: Vec<_> = table
            .iter()
            .filter(|(_, o)| !o.is_active(now))
            .map(|(key, _)| *key)
            .collect();
        for key in &expired {
            table.remove(key);
        }
        expired
    }

    /// Drop every override of a batch that left the eligible set.
    pub(crate) fn retain_batches(&self, keep: impl Fn(BatchId) -> bool) {
        self.lock().retain(|(batch_id, _), _| keep(*batch_id));
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn timed_override_expires() {
        let handle = OverrideHandle::new();
        let set = handle
            .set(1, DeviceType::Cooler, Some(SwitchState::On), Some(30), t0())
            .unwrap()
            .unwrap();
        assert_eq!(set.until, Some(t0() + Duration::minutes(30)));

        assert!(handle.get(1, DeviceType::Cooler, t0() + Duration::minutes(29)).is_some());
        assert!(handle.get(1, DeviceType::Cooler, t0() + Duration::minutes(30)).is_none());
    }

    #[test]
    fn indefinite_override_holds() {
        let handle = OverrideHandle::new();
        handle
            .set(1, DeviceType::Heater, Some(SwitchState::Off), None, t0())
            .unwrap();
        assert!(handle.get(1, DeviceType::Heater, t0() + Duration::days(30)).is_some());
    }

    #[test]
    fn none_state_cancels() {
        let handle = OverrideHandle::new();
        handle
            .set(1, DeviceType::Heater, Some(SwitchState::On), None, t0())
            .unwrap();
        assert_eq!(handle.set(1, DeviceType::Heater, None, None, t0()).unwrap(), None);
        assert!(handle.active(t0()).is_empty());
    }

    #[test]
    fn zero_duration_is_rejected() {
        let handle = OverrideHandle::new();
        let err = handle
            .set(1, DeviceType::Heater, Some(SwitchState::On), Some(0), t0())
            .unwrap_err();
        assert!(matches!(err, FermentError::InvalidOverride(_)));
    }

    #[test]
    fn both_devices_cannot_be_forced_on() {
        let handle = OverrideHandle::new();
        handle
            .set(1, DeviceType::Heater, Some(SwitchState::On), Some(10), t0())
            .unwrap();
        let err = handle
            .set(1, DeviceType::Cooler, Some(SwitchState::On), None, t0())
            .unwrap_err();
        assert_eq!(
            err,
            FermentError::OverrideConflict {
                batch_id: 1,
                device: DeviceType::Cooler
            }
        );

        // Forcing the opposite device off, or on after expiry, is fine.
        handle
            .set(1, DeviceType::Cooler, Some(SwitchState::Off), None, t0())
            .unwrap();
        handle
            .set(1, DeviceType::Cooler, Some(SwitchState::On), None, t0() + Duration::minutes(11))
            .unwrap();
        // Another batch is independent.
        handle
            .set(2, DeviceType::Cooler, Some(SwitchState::On), None, t0())
            .unwrap();
    }

    #[test]
    fn prune_removes_only_expired() {
        let handle = OverrideHandle::new();
        handle
            .set(1, DeviceType::Heater, Some(SwitchState::On), Some(5), t0())
            .unwrap();
        handle
            .set(2, DeviceType::Cooler, Some(SwitchState::Off), None, t0())
            .unwrap();

        let expired = handle.prune_expired(t0() + Duration::minutes(6));
        assert_eq!(expired, vec![(1, DeviceType::Heater)]);
        let active = handle.active(t0() + Duration::minutes(6));
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].batch_id, 2);
    }

    #[test]
    fn forced_states_list_heater_first() {
        let handle = OverrideHandle::new();
        handle
            .set(3, DeviceType::Cooler, Some(SwitchState::Off), None, t0())
            .unwrap();
        handle
            .set(3, DeviceType::Heater, Some(SwitchState::On), None, t0())
            .unwrap();
        assert_eq!(
            handle.forced_states(3, t0()),
            vec![
                (DeviceType::Heater, SwitchState::On),
                (DeviceType::Cooler, SwitchState::Off)
            ]
        );
    }

    #[test]
    fn clones_share_entries() {
        let handle = OverrideHandle::new();
        let clone = handle.clone();
        clone
            .set(1, DeviceType::Heater, Some(SwitchState::On), None, t0())
            .unwrap();
        assert!(handle.get(1, DeviceType::Heater, t0()).is_some());
        handle.retain_batches(|id| id != 1);
        assert!(clone.active(t0()).is_empty());
    }
}
