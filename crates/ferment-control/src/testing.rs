//! In-memory collaborators for control-loop tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use ferment_hal::ActuatorControl;
use ferment_types::{
    BatchControl, BatchId, BatchStatus, ControlEvent, FermentError, Notification, Reading,
    SwitchState,
};

use crate::engine::{Collaborators, ControlLoop};
use crate::ports::{BatchSource, EventSink, ReadingSource};
use crate::settings::{SettingKey, SettingValue, StaticSettings};

pub const HEATER: &str = "hub://switch.heater";
pub const COOLER: &str = "direct://10.0.0.40/0";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

pub fn minutes(n: i64) -> Duration {
    Duration::minutes(n)
}

pub fn batch(id: BatchId, status: BatchStatus, target: f64, hysteresis: f64) -> BatchControl {
    BatchControl {
        id,
        status,
        heater_entity: Some(HEATER.into()),
        cooler_entity: Some(COOLER.into()),
        target_temp: Some(target),
        hysteresis: Some(hysteresis),
        device_id: Some(format!("tilt-{id}")),
        updated_at: t0(),
    }
}

/// Actuators keyed by address. A missing or `None` entry reads as
/// unavailable.
#[derive(Default)]
pub struct FakeActuators {
    states: Mutex<HashMap<String, Option<SwitchState>>>,
    writes: Mutex<Vec<(String, SwitchState)>>,
    reject_writes: Mutex<HashSet<String>>,
}

impl FakeActuators {
    pub fn with(self, entity: &str, state: Option<SwitchState>) -> Self {
        self.set(entity, state);
        self
    }

    pub fn set(&self, entity: &str, state: Option<SwitchState>) {
        self.states.lock().unwrap().insert(entity.to_string(), state);
    }

    pub fn state(&self, entity: &str) -> Option<SwitchState> {
        self.states.lock().unwrap().get(entity).copied().flatten()
    }

    pub fn reject_writes_to(&self, entity: &str) {
        self.reject_writes.lock().unwrap().insert(entity.to_string());
    }

    pub fn writes(&self) -> Vec<(String, SwitchState)> {
        self.writes.lock().unwrap().clone()
    }

    pub fn writes_to(&self, entity: &str) -> Vec<SwitchState> {
        self.writes()
            .into_iter()
            .filter(|(e, _)| e == entity)
            .map(|(_, s)| s)
            .collect()
    }

    pub fn clear_writes(&self) {
        self.writes.lock().unwrap().clear();
    }
}

#[async_trait]
impl ActuatorControl for FakeActuators {
    async fn get_state(&self, address: &str) -> Result<Option<SwitchState>, FermentError> {
        if address.starts_with("relay://") {
            return Err(FermentError::NoAdapter {
                scheme: "relay".into(),
            });
        }
        Ok(self.state(address))
    }

    async fn set_state(&self, address: &str, state: SwitchState) -> Result<bool, FermentError> {
        self.writes
            .lock()
            .unwrap()
            .push((address.to_string(), state));
        if self.reject_writes.lock().unwrap().contains(address) {
            return Ok(false);
        }
        let mut states = self.states.lock().unwrap();
        match states.get_mut(address) {
            Some(slot @ Some(_)) => {
                *slot = Some(state);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct FakeBatches {
    eligible: Mutex<Vec<BatchControl>>,
    latest: Mutex<Option<BatchControl>>,
    fail: Mutex<bool>,
}

impl FakeBatches {
    pub fn set_eligible(&self, batches: Vec<BatchControl>) {
        *self.eligible.lock().unwrap() = batches;
    }

    pub fn set_latest(&self, batch: Option<BatchControl>) {
        *self.latest.lock().unwrap() = batch;
    }

    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }
}

#[async_trait]
impl BatchSource for FakeBatches {
    async fn eligible_batches(&self) -> Result<Vec<BatchControl>, FermentError> {
        if *self.fail.lock().unwrap() {
            return Err(FermentError::Source("batch store offline".into()));
        }
        Ok(self.eligible.lock().unwrap().clone())
    }

    async fn latest_actuated_batch(&self) -> Result<Option<BatchControl>, FermentError> {
        Ok(self.latest.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct FakeReadings {
    wort: Mutex<HashMap<String, f64>>,
    chamber: Mutex<Option<f64>>,
    /// Reading these devices panics.
    poisoned: Mutex<HashSet<String>>,
}

impl FakeReadings {
    pub fn set(&self, device_id: &str, temperature: f64) {
        self.wort
            .lock()
            .unwrap()
            .insert(device_id.to_string(), temperature);
    }

    pub fn set_chamber(&self, temperature: Option<f64>) {
        *self.chamber.lock().unwrap() = temperature;
    }

    pub fn poison(&self, device_id: &str) {
        self.poisoned.lock().unwrap().insert(device_id.to_string());
    }
}

#[async_trait]
impl ReadingSource for FakeReadings {
    async fn latest_reading(&self, device_id: &str) -> Option<Reading> {
        if self.poisoned.lock().unwrap().contains(device_id) {
            panic!("corrupt reading for {device_id}");
        }
        let temperature = *self.wort.lock().unwrap().get(device_id)?;
        Some(Reading {
            temperature,
            rssi: None,
        })
    }

    async fn chamber_temperature(&self) -> Option<f64> {
        *self.chamber.lock().unwrap()
    }
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ControlEvent>>,
    notifications: Mutex<Vec<Notification>>,
    faults: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<ControlEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().unwrap().clone()
    }

    pub fn faults(&self) -> Vec<String> {
        self.faults.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn record(&self, event: ControlEvent) -> Result<(), FermentError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }

    async fn notify(&self, notification: Notification) -> Result<(), FermentError> {
        self.notifications.lock().unwrap().push(notification);
        Ok(())
    }

    async fn fault(
        &self,
        entity_id: &str,
        _batch_id: Option<BatchId>,
        _details: &str,
    ) -> Result<(), FermentError> {
        self.faults.lock().unwrap().push(entity_id.to_string());
        Ok(())
    }
}

/// A control loop wired to fakes, with the fakes kept at hand.
pub struct Harness {
    pub actuators: Arc<FakeActuators>,
    pub batches: Arc<FakeBatches>,
    pub readings: Arc<FakeReadings>,
    pub sink: Arc<RecordingSink>,
    pub control: ControlLoop,
}

impl Harness {
    pub fn new(actuators: FakeActuators, settings: StaticSettings) -> Self {
        let actuators = Arc::new(actuators);
        let batches = Arc::new(FakeBatches::default());
        let readings = Arc::new(FakeReadings::default());
        let sink = Arc::new(RecordingSink::default());
        let control = ControlLoop::new(
            actuators.clone(),
            Collaborators {
                settings: Arc::new(settings),
                batches: batches.clone(),
                readings: readings.clone(),
                sink: sink.clone(),
            },
        );
        Self {
            actuators,
            batches,
            readings,
            sink,
            control,
        }
    }

    /// Heater and cooler both reachable and off.
    pub fn with_both_off() -> Self {
        Self::new(
            FakeActuators::default()
                .with(HEATER, Some(SwitchState::Off))
                .with(COOLER, Some(SwitchState::Off)),
            StaticSettings::new(),
        )
    }
}

pub fn idle_settings(target: f64, hysteresis: f64) -> StaticSettings {
    StaticSettings::new()
        .with(SettingKey::IdleEnabled, SettingValue::Bool(true))
        .with(SettingKey::IdleTarget, SettingValue::Float(target))
        .with(SettingKey::IdleHysteresis, SettingValue::Float(hysteresis))
}
