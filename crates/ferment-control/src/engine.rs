//! [`ControlLoop`] – the fermentation temperature control task.
//!
//! Each cycle:
//!
//! 1. **Settings** – re-read [`ControlSettings`]; a disabled loop does
//!    nothing but sleep.
//! 2. **Expire** – drop manual overrides whose deadline has passed, so
//!    automatic control resumes in this very cycle.
//! 3. **Select** – fetch eligible batches and forget runtime state,
//!    overrides and pitch-ready flags of batches that left the set.
//! 4. **Control** – evaluate every batch concurrently. Each evaluation owns
//!    its batch's [`ControlState`] for the duration of the cycle, and an
//!    error or panic is contained to that batch.
//! 5. **Idle** – with no eligible batch and idle mode enabled, control the
//!    chamber instead.
//!
//! Between cycles the task sleeps for the configured interval. A
//! [`ControlHandle`] can wake it early (override changes do so
//! automatically) or stop it.
//!
//! # Example
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use ferment_control::{Collaborators, ControlLoop};
//! # use ferment_hal::ActuatorRouter;
//! # async fn demo(router: Arc<ActuatorRouter>, collaborators: Collaborators) {
//! let control = ControlLoop::with_router(router, collaborators);
//! let handle = control.handle();
//! let task = tokio::spawn(control.run());
//! // ...
//! handle.shutdown();
//! task.await.ok();
//! # }
//! ```

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ferment_hal::{ActuatorControl, ActuatorRouter, RouterConfig};
use ferment_types::{
    BatchControl, BatchId, DeviceType, FermentError, Notification, SwitchState,
};
use futures_util::FutureExt;
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::{Notify, watch};
use tracing::{debug, error, info, warn};

use crate::controller::{self, CycleContext, Outcome, Target};
use crate::idle;
use crate::overrides::{ActiveOverride, ManualOverride, OverrideHandle};
use crate::ports::{BatchSource, EventSink, ReadingSource};
use crate::settings::{ControlSettings, SettingsSource};
use crate::state::{ControlKey, ControlState, StateStore};

/// The collaborators a [`ControlLoop`] reads from and reports to.
#[derive(Clone)]
pub struct Collaborators {
    pub settings: Arc<dyn SettingsSource>,
    pub batches: Arc<dyn BatchSource>,
    pub readings: Arc<dyn ReadingSource>,
    pub sink: Arc<dyn EventSink>,
}

/// Summary of one control cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    /// Control was disabled by settings; nothing ran.
    pub disabled: bool,
    /// Batches evaluated without error.
    pub evaluated: usize,
    /// Batches whose evaluation errored or panicked.
    pub failed: usize,
    /// Confirmed actuator writes.
    pub writes: usize,
    /// Batches held by a manual override.
    pub overridden: usize,
    pub pitch_ready: Vec<BatchId>,
    /// Idle (chamber) control ran this cycle.
    pub idle: bool,
    /// Sleep until the next cycle.
    #[serde(with = "secs")]
    pub interval: Duration,
}

mod secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handle
// ─────────────────────────────────────────────────────────────────────────────

/// Cloneable remote control for a running [`ControlLoop`].
#[derive(Clone)]
pub struct ControlHandle {
    overrides: OverrideHandle,
    wake: Arc<Notify>,
    shutdown: Arc<watch::Sender<bool>>,
    router: Option<Arc<ActuatorRouter>>,
}

impl ControlHandle {
    /// Force `device` of `batch_id` to `state` for `duration_minutes`
    /// (indefinitely when `None`); `state = None` cancels. Wakes the loop.
    pub fn set_override(
        &self,
        batch_id: BatchId,
        device: DeviceType,
        state: Option<SwitchState>,
        duration_minutes: Option<u32>,
    ) -> Result<Option<ManualOverride>, FermentError> {
        let result = self
            .overrides
            .set(batch_id, device, state, duration_minutes, Utc::now())?;
        self.wake();
        Ok(result)
    }

    pub fn active_overrides(&self) -> Vec<ActiveOverride> {
        self.overrides.active(Utc::now())
    }

    pub fn overrides(&self) -> &OverrideHandle {
        &self.overrides
    }

    /// Cut the current sleep short.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Swap new backend parameters into the router and run a cycle with
    /// them. Returns `false` when the configuration was unchanged.
    pub async fn reconfigure(&self, config: RouterConfig) -> Result<bool, FermentError> {
        let router = self.router.as_ref().ok_or_else(|| {
            FermentError::Config("control loop was built without a reconfigurable router".into())
        })?;
        let changed = router.reconfigure(config).await;
        if changed {
            self.wake();
        }
        Ok(changed)
    }

    /// Stop the loop after the cycle in progress, if any.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loop
// ─────────────────────────────────────────────────────────────────────────────

pub struct ControlLoop {
    actuators: Arc<dyn ActuatorControl>,
    collaborators: Collaborators,
    store: StateStore,
    handle: ControlHandle,
    shutdown_rx: watch::Receiver<bool>,
    last_interval: Duration,
}

struct BatchResult {
    id: BatchId,
    state: ControlState,
    outcome: Result<Result<BatchOutcome, FermentError>, String>,
}

#[derive(Default)]
struct BatchOutcome {
    outcome: Outcome,
    pitch_notified: bool,
}

impl ControlLoop {
    pub fn new(actuators: Arc<dyn ActuatorControl>, collaborators: Collaborators) -> Self {
        Self::build(actuators, None, collaborators)
    }

    /// Like [`ControlLoop::new`], and lets [`ControlHandle::reconfigure`]
    /// reach the router.
    pub fn with_router(router: Arc<ActuatorRouter>, collaborators: Collaborators) -> Self {
        let actuators: Arc<dyn ActuatorControl> = router.clone();
        Self::build(actuators, Some(router), collaborators)
    }

    fn build(
        actuators: Arc<dyn ActuatorControl>,
        router: Option<Arc<ActuatorRouter>>,
        collaborators: Collaborators,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        Self {
            actuators,
            collaborators,
            store: StateStore::new(),
            handle: ControlHandle {
                overrides: OverrideHandle::new(),
                wake: Arc::new(Notify::new()),
                shutdown: Arc::new(shutdown),
                router,
            },
            shutdown_rx,
            last_interval: ControlSettings::default().interval,
        }
    }

    pub fn handle(&self) -> ControlHandle {
        self.handle.clone()
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Run cycles until [`ControlHandle::shutdown`].
    ///
    /// A failing cycle is logged and retried after the last known interval.
    pub async fn run(mut self) {
        info!("control loop started");
        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }
            match self.run_cycle().await {
                Ok(report) => {
                    debug!(?report, "cycle complete");
                    self.last_interval = report.interval;
                }
                Err(e) => {
                    error!(error = %e, "control cycle failed; retrying next interval");
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(self.last_interval) => {}
                _ = self.handle.wake.notified() => {
                    debug!("control loop woken early");
                }
                _ = self.shutdown_rx.changed() => {}
            }
        }
        info!("control loop stopped");
    }

    pub async fn run_cycle(&mut self) -> Result<CycleReport, FermentError> {
        self.run_cycle_at(Utc::now()).await
    }

    /// Run one cycle as of `now`.
    pub async fn run_cycle_at(&mut self, now: DateTime<Utc>) -> Result<CycleReport, FermentError> {
        let settings = ControlSettings::load(self.collaborators.settings.as_ref()).await?;
        let mut report = CycleReport {
            interval: settings.interval,
            ..CycleReport::default()
        };
        if !settings.enabled {
            debug!("temperature control disabled");
            report.disabled = true;
            return Ok(report);
        }

        let overrides = &self.handle.overrides;
        for (batch_id, device) in overrides.prune_expired(now) {
            info!(batch_id, %device, "override expired; automatic control resumes");
        }

        let batches: Vec<BatchControl> = self
            .collaborators
            .batches
            .eligible_batches()
            .await?
            .into_iter()
            .filter(|b| b.status.is_controllable() && b.has_actuators())
            .collect();

        let eligible: HashSet<BatchId> = batches.iter().map(|b| b.id).collect();
        let chilling: HashSet<BatchId> = batches
            .iter()
            .filter(|b| b.status.is_chilling())
            .map(|b| b.id)
            .collect();
        self.store.retain_batches(&eligible);
        self.store.retain_pitch_flags(&chilling);
        overrides.retain_batches(|id| eligible.contains(&id));

        let ambient = self.collaborators.readings.chamber_temperature().await;
        let ctx = CycleContext {
            actuators: self.actuators.clone(),
            sink: self.collaborators.sink.clone(),
            now,
            min_cycle: chrono::Duration::from_std(settings.min_cycle)
                .unwrap_or_else(|_| chrono::Duration::minutes(5)),
            ambient,
        };

        if batches.is_empty() {
            if settings.idle_enabled {
                self.run_idle(&ctx, &settings, &mut report).await?;
            } else {
                self.store.clear_idle();
            }
            return Ok(report);
        }
        self.store.clear_idle();

        let jobs = batches.into_iter().map(|batch| {
            let state = self.store.take(ControlKey::Batch(batch.id));
            let forced = overrides.forced_states(batch.id, now);
            let notified = self.store.pitch_notified(batch.id);
            let ctx = &ctx;
            let settings = &settings;
            let readings = self.collaborators.readings.as_ref();
            async move {
                let mut state = state;
                let outcome = AssertUnwindSafe(control_batch(
                    ctx, settings, readings, &batch, &mut state, &forced, notified,
                ))
                .catch_unwind()
                .await
                .map_err(panic_message);
                BatchResult {
                    id: batch.id,
                    state,
                    outcome,
                }
            }
        });
        let results: Vec<BatchResult> = join_all(jobs).await;

        for result in results {
            self.store.put(ControlKey::Batch(result.id), result.state);
            match result.outcome {
                Ok(Ok(done)) => {
                    report.evaluated += 1;
                    report.writes += done.outcome.writes;
                    if done.outcome.overridden {
                        report.overridden += 1;
                    }
                    if done.pitch_notified {
                        self.store.mark_pitch_notified(result.id);
                        report.pitch_ready.push(result.id);
                    }
                }
                Ok(Err(e)) => {
                    report.failed += 1;
                    error!(batch_id = result.id, error = %e, "batch control failed");
                }
                Err(panic) => {
                    report.failed += 1;
                    error!(batch_id = result.id, panic = %panic, "batch control panicked");
                }
            }
        }
        report.pitch_ready.sort_unstable();
        Ok(report)
    }

    async fn run_idle(
        &mut self,
        ctx: &CycleContext,
        settings: &ControlSettings,
        report: &mut CycleReport,
    ) -> Result<(), FermentError> {
        let mut state = self.store.take(ControlKey::Idle);
        let result = idle::control_chamber(
            ctx,
            settings,
            self.collaborators.batches.as_ref(),
            self.collaborators.readings.as_ref(),
            &mut state,
        )
        .await;
        self.store.put(ControlKey::Idle, state);
        if let Some(outcome) = result? {
            report.idle = true;
            report.writes += outcome.writes;
        }
        Ok(())
    }
}

async fn control_batch(
    ctx: &CycleContext,
    settings: &ControlSettings,
    readings: &dyn ReadingSource,
    batch: &BatchControl,
    state: &mut ControlState,
    forced: &[(DeviceType, SwitchState)],
    pitch_notified: bool,
) -> Result<BatchOutcome, FermentError> {
    let Some(device_id) = batch.device_id.as_deref() else {
        debug!(batch_id = batch.id, "no sensor assigned");
        return Ok(BatchOutcome::default());
    };
    let Some(reading) = readings.latest_reading(device_id).await else {
        debug!(batch_id = batch.id, device_id, "no reading available");
        return Ok(BatchOutcome::default());
    };

    let chilling = batch.status.is_chilling();
    let target = Target {
        batch_id: Some(batch.id),
        device_id: Some(device_id.to_string()),
        current: reading.temperature,
        target: settings.target_for(batch),
        hysteresis: settings.hysteresis_for(batch),
        heater: batch
            .entity(DeviceType::Heater)
            .filter(|_| !chilling)
            .map(String::from),
        cooler: batch.entity(DeviceType::Cooler).map(String::from),
    };

    let outcome = controller::evaluate(ctx, &target, state, forced).await?;

    let mut pitch = false;
    if chilling && !outcome.overridden && !pitch_notified && target.current <= target.target {
        info!(
            batch_id = batch.id,
            temperature = target.current,
            target = target.target,
            "wort at pitching temperature"
        );
        let notification = Notification::PitchReady {
            batch_id: batch.id,
            temperature: target.current,
            target_temp: target.target,
        };
        if let Err(e) = ctx.sink.notify(notification).await {
            warn!(batch_id = batch.id, error = %e, "pitch-ready notification not delivered");
        }
        pitch = true;
    }

    Ok(BatchOutcome {
        outcome,
        pitch_notified: pitch,
    })
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
