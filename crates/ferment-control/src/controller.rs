//! One evaluation of one control target (a batch or the idle chamber).
//!
//! Polls the configured actuators, then either applies forced override
//! states or executes the hysteresis plan, honouring the minimum cycle time
//! and the heater/cooler mutual exclusion.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use ferment_hal::ActuatorControl;
use ferment_types::{BatchId, ControlAction, ControlEvent, DeviceType, FermentError, SwitchState};
use tracing::{debug, error, info, warn};

use crate::hysteresis::{self, Thresholds};
use crate::ports::EventSink;
use crate::state::ControlState;

/// Shared, read-only inputs of one cycle.
pub(crate) struct CycleContext {
    pub actuators: Arc<dyn ActuatorControl>,
    pub sink: Arc<dyn EventSink>,
    pub now: DateTime<Utc>,
    pub min_cycle: Duration,
    pub ambient: Option<f64>,
}

/// Everything needed to control one target this cycle.
#[derive(Debug, Clone)]
pub(crate) struct Target {
    pub batch_id: Option<BatchId>,
    pub device_id: Option<String>,
    pub current: f64,
    pub target: f64,
    pub hysteresis: f64,
    /// `None` disables the device for this evaluation.
    pub heater: Option<String>,
    pub cooler: Option<String>,
}

impl Target {
    fn entity(&self, device: DeviceType) -> Option<&str> {
        match device {
            DeviceType::Heater => self.heater.as_deref(),
            DeviceType::Cooler => self.cooler.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Outcome {
    pub writes: usize,
    pub overridden: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Applied {
    Written,
    Unchanged,
    Blocked,
    Failed,
}

impl Applied {
    fn ok(self) -> bool {
        matches!(self, Applied::Written | Applied::Unchanged)
    }
}

const DEVICES: [DeviceType; 2] = [DeviceType::Heater, DeviceType::Cooler];

pub(crate) async fn evaluate(
    ctx: &CycleContext,
    target: &Target,
    state: &mut ControlState,
    forced: &[(DeviceType, SwitchState)],
) -> Result<Outcome, FermentError> {
    for device in DEVICES {
        state.bind(device, target.entity(device));
    }
    poll(ctx, target, state).await?;

    let mut outcome = Outcome::default();

    // Overrides on a device this target cannot drive leave automatic control
    // of the other device running.
    let mut ordered: Vec<(DeviceType, SwitchState)> = Vec::with_capacity(forced.len());
    for &(device, desired) in forced {
        if target.entity(device).is_some() {
            ordered.push((device, desired));
        } else {
            warn!(
                batch_id = ?target.batch_id,
                %device,
                "override ignored: device disabled for this target"
            );
        }
    }

    if !ordered.is_empty() {
        outcome.overridden = true;
        // Forced "off" first so a forced "on" never overlaps its opposite.
        ordered.sort_by_key(|(_, desired)| desired.is_on());
        for (device, desired) in ordered {
            let opposite = device.opposite();
            if desired.is_on() && state.state_of(opposite) == Some(SwitchState::On) {
                let off = apply(ctx, target, state, opposite, SwitchState::Off, true).await;
                outcome.count(off);
                if !off.ok() {
                    continue;
                }
            }
            let applied = apply(ctx, target, state, device, desired, true).await;
            outcome.count(applied);
        }
        return Ok(outcome);
    }

    let thresholds = Thresholds::new(target.target, target.hysteresis);
    let plan = hysteresis::plan(
        target.current,
        &thresholds,
        state.state_of(DeviceType::Heater),
        state.state_of(DeviceType::Cooler),
    );
    debug!(
        batch_id = ?target.batch_id,
        current = target.current,
        target = target.target,
        zone = ?plan.zone,
        "evaluated"
    );

    for write in plan.writes {
        let applied = apply(ctx, target, state, write.device, write.state, false).await;
        outcome.count(applied);
        if !applied.ok() {
            break;
        }
    }
    Ok(outcome)
}

impl Outcome {
    fn count(&mut self, applied: Applied) {
        if applied == Applied::Written {
            self.writes += 1;
        }
    }
}

async fn poll(
    ctx: &CycleContext,
    target: &Target,
    state: &mut ControlState,
) -> Result<(), FermentError> {
    for device in DEVICES {
        let Some(rt) = state.get_mut(device) else {
            continue;
        };
        let polled = ctx.actuators.get_state(&rt.entity_id).await;
        rt.state = match polled {
            Ok(Some(polled)) => Some(polled),
            Ok(None) => {
                warn!(
                    batch_id = ?target.batch_id,
                    %device,
                    entity = %rt.entity_id,
                    "actuator unavailable; skipping this cycle"
                );
                report_fault(ctx, &rt.entity_id, target.batch_id, "state unavailable").await;
                None
            }
            Err(e @ (FermentError::NoAdapter { .. } | FermentError::InvalidAddress { .. })) => {
                error!(
                    batch_id = ?target.batch_id,
                    %device,
                    entity = %rt.entity_id,
                    error = %e,
                    "actuator misconfigured"
                );
                report_fault(ctx, &rt.entity_id, target.batch_id, &e.to_string()).await;
                None
            }
            Err(e) => return Err(e),
        };
    }
    Ok(())
}

async fn report_fault(ctx: &CycleContext, entity: &str, batch_id: Option<BatchId>, details: &str) {
    if let Err(e) = ctx.sink.fault(entity, batch_id, details).await {
        error!(error = %e, entity, "fault event not delivered");
    }
}

async fn apply(
    ctx: &CycleContext,
    target: &Target,
    state: &mut ControlState,
    device: DeviceType,
    desired: SwitchState,
    forced: bool,
) -> Applied {
    let Some(rt) = state.get_mut(device) else {
        return Applied::Failed;
    };
    match rt.state {
        None => return Applied::Failed,
        Some(current) if current == desired => return Applied::Unchanged,
        Some(_) => {}
    }

    if !forced {
        if let Some(last) = rt.last_change {
            let elapsed = ctx.now - last;
            if elapsed < ctx.min_cycle {
                debug!(
                    batch_id = ?target.batch_id,
                    %device,
                    %desired,
                    elapsed_secs = elapsed.num_seconds(),
                    "minimum cycle time not elapsed; write suppressed"
                );
                return Applied::Blocked;
            }
        }
    }

    let result = ctx.actuators.set_state(&rt.entity_id, desired).await;
    match result {
        Ok(true) => {
            rt.state = Some(desired);
            rt.last_change = Some(ctx.now);
            info!(
                batch_id = ?target.batch_id,
                %device,
                entity = %rt.entity_id,
                %desired,
                forced,
                temperature = target.current,
                "actuator switched"
            );
            let event = ControlEvent {
                action: ControlAction::new(device, desired),
                temperature: target.current,
                ambient_temp: ctx.ambient,
                target_temp: target.target,
                device_id: target.device_id.clone(),
                batch_id: target.batch_id,
                timestamp: ctx.now,
            };
            if let Err(e) = ctx.sink.record(event).await {
                error!(batch_id = ?target.batch_id, error = %e, "control event not recorded");
            }
            Applied::Written
        }
        Ok(false) => {
            warn!(
                batch_id = ?target.batch_id,
                %device,
                entity = %rt.entity_id,
                %desired,
                "actuator did not confirm write"
            );
            Applied::Failed
        }
        Err(e) => {
            error!(
                batch_id = ?target.batch_id,
                %device,
                entity = %rt.entity_id,
                error = %e,
                "actuator write rejected"
            );
            Applied::Failed
        }
    }
}
