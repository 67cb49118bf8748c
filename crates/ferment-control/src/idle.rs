//! Chamber control while no batch is eligible.
//!
//! Borrows the actuators of the most recently updated batch and drives them
//! from the chamber sensor with the same planner as batch control. There is
//! exactly one idle state; the engine clears it as soon as a batch becomes
//! eligible.

use ferment_types::{DeviceType, FermentError};
use tracing::debug;

use crate::controller::{self, CycleContext, Outcome, Target};
use crate::ports::{BatchSource, ReadingSource};
use crate::settings::ControlSettings;
use crate::state::ControlState;

/// `Ok(None)` when there is nothing to control: no chamber reading or no
/// batch to borrow actuators from.
pub(crate) async fn control_chamber(
    ctx: &CycleContext,
    settings: &ControlSettings,
    batches: &dyn BatchSource,
    readings: &dyn ReadingSource,
    state: &mut ControlState,
) -> Result<Option<Outcome>, FermentError> {
    let Some(chamber) = readings.chamber_temperature().await else {
        debug!("idle control: no chamber reading");
        return Ok(None);
    };
    let Some(donor) = batches.latest_actuated_batch().await? else {
        debug!("idle control: no actuators to borrow");
        return Ok(None);
    };

    let target = Target {
        batch_id: None,
        device_id: None,
        current: chamber,
        target: settings.idle_target,
        hysteresis: settings.idle_hysteresis,
        heater: donor.entity(DeviceType::Heater).map(String::from),
        cooler: donor.entity(DeviceType::Cooler).map(String::from),
    };
    debug!(donor = donor.id, chamber, "idle control");
    controller::evaluate(ctx, &target, state, &[]).await.map(Some)
}
