//! The [`Actuator`] capability contract every protocol adapter implements.
//!
//! Adapters register with the [`ActuatorRouter`][crate::router::ActuatorRouter],
//! which picks one per address scheme.  The control loop only ever talks to
//! the router, so backends can be swapped without touching control logic.
//!
//! # Failure model
//!
//! Adapters never return errors for device trouble.  An unreachable device,
//! a timeout or a non-boolean state resolves to `None` for reads and `false`
//! for writes, and the caller decides what to skip.

use async_trait::async_trait;
use ferment_types::{DeviceInfo, SwitchState};
use thiserror::Error;

use crate::address::{ActuatorAddress, Scheme};

/// A backend able to read and switch on/off actuators of one [`Scheme`].
#[async_trait]
pub trait Actuator: Send + Sync {
    /// The address scheme this adapter serves.
    fn scheme(&self) -> Scheme;

    /// Current state of the actuator at `address`.
    ///
    /// `None` means "unreachable or not boolean-like"; callers must treat it
    /// as "do not control this cycle", never as [`SwitchState::Off`].
    async fn get_state(&self, address: &ActuatorAddress) -> Option<SwitchState>;

    /// Drive the actuator at `address` to `state`.  Returns `true` once the
    /// backend has confirmed the write.
    async fn set_state(&self, address: &ActuatorAddress, state: SwitchState) -> bool;

    /// Cheap reachability probe.  Never fails; unreachable is `false`.
    async fn test_connection(&self) -> bool;

    /// List the switchable devices this backend knows about.
    async fn discover_devices(&self) -> Vec<DeviceInfo> {
        Vec::new()
    }

    /// Instantaneous power draw in watts, when the device meters it.
    async fn get_power_usage(&self, _address: &ActuatorAddress) -> Option<f64> {
        None
    }

    /// Release any held connections.  Called when the router tears the
    /// adapter down.
    async fn close(&self) {}
}

/// Failures internal to an adapter.  Logged and mapped to `None` / `false`
/// before they reach a caller.
#[derive(Error, Debug)]
pub(crate) enum AdapterError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected response: {0}")]
    BadResponse(String),

    #[error("Address {0} is not served by this adapter")]
    WrongScheme(String),
}
