//! `ferment-hal` – actuator hardware abstraction.
//!
//! Turns scheme-prefixed actuator addresses into calls on concrete protocol
//! backends.
//!
//! # Modules
//!
//! - [`address`] – [`ActuatorAddress`] parsing (`hub://`, `direct://`,
//!   `relay://`, and scheme-less legacy hub addresses).
//! - [`actuator`] – the [`Actuator`] capability trait every backend
//!   implements.
//! - [`hub`] – [`HubAdapter`]: entities behind a home-automation hub's REST
//!   API.
//! - [`direct`] – [`DirectAdapter`]: switches on their own local HTTP API,
//!   with per-host RPC/legacy generation detection.
//! - [`router`] – [`ActuatorRouter`]: scheme routing, lazy adapter
//!   construction and reconfiguration; implements [`ActuatorControl`], the
//!   seam the control loop depends on.

pub mod actuator;
pub mod address;
pub mod direct;
pub mod hub;
pub mod router;

pub use actuator::Actuator;
pub use address::{ActuatorAddress, Scheme};
pub use direct::{DirectAdapter, DirectConfig, Generation};
pub use hub::{HubAdapter, HubConfig};
pub use router::{ActuatorControl, ActuatorRouter, RouterConfig};
