//! `ferment-middleware` – live event fan-out.
//!
//! Control events, notifications and actuator faults are broadcast to every
//! live listener (dashboards, websocket pushers, loggers) without the control
//! loop waiting on any of them.
//!
//! # Modules
//!
//! - [`bus`] – Topic-based publish/subscribe [`EventBus`] built on Tokio
//!   broadcast channels.

pub mod bus;

pub use bus::{EventBus, Topic, TopicReceiver, encode_frame};
