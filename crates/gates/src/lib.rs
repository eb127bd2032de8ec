//! Gate state machines.
//!
//! Each [`GateController`] subscribes to the `gate_event` channel, keeps only
//! the events addressed to its own gate and tracks whether that gate is open.
//! A [`GatePanel`] manages a configurable row of them.

pub mod config;
pub mod controller;
pub mod error;
pub mod panel;

pub use config::PanelConfig;
pub use controller::GateController;
pub use error::{Error, Result};
pub use panel::GatePanel;
