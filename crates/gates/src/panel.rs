//! A row of gates sharing one event bus and one auto-close delay.

use crate::config::{gate_id, validate_auto_close, validate_gate_count, PanelConfig};
use crate::controller::GateController;
use crate::error::Result;
use gate_events::GateEventBus;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Owns one [`GateController`] per gate, ids "1" through `gate_count`.
pub struct GatePanel {
    bus: Arc<GateEventBus>,
    config: PanelConfig,
    gates: Vec<GateController>,
}

impl GatePanel {
    /// Validate `config` and activate its gates. Must be called inside a Tokio runtime.
    pub fn new(bus: Arc<GateEventBus>, config: PanelConfig) -> Result<Self> {
        config.validate()?;
        let mut panel = Self {
            bus,
            config,
            gates: Vec::with_capacity(config.gate_count),
        };
        panel.grow_to(config.gate_count)?;
        info!(
            "Gate panel ready: {} gates, auto-close {:?}",
            config.gate_count, config.auto_close
        );
        Ok(panel)
    }

    pub fn config(&self) -> PanelConfig {
        self.config
    }

    pub fn gates(&self) -> &[GateController] {
        &self.gates
    }

    pub fn gate(&self, id: &str) -> Option<&GateController> {
        self.gates.iter().find(|g| g.gate_id() == id)
    }

    pub fn gate_ids(&self) -> Vec<String> {
        self.gates.iter().map(|g| g.gate_id().to_string()).collect()
    }

    /// Ids of the gates that are currently open.
    pub fn open_gates(&self) -> Vec<String> {
        self.gates
            .iter()
            .filter(|g| g.is_open())
            .map(|g| g.gate_id().to_string())
            .collect()
    }

    /// Resize the panel. New gates start closed; removed gates are deactivated.
    pub fn set_gate_count(&mut self, count: usize) -> Result<()> {
        validate_gate_count(count)?;
        if count > self.gates.len() {
            self.grow_to(count)?;
        } else {
            self.gates.truncate(count);
        }
        self.config.gate_count = count;
        info!("Gate count set to {}", count);
        Ok(())
    }

    /// Change the auto-close delay of every gate.
    pub fn set_auto_close(&mut self, delay: Duration) -> Result<()> {
        validate_auto_close(delay)?;
        for gate in &self.gates {
            gate.set_auto_close(delay);
        }
        self.config.auto_close = delay;
        info!("Auto-close delay set to {:?}", delay);
        Ok(())
    }

    fn grow_to(&mut self, count: usize) -> Result<()> {
        for position in self.gates.len() + 1..=count {
            let gate = GateController::activate(gate_id(position), self.config.auto_close, &self.bus)?;
            self.gates.push(gate);
        }
        Ok(())
    }
}
