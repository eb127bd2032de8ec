//! Operator-adjustable panel settings.

use crate::error::{Error, Result};
use std::time::Duration;

pub const MIN_GATES: usize = 1;
pub const MAX_GATES: usize = 6;
pub const DEFAULT_GATE_COUNT: usize = 3;

pub const MIN_AUTO_CLOSE: Duration = Duration::from_millis(1000);
pub const MAX_AUTO_CLOSE: Duration = Duration::from_millis(10_000);
pub const AUTO_CLOSE_STEP: Duration = Duration::from_millis(500);
pub const DEFAULT_AUTO_CLOSE: Duration = Duration::from_millis(3000);

/// Settings applied uniformly to every gate on the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanelConfig {
    /// Number of gates, ids "1" through `gate_count`.
    pub gate_count: usize,
    /// Delay before an opened gate closes on its own.
    pub auto_close: Duration,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            gate_count: DEFAULT_GATE_COUNT,
            auto_close: DEFAULT_AUTO_CLOSE,
        }
    }
}

impl PanelConfig {
    pub fn new(gate_count: usize, auto_close: Duration) -> Result<Self> {
        let config = Self {
            gate_count,
            auto_close,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validate_gate_count(self.gate_count)?;
        validate_auto_close(self.auto_close)
    }
}

pub fn validate_gate_count(count: usize) -> Result<()> {
    if (MIN_GATES..=MAX_GATES).contains(&count) {
        Ok(())
    } else {
        Err(Error::InvalidGateCount {
            got: count,
            min: MIN_GATES,
            max: MAX_GATES,
        })
    }
}

pub fn validate_auto_close(delay: Duration) -> Result<()> {
    let in_range = (MIN_AUTO_CLOSE..=MAX_AUTO_CLOSE).contains(&delay);
    let on_step = delay.as_nanos() % AUTO_CLOSE_STEP.as_nanos() == 0;
    if in_range && on_step {
        Ok(())
    } else {
        Err(Error::InvalidAutoClose(delay))
    }
}

/// Identifier of the gate at 1-based `position`.
pub fn gate_id(position: usize) -> String {
    position.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PanelConfig::default();
        assert_eq!(config.gate_count, 3);
        assert_eq!(config.auto_close, Duration::from_millis(3000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_gate_count_bounds() {
        assert!(validate_gate_count(1).is_ok());
        assert!(validate_gate_count(6).is_ok());
        assert_eq!(
            validate_gate_count(0),
            Err(Error::InvalidGateCount { got: 0, min: 1, max: 6 })
        );
        assert!(validate_gate_count(7).is_err());
    }

    #[test]
    fn test_auto_close_bounds_and_steps() {
        assert!(validate_auto_close(Duration::from_millis(1000)).is_ok());
        assert!(validate_auto_close(Duration::from_millis(2500)).is_ok());
        assert!(validate_auto_close(Duration::from_millis(10_000)).is_ok());
        assert!(validate_auto_close(Duration::from_millis(500)).is_err());
        assert!(validate_auto_close(Duration::from_millis(10_500)).is_err());
        assert!(validate_auto_close(Duration::from_millis(1250)).is_err());
    }

    #[test]
    fn test_new_validates() {
        assert!(PanelConfig::new(4, Duration::from_secs(5)).is_ok());
        assert!(PanelConfig::new(4, Duration::from_millis(100)).is_err());
        assert!(PanelConfig::new(9, Duration::from_secs(5)).is_err());
    }

    #[test]
    fn test_gate_ids_are_one_based() {
        assert_eq!(gate_id(1), "1");
        assert_eq!(gate_id(6), "6");
    }
}
