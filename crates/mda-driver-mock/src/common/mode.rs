//! Operational modes for simulated devices.
//!
//! - **Instant**: Zero delays, deterministic behavior for unit tests
//! - **Realistic**: Hardware-like timing for integration tests
//! - **Chaos**: Realistic timing plus random injected failures

use serde::Deserialize;

/// Operational modes for simulated devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MockMode {
    /// Zero delays, deterministic - for unit tests
    #[default]
    Instant,
    /// Hardware-like timing - for integration tests
    Realistic,
    /// Hardware-like timing and random failures - for resilience testing
    Chaos,
}

impl MockMode {
    /// True when simulated operations should take hardware-like time.
    pub fn is_timed(self) -> bool {
        !matches!(self, MockMode::Instant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mode() {
        assert_eq!(MockMode::default(), MockMode::Instant);
        assert!(!MockMode::Instant.is_timed());
        assert!(MockMode::Chaos.is_timed());
    }

    #[test]
    fn test_mode_from_config_string() {
        let mode: MockMode = serde_json::from_str("\"realistic\"").unwrap();
        assert_eq!(mode, MockMode::Realistic);
    }
}
