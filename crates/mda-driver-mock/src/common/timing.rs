//! Hardware-like delays used outside instant mode.

use std::time::Duration;

/// Timing configuration for realistic mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimingConfig {
    /// Spectrum readout time in milliseconds
    pub readout_ms: u64,
    /// Settling time after a write in milliseconds
    pub settling_time_ms: u64,
    /// Round-trip delay of one command in milliseconds
    pub communication_delay_ms: u64,
}

impl TimingConfig {
    /// Timing of the example device: a slow stage behind a serial link.
    pub fn example() -> Self {
        Self {
            readout_ms: 33,
            settling_time_ms: 50,
            communication_delay_ms: 5,
        }
    }

    pub fn read_delay(&self) -> Duration {
        Duration::from_millis(self.communication_delay_ms)
    }

    pub fn write_delay(&self) -> Duration {
        Duration::from_millis(self.communication_delay_ms + self.settling_time_ms)
    }

    pub fn acquire_delay(&self) -> Duration {
        Duration::from_millis(self.communication_delay_ms + self.readout_ms)
    }
}
