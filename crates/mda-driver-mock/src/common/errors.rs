//! Error injection for simulated devices.
//!
//! Simulated hardware calls [`ErrorConfig::check_operation`] before doing any
//! work. A configured scenario or a random draw turns the call into an
//! `anyhow` error, which the core reports like any real driver failure.

use super::rng::MockRng;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Error injection configuration
#[derive(Clone, Debug)]
pub struct ErrorConfig {
    /// Per-operation failure rate (0.0 to 1.0); `"*"` applies to every operation
    failure_rates: Arc<HashMap<&'static str, f64>>,
    scenarios: Arc<Vec<ErrorScenario>>,
    rng: Arc<MockRng>,
    state: Arc<Mutex<ErrorState>>,
}

#[derive(Debug, Clone)]
pub enum ErrorScenario {
    /// Fail after N successful calls of an operation
    FailAfterN { operation: &'static str, count: u32 },
    /// Always fail an operation
    Always { operation: &'static str },
    /// Every operation fails as if the cable were pulled
    CommunicationLoss,
    /// Every operation fails with a fault code
    HardwareFault { code: u32 },
}

#[derive(Default, Debug)]
struct ErrorState {
    operation_counts: HashMap<&'static str, u32>,
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self::none()
    }
}

impl ErrorConfig {
    /// No injected errors
    pub fn none() -> Self {
        Self::scenarios(Vec::new())
    }

    /// Uniform random failures across every operation
    pub fn random_failures(rate: f64) -> Self {
        Self::random_failures_seeded(rate, None)
    }

    /// Uniform random failures with a fixed seed
    pub fn random_failures_seeded(rate: f64, seed: Option<u64>) -> Self {
        let mut rates = HashMap::new();
        rates.insert("*", rate);
        Self {
            failure_rates: Arc::new(rates),
            scenarios: Arc::new(Vec::new()),
            rng: Arc::new(MockRng::new(seed)),
            state: Arc::new(Mutex::new(ErrorState::default())),
        }
    }

    pub fn scenario(scenario: ErrorScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    pub fn scenarios(scenarios: Vec<ErrorScenario>) -> Self {
        Self {
            failure_rates: Arc::new(HashMap::new()),
            scenarios: Arc::new(scenarios),
            rng: Arc::new(MockRng::new(Some(0))),
            state: Arc::new(Mutex::new(ErrorState::default())),
        }
    }

    /// Decide whether `operation` fails this time.
    pub fn check_operation(&self, operation: &'static str) -> anyhow::Result<()> {
        let mut state = self.state.lock();

        for scenario in self.scenarios.iter() {
            match scenario {
                ErrorScenario::CommunicationLoss => {
                    anyhow::bail!("communication lost")
                }
                ErrorScenario::HardwareFault { code } => {
                    anyhow::bail!("hardware fault {code:#06x}")
                }
                ErrorScenario::Always { operation: op } if *op == operation => {
                    anyhow::bail!("injected {operation} failure")
                }
                ErrorScenario::FailAfterN {
                    operation: op,
                    count,
                } if *op == operation => {
                    let current = state.operation_counts.entry(operation).or_insert(0);
                    *current += 1;
                    if *current > *count {
                        anyhow::bail!("injected {operation} failure after {count} operations");
                    }
                }
                _ => {}
            }
        }

        let rate = self
            .failure_rates
            .get(operation)
            .or_else(|| self.failure_rates.get("*"))
            .copied()
            .unwrap_or(0.0);
        if self.rng.chance(rate) {
            anyhow::bail!("random {operation} failure");
        }
        Ok(())
    }
}
