/// Collector module
///
/// This module groups all logic responsible for:
/// - Running one metadata collection cycle per exchange
/// - Persisting what each adapter returns
/// - Reporting per-step outcomes back to the scheduler
///
/// The collector layer acts as the orchestration layer between:
/// - Exchange adapters (Binance, KuCoin, …)
/// - The persistence store
///
/// Design notes:
/// - Exchange-specific logic MUST NOT live here
/// - A failing step never prevents the following steps
/// - All heavy logic belongs to adapters or the store
pub mod runner;

use std::fmt;
use std::time::Duration;

pub use runner::Collector;

/// Outcome of one fetch + persist step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Number of records written
    Succeeded(usize),

    /// The adapter does not offer this data
    Skipped(String),

    Failed(String),
}

impl StepOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, StepOutcome::Failed(_))
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Succeeded(n) => write!(f, "ok({n})"),
            StepOutcome::Skipped(_) => f.write_str("skipped"),
            StepOutcome::Failed(_) => f.write_str("failed"),
        }
    }
}

/// What happened to one exchange during one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub exchange: String,
    pub pairs: StepOutcome,
    pub fees: StepOutcome,
    pub networks: StepOutcome,
    pub balance: StepOutcome,
    pub elapsed: Duration,
}

impl CycleReport {
    /// Steps in execution order, labelled.
    pub fn steps(&self) -> [(&'static str, &StepOutcome); 4] {
        [
            ("pairs", &self.pairs),
            ("fees", &self.fees),
            ("networks", &self.networks),
            ("balance", &self.balance),
        ]
    }

    /// True when no step failed. Skipped steps do not count against it.
    pub fn succeeded(&self) -> bool {
        self.steps().iter().all(|(_, s)| !s.is_failed())
    }

    /// First failure reason, for health bookkeeping.
    pub fn first_failure(&self) -> Option<String> {
        self.steps().into_iter().find_map(|(step, outcome)| match outcome {
            StepOutcome::Failed(reason) => Some(format!("{step}: {reason}")),
            _ => None,
        })
    }
}
