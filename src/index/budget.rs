//! Scan budgeter
//!
//! Wraps scanning work in a wall-clock budget. The operation is never
//! preempted: it polls [`ScanBudget::exhausted`] between units of work and
//! stops on its own, keeping whatever it finished.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

/// Time slice handed to a budgeted operation
#[derive(Debug, Clone, Copy)]
pub struct ScanBudget {
    started: Instant,
    max: Duration,
}

impl ScanBudget {
    pub fn new(max: Duration) -> Self {
        Self {
            started: Instant::now(),
            max,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.max.saturating_sub(self.elapsed())
    }

    /// True once the slice is used up
    pub fn exhausted(&self) -> bool {
        self.elapsed() >= self.max
    }
}

/// Result of one budgeted run
#[derive(Debug, Clone)]
pub struct BudgetOutcome<T> {
    pub value: T,
    pub elapsed: Duration,
    pub overran: bool,
}

/// Diagnostics about past budgeted runs
#[derive(Debug, Clone, Default, Serialize)]
pub struct BudgetDiagnostics {
    pub runs: u64,
    pub overruns: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_elapsed_ms: Option<f64>,
}

/// Runs operations under a time budget and remembers how they went
#[derive(Debug, Default)]
pub struct Budgeter {
    diagnostics: BudgetDiagnostics,
}

impl Budgeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `operation` with a `max` slice. Overruns are logged only.
    pub fn run_budgeted<T>(
        &mut self,
        label: &str,
        max: Duration,
        operation: impl FnOnce(&ScanBudget) -> T,
    ) -> BudgetOutcome<T> {
        let budget = ScanBudget::new(max);
        let value = operation(&budget);
        let elapsed = budget.elapsed();
        let overran = elapsed > max;

        self.diagnostics.runs += 1;
        self.diagnostics.last_run_at = Some(Utc::now());
        self.diagnostics.last_elapsed_ms = Some(elapsed.as_secs_f64() * 1000.0);
        if overran {
            self.diagnostics.overruns += 1;
            warn!(
                label,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                max_ms = max.as_secs_f64() * 1000.0,
                "budgeted run overran its slice"
            );
        } else {
            debug!(label, elapsed_us = elapsed.as_micros() as u64, "budgeted run finished");
        }

        BudgetOutcome {
            value,
            elapsed,
            overran,
        }
    }

    pub fn diagnostics(&self) -> &BudgetDiagnostics {
        &self.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_progress_is_kept() {
        let mut budgeter = Budgeter::new();
        let outcome = budgeter.run_budgeted("count", Duration::ZERO, |budget| {
            let mut done = 0;
            for _ in 0..100 {
                done += 1;
                if budget.exhausted() {
                    break;
                }
            }
            done
        });
        assert_eq!(outcome.value, 1);
        assert_eq!(budgeter.diagnostics().runs, 1);
        assert!(budgeter.diagnostics().last_run_at.is_some());
    }

    #[test]
    fn test_overrun_is_recorded() {
        let mut budgeter = Budgeter::new();
        let outcome = budgeter.run_budgeted("slow", Duration::from_millis(1), |_| {
            std::thread::sleep(Duration::from_millis(5));
        });
        assert!(outcome.overran);
        assert_eq!(budgeter.diagnostics().overruns, 1);
    }
}
