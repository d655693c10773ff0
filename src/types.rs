//! Check results and the run report.

use serde::Serialize;

use crate::checks::Area;

/// Result of running a check.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CheckResult {
    /// Check passed.
    Pass { name: String, details: String },
    /// Computed value broke the expectation.
    Fail { name: String, reason: String },
    /// The metric could not be computed.
    Error { name: String, error: String },
    /// Check was not selected.
    Skip { name: String, reason: String },
}

impl CheckResult {
    pub const fn is_pass(&self) -> bool {
        matches!(self, Self::Pass { .. })
    }

    pub const fn is_fail(&self) -> bool {
        matches!(self, Self::Fail { .. })
    }

    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub const fn is_skip(&self) -> bool {
        matches!(self, Self::Skip { .. })
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Pass { name, .. }
            | Self::Fail { name, .. }
            | Self::Error { name, .. }
            | Self::Skip { name, .. } => name,
        }
    }
}

/// Tally of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub skipped: usize,
}

impl Summary {
    pub fn from_results(results: &[CheckResult]) -> Self {
        let mut summary = Self::default();
        for result in results {
            match result {
                CheckResult::Pass { .. } => summary.passed += 1,
                CheckResult::Fail { .. } => summary.failed += 1,
                CheckResult::Error { .. } => summary.errors += 1,
                CheckResult::Skip { .. } => summary.skipped += 1,
            }
        }
        summary
    }

    /// Checks that were evaluated, whatever their outcome.
    pub const fn ran(self) -> usize {
        self.passed + self.failed + self.errors
    }

    /// At least one check ran, with no failures and no errors.
    pub const fn is_success(self) -> bool {
        self.ran() > 0 && self.failed == 0 && self.errors == 0
    }
}

/// Machine-readable record of a run, written with `--report`.
#[derive(Debug, Serialize)]
pub struct Report {
    pub claims_file: String,
    pub drugs_file: String,
    pub areas: Vec<Area>,
    pub summary: Summary,
    pub elapsed_secs: f64,
    pub results: Vec<CheckResult>,
}
