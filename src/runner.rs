//! Runs the check catalogue against a loaded dataset.

use std::fs;
use std::path::Path;
use std::time::Instant;

use anyhow::Context;
use tracing::{debug, warn};

use crate::checks::{catalogue, Area, Check};
use crate::dataset::Dataset;
use crate::error::CheckError;
use crate::expectations::Expectations;
use crate::types::{CheckResult, Report};

/// Which checks to run. Everything else is reported as skipped.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Areas to run; empty means all of them.
    pub areas: Vec<Area>,
    /// Substring a check id must contain.
    pub filter: Option<String>,
}

impl Selection {
    pub fn includes(&self, check: &Check) -> bool {
        let in_area = self.areas.is_empty() || self.areas.contains(&check.area);
        let matches = self
            .filter
            .as_deref()
            .is_none_or(|f| check.id().contains(f));
        in_area && matches
    }

    /// Areas the run covers, in catalogue order.
    pub fn areas(&self) -> Vec<Area> {
        Area::ALL
            .into_iter()
            .filter(|a| self.areas.is_empty() || self.areas.contains(a))
            .collect()
    }
}

/// Runs a single check and maps its outcome.
pub fn run_check(check: &Check, ds: &Dataset, exp: &Expectations) -> CheckResult {
    let name = check.id();
    let start = Instant::now();
    let outcome = (check.run)(ds, exp);
    debug!(check = %name, elapsed_us = start.elapsed().as_micros(), "check finished");

    match outcome {
        Ok(details) => CheckResult::Pass { name, details },
        Err(CheckError::Assertion(reason)) => CheckResult::Fail { name, reason },
        Err(CheckError::Undefined(what)) => {
            warn!(check = %name, %what, "metric undefined");
            CheckResult::Error {
                name,
                error: CheckError::Undefined(what).to_string(),
            }
        }
    }
}

/// Runs every selected check, in catalogue order.
pub fn run_catalogue(ds: &Dataset, exp: &Expectations, selection: &Selection) -> Vec<CheckResult> {
    catalogue()
        .iter()
        .map(|check| {
            if selection.includes(check) {
                run_check(check, ds, exp)
            } else {
                CheckResult::Skip {
                    name: check.id(),
                    reason: "not selected".to_string(),
                }
            }
        })
        .collect()
}

/// Writes the report as pretty JSON.
pub fn write_report(report: &Report, path: &Path) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
    fs::write(path, json)
        .with_context(|| format!("Failed to write report: {}", path.display()))?;
    debug!(path = %path.display(), "report written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::fixtures::claim;
    use crate::dataset::TableMeta;
    use crate::types::Summary;
    use pretty_assertions::assert_eq;

    fn dataset() -> Dataset {
        Dataset::from_tables(
            vec![
                claim("CA", "6P6002", 1, (1, 1), 1),
                claim("CA", "6P6002", 1, (1, 2), -1),
            ],
            vec![],
            vec![],
            TableMeta::default(),
            TableMeta::default(),
        )
    }

    #[test]
    fn test_unselected_checks_are_skipped() {
        let ds = dataset();
        let exp = Expectations::snapshot_2021().unwrap();
        let selection = Selection {
            areas: vec![Area::Groups],
            filter: Some("top_group".to_string()),
        };

        let results = run_catalogue(&ds, &exp, &selection);
        assert_eq!(results.len(), catalogue().len());

        let ran: Vec<&CheckResult> = results.iter().filter(|r| !r.is_skip()).collect();
        assert_eq!(
            ran,
            vec![&CheckResult::Pass {
                name: "groups::top_group_by_volume".to_string(),
                details: "6P6002 with 2 rows".to_string(),
            }]
        );
    }

    #[test]
    fn test_outcomes_map_to_statuses() {
        let ds = dataset();
        let exp = Expectations::snapshot_2021().unwrap();
        let selection = Selection {
            areas: vec![Area::Join, Area::Shape],
            filter: None,
        };

        let results = run_catalogue(&ds, &exp, &selection);
        let by_name = |name: &str| {
            results
                .iter()
                .find(|r| r.name() == name)
                .cloned()
                .unwrap()
        };

        assert!(by_name("shape::claim_row_count").is_fail());
        assert!(by_name("join::drug_no_blank_cells").is_pass());
        assert!(by_name("sentinel::sentinel_total_claims").is_skip());

        let summary = Summary::from_results(&results);
        assert_eq!(
            summary.passed + summary.failed + summary.errors,
            Area::Join.checks().len() + Area::Shape.checks().len()
        );
    }

    #[test]
    fn test_filter_matching_nothing_is_not_success() {
        let ds = dataset();
        let exp = Expectations::snapshot_2021().unwrap();
        let selection = Selection {
            areas: vec![Area::Shape],
            filter: Some("top_group".to_string()),
        };

        let results = run_catalogue(&ds, &exp, &selection);
        assert!(results.iter().all(CheckResult::is_skip));

        let summary = Summary::from_results(&results);
        assert_eq!(summary.skipped, catalogue().len());
        assert!(!summary.is_success());
    }

    #[test]
    fn test_undefined_metric_is_an_error() {
        let ds = Dataset::from_tables(
            vec![],
            vec![],
            vec![],
            TableMeta::default(),
            TableMeta::default(),
        );
        let exp = Expectations::snapshot_2021().unwrap();
        let selection = Selection {
            areas: vec![Area::Distributions],
            filter: Some("adjudication_rate".to_string()),
        };

        let results = run_catalogue(&ds, &exp, &selection);
        let ran: Vec<_> = results.into_iter().filter(|r| !r.is_skip()).collect();
        assert_eq!(
            ran,
            vec![CheckResult::Error {
                name: "distributions::adjudication_rate".to_string(),
                error: "undefined metric: claims has no rows".to_string(),
            }]
        );
    }

    #[test]
    fn test_report_is_written_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let results = vec![CheckResult::Skip {
            name: "mony::claims_order".to_string(),
            reason: "not selected".to_string(),
        }];
        let report = Report {
            claims_file: "Claims_Export.csv".to_string(),
            drugs_file: "Drug_Info.csv".to_string(),
            areas: vec![Area::Mony],
            summary: Summary::from_results(&results),
            elapsed_secs: 0.5,
            results,
        };

        write_report(&report, &path).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["areas"], serde_json::json!(["mony"]));
        assert_eq!(json["summary"]["skipped"], 1);
        assert_eq!(json["results"][0]["status"], "skip");
    }
}
