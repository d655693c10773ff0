//! Expected metric values for one dataset snapshot.
//!
//! The literals and tolerance bands are data, not code: they are read from a
//! YAML file so a new snapshot can be validated after re-deriving them. The
//! 2021 snapshot ships embedded in the binary.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::dataset::{Formulary, Mony};
use crate::error::ExpectationsError;

const SNAPSHOT_2021: &str = include_str!("../expectations/claims_2021.yaml");

/// Inclusive interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub min: f64,
    pub max: f64,
}

impl Band {
    #[inline]
    pub fn contains(self, value: f64) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

/// Structure and integrity of the claims export.
#[derive(Debug, Clone, Deserialize)]
pub struct ShapeExpectations {
    pub claim_rows: usize,
    pub columns: Vec<String>,
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
    pub distinct_days: usize,
    pub incurred_rows: usize,
    pub reversed_rows: usize,
    pub channel: String,
    pub distinct_ndcs: usize,
    pub distinct_groups: usize,
    pub states: Vec<String>,
    pub formularies: Vec<Formulary>,
    pub days_supply_min: u32,
    pub days_supply_max: u32,
}

/// Column distributions.
#[derive(Debug, Clone, Deserialize)]
pub struct DistributionExpectations {
    pub adjudication_rate: Band,
    /// Band every state and formulary must fall in.
    pub adjudication_by_group: Band,
    pub real_reversal_rate: Band,
    pub max_formulary_reversal_spread: f64,
    pub state_order: Vec<String>,
    pub formulary_order: Vec<Formulary>,
    pub days_supply_top: Vec<u32>,
    pub short_supply_max_days: u32,
    pub short_supply_min_pct: f64,
    pub cycle_fill_months: Vec<u32>,
    pub cycle_fill_ratio: Band,
}

/// Group identifier characteristics.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupExpectations {
    pub top_group: String,
    pub batch_groups: Vec<String>,
    pub batch_annual_min_rate: f64,
    pub batch_month: u32,
    pub batch_excluding_month_rate: Band,
    pub dip_month: u32,
    pub max_claims_of_groups_missing_in_dip: usize,
}

/// Claims-to-reference join coverage.
#[derive(Debug, Clone, Deserialize)]
pub struct JoinExpectations {
    pub matched_ndcs: usize,
    pub unmatched_ndcs: usize,
    pub unmatched_rows: usize,
    pub min_match_pct: f64,
    pub drug_rows: usize,
}

/// The planted synthetic drug.
#[derive(Debug, Clone, Deserialize)]
pub struct SentinelExpectations {
    pub ndc: u64,
    pub rows: usize,
    pub share_of_dataset: Band,
    pub month: u32,
    pub month_rows: usize,
    pub month_min_pct: f64,
    pub month_rows_without_sentinel: usize,
    pub drug_name: String,
    pub manufacturer: String,
    pub mony: Mony,
    pub label_contains: String,
    pub max_state_share_diff: f64,
    pub reversal_rate: Band,
    pub manufacturer_ndcs: usize,
}

/// The state/month batch-reversal event.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchReversalExpectations {
    pub state: String,
    pub month: u32,
    pub reversal_rate: Band,
    pub rows: usize,
    pub net_claims: i64,
    pub full_reversal_groups: usize,
    pub full_reversal_rows: usize,
    pub remaining_rate: Band,
    pub rebill_groups: Vec<String>,
    pub prior_month_max_rate: f64,
    pub rebill_min_volume_ratio: f64,
    pub other_months_rate: Band,
}

/// Monthly volume spike and dip against the normal-month baseline.
#[derive(Debug, Clone, Deserialize)]
pub struct MonthlyExpectations {
    pub real_rows: usize,
    /// Months left out of the baseline average.
    pub anomalous_months: Vec<u32>,
    pub spike_month: u32,
    pub spike_pct: Band,
    pub spike_slice_pct: Band,
    pub spike_days: usize,
    pub dip_month: u32,
    pub dip_pct: Band,
    pub dip_slice_pct: Band,
    pub dip_days: usize,
}

/// MONY classification mix.
#[derive(Debug, Clone, Deserialize)]
pub struct MonyExpectations {
    pub claims_share: BTreeMap<Mony, Band>,
    pub claims_order: Vec<Mony>,
    pub reference_share: BTreeMap<Mony, Band>,
    /// Strict upper bounds for codes too rare for a band.
    #[serde(default)]
    pub reference_max_pct: BTreeMap<Mony, f64>,
    pub reversal_rate: Band,
}

/// Every expectation for one snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct Expectations {
    pub shape: ShapeExpectations,
    pub distributions: DistributionExpectations,
    pub groups: GroupExpectations,
    pub join: JoinExpectations,
    pub sentinel: SentinelExpectations,
    pub batch_reversal: BatchReversalExpectations,
    pub monthly: MonthlyExpectations,
    pub mony: MonyExpectations,
}

impl Expectations {
    /// The embedded 2021 snapshot.
    pub fn snapshot_2021() -> Result<Self, ExpectationsError> {
        Self::from_yaml(SNAPSHOT_2021)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ExpectationsError> {
        let exp: Self = serde_yaml_ng::from_str(content)?;
        exp.validate()?;
        Ok(exp)
    }

    pub fn from_path(path: &Path) -> Result<Self, ExpectationsError> {
        let content = fs::read_to_string(path).map_err(|source| ExpectationsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Every month must be 1-12, and month lists must not repeat an entry.
    fn validate(&self) -> Result<(), ExpectationsError> {
        let single = [
            ("groups.batch_month", self.groups.batch_month),
            ("groups.dip_month", self.groups.dip_month),
            ("sentinel.month", self.sentinel.month),
            ("batch_reversal.month", self.batch_reversal.month),
            ("monthly.spike_month", self.monthly.spike_month),
            ("monthly.dip_month", self.monthly.dip_month),
        ];
        for (field, month) in single {
            calendar_month(field, month)?;
        }

        let lists = [
            ("distributions.cycle_fill_months", &self.distributions.cycle_fill_months),
            ("monthly.anomalous_months", &self.monthly.anomalous_months),
        ];
        for (field, months) in lists {
            let mut seen = BTreeSet::new();
            for &month in months {
                calendar_month(field, month)?;
                if !seen.insert(month) {
                    return Err(ExpectationsError::DuplicateMonth { field, month });
                }
            }
        }
        Ok(())
    }
}

fn calendar_month(field: &'static str, month: u32) -> Result<(), ExpectationsError> {
    if (1..=12).contains(&month) {
        Ok(())
    } else {
        Err(ExpectationsError::MonthOutOfRange { field, month })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_snapshot_parses() {
        let exp = Expectations::snapshot_2021().unwrap();
        assert_eq!(exp.shape.claim_rows, 596_090);
        assert_eq!(exp.sentinel.ndc, 65_862_020_190);
        assert_eq!(exp.sentinel.mony, Mony::SingleSourceBrand);
        assert_eq!(
            exp.shape.formularies,
            vec![Formulary::Open, Formulary::Managed, Formulary::Hmf]
        );
        assert_eq!(exp.groups.batch_groups, vec!["400127", "400132"]);
        assert_eq!(exp.monthly.anomalous_months, vec![5, 9, 11]);
    }

    #[test]
    fn test_snapshot_mony_keys() {
        let exp = Expectations::snapshot_2021().unwrap();
        assert_eq!(exp.mony.claims_share.len(), 4);
        assert_eq!(
            exp.mony.claims_order,
            vec![
                Mony::SingleSourceGeneric,
                Mony::SingleSourceBrand,
                Mony::MultiSourceGeneric,
                Mony::MultiSourceBrand
            ]
        );
        assert!(exp.mony.reference_max_pct.contains_key(&Mony::MultiSourceBrand));
    }

    #[test]
    fn test_band_is_inclusive() {
        let band = Band {
            min: 25.0,
            max: 25.2,
        };
        assert!(band.contains(25.0));
        assert!(band.contains(25.2));
        assert!(!band.contains(25.21));
        assert_eq!(band.to_string(), "[25, 25.2]");
    }

    #[test]
    fn test_missing_section_is_rejected() {
        let err = Expectations::from_yaml("shape: {}\n").unwrap_err();
        assert!(matches!(err, ExpectationsError::Parse(_)));
    }

    #[test]
    fn test_repeated_anomalous_month_is_rejected() {
        let yaml = SNAPSHOT_2021.replace(
            "anomalous_months: [5, 9, 11]",
            "anomalous_months: [5, 9, 9, 11]",
        );
        let err = Expectations::from_yaml(&yaml).unwrap_err();
        assert!(matches!(err, ExpectationsError::DuplicateMonth { month: 9, .. }));
        assert_eq!(
            err.to_string(),
            "invalid expectations: monthly.anomalous_months lists month 9 twice"
        );
    }

    #[test]
    fn test_out_of_range_months_are_rejected() {
        let yaml = SNAPSHOT_2021.replace(
            "anomalous_months: [5, 9, 11]",
            "anomalous_months: [5, 9, 13]",
        );
        assert_eq!(
            Expectations::from_yaml(&yaml).unwrap_err().to_string(),
            "invalid expectations: monthly.anomalous_months month 13 is outside 1-12"
        );

        let yaml = SNAPSHOT_2021.replace("spike_month: 9", "spike_month: 0");
        assert_eq!(
            Expectations::from_yaml(&yaml).unwrap_err().to_string(),
            "invalid expectations: monthly.spike_month month 0 is outside 1-12"
        );
    }
}
