//! Monthly volume patterns measured on the real claims view.
//!
//! The baseline is the mean row count of the normal months: every month except
//! the synthetic one, the spike and the dip. Spike and dip are expressed as a
//! percentage above or below that baseline, overall and per category slice.

use std::sync::Arc;

use super::expect::{defined, expect_each_within, expect_eq, expect_within};
use super::{Area, Check, CheckOutcome};
use crate::dataset::{Claim, Dataset};
use crate::error::CheckError;
use crate::expectations::{Band, Expectations};
use crate::metrics::{count_where, distinct_days, Baseline};

pub const CHECKS: &[Check] = &[
    Check {
        area: Area::Monthly,
        name: "spike_vs_baseline",
        description: "spike month above the normal-month baseline",
        run: spike_vs_baseline,
    },
    Check {
        area: Area::Monthly,
        name: "spike_uniform_by_state",
        description: "every state spikes by a similar amount",
        run: spike_uniform_by_state,
    },
    Check {
        area: Area::Monthly,
        name: "spike_uniform_by_formulary",
        description: "every formulary spikes by a similar amount",
        run: spike_uniform_by_formulary,
    },
    Check {
        area: Area::Monthly,
        name: "dip_vs_baseline",
        description: "dip month below the normal-month baseline",
        run: dip_vs_baseline,
    },
    Check {
        area: Area::Monthly,
        name: "dip_uniform_by_state",
        description: "every state dips by a similar amount",
        run: dip_uniform_by_state,
    },
    Check {
        area: Area::Monthly,
        name: "dip_all_days_present",
        description: "the dip month has claims every day",
        run: dip_all_days_present,
    },
    Check {
        area: Area::Monthly,
        name: "spike_all_days_present",
        description: "the spike month has claims every day",
        run: spike_all_days_present,
    },
    Check {
        area: Area::Monthly,
        name: "real_claim_count",
        description: "rows left after excluding flagged NDCs",
        run: real_claim_count,
    },
];

#[derive(Clone, Copy)]
enum Direction {
    Above,
    Below,
}

/// Percent above (or below) the baseline for `month` within `rows`, with the
/// baseline it was measured against.
fn vs_baseline(
    rows: &[&Claim],
    month: u32,
    anomalous: &[u32],
    direction: Direction,
) -> Result<(f64, Baseline), CheckError> {
    let baseline = defined(
        "normal months",
        Baseline::from_months(rows.iter().copied(), |c| c.month, anomalous),
    )?;
    let count = count_where(rows.iter().copied(), |c| c.month == month);
    let pct = match direction {
        Direction::Above => baseline.pct_above(count),
        Direction::Below => baseline.pct_below(count),
    };
    Ok((pct, baseline))
}

/// Checks each slice of the real view against `band`.
fn slices_vs_baseline<K: ToString>(
    ds: &Dataset,
    exp: &Expectations,
    slices: impl IntoIterator<Item = K>,
    slice_of: impl Fn(&Claim, &K) -> bool,
    month: u32,
    direction: Direction,
    band: Band,
) -> CheckOutcome {
    let anomalous = &exp.monthly.anomalous_months;
    let mut pcts = Vec::new();

    for slice in slices {
        let rows: Vec<&Claim> = ds
            .real_claims()
            .iter()
            .map(Arc::as_ref)
            .filter(|c| slice_of(*c, &slice))
            .collect();
        let name = slice.to_string();
        let (pct, _) = vs_baseline(&rows, month, anomalous, direction)
            .map_err(|_| CheckError::undefined(format!("{name} has no normal-month rows")))?;
        pcts.push((name, pct));
    }

    expect_each_within(
        &format!("month {month} % vs baseline"),
        pcts.iter().map(|(k, v)| (k, *v)),
        band,
    )?;
    Ok(pcts
        .iter()
        .map(|(k, v)| format!("{k} {v:.1}%"))
        .collect::<Vec<_>>()
        .join(", "))
}

fn real_rows(ds: &Dataset) -> Vec<&Claim> {
    ds.real_claims().iter().map(Arc::as_ref).collect()
}

fn spike_vs_baseline(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let m = &exp.monthly;
    let (pct, baseline) =
        vs_baseline(&real_rows(ds), m.spike_month, &m.anomalous_months, Direction::Above)?;
    expect_within(&format!("month {} spike %", m.spike_month), pct, m.spike_pct)?;
    Ok(format!("+{pct:.1}% vs {}-month baseline", baseline.months))
}

fn spike_uniform_by_state(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    slices_vs_baseline(
        ds,
        exp,
        exp.shape.states.iter(),
        |c, state| c.pharmacy_state == **state,
        exp.monthly.spike_month,
        Direction::Above,
        exp.monthly.spike_slice_pct,
    )
}

fn spike_uniform_by_formulary(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    slices_vs_baseline(
        ds,
        exp,
        exp.shape.formularies.iter().copied(),
        |c, formulary| c.formulary == *formulary,
        exp.monthly.spike_month,
        Direction::Above,
        exp.monthly.spike_slice_pct,
    )
}

fn dip_vs_baseline(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let m = &exp.monthly;
    let (pct, baseline) =
        vs_baseline(&real_rows(ds), m.dip_month, &m.anomalous_months, Direction::Below)?;
    expect_within(&format!("month {} dip %", m.dip_month), pct, m.dip_pct)?;
    Ok(format!("-{pct:.1}% vs {}-month baseline", baseline.months))
}

fn dip_uniform_by_state(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    slices_vs_baseline(
        ds,
        exp,
        exp.shape.states.iter(),
        |c, state| c.pharmacy_state == **state,
        exp.monthly.dip_month,
        Direction::Below,
        exp.monthly.dip_slice_pct,
    )
}

fn days_in_month(ds: &Dataset, month: u32) -> usize {
    distinct_days(
        ds.real_claims()
            .iter()
            .filter(|c| c.month == month)
            .map(|c| c.date_filled),
    )
}

fn dip_all_days_present(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let days = days_in_month(ds, exp.monthly.dip_month);
    expect_eq(
        &format!("days with claims in month {}", exp.monthly.dip_month),
        days,
        exp.monthly.dip_days,
    )?;
    Ok(format!("{days} days"))
}

fn spike_all_days_present(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let days = days_in_month(ds, exp.monthly.spike_month);
    expect_eq(
        &format!("days with claims in month {}", exp.monthly.spike_month),
        days,
        exp.monthly.spike_days,
    )?;
    Ok(format!("{days} days"))
}

fn real_claim_count(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let rows = ds.real_claims().len();
    expect_eq("real claim rows", rows, exp.monthly.real_rows)?;
    Ok(format!("{rows} rows"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::fixtures::claim;
    use crate::dataset::{Formulary, TableMeta};
    use pretty_assertions::assert_eq;

    /// Ten rows per normal month per state, 14 in the spike, 5 in the dip.
    fn dataset() -> Dataset {
        let mut claims = Vec::new();
        for state in ["CA", "KS"] {
            for month in 1..=12 {
                let n = match month {
                    5 => 0,
                    9 => 14,
                    11 => 5,
                    _ => 10,
                };
                for day in 1..=n {
                    claims.push(claim(state, "G1", 1, (month, day), 1));
                }
            }
        }
        Dataset::from_tables(claims, vec![], vec![], TableMeta::default(), TableMeta::default())
    }

    #[test]
    fn test_spike_and_dip_against_baseline() {
        let ds = dataset();
        let mut exp = Expectations::snapshot_2021().unwrap();
        exp.monthly.spike_pct = Band {
            min: 39.9,
            max: 40.1,
        };
        exp.monthly.dip_pct = Band {
            min: 49.9,
            max: 50.1,
        };

        assert_eq!(spike_vs_baseline(&ds, &exp).unwrap(), "+40.0% vs 9-month baseline");
        assert_eq!(dip_vs_baseline(&ds, &exp).unwrap(), "-50.0% vs 9-month baseline");
    }

    #[test]
    fn test_baseline_label_counts_months_actually_averaged() {
        let ds = dataset();
        let mut exp = Expectations::snapshot_2021().unwrap();
        exp.monthly.spike_pct = Band {
            min: 39.9,
            max: 40.1,
        };

        // A repeated month is excluded once, so nine months remain.
        exp.monthly.anomalous_months = vec![5, 9, 9, 11];
        assert_eq!(spike_vs_baseline(&ds, &exp).unwrap(), "+40.0% vs 9-month baseline");

        // November back in the baseline: 190 rows over ten months.
        exp.monthly.anomalous_months = vec![5, 9];
        exp.monthly.spike_pct = Band {
            min: 47.3,
            max: 47.4,
        };
        assert_eq!(spike_vs_baseline(&ds, &exp).unwrap(), "+47.4% vs 10-month baseline");
    }

    #[test]
    fn test_spike_outside_band_fails() {
        let ds = dataset();
        let mut exp = Expectations::snapshot_2021().unwrap();
        exp.monthly.spike_pct = Band {
            min: 41.0,
            max: 43.0,
        };
        assert!(matches!(
            spike_vs_baseline(&ds, &exp),
            Err(CheckError::Assertion(_))
        ));
    }

    #[test]
    fn test_state_slices_missing_from_data_are_undefined() {
        let ds = dataset();
        let exp = Expectations::snapshot_2021().unwrap();
        // The snapshot lists five states; the fixture only has two.
        assert!(matches!(
            spike_uniform_by_state(&ds, &exp),
            Err(CheckError::Undefined(_))
        ));
    }

    #[test]
    fn test_state_slices_within_band() {
        let ds = dataset();
        let mut exp = Expectations::snapshot_2021().unwrap();
        exp.shape.states = vec!["CA".to_string(), "KS".to_string()];
        exp.monthly.dip_slice_pct = Band {
            min: 49.0,
            max: 51.0,
        };
        assert_eq!(
            dip_uniform_by_state(&ds, &exp).unwrap(),
            "CA 50.0%, KS 50.0%"
        );
    }

    #[test]
    fn test_formulary_slices() {
        let ds = dataset();
        let mut exp = Expectations::snapshot_2021().unwrap();
        exp.shape.formularies = vec![Formulary::Open];
        exp.monthly.spike_slice_pct = Band {
            min: 39.0,
            max: 41.0,
        };
        assert_eq!(spike_uniform_by_formulary(&ds, &exp).unwrap(), "OPEN 40.0%");

        exp.monthly.spike_slice_pct = Band {
            min: 45.0,
            max: 50.0,
        };
        assert!(matches!(
            spike_uniform_by_formulary(&ds, &exp),
            Err(CheckError::Assertion(_))
        ));
    }

    #[test]
    fn test_formulary_missing_from_data_is_undefined() {
        let ds = dataset();
        let exp = Expectations::snapshot_2021().unwrap();
        // Every fixture row is OPEN.
        assert!(matches!(
            spike_uniform_by_formulary(&ds, &exp),
            Err(CheckError::Undefined(_))
        ));
    }

    #[test]
    fn test_days_present() {
        let ds = dataset();
        let mut exp = Expectations::snapshot_2021().unwrap();
        exp.monthly.dip_days = 5;
        exp.monthly.spike_days = 14;
        assert_eq!(dip_all_days_present(&ds, &exp).unwrap(), "5 days");
        assert_eq!(spike_all_days_present(&ds, &exp).unwrap(), "14 days");
    }

    #[test]
    fn test_missing_days_fail() {
        let ds = dataset();
        let exp = Expectations::snapshot_2021().unwrap();
        let Err(CheckError::Assertion(reason)) = dip_all_days_present(&ds, &exp) else {
            panic!("expected a failed assertion");
        };
        assert!(reason.contains("days with claims in month 11"), "{reason}");
        assert!(spike_all_days_present(&ds, &exp).is_err());
    }
}
