//! The synthetic test drug planted in the export.
//!
//! The sentinel NDC accounts for a large block of claims concentrated in one
//! month. Excluding it leaves that month almost empty, which is how the
//! "fake month" was found.

#![allow(clippy::cast_precision_loss)]

use std::collections::BTreeMap;
use std::sync::Arc;

use super::expect::{defined, expect_above, expect_eq, expect_within};
use super::{Area, Check, CheckOutcome};
use crate::dataset::{Claim, Dataset};
use crate::error::CheckError;
use crate::expectations::Expectations;
use crate::metrics::{count_where, group_counts, pct, rate_pct};

pub const CHECKS: &[Check] = &[
    Check {
        area: Area::Sentinel,
        name: "sentinel_total_claims",
        description: "claims carrying the sentinel NDC",
        run: sentinel_total_claims,
    },
    Check {
        area: Area::Sentinel,
        name: "sentinel_share_of_dataset",
        description: "sentinel share of all claims",
        run: sentinel_share_of_dataset,
    },
    Check {
        area: Area::Sentinel,
        name: "sentinel_month_concentration",
        description: "sentinel claims sit almost entirely in one month",
        run: sentinel_month_concentration,
    },
    Check {
        area: Area::Sentinel,
        name: "sentinel_month_empty_without_sentinel",
        description: "the sentinel month is nearly empty once flagged NDCs are excluded",
        run: sentinel_month_empty_without_sentinel,
    },
    Check {
        area: Area::Sentinel,
        name: "sentinel_reference_record",
        description: "the sentinel's fictional reference record",
        run: sentinel_reference_record,
    },
    Check {
        area: Area::Sentinel,
        name: "sentinel_mirrors_state_mix",
        description: "sentinel state mix mirrors the whole dataset",
        run: sentinel_mirrors_state_mix,
    },
    Check {
        area: Area::Sentinel,
        name: "sentinel_reversal_rate",
        description: "sentinel reversal rate is unremarkable",
        run: sentinel_reversal_rate,
    },
    Check {
        area: Area::Sentinel,
        name: "sentinel_manufacturer_single_ndc",
        description: "the fictional manufacturer has a single NDC",
        run: sentinel_manufacturer_single_ndc,
    },
];

fn sentinel_rows<'a>(ds: &'a Dataset, exp: &Expectations) -> Vec<&'a Claim> {
    let ndc = exp.sentinel.ndc;
    ds.claims()
        .iter()
        .map(Arc::as_ref)
        .filter(|c| c.ndc == ndc)
        .collect()
}

fn sentinel_total_claims(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let rows = sentinel_rows(ds, exp).len();
    expect_eq("sentinel rows", rows, exp.sentinel.rows)?;
    Ok(format!("{rows} rows for NDC {}", exp.sentinel.ndc))
}

fn sentinel_share_of_dataset(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let rows = sentinel_rows(ds, exp).len();
    let share = defined("claims", pct(rows, ds.claims().len()))?;
    expect_within("sentinel share %", share, exp.sentinel.share_of_dataset)?;
    Ok(format!("{share:.2}% of claims"))
}

fn sentinel_month_concentration(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let rows = sentinel_rows(ds, exp);
    let month = exp.sentinel.month;
    let in_month = count_where(rows.iter().copied(), |c| c.month == month);

    expect_eq(
        &format!("sentinel rows in month {month}"),
        in_month,
        exp.sentinel.month_rows,
    )?;
    let share = defined("sentinel", pct(in_month, rows.len()))?;
    expect_above("sentinel month concentration %", share, exp.sentinel.month_min_pct)?;
    Ok(format!("{share:.2}% in month {month}"))
}

fn sentinel_month_empty_without_sentinel(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let month = exp.sentinel.month;
    let rows = count_where(ds.real_claims(), |c| c.month == month);
    expect_eq(
        &format!("real rows in month {month}"),
        rows,
        exp.sentinel.month_rows_without_sentinel,
    )?;
    Ok(format!("{rows} real rows in month {month}"))
}

fn sentinel_reference_record(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let s = &exp.sentinel;
    let records: Vec<_> = ds.drugs().iter().filter(|d| d.ndc == s.ndc).collect();
    expect_eq("sentinel reference rows", records.len(), 1)?;

    let drug = records[0];
    expect_eq("sentinel drug name", drug.drug_name.as_str(), s.drug_name.as_str())?;
    expect_eq(
        "sentinel manufacturer",
        drug.manufacturer_name.as_str(),
        s.manufacturer.as_str(),
    )?;
    expect_eq("sentinel MONY", drug.mony, s.mony)?;
    if !drug.label_name.contains(&s.label_contains) {
        return Err(CheckError::assertion(format!(
            "sentinel label {:?} does not mention {:?}",
            drug.label_name, s.label_contains
        )));
    }
    Ok(format!("{} by {}", drug.drug_name, drug.manufacturer_name))
}

fn state_shares<'a>(rows: impl IntoIterator<Item = &'a Claim>) -> BTreeMap<&'a str, f64> {
    let counts = group_counts(rows, |c| c.pharmacy_state.as_str());
    let total: usize = counts.values().sum();
    counts
        .into_iter()
        .map(|(state, n)| (state, n as f64 / total as f64 * 100.0))
        .collect()
}

fn sentinel_mirrors_state_mix(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let overall = state_shares(ds.claims().iter().map(Arc::as_ref));
    let sentinel = state_shares(sentinel_rows(ds, exp));
    if sentinel.is_empty() {
        return Err(CheckError::undefined("sentinel has no rows"));
    }

    let max_diff = exp.sentinel.max_state_share_diff;
    let mut widest = 0.0_f64;
    for (state, share) in &overall {
        let other = sentinel.get(state).copied().unwrap_or(0.0);
        let diff = (share - other).abs();
        if diff >= max_diff {
            return Err(CheckError::assertion(format!(
                "{state}: overall {share:.1}% vs sentinel {other:.1}%"
            )));
        }
        widest = widest.max(diff);
    }
    Ok(format!("largest state share gap {widest:.2}pp"))
}

fn sentinel_reversal_rate(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let rate = defined(
        "sentinel",
        rate_pct(sentinel_rows(ds, exp), Claim::is_reversal),
    )?;
    expect_within("sentinel reversal rate %", rate, exp.sentinel.reversal_rate)?;
    Ok(format!("{rate:.2}% reversed"))
}

fn sentinel_manufacturer_single_ndc(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let manufacturer = exp.sentinel.manufacturer.as_str();
    let ndcs = count_where(ds.drugs(), |d| d.manufacturer_name == manufacturer);
    expect_eq(
        &format!("{manufacturer} reference rows"),
        ndcs,
        exp.sentinel.manufacturer_ndcs,
    )?;
    Ok(format!("{ndcs} NDC from {manufacturer}"))
}
