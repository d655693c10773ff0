//! Group identifier characteristics.

use std::collections::HashSet;
use std::sync::Arc;

use super::expect::{defined, expect_above, expect_eq, expect_each_within};
use super::{Area, Check, CheckOutcome};
use crate::dataset::{Claim, Dataset};
use crate::error::CheckError;
use crate::expectations::Expectations;
use crate::metrics::{count_where, distinct, multi_valued_keys, rate_pct, value_counts};

pub const CHECKS: &[Check] = &[
    Check {
        area: Area::Groups,
        name: "groups_single_state",
        description: "no group spans more than one state",
        run: groups_single_state,
    },
    Check {
        area: Area::Groups,
        name: "group_count",
        description: "number of group identifiers",
        run: group_count,
    },
    Check {
        area: Area::Groups,
        name: "top_group_by_volume",
        description: "highest-volume group",
        run: top_group_by_volume,
    },
    Check {
        area: Area::Groups,
        name: "batch_groups_elevated_annual_rate",
        description: "batch-reversal groups show an elevated annual reversal rate",
        run: batch_groups_elevated_annual_rate,
    },
    Check {
        area: Area::Groups,
        name: "batch_groups_normal_excluding_event_month",
        description: "batch-reversal groups are normal outside the event month",
        run: batch_groups_normal_excluding_event_month,
    },
    Check {
        area: Area::Groups,
        name: "dip_month_missing_groups_immaterial",
        description: "groups absent from the dip month carry negligible volume",
        run: dip_month_missing_groups_immaterial,
    },
];

fn groups_single_state(ds: &Dataset, _exp: &Expectations) -> CheckOutcome {
    let spanning = multi_valued_keys(
        ds.claims(),
        |c| c.group_id.as_str(),
        |c| c.pharmacy_state.as_str(),
    );
    if !spanning.is_empty() {
        return Err(CheckError::assertion(format!(
            "groups in multiple states: {spanning:?}"
        )));
    }
    Ok("every group maps to one state".to_string())
}

fn group_count(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let groups = distinct(ds.claims(), |c| c.group_id.as_str()).len();
    expect_eq("group count", groups, exp.shape.distinct_groups)?;
    Ok(format!("{groups} groups"))
}

fn top_group_by_volume(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let counts = value_counts(ds.claims(), |c| c.group_id.as_str());
    let (top, rows) = defined("claims", counts.first().copied())?;
    expect_eq("top group", top, exp.groups.top_group.as_str())?;
    Ok(format!("{top} with {rows} rows"))
}

fn group_reversal_rate<'a>(
    rows: impl IntoIterator<Item = &'a Claim>,
    group: &str,
) -> Result<f64, CheckError> {
    let rate = rate_pct(
        rows.into_iter().filter(|c| c.group_id == group),
        Claim::is_reversal,
    );
    defined(&format!("group {group}"), rate)
}

fn batch_groups_elevated_annual_rate(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let mut found = Vec::new();
    for group in &exp.groups.batch_groups {
        let rate = group_reversal_rate(ds.claims().iter().map(Arc::as_ref), group)?;
        expect_above(
            &format!("{group} annual reversal rate %"),
            rate,
            exp.groups.batch_annual_min_rate,
        )?;
        found.push(format!("{group}={rate:.1}%"));
    }
    Ok(found.join(", "))
}

fn batch_groups_normal_excluding_event_month(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let month = exp.groups.batch_month;
    let outside = || {
        ds.claims()
            .iter()
            .map(Arc::as_ref)
            .filter(move |c| c.month != month)
    };

    let rates = exp
        .groups
        .batch_groups
        .iter()
        .map(|group| Ok((group.as_str(), group_reversal_rate(outside(), group)?)))
        .collect::<Result<Vec<_>, CheckError>>()?;

    expect_each_within(
        &format!("reversal rate % excluding month {month}"),
        rates.iter().copied(),
        exp.groups.batch_excluding_month_rate,
    )?;
    Ok(rates
        .iter()
        .map(|(g, r)| format!("{g}={r:.1}%"))
        .collect::<Vec<_>>()
        .join(", "))
}

fn dip_month_missing_groups_immaterial(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let month = exp.groups.dip_month;
    let all = distinct(ds.claims(), |c| c.group_id.as_str());
    let present: HashSet<&str> = distinct(
        ds.claims().iter().filter(|c| c.month == month),
        |c| c.group_id.as_str(),
    );
    let missing: HashSet<&str> = all.difference(&present).copied().collect();

    let claims = count_where(ds.claims(), |c| missing.contains(c.group_id.as_str()));
    if claims >= exp.groups.max_claims_of_groups_missing_in_dip {
        return Err(CheckError::assertion(format!(
            "groups missing from month {month} have {claims} claims"
        )));
    }
    Ok(format!("{} groups missing, {claims} claims", missing.len()))
}
