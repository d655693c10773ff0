//! The batch-reversal event: one state, one month, a block of groups whose
//! claims were all reversed and rebilled the month after.
//!
//! The fully-reversed groups are isolated by their 100% reversal rate. Once
//! they are removed, the rest of the event month must look like any other.

#![allow(clippy::cast_precision_loss)]

use std::collections::BTreeSet;
use std::sync::Arc;

use super::expect::{defined, expect_below, expect_each_within, expect_eq, expect_within};
use super::{Area, Check, CheckOutcome};
use crate::dataset::{Claim, Dataset};
use crate::error::CheckError;
use crate::expectations::{BatchReversalExpectations, Expectations};
use crate::metrics::{count_where, distinct, group_rates, isolate_extreme, rate_pct, tally};

pub const CHECKS: &[Check] = &[
    Check {
        area: Area::BatchReversal,
        name: "event_reversal_rate",
        description: "reversal rate in the event state and month",
        run: event_reversal_rate,
    },
    Check {
        area: Area::BatchReversal,
        name: "event_row_count",
        description: "rows in the event state and month",
        run: event_row_count,
    },
    Check {
        area: Area::BatchReversal,
        name: "event_net_negative",
        description: "net claims in the event are negative",
        run: event_net_negative,
    },
    Check {
        area: Area::BatchReversal,
        name: "full_reversal_group_count",
        description: "groups with every claim reversed",
        run: full_reversal_group_count,
    },
    Check {
        area: Area::BatchReversal,
        name: "full_reversal_rows",
        description: "rows belonging to fully-reversed groups",
        run: full_reversal_rows,
    },
    Check {
        area: Area::BatchReversal,
        name: "full_reversal_zero_incurred",
        description: "fully-reversed groups incurred nothing in the event month",
        run: full_reversal_zero_incurred,
    },
    Check {
        area: Area::BatchReversal,
        name: "full_reversal_groups_single_state",
        description: "fully-reversed groups exist only in the event state",
        run: full_reversal_groups_single_state,
    },
    Check {
        area: Area::BatchReversal,
        name: "remaining_rate_restored",
        description: "removing the fully-reversed groups restores the normal rate",
        run: remaining_rate_restored,
    },
    Check {
        area: Area::BatchReversal,
        name: "rebill_pattern",
        description: "normal month before, full reversal, elevated rebill after",
        run: rebill_pattern,
    },
    Check {
        area: Area::BatchReversal,
        name: "state_normal_outside_event",
        description: "the event state is normal in every other month",
        run: state_normal_outside_event,
    },
];

/// Rows in the event state and month.
fn event_rows<'a>(ds: &'a Dataset, b: &BatchReversalExpectations) -> Vec<&'a Claim> {
    ds.claims()
        .iter()
        .map(Arc::as_ref)
        .filter(|c| c.pharmacy_state == b.state && c.month == b.month)
        .collect()
}

/// Groups whose event-month claims were all reversals.
fn full_reversal_groups<'a>(event: &[&'a Claim]) -> BTreeSet<&'a str> {
    let rates = group_rates(event.iter().copied(), |c| c.group_id.as_str(), Claim::is_reversal);
    isolate_extreme(&rates)
}

fn event_reversal_rate(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let b = &exp.batch_reversal;
    let rate = defined("event", rate_pct(event_rows(ds, b), Claim::is_reversal))?;
    expect_within(
        &format!("{} month {} reversal rate %", b.state, b.month),
        rate,
        b.reversal_rate,
    )?;
    Ok(format!("{rate:.2}% reversed"))
}

fn event_row_count(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let b = &exp.batch_reversal;
    let rows = event_rows(ds, b).len();
    expect_eq(&format!("{} month {} rows", b.state, b.month), rows, b.rows)?;
    Ok(format!("{rows} rows"))
}

fn event_net_negative(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let b = &exp.batch_reversal;
    let net: i64 = event_rows(ds, b)
        .iter()
        .map(|c| i64::from(c.net_claim_count))
        .sum();
    expect_eq(&format!("{} month {} net claims", b.state, b.month), net, b.net_claims)?;
    Ok(format!("net {net}"))
}

fn full_reversal_group_count(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let b = &exp.batch_reversal;
    let groups = full_reversal_groups(&event_rows(ds, b));
    expect_eq("fully-reversed groups", groups.len(), b.full_reversal_groups)?;
    Ok(format!("{} groups at 100% reversal", groups.len()))
}

fn full_reversal_rows(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let b = &exp.batch_reversal;
    let event = event_rows(ds, b);
    let groups = full_reversal_groups(&event);
    let rows = count_where(event.iter().copied(), |c| groups.contains(c.group_id.as_str()));
    expect_eq("fully-reversed group rows", rows, b.full_reversal_rows)?;
    Ok(format!("{rows} rows"))
}

fn full_reversal_zero_incurred(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let b = &exp.batch_reversal;
    let event = event_rows(ds, b);
    let groups = full_reversal_groups(&event);
    if groups.is_empty() {
        return Err(CheckError::undefined("no fully-reversed groups"));
    }

    let incurred = count_where(event.iter().copied(), |c| {
        groups.contains(c.group_id.as_str()) && c.is_incurred()
    });
    expect_eq("incurred rows in fully-reversed groups", incurred, 0)?;
    Ok(format!("0 incurred across {} groups", groups.len()))
}

fn full_reversal_groups_single_state(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let b = &exp.batch_reversal;
    let groups = full_reversal_groups(&event_rows(ds, b));

    for group in &groups {
        let states = distinct(
            ds.claims().iter().filter(|c| c.group_id == *group),
            |c| c.pharmacy_state.as_str(),
        );
        if states.len() != 1 || !states.contains(b.state.as_str()) {
            return Err(CheckError::assertion(format!(
                "group {group} appears in states {:?}",
                states.into_iter().collect::<BTreeSet<_>>()
            )));
        }
    }
    Ok(format!("{} groups only in {}", groups.len(), b.state))
}

fn remaining_rate_restored(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let b = &exp.batch_reversal;
    let event = event_rows(ds, b);
    let groups = full_reversal_groups(&event);

    let remaining = event
        .iter()
        .copied()
        .filter(|c| !groups.contains(c.group_id.as_str()));
    let rate = defined("remaining event rows", rate_pct(remaining, Claim::is_reversal))?;
    expect_within("remaining reversal rate %", rate, b.remaining_rate)?;
    Ok(format!(
        "{rate:.2}% reversed after removing {} groups",
        groups.len()
    ))
}

fn rebill_pattern(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let b = &exp.batch_reversal;
    let (before, after) = (b.month.saturating_sub(1), b.month + 1);

    for group in &b.rebill_groups {
        let rows: Vec<&Claim> = ds
            .claims()
            .iter()
            .map(Arc::as_ref)
            .filter(|c| c.group_id == *group && c.pharmacy_state == b.state)
            .collect();
        let month =
            |m: u32| tally(rows.iter().copied().filter(|c| c.month == m), Claim::is_reversal);
        let (prior, event, rebill) = (month(before), month(b.month), month(after));

        let prior_rate = defined(&format!("{group} month {before}"), prior.pct())?;
        expect_below(
            &format!("{group} month {before} reversal rate %"),
            prior_rate,
            b.prior_month_max_rate,
        )?;

        if !event.is_total() {
            return Err(CheckError::assertion(format!(
                "{group} month {} reversal rate {:.1}%, expected 100%",
                b.month,
                event.pct().unwrap_or_default()
            )));
        }

        let floor = prior.total as f64 * b.rebill_min_volume_ratio;
        let rebilled = rebill.total as f64;
        if rebilled <= floor {
            return Err(CheckError::assertion(format!(
                "{group} month {after} has {} rows, not above {floor:.0}",
                rebill.total
            )));
        }
    }
    Ok(format!("{} groups rebilled in month {after}", b.rebill_groups.len()))
}

fn state_normal_outside_event(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let b = &exp.batch_reversal;
    let rates = group_rates(
        ds.claims()
            .iter()
            .filter(|c| c.pharmacy_state == b.state && c.month != b.month),
        |c| c.month,
        |c| c.is_reversal(),
    );
    let rates: Vec<(String, f64)> = rates
        .into_iter()
        .filter_map(|(m, t)| t.pct().map(|p| (format!("month {m}"), p)))
        .collect();

    expect_each_within(
        &format!("{} reversal rate %", b.state),
        rates.iter().map(|(k, v)| (k, *v)),
        b.other_months_rate,
    )?;
    Ok(format!("{} other months within {}", rates.len(), b.other_months_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::fixtures::claim;
    use crate::dataset::TableMeta;
    use pretty_assertions::assert_eq;

    /// Two fully-reversed groups (10 rows) and a normal group with one
    /// reversal in ten.
    fn dataset() -> Dataset {
        let mut claims = Vec::new();
        for day in 1..=5 {
            claims.push(claim("KS", "400127", 1, (8, day), -1));
            claims.push(claim("KS", "400132", 1, (8, day), -1));
        }
        for day in 1..=10 {
            let net = if day == 1 { -1 } else { 1 };
            claims.push(claim("KS", "400200", 1, (8, day), net));
        }
        claims.push(claim("CA", "6P6002", 1, (8, 1), 1));
        Dataset::from_tables(claims, vec![], vec![], TableMeta::default(), TableMeta::default())
    }

    fn expectations() -> Expectations {
        let mut exp = Expectations::snapshot_2021().unwrap();
        exp.batch_reversal.full_reversal_groups = 2;
        exp.batch_reversal.full_reversal_rows = 10;
        exp.batch_reversal.rows = 20;
        exp.batch_reversal.net_claims = -10 + 8;
        exp
    }

    #[test]
    fn test_isolation_finds_fully_reversed_groups() {
        let ds = dataset();
        let b = &expectations().batch_reversal;
        let groups = full_reversal_groups(&event_rows(&ds, b));
        assert_eq!(groups.into_iter().collect::<Vec<_>>(), vec!["400127", "400132"]);
    }

    #[test]
    fn test_isolated_subset_properties() {
        let ds = dataset();
        let exp = expectations();
        assert!(full_reversal_group_count(&ds, &exp).is_ok());
        assert!(full_reversal_rows(&ds, &exp).is_ok());
        assert!(full_reversal_zero_incurred(&ds, &exp).is_ok());
        assert!(full_reversal_groups_single_state(&ds, &exp).is_ok());
        assert!(event_row_count(&ds, &exp).is_ok());
        assert!(event_net_negative(&ds, &exp).is_ok());
    }

    #[test]
    fn test_removing_isolated_groups_restores_rate() {
        let ds = dataset();
        let exp = expectations();
        // The remaining group reverses 1 in 10.
        assert_eq!(
            remaining_rate_restored(&ds, &exp).unwrap(),
            "10.00% reversed after removing 2 groups"
        );
    }

    #[test]
    fn test_rebill_pattern_requires_full_reversal() {
        let mut claims = Vec::new();
        for day in 1..=10 {
            claims.push(claim("KS", "400127", 1, (7, day), 1));
        }
        for day in 1..=5 {
            claims.push(claim("KS", "400127", 1, (8, day), -1));
        }
        for day in 1..=14 {
            claims.push(claim("KS", "400127", 1, (9, day), 1));
        }
        let table = |claims: Vec<Claim>| {
            Dataset::from_tables(claims, vec![], vec![], TableMeta::default(), TableMeta::default())
        };
        let mut exp = expectations();
        exp.batch_reversal.rebill_groups = vec!["400127".to_string()];

        assert!(rebill_pattern(&table(claims.clone()), &exp).is_ok());

        // 13 rows is not above 10 * 1.3.
        claims.pop();
        let ds = table(claims);
        assert!(matches!(rebill_pattern(&ds, &exp), Err(CheckError::Assertion(_))));
    }
}
