//! Column distributions: adjudication, reversal, volume and days supply.

#![allow(clippy::cast_precision_loss)]

use std::sync::Arc;

use super::expect::{defined, expect_above, expect_each_within, expect_order, expect_within};
use super::{Area, Check, CheckOutcome};
use crate::dataset::{Claim, Dataset};
use crate::error::CheckError;
use crate::expectations::Expectations;
use crate::metrics::{
    count_where, distinct_days, group_rates, pct, rate_pct, ranked_keys, spread, RateTally,
};

pub const CHECKS: &[Check] = &[
    Check {
        area: Area::Distributions,
        name: "adjudication_rate",
        description: "overall adjudication rate",
        run: adjudication_rate,
    },
    Check {
        area: Area::Distributions,
        name: "adjudication_uniform_by_state",
        description: "adjudication rate is the same in every state",
        run: adjudication_uniform_by_state,
    },
    Check {
        area: Area::Distributions,
        name: "adjudication_uniform_by_formulary",
        description: "adjudication rate is the same for every formulary",
        run: adjudication_uniform_by_formulary,
    },
    Check {
        area: Area::Distributions,
        name: "real_reversal_rate",
        description: "reversal rate with flagged NDCs excluded",
        run: real_reversal_rate,
    },
    Check {
        area: Area::Distributions,
        name: "reversal_uniform_by_formulary",
        description: "reversal rates barely differ across formularies",
        run: reversal_uniform_by_formulary,
    },
    Check {
        area: Area::Distributions,
        name: "state_volume_order",
        description: "states ranked by claim volume",
        run: state_volume_order,
    },
    Check {
        area: Area::Distributions,
        name: "formulary_volume_order",
        description: "formularies ranked by claim volume",
        run: formulary_volume_order,
    },
    Check {
        area: Area::Distributions,
        name: "days_supply_top_values",
        description: "most common days-supply values",
        run: days_supply_top_values,
    },
    Check {
        area: Area::Distributions,
        name: "short_supply_dominance",
        description: "short supplies dominate",
        run: short_supply_dominance,
    },
    Check {
        area: Area::Distributions,
        name: "first_of_month_cycle_fill",
        description: "day 1 of each real month carries a cycle-fill multiple",
        run: first_of_month_cycle_fill,
    },
];

/// Per-group percentages, failing on any empty group.
fn group_pcts<K: ToString>(
    rates: impl IntoIterator<Item = (K, RateTally)>,
) -> Result<Vec<(String, f64)>, CheckError> {
    rates
        .into_iter()
        .map(|(k, t)| {
            let name = k.to_string();
            let pct = defined(&name, t.pct())?;
            Ok((name, pct))
        })
        .collect()
}

fn adjudication_rate(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let rate = defined("claims", rate_pct(ds.claims(), |c| c.adjudicated))?;
    expect_within("adjudication rate %", rate, exp.distributions.adjudication_rate)?;
    Ok(format!("{rate:.2}% adjudicated"))
}

fn adjudication_uniform_by_state(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let rates = group_pcts(group_rates(
        ds.claims(),
        |c| c.pharmacy_state.as_str(),
        |c| c.adjudicated,
    ))?;
    expect_each_within(
        "state adjudication rate %",
        rates.iter().map(|(k, v)| (k, *v)),
        exp.distributions.adjudication_by_group,
    )?;
    Ok(format!("{} states within {}", rates.len(), exp.distributions.adjudication_by_group))
}

fn adjudication_uniform_by_formulary(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let rates = group_pcts(group_rates(ds.claims(), |c| c.formulary, |c| c.adjudicated))?;
    expect_each_within(
        "formulary adjudication rate %",
        rates.iter().map(|(k, v)| (k, *v)),
        exp.distributions.adjudication_by_group,
    )?;
    Ok(format!(
        "{} formularies within {}",
        rates.len(),
        exp.distributions.adjudication_by_group
    ))
}

fn real_reversal_rate(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let rate = defined("real claims", rate_pct(ds.real_claims(), |c| c.is_reversal()))?;
    expect_within("real reversal rate %", rate, exp.distributions.real_reversal_rate)?;
    Ok(format!("{rate:.2}% reversed"))
}

fn reversal_uniform_by_formulary(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let rates = group_pcts(group_rates(ds.claims(), |c| c.formulary, |c| c.is_reversal()))?;
    let spread = defined("formularies", spread(rates.iter().map(|(_, v)| *v)))?;

    if spread >= exp.distributions.max_formulary_reversal_spread {
        return Err(CheckError::assertion(format!(
            "formulary reversal spread {spread:.3}pp too wide: {rates:?}"
        )));
    }
    Ok(format!("spread {spread:.3}pp"))
}

fn state_volume_order(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let order = ranked_keys(ds.claims(), |c| c.pharmacy_state.clone());
    expect_order("state volume", &order, &exp.distributions.state_order)?;
    Ok(order.join(" > "))
}

fn formulary_volume_order(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let order = ranked_keys(ds.claims(), |c| c.formulary);
    expect_order("formulary volume", &order, &exp.distributions.formulary_order)?;
    Ok(order
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" > "))
}

fn days_supply_top_values(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let expected = &exp.distributions.days_supply_top;
    let top: Vec<u32> = ranked_keys(ds.claims(), |c| c.days_supply)
        .into_iter()
        .take(expected.len())
        .collect();
    expect_order("top days supply", &top, expected)?;
    Ok(format!("top values {top:?}"))
}

fn short_supply_dominance(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let max_days = exp.distributions.short_supply_max_days;
    let short = count_where(ds.claims(), |c| c.days_supply <= max_days);
    let share = defined("claims", pct(short, ds.claims().len()))?;

    expect_above(
        &format!("share of supplies <= {max_days} days %"),
        share,
        exp.distributions.short_supply_min_pct,
    )?;
    Ok(format!("{share:.1}% of claims <= {max_days} days"))
}

fn first_of_month_cycle_fill(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let mut ratios = Vec::with_capacity(exp.distributions.cycle_fill_months.len());

    for &month in &exp.distributions.cycle_fill_months {
        let rows: Vec<&Claim> = ds
            .real_claims()
            .iter()
            .map(Arc::as_ref)
            .filter(|c| c.month == month)
            .collect();
        let day1 = rows.iter().filter(|c| c.day() == 1).count();
        let days = distinct_days(rows.iter().map(|c| c.date_filled));

        let rest_avg = if days > 1 {
            (rows.len() - day1) as f64 / (days - 1) as f64
        } else {
            1.0
        };
        ratios.push((format!("month {month}"), day1 as f64 / rest_avg));
    }

    expect_each_within(
        "day-1 volume ratio",
        ratios.iter().map(|(k, v)| (k, *v)),
        exp.distributions.cycle_fill_ratio,
    )?;

    let (lo, hi) = ratios
        .iter()
        .fold((f64::MAX, f64::MIN), |(lo, hi), (_, r)| (lo.min(*r), hi.max(*r)));
    Ok(format!("day-1 ratios {lo:.1}x-{hi:.1}x"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::fixtures::claim;
    use crate::dataset::{Formulary, TableMeta};
    use crate::expectations::Expectations;
    use pretty_assertions::assert_eq;

    fn dataset(claims: Vec<Claim>) -> Dataset {
        Dataset::from_tables(claims, vec![], vec![], TableMeta::default(), TableMeta::default())
    }

    #[test]
    fn test_cycle_fill_ratio_counts_rest_of_month_average() {
        // Day 1 gets 8 rows, days 2..=5 get 1 each: ratio 8x.
        let mut claims = Vec::new();
        for _ in 0..8 {
            claims.push(claim("CA", "G1", 1, (1, 1), 1));
        }
        for day in 2..=5 {
            claims.push(claim("CA", "G1", 1, (1, day), 1));
        }
        let ds = dataset(claims);

        let mut exp = Expectations::snapshot_2021().unwrap();
        exp.distributions.cycle_fill_months = vec![1];
        let details = first_of_month_cycle_fill(&ds, &exp).unwrap();
        assert_eq!(details, "day-1 ratios 8.0x-8.0x");

        exp.distributions.cycle_fill_ratio.max = 7.5;
        assert!(matches!(
            first_of_month_cycle_fill(&ds, &exp),
            Err(CheckError::Assertion(_))
        ));
    }

    #[test]
    fn test_formulary_order_failure_names_actual_order() {
        let mut claims = vec![claim("CA", "G1", 1, (1, 1), 1); 3];
        claims[0].formulary = Formulary::Hmf;
        claims[1].formulary = Formulary::Hmf;
        let ds = dataset(claims);
        let exp = Expectations::snapshot_2021().unwrap();

        let err = formulary_volume_order(&ds, &exp).unwrap_err().to_string();
        assert!(err.contains("[Hmf, Open]"), "{err}");
    }

    /// Four rows per state, one adjudicated in each unless `ks_adjudicated` says otherwise.
    fn adjudication_dataset(ks_adjudicated: u32) -> Dataset {
        let mut claims = Vec::new();
        for (state, adjudicated) in [("CA", 1), ("KS", ks_adjudicated)] {
            for day in 1..=4 {
                let mut c = claim(state, "G1", 1, (1, day), 1);
                c.adjudicated = day <= adjudicated;
                claims.push(c);
            }
        }
        dataset(claims)
    }

    #[test]
    fn test_adjudication_uniform_by_state() {
        let exp = Expectations::snapshot_2021().unwrap();
        let details = adjudication_uniform_by_state(&adjudication_dataset(1), &exp).unwrap();
        assert!(details.starts_with("2 states within"), "{details}");

        let Err(CheckError::Assertion(reason)) =
            adjudication_uniform_by_state(&adjudication_dataset(2), &exp)
        else {
            panic!("expected a failed assertion");
        };
        assert!(reason.contains("KS"), "{reason}");
        assert!(!reason.contains("CA"), "{reason}");
    }

    #[test]
    fn test_adjudication_uniform_by_formulary() {
        let exp = Expectations::snapshot_2021().unwrap();
        let mut claims: Vec<Claim> = (1..=4).map(|d| claim("CA", "G1", 1, (1, d), 1)).collect();
        claims[0].adjudicated = true;
        let details = adjudication_uniform_by_formulary(&dataset(claims.clone()), &exp).unwrap();
        assert!(details.starts_with("1 formularies within"), "{details}");

        let mut managed = claim("CA", "G1", 1, (1, 5), 1);
        managed.formulary = Formulary::Managed;
        claims.push(managed);
        assert!(matches!(
            adjudication_uniform_by_formulary(&dataset(claims), &exp),
            Err(CheckError::Assertion(_))
        ));
    }

    #[test]
    fn test_reversal_spread_bound_is_strict() {
        let mut exp = Expectations::snapshot_2021().unwrap();
        let mut claims = Vec::new();
        for formulary in [Formulary::Open, Formulary::Managed] {
            for net in [1, -1] {
                let mut c = claim("CA", "G1", 1, (1, 1), net);
                c.formulary = formulary;
                claims.push(c);
            }
        }
        let even = dataset(claims.clone());
        assert_eq!(reversal_uniform_by_formulary(&even, &exp).unwrap(), "spread 0.000pp");

        // MANAGED drops to 0% reversed: a 50pp spread.
        claims[3].net_claim_count = 1;
        let skewed = dataset(claims);
        assert!(reversal_uniform_by_formulary(&skewed, &exp).is_err());

        exp.distributions.max_formulary_reversal_spread = 50.0;
        assert!(matches!(
            reversal_uniform_by_formulary(&skewed, &exp),
            Err(CheckError::Assertion(_))
        ));
        exp.distributions.max_formulary_reversal_spread = 50.1;
        assert_eq!(reversal_uniform_by_formulary(&skewed, &exp).unwrap(), "spread 50.000pp");
    }

    #[test]
    fn test_short_supply_dominance() {
        let mut claims = vec![claim("CA", "G1", 1, (1, 1), 1); 4];
        claims[3].days_supply = 30;
        let ds = dataset(claims);
        let mut exp = Expectations::snapshot_2021().unwrap();

        assert_eq!(short_supply_dominance(&ds, &exp).unwrap(), "75.0% of claims <= 14 days");

        exp.distributions.short_supply_min_pct = 80.0;
        assert!(matches!(
            short_supply_dominance(&ds, &exp),
            Err(CheckError::Assertion(_))
        ));
    }

    #[test]
    fn test_short_supply_over_no_claims_is_undefined() {
        let exp = Expectations::snapshot_2021().unwrap();
        assert!(matches!(
            short_supply_dominance(&dataset(vec![]), &exp),
            Err(CheckError::Undefined(_))
        ));
    }
}
