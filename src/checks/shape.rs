//! Basic shape, structure and integrity of the claims export.

use super::expect::{defined, expect_eq, expect_set};
use super::{Area, Check, CheckOutcome};
use crate::dataset::Dataset;
use crate::error::CheckError;
use crate::expectations::Expectations;
use crate::metrics::{count_where, distinct, distinct_days};

pub const CHECKS: &[Check] = &[
    Check {
        area: Area::Shape,
        name: "claim_row_count",
        description: "claims export row count",
        run: claim_row_count,
    },
    Check {
        area: Area::Shape,
        name: "claim_columns",
        description: "all source columns are present",
        run: claim_columns,
    },
    Check {
        area: Area::Shape,
        name: "claim_no_blank_cells",
        description: "no missing values in the claims export",
        run: claim_no_blank_cells,
    },
    Check {
        area: Area::Shape,
        name: "date_range",
        description: "fill dates span exactly the expected year",
        run: date_range,
    },
    Check {
        area: Area::Shape,
        name: "all_days_present",
        description: "every calendar day has claims",
        run: all_days_present,
    },
    Check {
        area: Area::Shape,
        name: "net_claim_count_values",
        description: "net claim count is always +1 or -1",
        run: net_claim_count_values,
    },
    Check {
        area: Area::Shape,
        name: "incurred_and_reversed_counts",
        description: "incurred and reversed row counts",
        run: incurred_and_reversed_counts,
    },
    Check {
        area: Area::Shape,
        name: "channel_all_retail",
        description: "every claim is in the retail channel",
        run: channel_all_retail,
    },
    Check {
        area: Area::Shape,
        name: "distinct_ndcs",
        description: "distinct NDCs in claims",
        run: distinct_ndcs,
    },
    Check {
        area: Area::Shape,
        name: "distinct_groups",
        description: "distinct group identifiers in claims",
        run: distinct_groups,
    },
    Check {
        area: Area::Shape,
        name: "pharmacy_states",
        description: "set of pharmacy states",
        run: pharmacy_states,
    },
    Check {
        area: Area::Shape,
        name: "formulary_types",
        description: "set of formulary types",
        run: formulary_types,
    },
    Check {
        area: Area::Shape,
        name: "days_supply_range",
        description: "days supply bounds",
        run: days_supply_range,
    },
];

fn claim_row_count(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let rows = ds.claims().len();
    expect_eq("claim rows", rows, exp.shape.claim_rows)?;
    Ok(format!("{rows} rows"))
}

fn claim_columns(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let columns = &ds.claims_meta().columns;
    let missing: Vec<&str> = exp
        .shape
        .columns
        .iter()
        .filter(|c| !columns.contains(c))
        .map(String::as_str)
        .collect();

    if !missing.is_empty() {
        return Err(CheckError::assertion(format!(
            "claims export is missing columns {missing:?}"
        )));
    }
    Ok(format!("{} columns", columns.len()))
}

fn claim_no_blank_cells(ds: &Dataset, _exp: &Expectations) -> CheckOutcome {
    expect_eq("blank claim cells", ds.claims_meta().blank_cells, 0)?;
    Ok("no blank cells".to_string())
}

fn date_range(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let dates = || ds.claims().iter().map(|c| c.date_filled);
    let first = defined("claims", dates().min())?;
    let last = defined("claims", dates().max())?;

    expect_eq("first fill date", first, exp.shape.first_date)?;
    expect_eq("last fill date", last, exp.shape.last_date)?;
    Ok(format!("{first} to {last}"))
}

fn all_days_present(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let days = distinct_days(ds.claims().iter().map(|c| c.date_filled));
    expect_eq("distinct fill dates", days, exp.shape.distinct_days)?;
    Ok(format!("{days} distinct days"))
}

fn net_claim_count_values(ds: &Dataset, _exp: &Expectations) -> CheckOutcome {
    let values = distinct(ds.claims(), |c| c.net_claim_count);
    expect_set("net claim count values", values, [1, -1])?;
    Ok("values are {-1, 1}".to_string())
}

fn incurred_and_reversed_counts(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let incurred = count_where(ds.claims(), |c| c.is_incurred());
    let reversed = count_where(ds.claims(), |c| c.is_reversal());

    expect_eq("incurred rows", incurred, exp.shape.incurred_rows)?;
    expect_eq("reversed rows", reversed, exp.shape.reversed_rows)?;
    Ok(format!("{incurred} incurred, {reversed} reversed"))
}

fn channel_all_retail(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let channels = distinct(ds.claims(), |c| c.channel.as_str());
    expect_set("channels", channels, [exp.shape.channel.as_str()])?;
    Ok(format!("all claims are channel {}", exp.shape.channel))
}

fn distinct_ndcs(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let ndcs = distinct(ds.claims(), |c| c.ndc).len();
    expect_eq("distinct NDCs", ndcs, exp.shape.distinct_ndcs)?;
    Ok(format!("{ndcs} NDCs"))
}

fn distinct_groups(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let groups = distinct(ds.claims(), |c| c.group_id.as_str()).len();
    expect_eq("distinct groups", groups, exp.shape.distinct_groups)?;
    Ok(format!("{groups} groups"))
}

fn pharmacy_states(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let states = distinct(ds.claims(), |c| c.pharmacy_state.as_str());
    expect_set(
        "pharmacy states",
        states,
        exp.shape.states.iter().map(String::as_str),
    )?;
    Ok(format!("states {}", exp.shape.states.join(", ")))
}

fn formulary_types(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let types = distinct(ds.claims(), |c| c.formulary);
    expect_set("formulary types", types, exp.shape.formularies.iter().copied())?;
    Ok(format!("{} formulary types", exp.shape.formularies.len()))
}

fn days_supply_range(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let supply = || ds.claims().iter().map(|c| c.days_supply);
    let min = defined("claims", supply().min())?;
    let max = defined("claims", supply().max())?;

    expect_eq("minimum days supply", min, exp.shape.days_supply_min)?;
    expect_eq("maximum days supply", max, exp.shape.days_supply_max)?;
    Ok(format!("days supply {min}-{max}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::fixtures::claim;
    use crate::dataset::{Claim, Formulary, TableMeta};
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn dataset(claims: Vec<Claim>, meta: TableMeta) -> Dataset {
        Dataset::from_tables(claims, vec![], vec![], meta, TableMeta::default())
    }

    fn year_ends() -> Dataset {
        let mut long = claim("KS", "400127", 2, (12, 31), -1);
        long.days_supply = 120;
        let mut short = claim("CA", "6P6002", 1, (1, 1), 1);
        short.days_supply = 1;
        dataset(
            vec![short, claim("CA", "6P6002", 1, (6, 15), 1), long],
            TableMeta::default(),
        )
    }

    #[test]
    fn test_missing_columns_are_named() {
        let exp = Expectations::snapshot_2021().unwrap();
        let meta = TableMeta {
            columns: exp.shape.columns.iter().skip(1).cloned().collect(),
            ..TableMeta::default()
        };
        let ds = dataset(vec![], meta);
        assert_eq!(
            claim_columns(&ds, &exp).unwrap_err(),
            CheckError::Assertion("claims export is missing columns [\"ADJUDICATED\"]".to_string())
        );

        let meta = TableMeta {
            columns: exp.shape.columns.clone(),
            ..TableMeta::default()
        };
        assert_eq!(claim_columns(&dataset(vec![], meta), &exp).unwrap(), "9 columns");
    }

    #[test]
    fn test_blank_cells_fail() {
        let exp = Expectations::snapshot_2021().unwrap();
        let meta = TableMeta {
            blank_cells: 2,
            ..TableMeta::default()
        };
        assert_eq!(
            claim_no_blank_cells(&dataset(vec![], meta), &exp).unwrap_err(),
            CheckError::Assertion("blank claim cells is 2, expected 0".to_string())
        );
    }

    #[test]
    fn test_date_and_supply_bounds() {
        let ds = year_ends();
        let mut exp = Expectations::snapshot_2021().unwrap();
        assert_eq!(date_range(&ds, &exp).unwrap(), "2021-01-01 to 2021-12-31");
        assert_eq!(days_supply_range(&ds, &exp).unwrap(), "days supply 1-120");

        exp.shape.last_date = NaiveDate::from_ymd_opt(2022, 1, 1).unwrap();
        assert!(matches!(date_range(&ds, &exp), Err(CheckError::Assertion(_))));
    }

    #[test]
    fn test_empty_claims_are_undefined() {
        let ds = dataset(vec![], TableMeta::default());
        let exp = Expectations::snapshot_2021().unwrap();
        assert!(matches!(date_range(&ds, &exp), Err(CheckError::Undefined(_))));
        assert!(matches!(days_supply_range(&ds, &exp), Err(CheckError::Undefined(_))));
    }

    #[test]
    fn test_row_counts_and_sets() {
        let ds = year_ends();
        let mut exp = Expectations::snapshot_2021().unwrap();
        exp.shape.incurred_rows = 2;
        exp.shape.reversed_rows = 1;
        exp.shape.distinct_days = 3;
        exp.shape.states = vec!["KS".to_string(), "CA".to_string()];
        exp.shape.formularies = vec![Formulary::Open];

        assert_eq!(incurred_and_reversed_counts(&ds, &exp).unwrap(), "2 incurred, 1 reversed");
        assert_eq!(all_days_present(&ds, &exp).unwrap(), "3 distinct days");
        assert_eq!(net_claim_count_values(&ds, &exp).unwrap(), "values are {-1, 1}");
        assert!(pharmacy_states(&ds, &exp).is_ok());
        assert!(formulary_types(&ds, &exp).is_ok());
        assert!(channel_all_retail(&ds, &exp).is_ok());

        exp.shape.states.pop();
        assert!(matches!(pharmacy_states(&ds, &exp), Err(CheckError::Assertion(_))));
    }

    #[test]
    fn test_single_valued_net_count_fails() {
        let ds = dataset(vec![claim("CA", "G1", 1, (1, 1), 1)], TableMeta::default());
        let exp = Expectations::snapshot_2021().unwrap();
        assert!(matches!(
            net_claim_count_values(&ds, &exp),
            Err(CheckError::Assertion(_))
        ));
    }
}
