//! NDC join coverage between claims and the drug reference table.

use std::collections::HashSet;

use super::expect::{defined, expect_above, expect_eq};
use super::{Area, Check, CheckOutcome};
use crate::dataset::Dataset;
use crate::expectations::Expectations;
use crate::metrics::{distinct, join_coverage, JoinCoverage};

pub const CHECKS: &[Check] = &[
    Check {
        area: Area::Join,
        name: "matched_ndcs",
        description: "claim NDCs found in the reference table",
        run: matched_ndcs,
    },
    Check {
        area: Area::Join,
        name: "unmatched_ndcs",
        description: "claim NDCs missing from the reference table",
        run: unmatched_ndcs,
    },
    Check {
        area: Area::Join,
        name: "unmatched_claim_rows",
        description: "claim rows without a reference match",
        run: unmatched_claim_rows,
    },
    Check {
        area: Area::Join,
        name: "match_rate",
        description: "share of claim rows with a reference match",
        run: match_rate,
    },
    Check {
        area: Area::Join,
        name: "drug_ndcs_unique",
        description: "reference NDCs are unique",
        run: drug_ndcs_unique,
    },
    Check {
        area: Area::Join,
        name: "drug_row_count",
        description: "reference table row count",
        run: drug_row_count,
    },
    Check {
        area: Area::Join,
        name: "drug_no_blank_cells",
        description: "no missing values in the reference table",
        run: drug_no_blank_cells,
    },
];

fn coverage(ds: &Dataset) -> JoinCoverage {
    let reference: HashSet<u64> = ds.drugs().iter().map(|d| d.ndc).collect();
    join_coverage(ds.claims(), |c| c.ndc, &reference)
}

fn matched_ndcs(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let matched = coverage(ds).matched_keys;
    expect_eq("matched NDCs", matched, exp.join.matched_ndcs)?;
    Ok(format!("{matched} NDCs matched"))
}

fn unmatched_ndcs(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let unmatched = coverage(ds).unmatched_keys;
    expect_eq("unmatched NDCs", unmatched, exp.join.unmatched_ndcs)?;
    Ok(format!("{unmatched} NDCs unmatched"))
}

fn unmatched_claim_rows(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let rows = coverage(ds).unmatched_rows;
    expect_eq("unmatched claim rows", rows, exp.join.unmatched_rows)?;
    Ok(format!("{rows} rows unmatched"))
}

fn match_rate(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let rate = defined("claims", coverage(ds).match_pct())?;
    expect_above("match rate %", rate, exp.join.min_match_pct)?;
    Ok(format!("{rate:.3}% of rows matched"))
}

fn drug_ndcs_unique(ds: &Dataset, _exp: &Expectations) -> CheckOutcome {
    let rows = ds.drugs().len();
    let unique = distinct(ds.drugs(), |d| d.ndc).len();
    expect_eq("distinct reference NDCs", unique, rows)?;
    Ok(format!("{unique} unique NDCs"))
}

fn drug_row_count(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let rows = ds.drugs().len();
    expect_eq("reference rows", rows, exp.join.drug_rows)?;
    Ok(format!("{rows} rows"))
}

fn drug_no_blank_cells(ds: &Dataset, _exp: &Expectations) -> CheckOutcome {
    expect_eq("blank reference cells", ds.drugs_meta().blank_cells, 0)?;
    Ok("no blank cells".to_string())
}
