//! Assertion helpers shared by the checks.
//!
//! Each helper returns `Err(CheckError::Assertion)` with the actual and the
//! expected value spelled out, so checks compose with `?`.

use std::collections::BTreeSet;
use std::fmt::{Debug, Display};

use crate::error::CheckError;
use crate::expectations::Band;

/// Unwraps a metric that may be undefined (e.g. a rate over zero rows).
pub fn defined<T>(what: &str, value: Option<T>) -> Result<T, CheckError> {
    value.ok_or_else(|| CheckError::undefined(format!("{what} has no rows")))
}

pub fn expect_eq<T: PartialEq + Debug>(
    what: &str,
    actual: T,
    expected: T,
) -> Result<(), CheckError> {
    if actual == expected {
        Ok(())
    } else {
        Err(CheckError::assertion(format!("{what} is {actual:?}, expected {expected:?}")))
    }
}

/// `actual` must fall inside the inclusive `band`.
pub fn expect_within(what: &str, actual: f64, band: Band) -> Result<(), CheckError> {
    if band.contains(actual) {
        Ok(())
    } else {
        Err(CheckError::assertion(format!(
            "{what} {actual:.2} outside expected range {band}"
        )))
    }
}

/// Every keyed value must fall inside `band`. Reports all offenders at once.
pub fn expect_each_within<K: Display>(
    what: &str,
    values: impl IntoIterator<Item = (K, f64)>,
    band: Band,
) -> Result<(), CheckError> {
    let offenders: Vec<String> = values
        .into_iter()
        .filter(|(_, v)| !band.contains(*v))
        .map(|(k, v)| format!("{k}={v:.2}"))
        .collect();

    if offenders.is_empty() {
        Ok(())
    } else {
        Err(CheckError::assertion(format!(
            "{what} outside expected range {band}: {}",
            offenders.join(", ")
        )))
    }
}

/// Strictly greater than `min`.
pub fn expect_above(what: &str, actual: f64, min: f64) -> Result<(), CheckError> {
    if actual > min {
        Ok(())
    } else {
        Err(CheckError::assertion(format!("{what} {actual:.2} not above {min}")))
    }
}

/// Strictly less than `max`.
pub fn expect_below(what: &str, actual: f64, max: f64) -> Result<(), CheckError> {
    if actual < max {
        Ok(())
    } else {
        Err(CheckError::assertion(format!("{what} {actual:.2} not below {max}")))
    }
}

/// Set equality, ignoring order and duplicates.
pub fn expect_set<T: Ord + Debug>(
    what: &str,
    actual: impl IntoIterator<Item = T>,
    expected: impl IntoIterator<Item = T>,
) -> Result<(), CheckError> {
    let actual: BTreeSet<T> = actual.into_iter().collect();
    let expected: BTreeSet<T> = expected.into_iter().collect();
    if actual == expected {
        Ok(())
    } else {
        Err(CheckError::assertion(format!("{what} is {actual:?}, expected {expected:?}")))
    }
}

/// Exact sequence equality, for category orderings.
pub fn expect_order<T: PartialEq + Debug>(
    what: &str,
    actual: &[T],
    expected: &[T],
) -> Result<(), CheckError> {
    if actual == expected {
        Ok(())
    } else {
        Err(CheckError::assertion(format!(
            "{what} order is {actual:?}, expected {expected:?}"
        )))
    }
}
