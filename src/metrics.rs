//! Aggregate metric primitives.
//!
//! Every check in the catalogue is built from these: counts, distinct values,
//! predicate rates (overall or per group), join coverage, month-over-baseline
//! ratios, calendar completeness, group exclusivity and anomaly isolation.
//!
//! All functions take an iterator of row references so they work on any view
//! and on pre-filtered subsets alike.

#![allow(clippy::cast_precision_loss)]

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::hash::Hash;

use chrono::NaiveDate;
use serde::Serialize;

/// Matched/total row counts for a predicate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RateTally {
    pub matched: usize,
    pub total: usize,
}

impl RateTally {
    /// Matched share as a percentage; `None` over zero rows.
    pub fn pct(self) -> Option<f64> {
        pct(self.matched, self.total)
    }

    /// True when every row (and at least one) matched.
    pub const fn is_total(self) -> bool {
        self.total > 0 && self.matched == self.total
    }

    /// Rows that did not match.
    pub const fn unmatched(self) -> usize {
        self.total - self.matched
    }

    fn add(&mut self, matched: bool) {
        self.total += 1;
        if matched {
            self.matched += 1;
        }
    }
}

/// `part / whole` as a percentage; `None` when `whole` is zero.
#[inline]
pub fn pct(part: usize, whole: usize) -> Option<f64> {
    (whole > 0).then(|| part as f64 / whole as f64 * 100.0)
}

/// Number of rows matching `pred`.
pub fn count_where<'a, T: 'a>(
    rows: impl IntoIterator<Item = &'a T>,
    pred: impl Fn(&T) -> bool,
) -> usize {
    rows.into_iter().filter(|r| pred(r)).count()
}

/// Matched/total counts for `pred`.
pub fn tally<'a, T: 'a>(
    rows: impl IntoIterator<Item = &'a T>,
    pred: impl Fn(&T) -> bool,
) -> RateTally {
    let mut t = RateTally::default();
    for row in rows {
        t.add(pred(row));
    }
    t
}

/// Share of rows matching `pred`, as a percentage.
pub fn rate_pct<'a, T: 'a>(
    rows: impl IntoIterator<Item = &'a T>,
    pred: impl Fn(&T) -> bool,
) -> Option<f64> {
    tally(rows, pred).pct()
}

/// Distinct values of `key`.
pub fn distinct<'a, T: 'a, K: Eq + Hash>(
    rows: impl IntoIterator<Item = &'a T>,
    key: impl Fn(&'a T) -> K,
) -> HashSet<K> {
    rows.into_iter().map(key).collect()
}

/// Row count per key.
pub fn group_counts<'a, T: 'a, K: Ord>(
    rows: impl IntoIterator<Item = &'a T>,
    key: impl Fn(&'a T) -> K,
) -> BTreeMap<K, usize> {
    let mut counts = BTreeMap::new();
    for row in rows {
        *counts.entry(key(row)).or_insert(0) += 1;
    }
    counts
}

/// Row count per key, largest first. Ties are ordered by key.
pub fn value_counts<'a, T: 'a, K: Ord>(
    rows: impl IntoIterator<Item = &'a T>,
    key: impl Fn(&'a T) -> K,
) -> Vec<(K, usize)> {
    let mut counts: Vec<_> = group_counts(rows, key).into_iter().collect();
    // Stable sort keeps the BTreeMap key order among equal counts.
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
}

/// Keys ordered by descending row count.
pub fn ranked_keys<'a, T: 'a, K: Ord>(
    rows: impl IntoIterator<Item = &'a T>,
    key: impl Fn(&'a T) -> K,
) -> Vec<K> {
    value_counts(rows, key).into_iter().map(|(k, _)| k).collect()
}

/// Per-key matched/total counts for `pred`.
pub fn group_rates<'a, T: 'a, K: Ord>(
    rows: impl IntoIterator<Item = &'a T>,
    key: impl Fn(&'a T) -> K,
    pred: impl Fn(&T) -> bool,
) -> BTreeMap<K, RateTally> {
    let mut rates: BTreeMap<K, RateTally> = BTreeMap::new();
    for row in rows {
        rates.entry(key(row)).or_default().add(pred(row));
    }
    rates
}

/// Max minus min; `None` for an empty input.
pub fn spread(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    values
        .into_iter()
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
        .map(|(lo, hi)| hi - lo)
}

/// Distinct-key overlap between a table column and a reference key set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JoinCoverage {
    /// Distinct keys present in the reference.
    pub matched_keys: usize,
    /// Distinct keys absent from the reference.
    pub unmatched_keys: usize,
    /// Rows whose key is absent from the reference.
    pub unmatched_rows: usize,
    pub total_rows: usize,
}

impl JoinCoverage {
    /// Share of rows with a reference match.
    pub fn match_pct(self) -> Option<f64> {
        pct(self.total_rows - self.unmatched_rows, self.total_rows)
    }
}

/// Coverage of `key` over `rows` against `reference`.
pub fn join_coverage<'a, T: 'a, K: Eq + Hash>(
    rows: impl IntoIterator<Item = &'a T>,
    key: impl Fn(&'a T) -> K,
    reference: &HashSet<K>,
) -> JoinCoverage {
    let mut seen: HashMap<K, bool> = HashMap::new();
    let mut coverage = JoinCoverage::default();

    for row in rows {
        let k = key(row);
        let hit = reference.contains(&k);
        coverage.total_rows += 1;
        if !hit {
            coverage.unmatched_rows += 1;
        }
        seen.entry(k).or_insert(hit);
    }

    coverage.matched_keys = seen.values().filter(|hit| **hit).count();
    coverage.unmatched_keys = seen.len() - coverage.matched_keys;
    coverage
}

/// Mean monthly row count over the months not listed as anomalous.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Baseline {
    pub mean: f64,
    pub months: usize,
}

impl Baseline {
    /// Averages `month_of` row counts over every calendar month not in
    /// `excluded`. `None` when no month remains or the mean is zero.
    pub fn from_months<'a, T: 'a>(
        rows: impl IntoIterator<Item = &'a T>,
        month_of: impl Fn(&T) -> u32,
        excluded: &[u32],
    ) -> Option<Self> {
        let months = (1..=12).filter(|m| !excluded.contains(m)).count();
        if months == 0 {
            return None;
        }
        let rows = count_where(rows, |r| !excluded.contains(&month_of(r)));
        let mean = rows as f64 / months as f64;
        (mean > 0.0).then_some(Self { mean, months })
    }

    /// Percent above the baseline (negative when below).
    pub fn pct_above(self, count: usize) -> f64 {
        (count as f64 / self.mean - 1.0) * 100.0
    }

    /// Percent below the baseline (negative when above).
    pub fn pct_below(self, count: usize) -> f64 {
        -self.pct_above(count)
    }
}

/// Number of distinct calendar days.
pub fn distinct_days(dates: impl IntoIterator<Item = NaiveDate>) -> usize {
    dates.into_iter().collect::<HashSet<_>>().len()
}

/// Keys that appear with more than one distinct `value`.
pub fn multi_valued_keys<'a, T: 'a, K: Ord, V: Eq + Hash>(
    rows: impl IntoIterator<Item = &'a T>,
    key: impl Fn(&'a T) -> K,
    value: impl Fn(&'a T) -> V,
) -> Vec<K> {
    let mut values: BTreeMap<K, HashSet<V>> = BTreeMap::new();
    for row in rows {
        values.entry(key(row)).or_default().insert(value(row));
    }
    values
        .into_iter()
        .filter(|(_, vs)| vs.len() > 1)
        .map(|(k, _)| k)
        .collect()
}

/// Keys whose rate is exactly 100%.
pub fn isolate_extreme<K: Ord + Clone>(rates: &BTreeMap<K, RateTally>) -> BTreeSet<K> {
    rates
        .iter()
        .filter(|(_, t)| t.is_total())
        .map(|(k, _)| k.clone())
        .collect()
}
