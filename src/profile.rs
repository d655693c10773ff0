//! KPI overview of the claims dataset.
//!
//! Computed on the real view by default so the sentinel drug does not inflate
//! May. `ProfileView::Raw` keeps every row.

use std::sync::Arc;

use serde::Serialize;

use crate::dataset::{Claim, Dataset, Formulary};
use crate::metrics::{distinct, group_rates, rate_pct, tally, RateTally};

/// Which claims the profile is computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileView {
    /// Flagged NDCs excluded.
    #[default]
    Real,
    /// Every claim row.
    Raw,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Kpis {
    pub total_rows: usize,
    pub net_claims: i64,
    /// `None` on an empty view.
    pub reversal_rate: Option<f64>,
    pub adjudication: RateTally,
    pub unique_ndcs: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthPoint {
    pub month: u32,
    pub incurred: usize,
    pub reversed: usize,
    pub net: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormularyBreakdown {
    pub formulary: Formulary,
    pub rows: usize,
    pub net_claims: i64,
    pub reversal_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateBreakdown {
    pub state: String,
    pub rows: usize,
    pub net_claims: i64,
    pub groups: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Profile {
    pub view: ProfileView,
    pub kpis: Kpis,
    /// Months with at least one row, ascending.
    pub monthly: Vec<MonthPoint>,
    /// Ordered by descending row count.
    pub formularies: Vec<FormularyBreakdown>,
    /// Ordered by descending net claims.
    pub states: Vec<StateBreakdown>,
}

fn net<'a>(rows: impl IntoIterator<Item = &'a Claim>) -> i64 {
    rows.into_iter().map(|c| i64::from(c.net_claim_count)).sum()
}

impl Profile {
    pub fn compute(ds: &Dataset, view: ProfileView) -> Self {
        let rows: Vec<&Claim> = match view {
            ProfileView::Real => ds.real_claims(),
            ProfileView::Raw => ds.claims(),
        }
        .iter()
        .map(Arc::as_ref)
        .collect();

        let kpis = Kpis {
            total_rows: rows.len(),
            net_claims: net(rows.iter().copied()),
            reversal_rate: rate_pct(rows.iter().copied(), Claim::is_reversal),
            adjudication: tally(rows.iter().copied(), |c| c.adjudicated),
            unique_ndcs: distinct(rows.iter().copied(), |c| c.ndc).len(),
        };

        let monthly = (1..=12)
            .filter_map(|month| {
                let in_month: Vec<&Claim> =
                    rows.iter().copied().filter(|c| c.month == month).collect();
                if in_month.is_empty() {
                    return None;
                }
                let reversals = tally(in_month.iter().copied(), Claim::is_reversal);
                Some(MonthPoint {
                    month,
                    incurred: reversals.unmatched(),
                    reversed: reversals.matched,
                    net: net(in_month.iter().copied()),
                })
            })
            .collect();

        let mut formularies: Vec<FormularyBreakdown> =
            group_rates(rows.iter().copied(), |c| c.formulary, Claim::is_reversal)
                .into_iter()
                .map(|(formulary, t)| FormularyBreakdown {
                    formulary,
                    rows: t.total,
                    net_claims: net(rows.iter().copied().filter(|c| c.formulary == formulary)),
                    reversal_rate: t.pct(),
                })
                .collect();
        formularies.sort_by(|a, b| b.rows.cmp(&a.rows));

        let mut states: Vec<StateBreakdown> =
            distinct(rows.iter().copied(), |c| c.pharmacy_state.as_str())
                .into_iter()
                .map(|state| {
                    let in_state =
                        || rows.iter().copied().filter(move |c| c.pharmacy_state == state);
                    StateBreakdown {
                        state: state.to_string(),
                        rows: in_state().count(),
                        net_claims: net(in_state()),
                        groups: distinct(in_state(), |c| c.group_id.as_str()).len(),
                    }
                })
                .collect();
        states.sort_by(|a, b| {
            b.net_claims
                .cmp(&a.net_claims)
                .then_with(|| a.state.cmp(&b.state))
        });

        Self {
            view,
            kpis,
            monthly,
            formularies,
            states,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::fixtures::claim;
    use crate::dataset::{TableMeta, SENTINEL_NDC};
    use pretty_assertions::assert_eq;

    fn dataset() -> Dataset {
        let mut managed = claim("KS", "400127", 7, (8, 3), -1);
        managed.formulary = Formulary::Managed;
        let mut adjudicated = claim("CA", "6P6002", 7, (1, 2), 1);
        adjudicated.adjudicated = true;

        Dataset::from_tables(
            vec![
                claim("CA", "6P6002", 7, (1, 1), 1),
                adjudicated,
                claim("CA", "6P6003", 8, (8, 1), 1),
                managed,
                claim("KS", "400127", SENTINEL_NDC, (5, 1), 1),
            ],
            vec![],
            vec![SENTINEL_NDC],
            TableMeta::default(),
            TableMeta::default(),
        )
    }

    #[test]
    fn test_real_view_excludes_flagged() {
        let profile = Profile::compute(&dataset(), ProfileView::Real);

        assert_eq!(profile.kpis.total_rows, 4);
        assert_eq!(profile.kpis.net_claims, 2);
        assert_eq!(profile.kpis.reversal_rate, Some(25.0));
        assert_eq!(
            profile.kpis.adjudication,
            RateTally {
                matched: 1,
                total: 4,
            }
        );
        assert_eq!(profile.kpis.unique_ndcs, 2);
        assert_eq!(
            profile.monthly,
            vec![
                MonthPoint {
                    month: 1,
                    incurred: 2,
                    reversed: 0,
                    net: 2,
                },
                MonthPoint {
                    month: 8,
                    incurred: 1,
                    reversed: 1,
                    net: 0,
                },
            ]
        );
    }

    #[test]
    fn test_raw_view_keeps_flagged() {
        let profile = Profile::compute(&dataset(), ProfileView::Raw);
        assert_eq!(profile.kpis.total_rows, 5);
        assert!(profile.monthly.iter().any(|m| m.month == 5));
    }

    #[test]
    fn test_breakdowns() {
        let profile = Profile::compute(&dataset(), ProfileView::Real);

        assert_eq!(
            profile.formularies,
            vec![
                FormularyBreakdown {
                    formulary: Formulary::Open,
                    rows: 3,
                    net_claims: 3,
                    reversal_rate: Some(0.0),
                },
                FormularyBreakdown {
                    formulary: Formulary::Managed,
                    rows: 1,
                    net_claims: -1,
                    reversal_rate: Some(100.0),
                },
            ]
        );
        assert_eq!(
            profile.states,
            vec![
                StateBreakdown {
                    state: "CA".to_string(),
                    rows: 3,
                    net_claims: 3,
                    groups: 2,
                },
                StateBreakdown {
                    state: "KS".to_string(),
                    rows: 1,
                    net_claims: -1,
                    groups: 1,
                },
            ]
        );
    }
}
