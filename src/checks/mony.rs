//! MONY (multi-source/single-source, brand/generic) classification mix.
//!
//! Claim shares are computed on the joined view with every claim row in the
//! denominator, so the few unmatched rows dilute each share slightly.

use super::expect::{defined, expect_below, expect_each_within, expect_order, expect_within};
use super::{Area, Check, CheckOutcome};
use crate::dataset::{Dataset, JoinedClaim, Mony};
use crate::error::CheckError;
use crate::expectations::Expectations;
use crate::metrics::{count_where, group_rates, pct, ranked_keys};

pub const CHECKS: &[Check] = &[
    Check {
        area: Area::Mony,
        name: "claims_share_y",
        description: "share of claims for single-source generics",
        run: claims_share_y,
    },
    Check {
        area: Area::Mony,
        name: "claims_share_n",
        description: "share of claims for single-source brands",
        run: claims_share_n,
    },
    Check {
        area: Area::Mony,
        name: "claims_share_o",
        description: "share of claims for multi-source generics",
        run: claims_share_o,
    },
    Check {
        area: Area::Mony,
        name: "claims_share_m",
        description: "share of claims for multi-source brands",
        run: claims_share_m,
    },
    Check {
        area: Area::Mony,
        name: "claims_order",
        description: "MONY codes ranked by claim volume",
        run: claims_order,
    },
    Check {
        area: Area::Mony,
        name: "reference_distribution",
        description: "MONY mix of the drug reference table",
        run: reference_distribution,
    },
    Check {
        area: Area::Mony,
        name: "reversal_uniform_by_mony",
        description: "reversal rate is similar across MONY codes",
        run: reversal_uniform_by_mony,
    },
];

fn claims_share(ds: &Dataset, exp: &Expectations, mony: Mony) -> CheckOutcome {
    let band = exp
        .mony
        .claims_share
        .get(&mony)
        .copied()
        .ok_or_else(|| CheckError::undefined(format!("no claims share expected for {mony}")))?;

    let rows = count_where(ds.merged(), |j| j.mony() == Some(mony));
    let share = defined("joined claims", pct(rows, ds.merged().len()))?;
    expect_within(&format!("MONY {mony} claims share %"), share, band)?;
    Ok(format!("{share:.2}% of claims"))
}

fn claims_share_y(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    claims_share(ds, exp, Mony::SingleSourceGeneric)
}

fn claims_share_n(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    claims_share(ds, exp, Mony::SingleSourceBrand)
}

fn claims_share_o(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    claims_share(ds, exp, Mony::MultiSourceGeneric)
}

fn claims_share_m(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    claims_share(ds, exp, Mony::MultiSourceBrand)
}

fn claims_order(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let matched: Vec<Mony> = ds.merged().iter().filter_map(JoinedClaim::mony).collect();
    let order = ranked_keys(&matched, |m| *m);
    expect_order("MONY by claims", &order, &exp.mony.claims_order)?;
    Ok(order
        .iter()
        .map(|m| m.code())
        .collect::<Vec<_>>()
        .join(" > "))
}

fn reference_distribution(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let total = ds.drugs().len();
    let share = |mony: Mony| {
        let rows = count_where(ds.drugs(), |d| d.mony == mony);
        defined("reference table", pct(rows, total))
    };

    let shares = exp
        .mony
        .reference_share
        .keys()
        .map(|&m| Ok((m, share(m)?)))
        .collect::<Result<Vec<_>, CheckError>>()?;
    for (mony, value) in &shares {
        expect_within(
            &format!("MONY {mony} reference share %"),
            *value,
            exp.mony.reference_share[mony],
        )?;
    }
    for (&mony, &max) in &exp.mony.reference_max_pct {
        expect_below(&format!("MONY {mony} reference share %"), share(mony)?, max)?;
    }

    Ok(shares
        .iter()
        .map(|(m, v)| format!("{m}={v:.1}%"))
        .collect::<Vec<_>>()
        .join(", "))
}

fn reversal_uniform_by_mony(ds: &Dataset, exp: &Expectations) -> CheckOutcome {
    let mut rates = group_rates(ds.merged(), JoinedClaim::mony, |j| j.claim.is_reversal());
    // Unmatched rows have no classification.
    rates.remove(&None);

    let missing: Vec<&str> = Mony::ALL
        .iter()
        .filter(|m| !rates.contains_key(&Some(**m)))
        .map(|m| m.code())
        .collect();
    if !missing.is_empty() {
        return Err(CheckError::undefined(format!(
            "no matched claims for MONY {}",
            missing.join(", ")
        )));
    }

    let pcts = rates
        .iter()
        .filter_map(|(m, t)| m.map(|m| (m, *t)))
        .map(|(m, t)| Ok((m, defined(&format!("MONY {m}"), t.pct())?)))
        .collect::<Result<Vec<_>, CheckError>>()?;
    expect_each_within(
        "reversal rate % by MONY",
        pcts.iter().copied(),
        exp.mony.reversal_rate,
    )?;
    Ok(pcts
        .iter()
        .map(|(m, v)| format!("{m}={v:.2}%"))
        .collect::<Vec<_>>()
        .join(", "))
}
