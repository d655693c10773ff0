//! The catalogue of named EDA checks.
//!
//! Each check is a pure function of the loaded [`Dataset`] and the snapshot's
//! [`Expectations`]. It returns a short description of what it measured, or a
//! [`CheckError`] naming the computed value that broke the expectation.

mod batch_reversal;
mod distributions;
pub mod expect;
mod groups;
mod join;
mod mony;
mod monthly;
mod sentinel;
mod shape;

use std::fmt;

use clap::ValueEnum;
use serde::Serialize;

use crate::dataset::Dataset;
use crate::error::CheckError;
use crate::expectations::Expectations;

/// What a check returns: pass details or the reason it did not pass.
pub type CheckOutcome = Result<String, CheckError>;

/// Signature shared by every check.
pub type CheckFn = fn(&Dataset, &Expectations) -> CheckOutcome;

/// Thematic grouping of checks, selectable from the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum Area {
    /// Row counts, columns, completeness and value domains.
    Shape,
    /// Adjudication, reversal, volume and days-supply distributions.
    Distributions,
    /// Group identifier characteristics.
    Groups,
    /// Claims-to-reference NDC coverage.
    Join,
    /// The synthetic test drug.
    Sentinel,
    /// The state/month batch-reversal event.
    BatchReversal,
    /// Monthly spike and dip against the normal-month baseline.
    Monthly,
    /// MONY classification mix.
    Mony,
}

impl Area {
    pub const ALL: [Self; 8] = [
        Self::Shape,
        Self::Distributions,
        Self::Groups,
        Self::Join,
        Self::Sentinel,
        Self::BatchReversal,
        Self::Monthly,
        Self::Mony,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Shape => "shape",
            Self::Distributions => "distributions",
            Self::Groups => "groups",
            Self::Join => "join",
            Self::Sentinel => "sentinel",
            Self::BatchReversal => "batch_reversal",
            Self::Monthly => "monthly",
            Self::Mony => "mony",
        }
    }

    /// Checks belonging to this area.
    pub const fn checks(self) -> &'static [Check] {
        match self {
            Self::Shape => shape::CHECKS,
            Self::Distributions => distributions::CHECKS,
            Self::Groups => groups::CHECKS,
            Self::Join => join::CHECKS,
            Self::Sentinel => sentinel::CHECKS,
            Self::BatchReversal => batch_reversal::CHECKS,
            Self::Monthly => monthly::CHECKS,
            Self::Mony => mony::CHECKS,
        }
    }
}

impl fmt::Display for Area {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named check.
#[derive(Clone, Copy)]
pub struct Check {
    pub area: Area,
    pub name: &'static str,
    pub description: &'static str,
    pub run: CheckFn,
}

impl Check {
    /// `area::name`, unique across the catalogue.
    pub fn id(&self) -> String {
        format!("{}::{}", self.area, self.name)
    }
}

impl fmt::Debug for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Check")
            .field("area", &self.area)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Every check, in area order.
pub fn catalogue() -> Vec<Check> {
    Area::ALL
        .iter()
        .flat_map(|area| area.checks().iter().copied())
        .collect()
}
