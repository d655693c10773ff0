//! claims-eda-checks: regression checks for the 2021 pharmacy claims EDA.
//!
//! Loads the claims export and the drug reference table, then runs a catalogue
//! of named checks that pin down the facts found during exploratory analysis.

pub mod checks;
pub mod dataset;
pub mod error;
pub mod expectations;
pub mod metrics;
pub mod profile;
pub mod runner;
pub mod types;
