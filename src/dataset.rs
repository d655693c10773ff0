//! Dataset loader for the claims export and drug reference tables.
//!
//! Reads both `~`-delimited files once and exposes three read-only views:
//! raw claims, "real" claims (flagged NDCs removed) and claims left-joined to
//! the drug reference table on NDC.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use chrono::{Datelike, NaiveDate};
use csv::{ReaderBuilder, StringRecord, Trim};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::LoadError;

/// Default directory holding both source files.
pub const DEFAULT_DATA_DIR: &str = "Case Study - Data";
/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "CLAIMS_EDA_DATA_DIR";
/// Claims export file name.
pub const CLAIMS_FILE: &str = "Claims_Export.csv";
/// Drug reference file name.
pub const DRUGS_FILE: &str = "Drug_Info.csv";
/// Kryptonite XR, the synthetic test drug planted in the 2021 export.
pub const SENTINEL_NDC: u64 = 65_862_020_190;

const FIELD_DELIMITER: u8 = b'~';
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const DATE_FORMAT: &str = "%Y%m%d";

/// Where the source tables live and which NDCs are excluded from the real view.
#[derive(Debug, Clone)]
pub struct DataConfig {
    /// Directory containing both files.
    pub data_dir: PathBuf,
    /// Claims export file name.
    pub claims_file: String,
    /// Drug reference file name.
    pub drugs_file: String,
    /// NDCs excluded from [`Dataset::real_claims`].
    pub flagged_ndcs: Vec<u64>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            claims_file: CLAIMS_FILE.to_string(),
            drugs_file: DRUGS_FILE.to_string(),
            flagged_ndcs: vec![SENTINEL_NDC],
        }
    }
}

impl DataConfig {
    /// Default configuration rooted at `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn claims_path(&self) -> PathBuf {
        self.data_dir.join(&self.claims_file)
    }

    pub fn drugs_path(&self) -> PathBuf {
        self.data_dir.join(&self.drugs_file)
    }
}

/// Finds the data directory.
///
/// Tries `CLAIMS_EDA_DATA_DIR` first, then the default directory relative to
/// the working directory and to the crate root.
pub fn find_data_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        let dir = PathBuf::from(dir);
        if dir.is_dir() {
            return Some(dir);
        }
    }

    let relative = Path::new(DEFAULT_DATA_DIR);
    if relative.is_dir() {
        return Some(relative.to_path_buf());
    }

    let crate_root = Path::new(env!("CARGO_MANIFEST_DIR")).join(DEFAULT_DATA_DIR);
    if crate_root.is_dir() {
        return Some(crate_root);
    }

    None
}

/// Formulary type of a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Formulary {
    Open,
    Managed,
    Hmf,
}

impl Formulary {
    pub const ALL: [Self; 3] = [Self::Open, Self::Managed, Self::Hmf];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Managed => "MANAGED",
            Self::Hmf => "HMF",
        }
    }
}

impl FromStr for Formulary {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(Self::Open),
            "MANAGED" => Ok(Self::Managed),
            "HMF" => Ok(Self::Hmf),
            other => Err(format!("unknown formulary type {other:?}")),
        }
    }
}

impl fmt::Display for Formulary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Multi/single-source, originator/generic classification (MONY code).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Mony {
    /// `M`: multi-source brand.
    #[serde(rename = "M")]
    MultiSourceBrand,
    /// `O`: multi-source generic.
    #[serde(rename = "O")]
    MultiSourceGeneric,
    /// `N`: single-source brand.
    #[serde(rename = "N")]
    SingleSourceBrand,
    /// `Y`: single-source generic.
    #[serde(rename = "Y")]
    SingleSourceGeneric,
}

impl Mony {
    pub const ALL: [Self; 4] = [
        Self::MultiSourceBrand,
        Self::MultiSourceGeneric,
        Self::SingleSourceBrand,
        Self::SingleSourceGeneric,
    ];

    pub const fn code(self) -> &'static str {
        match self {
            Self::MultiSourceBrand => "M",
            Self::MultiSourceGeneric => "O",
            Self::SingleSourceBrand => "N",
            Self::SingleSourceGeneric => "Y",
        }
    }
}

impl FromStr for Mony {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "M" => Ok(Self::MultiSourceBrand),
            "O" => Ok(Self::MultiSourceGeneric),
            "N" => Ok(Self::SingleSourceBrand),
            "Y" => Ok(Self::SingleSourceGeneric),
            other => Err(format!("unknown MONY code {other:?}")),
        }
    }
}

impl fmt::Display for Mony {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One row of the claims export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub adjudicated: bool,
    pub formulary: Formulary,
    pub date_filled: NaiveDate,
    pub ndc: u64,
    pub days_supply: u32,
    pub group_id: String,
    pub pharmacy_state: String,
    /// Mail/retail channel code (`MAILRETAIL`).
    pub channel: String,
    /// +1 for an incurred claim, -1 for a reversal.
    pub net_claim_count: i32,
    /// Calendar month of `date_filled`, 1-12.
    pub month: u32,
}

impl Claim {
    pub const fn is_reversal(&self) -> bool {
        self.net_claim_count == -1
    }

    pub const fn is_incurred(&self) -> bool {
        self.net_claim_count == 1
    }

    /// Day of month of `date_filled`.
    pub fn day(&self) -> u32 {
        self.date_filled.day()
    }
}

/// One row of the drug reference table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Drug {
    pub ndc: u64,
    pub drug_name: String,
    pub label_name: String,
    pub mony: Mony,
    pub manufacturer_name: String,
}

/// A claim with its drug reference row, if the NDC matched.
#[derive(Debug, Clone)]
pub struct JoinedClaim {
    pub claim: Arc<Claim>,
    pub drug: Option<Arc<Drug>>,
}

impl JoinedClaim {
    pub fn mony(&self) -> Option<Mony> {
        self.drug.as_ref().map(|d| d.mony)
    }
}

/// Header and completeness information captured while reading a table.
#[derive(Debug, Clone, Default)]
pub struct TableMeta {
    pub path: PathBuf,
    pub columns: Vec<String>,
    /// Number of empty cells across all columns.
    pub blank_cells: usize,
}

/// The loaded tables and their derived views.
///
/// Each claim row is allocated once; the views share it through `Arc`.
#[derive(Debug)]
pub struct Dataset {
    claims: Vec<Arc<Claim>>,
    real_claims: Vec<Arc<Claim>>,
    drugs: Vec<Arc<Drug>>,
    merged: Vec<JoinedClaim>,
    claims_meta: TableMeta,
    drugs_meta: TableMeta,
    flagged_ndcs: Vec<u64>,
}

impl Dataset {
    /// Loads both tables and builds the views.
    pub fn load(config: &DataConfig) -> Result<Self, LoadError> {
        let start = Instant::now();
        let (claims, claims_meta) = read_claims(&config.claims_path())?;
        let (drugs, drugs_meta) = read_drugs(&config.drugs_path())?;

        let dataset = Self::from_tables(
            claims,
            drugs,
            config.flagged_ndcs.clone(),
            claims_meta,
            drugs_meta,
        );

        info!(
            claims = dataset.claims.len(),
            real_claims = dataset.real_claims.len(),
            drugs = dataset.drugs.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "dataset loaded"
        );
        Ok(dataset)
    }

    /// Builds the views from already-parsed tables.
    pub fn from_tables(
        claims: Vec<Claim>,
        drugs: Vec<Drug>,
        flagged_ndcs: Vec<u64>,
        claims_meta: TableMeta,
        drugs_meta: TableMeta,
    ) -> Self {
        let claims: Vec<Arc<Claim>> = claims.into_iter().map(Arc::new).collect();
        let drugs: Vec<Arc<Drug>> = drugs.into_iter().map(Arc::new).collect();

        // First occurrence wins when the reference table repeats an NDC.
        let mut by_ndc: HashMap<u64, Arc<Drug>> = HashMap::with_capacity(drugs.len());
        for drug in &drugs {
            by_ndc.entry(drug.ndc).or_insert_with(|| Arc::clone(drug));
        }

        let real_claims = claims
            .iter()
            .filter(|c| !flagged_ndcs.contains(&c.ndc))
            .map(Arc::clone)
            .collect();

        let merged = claims
            .iter()
            .map(|c| JoinedClaim {
                claim: Arc::clone(c),
                drug: by_ndc.get(&c.ndc).cloned(),
            })
            .collect();

        Self {
            claims,
            real_claims,
            drugs,
            merged,
            claims_meta,
            drugs_meta,
            flagged_ndcs,
        }
    }

    /// Every claim row.
    pub fn claims(&self) -> &[Arc<Claim>] {
        &self.claims
    }

    /// Claims excluding the flagged NDCs.
    pub fn real_claims(&self) -> &[Arc<Claim>] {
        &self.real_claims
    }

    /// Claims left-joined to the drug reference table.
    pub fn merged(&self) -> &[JoinedClaim] {
        &self.merged
    }

    pub fn drugs(&self) -> &[Arc<Drug>] {
        &self.drugs
    }

    pub const fn claims_meta(&self) -> &TableMeta {
        &self.claims_meta
    }

    pub const fn drugs_meta(&self) -> &TableMeta {
        &self.drugs_meta
    }

    pub fn flagged_ndcs(&self) -> &[u64] {
        &self.flagged_ndcs
    }
}

struct Table {
    path: PathBuf,
    headers: StringRecord,
    reader: csv::Reader<Cursor<Vec<u8>>>,
}

impl Table {
    fn open(path: &Path) -> Result<Self, LoadError> {
        if !path.exists() {
            return Err(LoadError::MissingFile(path.to_path_buf()));
        }

        let mut bytes = fs::read(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if bytes.starts_with(UTF8_BOM) {
            bytes.drain(..UTF8_BOM.len());
        }

        let mut reader = ReaderBuilder::new()
            .delimiter(FIELD_DELIMITER)
            .trim(Trim::All)
            .from_reader(Cursor::new(bytes));
        let headers = reader.headers().map_err(|source| LoadError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        let headers = headers.clone();

        debug!(path = %path.display(), columns = headers.len(), "opened table");
        Ok(Self {
            path: path.to_path_buf(),
            headers,
            reader,
        })
    }

    fn column(&self, name: &'static str) -> Result<Column, LoadError> {
        self.headers
            .iter()
            .position(|h| h == name)
            .map(|index| Column { name, index })
            .ok_or_else(|| LoadError::MissingColumn {
                path: self.path.clone(),
                column: name,
            })
    }

    /// Reads every row through `parse`, counting blank cells along the way.
    fn rows<T>(
        mut self,
        mut parse: impl FnMut(&Row<'_>) -> Result<T, LoadError>,
    ) -> Result<(Vec<T>, TableMeta), LoadError> {
        let mut out = Vec::new();
        let mut blank_cells = 0;

        for record in self.reader.records() {
            let record = record.map_err(|source| LoadError::Csv {
                path: self.path.clone(),
                source,
            })?;
            blank_cells += record.iter().filter(|f| f.is_empty()).count();

            let row = Row {
                path: &self.path,
                line: record.position().map_or(0, csv::Position::line),
                record: &record,
            };
            out.push(parse(&row)?);
        }

        let meta = TableMeta {
            path: self.path,
            columns: self.headers.iter().map(str::to_string).collect(),
            blank_cells,
        };
        Ok((out, meta))
    }
}

#[derive(Clone, Copy)]
struct Column {
    name: &'static str,
    index: usize,
}

struct Row<'a> {
    path: &'a Path,
    line: u64,
    record: &'a StringRecord,
}

impl Row<'_> {
    fn text(&self, col: Column) -> &str {
        self.record.get(col.index).unwrap_or_default()
    }

    fn invalid(&self, col: Column, reason: impl Into<String>) -> LoadError {
        LoadError::InvalidField {
            path: self.path.to_path_buf(),
            line: self.line,
            column: col.name,
            value: self.text(col).to_string(),
            reason: reason.into(),
        }
    }

    fn parse<T>(&self, col: Column) -> Result<T, LoadError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let raw = self.text(col);
        if raw.is_empty() {
            return Err(self.invalid(col, "value is missing"));
        }
        raw.parse().map_err(|e: T::Err| self.invalid(col, e.to_string()))
    }

    fn flag(&self, col: Column) -> Result<bool, LoadError> {
        parse_flag(self.text(col)).ok_or_else(|| self.invalid(col, "expected a boolean flag"))
    }

    fn date(&self, col: Column) -> Result<NaiveDate, LoadError> {
        let raw = self.text(col);
        if raw.len() != 8 {
            return Err(self.invalid(col, "expected YYYYMMDD"));
        }
        NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|e| self.invalid(col, e.to_string()))
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "y" | "yes" => Some(true),
        "false" | "f" | "0" | "n" | "no" => Some(false),
        _ => None,
    }
}

fn read_claims(path: &Path) -> Result<(Vec<Claim>, TableMeta), LoadError> {
    let table = Table::open(path)?;
    let adjudicated = table.column("ADJUDICATED")?;
    let formulary = table.column("FORMULARY")?;
    let date_filled = table.column("DATE_FILLED")?;
    let ndc = table.column("NDC")?;
    let days_supply = table.column("DAYS_SUPPLY")?;
    let group_id = table.column("GROUP_ID")?;
    let pharmacy_state = table.column("PHARMACY_STATE")?;
    let channel = table.column("MAILRETAIL")?;
    let net_claim_count = table.column("NET_CLAIM_COUNT")?;

    let (claims, meta) = table.rows(|row| {
        let date = row.date(date_filled)?;
        Ok(Claim {
            adjudicated: row.flag(adjudicated)?,
            formulary: row.parse(formulary)?,
            date_filled: date,
            ndc: row.parse(ndc)?,
            days_supply: row.parse(days_supply)?,
            group_id: row.text(group_id).to_string(),
            pharmacy_state: row.text(pharmacy_state).to_string(),
            channel: row.text(channel).to_string(),
            net_claim_count: row.parse(net_claim_count)?,
            month: date.month(),
        })
    })?;

    info!(path = %path.display(), rows = claims.len(), "read claims export");
    Ok((claims, meta))
}

fn read_drugs(path: &Path) -> Result<(Vec<Drug>, TableMeta), LoadError> {
    let table = Table::open(path)?;
    let ndc = table.column("NDC")?;
    let drug_name = table.column("DRUG_NAME")?;
    let label_name = table.column("LABEL_NAME")?;
    let mony = table.column("MONY")?;
    let manufacturer_name = table.column("MANUFACTURER_NAME")?;

    let (drugs, meta) = table.rows(|row| {
        Ok(Drug {
            ndc: row.parse(ndc)?,
            drug_name: row.text(drug_name).to_string(),
            label_name: row.text(label_name).to_string(),
            mony: row.parse(mony)?,
            manufacturer_name: row.text(manufacturer_name).to_string(),
        })
    })?;

    info!(path = %path.display(), rows = drugs.len(), "read drug reference");
    Ok((drugs, meta))
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Small hand-built tables shared by unit tests.

    use super::{Claim, Drug, Formulary, Mony};
    use chrono::{Datelike, NaiveDate};

    pub fn claim(
        state: &str,
        group: &str,
        ndc: u64,
        (m, d): (u32, u32),
        net: i32,
    ) -> Claim {
        let date = NaiveDate::from_ymd_opt(2021, m, d).unwrap();
        Claim {
            adjudicated: false,
            formulary: Formulary::Open,
            date_filled: date,
            ndc,
            days_supply: 14,
            group_id: group.to_string(),
            pharmacy_state: state.to_string(),
            channel: "R".to_string(),
            net_claim_count: net,
            month: date.month(),
        }
    }

    pub fn drug(ndc: u64, name: &str, mony: Mony) -> Drug {
        Drug {
            ndc,
            drug_name: name.to_string(),
            label_name: format!("{name} 10 MG"),
            mony,
            manufacturer_name: "ACME PHARMA".to_string(),
        }
    }
}
