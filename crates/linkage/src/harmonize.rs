//! Schema harmonization: era-specific raw rows → [`CanonicalLoanEvent`].

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::era::{state_fips, EraTable, EraTables};
use crate::error::{LinkageError, SchemaMismatchError};
use crate::identity::{EventId, FileType, IdentityAssigner, RowLocation};
use crate::model::{
    ApplicantProfile, CanonicalLoanEvent, EventRole, GeoKey, LoanPurpose, LoanType,
    OccupancyType, PropertyType, PurchaserType, ReporterKey, SchemaEra,
};

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// One raw row as delivered by the ingestion collaborator, tagged with its
/// partition and original position.
#[derive(Debug, Clone)]
pub struct RawRow {
    pub source_year: i32,
    pub file_type: FileType,
    pub schema_era: SchemaEra,
    pub row_index: u64,
    pub fields: HashMap<String, String>,
}

impl RawRow {
    /// Row whose era follows from its source year.
    pub fn new(
        source_year: i32,
        file_type: FileType,
        row_index: u64,
        fields: HashMap<String, String>,
    ) -> Self {
        Self {
            source_year,
            file_type,
            schema_era: SchemaEra::for_year(source_year),
            row_index,
            fields,
        }
    }

    pub fn location(&self) -> RowLocation {
        RowLocation {
            source_year: self.source_year,
            file_type: self.file_type,
            row_index: self.row_index,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HarmonizeStats {
    pub rows_read: usize,
    pub originations: usize,
    pub purchases: usize,
    /// Valid rows whose disposition is neither originated nor purchased.
    pub filtered: usize,
    /// Rows dropped with a [`SchemaMismatchError`].
    pub dropped: usize,
    /// Dropped rows keyed by the offending field.
    pub dropped_by_field: BTreeMap<String, usize>,
}

// ---------------------------------------------------------------------------
// Row view
// ---------------------------------------------------------------------------

/// Canonical-name view over one raw row with NA-like values removed.
struct RowView<'a> {
    location: RowLocation,
    table: &'a EraTable,
    values: HashMap<&'a str, (&'a str, &'a str)>,
}

impl<'a> RowView<'a> {
    fn new(row: &'a RawRow, table: &'a EraTable) -> Self {
        let mut values: HashMap<&'a str, (&'a str, &'a str)> =
            HashMap::with_capacity(row.fields.len());
        for (raw, value) in &row.fields {
            let value = value.trim();
            if table.is_na(value) {
                continue;
            }
            let canonical = table.canonical_name(raw);
            // Two raw columns can rename onto one canonical name. An already
            // canonical column wins, then the smaller raw name.
            let keep_existing = values.get(canonical).is_some_and(|(existing, _)| {
                *existing == canonical || (raw.as_str() != canonical && *existing < raw.as_str())
            });
            if !keep_existing {
                values.insert(canonical, (raw.as_str(), value));
            }
        }
        Self {
            location: row.location(),
            table,
            values,
        }
    }

    fn get(&self, column: &str) -> Option<&'a str> {
        self.values.get(column).map(|(_, v)| *v)
    }

    fn required(&self, column: &str) -> Result<&'a str, SchemaMismatchError> {
        self.get(column).ok_or_else(|| SchemaMismatchError::MissingField {
            location: self.location,
            field: column.into(),
        })
    }

    fn required_int(&self, column: &str) -> Result<i64, SchemaMismatchError> {
        let raw = self.required(column)?;
        parse_int(raw).ok_or_else(|| SchemaMismatchError::Unparseable {
            location: self.location,
            field: column.into(),
            value: raw.into(),
        })
    }

    /// Optional coded field. Unparseable or sentinel values become null.
    fn code(&self, column: &str) -> Option<i64> {
        let raw = self.get(column)?;
        let parsed = parse_int(raw);
        if parsed.is_none() {
            log::debug!("{}: ignoring unparseable {column} '{raw}'", self.location);
        }
        parsed.filter(|v| !self.table.is_sentinel(column, *v))
    }
}

fn parse_int(raw: &str) -> Option<i64> {
    raw.parse::<i64>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|f| f.is_finite() && f.fract() == 0.0)
            .map(|f| f as i64)
    })
}

// ---------------------------------------------------------------------------
// Harmonizer
// ---------------------------------------------------------------------------

pub struct Harmonizer {
    tables: EraTables,
}

impl Harmonizer {
    pub fn new(tables: EraTables) -> Self {
        Self { tables }
    }

    /// Harmonize one row. `Ok(None)` for dispositions that take no part in
    /// linkage (denials, withdrawals, ...).
    pub fn harmonize_row(
        &self,
        row: &RawRow,
        event_id: EventId,
    ) -> Result<Option<CanonicalLoanEvent>, SchemaMismatchError> {
        let era = row.schema_era;
        let table = self.tables.table(era);
        let view = RowView::new(row, table);

        let activity_year = view.required_int("activity_year")?;
        if !(1981..=2100).contains(&activity_year) {
            return Err(SchemaMismatchError::Unparseable {
                location: view.location,
                field: "activity_year".into(),
                value: activity_year.to_string(),
            });
        }
        let reporter_key = reporter_key(era, &view)?;
        let action_taken = view.required_int("action_taken")?;
        let Some(event_role) = EventRole::from_action_taken(action_taken) else {
            return Ok(None);
        };

        if activity_year != i64::from(row.source_year) {
            log::debug!(
                "{}: activity_year {activity_year} differs from partition year",
                view.location
            );
        }

        Ok(Some(CanonicalLoanEvent {
            event_id,
            event_role,
            activity_year: activity_year as i32,
            schema_era: era,
            reporter_key,
            geo_key: geo_key(era, &view),
            loan_type: view.code("loan_type").and_then(LoanType::from_code),
            loan_purpose: view.code("loan_purpose").and_then(|c| loan_purpose(era, c)),
            occupancy_type: view.code("occupancy_type").and_then(|c| occupancy_type(era, c)),
            property_type: property_type(era, &view),
            loan_amount: loan_amount(table, &view),
            purchaser_type: view.code("purchaser_type").and_then(|c| purchaser_type(era, c)),
            applicant: applicant_profile(&view),
            reported_at_index: row.row_index,
        }))
    }

    /// Lazily harmonize a row stream. Recoverable row errors are logged and
    /// counted; only fatal errors (duplicate identity) are yielded.
    pub fn events<'a, I>(
        &'a self,
        rows: I,
        assigner: &'a mut IdentityAssigner,
    ) -> HarmonizedEvents<'a, I::IntoIter>
    where
        I: IntoIterator<Item = RawRow>,
    {
        HarmonizedEvents {
            harmonizer: self,
            assigner,
            rows: rows.into_iter(),
            stats: HarmonizeStats::default(),
        }
    }
}

pub struct HarmonizedEvents<'a, I> {
    harmonizer: &'a Harmonizer,
    assigner: &'a mut IdentityAssigner,
    rows: I,
    stats: HarmonizeStats,
}

impl<I> HarmonizedEvents<'_, I> {
    pub fn stats(&self) -> &HarmonizeStats {
        &self.stats
    }
}

impl<I: Iterator<Item = RawRow>> Iterator for HarmonizedEvents<'_, I> {
    type Item = Result<CanonicalLoanEvent, LinkageError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let row = self.rows.next()?;
            self.stats.rows_read += 1;

            let event_id = match self.assigner.assign(row.location()) {
                Ok(id) => id,
                Err(e) => return Some(Err(e)),
            };

            match self.harmonizer.harmonize_row(&row, event_id) {
                Ok(Some(event)) => {
                    match event.event_role {
                        EventRole::Origination => self.stats.originations += 1,
                        EventRole::Purchase => self.stats.purchases += 1,
                    }
                    return Some(Ok(event));
                }
                Ok(None) => self.stats.filtered += 1,
                Err(e) => {
                    log::warn!("dropping row: {e}");
                    let field = match &e {
                        SchemaMismatchError::MissingField { field, .. }
                        | SchemaMismatchError::Unparseable { field, .. } => field.clone(),
                    };
                    *self.stats.dropped_by_field.entry(field).or_insert(0) += 1;
                    self.stats.dropped += 1;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Field rules
// ---------------------------------------------------------------------------

fn reporter_key(era: SchemaEra, view: &RowView<'_>) -> Result<ReporterKey, SchemaMismatchError> {
    match era {
        SchemaEra::Post2018 => Ok(ReporterKey(view.required("lei")?.to_ascii_uppercase())),
        SchemaEra::Pre2007 | SchemaEra::Period2007To2017 => {
            let agency = view.required_int("agency_code")?;
            let respondent = view.required("respondent_id")?;
            Ok(ReporterKey(format!("{agency}-{}", respondent.to_ascii_uppercase())))
        }
    }
}

fn loan_amount(table: &EraTable, view: &RowView<'_>) -> Option<u64> {
    let raw = view.get("loan_amount")?;
    let Ok(value) = raw.parse::<f64>() else {
        log::debug!("{}: ignoring unparseable loan_amount '{raw}'", view.location);
        return None;
    };
    let sentinel = value.fract() == 0.0 && table.is_sentinel("loan_amount", value as i64);
    if !value.is_finite() || sentinel {
        return None;
    }
    let scaled = (value * table.multiplier("loan_amount")).round();
    (scaled >= 1.0).then_some(scaled as u64)
}

fn geo_key(era: SchemaEra, view: &RowView<'_>) -> GeoKey {
    match era {
        SchemaEra::Post2018 => {
            let county = view
                .code("county_code")
                .filter(|c| (1000..100_000).contains(c))
                .map(|c| format!("{c:05}"));
            let state = match &county {
                Some(c) => Some(c[..2].to_string()),
                None => view.get("state_code").and_then(|s| match parse_int(s) {
                    Some(n) if (1..100).contains(&n) => Some(format!("{n:02}")),
                    Some(_) => None,
                    None => state_fips(s).map(str::to_string),
                }),
            };
            let tract = county.as_ref().and_then(|c| {
                view.code("census_tract")
                    .filter(|t| *t > 0)
                    .map(|t| format!("{t:011}"))
                    .filter(|t| t.starts_with(c.as_str()))
            });
            GeoKey { state, county, tract }
        }
        SchemaEra::Pre2007 | SchemaEra::Period2007To2017 => {
            let state = view
                .code("state_code")
                .filter(|s| (1..100).contains(s))
                .map(|s| format!("{s:02}"));
            let county = state.as_ref().and_then(|s| {
                view.code("county_code")
                    .filter(|c| (0..1000).contains(c))
                    .map(|c| format!("{s}{c:03}"))
            });
            // Tracts are published as decimals, e.g. "0047.01" → "004701".
            let tract = county.as_ref().and_then(|c| {
                let raw = view.get("census_tract")?;
                let tract = raw.parse::<f64>().ok().filter(|t| t.is_finite() && *t > 0.0)?;
                let digits = (tract * 100.0).round() as i64;
                (digits < 1_000_000).then(|| format!("{c}{digits:06}"))
            });
            GeoKey { state, county, tract }
        }
    }
}

fn loan_purpose(era: SchemaEra, code: i64) -> Option<LoanPurpose> {
    match (era, code) {
        (_, 1) => Some(LoanPurpose::HomePurchase),
        (_, 2) => Some(LoanPurpose::HomeImprovement),
        (SchemaEra::Post2018, 31 | 32) => Some(LoanPurpose::Refinance),
        (SchemaEra::Post2018, 4) => Some(LoanPurpose::Other),
        (SchemaEra::Pre2007 | SchemaEra::Period2007To2017, 3) => Some(LoanPurpose::Refinance),
        _ => None,
    }
}

fn occupancy_type(era: SchemaEra, code: i64) -> Option<OccupancyType> {
    match (era, code) {
        (_, 1) => Some(OccupancyType::PrincipalResidence),
        (SchemaEra::Post2018, 2 | 3) => Some(OccupancyType::NotPrincipalResidence),
        (SchemaEra::Pre2007 | SchemaEra::Period2007To2017, 2) => {
            Some(OccupancyType::NotPrincipalResidence)
        }
        _ => None,
    }
}

fn property_type(era: SchemaEra, view: &RowView<'_>) -> Option<PropertyType> {
    match era {
        SchemaEra::Pre2007 | SchemaEra::Period2007To2017 => match view.code("property_type")? {
            1 => Some(PropertyType::OneToFourFamily),
            2 => Some(PropertyType::ManufacturedHousing),
            3 => Some(PropertyType::Multifamily),
            _ => None,
        },
        SchemaEra::Post2018 => {
            let units = view.get("total_units").and_then(|u| match parse_int(u) {
                Some(n) => Some(n),
                None if matches!(u, "5-24" | "25-49" | "50-99" | "100-149" | ">149") => Some(5),
                None => None,
            });
            if units.is_some_and(|n| n >= 5) {
                return Some(PropertyType::Multifamily);
            }
            match view.code("construction_method")? {
                1 => Some(PropertyType::OneToFourFamily),
                2 => Some(PropertyType::ManufacturedHousing),
                _ => None,
            }
        }
    }
}

fn purchaser_type(era: SchemaEra, code: i64) -> Option<PurchaserType> {
    let pre2018 = era != SchemaEra::Post2018;
    match code {
        0 => Some(PurchaserType::NotSold),
        1 => Some(PurchaserType::FannieMae),
        2 => Some(PurchaserType::GinnieMae),
        3 => Some(PurchaserType::FreddieMac),
        4 => Some(PurchaserType::FarmerMac),
        5 => Some(PurchaserType::PrivateSecuritizer),
        6 => Some(PurchaserType::CommercialBankOrSavings),
        7 if pre2018 => Some(PurchaserType::CreditUnionOrMortgageCompany),
        71 if !pre2018 => Some(PurchaserType::CreditUnionOrMortgageCompany),
        72 if !pre2018 => Some(PurchaserType::LifeInsuranceCompany),
        8 => Some(PurchaserType::Affiliate),
        9 => Some(PurchaserType::Other),
        _ => None,
    }
}

/// Asian (21-27) and Pacific Islander (41-44) subcategories fold into their group.
fn race_group(code: i64) -> i64 {
    match code {
        21..=27 => 2,
        41..=44 => 4,
        c => c,
    }
}

fn ethnicity_group(code: i64) -> i64 {
    match code {
        11..=14 => 1,
        c => c,
    }
}

/// `{prefix}_1` through `{prefix}_5`.
fn coded_slots(view: &RowView<'_>, prefix: &str, group: fn(i64) -> i64) -> [Option<i64>; 5] {
    let mut slots = [None; 5];
    for (n, slot) in slots.iter_mut().enumerate() {
        *slot = view.code(&format!("{prefix}_{}", n + 1)).map(group);
    }
    slots
}

fn applicant_profile(view: &RowView<'_>) -> ApplicantProfile {
    let age = |column: &str| view.get(column).map(str::to_string);
    ApplicantProfile {
        sex: view.code("applicant_sex"),
        co_sex: view.code("co_applicant_sex"),
        age: age("applicant_age"),
        co_age: age("co_applicant_age"),
        races: coded_slots(view, "applicant_race", race_group),
        co_races: coded_slots(view, "co_applicant_race", race_group),
        ethnicities: coded_slots(view, "applicant_ethnicity", ethnicity_group),
        co_ethnicities: coded_slots(view, "co_applicant_ethnicity", ethnicity_group),
        income: view.code("income"),
    }
}
