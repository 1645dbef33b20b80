use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identity::EventId;

// ---------------------------------------------------------------------------
// Canonical vocabulary
// ---------------------------------------------------------------------------

/// Reporting-format generation a raw row was published in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaEra {
    /// 1981–2006 legacy LAR files.
    Pre2007,
    /// 2007–2017 loan-level files (agency + respondent id, amounts in thousands).
    Period2007To2017,
    /// 2018 onward (LEI, amounts in dollars, expanded fields).
    Post2018,
}

impl SchemaEra {
    pub fn for_year(year: i32) -> Self {
        if year < 2007 {
            Self::Pre2007
        } else if year < 2018 {
            Self::Period2007To2017
        } else {
            Self::Post2018
        }
    }
}

impl fmt::Display for SchemaEra {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pre2007 => write!(f, "pre2007"),
            Self::Period2007To2017 => write!(f, "period_2007_2017"),
            Self::Post2018 => write!(f, "post2018"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventRole {
    Origination,
    Purchase,
}

impl EventRole {
    /// Map an `action_taken` disposition code. Dispositions other than
    /// "originated" (1) and "purchased" (6) take no part in linkage.
    pub fn from_action_taken(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Origination),
            6 => Some(Self::Purchase),
            _ => None,
        }
    }
}

impl fmt::Display for EventRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Origination => write!(f, "origination"),
            Self::Purchase => write!(f, "purchase"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanType {
    Conventional,
    Fha,
    Va,
    FsaRhs,
}

impl LoanType {
    /// Codes are stable across all eras.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Conventional),
            2 => Some(Self::Fha),
            3 => Some(Self::Va),
            4 => Some(Self::FsaRhs),
            _ => None,
        }
    }
}

impl fmt::Display for LoanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conventional => write!(f, "conventional"),
            Self::Fha => write!(f, "fha"),
            Self::Va => write!(f, "va"),
            Self::FsaRhs => write!(f, "fsa_rhs"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanPurpose {
    HomePurchase,
    HomeImprovement,
    /// Post-2018 splits refinance (31) and cash-out refinance (32); both land here.
    Refinance,
    Other,
}

impl fmt::Display for LoanPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HomePurchase => write!(f, "home_purchase"),
            Self::HomeImprovement => write!(f, "home_improvement"),
            Self::Refinance => write!(f, "refinance"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Pre-2018 only distinguishes owner-occupied from not; post-2018 second
/// residences and investment properties both map to `NotPrincipalResidence`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OccupancyType {
    PrincipalResidence,
    NotPrincipalResidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    OneToFourFamily,
    ManufacturedHousing,
    Multifamily,
}

/// Category of the institution that acquired the loan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaserType {
    NotSold,
    FannieMae,
    GinnieMae,
    FreddieMac,
    FarmerMac,
    PrivateSecuritizer,
    CommercialBankOrSavings,
    CreditUnionOrMortgageCompany,
    LifeInsuranceCompany,
    Affiliate,
    Other,
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// Normalized lender identifier: LEI post-2018, `"{agency}-{respondent_id}"` before.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReporterKey(pub String);

impl ReporterKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReporterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `(state, county, tract)` in FIPS form: 2-digit state, 5-digit
/// state+county, 11-digit state+county+tract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GeoKey {
    pub state: Option<String>,
    pub county: Option<String>,
    pub tract: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoAgreement {
    /// Whole `(state, county, tract)` tuple equal.
    Tract,
    /// Same county, tract differs or is missing on one side.
    County,
    Mismatch,
}

impl GeoAgreement {
    pub fn credit(self) -> f64 {
        match self {
            Self::Tract => 1.0,
            Self::County => 0.5,
            Self::Mismatch => 0.0,
        }
    }
}

impl GeoKey {
    /// `None` when either side lacks a county (geography is then not compared).
    pub fn agreement(&self, other: &GeoKey) -> Option<GeoAgreement> {
        let (a, b) = (self.county.as_ref()?, other.county.as_ref()?);
        Some(if self == other {
            GeoAgreement::Tract
        } else if a == b {
            GeoAgreement::County
        } else {
            GeoAgreement::Mismatch
        })
    }
}

// ---------------------------------------------------------------------------
// Canonical record
// ---------------------------------------------------------------------------

/// Borrower fields kept for contradiction checks, as reported. Race and
/// ethnicity hold codes 1 to 5 of the row, subcategories folded into their
/// parent group. Null when unreported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplicantProfile {
    pub sex: Option<i64>,
    pub co_sex: Option<i64>,
    /// Age band (`"25-34"`) or the coded `"8888"` / `"9999"`.
    pub age: Option<String>,
    pub co_age: Option<String>,
    pub races: [Option<i64>; 5],
    pub co_races: [Option<i64>; 5],
    pub ethnicities: [Option<i64>; 5],
    pub co_ethnicities: [Option<i64>; 5],
    /// Thousands of currency units.
    pub income: Option<i64>,
}

/// One reported loan action, harmonized across eras. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalLoanEvent {
    pub event_id: EventId,
    pub event_role: EventRole,
    pub activity_year: i32,
    pub schema_era: SchemaEra,
    pub reporter_key: ReporterKey,
    pub geo_key: GeoKey,
    pub loan_type: Option<LoanType>,
    pub loan_purpose: Option<LoanPurpose>,
    pub occupancy_type: Option<OccupancyType>,
    pub property_type: Option<PropertyType>,
    /// Whole currency units.
    pub loan_amount: Option<u64>,
    pub purchaser_type: Option<PurchaserType>,
    pub applicant: ApplicantProfile,
    pub reported_at_index: u64,
}

// ---------------------------------------------------------------------------
// Blocking
// ---------------------------------------------------------------------------

/// Ordered components of a blocking bucket, one per configured field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct BlockKey(pub Vec<String>);

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("|"))
    }
}

// ---------------------------------------------------------------------------
// Pair scoring
// ---------------------------------------------------------------------------

/// Per-field agreement behind a score. `None` = not comparable (null on a side).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldAgreement {
    pub loan_amount: Option<f64>,
    pub loan_type: Option<bool>,
    pub loan_purpose: Option<bool>,
    pub occupancy_type: Option<bool>,
    pub property_type: Option<bool>,
    pub geography: Option<GeoAgreement>,
}

/// Why a pair may or may not be matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PairEligibility {
    Eligible,
    /// Purchase reported before the origination, or beyond the year window.
    TemporallyInvalid,
    /// Both sides filed by the same reporter.
    SelfTrade,
    /// Reporters in the same affiliate family, or sold to an affiliate.
    Affiliate,
    /// Applicant demographics or income contradict each other.
    Incompatible,
    /// Loan amount null on either side.
    AmountMissing,
}

impl fmt::Display for PairEligibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eligible => write!(f, "eligible"),
            Self::TemporallyInvalid => write!(f, "temporally_invalid"),
            Self::SelfTrade => write!(f, "self_trade"),
            Self::Affiliate => write!(f, "affiliate"),
            Self::Incompatible => write!(f, "incompatible"),
            Self::AmountMissing => write!(f, "amount_missing"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidatePair {
    pub origination_id: EventId,
    pub purchase_id: EventId,
    pub block_key: BlockKey,
    pub score: f64,
    pub eligibility: PairEligibility,
    pub field_agreement: FieldAgreement,
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    Matched,
    AmbiguousUnresolved,
    UnmatchedNoCandidate,
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Matched => write!(f, "MATCHED"),
            Self::AmbiguousUnresolved => write!(f, "AMBIGUOUS_UNRESOLVED"),
            Self::UnmatchedNoCandidate => write!(f, "UNMATCHED_NO_CANDIDATE"),
        }
    }
}

/// Audit reason attached to each result row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    Accepted,
    /// Only positive pairs left were below `min_match_score`.
    BelowMinScore,
    /// Every candidate was claimed by a higher-ranked pair.
    CandidatesClaimed,
    /// Pairs existed but none was eligible with a positive score.
    NoEligibleCandidate,
    /// No block with a counterpart on the other side.
    NoBlockPartner,
    /// Origination sold to a purchaser that never files a purchase record.
    SoldToNonReporter,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkageResult {
    /// `None` only on purchase-only rows.
    pub origination_id: Option<EventId>,
    pub purchase_id: Option<EventId>,
    pub activity_year: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    pub match_status: MatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at_rank: Option<u64>,
    pub reason: ReasonCode,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub matched: usize,
    pub ambiguous_unresolved: usize,
    pub unmatched_no_candidate: usize,
}

impl StatusCounts {
    pub fn record(&mut self, status: MatchStatus) {
        match status {
            MatchStatus::Matched => self.matched += 1,
            MatchStatus::AmbiguousUnresolved => self.ambiguous_unresolved += 1,
            MatchStatus::UnmatchedNoCandidate => self.unmatched_no_candidate += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.matched + self.ambiguous_unresolved + self.unmatched_no_candidate
    }
}

/// Run-level counts intended for logging and monitoring collaborators.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LinkageSummary {
    pub rows_read: usize,
    pub rows_dropped: usize,
    pub rows_filtered: usize,
    pub originations: usize,
    pub purchases: usize,
    pub blocks: usize,
    pub pairs_scored: usize,
    pub pairs_by_eligibility: BTreeMap<String, usize>,
    pub totals: StatusCounts,
    pub by_year: BTreeMap<i32, StatusCounts>,
    /// Counts over purchase-only rows, present when those rows are emitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purchases_unmatched: Option<usize>,
    /// SHA-256 of the serialized result table.
    pub results_sha256: String,
}

/// Evidence behind an event's accepted (or best rejected) pairing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairAudit {
    pub origination_id: EventId,
    pub purchase_id: EventId,
    pub block_key: String,
    pub score: f64,
    pub eligibility: PairEligibility,
    pub field_agreement: FieldAgreement,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<u64>,
    pub accepted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LinkageReport {
    pub summary: LinkageSummary,
    pub results: Vec<LinkageResult>,
    #[serde(skip)]
    pub(crate) audits: BTreeMap<EventId, PairAudit>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geo(state: &str, county: Option<&str>, tract: Option<&str>) -> GeoKey {
        GeoKey {
            state: Some(state.into()),
            county: county.map(Into::into),
            tract: tract.map(Into::into),
        }
    }

    #[test]
    fn era_for_year_boundaries() {
        assert_eq!(SchemaEra::for_year(2006), SchemaEra::Pre2007);
        assert_eq!(SchemaEra::for_year(2007), SchemaEra::Period2007To2017);
        assert_eq!(SchemaEra::for_year(2017), SchemaEra::Period2007To2017);
        assert_eq!(SchemaEra::for_year(2018), SchemaEra::Post2018);
    }

    #[test]
    fn geo_agreement_levels() {
        let a = geo("11", Some("11001"), Some("11001004701"));
        let same = a.clone();
        let other_tract = geo("11", Some("11001"), Some("11001009000"));
        let no_tract = geo("11", Some("11001"), None);
        let other_county = geo("24", Some("24031"), None);
        let no_county = geo("11", None, None);

        assert_eq!(a.agreement(&same), Some(GeoAgreement::Tract));
        assert_eq!(a.agreement(&other_tract), Some(GeoAgreement::County));
        assert_eq!(a.agreement(&no_tract), Some(GeoAgreement::County));
        assert_eq!(no_tract.agreement(&no_tract.clone()), Some(GeoAgreement::Tract));
        assert_eq!(a.agreement(&other_county), Some(GeoAgreement::Mismatch));
        assert_eq!(a.agreement(&no_county), None);
    }

    #[test]
    fn status_serializes_screaming() {
        let s = serde_json::to_string(&MatchStatus::UnmatchedNoCandidate).unwrap();
        assert_eq!(s, "\"UNMATCHED_NO_CANDIDATE\"");
    }
}
