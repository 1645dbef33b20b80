//! Applicant-level contradiction checks between an origination and a purchase.
//!
//! A purchaser reports the same borrowers the originator did, so a pair whose
//! applicant demographics or income disagree cannot describe one loan. Every
//! rule is off by default and enabled under `[compatibility]`. A field that is
//! null on either side is never a contradiction.

use std::fmt;

use serde::Deserialize;

use crate::model::ApplicantProfile;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CompatibilityRules {
    pub sex: bool,
    pub age: bool,
    pub race: bool,
    pub ethnicity: bool,
    /// Largest allowed income difference, in thousands.
    pub income_tolerance: Option<u64>,
}

impl CompatibilityRules {
    pub fn any_enabled(&self) -> bool {
        self.sex || self.age || self.race || self.ethnicity || self.income_tolerance.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Contradiction {
    Sex,
    Age,
    Race,
    Ethnicity,
    Income,
}

impl fmt::Display for Contradiction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sex => write!(f, "sex"),
            Self::Age => write!(f, "age"),
            Self::Race => write!(f, "race"),
            Self::Ethnicity => write!(f, "ethnicity"),
            Self::Income => write!(f, "income"),
        }
    }
}

// ---------------------------------------------------------------------------
// Code tables
// ---------------------------------------------------------------------------

/// Sex codes that state a fact. 4 (not applicable) says nothing.
const SEX_STATED: &[i64] = &[1, 2, 3, 5, 6];

const AGE_NOT_APPLICABLE: &str = "8888";
const AGE_NO_CO_APPLICANT: &str = "9999";

struct CodedField {
    /// Primary codes that must be corroborated by the other side.
    stated: std::ops::RangeInclusive<i64>,
    /// Primary codes that match anything.
    exempt: &'static [i64],
    /// Co-applicant primary meaning "no co-applicant".
    no_co_applicant: i64,
}

const RACE: CodedField = CodedField {
    stated: 1..=6,
    exempt: &[7, 8],
    no_co_applicant: 8,
};

const ETHNICITY: CodedField = CodedField {
    stated: 1..=3,
    exempt: &[4, 5],
    no_co_applicant: 5,
};

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// First enabled rule the pair breaks, checked in declaration order.
pub fn contradiction(
    o: &ApplicantProfile,
    p: &ApplicantProfile,
    rules: &CompatibilityRules,
) -> Option<Contradiction> {
    if rules.sex && (sex_conflict(o.sex, p.sex) || sex_conflict(o.co_sex, p.co_sex)) {
        return Some(Contradiction::Sex);
    }
    if rules.age && age_conflict(o, p) {
        return Some(Contradiction::Age);
    }
    if rules.race && coded_conflict(&RACE, &o.races, &p.races, &o.co_races, &p.co_races) {
        return Some(Contradiction::Race);
    }
    if rules.ethnicity
        && coded_conflict(
            &ETHNICITY,
            &o.ethnicities,
            &p.ethnicities,
            &o.co_ethnicities,
            &p.co_ethnicities,
        )
    {
        return Some(Contradiction::Ethnicity);
    }
    if let Some(tolerance) = rules.income_tolerance {
        if let (Some(a), Some(b)) = (o.income, p.income) {
            if a.abs_diff(b) > tolerance {
                return Some(Contradiction::Income);
            }
        }
    }
    None
}

fn sex_conflict(a: Option<i64>, b: Option<i64>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a != b && SEX_STATED.contains(&a) && SEX_STATED.contains(&b),
        _ => false,
    }
}

fn age_exempt(age: &str) -> bool {
    age == AGE_NOT_APPLICABLE || age == AGE_NO_CO_APPLICANT
}

fn age_pair_conflict(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a != b && !age_exempt(a) && !age_exempt(b),
        _ => false,
    }
}

fn age_conflict(o: &ApplicantProfile, p: &ApplicantProfile) -> bool {
    let (oa, pa) = (o.age.as_deref(), p.age.as_deref());
    let (oc, pc) = (o.co_age.as_deref(), p.co_age.as_deref());
    if age_pair_conflict(oa, pa) || age_pair_conflict(oc, pc) {
        return true;
    }
    // A missing co-applicant on one side needs an exempt age on the other.
    let one_sided = |a: Option<&str>, b: Option<&str>| match (a, b) {
        (Some(a), Some(b)) => a == AGE_NO_CO_APPLICANT && !age_exempt(b),
        _ => false,
    };
    one_sided(oc, pc) || one_sided(pc, oc)
}

/// `a`'s primary code is corroborated by `b`: equal or exempt primary on
/// `b`, or present among `b`'s secondary codes.
fn corroborated(field: &CodedField, a: &[Option<i64>; 5], b: &[Option<i64>; 5]) -> bool {
    let Some(code) = a[0] else {
        return true;
    };
    if !field.stated.contains(&code) {
        return true;
    }
    let Some(other) = b[0] else {
        return true;
    };
    other == code || field.exempt.contains(&other) || b[1..].contains(&Some(code))
}

fn coded_conflict(
    field: &CodedField,
    o: &[Option<i64>; 5],
    p: &[Option<i64>; 5],
    o_co: &[Option<i64>; 5],
    p_co: &[Option<i64>; 5],
) -> bool {
    if !corroborated(field, o, p) || !corroborated(field, p, o) {
        return true;
    }
    let lone = |a: &[Option<i64>; 5], b: &[Option<i64>; 5]| match (a[0], b[0]) {
        (Some(a), Some(b)) => a == field.no_co_applicant && !field.exempt.contains(&b),
        _ => false,
    };
    if lone(o_co, p_co) || lone(p_co, o_co) {
        return true;
    }
    !corroborated(field, o_co, p_co) || !corroborated(field, p_co, o_co)
}
