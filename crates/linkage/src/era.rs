//! Per-era correction tables.
//!
//! Each schema era gets a fixed column-rename map, a unit/scale table and a
//! sentinel list. The tables are configuration: built-in defaults cover the
//! published formats and can be replaced per era under `[eras.<era>]`.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::model::SchemaEra;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EraTable {
    /// Raw column name → canonical column name.
    #[serde(default)]
    pub renames: BTreeMap<String, String>,
    /// Canonical numeric column → multiplier (e.g. thousands → units).
    #[serde(default)]
    pub scale: BTreeMap<String, f64>,
    /// Raw string values that mean "not reported" in any column.
    #[serde(default)]
    pub na_values: Vec<String>,
    /// Canonical numeric column → coded values that mean "not reported".
    #[serde(default)]
    pub numeric_sentinels: BTreeMap<String, Vec<i64>>,
}

impl EraTable {
    pub fn canonical_name<'a>(&'a self, raw: &'a str) -> &'a str {
        self.renames.get(raw).map(String::as_str).unwrap_or(raw)
    }

    pub fn is_na(&self, value: &str) -> bool {
        self.na_values.iter().any(|na| na == value)
    }

    pub fn is_sentinel(&self, column: &str, value: i64) -> bool {
        self.numeric_sentinels
            .get(column)
            .is_some_and(|codes| codes.contains(&value))
    }

    pub fn multiplier(&self, column: &str) -> f64 {
        self.scale.get(column).copied().unwrap_or(1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EraTables {
    pub pre2007: EraTable,
    pub period_2007_2017: EraTable,
    pub post2018: EraTable,
}

impl EraTables {
    pub fn table(&self, era: SchemaEra) -> &EraTable {
        match era {
            SchemaEra::Pre2007 => &self.pre2007,
            SchemaEra::Period2007To2017 => &self.period_2007_2017,
            SchemaEra::Post2018 => &self.post2018,
        }
    }
}

const NA_VALUES: &[&str] = &["", "NA", "N/A", "na", "nan", "Exempt", "Not Applicable"];

const PRE2018_RENAMES: &[(&str, &str)] = &[
    ("as_of_year", "activity_year"),
    ("occupancy", "occupancy_type"),
    ("owner_occupancy", "occupancy_type"),
    ("loan_amount_000s", "loan_amount"),
    ("census_tract_number", "census_tract"),
    ("applicant_income_000s", "income"),
    ("applicant_ethnicity", "applicant_ethnicity_1"),
    ("co_applicant_ethnicity", "co_applicant_ethnicity_1"),
    ("msamd", "msa_md"),
];

const POST2018_RENAMES: &[(&str, &str)] = &[
    ("derived_msa-md", "msa_md"),
    ("derived_msa_md", "msa_md"),
];

/// Post-2018 applicant columns are hyphenated (`co-applicant_race-1`).
fn post2018_renames() -> BTreeMap<String, String> {
    let mut renames: BTreeMap<String, String> = POST2018_RENAMES
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    for field in ["sex", "age"] {
        renames.insert(format!("co-applicant_{field}"), format!("co_applicant_{field}"));
    }
    for field in ["race", "ethnicity"] {
        for n in 1..=5 {
            renames.insert(format!("applicant_{field}-{n}"), format!("applicant_{field}_{n}"));
            renames.insert(
                format!("co-applicant_{field}-{n}"),
                format!("co_applicant_{field}_{n}"),
            );
        }
    }
    renames
}

fn pre2018_table() -> EraTable {
    EraTable {
        renames: PRE2018_RENAMES
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        scale: BTreeMap::from([("loan_amount".to_string(), 1000.0)]),
        na_values: NA_VALUES.iter().map(|s| s.to_string()).collect(),
        numeric_sentinels: BTreeMap::new(),
    }
}

impl Default for EraTables {
    fn default() -> Self {
        Self {
            pre2007: pre2018_table(),
            period_2007_2017: pre2018_table(),
            post2018: EraTable {
                renames: post2018_renames(),
                scale: BTreeMap::new(),
                na_values: NA_VALUES.iter().map(|s| s.to_string()).collect(),
                numeric_sentinels: BTreeMap::from([(
                    "loan_amount".to_string(),
                    vec![-1111, 1111, -99999, 99999],
                )]),
            },
        }
    }
}

/// Postal abbreviation → 2-digit state FIPS code.
const STATE_FIPS: &[(&str, &str)] = &[
    ("AL", "01"), ("AK", "02"), ("AZ", "04"), ("AR", "05"), ("CA", "06"),
    ("CO", "08"), ("CT", "09"), ("DE", "10"), ("DC", "11"), ("FL", "12"),
    ("GA", "13"), ("HI", "15"), ("ID", "16"), ("IL", "17"), ("IN", "18"),
    ("IA", "19"), ("KS", "20"), ("KY", "21"), ("LA", "22"), ("ME", "23"),
    ("MD", "24"), ("MA", "25"), ("MI", "26"), ("MN", "27"), ("MS", "28"),
    ("MO", "29"), ("MT", "30"), ("NE", "31"), ("NV", "32"), ("NH", "33"),
    ("NJ", "34"), ("NM", "35"), ("NY", "36"), ("NC", "37"), ("ND", "38"),
    ("OH", "39"), ("OK", "40"), ("OR", "41"), ("PA", "42"), ("RI", "44"),
    ("SC", "45"), ("SD", "46"), ("TN", "47"), ("TX", "48"), ("UT", "49"),
    ("VT", "50"), ("VA", "51"), ("WA", "53"), ("WV", "54"), ("WI", "55"),
    ("WY", "56"), ("AS", "60"), ("GU", "66"), ("MP", "69"), ("PR", "72"),
    ("VI", "78"),
];

pub fn state_fips(abbreviation: &str) -> Option<&'static str> {
    let upper = abbreviation.to_ascii_uppercase();
    STATE_FIPS
        .iter()
        .find(|(abbr, _)| *abbr == upper)
        .map(|(_, fips)| *fips)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pre2018_scales_amounts_to_units() {
        let tables = EraTables::default();
        let t = tables.table(SchemaEra::Period2007To2017);
        assert_eq!(t.canonical_name("loan_amount_000s"), "loan_amount");
        assert_eq!(t.multiplier("loan_amount"), 1000.0);
        assert_eq!(tables.table(SchemaEra::Post2018).multiplier("loan_amount"), 1.0);
    }

    #[test]
    fn post2018_hyphenated_applicant_columns() {
        let tables = EraTables::default();
        let post = tables.table(SchemaEra::Post2018);
        assert_eq!(post.canonical_name("co-applicant_race-3"), "co_applicant_race_3");
        assert_eq!(post.canonical_name("applicant_ethnicity-1"), "applicant_ethnicity_1");
        assert_eq!(post.canonical_name("co-applicant_age"), "co_applicant_age");
        assert_eq!(post.canonical_name("derived_msa-md"), "msa_md");
    }

    #[test]
    fn unknown_columns_keep_their_name() {
        let tables = EraTables::default();
        assert_eq!(tables.table(SchemaEra::Pre2007).canonical_name("lei"), "lei");
    }

    #[test]
    fn na_and_sentinels() {
        let tables = EraTables::default();
        let post = tables.table(SchemaEra::Post2018);
        assert!(post.is_na("Exempt"));
        assert!(post.is_na(""));
        assert!(!post.is_na("0"));
        assert!(post.is_sentinel("loan_amount", 1111));
        assert!(!post.is_sentinel("loan_type", 1111));
    }

    #[test]
    fn override_one_era_from_toml() {
        let tables: EraTables = toml::from_str(
            r#"
[post2018]
na_values = ["NA"]
[post2018.scale]
loan_amount = 1.0
"#,
        )
        .unwrap();
        assert_eq!(tables.post2018.na_values, vec!["NA"]);
        // Untouched eras keep built-in defaults.
        assert_eq!(tables.pre2007.multiplier("loan_amount"), 1000.0);
    }

    #[test]
    fn state_abbreviation_lookup() {
        assert_eq!(state_fips("DC"), Some("11"));
        assert_eq!(state_fips("md"), Some("24"));
        assert_eq!(state_fips("XX"), None);
    }
}
