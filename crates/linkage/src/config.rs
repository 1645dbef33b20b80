use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use serde::Deserialize;

use crate::compat::CompatibilityRules;
use crate::era::EraTables;
use crate::error::LinkageError;
use crate::model::{PurchaserType, ReporterKey};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct LinkageConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_block_key_fields")]
    pub block_key_fields: Vec<String>,
    /// Maximum `purchase_year - origination_year`.
    #[serde(default = "default_year_window")]
    pub year_window: u8,
    #[serde(default)]
    pub score_weights: ScoreWeights,
    #[serde(default = "default_min_match_score")]
    pub min_match_score: f64,
    #[serde(default)]
    pub allow_same_reporter_match: bool,
    #[serde(default)]
    pub allow_affiliate_match: bool,
    /// Group name → reporter keys belonging to one corporate family.
    #[serde(default)]
    pub affiliate_groups: BTreeMap<String, Vec<String>>,
    /// Purchasers that never file a purchase record. Originations sold to
    /// them are kept out of blocking.
    #[serde(default = "default_non_reporting_purchaser_types")]
    pub non_reporting_purchaser_types: Vec<PurchaserType>,
    /// Emit a result row for every purchase left unmatched.
    #[serde(default)]
    pub include_unmatched_purchases: bool,
    /// Applicant contradictions that make a pair ineligible. All off by default.
    #[serde(default)]
    pub compatibility: CompatibilityRules,
    #[serde(default)]
    pub eras: EraTables,
}

fn default_name() -> String {
    "hmda-linkage".into()
}

fn default_block_key_fields() -> Vec<String> {
    ["reporter_group", "state", "loan_type", "year_window"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_year_window() -> u8 {
    1
}

fn default_min_match_score() -> f64 {
    0.5
}

fn default_non_reporting_purchaser_types() -> Vec<PurchaserType> {
    vec![
        PurchaserType::FannieMae,
        PurchaserType::GinnieMae,
        PurchaserType::FreddieMac,
        PurchaserType::FarmerMac,
    ]
}

impl Default for LinkageConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            block_key_fields: default_block_key_fields(),
            year_window: default_year_window(),
            score_weights: ScoreWeights::default(),
            min_match_score: default_min_match_score(),
            allow_same_reporter_match: false,
            allow_affiliate_match: false,
            affiliate_groups: BTreeMap::new(),
            non_reporting_purchaser_types: default_non_reporting_purchaser_types(),
            include_unmatched_purchases: false,
            compatibility: CompatibilityRules::default(),
            eras: EraTables::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Weights
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub loan_amount: f64,
    pub loan_type: f64,
    pub loan_purpose: f64,
    pub occupancy_type: f64,
    pub property_type: f64,
    pub geography: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            loan_amount: 0.4,
            loan_type: 0.1,
            loan_purpose: 0.1,
            occupancy_type: 0.1,
            property_type: 0.1,
            geography: 0.2,
        }
    }
}

impl ScoreWeights {
    fn named(&self) -> [(&'static str, f64); 6] {
        [
            ("loan_amount", self.loan_amount),
            ("loan_type", self.loan_type),
            ("loan_purpose", self.loan_purpose),
            ("occupancy_type", self.occupancy_type),
            ("property_type", self.property_type),
            ("geography", self.geography),
        ]
    }
}

// ---------------------------------------------------------------------------
// Block key fields
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKeyField {
    ReporterGroup,
    State,
    County,
    LoanType,
    LoanPurpose,
    YearWindow,
}

impl BlockKeyField {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "reporter_group" => Some(Self::ReporterGroup),
            "state" => Some(Self::State),
            "county" => Some(Self::County),
            "loan_type" => Some(Self::LoanType),
            "loan_purpose" => Some(Self::LoanPurpose),
            "year_window" => Some(Self::YearWindow),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::ReporterGroup => "reporter_group",
            Self::State => "state",
            Self::County => "county",
            Self::LoanType => "loan_type",
            Self::LoanPurpose => "loan_purpose",
            Self::YearWindow => "year_window",
        }
    }
}

impl fmt::Display for BlockKeyField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Affiliate groups
// ---------------------------------------------------------------------------

/// `reporter_group` block key component. Every reporter shares it, so
/// configuring affiliates never moves a reporter out of a bucket. Reserved as
/// a group name.
pub const SHARED_REPORTER_GROUP: &str = "*";

/// Reporter key → affiliate group, built once per run.
#[derive(Debug, Clone, Default)]
pub struct AffiliateIndex {
    group_of: HashMap<String, String>,
}

impl AffiliateIndex {
    pub fn group(&self, reporter: &ReporterKey) -> Option<&str> {
        self.group_of.get(reporter.as_str()).map(String::as_str)
    }

    /// Distinct reporters that share a configured group.
    pub fn same_family(&self, a: &ReporterKey, b: &ReporterKey) -> bool {
        a != b && matches!((self.group(a), self.group(b)), (Some(x), Some(y)) if x == y)
    }
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl LinkageConfig {
    pub fn from_toml(input: &str) -> Result<Self, LinkageError> {
        let config: LinkageConfig =
            toml::from_str(input).map_err(|e| LinkageError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LinkageError> {
        for (name, weight) in self.score_weights.named() {
            if !weight.is_finite() || weight < 0.0 {
                return Err(LinkageError::ConfigValidation(format!(
                    "score_weights.{name} must be a finite non-negative number, got {weight}"
                )));
            }
        }
        if self.score_weights.loan_amount <= 0.0 {
            return Err(LinkageError::ConfigValidation(
                "score_weights.loan_amount must be positive".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.min_match_score) {
            return Err(LinkageError::ConfigValidation(format!(
                "min_match_score must be within [0, 1], got {}",
                self.min_match_score
            )));
        }

        if self.year_window > 10 {
            return Err(LinkageError::ConfigValidation(format!(
                "year_window must be at most 10, got {}",
                self.year_window
            )));
        }

        self.block_key()?;

        let mut seen: HashMap<String, &str> = HashMap::new();
        for (group, members) in &self.affiliate_groups {
            if group == SHARED_REPORTER_GROUP || group.trim().is_empty() {
                return Err(LinkageError::ConfigValidation(format!(
                    "'{group}' is not a valid affiliate group name"
                )));
            }
            for member in members {
                let key = normalize_reporter(member);
                if let Some(other) = seen.insert(key, group.as_str()) {
                    if other != group.as_str() {
                        return Err(LinkageError::ConfigValidation(format!(
                            "reporter '{member}' is in affiliate groups '{other}' and '{group}'"
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// Resolve `block_key_fields` in configured order.
    pub fn block_key(&self) -> Result<Vec<BlockKeyField>, LinkageError> {
        let mut seen = HashSet::new();
        let mut fields = Vec::with_capacity(self.block_key_fields.len());
        for name in &self.block_key_fields {
            let field = BlockKeyField::from_name(name)
                .ok_or_else(|| LinkageError::UnknownBlockKeyField(name.clone()))?;
            if !seen.insert(field) {
                return Err(LinkageError::ConfigValidation(format!(
                    "block key field '{name}' listed twice"
                )));
            }
            fields.push(field);
        }
        Ok(fields)
    }

    pub fn affiliate_index(&self) -> AffiliateIndex {
        let mut group_of = HashMap::new();
        for (group, members) in &self.affiliate_groups {
            for member in members {
                group_of.insert(normalize_reporter(member), group.clone());
            }
        }
        AffiliateIndex { group_of }
    }

    pub fn is_non_reporting(&self, purchaser: Option<PurchaserType>) -> bool {
        purchaser.is_some_and(|p| self.non_reporting_purchaser_types.contains(&p))
    }
}

/// Reporter keys are harmonized to upper case.
fn normalize_reporter(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
name = "Test linkage"
block_key_fields = ["reporter_group", "county", "year_window"]
year_window = 2
min_match_score = 0.6
allow_same_reporter_match = true
include_unmatched_purchases = true
non_reporting_purchaser_types = ["fannie_mae", "freddie_mac"]

[score_weights]
loan_amount = 0.5
geography = 0.3

[affiliate_groups]
big_bank = ["549300abcdefghij1234", "9-0000451965"]

[compatibility]
sex = true
race = true
income_tolerance = 1

[eras.post2018]
na_values = ["NA", "Exempt"]
"#;

    #[test]
    fn parse_defaults() {
        let config = LinkageConfig::from_toml("").unwrap();
        assert_eq!(config.name, "hmda-linkage");
        assert_eq!(config.year_window, 1);
        assert_eq!(config.min_match_score, 0.5);
        assert!(!config.allow_same_reporter_match);
        assert!(!config.allow_affiliate_match);
        assert_eq!(config.score_weights, ScoreWeights::default());
        assert!(!config.compatibility.any_enabled());
        assert_eq!(
            config.block_key().unwrap(),
            vec![
                BlockKeyField::ReporterGroup,
                BlockKeyField::State,
                BlockKeyField::LoanType,
                BlockKeyField::YearWindow,
            ]
        );
        assert!(config.is_non_reporting(Some(PurchaserType::GinnieMae)));
        assert!(!config.is_non_reporting(Some(PurchaserType::PrivateSecuritizer)));
        assert!(!config.is_non_reporting(None));
    }

    #[test]
    fn parse_full() {
        let config = LinkageConfig::from_toml(FULL).unwrap();
        assert_eq!(config.name, "Test linkage");
        assert_eq!(config.year_window, 2);
        assert_eq!(config.min_match_score, 0.6);
        assert!(config.allow_same_reporter_match);
        assert!(config.include_unmatched_purchases);
        // Unset weights keep their defaults.
        assert_eq!(config.score_weights.loan_amount, 0.5);
        assert_eq!(config.score_weights.loan_type, 0.1);
        assert_eq!(config.score_weights.geography, 0.3);
        assert_eq!(config.non_reporting_purchaser_types.len(), 2);
        assert!(!config.is_non_reporting(Some(PurchaserType::GinnieMae)));
        assert_eq!(config.eras.post2018.na_values, vec!["NA", "Exempt"]);
        assert!(config.compatibility.sex && config.compatibility.race);
        assert!(!config.compatibility.age);
        assert_eq!(config.compatibility.income_tolerance, Some(1));
    }

    #[test]
    fn reject_unknown_compatibility_type() {
        let err = LinkageConfig::from_toml("[compatibility]
sex = \"yes\"").unwrap_err();
        assert!(matches!(err, LinkageError::ConfigParse(_)));
    }

    #[test]
    fn affiliate_index_normalizes_keys() {
        let config = LinkageConfig::from_toml(FULL).unwrap();
        let index = config.affiliate_index();
        let lei = ReporterKey("549300ABCDEFGHIJ1234".into());
        let legacy = ReporterKey("9-0000451965".into());
        let outsider = ReporterKey("OTHER".into());
        assert_eq!(index.group(&lei), Some("big_bank"));
        assert!(index.same_family(&lei, &legacy));
        assert!(!index.same_family(&lei, &lei));
        assert!(!index.same_family(&lei, &outsider));
    }

    #[test]
    fn reject_unknown_block_field() {
        let err = LinkageConfig::from_toml(r#"block_key_fields = ["state", "msa"]"#).unwrap_err();
        assert!(matches!(err, LinkageError::UnknownBlockKeyField(ref f) if f == "msa"));
    }

    #[test]
    fn reject_duplicate_block_field() {
        let err = LinkageConfig::from_toml(r#"block_key_fields = ["state", "state"]"#).unwrap_err();
        assert!(err.to_string().contains("listed twice"));
    }

    #[test]
    fn reject_threshold_out_of_range() {
        let err = LinkageConfig::from_toml("min_match_score = 1.5").unwrap_err();
        assert!(err.to_string().contains("min_match_score"));
    }

    #[test]
    fn reject_negative_weight() {
        let err = LinkageConfig::from_toml("[score_weights]\ngeography = -0.1").unwrap_err();
        assert!(err.to_string().contains("score_weights.geography"));
    }

    #[test]
    fn reject_zero_amount_weight() {
        let err = LinkageConfig::from_toml("[score_weights]\nloan_amount = 0.0").unwrap_err();
        assert!(err.to_string().contains("loan_amount must be positive"));
    }

    #[test]
    fn reject_wide_year_window() {
        let err = LinkageConfig::from_toml("year_window = 11").unwrap_err();
        assert!(err.to_string().contains("year_window"));
    }

    #[test]
    fn reject_reporter_in_two_groups() {
        let input = r#"
[affiliate_groups]
a = ["LEI1"]
b = ["lei1"]
"#;
        let err = LinkageConfig::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("'a' and 'b'"));
    }

    #[test]
    fn reject_reserved_group_name() {
        let err = LinkageConfig::from_toml("[affiliate_groups]\n\"*\" = [\"LEI1\"]").unwrap_err();
        assert!(matches!(err, LinkageError::ConfigValidation(_)));
    }

    #[test]
    fn reject_unknown_purchaser_type() {
        let err = LinkageConfig::from_toml(r#"non_reporting_purchaser_types = ["fannie"]"#);
        assert!(matches!(err, Err(LinkageError::ConfigParse(_))));
    }
}
