//! Stable per-record identity.
//!
//! An [`EventId`] is a pure function of `(source_year, file_type, row_index)`:
//! `"{year}{file_type}_{row_index:09}"`. It is the only cross-run-stable
//! reference into the dataset, so any later process can re-derive it from the
//! partition and row position alone.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LinkageError;

// ---------------------------------------------------------------------------
// File type
// ---------------------------------------------------------------------------

/// Source file family within a reporting year. Rendered as a one-letter code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    /// `a`: three-year national loan-level file.
    ThreeYear,
    /// `b`: one-year national loan-level file.
    OneYear,
    /// `c`: public LAR / panel / transmittal sheet.
    Public,
    /// `d`: nationwide file.
    Nationwide,
    /// `e`: modified LAR.
    ModifiedLar,
}

impl FileType {
    pub fn code(self) -> char {
        match self {
            Self::ThreeYear => 'a',
            Self::OneYear => 'b',
            Self::Public => 'c',
            Self::Nationwide => 'd',
            Self::ModifiedLar => 'e',
        }
    }

    pub fn from_code(code: char) -> Option<Self> {
        match code {
            'a' => Some(Self::ThreeYear),
            'b' => Some(Self::OneYear),
            'c' => Some(Self::Public),
            'd' => Some(Self::Nationwide),
            'e' => Some(Self::ModifiedLar),
            _ => None,
        }
    }

    /// Derive the file type from a published file name, e.g.
    /// `2021_public_lar_csv.zip` → [`FileType::Public`].
    pub fn from_file_name(name: &str) -> Option<Self> {
        let stem = name.to_ascii_lowercase();
        if stem.contains("three_year") {
            Some(Self::ThreeYear)
        } else if stem.contains("one_year") {
            Some(Self::OneYear)
        } else if stem.contains("public_lar")
            || stem.contains("public_panel")
            || stem.contains("public_ts")
        {
            Some(Self::Public)
        } else if stem.contains("nationwide") {
            Some(Self::Nationwide)
        } else if stem.contains("mlar") {
            Some(Self::ModifiedLar)
        } else {
            None
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for FileType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => {
                Self::from_code(c).ok_or_else(|| format!("unknown file type code '{s}'"))
            }
            _ => Err(format!("file type must be a single letter a-e, got '{s}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Row location
// ---------------------------------------------------------------------------

/// Where a raw row came from. Carried by every recoverable row error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RowLocation {
    pub source_year: i32,
    pub file_type: FileType,
    pub row_index: u64,
}

impl fmt::Display for RowLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{} row {}", self.source_year, self.file_type, self.row_index)
    }
}

// ---------------------------------------------------------------------------
// Event id
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Recover `(source_year, file_type, row_index)` from the id.
    pub fn parse(&self) -> Option<RowLocation> {
        let (prefix, index) = self.0.split_once('_')?;
        let code = prefix.chars().last()?;
        let year_str = &prefix[..prefix.len() - code.len_utf8()];
        Some(RowLocation {
            source_year: year_str.parse().ok()?,
            file_type: FileType::from_code(code)?,
            row_index: index.parse().ok()?,
        })
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EventId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = EventId(s.to_string());
        match id.parse() {
            Some(loc) if assign(loc.source_year, loc.file_type, loc.row_index) == id => Ok(id),
            _ => Err(format!("not a canonical event id: '{s}'")),
        }
    }
}

/// Deterministic identity for one raw row.
pub fn assign(source_year: i32, file_type: FileType, row_index: u64) -> EventId {
    EventId(format!("{source_year}{file_type}_{row_index:09}"))
}

// ---------------------------------------------------------------------------
// Assigner
// ---------------------------------------------------------------------------

/// Run-scoped assigner that refuses to hand out the same triple twice.
///
/// A repeat means a partition was read twice and is fatal.
#[derive(Debug, Default)]
pub struct IdentityAssigner {
    seen: HashSet<RowLocation>,
}

impl IdentityAssigner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&mut self, location: RowLocation) -> Result<EventId, LinkageError> {
        let id = assign(location.source_year, location.file_type, location.row_index);
        if !self.seen.insert(location) {
            return Err(LinkageError::DuplicateIdentity(id));
        }
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(year: i32, file_type: FileType, row_index: u64) -> RowLocation {
        RowLocation { source_year: year, file_type, row_index }
    }

    #[test]
    fn assign_is_zero_padded() {
        assert_eq!(assign(2021, FileType::ThreeYear, 42).as_str(), "2021a_000000042");
        assert_eq!(assign(2006, FileType::Nationwide, 0).as_str(), "2006d_000000000");
    }

    #[test]
    fn assign_is_idempotent() {
        let a = assign(2021, FileType::ThreeYear, 42);
        let b = assign(2021, FileType::ThreeYear, 42);
        assert_eq!(a, b);
    }

    #[test]
    fn parse_recovers_triple() {
        let id = assign(2019, FileType::Public, 123_456);
        assert_eq!(id.parse(), Some(loc(2019, FileType::Public, 123_456)));
    }

    #[test]
    fn from_str_rejects_non_canonical() {
        assert!("2021a_000000042".parse::<EventId>().is_ok());
        assert!("2021a_42".parse::<EventId>().is_err());
        assert!("2021z_000000042".parse::<EventId>().is_err());
        assert!("garbage".parse::<EventId>().is_err());
    }

    #[test]
    fn ids_order_by_row_within_partition() {
        let lo = assign(2020, FileType::OneYear, 9);
        let hi = assign(2020, FileType::OneYear, 10);
        assert!(lo < hi);
    }

    #[test]
    fn assigner_rejects_duplicate_triple() {
        let mut assigner = IdentityAssigner::new();
        assigner.assign(loc(2020, FileType::Public, 1)).unwrap();
        assigner.assign(loc(2020, FileType::OneYear, 1)).unwrap();
        let err = assigner.assign(loc(2020, FileType::Public, 1)).unwrap_err();
        assert!(matches!(
            err,
            LinkageError::DuplicateIdentity(ref id) if id.as_str() == "2020c_000000001"
        ));
        assert_eq!(assigner.len(), 2);
    }

    #[test]
    fn file_type_from_file_name() {
        let cases = [
            ("2021_public_lar_csv.zip", Some(FileType::Public)),
            ("year_2019_three_year.csv", Some(FileType::ThreeYear)),
            ("2020_combined_mlar.txt", Some(FileType::ModifiedLar)),
            ("hmda_2005_nationwide.dat", Some(FileType::Nationwide)),
            ("loans.csv", None),
        ];
        for (name, expected) in cases {
            assert_eq!(FileType::from_file_name(name), expected, "{name}");
        }
    }
}
