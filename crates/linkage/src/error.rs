use thiserror::Error;

use crate::identity::{EventId, RowLocation};

/// Per-row harmonization failure. Recoverable: the row is dropped and counted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaMismatchError {
    /// A required identity-bearing field is absent (or a sentinel).
    #[error("{location}: missing required field '{field}'")]
    MissingField { location: RowLocation, field: String },
    /// A required field is present but cannot be parsed.
    #[error("{location}: cannot parse {field} '{value}'")]
    Unparseable {
        location: RowLocation,
        field: String,
        value: String,
    },
}

impl SchemaMismatchError {
    pub fn location(&self) -> &RowLocation {
        match self {
            Self::MissingField { location, .. } | Self::Unparseable { location, .. } => location,
        }
    }
}

/// Run-level error. Every variant aborts the run before any result is produced.
#[derive(Debug, Error)]
pub enum LinkageError {
    /// TOML parse / deserialization error.
    #[error("config parse error: {0}")]
    ConfigParse(String),
    /// Config validation error (bad weight, threshold out of range, ...).
    #[error("config validation error: {0}")]
    ConfigValidation(String),
    /// `block_key_fields` names a field the blocking index does not know.
    #[error("unknown block key field '{0}'")]
    UnknownBlockKeyField(String),
    /// The same (year, file type, row) triple was assigned twice in one run.
    #[error("identity invariant violated: {0} assigned twice (source partition read twice?)")]
    DuplicateIdentity(EventId),
    /// The resolver was handed input it cannot match safely.
    #[error("resolver precondition violated: {0}")]
    ResolverPrecondition(String),
    /// Source rows could not be decoded.
    #[error("input error: {0}")]
    Input(String),
    /// Results could not be serialized for digesting.
    #[error("serialization error: {0}")]
    Serialization(String),
}
