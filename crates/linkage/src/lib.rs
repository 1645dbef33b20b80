//! `hmda-linkage`: origination-to-purchase record linkage for HMDA data.
//!
//! Pure engine crate: receives raw rows tagged with their partition, returns
//! a one-to-one linkage of originations to later purchases with per-record
//! match status. Reading files is left to the caller, except for the small
//! CSV helper in [`engine`].

pub mod audit;
pub mod blocking;
pub mod compat;
pub mod config;
pub mod engine;
pub mod era;
pub mod error;
pub mod harmonize;
pub mod identity;
pub mod model;
pub mod resolver;
pub mod scorer;

pub use config::LinkageConfig;
pub use engine::{link, run};
pub use error::{LinkageError, SchemaMismatchError};
pub use harmonize::RawRow;
pub use identity::{assign, EventId, FileType};
pub use model::{CanonicalLoanEvent, LinkageReport, LinkageResult, LinkageSummary, MatchStatus};
