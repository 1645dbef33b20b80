//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract; scripts rely on them.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain           | Description                              |
//! |---------|------------------|------------------------------------------|
//! | 0       | Universal        | Success                                  |
//! | 2       | Universal        | CLI usage error (bad args, missing file) |
//! | 10-19   | link             | Linkage run codes                        |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant in the appropriate range
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into the relevant command's error handling

use hmda_linkage::LinkageError;

// =============================================================================
// Universal (0-2)
// =============================================================================

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// Usage error - bad arguments, missing required options.
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Link (10-19)
// =============================================================================

/// Config file unreadable, unparseable or invalid (including unknown block
/// key fields).
pub const EXIT_LINK_INVALID_CONFIG: u8 = 10;

/// Input file unreadable, badly named, or not valid CSV.
pub const EXIT_LINK_INPUT: u8 = 11;

/// The same (year, file type, row) was seen twice: a partition was supplied
/// more than once.
pub const EXIT_LINK_DUPLICATE_IDENTITY: u8 = 12;

/// Internal invariant violated between scoring and resolution.
pub const EXIT_LINK_RESOLVER: u8 = 13;

/// Run completed but ambiguous results exist and `--fail-on-ambiguous` was set.
pub const EXIT_LINK_AMBIGUOUS: u8 = 14;

/// Output could not be serialized or written.
pub const EXIT_LINK_OUTPUT: u8 = 15;

/// Map a run-level linkage error to its exit code.
pub fn linkage_exit_code(err: &LinkageError) -> u8 {
    match err {
        LinkageError::ConfigParse(_)
        | LinkageError::ConfigValidation(_)
        | LinkageError::UnknownBlockKeyField(_) => EXIT_LINK_INVALID_CONFIG,
        LinkageError::Input(_) => EXIT_LINK_INPUT,
        LinkageError::DuplicateIdentity(_) => EXIT_LINK_DUPLICATE_IDENTITY,
        LinkageError::ResolverPrecondition(_) => EXIT_LINK_RESOLVER,
        LinkageError::Serialization(_) => EXIT_LINK_OUTPUT,
    }
}
