//! `hmda-link run | validate | explain`: config-driven linkage over CSV partitions.

use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;

use hmda_linkage::engine::{load_csv_rows, partition_from_file_name};
use hmda_linkage::{EventId, LinkageConfig, LinkageError, LinkageReport, LinkageSummary, RawRow};

use crate::exit_codes::{
    linkage_exit_code, EXIT_LINK_AMBIGUOUS, EXIT_LINK_INPUT, EXIT_LINK_INVALID_CONFIG,
    EXIT_LINK_OUTPUT, EXIT_USAGE,
};
use crate::CliError;

fn link_err(code: u8, msg: impl Into<String>) -> CliError {
    CliError { code, message: msg.into(), hint: None }
}

fn from_linkage(err: LinkageError) -> CliError {
    let hint = match &err {
        LinkageError::UnknownBlockKeyField(_) => Some(
            "known fields: reporter_group, state, county, loan_type, loan_purpose, year_window"
                .to_string(),
        ),
        LinkageError::DuplicateIdentity(_) => {
            Some("each input partition may be given only once".to_string())
        }
        _ => None,
    };
    CliError { code: linkage_exit_code(&err), message: err.to_string(), hint }
}

pub fn load_config(path: &Path) -> Result<LinkageConfig, CliError> {
    let config_str = std::fs::read_to_string(path).map_err(|e| {
        link_err(EXIT_LINK_INVALID_CONFIG, format!("cannot read {}: {e}", path.display()))
    })?;
    LinkageConfig::from_toml(&config_str).map_err(from_linkage)
}

/// Read every input partition. Year and file type come from the file name.
pub fn load_inputs(paths: &[PathBuf]) -> Result<Vec<RawRow>, CliError> {
    let mut rows = Vec::new();
    for path in paths {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| link_err(EXIT_LINK_INPUT, format!("not a file: {}", path.display())))?;
        let (year, file_type) = partition_from_file_name(name).map_err(|e| CliError {
            code: EXIT_LINK_INPUT,
            message: e.to_string(),
            hint: Some("name inputs like 2021_public_lar.csv or 2012_one_year.csv".to_string()),
        })?;
        let file = File::open(path).map_err(|e| {
            link_err(EXIT_LINK_INPUT, format!("cannot read {}: {e}", path.display()))
        })?;
        let partition = load_csv_rows(file, year, file_type).map_err(from_linkage)?;
        log::info!("{}: {} rows ({year}{file_type})", path.display(), partition.len());
        rows.extend(partition);
    }
    Ok(rows)
}

fn run_linkage(config: &LinkageConfig, inputs: &[PathBuf]) -> Result<LinkageReport, CliError> {
    let rows = load_inputs(inputs)?;
    hmda_linkage::run(config, rows).map_err(from_linkage)
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), CliError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| link_err(EXIT_LINK_OUTPUT, format!("JSON serialization error: {e}")))?;
    std::fs::write(path, json).map_err(|e| {
        link_err(EXIT_LINK_OUTPUT, format!("cannot write {}: {e}", path.display()))
    })?;
    eprintln!("wrote {}", path.display());
    Ok(())
}

#[derive(Serialize)]
struct SummaryEnvelope<'a> {
    engine_version: &'static str,
    engine_commit: &'static str,
    run_at: String,
    config: &'a str,
    inputs: Vec<String>,
    summary: &'a LinkageSummary,
}

pub struct RunArgs {
    pub config: PathBuf,
    pub inputs: Vec<PathBuf>,
    pub output: Option<PathBuf>,
    pub summary: Option<PathBuf>,
    pub json: bool,
    pub fail_on_ambiguous: bool,
}

pub fn cmd_run(args: RunArgs) -> Result<(), CliError> {
    let config = load_config(&args.config)?;
    let report = run_linkage(&config, &args.inputs)?;
    let s = &report.summary;

    if let Some(ref path) = args.output {
        write_json(path, &report.results)?;
    }

    if let Some(ref path) = args.summary {
        let envelope = SummaryEnvelope {
            engine_version: env!("CARGO_PKG_VERSION"),
            engine_commit: env!("HMDA_LINK_COMMIT"),
            run_at: Utc::now().to_rfc3339(),
            config: &config.name,
            inputs: args.inputs.iter().map(|p| p.display().to_string()).collect(),
            summary: s,
        };
        write_json(path, &envelope)?;
    }

    if args.json {
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| link_err(EXIT_LINK_OUTPUT, format!("JSON serialization error: {e}")))?;
        println!("{json}");
    }

    // Human summary to stderr
    eprintln!(
        "linked {} originations against {} purchases: \
         {} matched, {} ambiguous, {} unmatched ({} rows dropped)",
        s.originations,
        s.purchases,
        s.totals.matched,
        s.totals.ambiguous_unresolved,
        s.totals.unmatched_no_candidate,
        s.rows_dropped,
    );
    eprintln!("results {}", s.results_sha256);

    if args.fail_on_ambiguous && s.totals.ambiguous_unresolved > 0 {
        return Err(link_err(
            EXIT_LINK_AMBIGUOUS,
            format!("{} ambiguous results (fail_on_ambiguous)", s.totals.ambiguous_unresolved),
        ));
    }
    Ok(())
}

pub fn cmd_validate(config_path: PathBuf) -> Result<(), CliError> {
    let config = load_config(&config_path)?;
    println!(
        "ok: {} (block key: {}; year_window {}; min_match_score {})",
        config.name,
        config.block_key_fields.join(", "),
        config.year_window,
        config.min_match_score,
    );
    Ok(())
}

pub fn cmd_explain(
    config_path: PathBuf,
    inputs: Vec<PathBuf>,
    event: EventId,
) -> Result<(), CliError> {
    let config = load_config(&config_path)?;
    let report = run_linkage(&config, &inputs)?;
    let audit = report.explain(&event).ok_or_else(|| CliError {
        code: EXIT_USAGE,
        message: format!("no candidate pair for {event}"),
        hint: Some(
            "the event was never blocked with a counterpart, or is not in these inputs".into(),
        ),
    })?;
    let json = serde_json::to_string_pretty(audit)
        .map_err(|e| link_err(EXIT_LINK_OUTPUT, format!("JSON serialization error: {e}")))?;
    println!("{json}");
    Ok(())
}
