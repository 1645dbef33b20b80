use std::collections::HashMap;
use std::io::Read;

use crate::audit::build_report;
use crate::blocking::BlockingIndex;
use crate::config::LinkageConfig;
use crate::error::LinkageError;
use crate::harmonize::{HarmonizeStats, Harmonizer, RawRow};
use crate::identity::{FileType, IdentityAssigner};
use crate::model::{CanonicalLoanEvent, LinkageReport};
use crate::resolver::resolve;
use crate::scorer::{score_blocks, ScoringContext};

/// Run the full pipeline: harmonize, block, score, resolve, audit.
///
/// All-or-nothing: a fatal error anywhere returns no partial results.
pub fn run<I>(config: &LinkageConfig, rows: I) -> Result<LinkageReport, LinkageError>
where
    I: IntoIterator<Item = RawRow>,
{
    config.validate()?;

    let harmonizer = Harmonizer::new(config.eras.clone());
    let mut assigner = IdentityAssigner::new();
    let mut stream = harmonizer.events(rows, &mut assigner);
    let events = stream.by_ref().collect::<Result<Vec<_>, _>>()?;
    let stats = stream.stats().clone();

    log::debug!(
        "harmonized {} rows: {} originations, {} purchases, {} filtered, {} dropped",
        stats.rows_read,
        stats.originations,
        stats.purchases,
        stats.filtered,
        stats.dropped
    );

    link(config, &events, &stats)
}

/// Link already-harmonized events.
pub fn link(
    config: &LinkageConfig,
    events: &[CanonicalLoanEvent],
    harmonize: &HarmonizeStats,
) -> Result<LinkageReport, LinkageError> {
    let index = BlockingIndex::build(events, config)?;
    let ctx = ScoringContext::from_config(config);
    let pairs = score_blocks(index.blocks(), events, &ctx);
    let resolution = resolve(events, &index, &pairs, config.min_match_score)?;
    let report = build_report(
        events,
        &pairs,
        &resolution,
        harmonize,
        index.stats(),
        config.include_unmatched_purchases,
    )?;

    let s = &report.summary;
    log::info!(
        "{}: {} rows read ({} dropped, {} filtered), {} blocks, {} pairs; \
         {} matched, {} ambiguous, {} unmatched",
        config.name,
        s.rows_read,
        s.rows_dropped,
        s.rows_filtered,
        s.blocks,
        s.pairs_scored,
        s.totals.matched,
        s.totals.ambiguous_unresolved,
        s.totals.unmatched_no_candidate
    );

    Ok(report)
}

/// Partition year and file type from a published file name, e.g.
/// `2021_public_lar.csv` → `(2021, Public)`.
pub fn partition_from_file_name(name: &str) -> Result<(i32, FileType), LinkageError> {
    let year = name
        .as_bytes()
        .windows(4)
        .enumerate()
        .filter(|(i, w)| {
            w.iter().all(u8::is_ascii_digit)
                && (*i == 0 || !name.as_bytes()[i - 1].is_ascii_digit())
                && name.as_bytes().get(i + 4).map_or(true, |b| !b.is_ascii_digit())
        })
        .filter_map(|(i, _)| name[i..i + 4].parse::<i32>().ok())
        .find(|y| (1981..=2100).contains(y))
        .ok_or_else(|| LinkageError::Input(format!("no reporting year in file name '{name}'")))?;
    let file_type = FileType::from_file_name(name)
        .ok_or_else(|| LinkageError::Input(format!("no file type in file name '{name}'")))?;
    Ok((year, file_type))
}

/// Load one partition's CSV into raw rows. Row indices count data rows from 0.
pub fn load_csv_rows<R: Read>(
    reader: R,
    source_year: i32,
    file_type: FileType,
) -> Result<Vec<RawRow>, LinkageError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| LinkageError::Input(e.to_string()))?
        .iter()
        .map(|h| h.trim().to_ascii_lowercase())
        .collect();

    let mut rows = Vec::new();
    for (row_index, record) in reader.records().enumerate() {
        let record = record.map_err(|e| {
            LinkageError::Input(format!("{source_year}{file_type} row {row_index}: {e}"))
        })?;
        let fields: HashMap<String, String> = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.clone(), v.to_string()))
            .collect();
        rows.push(RawRow::new(source_year, file_type, row_index as u64, fields));
    }
    Ok(rows)
}
