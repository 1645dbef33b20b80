//! Linkage report: result rows, run summary and per-event evidence.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::blocking::BlockingStats;
use crate::error::LinkageError;
use crate::harmonize::HarmonizeStats;
use crate::identity::EventId;
use crate::model::{
    CandidatePair, CanonicalLoanEvent, EventRole, LinkageReport, LinkageResult, LinkageSummary,
    MatchStatus, PairAudit, StatusCounts,
};
use crate::resolver::Resolution;

impl LinkageReport {
    /// Evidence behind the event's accepted pairing, or its best rejected one.
    /// `None` for events that were never paired.
    pub fn explain(&self, event_id: &EventId) -> Option<&PairAudit> {
        self.audits.get(event_id)
    }

    pub fn audited_events(&self) -> usize {
        self.audits.len()
    }
}

/// `sha256:<hex>` over the JSON serialization of the result rows.
pub fn results_digest(results: &[LinkageResult]) -> Result<String, LinkageError> {
    let bytes =
        serde_json::to_vec(results).map_err(|e| LinkageError::Serialization(e.to_string()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("sha256:{:x}", hasher.finalize()))
}

pub fn build_report(
    events: &[CanonicalLoanEvent],
    pairs: &[CandidatePair],
    resolution: &Resolution,
    harmonize: &HarmonizeStats,
    blocking: &BlockingStats,
    include_unmatched_purchases: bool,
) -> Result<LinkageReport, LinkageError> {
    let result_row = |i: usize, event: &CanonicalLoanEvent| {
        let outcome = &resolution.outcomes[i];
        let score = match outcome.status {
            MatchStatus::Matched | MatchStatus::AmbiguousUnresolved => {
                outcome.best_pair.map(|pi| pairs[pi].score)
            }
            MatchStatus::UnmatchedNoCandidate => None,
        };
        let partner_id = outcome.partner.map(|j| events[j].event_id.clone());
        let (origination_id, purchase_id) = match event.event_role {
            EventRole::Origination => (Some(event.event_id.clone()), partner_id),
            EventRole::Purchase => (partner_id, Some(event.event_id.clone())),
        };
        LinkageResult {
            origination_id,
            purchase_id,
            activity_year: event.activity_year,
            score,
            match_status: outcome.status,
            resolved_at_rank: outcome.rank,
            reason: outcome.reason,
        }
    };

    let mut results: Vec<LinkageResult> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| e.event_role == EventRole::Origination)
        .map(|(i, e)| result_row(i, e))
        .collect();
    results.sort_by(|a, b| {
        a.activity_year
            .cmp(&b.activity_year)
            .then_with(|| a.origination_id.cmp(&b.origination_id))
    });

    let mut summary = LinkageSummary {
        rows_read: harmonize.rows_read,
        rows_dropped: harmonize.dropped,
        rows_filtered: harmonize.filtered,
        blocks: blocking.blocks,
        pairs_scored: pairs.len(),
        ..Default::default()
    };
    for event in events {
        match event.event_role {
            EventRole::Origination => summary.originations += 1,
            EventRole::Purchase => summary.purchases += 1,
        }
    }
    for pair in pairs {
        *summary
            .pairs_by_eligibility
            .entry(pair.eligibility.to_string())
            .or_insert(0) += 1;
    }
    for row in &results {
        summary.totals.record(row.match_status);
        summary
            .by_year
            .entry(row.activity_year)
            .or_insert_with(StatusCounts::default)
            .record(row.match_status);
    }

    if include_unmatched_purchases {
        let mut purchase_rows: Vec<LinkageResult> = events
            .iter()
            .enumerate()
            .filter(|(i, e)| {
                e.event_role == EventRole::Purchase
                    && resolution.outcomes[*i].status != MatchStatus::Matched
            })
            .map(|(i, e)| result_row(i, e))
            .collect();
        purchase_rows.sort_by(|a, b| {
            a.activity_year
                .cmp(&b.activity_year)
                .then_with(|| a.purchase_id.cmp(&b.purchase_id))
        });
        summary.purchases_unmatched = Some(purchase_rows.len());
        results.extend(purchase_rows);
    }

    summary.results_sha256 = results_digest(&results)?;

    let mut audits = BTreeMap::new();
    for (i, event) in events.iter().enumerate() {
        let Some(pi) = resolution.outcomes[i].best_pair else {
            continue;
        };
        let pair = &pairs[pi];
        audits.insert(
            event.event_id.clone(),
            PairAudit {
                origination_id: pair.origination_id.clone(),
                purchase_id: pair.purchase_id.clone(),
                block_key: pair.block_key.to_string(),
                score: pair.score,
                eligibility: pair.eligibility,
                field_agreement: pair.field_agreement.clone(),
                rank: resolution.pair_ranks[pi],
                accepted: resolution.accepted[pi],
            },
        );
    }

    Ok(LinkageReport {
        summary,
        results,
        audits,
    })
}
