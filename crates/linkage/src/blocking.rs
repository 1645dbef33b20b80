//! Blocking: partition events into buckets so only plausible pairs are scored.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::{BlockKeyField, LinkageConfig, SHARED_REPORTER_GROUP};
use crate::error::LinkageError;
use crate::model::{BlockKey, CanonicalLoanEvent, EventRole};

/// Key component for a null field. Null-on-null events share a bucket and
/// the scorer drops the field from the denominator.
const NULL_COMPONENT: &str = "NA";

/// One bucket: originations and purchases as indices into the event slice,
/// each ordered by `(reported_at_index, event_id)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub key: BlockKey,
    pub originations: Vec<usize>,
    pub purchases: Vec<usize>,
}

impl Block {
    pub fn pair_count(&self) -> usize {
        self.originations.len() * self.purchases.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BlockingStats {
    pub blocks: usize,
    pub candidate_pairs: usize,
    pub largest_block_pairs: usize,
    /// Originations sold to a non-reporting purchaser.
    pub withheld: usize,
}

#[derive(Debug, Clone)]
pub struct BlockingIndex {
    blocks: Vec<Block>,
    withheld: Vec<usize>,
    stats: BlockingStats,
}

impl BlockingIndex {
    pub fn build(
        events: &[CanonicalLoanEvent],
        config: &LinkageConfig,
    ) -> Result<Self, LinkageError> {
        let fields = config.block_key()?;
        let windowed = fields.contains(&BlockKeyField::YearWindow);

        let mut buckets: BTreeMap<BlockKey, (Vec<usize>, Vec<usize>)> = BTreeMap::new();
        let mut withheld = Vec::new();

        for (i, event) in events.iter().enumerate() {
            match event.event_role {
                EventRole::Origination => {
                    if config.is_non_reporting(event.purchaser_type) {
                        withheld.push(i);
                        continue;
                    }
                    let key = block_key(&fields, event, event.activity_year);
                    buckets.entry(key).or_default().0.push(i);
                }
                EventRole::Purchase => {
                    // A purchase of year P can follow an origination of any
                    // year in P - window ..= P.
                    let back = if windowed { i32::from(config.year_window) } else { 0 };
                    for anchor in (event.activity_year - back)..=event.activity_year {
                        let key = block_key(&fields, event, anchor);
                        buckets.entry(key).or_default().1.push(i);
                    }
                }
            }
        }

        let by_report_order = |a: &usize, b: &usize| {
            let (ea, eb) = (&events[*a], &events[*b]);
            ea.reported_at_index
                .cmp(&eb.reported_at_index)
                .then_with(|| ea.event_id.cmp(&eb.event_id))
        };

        let mut blocks = Vec::new();
        let mut stats = BlockingStats {
            withheld: withheld.len(),
            ..Default::default()
        };
        for (key, (mut originations, mut purchases)) in buckets {
            if originations.is_empty() || purchases.is_empty() {
                continue;
            }
            originations.sort_by(by_report_order);
            purchases.sort_by(by_report_order);
            let block = Block {
                key,
                originations,
                purchases,
            };
            stats.candidate_pairs += block.pair_count();
            stats.largest_block_pairs = stats.largest_block_pairs.max(block.pair_count());
            blocks.push(block);
        }
        stats.blocks = blocks.len();

        log::debug!(
            "blocking: {} blocks, {} candidate pairs (largest {}), {} originations withheld",
            stats.blocks,
            stats.candidate_pairs,
            stats.largest_block_pairs,
            stats.withheld
        );

        Ok(Self {
            blocks,
            withheld,
            stats,
        })
    }

    /// Non-empty blocks in key order.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Event indices of originations kept out of blocking, ascending.
    pub fn withheld(&self) -> &[usize] {
        &self.withheld
    }

    pub fn stats(&self) -> &BlockingStats {
        &self.stats
    }
}

fn block_key(fields: &[BlockKeyField], event: &CanonicalLoanEvent, anchor_year: i32) -> BlockKey {
    let component = |value: Option<String>| value.unwrap_or_else(|| NULL_COMPONENT.to_string());
    BlockKey(
        fields
            .iter()
            .map(|field| match field {
                // Affiliation is judged per pair by the scorer, never by bucket.
                BlockKeyField::ReporterGroup => SHARED_REPORTER_GROUP.to_string(),
                BlockKeyField::State => component(event.geo_key.state.clone()),
                BlockKeyField::County => component(event.geo_key.county.clone()),
                BlockKeyField::LoanType => component(event.loan_type.map(|t| t.to_string())),
                BlockKeyField::LoanPurpose => component(event.loan_purpose.map(|p| p.to_string())),
                BlockKeyField::YearWindow => anchor_year.to_string(),
            })
            .collect(),
    )
}
