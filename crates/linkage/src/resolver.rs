//! Deterministic greedy one-to-one assignment over scored pairs.
//!
//! Eligible positive pairs are ranked by score descending, ties broken by
//! `(origination_id, purchase_id)` ascending, and walked once. A pair is
//! accepted when its score clears `min_match_score` and neither side has been
//! claimed by an earlier pair. The result depends only on the pair set, never
//! on input order or thread scheduling.

use std::collections::{HashMap, HashSet};

use ordered_float::OrderedFloat;
use serde::Serialize;

use crate::blocking::BlockingIndex;
use crate::error::LinkageError;
use crate::identity::EventId;
use crate::model::{
    CandidatePair, CanonicalLoanEvent, EventRole, MatchStatus, PairEligibility, ReasonCode,
};

// ---------------------------------------------------------------------------
// Claim ledger
// ---------------------------------------------------------------------------

/// Which events are already part of an accepted pair. Owned by one resolver
/// pass.
#[derive(Debug)]
pub struct ClaimLedger {
    claimed: Vec<bool>,
}

impl ClaimLedger {
    pub fn new(events: usize) -> Self {
        Self {
            claimed: vec![false; events],
        }
    }

    pub fn is_claimed(&self, event: usize) -> bool {
        self.claimed[event]
    }

    /// Claim both sides, or neither if either is taken.
    pub fn try_claim(&mut self, origination: usize, purchase: usize) -> bool {
        if self.claimed[origination] || self.claimed[purchase] {
            return false;
        }
        self.claimed[origination] = true;
        self.claimed[purchase] = true;
        true
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct EventOutcome {
    pub status: MatchStatus,
    pub reason: ReasonCode,
    /// Event index of the accepted counterpart.
    pub partner: Option<usize>,
    /// Pair index of the accepted pair, else of the best-ranked pair touching
    /// the event, else of its first unranked pair.
    pub best_pair: Option<usize>,
    pub rank: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolverStats {
    pub ranked_pairs: usize,
    pub accepted_pairs: usize,
    pub below_threshold: usize,
    pub blocked_by_claim: usize,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    /// Parallel to the event slice.
    pub outcomes: Vec<EventOutcome>,
    /// Parallel to the pair slice: 1-based position in the ranked walk.
    pub pair_ranks: Vec<Option<u64>>,
    /// Parallel to the pair slice.
    pub accepted: Vec<bool>,
    pub stats: ResolverStats,
}

// ---------------------------------------------------------------------------
// Resolve
// ---------------------------------------------------------------------------

pub fn resolve(
    events: &[CanonicalLoanEvent],
    index: &BlockingIndex,
    pairs: &[CandidatePair],
    min_match_score: f64,
) -> Result<Resolution, LinkageError> {
    let endpoints = check_preconditions(events, pairs)?;

    let mut ranked: Vec<usize> = (0..pairs.len())
        .filter(|&i| pairs[i].eligibility == PairEligibility::Eligible && pairs[i].score > 0.0)
        .collect();
    ranked.sort_by(|&a, &b| {
        let (pa, pb) = (&pairs[a], &pairs[b]);
        OrderedFloat(pb.score)
            .cmp(&OrderedFloat(pa.score))
            .then_with(|| pa.origination_id.cmp(&pb.origination_id))
            .then_with(|| pa.purchase_id.cmp(&pb.purchase_id))
    });

    let mut ledger = ClaimLedger::new(events.len());
    let mut pair_ranks = vec![None; pairs.len()];
    let mut accepted = vec![false; pairs.len()];
    let mut best_pair: Vec<Option<usize>> = vec![None; events.len()];
    let mut stats = ResolverStats {
        ranked_pairs: ranked.len(),
        ..Default::default()
    };

    for (position, &pi) in ranked.iter().enumerate() {
        let rank = position as u64 + 1;
        pair_ranks[pi] = Some(rank);
        let (o, p) = endpoints[pi];
        best_pair[o].get_or_insert(pi);
        best_pair[p].get_or_insert(pi);

        if pairs[pi].score < min_match_score {
            stats.below_threshold += 1;
            continue;
        }
        if ledger.try_claim(o, p) {
            accepted[pi] = true;
            best_pair[o] = Some(pi);
            best_pair[p] = Some(pi);
            stats.accepted_pairs += 1;
        } else {
            stats.blocked_by_claim += 1;
        }
    }

    // Events with no ranked pair point at their first unranked pair.
    let mut unranked: Vec<usize> = (0..pairs.len()).filter(|&i| pair_ranks[i].is_none()).collect();
    unranked.sort_by(|&a, &b| {
        (&pairs[a].origination_id, &pairs[a].purchase_id)
            .cmp(&(&pairs[b].origination_id, &pairs[b].purchase_id))
    });
    for &pi in &unranked {
        let (o, p) = endpoints[pi];
        best_pair[o].get_or_insert(pi);
        best_pair[p].get_or_insert(pi);
    }

    // An unmatched event that lost a pair above the threshold was outbid.
    // One whose ranked pairs all fell below it stays ambiguous.
    let mut has_ranked = vec![false; events.len()];
    let mut cleared_threshold = vec![false; events.len()];
    for &pi in &ranked {
        let (o, p) = endpoints[pi];
        has_ranked[o] = true;
        has_ranked[p] = true;
        if pairs[pi].score >= min_match_score {
            cleared_threshold[o] = true;
            cleared_threshold[p] = true;
        }
    }

    let mut withheld = vec![false; events.len()];
    for &i in index.withheld() {
        withheld[i] = true;
    }

    let outcomes = (0..events.len())
        .map(|i| {
            let best = best_pair[i];
            if ledger.is_claimed(i) {
                let pi = best.filter(|&pi| accepted[pi]);
                let partner = pi.map(|pi| {
                    let (o, p) = endpoints[pi];
                    if o == i { p } else { o }
                });
                return EventOutcome {
                    status: MatchStatus::Matched,
                    reason: ReasonCode::Accepted,
                    partner,
                    best_pair: pi,
                    rank: pi.and_then(|pi| pair_ranks[pi]),
                };
            }
            let (status, reason) = if withheld[i] {
                (MatchStatus::UnmatchedNoCandidate, ReasonCode::SoldToNonReporter)
            } else if best.is_none() {
                (MatchStatus::UnmatchedNoCandidate, ReasonCode::NoBlockPartner)
            } else if !has_ranked[i] {
                (MatchStatus::UnmatchedNoCandidate, ReasonCode::NoEligibleCandidate)
            } else if cleared_threshold[i] {
                (MatchStatus::UnmatchedNoCandidate, ReasonCode::CandidatesClaimed)
            } else {
                (MatchStatus::AmbiguousUnresolved, ReasonCode::BelowMinScore)
            };
            EventOutcome {
                status,
                reason,
                partner: None,
                best_pair: best,
                rank: None,
            }
        })
        .collect();

    log::debug!(
        "resolver: {} ranked pairs, {} accepted, {} below threshold, {} blocked by claims",
        stats.ranked_pairs,
        stats.accepted_pairs,
        stats.below_threshold,
        stats.blocked_by_claim
    );

    Ok(Resolution {
        outcomes,
        pair_ranks,
        accepted,
        stats,
    })
}

/// Map every pair to `(origination index, purchase index)`, rejecting input
/// the walk cannot handle safely.
fn check_preconditions(
    events: &[CanonicalLoanEvent],
    pairs: &[CandidatePair],
) -> Result<Vec<(usize, usize)>, LinkageError> {
    let mut by_id: HashMap<&EventId, usize> = HashMap::with_capacity(events.len());
    for (i, event) in events.iter().enumerate() {
        if by_id.insert(&event.event_id, i).is_some() {
            return Err(LinkageError::ResolverPrecondition(format!(
                "event {} appears twice",
                event.event_id
            )));
        }
    }

    let lookup = |id: &EventId, role: EventRole| -> Result<usize, LinkageError> {
        let i = *by_id.get(id).ok_or_else(|| {
            LinkageError::ResolverPrecondition(format!("pair references unknown event {id}"))
        })?;
        if events[i].event_role != role {
            return Err(LinkageError::ResolverPrecondition(format!(
                "pair uses {id} as {role} but it is {}",
                events[i].event_role
            )));
        }
        Ok(i)
    };

    let mut seen = HashSet::with_capacity(pairs.len());
    let mut endpoints = Vec::with_capacity(pairs.len());
    for pair in pairs {
        let o = lookup(&pair.origination_id, EventRole::Origination)?;
        let p = lookup(&pair.purchase_id, EventRole::Purchase)?;
        if !pair.score.is_finite() || !(0.0..=1.0).contains(&pair.score) {
            return Err(LinkageError::ResolverPrecondition(format!(
                "pair ({}, {}) has score {} outside [0, 1]",
                pair.origination_id, pair.purchase_id, pair.score
            )));
        }
        if !seen.insert((o, p)) {
            return Err(LinkageError::ResolverPrecondition(format!(
                "pair ({}, {}) scored twice",
                pair.origination_id, pair.purchase_id
            )));
        }
        endpoints.push((o, p));
    }
    Ok(endpoints)
}
