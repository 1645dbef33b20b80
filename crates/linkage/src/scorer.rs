//! Pairwise similarity scoring within blocks.

use rayon::prelude::*;

use crate::blocking::Block;
use crate::compat::{self, CompatibilityRules};
use crate::config::{AffiliateIndex, LinkageConfig, ScoreWeights};
use crate::model::{
    BlockKey, CandidatePair, CanonicalLoanEvent, FieldAgreement, PairEligibility, PurchaserType,
};

/// Everything the scorer reads from configuration, owned so it can be shared
/// across worker threads.
#[derive(Debug, Clone)]
pub struct ScoringContext {
    pub weights: ScoreWeights,
    pub year_window: u8,
    pub allow_same_reporter_match: bool,
    pub allow_affiliate_match: bool,
    pub affiliates: AffiliateIndex,
    pub compatibility: CompatibilityRules,
}

impl ScoringContext {
    pub fn from_config(config: &LinkageConfig) -> Self {
        Self {
            weights: config.score_weights.clone(),
            year_window: config.year_window,
            allow_same_reporter_match: config.allow_same_reporter_match,
            allow_affiliate_match: config.allow_affiliate_match,
            affiliates: config.affiliate_index(),
            compatibility: config.compatibility.clone(),
        }
    }
}

fn exact<T: PartialEq>(a: Option<T>, b: Option<T>) -> Option<bool> {
    Some(a? == b?)
}

/// Per-field agreement between an origination and a purchase.
pub fn field_agreement(o: &CanonicalLoanEvent, p: &CanonicalLoanEvent) -> FieldAgreement {
    let loan_amount = match (o.loan_amount, p.loan_amount) {
        (Some(a), Some(b)) => {
            let (a, b) = (a as f64, b as f64);
            Some(1.0 - ((a - b).abs() / a.max(b).max(1.0)).min(1.0))
        }
        _ => None,
    };
    FieldAgreement {
        loan_amount,
        loan_type: exact(o.loan_type, p.loan_type),
        loan_purpose: exact(o.loan_purpose, p.loan_purpose),
        occupancy_type: exact(o.occupancy_type, p.occupancy_type),
        property_type: exact(o.property_type, p.property_type),
        geography: o.geo_key.agreement(&p.geo_key),
    }
}

/// Weighted mean of the comparable terms, in `[0, 1]`.
pub fn score_agreement(agreement: &FieldAgreement, weights: &ScoreWeights) -> f64 {
    let flag = |b: Option<bool>| b.map(|eq| if eq { 1.0 } else { 0.0 });
    let terms = [
        (weights.loan_amount, agreement.loan_amount),
        (weights.loan_type, flag(agreement.loan_type)),
        (weights.loan_purpose, flag(agreement.loan_purpose)),
        (weights.occupancy_type, flag(agreement.occupancy_type)),
        (weights.property_type, flag(agreement.property_type)),
        (weights.geography, agreement.geography.map(|g| g.credit())),
    ];

    let (mut weighted, mut total) = (0.0, 0.0);
    for (weight, term) in terms {
        if let Some(term) = term {
            weighted += weight * term;
            total += weight;
        }
    }
    if total > 0.0 {
        (weighted / total).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// First failing rule wins: temporal, self-trade, affiliate, applicant
/// contradiction, amount.
pub fn eligibility(
    o: &CanonicalLoanEvent,
    p: &CanonicalLoanEvent,
    ctx: &ScoringContext,
) -> PairEligibility {
    let lag = p.activity_year - o.activity_year;
    if lag < 0 || lag > i32::from(ctx.year_window) {
        return PairEligibility::TemporallyInvalid;
    }
    if o.reporter_key == p.reporter_key && !ctx.allow_same_reporter_match {
        return PairEligibility::SelfTrade;
    }
    let affiliated = ctx.affiliates.same_family(&o.reporter_key, &p.reporter_key)
        || o.purchaser_type == Some(PurchaserType::Affiliate);
    if affiliated && !ctx.allow_affiliate_match {
        return PairEligibility::Affiliate;
    }
    if ctx.compatibility.any_enabled() {
        if let Some(rule) = compat::contradiction(&o.applicant, &p.applicant, &ctx.compatibility) {
            log::trace!("{} / {}: applicant {rule} differs", o.event_id, p.event_id);
            return PairEligibility::Incompatible;
        }
    }
    if o.loan_amount.is_none() || p.loan_amount.is_none() {
        return PairEligibility::AmountMissing;
    }
    PairEligibility::Eligible
}

pub fn score_pair(
    o: &CanonicalLoanEvent,
    p: &CanonicalLoanEvent,
    block_key: &BlockKey,
    ctx: &ScoringContext,
) -> CandidatePair {
    let field_agreement = field_agreement(o, p);
    let eligibility = eligibility(o, p, ctx);
    let score = match eligibility {
        PairEligibility::Eligible => score_agreement(&field_agreement, &ctx.weights),
        _ => 0.0,
    };
    CandidatePair {
        origination_id: o.event_id.clone(),
        purchase_id: p.event_id.clone(),
        block_key: block_key.clone(),
        score,
        eligibility,
        field_agreement,
    }
}

/// One pair per (origination, purchase) in the block, origination-major.
pub fn score_block(
    block: &Block,
    events: &[CanonicalLoanEvent],
    ctx: &ScoringContext,
) -> Vec<CandidatePair> {
    let mut pairs = Vec::with_capacity(block.pair_count());
    for &oi in &block.originations {
        for &pi in &block.purchases {
            pairs.push(score_pair(&events[oi], &events[pi], &block.key, ctx));
        }
    }
    log::debug!("block {}: {} pairs scored", block.key, pairs.len());
    pairs
}

/// Score every block in parallel. Output order is block order, independent
/// of thread scheduling.
pub fn score_blocks(
    blocks: &[Block],
    events: &[CanonicalLoanEvent],
    ctx: &ScoringContext,
) -> Vec<CandidatePair> {
    let per_block: Vec<Vec<CandidatePair>> = blocks
        .par_iter()
        .map(|block| score_block(block, events, ctx))
        .collect();
    per_block.into_iter().flatten().collect()
}
