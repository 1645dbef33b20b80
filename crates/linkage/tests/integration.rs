use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use proptest::prelude::*;

use hmda_linkage::config::LinkageConfig;
use hmda_linkage::engine::{link, load_csv_rows, partition_from_file_name, run};
use hmda_linkage::harmonize::{HarmonizeStats, RawRow};
use hmda_linkage::identity::{assign, EventId, FileType};
use hmda_linkage::model::{
    ApplicantProfile, CanonicalLoanEvent, EventRole, GeoKey, LinkageReport, LinkageResult,
    LoanType, MatchStatus, PairEligibility, ReasonCode, ReporterKey, SchemaEra,
};
use hmda_linkage::LinkageError;

const FIXTURE_FILES: &[&str] = &[
    "2017_one_year.csv",
    "2018_public_lar.csv",
    "2019_public_lar.csv",
    "2020_public_lar.csv",
];

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn fixture_config() -> LinkageConfig {
    let toml = std::fs::read_to_string(fixtures_dir().join("link.toml")).unwrap();
    LinkageConfig::from_toml(&toml).unwrap()
}

fn fixture_rows() -> Vec<RawRow> {
    let mut rows = Vec::new();
    for name in FIXTURE_FILES {
        let (year, file_type) = partition_from_file_name(name).unwrap();
        let path = fixtures_dir().join(name);
        let file = std::fs::File::open(&path)
            .unwrap_or_else(|e| panic!("cannot read {}: {e}", path.display()));
        rows.extend(load_csv_rows(file, year, file_type).unwrap());
    }
    rows
}

fn load_and_run(config: &LinkageConfig) -> LinkageReport {
    run(config, fixture_rows()).unwrap()
}

fn id(s: &str) -> EventId {
    s.parse().unwrap()
}

fn row_for<'a>(report: &'a LinkageReport, origination: &str) -> &'a LinkageResult {
    report
        .results
        .iter()
        .find(|r| r.origination_id.as_ref().map(EventId::as_str) == Some(origination))
        .unwrap_or_else(|| panic!("no result row for {origination}"))
}

// -------------------------------------------------------------------------
// Fixture scenarios
// -------------------------------------------------------------------------

#[test]
fn identical_pair_matches_with_full_score() {
    let report = load_and_run(&fixture_config());
    let row = row_for(&report, "2020c_000000000");
    assert_eq!(row.match_status, MatchStatus::Matched);
    assert_eq!(row.reason, ReasonCode::Accepted);
    assert_eq!(row.purchase_id, Some(id("2020c_000000001")));
    assert_eq!(row.score, Some(1.0));
}

#[test]
fn tied_purchases_resolve_to_smaller_id() {
    let report = load_and_run(&fixture_config());
    let row = row_for(&report, "2020c_000000002");
    assert_eq!(row.match_status, MatchStatus::Matched);
    assert_eq!(row.purchase_id, Some(id("2020c_000000003")));

    // The loser had one candidate and lost it.
    let loser = report.explain(&id("2020c_000000004")).unwrap();
    assert!(!loser.accepted);
    assert_eq!(loser.score, 1.0);
    assert_eq!(loser.rank, Some(row.resolved_at_rank.unwrap() + 1));
}

#[test]
fn earlier_purchase_is_never_a_candidate() {
    let report = load_and_run(&fixture_config());
    let row = row_for(&report, "2020c_000000005");
    assert_eq!(row.match_status, MatchStatus::UnmatchedNoCandidate);
    assert_eq!(row.reason, ReasonCode::NoBlockPartner);
    assert!(report.explain(&id("2019c_000000000")).is_none());
}

#[test]
fn missing_amount_never_matches() {
    let report = load_and_run(&fixture_config());
    let row = row_for(&report, "2020c_000000006");
    assert_eq!(row.match_status, MatchStatus::UnmatchedNoCandidate);
    assert_eq!(row.reason, ReasonCode::NoEligibleCandidate);
    let audit = report.explain(&id("2020c_000000006")).unwrap();
    assert_eq!(audit.eligibility, PairEligibility::AmountMissing);
    assert_eq!(audit.score, 0.0);
    // Other fields still agree.
    assert_eq!(audit.field_agreement.loan_type, Some(true));
}

#[test]
fn cross_era_pair_matches() {
    let report = load_and_run(&fixture_config());
    let row = row_for(&report, "2017b_000000000");
    assert_eq!(row.match_status, MatchStatus::Matched);
    assert_eq!(row.purchase_id, Some(id("2018c_000000000")));
    assert_eq!(row.score, Some(1.0));
    assert_eq!(row.resolved_at_rank, Some(1));
}

#[test]
fn gse_sale_self_trade_and_weak_candidate() {
    let report = load_and_run(&fixture_config());

    let sold = row_for(&report, "2020c_000000008");
    assert_eq!(sold.reason, ReasonCode::SoldToNonReporter);

    let self_trade = row_for(&report, "2020c_000000011");
    assert_eq!(self_trade.reason, ReasonCode::NoEligibleCandidate);
    assert_eq!(
        report.explain(&id("2020c_000000011")).unwrap().eligibility,
        PairEligibility::SelfTrade
    );

    let weak = row_for(&report, "2020c_000000013");
    assert_eq!(weak.match_status, MatchStatus::AmbiguousUnresolved);
    assert_eq!(weak.reason, ReasonCode::BelowMinScore);
    let score = weak.score.unwrap();
    assert!(score > 0.0 && score < 0.5, "score {score}");
}

#[test]
fn summary_counts() {
    let report = load_and_run(&fixture_config());
    let s = &report.summary;
    assert_eq!(s.rows_read, 19);
    assert_eq!(s.rows_dropped, 1);
    assert_eq!(s.rows_filtered, 2);
    assert_eq!(s.originations, 8);
    assert_eq!(s.purchases, 8);
    assert_eq!(s.blocks, 6);
    assert_eq!(s.pairs_scored, 7);
    assert_eq!(s.pairs_by_eligibility.get("eligible"), Some(&5));
    assert_eq!(s.pairs_by_eligibility.get("amount_missing"), Some(&1));
    assert_eq!(s.pairs_by_eligibility.get("self_trade"), Some(&1));
    assert_eq!(s.totals.matched, 3);
    assert_eq!(s.totals.ambiguous_unresolved, 1);
    assert_eq!(s.totals.unmatched_no_candidate, 4);
    assert_eq!(s.by_year[&2017].matched, 1);
    assert_eq!(s.by_year[&2020].total(), 7);
    assert_eq!(report.results.len(), 8);
}

#[test]
fn results_ordered_by_year_then_origination() {
    let report = load_and_run(&fixture_config());
    let keys: Vec<_> = report
        .results
        .iter()
        .map(|r| (r.activity_year, r.origination_id.clone()))
        .collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
    assert_eq!(keys[0].1, Some(id("2017b_000000000")));
}

#[test]
fn unmatched_purchases_can_be_reported() {
    let config = LinkageConfig {
        include_unmatched_purchases: true,
        ..fixture_config()
    };
    let report = load_and_run(&config);
    let purchase_rows: Vec<_> = report
        .results
        .iter()
        .filter(|r| r.origination_id.is_none())
        .collect();
    // 2019 VA, 2020 MD loser, PA, TX, CA
    assert_eq!(purchase_rows.len(), 5);
    assert_eq!(report.summary.purchases_unmatched, Some(5));
    let loser = purchase_rows
        .iter()
        .find(|r| r.purchase_id == Some(id("2020c_000000004")))
        .unwrap();
    assert_eq!(loser.reason, ReasonCode::CandidatesClaimed);
    // Origination rows come first.
    assert!(report.results[..8].iter().all(|r| r.origination_id.is_some()));
}

#[test]
fn rerun_is_byte_identical() {
    let config = fixture_config();
    let a = load_and_run(&config);
    let b = load_and_run(&config);
    assert_eq!(a.summary.results_sha256, b.summary.results_sha256);
    assert_eq!(
        serde_json::to_vec(&a).unwrap(),
        serde_json::to_vec(&b).unwrap()
    );
}

#[test]
fn row_order_does_not_change_results() {
    let config = fixture_config();
    let forward = run(&config, fixture_rows()).unwrap();
    let mut rows = fixture_rows();
    rows.reverse();
    let backward = run(&config, rows).unwrap();
    assert_eq!(forward.results, backward.results);
    assert_eq!(forward.summary.results_sha256, backward.summary.results_sha256);
}

#[test]
fn partition_read_twice_is_fatal() {
    let mut rows = fixture_rows();
    rows.extend(fixture_rows());
    let err = run(&fixture_config(), rows).unwrap_err();
    assert!(matches!(err, LinkageError::DuplicateIdentity(_)));
}

#[test]
fn affiliate_purchase_is_ineligible_unless_allowed() {
    let mut config = fixture_config();
    config.affiliate_groups.insert(
        "dc_family".into(),
        vec!["ORIGDC00000000000001".into(), "BUYERDC0000000000001".into()],
    );
    // The pair still blocks together and is then rejected.
    let report = load_and_run(&config);
    let row = row_for(&report, "2020c_000000000");
    assert_eq!(row.reason, ReasonCode::NoEligibleCandidate);
    assert_eq!(
        report.explain(&id("2020c_000000000")).unwrap().eligibility,
        PairEligibility::Affiliate
    );

    config.allow_affiliate_match = true;
    let report = load_and_run(&config);
    assert_eq!(row_for(&report, "2020c_000000000").match_status, MatchStatus::Matched);
}

#[test]
fn affiliated_originator_still_matches_unrelated_buyer() {
    let mut config = fixture_config();
    config.affiliate_groups.insert(
        "dc_family".into(),
        vec!["ORIGDC00000000000001".into(), "ORIGDC00000000000002".into()],
    );
    let report = load_and_run(&config);
    let row = row_for(&report, "2020c_000000000");
    assert_eq!(row.match_status, MatchStatus::Matched);
    assert_eq!(row.purchase_id, Some(id("2020c_000000001")));
    assert_eq!(report.summary.blocks, load_and_run(&fixture_config()).summary.blocks);
}

fn lar_row(index: u64, lei: &str, action: &str, extra: &[(&str, &str)]) -> RawRow {
    let mut fields: HashMap<String, String> = [
        ("activity_year", "2021"),
        ("lei", lei),
        ("action_taken", action),
        ("state_code", "VA"),
        ("county_code", "51059"),
        ("loan_type", "1"),
        ("loan_amount", "415000"),
        ("purchaser_type", "0"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    for (k, v) in extra {
        fields.insert(k.to_string(), v.to_string());
    }
    RawRow::new(2021, FileType::Public, index, fields)
}

#[test]
fn contradicting_applicants_block_a_match_only_when_enabled() {
    let rows = || {
        vec![
            lar_row(0, "ORIGVA00000000000001", "1", &[("income", "90"), ("applicant_sex", "1")]),
            lar_row(1, "BUYERVA0000000000001", "6", &[("income", "140"), ("applicant_sex", "1")]),
        ]
    };
    let report = run(&LinkageConfig::default(), rows()).unwrap();
    assert_eq!(row_for(&report, "2021c_000000000").match_status, MatchStatus::Matched);

    let mut config = LinkageConfig::default();
    config.compatibility.sex = true;
    let report = run(&config, rows()).unwrap();
    assert_eq!(row_for(&report, "2021c_000000000").match_status, MatchStatus::Matched);

    config.compatibility.income_tolerance = Some(1);
    let report = run(&config, rows()).unwrap();
    let row = row_for(&report, "2021c_000000000");
    assert_eq!(row.match_status, MatchStatus::UnmatchedNoCandidate);
    assert_eq!(row.reason, ReasonCode::NoEligibleCandidate);
    assert_eq!(
        report.explain(&id("2021c_000000000")).unwrap().eligibility,
        PairEligibility::Incompatible
    );
    assert_eq!(report.summary.pairs_by_eligibility.get("incompatible"), Some(&1));
}

// -------------------------------------------------------------------------
// Properties
// -------------------------------------------------------------------------

fn config_128() -> ProptestConfig {
    ProptestConfig {
        cases: std::env::var("PROPTEST_CASES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(128),
        failure_persistence: None,
        ..ProptestConfig::default()
    }
}

/// (role, year offset, reporter, loan type, amount, county)
type EventShape = (bool, i32, u8, Option<u8>, Option<u64>, u8);

fn arb_event() -> impl Strategy<Value = EventShape> {
    (
        any::<bool>(),
        0..3i32,
        0..4u8,
        prop::option::weighted(0.9, 1..3u8),
        prop::option::weighted(0.9, prop_oneof![
            3 => 90_000..110_000u64,
            1 => Just(100_000u64),
        ]),
        0..2u8,
    )
}

fn build_events(shapes: &[EventShape]) -> Vec<CanonicalLoanEvent> {
    shapes
        .iter()
        .enumerate()
        .map(|(i, (origination, offset, reporter, loan_type, amount, county))| {
            let year = 2018 + offset;
            CanonicalLoanEvent {
                event_id: assign(year, FileType::Public, i as u64),
                event_role: if *origination { EventRole::Origination } else { EventRole::Purchase },
                activity_year: year,
                schema_era: SchemaEra::for_year(year),
                reporter_key: ReporterKey(format!("LEI{reporter}")),
                geo_key: GeoKey {
                    state: Some("24".into()),
                    county: Some(format!("2403{county}")),
                    tract: None,
                },
                loan_type: loan_type.and_then(|c| LoanType::from_code(i64::from(c))),
                loan_purpose: None,
                occupancy_type: None,
                property_type: None,
                loan_amount: *amount,
                purchaser_type: None,
                applicant: ApplicantProfile::default(),
                reported_at_index: i as u64,
            }
        })
        .collect()
}

proptest! {
    #![proptest_config(config_128())]

    #[test]
    fn linkage_is_deterministic_and_one_to_one(
        shapes in prop::collection::vec(arb_event(), 0..40),
        min_match_score in 0.0..1.0f64,
    ) {
        let config = LinkageConfig { min_match_score, ..LinkageConfig::default() };
        let events = build_events(&shapes);
        let stats = HarmonizeStats::default();

        let a = link(&config, &events, &stats).unwrap();
        let mut reversed = events.clone();
        reversed.reverse();
        let b = link(&config, &reversed, &stats).unwrap();
        prop_assert_eq!(&a.results, &b.results);
        prop_assert_eq!(&a.summary.results_sha256, &b.summary.results_sha256);

        let year_of = |id: &EventId| id.parse().unwrap().source_year;
        let mut purchases = HashSet::new();
        for row in &a.results {
            if row.match_status != MatchStatus::Matched {
                prop_assert!(row.purchase_id.is_none());
                continue;
            }
            let (o, p) = (row.origination_id.as_ref().unwrap(), row.purchase_id.as_ref().unwrap());
            // Bijective.
            prop_assert!(purchases.insert(p.clone()), "purchase {} matched twice", p);
            // Temporal window.
            let lag = year_of(p) - year_of(o);
            prop_assert!((0..=i32::from(config.year_window)).contains(&lag));
            // Threshold and amount rule.
            let score = row.score.unwrap();
            prop_assert!(score >= min_match_score && score <= 1.0);
            let audit = a.explain(o).unwrap();
            prop_assert_eq!(audit.eligibility, PairEligibility::Eligible);
            prop_assert!(audit.field_agreement.loan_amount.is_some());
        }
        prop_assert_eq!(a.summary.totals.total(), a.results.len());
    }
}
