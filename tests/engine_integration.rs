//! End-to-end engine tests: crash recovery, legacy migration, two-phase
//! safety, dry-run isolation and the authorization gate, driven through the
//! public orchestrator surface with recording mocks.

use std::sync::Arc;

use tempfile::tempdir;

use treasury_engine::application::{
    MonitorConfig, OrchestratorSettings, PositionMonitor, TradeError, TradingOrchestrator,
    SOL_MINT,
};
use treasury_engine::domain::position::{Direction, ExitReason, PositionStatus};
use treasury_engine::domain::risk::{self, PortfolioLimits, RiskTier};
use treasury_engine::ledger::{PositionLedger, LEGACY_POSITIONS_FILE};
use treasury_engine::ports::mocks::{MockExecution, MockPriceFeed, MockSigner};

const ADMIN: u64 = 8527130908;
const MINT: &str = "J1toso1uCk3RLmjorhTtrVwY9HJ7X8V9yYac6Y7kGCPn";
const TREASURY: &str = "Treasury11111111111111111111111111111111111";

struct Engine {
    orchestrator: Arc<TradingOrchestrator>,
    ledger: Arc<PositionLedger>,
    feed: Arc<MockPriceFeed>,
    execution: Arc<MockExecution>,
    signer: Arc<MockSigner>,
}

fn build_engine(data_dir: &std::path::Path, dry_run: bool) -> Engine {
    let ledger = Arc::new(PositionLedger::new(data_dir, 5));
    let feed = Arc::new(
        MockPriceFeed::new()
            .with_price(MINT, 2.0)
            .with_price(SOL_MINT, 100.0),
    );
    let execution = Arc::new(MockExecution::new().with_fill_price(2.0));
    let signer = Arc::new(MockSigner::new(TREASURY));

    let orchestrator = Arc::new(TradingOrchestrator::new(
        ledger.clone(),
        signer.clone(),
        feed.clone(),
        execution.clone(),
        OrchestratorSettings {
            admin_ids: vec![ADMIN],
            risk_tier: RiskTier::Moderate,
            dry_run,
            ..Default::default()
        },
    ));

    Engine {
        orchestrator,
        ledger,
        feed,
        execution,
        signer,
    }
}

#[tokio::test]
async fn crash_recovery_round_trip() {
    let dir = tempdir().unwrap();

    // First process: open two positions, close one
    let open_id = {
        let engine = build_engine(dir.path(), true);
        let kept = engine
            .orchestrator
            .open_position(ADMIN, MINT, "JTO", Direction::Long, Some(50.0), Some("A"))
            .await
            .unwrap();
        let closed = engine
            .orchestrator
            .open_position(ADMIN, MINT, "JTO", Direction::Long, Some(40.0), Some("B"))
            .await
            .unwrap();

        engine.feed.set_price(MINT, 2.2);
        engine
            .orchestrator
            .close_position(ADMIN, &closed.id, ExitReason::Manual)
            .await
            .unwrap();

        kept.id
    };

    // Simulated restart: a fresh engine over the same data directory sees
    // the same logical state
    let engine = build_engine(dir.path(), true);
    engine.ledger.load().await.unwrap();

    let open = engine.orchestrator.get_open_positions().await;
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id, open_id);
    assert_eq!(open[0].entry_price, 2.0);
    assert_eq!(open[0].notional_usd, 50.0);
    assert_eq!(open[0].signal_grade, "A");
    assert_eq!(open[0].status, PositionStatus::Open);

    let history = engine.ledger.trade_history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].exit_price, Some(2.2));
    assert!(history[0].status.is_terminal());
}

#[tokio::test]
async fn legacy_store_migrates_exactly_once() {
    let dir = tempdir().unwrap();

    // A pre-existing record at the legacy dot-file location
    let legacy = treasury_engine::domain::position::Position::open(
        "legacy01".to_string(),
        MINT.to_string(),
        "JTO".to_string(),
        Direction::Long,
        1.5,
        10.0,
        15.0,
        1.95,
        1.35,
        None,
        "B".to_string(),
        0.0,
        chrono::Utc::now(),
    )
    .unwrap();
    std::fs::write(
        dir.path().join(LEGACY_POSITIONS_FILE),
        serde_json::to_string(&vec![legacy]).unwrap(),
    )
    .unwrap();

    let engine = build_engine(dir.path(), true);
    engine.ledger.load().await.unwrap();

    let open = engine.orchestrator.get_open_positions().await;
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id, "legacy01");

    // The migrated record participates in the engine normally
    engine
        .orchestrator
        .close_position(ADMIN, "legacy01", ExitReason::Manual)
        .await
        .unwrap();

    // A second load does not resurrect or duplicate it
    let engine2 = build_engine(dir.path(), true);
    engine2.ledger.load().await.unwrap();
    assert!(engine2.orchestrator.get_open_positions().await.is_empty());
    assert_eq!(engine2.ledger.trade_history().await.len(), 1);
}

#[tokio::test]
async fn unauthorized_caller_leaves_no_trace_but_the_audit_entry() {
    let dir = tempdir().unwrap();
    let engine = build_engine(dir.path(), true);

    let result = engine
        .orchestrator
        .open_position(1234, MINT, "JTO", Direction::Long, Some(50.0), None)
        .await;
    assert!(matches!(result, Err(TradeError::Unauthorized)));

    assert!(engine.orchestrator.get_open_positions().await.is_empty());
    assert!(engine.ledger.trade_history().await.is_empty());
    assert_eq!(engine.ledger.audit().count_action("OPEN_POSITION").unwrap(), 0);
    assert_eq!(
        engine
            .ledger
            .audit()
            .count_action("OPEN_POSITION_REJECTED")
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn dry_run_never_touches_signer_or_venue() {
    let dir = tempdir().unwrap();
    let engine = build_engine(dir.path(), true);

    let position = engine
        .orchestrator
        .open_position(ADMIN, MINT, "JTO", Direction::Long, Some(50.0), Some("B"))
        .await
        .unwrap();
    assert!(position.is_open());

    engine
        .orchestrator
        .close_position(ADMIN, &position.id, ExitReason::Manual)
        .await
        .unwrap();

    // Open and close both completed with zero execution-side invocations
    assert_eq!(engine.execution.total_calls(), 0);
    assert_eq!(engine.signer.sign_call_count(), 0);
}

#[tokio::test]
async fn execution_failure_after_reserve_releases_the_slot() {
    let dir = tempdir().unwrap();
    let engine = build_engine(dir.path(), false);
    engine.execution.fail_submits(true);

    let before = engine.ledger.open_and_reserved_count().await;
    let result = engine
        .orchestrator
        .open_position(ADMIN, MINT, "JTO", Direction::Long, Some(50.0), None)
        .await;
    assert!(matches!(result, Err(TradeError::Execution(_))));

    // Active-position count unchanged and the slot is free again
    assert_eq!(engine.ledger.open_and_reserved_count().await, before);
    assert!(engine.orchestrator.get_open_positions().await.is_empty());

    engine.execution.fail_submits(false);
    let position = engine
        .orchestrator
        .open_position(ADMIN, MINT, "JTO", Direction::Long, Some(50.0), None)
        .await
        .unwrap();
    assert!(position.is_open());
    assert_eq!(engine.signer.sign_call_count(), 2);
}

#[tokio::test]
async fn open_plus_reserved_never_exceeds_max_positions() {
    let dir = tempdir().unwrap();
    let ledger = Arc::new(PositionLedger::new(dir.path(), 3));

    // Fill capacity with a mix of reservations and commits
    let t1 = ledger.reserve_slot(MINT).await.unwrap();
    let _t2 = ledger.reserve_slot(MINT).await.unwrap();
    let _t3 = ledger.reserve_slot(MINT).await.unwrap();
    assert!(ledger.reserve_slot(MINT).await.is_err());
    assert_eq!(ledger.open_and_reserved_count().await, 3);

    let position = treasury_engine::domain::position::Position::open(
        "p1".to_string(),
        MINT.to_string(),
        "JTO".to_string(),
        Direction::Long,
        2.0,
        25.0,
        50.0,
        2.6,
        1.8,
        None,
        "A".to_string(),
        0.0,
        chrono::Utc::now(),
    )
    .unwrap();
    ledger.commit_open(t1, position, "42").await.unwrap();

    // Committing consumed the reservation: still at capacity, never above
    assert_eq!(ledger.open_and_reserved_count().await, 3);
    assert!(ledger.reserve_slot(MINT).await.is_err());
}

#[tokio::test]
async fn monitor_drives_forced_close_through_the_orchestrator() {
    let dir = tempdir().unwrap();
    let engine = build_engine(dir.path(), true);
    let monitor = PositionMonitor::new(
        engine.orchestrator.clone(),
        engine.feed.clone(),
        MonitorConfig::default(),
    );

    let position = engine
        .orchestrator
        .open_position(ADMIN, MINT, "JTO", Direction::Long, Some(50.0), Some("B"))
        .await
        .unwrap();

    // Grade B stop loss sits 8% under entry; crash through it
    engine.feed.set_price(MINT, 1.5);
    monitor.tick().await;

    let closed = engine.ledger.get_position(&position.id).await.unwrap();
    assert_eq!(closed.status, PositionStatus::Closed);
    assert_eq!(closed.exit_reason, Some(ExitReason::StopLoss));

    // The forced close is attributed to the system actor in the audit log
    let entries = engine.ledger.audit().read_all().unwrap();
    let close_entry = entries
        .iter()
        .find(|e| e.action == "CLOSE_POSITION")
        .unwrap();
    assert_eq!(close_entry.actor, "0");
}

#[tokio::test]
async fn recompute_is_idempotent_and_sign_correct() {
    let dir = tempdir().unwrap();
    let engine = build_engine(dir.path(), true);

    let position = engine
        .orchestrator
        .open_position(ADMIN, MINT, "JTO", Direction::Long, Some(50.0), Some("A"))
        .await
        .unwrap();

    let first = engine.ledger.recompute(&position.id, 2.3).await.unwrap();
    let again = engine.ledger.recompute(&position.id, 2.3).await.unwrap();

    let expected = (2.3 - 2.0) / 2.0 * 100.0;
    assert!((first.pnl_pct - expected).abs() < 1e-9);
    assert_eq!(first.pnl_pct, again.pnl_pct);
    assert_eq!(first.trailing_stop_price, again.trailing_stop_price);
}

#[test]
fn grade_anchors_match_expected_levels() {
    let cases = [
        ("A", 130.0, 90.0),
        ("B+", 120.0, 92.0),
        ("B", 115.0, 92.0),
        ("C", 110.0, 95.0),
    ];
    for (grade, tp, sl) in cases {
        let (got_tp, got_sl) = risk::tp_sl_levels(100.0, grade, Direction::Long);
        assert!((got_tp - tp).abs() < 0.01, "grade {} tp", grade);
        assert!((got_sl - sl).abs() < 0.01, "grade {} sl", grade);
    }
}

#[test]
fn tier_sizing_on_ten_thousand() {
    assert_eq!(risk::position_size(10_000.0, RiskTier::Conservative), 100.0);
    assert_eq!(risk::position_size(10_000.0, RiskTier::Moderate), 200.0);
    assert_eq!(risk::position_size(10_000.0, RiskTier::Aggressive), 500.0);
    assert_eq!(risk::position_size(10_000.0, RiskTier::MaxRisk), 1000.0);
}

#[test]
fn liquidation_price_three_x_long() {
    let liq = risk::liquidation_price(100.0, 3.0, Direction::Long, 0.05);
    assert!((liq - 71.67).abs() < 0.01);
}

#[tokio::test]
async fn persisted_files_have_one_record_type_each() {
    let dir = tempdir().unwrap();
    let engine = build_engine(dir.path(), true);

    let position = engine
        .orchestrator
        .open_position(ADMIN, MINT, "JTO", Direction::Long, Some(50.0), None)
        .await
        .unwrap();
    engine
        .orchestrator
        .close_position(ADMIN, &position.id, ExitReason::Manual)
        .await
        .unwrap();

    for file in ["positions.json", "trade_history.json", "daily_volume.json", "audit.log"] {
        assert!(dir.path().join(file).exists(), "missing {}", file);
    }

    // Daily volume reflects the open
    let volume: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("daily_volume.json")).unwrap())
            .unwrap();
    assert_eq!(volume["volume_usd"], 50.0);

    let limits = PortfolioLimits::default();
    assert!(risk::validate_daily_volume(100.0, 50.0, &limits).is_ok());
}
