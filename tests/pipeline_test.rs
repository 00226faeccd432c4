//! End-to-end pipeline: mock vendor → router → ingestion → store →
//! factor/strategy pass → selection history.

use quantpicker::application::factors::{FactorEngine, IndustryTables};
use quantpicker::application::ingestion::{IngestOptions, IngestionEngine};
use quantpicker::application::jobs::{JobManager, JobStatus, ProgressSink};
use quantpicker::application::quality::QualityMonitor;
use quantpicker::application::selection::{SelectionParams, SelectionRunner};
use quantpicker::domain::types::{CollectionStatus, TradingDay};
use quantpicker::infrastructure::persistence::Database;
use quantpicker::infrastructure::persistence::repositories::{
    CollectionHistoryRepository, MarketDataRepository, QualityRepository,
    SelectionHistoryRepository,
};
use quantpicker::infrastructure::sources::SourceRouter;
use quantpicker::infrastructure::sources::mock::MockSource;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

fn fixture_router() -> (Arc<MockSource>, Arc<SourceRouter>) {
    let source = Arc::new(MockSource::with_fixture());
    let router = Arc::new(SourceRouter::new().register(source.clone()).preferred("mock"));
    (source, router)
}

fn ingestion_engine(router: Arc<SourceRouter>, db: &Database) -> IngestionEngine {
    IngestionEngine::new(
        router,
        MarketDataRepository::new(db.pool.clone()),
        CollectionHistoryRepository::new(db.pool.clone()),
        Duration::ZERO,
        3,
        Duration::from_millis(5),
        1000,
    )
}

#[tokio::test]
async fn test_ingest_then_select_end_to_end() {
    let (_source, router) = fixture_router();
    let db = Database::in_memory().await.unwrap();
    let engine = ingestion_engine(router, &db);

    // Pull a week of fixture data into the store.
    let run = engine
        .run_incremental(
            IngestOptions {
                lookback_days: 7,
                include_fund_flow: true,
                force: false,
            },
            Arc::new(AtomicBool::new(false)),
        )
        .await
        .unwrap();

    assert_eq!(run.status, CollectionStatus::Completed);
    assert_eq!(run.stock_count, 3);
    assert_eq!(run.kline_count, 21); // 3 stocks × 7 days
    assert!(run.flow_count >= 21);
    assert!(run.elapsed_secs >= 0.0);

    // The week alone is too thin for the deep factor windows, so
    // backfill each stock's full history the way an operator would.
    for code in ["600519", "000001", "300750"] {
        let written = engine.backfill_code(code, 120).await.unwrap();
        assert!(written >= 60, "{} backfilled only {} rows", code, written);
    }

    // Composite ranking over everything in the store.
    let market = MarketDataRepository::new(db.pool.clone());
    let runner = SelectionRunner::new(
        market.clone(),
        SelectionHistoryRepository::new(db.pool.clone()),
        Arc::new(FactorEngine::new(IndustryTables::default())),
        4,
        64,
        Duration::from_secs(120),
    );
    let outcome = runner
        .run(
            SelectionParams {
                strategy: None,
                min_score: 0.0,
                max_results: 20,
                require_uptrend: false,
                require_hot_sector: false,
                require_breakout: false,
            },
            None,
            Arc::new(AtomicBool::new(false)),
        )
        .await
        .unwrap();

    assert_eq!(outcome.total, 3);
    assert_eq!(outcome.results.len(), 3);
    assert!(
        outcome
            .results
            .iter()
            .all(|s| (0.0..=100.0).contains(&s.composite_score))
    );
    assert!(
        outcome
            .results
            .iter()
            .all(|s| !s.selection_reason.is_empty())
    );

    // History landed under the run id.
    let history = SelectionHistoryRepository::new(db.pool.clone());
    assert_eq!(
        history.count_for_run(&outcome.run_id).await.unwrap() as usize,
        outcome.results.len()
    );

    // The quality monitor sees a fresh, consistent store.
    let monitor = QualityMonitor::new(
        QualityRepository::new(db.pool.clone()),
        CollectionHistoryRepository::new(db.pool.clone()),
    );
    let report = monitor.generate_report(7).await.unwrap();
    assert!(report.overall_score > 0.0);
    assert!(report.metrics_summary.total_metrics >= 10);
}

#[tokio::test]
async fn test_selection_as_tracked_job() {
    let (_source, router) = fixture_router();
    let db = Database::in_memory().await.unwrap();
    let engine = ingestion_engine(router, &db);
    engine
        .run_incremental(
            IngestOptions {
                lookback_days: 7,
                include_fund_flow: true,
                force: false,
            },
            Arc::new(AtomicBool::new(false)),
        )
        .await
        .unwrap();
    for code in ["600519", "000001", "300750"] {
        engine.backfill_code(code, 120).await.unwrap();
    }

    let runner = Arc::new(SelectionRunner::new(
        MarketDataRepository::new(db.pool.clone()),
        SelectionHistoryRepository::new(db.pool.clone()),
        Arc::new(FactorEngine::new(IndustryTables::default())),
        4,
        64,
        Duration::from_secs(120),
    ));

    let manager = JobManager::new();
    let params = SelectionParams {
        strategy: None,
        min_score: 0.0,
        max_results: 10,
        require_uptrend: false,
        require_hot_sector: false,
        require_breakout: false,
    };
    let job_id = manager.submit(json!({"max_results": 10}), {
        let runner = Arc::clone(&runner);
        move |progress: ProgressSink| async move {
            let outcome = runner
                .run(params, Some(progress), Arc::new(AtomicBool::new(false)))
                .await?;
            Ok(serde_json::to_value(&outcome)?)
        }
    });

    // Poll to terminal state.
    let mut job = manager.get(&job_id).unwrap();
    for _ in 0..200 {
        job = manager.get(&job_id).unwrap();
        if matches!(job.status, JobStatus::Completed | JobStatus::Failed) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress.total, 3);
    assert_eq!(job.progress.percent, 100);
    assert!(job.progress.selected <= job.progress.processed);
    assert!(job.result.is_some());
}

#[tokio::test]
async fn test_reingest_is_idempotent_on_row_counts() {
    let (_source, router) = fixture_router();
    let db = Database::in_memory().await.unwrap();
    let engine = ingestion_engine(router, &db);

    let opts = IngestOptions {
        lookback_days: 3,
        include_fund_flow: true,
        force: false,
    };
    engine
        .run_incremental(opts, Arc::new(AtomicBool::new(false)))
        .await
        .unwrap();

    let market = MarketDataRepository::new(db.pool.clone());
    let candles_before = market.candle_count_total().await.unwrap();
    let flows_before = market.fund_flow_count_total().await.unwrap();

    // Forced re-pull hits the same primary keys.
    engine
        .run_incremental(
            IngestOptions {
                force: true,
                ..opts
            },
            Arc::new(AtomicBool::new(false)),
        )
        .await
        .unwrap();

    assert_eq!(market.candle_count_total().await.unwrap(), candles_before);
    assert_eq!(market.fund_flow_count_total().await.unwrap(), flows_before);
}

#[tokio::test]
async fn test_calendar_gaps_fall_back_to_natural_days() {
    // A mock with data but an empty calendar: the engine still ingests
    // by walking natural days.
    let source = Arc::new(MockSource::with_fixture());
    source.set_calendar(Vec::<TradingDay>::new());
    let router = Arc::new(SourceRouter::new().register(source).preferred("mock"));
    let db = Database::in_memory().await.unwrap();
    let engine = ingestion_engine(router, &db);

    let run = engine
        .run_incremental(
            IngestOptions {
                lookback_days: 2,
                include_fund_flow: false,
                force: false,
            },
            Arc::new(AtomicBool::new(false)),
        )
        .await
        .unwrap();

    assert_eq!(run.status, CollectionStatus::Completed);
    // Fixture has candles for both natural days.
    assert_eq!(run.kline_count, 6);

    // Sanity on the stored bars (spec invariant: high ≥ open/close/low).
    let market = MarketDataRepository::new(db.pool.clone());
    let candles = market.recent_candles("600519", 10).await.unwrap();
    assert!(!candles.is_empty());
    assert!(candles.iter().all(|c| c.is_sane()));
}
