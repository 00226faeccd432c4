//! quantpicker: headless multi-factor screening service for the
//! A-share market.
//!
//! Subcommands wire the long-lived singletons (store, source router)
//! and hand off to the application layer:
//! - `ingest`  - incremental trading-day collection into the store
//! - `select`  - run a selection strategy over the stored universe
//! - `auction` - refresh the 09:26 call-auction snapshots
//! - `quality` - compute the data-quality report and persist alerts
//! - `health`  - probe every data source and record the outcome
//!
//! # Environment Variables
//! - `MODE` - `mock` (fixture source) or `live` (default: mock)
//! - `TUSHARE_TOKEN` - primary vendor credential for live mode
//! - `DATABASE_URL` - SQLite url (default: sqlite://data/quantpicker.db)
//! - `ADVANCED_SELECTION_CONCURRENCY` / `_BATCH_SIZE` / `_TIMEOUT`

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use quantpicker::application::factors::{FactorEngine, IndustryTables};
use quantpicker::application::ingestion::{IngestOptions, IngestionEngine};
use quantpicker::application::jobs::{JobManager, JobStatus};
use quantpicker::application::quality::QualityMonitor;
use quantpicker::application::selection::{SelectionParams, SelectionRunner};
use quantpicker::config::{Config, Mode};
use quantpicker::domain::strategy::StrategyId;
use quantpicker::domain::types::exchange_today;
use quantpicker::infrastructure::persistence::Database;
use quantpicker::infrastructure::persistence::repositories::{
    CollectionHistoryRepository, MarketDataRepository, QualityRepository,
    SelectionHistoryRepository,
};
use quantpicker::infrastructure::sources::eastmoney::EastmoneySource;
use quantpicker::infrastructure::sources::mock::MockSource;
use quantpicker::infrastructure::sources::tushare::TushareSource;
use quantpicker::infrastructure::sources::{MarketDataSource, SourceRouter};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tracing::{Level, info, warn};
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "quantpicker", version, about = "A-share multi-factor screening service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Incrementally ingest recent trading days into the store.
    Ingest {
        #[arg(long)]
        days: Option<i64>,
        /// Skip the per-stock fund-flow pull.
        #[arg(long)]
        no_fund_flow: bool,
        /// Re-pull dates that already look complete.
        #[arg(long)]
        force: bool,
        /// Also pull limit-up concept boards for the latest day.
        #[arg(long)]
        kpl: bool,
    },
    /// Backfill one stock's candle history.
    Backfill {
        code: String,
        #[arg(long, default_value_t = 365)]
        days: i64,
    },
    /// Recompute the stored per-stock indicator snapshots.
    Indicators,
    /// Print realtime quotes for the given codes (all when omitted).
    Quotes {
        codes: Vec<String>,
    },
    /// Run a selection strategy over the stored universe.
    Select {
        /// Strategy id 1-5; omit for the plain composite ranking.
        #[arg(long)]
        strategy: Option<i64>,
        #[arg(long)]
        min_score: Option<f64>,
        #[arg(long)]
        max_results: Option<usize>,
        #[arg(long)]
        require_breakout: bool,
        #[arg(long)]
        no_uptrend: bool,
        #[arg(long)]
        no_hot_sector: bool,
    },
    /// Refresh call-auction snapshots for a date (default: today).
    Auction {
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        force: bool,
    },
    /// Compute the data quality report.
    Quality {
        #[arg(long, default_value_t = 7)]
        days: i64,
    },
    /// Probe every registered data source.
    Health,
}

fn build_router(config: &Config) -> Arc<SourceRouter> {
    let router = match config.mode {
        Mode::Mock => {
            info!("Mode: MOCK (fixture data source)");
            SourceRouter::new()
                .register(Arc::new(MockSource::with_fixture()))
                .preferred("mock")
        }
        Mode::Live => {
            let mut router = SourceRouter::new();
            let tushare = TushareSource::new(config.tushare_token.clone());
            if tushare.is_available() {
                router = router.register(Arc::new(tushare));
            } else {
                warn!("Tushare source unavailable (no token)");
            }
            router
                .register(Arc::new(EastmoneySource::new()))
                .preferred("tushare")
                .fallback_order(vec!["eastmoney".to_string()])
        }
    };
    Arc::new(router.cache_ttl(config.source_cache_ttl))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    info!(
        "quantpicker {} starting (mode {:?})",
        env!("CARGO_PKG_VERSION"),
        config.mode
    );

    let db = Database::new(&config.database_url).await?;
    let router = build_router(&config);
    let market = MarketDataRepository::new(db.pool.clone());
    let collection_history = CollectionHistoryRepository::new(db.pool.clone());

    match cli.command {
        Commands::Ingest {
            days,
            no_fund_flow,
            force,
            kpl,
        } => {
            let engine = IngestionEngine::new(
                router,
                market,
                collection_history,
                config.collection_call_delay,
                config.collection_max_retries,
                config.collection_retry_base_delay,
                config.collection_complete_threshold,
            );
            let run = engine
                .run_incremental(
                    IngestOptions {
                        lookback_days: days.unwrap_or(config.collection_lookback_days),
                        include_fund_flow: !no_fund_flow,
                        force,
                    },
                    Arc::new(AtomicBool::new(false)),
                )
                .await?;
            if kpl {
                let (concepts, members) = engine.collect_kpl(exchange_today()).await?;
                info!("KPL pull: {} concepts, {} members", concepts, members);
            }
            println!(
                "run {}: {} | {} stocks, {} klines, {} flows, {} indicators in {:.1}s",
                run.id,
                run.status.as_str(),
                run.stock_count,
                run.kline_count,
                run.flow_count,
                run.indicator_count,
                run.elapsed_secs
            );
        }

        Commands::Backfill { code, days } => {
            let engine = IngestionEngine::new(
                router,
                market,
                collection_history,
                config.collection_call_delay,
                config.collection_max_retries,
                config.collection_retry_base_delay,
                config.collection_complete_threshold,
            );
            let written = engine.backfill_code(&code, days).await?;
            println!("{}: {} candle rows backfilled", code, written);
        }

        Commands::Indicators => {
            let engine = IngestionEngine::new(
                router,
                market,
                collection_history,
                config.collection_call_delay,
                config.collection_max_retries,
                config.collection_retry_base_delay,
                config.collection_complete_threshold,
            );
            let written = engine
                .refresh_technical_indicators(&FactorEngine::new(IndustryTables::default()))
                .await?;
            println!("{} indicator rows refreshed", written);
        }

        Commands::Quotes { codes } => {
            let filter = (!codes.is_empty()).then_some(codes.as_slice());
            let quotes = router.realtime_quotes(filter, None).await.map_err(|e| {
                anyhow::anyhow!("realtime quotes unavailable: {}", e)
            })?;
            for quote in quotes {
                println!(
                    "{} {} {:.2} ({:+.2}%)",
                    quote.code, quote.name, quote.price, quote.change_percent
                );
            }
        }

        Commands::Select {
            strategy,
            min_score,
            max_results,
            require_breakout,
            no_uptrend,
            no_hot_sector,
        } => {
            let strategy = match strategy {
                Some(id) => Some(
                    StrategyId::from_id(id)
                        .ok_or_else(|| anyhow::anyhow!("unknown strategy id {}", id))?,
                ),
                None => None,
            };

            let mut params = match strategy {
                Some(id) => SelectionParams::for_strategy(id),
                None => SelectionParams::default(),
            };
            if let Some(min_score) = min_score {
                params.min_score = min_score;
            }
            if let Some(max_results) = max_results {
                params.max_results = max_results;
            }
            if require_breakout {
                params.require_breakout = true;
            }
            if no_uptrend {
                params.require_uptrend = false;
            }
            if no_hot_sector {
                params.require_hot_sector = false;
            }

            let runner = Arc::new(SelectionRunner::new(
                market,
                SelectionHistoryRepository::new(db.pool.clone()),
                Arc::new(FactorEngine::new(IndustryTables::default())),
                config.selection_concurrency,
                config.selection_batch_size,
                config.selection_timeout,
            ));

            let manager = JobManager::new();
            let job_id = manager.submit(
                serde_json::to_value(&format!("{:?}", params))?,
                move |progress| {
                    let runner = Arc::clone(&runner);
                    async move {
                        let outcome = runner
                            .run(params, Some(progress), Arc::new(AtomicBool::new(false)))
                            .await?;
                        Ok(serde_json::to_value(&outcome)?)
                    }
                },
            );

            // Poll the job like an API client would.
            loop {
                tokio::time::sleep(Duration::from_millis(300)).await;
                let Some(job) = manager.get(&job_id) else {
                    anyhow::bail!("job {} vanished", job_id);
                };
                match job.status {
                    JobStatus::Completed => {
                        println!(
                            "{}",
                            serde_json::to_string_pretty(&job.result.unwrap_or_default())?
                        );
                        break;
                    }
                    JobStatus::Failed => {
                        anyhow::bail!(
                            "selection job failed: {}",
                            job.error.unwrap_or_else(|| "unknown".into())
                        );
                    }
                    _ => info!(
                        "selection progress: {}% ({}/{}, {} selected)",
                        job.progress.percent,
                        job.progress.processed,
                        job.progress.total,
                        job.progress.selected
                    ),
                }
            }
        }

        Commands::Auction { date, force } => {
            let engine = IngestionEngine::new(
                router,
                market,
                collection_history,
                config.collection_call_delay,
                config.collection_max_retries,
                config.collection_retry_base_delay,
                config.collection_complete_threshold,
            );
            let date = date.unwrap_or_else(exchange_today);
            let inserted = engine.refresh_auction(date, None, force).await?;
            println!("{}: {} auction snapshots stored", date, inserted);
        }

        Commands::Quality { days } => {
            let monitor = QualityMonitor::new(
                QualityRepository::new(db.pool.clone()),
                collection_history,
            );
            let report = monitor.generate_report(days).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Health => {
            router.run_health_check().await;
            let quality = QualityRepository::new(db.pool.clone());
            for health in router.health_snapshot().await {
                println!(
                    "{}: {} (success rate {:.1}%, avg latency {:.2}s)",
                    health.source_name,
                    health.state.as_str(),
                    health.success_rate * 100.0,
                    health.avg_latency
                );
                quality
                    .record_source_health(
                        &health.source_name,
                        health.state.as_str(),
                        health.success_rate,
                        health.avg_latency,
                        (!health.error_message.is_empty()).then_some(health.error_message.as_str()),
                    )
                    .await?;
            }
        }
    }

    Ok(())
}
