//! Worker process entry point: wires the Postgres repositories, the Power BI
//! client, the CDP render engine, and the message-queue dispatcher together,
//! then runs the fixed posting sweep and per-alert checks as cron jobs
//! alongside the queue consumers until a shutdown signal arrives.

mod dispatcher;
mod report_worker;
mod scheduler;
mod worker_trait;

use std::sync::Arc;
use std::time::Duration;

use reportbot_render::engine::cdp::CdpEngine;
use reportbot_render::engine::ReportEngine;
use reportbot_render::powerbi::{PostgresTokenCacheManager, PowerBiClientConfig, ServiceClient};
use reportbot_render::retry_strategy::RetryStrategy;
use reportbot_shared::analytics::LoggingAnalyticsSink;
use reportbot_shared::config::Config;
use reportbot_shared::db::create_pool;
use reportbot_shared::queue::{InMemoryMessageQueue, MessageQueue, RedisMessageQueue};
use reportbot_shared::repository::{
    PostgresAlertRepository, PostgresPostReportTaskRepository, PostgresUserRepository,
    PostgresWorkspaceRepository,
};
use tokio::task::JoinSet;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::dispatcher::MessageDispatcher;
use crate::report_worker::ReportWorker;
use crate::scheduler::{AlertScheduler, PostingScheduler};

/// Matches SQS's own default so a message whose handler crashes mid-flight
/// becomes visible again for redelivery within a few minutes rather than
/// being stuck invisible indefinitely.
const QUEUE_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(300);

const POSTING_SWEEP_KIND: &str = "postReport";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    dotenvy::dotenv().ok();

    info!("starting report worker");

    let config = Arc::new(Config::from_env()?);
    let pool = create_pool(&config.database_url).await?;

    let user_repo = Arc::new(PostgresUserRepository::new(pool.clone()));
    let workspace_repo = Arc::new(PostgresWorkspaceRepository::new(pool.clone()));
    let task_repo = Arc::new(PostgresPostReportTaskRepository::new(pool.clone()));
    let alert_repo = Arc::new(PostgresAlertRepository::new(pool.clone()));
    let token_cache = Arc::new(PostgresTokenCacheManager::new(pool.clone()));

    let powerbi = Arc::new(ServiceClient::new(
        PowerBiClientConfig {
            api_url: "https://api.powerbi.com/v1.0/myorg".to_string(),
            token_url: config.powerbi_token_endpoint.clone(),
            client_id: config.powerbi_client_id.clone(),
            client_secret: config.powerbi_client_secret.clone(),
        },
        token_cache,
    ));

    let queue: Arc<dyn MessageQueue> = match config.mq_implementation.as_str() {
        "redis" => Arc::new(
            RedisMessageQueue::connect(
                &config.mq_url,
                "reportbot",
                QUEUE_VISIBILITY_TIMEOUT,
                config.mq_polling_interval,
            )
            .await?,
        ),
        other => {
            if other != "memory" {
                error!(implementation = other, "unknown MQ_IMPLEMENTATION, falling back to in-memory");
            }
            Arc::new(InMemoryMessageQueue::new(config.mq_polling_interval))
        }
    };

    let analytics = Arc::new(LoggingAnalyticsSink);
    let cdp_engine = Arc::new(CdpEngine::new(config.clone()));
    let retry_strategy = Arc::new(RetryStrategy::new(queue.clone(), config.max_attempts));

    let report_worker = Arc::new(ReportWorker::new(
        powerbi.clone(),
        cdp_engine.clone() as Arc<dyn ReportEngine>,
        retry_strategy,
        user_repo.clone(),
        workspace_repo.clone(),
        task_repo.clone(),
        analytics.clone(),
    ));

    let mut dispatcher = MessageDispatcher::new(queue.clone(), config.messagehandler_concurrency_level);
    dispatcher.register_worker(report_worker)?;

    let cancel = CancellationToken::new();
    let mut tasks = JoinSet::new();
    dispatcher.start(&mut tasks, cancel.clone());

    let posting_scheduler = Arc::new(PostingScheduler::new(
        task_repo,
        workspace_repo.clone(),
        powerbi.clone(),
        queue.clone(),
        analytics.clone(),
    ));

    let alert_scheduler = Arc::new(AlertScheduler::new(
        alert_repo,
        workspace_repo,
        user_repo,
        powerbi,
        cdp_engine.clone(),
        analytics,
    ));
    alert_scheduler.schedule_active_alerts().await?;

    let cron = JobScheduler::new().await?;
    cron.add(Job::new_async("0 0,30 * * * *", move |_uuid, _l| {
        let scheduler = posting_scheduler.clone();
        Box::pin(async move {
            scheduler.run_sweep().await;
        })
    })?)
    .await?;
    cron.start().await?;
    info!(kind = POSTING_SWEEP_KIND, "scheduled posting sweep (every 30 minutes)");

    info!("worker started");

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received ctrl-c, shutting down"),
        _ = sigterm.recv() => info!("received sigterm, shutting down"),
    }

    // Cancel the dispatcher context first and give in-flight handlers
    // shutdown_timeout to drain; a worker still stuck mid-render past that
    // is force-cut rather than blocking shutdown indefinitely. Only then is
    // the scheduler context cancelled and the browser stopped.
    cancel.cancel();
    let drain = async { while tasks.join_next().await.is_some() {} };
    if tokio::time::timeout(config.shutdown_timeout, drain).await.is_err() {
        error!("dispatcher didn't drain within shutdown_timeout, forcing shutdown");
        tasks.shutdown().await;
    }

    alert_scheduler.cancel_all().await;
    cdp_engine.stop().await;

    info!("worker stopped");
    Ok(())
}
