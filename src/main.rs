//! `runlater` binary: the execution core's entry point. Wires together the
//! scheduler, worker pool, and ancillary sweeps as background services,
//! and serves the tenant-facing HTTP surface.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use runlater_core::cleanup::{RetentionSweep, StaleExecutionSweep};
use runlater_core::common::service::Service;
use runlater_core::exec_counter::{ExecCounter, ExecCounterFlusher};
use runlater_core::host_blocker::{HostBlocker, HostBlockerSweep};
use runlater_core::inbound::InboundReceiver;
use runlater_core::monitor_checker::MonitorChecker;
use runlater_core::notifier::{NotificationBus, SchedulerWake, WorkerWake};
use runlater_core::scheduler::Scheduler;
use runlater_core::server::{build_app, AppState};
use runlater_core::worker_pool::{WorkerPool, WorkerPoolConfig};
use runlater_core::Config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,runlater=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting runlater execution core");

    let config = Config::from_env().context("failed to load configuration")?;

    tracing::info!("connecting to database");
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&config.database_url)
        .await
        .context("failed to connect to database")?;

    tracing::info!("running migrations");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    let shutdown = CancellationToken::new();

    let host_blocker = HostBlocker::new();
    let exec_counter = ExecCounter::new();
    let notifications = NotificationBus::default();
    let scheduler_wake = SchedulerWake::new();
    let worker_wake = WorkerWake::new();

    let mut handles = Vec::new();

    handles.push(spawn(
        Scheduler::new(
            pool.clone(),
            config.scheduler_tick,
            config.scheduler_lookahead,
            scheduler_wake.clone(),
            worker_wake.clone(),
            notifications.clone(),
            config.free_tier_monthly_quota,
            config.pro_tier_monthly_quota,
        ),
        shutdown.child_token(),
    ));

    handles.push(spawn(
        WorkerPool::new(
            pool.clone(),
            WorkerPoolConfig {
                min: config.worker_pool_min,
                max: config.worker_pool_max,
                rescan_interval: config.worker_pool_interval,
            },
            host_blocker.clone(),
            exec_counter.clone(),
            notifications.clone(),
            worker_wake.clone(),
        ),
        shutdown.child_token(),
    ));

    handles.push(spawn(
        HostBlockerSweep { blocker: host_blocker.clone(), interval: config.host_blocker_sweep_interval },
        shutdown.child_token(),
    ));

    handles.push(spawn(
        ExecCounterFlusher { counter: exec_counter.clone(), pool: pool.clone(), interval: config.exec_counter_flush_interval },
        shutdown.child_token(),
    ));

    handles.push(spawn(
        MonitorChecker::new(pool.clone(), config.monitor_check_interval, notifications.clone()),
        shutdown.child_token(),
    ));

    handles.push(spawn(
        StaleExecutionSweep {
            pool: pool.clone(),
            threshold: config.stale_execution_threshold,
            interval: config.stale_sweep_interval,
        },
        shutdown.child_token(),
    ));

    handles.push(spawn(
        RetentionSweep {
            pool: pool.clone(),
            free_retention_days: config.free_retention_days,
            pro_retention_days: config.pro_retention_days,
            global_log_retention_days: config.global_log_retention_days,
        },
        shutdown.child_token(),
    ));

    let inbound = Arc::new(InboundReceiver::new(pool.clone(), worker_wake.clone()));
    // A second, independent MonitorChecker for the HTTP ping path: the one
    // above was moved into its background sweep task and is no longer
    // reachable here. Both are cheap, stateless wrappers around the pool.
    let monitor_checker = Arc::new(MonitorChecker::new(pool.clone(), config.monitor_check_interval, notifications.clone()));

    let app = build_app(AppState {
        pool: pool.clone(),
        inbound,
        monitor_checker,
        notifications: notifications.clone(),
    });

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!(%addr, "starting http server");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("failed to bind http listener")?;

    let serve_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>())
            .with_graceful_shutdown(async move { serve_shutdown.cancelled().await })
            .await
    });

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    tracing::info!("shutdown signal received");
    shutdown.cancel();

    let _ = server.await;
    for handle in handles {
        let _ = handle.await;
    }

    tracing::info!("runlater stopped");
    Ok(())
}

fn spawn<S: Service + 'static>(service: S, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
    let name = service.name();
    tokio::spawn(async move {
        if let Err(e) = Box::new(service).run(shutdown).await {
            tracing::error!(service = name, error = %e, "service exited with error");
        }
    })
}
