use shellflow::api;
use shellflow::config;
use shellflow::db;

use shellflow::jobs::store::{JobStore, QueueStore};
use shellflow::jobs::{
    Consumer, ConsumerConfig, LifecycleManager, PgJobStore, ProcessSupervisor, RedisQueue,
    RunningJobs,
};

use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Listen for SIGTERM/SIGINT and cancel the returned token on either. The
/// consumer stops popping the moment the token fires; in-flight processes
/// are handled by the shutdown sequencing in main.
fn install_shutdown_handler() -> anyhow::Result<CancellationToken> {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => println!("received SIGTERM, shutting down"),
            _ = sigint.recv() => println!("received SIGINT, shutting down"),
        }
        token_clone.cancel();
    });

    Ok(token)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::Config::from_env()?;

    println!(
        "shellflow worker starting... worker_id={} idle_interval_ms={} error_interval_ms={} shutdown_grace_secs={} api={} migrate_on_startup={}",
        cfg.worker_id,
        cfg.idle_interval_ms,
        cfg.error_interval_ms,
        cfg.shutdown_grace_secs,
        cfg.admin_addr.clone().unwrap_or_else(|| "disabled".to_string()),
        cfg.migrate_on_startup
    );

    let pool = db::make_pool(&cfg.database_url).await?;
    if cfg.migrate_on_startup {
        db::run_migrations(&pool).await?;
    }

    let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool.clone()));
    let queue: Arc<dyn QueueStore> = Arc::new(RedisQueue::connect(&cfg.redis_url).await?);

    let running = RunningJobs::new();
    let supervisor = ProcessSupervisor::new(store.clone(), queue.clone(), running.clone());
    let lifecycle =
        LifecycleManager::new(store.clone(), queue.clone(), supervisor, cfg.worker_id.clone());

    let shutdown = install_shutdown_handler()?;

    // ---- API task ----
    let api_state = api::ApiState {
        jobs: store.clone(),
    };
    let app = api::router(api_state);
    let api_addr = cfg.admin_addr.clone();

    let api_handle = tokio::spawn(async move {
        if let Some(addr) = api_addr {
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            println!("admin api listening on http://{addr}");
            axum::serve(listener, app).await?;
        } else {
            std::future::pending::<()>().await;
        }
        Ok::<(), anyhow::Error>(())
    });

    // ---- Consumer task ----
    let consumer = Consumer::new(
        queue.clone(),
        lifecycle,
        ConsumerConfig {
            idle_interval: Duration::from_millis(cfg.idle_interval_ms),
            error_interval: Duration::from_millis(cfg.error_interval_ms),
        },
        shutdown.clone(),
        cfg.worker_id.clone(),
    );
    let consumer_handle = tokio::spawn(async move { consumer.run().await });

    shutdown.cancelled().await;

    println!(
        "[{}] shutting down: no further jobs will be popped",
        cfg.worker_id
    );

    // Signal whatever is still running, give it the grace period, then kill.
    running
        .shutdown(Duration::from_secs(cfg.shutdown_grace_secs))
        .await;

    // The in-flight dispatch finishes persisting its terminal status once
    // its process is gone; bound the wait so shutdown latency stays bounded.
    let drain = Duration::from_secs(cfg.shutdown_grace_secs.max(1));
    if tokio::time::timeout(drain, consumer_handle).await.is_err() {
        eprintln!(
            "[{}] consumer did not stop within the grace period",
            cfg.worker_id
        );
    }

    api_handle.abort();
    pool.close().await;

    println!("[{}] worker exited", cfg.worker_id);
    Ok(())
}
