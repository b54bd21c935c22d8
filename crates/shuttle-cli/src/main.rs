use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use shuttle_core::domain::TaskRunError;
use shuttle_core::impls::{InMemoryDispatchChannel, InMemoryTaskStore};
use shuttle_core::ports::{Clock, SystemClock, UlidGenerator};
use shuttle_core::{Collaborators, ExecutionContext, ScheduledTask, SchedulerBuilder, ShuttleConfig};

/// Shuttle - run the recurring task scheduler against in-memory collaborators
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (defaults are used when it does not exist)
    #[arg(short, long, default_value = "shuttle.toml")]
    config: PathBuf,

    /// Stop after this many seconds (runs until Ctrl-C when omitted)
    #[arg(long)]
    run_for_secs: Option<u64>,

    /// Number of workers (overrides config file)
    #[arg(short, long)]
    workers: Option<usize>,
}

/// 呼ばれるたびにカウンタを進めるだけのタスク
struct HeartbeatTask {
    beats: Arc<AtomicU64>,
}

#[async_trait]
impl ScheduledTask for HeartbeatTask {
    const TYPE: &'static str = "demo.heartbeat";
    const RUN_INTERVAL_SECS: u32 = 2;

    async fn run(&self, ctx: &ExecutionContext) -> Result<(), TaskRunError> {
        let n = self.beats.fetch_add(1, Ordering::Relaxed) + 1;
        info!(scope = %ctx, beat = n, "heartbeat");
        Ok(())
    }
}

/// 最初の数回だけ失敗するタスク
struct FlakyTask {
    remaining_failures: Arc<AtomicU32>,
}

#[async_trait]
impl ScheduledTask for FlakyTask {
    const TYPE: &'static str = "demo.flaky";
    const RUN_INTERVAL_SECS: u32 = 3;

    async fn run(&self, _ctx: &ExecutionContext) -> Result<(), TaskRunError> {
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(TaskRunError::new(format!(
                "intentional failure (left={left})"
            )));
        }
        Ok(())
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = ShuttleConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(workers) = cli.workers {
        config.workers.count = workers;
    }
    let ctx = ExecutionContext::new(config.scope.clone());

    // (A) in-memory の store / channel を用意
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(InMemoryTaskStore::new());
    let channel = Arc::new(InMemoryDispatchChannel::new(Arc::clone(&clock)));

    // (B) タスクを登録して組み立てる
    let beats = Arc::new(AtomicU64::new(0));
    let remaining_failures = Arc::new(AtomicU32::new(1));
    let app = SchedulerBuilder::new()
        .register::<HeartbeatTask, _>({
            let beats = Arc::clone(&beats);
            move || HeartbeatTask {
                beats: Arc::clone(&beats),
            }
        })?
        .register::<FlakyTask, _>(move || FlakyTask {
            remaining_failures: Arc::clone(&remaining_failures),
        })?
        .with_recovery(
            &config.recovery,
            channel.clone(),
            store.clone(),
            Arc::clone(&clock),
        )?
        .expect_tasks(&[HeartbeatTask::TYPE, FlakyTask::TYPE])
        .build(Collaborators {
            store: store.clone(),
            channel: channel.clone(),
            ids: Arc::new(UlidGenerator::new(Arc::clone(&clock))),
            clock,
        })?;

    let created = app.admin.register_missing_tasks(&ctx).await?;
    info!(scope = %ctx, created = created.len(), "task records registered");

    // (C) worker と scheduler loop を起動
    let workers = app.spawn_workers(
        config.workers.count,
        ctx.clone(),
        channel.clone(),
        config.workers.receive_timeout(),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller = app.scheduler_loop(ctx.clone(), config.scheduler.poll_settings());
    let scheduler = tokio::spawn(async move { poller.run(shutdown_rx).await });
    info!(workers = workers.len(), "shuttle running");

    // (D) 指定秒数、または Ctrl-C まで待つ
    match cli.run_for_secs {
        Some(secs) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        None => {
            tokio::signal::ctrl_c()
                .await
                .context("waiting for Ctrl-C")?;
        }
    }

    // (E) graceful shutdown: scheduler を止めてから worker を待つ
    let _ = shutdown_tx.send(true);
    if let Err(e) = scheduler.await {
        warn!(error = %e, "scheduler loop panicked");
    }
    workers.shutdown_and_join().await;

    let summary = serde_json::json!({
        "scope": ctx.scope(),
        "heartbeats": beats.load(Ordering::Relaxed),
        "tasks": app.admin.status_counts(&ctx).await?,
        "messages": channel.counts(&ctx)?,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
