use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info};

use courier_core::app::{FEED_PATHS, Producer, ReaperLoop};
use courier_core::domain::Gid;
use courier_core::impls::{SimulatedSender, SqliteOutboxStore};
use courier_core::ports::{OutboxStore, SystemClock};
use courier_core::queue::{QueueEntry, Record};
use courier_core::{CourierConfig, Runtime, RuntimeBuilder, Supervisor};

use crate::{Cli, Command, SenderArgs, Tuning};

pub async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let mut config = load_config(&cli)?;

    match cli.command {
        Command::Init { reset } => init(&config, reset).await,
        Command::Produce {
            paths,
            interval_ms,
            once,
            max_attempts,
        } => {
            apply_max_attempts(&mut config, max_attempts);
            produce(&config, paths, Duration::from_millis(interval_ms), once).await
        }
        Command::Worker { tuning, sender } => {
            apply_tuning(&mut config, &tuning);
            worker(config, &sender).await
        }
        Command::Recover {
            dry_run,
            once,
            tuning,
        } => {
            apply_tuning(&mut config, &tuning);
            config.dry_run |= dry_run;
            recover(config, once).await
        }
        Command::Run {
            workers,
            feed,
            feed_interval_ms,
            max_attempts,
            tuning,
            sender,
        } => {
            apply_tuning(&mut config, &tuning);
            apply_max_attempts(&mut config, max_attempts);
            if let Some(workers) = workers {
                config.workers = workers;
            }
            let feed = feed.then(|| Duration::from_millis(feed_interval_ms));
            run(config, &sender, feed).await
        }
        Command::Status => status(&config).await,
        Command::Inspect { gid } => inspect(&config, Gid::new(gid)).await,
    }
}

/// Defaults, then the config file, then global flags / env.
fn load_config(cli: &Cli) -> anyhow::Result<CourierConfig> {
    let mut config = match &cli.config {
        Some(path) => CourierConfig::load(path)?,
        None => CourierConfig::default(),
    };
    if let Some(db) = &cli.db {
        config.db_path = db.clone();
    }
    if let Some(save_dir) = &cli.save_dir {
        config.save_dir = save_dir.clone();
    }
    Ok(config)
}

fn apply_tuning(config: &mut CourierConfig, tuning: &Tuning) {
    if let Some(v) = tuning.poll_interval_ms {
        config.poll_interval_ms = v;
    }
    if let Some(v) = tuning.lease_timeout_secs {
        config.lease_timeout_secs = v;
    }
    if let Some(v) = tuning.sweep_interval_secs {
        config.sweep_interval_secs = v;
    }
    if let Some(v) = tuning.batch_size {
        config.batch_size = v;
    }
}

/// Only producers read `max_attempts`; it is stamped on each new entry.
fn apply_max_attempts(config: &mut CourierConfig, max_attempts: Option<u32>) {
    if let Some(v) = max_attempts {
        config.max_attempts = v;
    }
}

fn open_store(config: &CourierConfig) -> anyhow::Result<SqliteOutboxStore> {
    SqliteOutboxStore::open(&config.db_path, config.busy_timeout())
        .with_context(|| format!("open store at {}", config.db_path.display()))
}

fn build_runtime(config: CourierConfig, sender: &SenderArgs) -> anyhow::Result<Runtime> {
    let sender = SimulatedSender::new(
        Duration::from_millis(sender.min_latency_ms),
        Duration::from_millis(sender.max_latency_ms),
        sender.failure_rate,
    );
    Ok(RuntimeBuilder::new(config).sender(Arc::new(sender)).build()?)
}

/// Flips to `true` on Ctrl-C.
fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
        }
        info!("Shutdown requested");
        let _ = tx.send(true);
    });
    rx
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn init(config: &CourierConfig, reset: bool) -> anyhow::Result<()> {
    let store = open_store(config)?;
    if reset {
        store.reset().await?;
    }
    info!(path = %config.db_path.display(), reset, "Store ready");
    Ok(())
}

async fn produce(
    config: &CourierConfig,
    paths: Vec<String>,
    interval: Duration,
    once: bool,
) -> anyhow::Result<()> {
    config.validate()?;
    let producer = Producer::new(Arc::new(open_store(config)?), Arc::new(SystemClock), config);
    let paths = if paths.is_empty() {
        FEED_PATHS.iter().map(|p| p.to_string()).collect()
    } else {
        paths
    };

    if once {
        for path in &paths {
            let (gid, id) = producer.publish_new(path.as_str()).await?;
            info!(entry_id = %id, gid = %gid, path = %path, "Published");
        }
        return Ok(());
    }

    producer.run_feed(&paths, interval, shutdown_on_ctrl_c()).await;
    Ok(())
}

async fn worker(config: CourierConfig, sender: &SenderArgs) -> anyhow::Result<()> {
    let runtime = build_runtime(config, sender)?;
    let worker = runtime.worker(0)?;
    worker.run(shutdown_on_ctrl_c()).await;
    Ok(())
}

async fn recover(config: CourierConfig, once: bool) -> anyhow::Result<()> {
    config.validate()?;
    let store: Arc<dyn OutboxStore> = Arc::new(open_store(&config)?);
    let reaper = ReaperLoop::new(store, Arc::new(SystemClock), &config);

    if once {
        let report = reaper.sweep_once().await?;
        return print_json(&report);
    }

    reaper.run(shutdown_on_ctrl_c()).await;
    Ok(())
}

async fn run(
    config: CourierConfig,
    sender: &SenderArgs,
    feed: Option<Duration>,
) -> anyhow::Result<()> {
    let workers = config.workers;
    let runtime = build_runtime(config, sender)?;

    let mut supervisor = Supervisor::spawn(&runtime, workers)?;
    if let Some(interval) = feed {
        let paths = FEED_PATHS.iter().map(|p| p.to_string()).collect();
        supervisor.spawn_feed(&runtime, paths, interval)?;
    }

    let mut shutdown = shutdown_on_ctrl_c();
    let _ = shutdown.wait_for(|stop| *stop).await;

    supervisor.shutdown_and_join().await;
    Ok(())
}

async fn status(config: &CourierConfig) -> anyhow::Result<()> {
    let counts = open_store(config)?.counts().await?;
    print_json(&counts)
}

#[derive(Serialize)]
struct Inspection {
    entry: QueueEntry,
    record: Option<Record>,
}

async fn inspect(config: &CourierConfig, gid: Gid) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let Some(entry) = store.entry(&gid).await? else {
        bail!("no queue entry for gid {gid}");
    };
    let record = store.record(&gid).await?;
    print_json(&Inspection { entry, record })
}
