//! Conveyor demo binary.
//!
//! Subcommands mirror the classic task-queue deployment: `worker` runs a
//! slot pool, `beat` runs the periodic scheduler, `submit`/`result` drive
//! the client API, and `demo` wires all of them into one process (the
//! bundled `memory://` backends are per-process, so the cross-process
//! subcommands only become meaningful once a networked broker scheme is
//! plugged in).

mod tasks;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use conveyor_beat::{BeatConfig, BeatScheduler, LocalSchedulerLock};
use conveyor_broker::Broker;
use conveyor_client::Client;
use conveyor_config::{load_config, validate_config, Config, ShutdownMode};
use conveyor_proto::{RetryPolicy, TimeLimits};
use conveyor_registry::{Registry, RegistryBuilder};
use conveyor_results::ResultStore;
use conveyor_worker::{BackoffConfig, ShutdownPolicy, WorkerConfig, WorkerEngine};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "conveyor", about = "Distributed task queue demonstration")]
struct Cli {
    /// Path to a TOML config file; CONVEYOR_* env vars override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a worker pool until interrupted.
    Worker,
    /// Run the beat scheduler until interrupted.
    Beat,
    /// Submit a task invocation.
    Submit {
        /// Registered task name.
        task: String,
        /// Positional arguments as a JSON array.
        #[arg(long, default_value = "[]")]
        args: String,
        /// Keyword arguments as a JSON object.
        #[arg(long, default_value = "{}")]
        kwargs: String,
        /// Block until a terminal result instead of returning the id.
        #[arg(long)]
        wait: bool,
        #[arg(long, default_value_t = 10)]
        timeout_secs: u64,
    },
    /// Fetch the stored result for an invocation id.
    Result { id: Uuid },
    /// Run worker, beat and example submissions in a single process.
    Demo {
        /// How long to keep the process alive after the examples finish.
        #[arg(long, default_value_t = 30)]
        duration_secs: u64,
    },
}

fn init_tracing(cfg: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.logging.level.clone()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if cfg.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn worker_config(cfg: &Config) -> WorkerConfig {
    WorkerConfig {
        concurrency: cfg.worker.concurrency,
        dequeue_timeout: cfg.worker.dequeue_timeout(),
        default_retry: RetryPolicy::new(cfg.task.max_attempts),
        default_limits: TimeLimits {
            soft: cfg.task.soft_time_limit(),
            hard: cfg.task.hard_time_limit(),
        },
        shutdown: match cfg.worker.shutdown {
            ShutdownMode::Drain => ShutdownPolicy::Drain,
            ShutdownMode::Abandon => ShutdownPolicy::Abandon,
        },
        backoff: BackoffConfig {
            initial: cfg.worker.backoff_initial(),
            max: cfg.worker.backoff_max(),
        },
    }
}

struct Runtime {
    broker: Arc<dyn Broker>,
    results: Arc<dyn ResultStore>,
}

fn open_backends(cfg: &Config) -> anyhow::Result<Runtime> {
    let broker = conveyor_broker::connect(&cfg.broker_url).context("opening broker")?;
    let results = conveyor_results::connect(&cfg.result_store_url, cfg.result_ttl())
        .context("opening result store")?;
    Ok(Runtime { broker, results })
}

fn build_registry() -> anyhow::Result<Registry> {
    let builder = tasks::register_demo_tasks(RegistryBuilder::new())
        .context("registering demo tasks")?;
    Ok(builder.build())
}

/// Cancel the token on Ctrl-C.
fn shutdown_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            token.cancel();
        }
    });
}

async fn run_worker(cfg: &Config) -> anyhow::Result<()> {
    let runtime = open_backends(cfg)?;
    let registry = build_registry()?;
    info!(tasks = ?registry.task_names(), "registered tasks");

    let engine = WorkerEngine::new(worker_config(cfg), runtime.broker, runtime.results, registry);
    let shutdown = CancellationToken::new();
    shutdown_on_ctrl_c(shutdown.clone());
    engine.run(shutdown).await;
    Ok(())
}

async fn run_beat(cfg: &Config) -> anyhow::Result<()> {
    let runtime = open_backends(cfg)?;
    let beat = BeatScheduler::new(
        BeatConfig {
            tick: cfg.beat.tick(),
        },
        tasks::default_schedule(),
        runtime.broker,
    )?
    .with_lock(Arc::new(LocalSchedulerLock::new()));

    let shutdown = CancellationToken::new();
    shutdown_on_ctrl_c(shutdown.clone());
    beat.run(shutdown).await?;
    Ok(())
}

async fn run_submit(
    cfg: &Config,
    task: String,
    args: String,
    kwargs: String,
    wait: bool,
    timeout_secs: u64,
) -> anyhow::Result<()> {
    let runtime = open_backends(cfg)?;
    let client = Client::new(runtime.broker, runtime.results);

    let args: Vec<Value> = serde_json::from_str(&args).context("parsing --args")?;
    let kwargs: Map<String, Value> = serde_json::from_str(&kwargs).context("parsing --kwargs")?;

    if wait {
        let result = client
            .submit_and_wait(task, args, kwargs, Duration::from_secs(timeout_secs))
            .await?;
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        let id = client.submit(task, args, kwargs).await?;
        println!("{id}");
    }
    Ok(())
}

async fn run_result(cfg: &Config, id: Uuid) -> anyhow::Result<()> {
    let runtime = open_backends(cfg)?;
    let client = Client::new(runtime.broker, runtime.results);
    let result = client.fetch(id).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn run_demo(cfg: &Config, duration_secs: u64) -> anyhow::Result<()> {
    let runtime = open_backends(cfg)?;
    let registry = build_registry()?;
    let client = Client::new(runtime.broker.clone(), runtime.results.clone());

    let shutdown = CancellationToken::new();
    shutdown_on_ctrl_c(shutdown.clone());

    let engine = WorkerEngine::new(
        worker_config(cfg),
        runtime.broker.clone(),
        runtime.results.clone(),
        registry,
    );
    let worker = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { engine.run(shutdown).await })
    };

    let beat = BeatScheduler::new(
        BeatConfig {
            tick: cfg.beat.tick(),
        },
        tasks::default_schedule(),
        runtime.broker.clone(),
    )?
    .with_lock(Arc::new(LocalSchedulerLock::new()));
    let beat_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { beat.run(shutdown).await })
    };

    // The manual examples: submit, await, fetch again by id.
    let sum = client
        .submit_and_wait(
            tasks::task_names::ADD_NUMBERS,
            vec![Value::from(15), Value::from(27)],
            Map::new(),
            Duration::from_secs(10),
        )
        .await?;
    println!("add_numbers(15, 27) -> {}", serde_json::to_string(&sum)?);

    let greeting = client
        .submit_and_wait(
            tasks::task_names::SAY_HELLO,
            vec![Value::from("World")],
            Map::new(),
            Duration::from_secs(10),
        )
        .await?;
    println!("say_hello(\"World\") -> {}", serde_json::to_string(&greeting)?);

    let long_id = client
        .submit(
            tasks::task_names::LONG_RUNNING,
            vec![Value::from(3)],
            Map::new(),
        )
        .await?;
    println!("long_running(3) submitted as {long_id}");
    let long_result = client.wait_for(long_id, Duration::from_secs(15)).await?;
    println!(
        "long_running(3) -> {}",
        serde_json::to_string(&long_result)?
    );

    info!(
        duration_secs,
        "examples finished; periodic tasks keep firing until shutdown"
    );
    tokio::select! {
        _ = shutdown.cancelled() => {}
        _ = tokio::time::sleep(Duration::from_secs(duration_secs)) => shutdown.cancel(),
    }

    worker.await?;
    beat_task.await??;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = load_config(cli.config.as_deref()).context("loading configuration")?;
    validate_config(&cfg)?;
    init_tracing(&cfg);

    match cli.command {
        Command::Worker => run_worker(&cfg).await,
        Command::Beat => run_beat(&cfg).await,
        Command::Submit {
            task,
            args,
            kwargs,
            wait,
            timeout_secs,
        } => run_submit(&cfg, task, args, kwargs, wait, timeout_secs).await,
        Command::Result { id } => run_result(&cfg, id).await,
        Command::Demo { duration_secs } => run_demo(&cfg, duration_secs).await,
    }
}
