//! Harrow CLI - dork scraping engine front-end.
//!
//! Two modes: standalone (`--dorks` + `--proxies`, results written to an
//! output directory) and host-embedded (`--host`, line-delimited JSON
//! control protocol over stdin/stdout).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use harrow::backends::{Google, GoogleConfig};
use harrow::protocol::{self, Inbound, MessageWriter};
use harrow::proxy::{HealthChecker, HealthConfig, PoolConfig, ProxyPool};
use harrow::stealth::{TimingConfig, TimingController, TimingProfile};
use harrow::{Engine, EngineConfig, FilterConfig, FilterPipeline, Task, TaskResult};

/// Harrow - concurrent dork scraper with proxy rotation
#[derive(Parser)]
#[command(name = "harrow")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the dorks file (one per line, # comments)
    #[arg(long)]
    dorks: Option<PathBuf>,

    /// Path to the proxies file (one per line, any supported format)
    #[arg(long)]
    proxies: Option<PathBuf>,

    /// Output directory for result files
    #[arg(long, default_value = "./output")]
    output: PathBuf,

    /// Number of concurrent workers
    #[arg(long, default_value = "10")]
    workers: usize,

    /// Pacing profile
    #[arg(long, default_value = "normal")]
    profile: Profile,

    /// Run in host-embedded mode (JSON control protocol on stdin/stdout)
    #[arg(long)]
    host: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Profile {
    Aggressive,
    Normal,
    Cautious,
    Stealth,
}

impl From<Profile> for TimingProfile {
    fn from(profile: Profile) -> Self {
        match profile {
            Profile::Aggressive => TimingProfile::Aggressive,
            Profile::Normal => TimingProfile::Normal,
            Profile::Cautious => TimingProfile::Cautious,
            Profile::Stealth => TimingProfile::Stealth,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if cli.host {
        return run_host_mode().await;
    }
    run_standalone(cli).await
}

async fn run_standalone(cli: Cli) -> Result<()> {
    let dork_path = cli
        .dorks
        .context("--dorks is required in standalone mode")?;
    let proxy_path = cli
        .proxies
        .context("--proxies is required in standalone mode")?;

    let dorks = load_dorks(&dork_path)
        .await
        .with_context(|| format!("failed to load dorks from {}", dork_path.display()))?;
    anyhow::ensure!(!dorks.is_empty(), "no dorks found in {}", dork_path.display());
    info!("loaded {} dorks", dorks.len());

    let pool = Arc::new(ProxyPool::new(PoolConfig::default()));
    let (added, errors) = pool
        .load_from_file(&proxy_path)
        .await
        .with_context(|| format!("failed to load proxies from {}", proxy_path.display()))?;
    info!("loaded {} proxies ({} bad lines)", added, errors.len());
    anyhow::ensure!(added > 0, "no valid proxies in {}", proxy_path.display());

    tokio::fs::create_dir_all(&cli.output)
        .await
        .with_context(|| format!("failed to create {}", cli.output.display()))?;
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let output_path = cli.output.join(format!("results_{stamp}.txt"));
    let output_file = tokio::fs::File::create(&output_path)
        .await
        .with_context(|| format!("failed to create {}", output_path.display()))?;

    let config = EngineConfig {
        workers: cli.workers,
        ..Default::default()
    };
    let backend = Arc::new(Google::with_config(GoogleConfig {
        results_per_page: config.results_per_page,
        timeout: config.request_timeout,
        ..Default::default()
    }));
    let engine = Arc::new(
        Engine::new(config, Arc::clone(&pool), backend)
            .with_timing(TimingController::with_profile(cli.profile.into())),
    );

    engine.start().await;
    let results = engine.take_results().expect("fresh engine yields a stream");

    let health = HealthChecker::new(Arc::clone(&pool), HealthConfig::default())
        .spawn_periodic(Duration::from_secs(300));

    let filter = Arc::new(FilterPipeline::new(FilterConfig::default()));
    let url_count = Arc::new(AtomicU64::new(0));
    let drain = tokio::spawn(drain_results(
        results,
        output_file,
        Arc::clone(&filter),
        Arc::clone(&url_count),
    ));

    // Submit everything; BufferFull is the signal to let workers catch up.
    for (i, dork) in dorks.iter().enumerate() {
        let mut task = Task::new(format!("task_{i}"), dork.clone());
        loop {
            match engine.submit(task).await {
                Ok(()) => break,
                Err(harrow::ScrapeError::BufferFull) => {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    task = Task::new(format!("task_{i}"), dork.clone());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(2));
    let interrupted = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\ninterrupted, shutting down");
                break true;
            }
            _ = ticker.tick() => {
                let stats = engine.stats().await;
                let pool_stats = pool.stats().await;
                let done = stats.tasks_completed + stats.tasks_failed;
                eprint!(
                    "\r[{:5.1}%] {}/{} dorks | {} URLs | {:.1} req/s | {} proxies alive",
                    if stats.tasks_total > 0 { done as f64 / stats.tasks_total as f64 * 100.0 } else { 0.0 },
                    done,
                    stats.tasks_total,
                    url_count.load(Ordering::Relaxed),
                    stats.requests_per_sec,
                    pool_stats.alive + pool_stats.slow + pool_stats.unknown,
                );
                if stats.tasks_total > 0 && done >= stats.tasks_total {
                    eprintln!();
                    break false;
                }
            }
        }
    };

    health.stop().await;
    engine.stop().await;
    let _ = drain.await;

    let stats = engine.stats().await;
    let filter_stats = filter.stats();
    eprintln!();
    eprintln!("total dorks:   {}", stats.tasks_total);
    eprintln!("completed:     {}", stats.tasks_completed);
    eprintln!("failed:        {}", stats.tasks_failed);
    eprintln!("urls found:    {}", stats.urls_found);
    eprintln!("urls kept:     {}", filter_stats.passed);
    eprintln!("captchas:      {}", stats.captcha_count);
    eprintln!("blocks:        {}", stats.block_count);
    eprintln!("avg speed:     {:.1} req/s", stats.requests_per_sec);
    eprintln!("results saved: {}", output_path.display());

    // An interrupted run still exits cleanly with partial output on disk.
    let _ = interrupted;
    Ok(())
}

async fn drain_results(
    mut results: mpsc::Receiver<TaskResult>,
    file: tokio::fs::File,
    filter: Arc<FilterPipeline>,
    url_count: Arc<AtomicU64>,
) {
    let mut writer = tokio::io::BufWriter::new(file);
    while let Some(result) = results.recv().await {
        for url in &result.urls {
            if let Some(kept) = filter.check(url) {
                if writer.write_all(kept.as_bytes()).await.is_err() {
                    warn!("output write failed, dropping remaining results");
                    return;
                }
                let _ = writer.write_all(b"\n").await;
                url_count.fetch_add(1, Ordering::Relaxed);
            }
        }
        let _ = writer.flush().await;
    }
    let _ = writer.flush().await;
}

/// Host-embedded mode: drive the engine over the JSON line protocol.
async fn run_host_mode() -> Result<()> {
    let writer = Arc::new(MessageWriter::new(tokio::io::stdout()));
    let mut reader = BufReader::new(tokio::io::stdin()).lines();

    writer.send(&protocol::status("ready", "")).await?;

    let mut session: Option<HostSession> = None;

    loop {
        let line = tokio::select! {
            line = reader.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                writer
                    .send(&protocol::status("interrupted", "received interrupt signal"))
                    .await?;
                if let Some(session) = session.take() {
                    session.shutdown().await;
                }
                return Ok(());
            }
        };
        let Some(line) = line else {
            break; // inbound stream closed
        };
        if line.trim().is_empty() {
            continue;
        }

        match protocol::parse_inbound(&line) {
            Ok(Inbound::Init(config)) => {
                if let Some(old) = session.take() {
                    old.shutdown().await;
                }
                session = Some(init_session(config, &writer).await?);
            }
            Ok(Inbound::Task(spec)) => {
                if let Some(session) = &session {
                    let task = Task::new(spec.id, spec.dork).with_page(spec.page);
                    if let Err(e) = session.engine.submit(task).await {
                        writer
                            .send(&protocol::error("submit_failed", &e.to_string()))
                            .await?;
                    }
                } else {
                    writer
                        .send(&protocol::error("not_initialized", "send init first"))
                        .await?;
                }
            }
            Ok(Inbound::TaskBatch(specs)) => {
                if let Some(session) = &session {
                    for spec in specs {
                        let task = Task::new(spec.id, spec.dork).with_page(spec.page);
                        if let Err(e) = session.engine.submit(task).await {
                            writer
                                .send(&protocol::error("submit_failed", &e.to_string()))
                                .await?;
                        }
                    }
                } else {
                    writer
                        .send(&protocol::error("not_initialized", "send init first"))
                        .await?;
                }
            }
            Ok(Inbound::Pause) => {
                if let Some(session) = &session {
                    session.engine.stop().await;
                }
                writer.send(&protocol::status("paused", "")).await?;
            }
            Ok(Inbound::Resume) => {
                if let Some(session) = &session {
                    session.engine.start().await;
                    spawn_forwarder(session, &writer);
                }
                writer.send(&protocol::status("resumed", "")).await?;
            }
            Ok(Inbound::GetStats) => {
                if let Some(session) = &session {
                    let stats = session.engine.stats().await;
                    let pool_stats = session.pool.stats().await;
                    writer.send(&protocol::stats(&stats, &pool_stats)).await?;
                } else {
                    writer
                        .send(&protocol::stats(
                            &Default::default(),
                            &Default::default(),
                        ))
                        .await?;
                }
            }
            Ok(Inbound::Shutdown) => {
                if let Some(session) = session.take() {
                    session.shutdown().await;
                }
                writer.send(&protocol::status("shutdown", "")).await?;
                break;
            }
            Err(e) => {
                writer
                    .send(&protocol::error(e.code(), &e.to_string()))
                    .await?;
            }
        }
    }

    // Inbound stream closed without an explicit shutdown.
    if let Some(session) = session.take() {
        session.shutdown().await;
    }
    Ok(())
}

struct HostSession {
    engine: Arc<Engine>,
    pool: Arc<ProxyPool>,
    health: harrow::proxy::HealthHandle,
}

impl HostSession {
    async fn shutdown(self) {
        self.health.stop().await;
        self.engine.stop().await;
    }
}

async fn init_session(
    config: protocol::InitConfig,
    writer: &Arc<MessageWriter<tokio::io::Stdout>>,
) -> Result<HostSession> {
    let pool = Arc::new(ProxyPool::new(PoolConfig::default()));

    if !config.proxy_file.is_empty() {
        match pool.load_from_file(&config.proxy_file).await {
            Ok((added, errors)) => {
                writer
                    .send(&protocol::log(
                        "info",
                        &format!("loaded {added} proxies from file"),
                    ))
                    .await?;
                for err in errors {
                    writer
                        .send(&protocol::log("warn", &format!("proxy load: {err}")))
                        .await?;
                }
            }
            Err(e) => {
                writer
                    .send(&protocol::log("warn", &format!("proxy file: {e}")))
                    .await?;
            }
        }
    }
    if !config.proxies.is_empty() {
        let joined = config.proxies.join("\n");
        let (added, errors) = pool.load_from_lines(&joined).await;
        writer
            .send(&protocol::log("info", &format!("loaded {added} proxies")))
            .await?;
        for err in errors {
            writer
                .send(&protocol::log("warn", &format!("invalid proxy: {err}")))
                .await?;
        }
    }

    writer
        .send(&protocol::proxy_info(&pool.stats().await))
        .await?;

    let timeout = Duration::from_millis(config.timeout);
    let engine_config = EngineConfig {
        workers: config.workers,
        request_timeout: timeout,
        max_retries: config.max_retries,
        results_per_page: config.results_per_page,
        ..Default::default()
    };
    let backend = Arc::new(Google::with_config(GoogleConfig {
        results_per_page: config.results_per_page,
        timeout,
        ..Default::default()
    }));
    let timing = TimingController::new(TimingConfig {
        min_delay: Duration::from_millis(config.min_delay),
        max_delay: Duration::from_millis(config.max_delay),
        ..TimingConfig::default()
    });

    let workers = engine_config.workers;
    let engine = Arc::new(
        Engine::new(engine_config, Arc::clone(&pool), backend).with_timing(timing),
    );
    engine.start().await;

    let health = HealthChecker::new(Arc::clone(&pool), HealthConfig::default())
        .spawn_periodic(Duration::from_secs(300));

    let session = HostSession {
        engine,
        pool,
        health,
    };
    spawn_forwarder(&session, writer);

    writer
        .send(&protocol::status(
            "initialized",
            &format!("engine initialized with {workers} workers"),
        ))
        .await?;

    Ok(session)
}

/// Forwards engine results (and a progress line per result) onto the
/// outbound stream until the current run's channel closes.
fn spawn_forwarder(session: &HostSession, writer: &Arc<MessageWriter<tokio::io::Stdout>>) {
    let Some(mut results) = session.engine.take_results() else {
        return;
    };
    let engine = Arc::clone(&session.engine);
    let writer = Arc::clone(writer);
    tokio::spawn(async move {
        while let Some(result) = results.recv().await {
            if writer.send(&protocol::result(&result)).await.is_err() {
                return;
            }
            let stats = engine.stats().await;
            let done = stats.tasks_completed + stats.tasks_failed;
            let _ = writer
                .send(&protocol::progress(done, stats.tasks_total))
                .await;
        }
    });
}

async fn load_dorks(path: &Path) -> Result<Vec<String>> {
    let contents = tokio::fs::read_to_string(path).await?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}
