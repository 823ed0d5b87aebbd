//! Concurrent worker engine: bounded task/result channels, retry
//! discipline, and run statistics.
//!
//! The engine pulls tasks from a bounded channel, leases a proxy, asks the
//! stealth layer for headers and a pre-request delay, runs the search
//! backend, reports the outcome to pool and timing, and either emits a
//! terminal [`TaskResult`] or re-enqueues the task with its retry counter
//! bumped. Every submitted task reaches a terminal state exactly once.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{Classification, SearchBackend};
use crate::proxy::ProxyPool;
use crate::stealth::{FingerprintSet, TimingController};
use crate::{Result, ScrapeError};

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of concurrent workers. Zero is allowed (tasks queue up).
    pub workers: usize,
    /// Capacity of the task and result channels.
    pub buffer_size: usize,
    /// Per-request timeout, applied by the backend the engine is built with.
    pub request_timeout: Duration,
    /// Retries granted to captcha/blocked/error outcomes.
    pub max_retries: u32,
    /// Pause before a retry is re-enqueued; cancellable by `stop`.
    pub retry_delay: Duration,
    pub results_per_page: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            buffer_size: 1000,
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            results_per_page: 100,
        }
    }
}

/// A single dork query task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub dork: String,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub retry: u32,
}

impl Task {
    /// Creates a page-zero task.
    pub fn new(id: impl Into<String>, dork: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            dork: dork.into(),
            page: 0,
            retry: 0,
        }
    }

    /// Sets the result page.
    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }
}

/// Terminal outcome of one task. Immutable once emitted.
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub task_id: String,
    pub dork: String,
    pub status: Classification,
    pub urls: Vec<String>,
    pub error: Option<String>,
    /// Id of the proxy that served the final attempt; empty when none was
    /// acquired.
    pub proxy_id: String,
    pub duration: Duration,
    pub timestamp: SystemTime,
}

/// Snapshot of engine statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stats {
    pub tasks_total: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_pending: u64,
    pub urls_found: u64,
    pub captcha_count: u64,
    pub block_count: u64,
    /// Results dropped because the consumer fell behind.
    pub results_dropped: u64,
    pub elapsed_ms: u64,
    pub requests_per_sec: f64,
}

#[derive(Default)]
struct Counters {
    tasks_total: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    urls_found: AtomicU64,
    captcha_count: AtomicU64,
    block_count: AtomicU64,
    results_dropped: AtomicU64,
}

/// Per-run channel and worker state, rebuilt on every `start`.
struct Runtime {
    tasks_tx: mpsc::Sender<Task>,
    tasks_rx: Arc<Mutex<mpsc::Receiver<Task>>>,
    results_tx: mpsc::Sender<TaskResult>,
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// Everything a worker needs, shared by `Arc`.
struct WorkerCtx {
    config: EngineConfig,
    pool: Arc<ProxyPool>,
    fingerprints: Arc<FingerprintSet>,
    timing: Arc<TimingController>,
    backend: Arc<dyn SearchBackend>,
    counters: Arc<Counters>,
    tasks_tx: mpsc::Sender<Task>,
    results_tx: mpsc::Sender<TaskResult>,
}

/// The concurrent scraping engine.
pub struct Engine {
    config: EngineConfig,
    pool: Arc<ProxyPool>,
    fingerprints: Arc<FingerprintSet>,
    timing: Arc<TimingController>,
    backend: Arc<dyn SearchBackend>,
    counters: Arc<Counters>,
    runtime: Mutex<Option<Runtime>>,
    results_slot: std::sync::Mutex<Option<mpsc::Receiver<TaskResult>>>,
    running: AtomicBool,
    started_at: std::sync::Mutex<Option<Instant>>,
}

impl Engine {
    /// Creates an engine over the given pool and backend with default
    /// stealth settings.
    pub fn new(config: EngineConfig, pool: Arc<ProxyPool>, backend: Arc<dyn SearchBackend>) -> Self {
        Self {
            config,
            pool,
            fingerprints: Arc::new(FingerprintSet::new()),
            timing: Arc::new(TimingController::default()),
            backend,
            counters: Arc::new(Counters::default()),
            runtime: Mutex::new(None),
            results_slot: std::sync::Mutex::new(None),
            running: AtomicBool::new(false),
            started_at: std::sync::Mutex::new(None),
        }
    }

    /// Replaces the fingerprint set.
    pub fn with_fingerprints(mut self, fingerprints: FingerprintSet) -> Self {
        self.fingerprints = Arc::new(fingerprints);
        self
    }

    /// Replaces the timing controller.
    pub fn with_timing(mut self, timing: TimingController) -> Self {
        self.timing = Arc::new(timing);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }

    /// Whether the engine is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spins up the worker pool. Idempotent: starting a running engine is a
    /// no-op, not an error.
    pub async fn start(&self) {
        let mut runtime = self.runtime.lock().await;
        if runtime.is_some() {
            return;
        }

        let (tasks_tx, tasks_rx) = mpsc::channel(self.config.buffer_size.max(1));
        let (results_tx, results_rx) = mpsc::channel(self.config.buffer_size.max(1));
        let (shutdown_tx, _) = watch::channel(false);
        let tasks_rx = Arc::new(Mutex::new(tasks_rx));

        let ctx = Arc::new(WorkerCtx {
            config: self.config.clone(),
            pool: Arc::clone(&self.pool),
            fingerprints: Arc::clone(&self.fingerprints),
            timing: Arc::clone(&self.timing),
            backend: Arc::clone(&self.backend),
            counters: Arc::clone(&self.counters),
            tasks_tx: tasks_tx.clone(),
            results_tx: results_tx.clone(),
        });

        let mut handles = Vec::with_capacity(self.config.workers);
        for worker_id in 0..self.config.workers {
            let ctx = Arc::clone(&ctx);
            let tasks_rx = Arc::clone(&tasks_rx);
            let shutdown = shutdown_tx.subscribe();
            handles.push(tokio::spawn(worker_loop(worker_id, ctx, tasks_rx, shutdown)));
        }

        *self.results_slot.lock().expect("results slot poisoned") = Some(results_rx);
        *self.started_at.lock().expect("start time poisoned") = Some(Instant::now());
        *runtime = Some(Runtime {
            tasks_tx,
            tasks_rx,
            results_tx,
            shutdown: shutdown_tx,
            handles,
        });
        self.running.store(true, Ordering::SeqCst);
        info!(workers = self.config.workers, "engine started");
    }

    /// Signals termination, waits for workers to drain, and closes the
    /// result stream. Idempotent. Tasks still queued when the signal lands
    /// are dropped and counted under `tasks_failed`.
    pub async fn stop(&self) {
        let Some(runtime) = self.runtime.lock().await.take() else {
            return;
        };
        self.running.store(false, Ordering::SeqCst);

        let _ = runtime.shutdown.send(true);
        for handle in runtime.handles {
            let _ = handle.await;
        }

        // Anything still in the queue never ran; its terminal state is lost.
        let mut dropped = 0u64;
        {
            let mut rx = runtime.tasks_rx.lock().await;
            while rx.try_recv().is_ok() {
                dropped += 1;
            }
        }
        if dropped > 0 {
            self.counters
                .tasks_failed
                .fetch_add(dropped, Ordering::Relaxed);
            warn!(dropped, "tasks dropped at shutdown");
        }

        // `runtime` falls out of scope here, dropping the engine's result
        // sender; the stream closes once the last worker clone is gone.
        info!("engine stopped");
    }

    /// Non-blocking enqueue. Fails fast with `NotRunning` or `BufferFull`;
    /// the producer owns backpressure.
    pub async fn submit(&self, task: Task) -> Result<()> {
        let runtime = self.runtime.lock().await;
        let Some(runtime) = runtime.as_ref() else {
            return Err(ScrapeError::NotRunning);
        };
        match runtime.tasks_tx.try_send(task) {
            Ok(()) => {
                self.counters.tasks_total.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(ScrapeError::BufferFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ScrapeError::NotRunning),
        }
    }

    /// Takes the single-consumer result stream for the current run.
    ///
    /// Returns `None` if the engine was never started or the stream was
    /// already taken. The channel closes when `stop` completes.
    pub fn take_results(&self) -> Option<mpsc::Receiver<TaskResult>> {
        self.results_slot.lock().expect("results slot poisoned").take()
    }

    /// Statistics snapshot.
    pub async fn stats(&self) -> Stats {
        let elapsed = self
            .started_at
            .lock()
            .expect("start time poisoned")
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO);

        let tasks_pending = {
            let runtime = self.runtime.lock().await;
            runtime
                .as_ref()
                .map(|r| (r.tasks_tx.max_capacity() - r.tasks_tx.capacity()) as u64)
                .unwrap_or(0)
        };

        let completed = self.counters.tasks_completed.load(Ordering::Relaxed);
        let requests_per_sec = if elapsed.as_secs_f64() > 0.0 {
            completed as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        Stats {
            tasks_total: self.counters.tasks_total.load(Ordering::Relaxed),
            tasks_completed: completed,
            tasks_failed: self.counters.tasks_failed.load(Ordering::Relaxed),
            tasks_pending,
            urls_found: self.counters.urls_found.load(Ordering::Relaxed),
            captcha_count: self.counters.captcha_count.load(Ordering::Relaxed),
            block_count: self.counters.block_count.load(Ordering::Relaxed),
            results_dropped: self.counters.results_dropped.load(Ordering::Relaxed),
            elapsed_ms: elapsed.as_millis() as u64,
            requests_per_sec,
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    ctx: Arc<WorkerCtx>,
    tasks_rx: Arc<Mutex<mpsc::Receiver<Task>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(worker_id, "worker started");
    loop {
        let task = tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
                continue;
            }
            task = recv_task(&tasks_rx) => match task {
                Some(task) => task,
                None => break,
            },
        };
        process_task(&ctx, task, &mut shutdown).await;
    }
    debug!(worker_id, "worker exited");
}

async fn recv_task(tasks_rx: &Arc<Mutex<mpsc::Receiver<Task>>>) -> Option<Task> {
    tasks_rx.lock().await.recv().await
}

/// Sleeps unless the shutdown signal fires first. Returns false on shutdown.
async fn sleep_cancellable(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if delay.is_zero() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = shutdown.changed() => !*shutdown.borrow(),
    }
}

async fn process_task(ctx: &Arc<WorkerCtx>, mut task: Task, shutdown: &mut watch::Receiver<bool>) {
    let start = Instant::now();

    let proxy = match ctx.pool.acquire().await {
        Ok(proxy) => proxy,
        Err(e) => {
            ctx.counters.tasks_failed.fetch_add(1, Ordering::Relaxed);
            emit(
                ctx,
                TaskResult {
                    task_id: task.id.clone(),
                    dork: task.dork.clone(),
                    status: Classification::Error,
                    urls: Vec::new(),
                    error: Some(format!("no proxy available: {e}")),
                    proxy_id: String::new(),
                    duration: start.elapsed(),
                    timestamp: SystemTime::now(),
                },
            );
            return;
        }
    };

    let headers = ctx.fingerprints.headers_for(&proxy.id);
    let wait = ctx.timing.delay_for(&proxy.id);

    if !sleep_cancellable(wait, shutdown).await {
        // Cancelled before the request went out; the proxy saw nothing.
        ctx.pool.release(&proxy.id).await;
        ctx.counters.tasks_failed.fetch_add(1, Ordering::Relaxed);
        return;
    }

    let outcome = tokio::select! {
        outcome = ctx.backend.search(&task.dork, task.page, &proxy, headers) => outcome,
        _ = shutdown.changed() => {
            ctx.pool.release(&proxy.id).await;
            ctx.counters.tasks_failed.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    let duration = start.elapsed();

    match outcome.classification {
        Classification::Success | Classification::NoResults => {
            let _ = ctx.pool.report_success(&proxy.id, outcome.latency).await;
            ctx.timing.record_request(&proxy.id);
            ctx.counters
                .urls_found
                .fetch_add(outcome.urls.len() as u64, Ordering::Relaxed);
            ctx.counters.tasks_completed.fetch_add(1, Ordering::Relaxed);
            emit(
                ctx,
                TaskResult {
                    task_id: task.id.clone(),
                    dork: task.dork.clone(),
                    status: outcome.classification,
                    urls: outcome.urls,
                    error: None,
                    proxy_id: proxy.id.clone(),
                    duration,
                    timestamp: SystemTime::now(),
                },
            );
        }
        Classification::Captcha => {
            let _ = ctx.pool.report_captcha(&proxy.id).await;
            ctx.timing.record_captcha(&proxy.id);
            ctx.counters.captcha_count.fetch_add(1, Ordering::Relaxed);
            retry_or_finish(
                ctx,
                &mut task,
                &proxy.id,
                outcome.classification,
                outcome.error,
                duration,
                shutdown,
            )
            .await;
        }
        Classification::Blocked => {
            let _ = ctx.pool.report_block(&proxy.id).await;
            ctx.timing.record_block(&proxy.id);
            ctx.counters.block_count.fetch_add(1, Ordering::Relaxed);
            retry_or_finish(
                ctx,
                &mut task,
                &proxy.id,
                outcome.classification,
                outcome.error,
                duration,
                shutdown,
            )
            .await;
        }
        Classification::Error => {
            let _ = ctx.pool.report_failure(&proxy.id).await;
            ctx.timing.record_error(&proxy.id);
            retry_or_finish(
                ctx,
                &mut task,
                &proxy.id,
                outcome.classification,
                outcome.error,
                duration,
                shutdown,
            )
            .await;
        }
    }
}

/// Re-enqueues a retriable task, or emits its terminal result when the
/// retry budget is spent.
async fn retry_or_finish(
    ctx: &Arc<WorkerCtx>,
    task: &mut Task,
    proxy_id: &str,
    status: Classification,
    error: Option<String>,
    duration: Duration,
    shutdown: &mut watch::Receiver<bool>,
) {
    if task.retry < ctx.config.max_retries {
        task.retry += 1;
        debug!(task_id = %task.id, retry = task.retry, "re-enqueueing task");

        if !sleep_cancellable(ctx.config.retry_delay, shutdown).await {
            ctx.counters.tasks_failed.fetch_add(1, Ordering::Relaxed);
            return;
        }

        if ctx.tasks_tx.try_send(task.clone()).is_err() {
            ctx.counters.tasks_failed.fetch_add(1, Ordering::Relaxed);
            emit(
                ctx,
                TaskResult {
                    task_id: task.id.clone(),
                    dork: task.dork.clone(),
                    status: Classification::Error,
                    urls: Vec::new(),
                    error: Some("retry buffer full".to_string()),
                    proxy_id: proxy_id.to_string(),
                    duration,
                    timestamp: SystemTime::now(),
                },
            );
        }
        return;
    }

    ctx.counters.tasks_failed.fetch_add(1, Ordering::Relaxed);
    emit(
        ctx,
        TaskResult {
            task_id: task.id.clone(),
            dork: task.dork.clone(),
            status,
            urls: Vec::new(),
            error,
            proxy_id: proxy_id.to_string(),
            duration,
            timestamp: SystemTime::now(),
        },
    );
}

/// Non-blocking result send; overflow drops the result and counts it.
fn emit(ctx: &Arc<WorkerCtx>, result: TaskResult) {
    if ctx.results_tx.try_send(result).is_err() {
        ctx.counters.results_dropped.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SearchOutcome;
    use crate::proxy::{PoolConfig, Proxy, ProxyProtocol};
    use crate::stealth::TimingConfig;
    use async_trait::async_trait;
    use reqwest::header::HeaderMap;
    use std::sync::atomic::AtomicU32;

    /// Backend returning a scripted sequence of classifications.
    struct StubBackend {
        script: Vec<Classification>,
        calls: AtomicU32,
        urls: Vec<String>,
    }

    impl StubBackend {
        fn new(script: Vec<Classification>) -> Self {
            Self {
                script,
                calls: AtomicU32::new(0),
                urls: vec!["https://example.com/found".to_string()],
            }
        }
    }

    #[async_trait]
    impl SearchBackend for StubBackend {
        async fn search(
            &self,
            _dork: &str,
            _page: u32,
            _proxy: &Proxy,
            _headers: HeaderMap,
        ) -> SearchOutcome {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            let classification = *self
                .script
                .get(call)
                .or_else(|| self.script.last())
                .unwrap_or(&Classification::Error);
            SearchOutcome {
                classification,
                urls: if classification == Classification::Success {
                    self.urls.clone()
                } else {
                    Vec::new()
                },
                has_next_page: false,
                latency: Duration::from_millis(5),
                status_code: Some(200),
                error: None,
            }
        }
    }

    fn fast_timing() -> TimingController {
        TimingController::new(TimingConfig {
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            burst_size: 1000,
            burst_pause: Duration::ZERO,
            session_max_requests: 10_000,
            session_cooldown: Duration::ZERO,
            jitter_pct: 0.0,
            slowdown_factor: 1.0,
            captcha_cooldown: Duration::from_millis(5),
            error_cooldown: Duration::from_millis(5),
            block_cooldown: Duration::from_millis(5),
        })
    }

    fn fast_pool() -> Arc<ProxyPool> {
        Arc::new(ProxyPool::new(PoolConfig {
            captcha_cooldown: Duration::from_millis(10),
            block_cooldown: Duration::from_millis(10),
            error_cooldown: Duration::from_millis(10),
            ..Default::default()
        }))
    }

    async fn engine_with(
        script: Vec<Classification>,
        config: EngineConfig,
    ) -> (Engine, Arc<ProxyPool>) {
        let pool = fast_pool();
        pool.add(Proxy::new(ProxyProtocol::Http, "10.0.0.1", 8080))
            .await;
        let backend = Arc::new(StubBackend::new(script));
        let engine = Engine::new(config, Arc::clone(&pool), backend).with_timing(fast_timing());
        (engine, pool)
    }

    #[tokio::test]
    async fn test_submit_before_start_fails() {
        let (engine, _pool) =
            engine_with(vec![Classification::Success], EngineConfig::default()).await;
        let err = engine.submit(Task::new("t1", "site:example.com")).await;
        assert!(matches!(err, Err(ScrapeError::NotRunning)));
    }

    #[tokio::test]
    async fn test_submit_batch_counts_total() {
        let config = EngineConfig {
            workers: 0,
            buffer_size: 100,
            ..Default::default()
        };
        let (engine, _pool) = engine_with(vec![Classification::Success], config).await;
        engine.start().await;
        for i in 0..50 {
            engine
                .submit(Task::new(format!("t{i}"), "site:example.com"))
                .await
                .unwrap();
        }
        assert_eq!(engine.stats().await.tasks_total, 50);
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_buffer_full() {
        let config = EngineConfig {
            workers: 0,
            buffer_size: 2,
            ..Default::default()
        };
        let (engine, _pool) = engine_with(vec![Classification::Success], config).await;
        engine.start().await;

        engine.submit(Task::new("t1", "a")).await.unwrap();
        engine.submit(Task::new("t2", "b")).await.unwrap();
        let err = engine.submit(Task::new("t3", "c")).await;
        assert!(matches!(err, Err(ScrapeError::BufferFull)));
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let (engine, _pool) =
            engine_with(vec![Classification::Success], EngineConfig::default()).await;
        engine.start().await;
        engine.start().await;
        assert!(engine.is_running());
        engine.stop().await;
        engine.stop().await;
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn test_success_emits_result_with_urls() {
        let config = EngineConfig {
            workers: 1,
            retry_delay: Duration::from_millis(5),
            ..Default::default()
        };
        let (engine, _pool) = engine_with(vec![Classification::Success], config).await;
        engine.start().await;
        let mut results = engine.take_results().unwrap();

        engine.submit(Task::new("t1", "site:example.com")).await.unwrap();
        let result = results.recv().await.unwrap();
        assert_eq!(result.status, Classification::Success);
        assert_eq!(result.urls, vec!["https://example.com/found"]);
        assert_eq!(result.task_id, "t1");
        assert!(!result.proxy_id.is_empty());

        let stats = engine.stats().await;
        assert_eq!(stats.tasks_completed, 1);
        assert_eq!(stats.urls_found, 1);
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_captcha_then_success_retry() {
        let config = EngineConfig {
            workers: 1,
            max_retries: 2,
            retry_delay: Duration::from_millis(30),
            ..Default::default()
        };
        let (engine, pool) =
            engine_with(vec![Classification::Captcha, Classification::Success], config).await;
        engine.start().await;
        let mut results = engine.take_results().unwrap();

        engine.submit(Task::new("t1", "site:example.com")).await.unwrap();
        let result = results.recv().await.unwrap();
        assert_eq!(result.status, Classification::Success);
        assert_eq!(result.urls, vec!["https://example.com/found"]);

        let proxy = pool.get("http_10.0.0.1_8080").await.unwrap();
        assert_eq!(proxy.counters.captcha, 1);

        let stats = engine.stats().await;
        assert_eq!(stats.captcha_count, 1);
        assert_eq!(stats.tasks_completed, 1);
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_captcha_sets_proxy_cooldown() {
        let config = EngineConfig {
            workers: 1,
            max_retries: 0,
            ..Default::default()
        };
        let (engine, pool) = engine_with(vec![Classification::Captcha], config).await;
        engine.start().await;
        let mut results = engine.take_results().unwrap();

        engine.submit(Task::new("t1", "site:example.com")).await.unwrap();
        let result = results.recv().await.unwrap();
        assert_eq!(result.status, Classification::Captcha);

        let proxy = pool.get("http_10.0.0.1_8080").await.unwrap();
        assert!(proxy.cooldown_until.is_some());
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_retries_exhausted_is_terminal_failure() {
        let config = EngineConfig {
            workers: 1,
            max_retries: 1,
            retry_delay: Duration::from_millis(20),
            ..Default::default()
        };
        let (engine, _pool) = engine_with(vec![Classification::Error], config).await;
        engine.start().await;
        let mut results = engine.take_results().unwrap();

        engine.submit(Task::new("t1", "site:example.com")).await.unwrap();
        let result = results.recv().await.unwrap();
        assert_eq!(result.status, Classification::Error);

        let stats = engine.stats().await;
        assert_eq!(stats.tasks_failed, 1);
        assert_eq!(stats.tasks_completed, 0);
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_no_proxy_available_fails_task() {
        let config = EngineConfig {
            workers: 1,
            ..Default::default()
        };
        let pool = Arc::new(ProxyPool::default());
        let backend = Arc::new(StubBackend::new(vec![Classification::Success]));
        let engine = Engine::new(config, pool, backend).with_timing(fast_timing());
        engine.start().await;
        let mut results = engine.take_results().unwrap();

        engine.submit(Task::new("t1", "site:example.com")).await.unwrap();
        let result = results.recv().await.unwrap();
        assert_eq!(result.status, Classification::Error);
        assert!(result.error.unwrap().contains("no proxy available"));
        assert!(result.proxy_id.is_empty());
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_stop_drops_queued_tasks_as_failed() {
        let config = EngineConfig {
            workers: 0,
            buffer_size: 10,
            ..Default::default()
        };
        let (engine, _pool) = engine_with(vec![Classification::Success], config).await;
        engine.start().await;
        for i in 0..5 {
            engine.submit(Task::new(format!("t{i}"), "x")).await.unwrap();
        }
        engine.stop().await;

        let stats = engine.stats().await;
        assert_eq!(stats.tasks_total, 5);
        assert_eq!(stats.tasks_failed, 5);
        assert_eq!(stats.tasks_completed + stats.tasks_failed, stats.tasks_total);
    }

    #[tokio::test]
    async fn test_results_channel_closes_on_stop() {
        let config = EngineConfig {
            workers: 1,
            ..Default::default()
        };
        let (engine, _pool) = engine_with(vec![Classification::Success], config).await;
        engine.start().await;
        let mut results = engine.take_results().unwrap();
        engine.stop().await;
        assert!(results.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stats_requests_per_sec() {
        let config = EngineConfig {
            workers: 1,
            ..Default::default()
        };
        let (engine, _pool) = engine_with(vec![Classification::Success], config).await;
        engine.start().await;
        let mut results = engine.take_results().unwrap();
        engine.submit(Task::new("t1", "x")).await.unwrap();
        let _ = results.recv().await;

        let stats = engine.stats().await;
        assert!(stats.requests_per_sec > 0.0);
        assert!(stats.elapsed_ms > 0);
        engine.stop().await;
    }
}
