//! Background proxy health probing.
//!
//! Two probe depths: a quick TCP connect, and a full HTTP GET through the
//! proxy against a lightweight test URL. Probes only read pool snapshots and
//! write status updates, so they never hold the pool lock across I/O and
//! never block [`ProxyPool::acquire`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Proxy, ProxyPool, ProxyStatus};

/// Health checker configuration.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// URL fetched through each proxy for the full probe.
    pub test_url: String,
    /// Per-probe timeout.
    pub timeout: Duration,
    /// Number of proxies probed concurrently.
    pub concurrency: usize,
    /// Probes slower than this mark the proxy `Slow`.
    pub slow_threshold: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            test_url: "https://www.google.com/robots.txt".to_string(),
            timeout: Duration::from_secs(10),
            concurrency: 50,
            slow_threshold: Duration::from_secs(5),
        }
    }
}

/// Summary of one probe sweep.
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthReport {
    pub total: usize,
    pub alive: usize,
    pub slow: usize,
    pub dead: usize,
    pub duration: Duration,
}

/// Probes pool proxies and records the results.
pub struct HealthChecker {
    pool: Arc<ProxyPool>,
    config: HealthConfig,
}

/// Handle to a running periodic health task; dropping it detaches the task,
/// [`HealthHandle::stop`] cancels it.
pub struct HealthHandle {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl HealthHandle {
    /// Cancels the periodic task and waits for it to exit.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.handle.await;
    }
}

impl HealthChecker {
    /// Creates a checker over the given pool.
    pub fn new(pool: Arc<ProxyPool>, config: HealthConfig) -> Self {
        Self { pool, config }
    }

    /// Fast TCP connect probe; returns reachability and elapsed time.
    pub async fn quick_check(&self, proxy: &Proxy) -> (bool, Duration) {
        let start = Instant::now();
        let addr = format!("{}:{}", proxy.host, proxy.port);
        let connected = tokio::time::timeout(self.config.timeout, TcpStream::connect(&addr))
            .await
            .map(|res| res.is_ok())
            .unwrap_or(false);
        (connected, start.elapsed())
    }

    /// Full probe: one GET through the proxy against the test URL.
    pub async fn check_proxy(&self, proxy: &Proxy) -> (ProxyStatus, Duration) {
        let start = Instant::now();

        let client = match reqwest::Client::builder()
            .timeout(self.config.timeout)
            .proxy(match reqwest::Proxy::all(proxy.url()) {
                Ok(p) => p,
                Err(e) => {
                    debug!(id = %proxy.id, "health probe proxy setup failed: {e}");
                    return (ProxyStatus::Dead, start.elapsed());
                }
            })
            .danger_accept_invalid_certs(true)
            .build()
        {
            Ok(c) => c,
            Err(e) => {
                debug!(id = %proxy.id, "health probe client failed: {e}");
                return (ProxyStatus::Dead, start.elapsed());
            }
        };

        let status = match client.get(&self.config.test_url).send().await {
            Ok(resp) if resp.status().is_success() || resp.status().is_redirection() => {
                if start.elapsed() > self.config.slow_threshold {
                    ProxyStatus::Slow
                } else {
                    ProxyStatus::Alive
                }
            }
            Ok(resp) => {
                debug!(id = %proxy.id, status = %resp.status(), "health probe rejected");
                ProxyStatus::Dead
            }
            Err(e) => {
                debug!(id = %proxy.id, "health probe failed: {e}");
                ProxyStatus::Dead
            }
        };

        (status, start.elapsed())
    }

    /// Probes every proxy in the pool and records statuses.
    pub async fn check_all(&self) -> HealthReport {
        let start = Instant::now();
        let proxies = self.pool.all().await;
        let total = proxies.len();

        let results: Vec<(String, ProxyStatus)> = stream::iter(proxies)
            .map(|proxy| async move {
                let (status, _latency) = self.check_proxy(&proxy).await;
                (proxy.id, status)
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut report = HealthReport {
            total,
            ..Default::default()
        };
        for (id, status) in results {
            match status {
                ProxyStatus::Alive => report.alive += 1,
                ProxyStatus::Slow => report.slow += 1,
                _ => report.dead += 1,
            }
            if let Err(e) = self.pool.set_status(&id, status).await {
                warn!("health update failed: {e}");
            }
        }
        report.duration = start.elapsed();

        info!(
            total = report.total,
            alive = report.alive,
            slow = report.slow,
            dead = report.dead,
            "health sweep finished in {:?}",
            report.duration
        );
        report
    }

    /// Spawns a periodic sweep every `interval`. The returned handle cancels
    /// it; a sweep in progress finishes its in-flight probes first.
    pub fn spawn_periodic(self, interval: Duration) -> HealthHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so startup is quiet.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.check_all().await;
                    }
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            return;
                        }
                    }
                }
            }
        });
        HealthHandle {
            stop: stop_tx,
            handle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{PoolConfig, ProxyProtocol};

    #[tokio::test]
    async fn test_quick_check_unreachable() {
        let pool = Arc::new(ProxyPool::new(PoolConfig::default()));
        let checker = HealthChecker::new(
            pool,
            HealthConfig {
                timeout: Duration::from_millis(200),
                ..Default::default()
            },
        );
        // TEST-NET-1 address, guaranteed unroutable.
        let proxy = Proxy::new(ProxyProtocol::Http, "192.0.2.1", 9);
        let (alive, latency) = checker.quick_check(&proxy).await;
        assert!(!alive);
        assert!(latency <= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_check_all_empty_pool() {
        let pool = Arc::new(ProxyPool::new(PoolConfig::default()));
        let checker = HealthChecker::new(pool, HealthConfig::default());
        let report = checker.check_all().await;
        assert_eq!(report.total, 0);
        assert_eq!(report.alive, 0);
    }

    #[tokio::test]
    async fn test_periodic_handle_stops() {
        let pool = Arc::new(ProxyPool::new(PoolConfig::default()));
        let checker = HealthChecker::new(pool, HealthConfig::default());
        let handle = checker.spawn_periodic(Duration::from_secs(3600));
        handle.stop().await;
    }
}
