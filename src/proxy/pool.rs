//! Proxy pool with rotation strategies and outcome reporting.

use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::{parse_lines, Proxy, ProxyStatus};
use crate::{Result, ScrapeError};

/// Proxy selection strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RotationStrategy {
    /// Cycle through available proxies in registration order.
    #[default]
    RoundRobin,
    /// Uniform random choice among available proxies.
    Random,
    /// The available proxy with the fewest total requests.
    LeastUsed,
    /// The available proxy with the lowest average latency.
    LeastLatency,
    /// Random choice weighted by success rate.
    Weighted,
}

/// Pool tuning knobs.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub rotation: RotationStrategy,
    /// Successful responses slower than this mark the proxy `Slow`.
    pub slow_threshold: Duration,
    /// Cooldown applied after a network/HTTP failure.
    pub error_cooldown: Duration,
    /// Cooldown applied after a CAPTCHA wall.
    pub captcha_cooldown: Duration,
    /// Cooldown applied after a soft block.
    pub block_cooldown: Duration,
    /// Blocks before a proxy is quarantined.
    pub quarantine_threshold: u64,
    /// How long a quarantined proxy sits out before returning to `Unknown`.
    pub quarantine_duration: Duration,
    /// Failures before a proxy is marked `Dead`.
    pub max_fail_count: u64,
    /// Hand each proxy to at most one in-flight request at a time.
    pub single_flight: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            rotation: RotationStrategy::RoundRobin,
            slow_threshold: Duration::from_secs(5),
            error_cooldown: Duration::from_secs(10),
            captcha_cooldown: Duration::from_secs(120),
            block_cooldown: Duration::from_secs(300),
            quarantine_threshold: 3,
            quarantine_duration: Duration::from_secs(1800),
            max_fail_count: 10,
            single_flight: true,
        }
    }
}

/// Aggregate status counts across the pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub total: usize,
    pub alive: usize,
    pub slow: usize,
    pub dead: usize,
    pub quarantined: usize,
    pub unknown: usize,
}

struct PoolInner {
    proxies: HashMap<String, Proxy>,
    /// Registration order, drives round-robin.
    order: Vec<String>,
    cursor: usize,
}

/// Thread-safe pool owning every proxy for the life of the process.
pub struct ProxyPool {
    config: PoolConfig,
    inner: RwLock<PoolInner>,
}

impl ProxyPool {
    /// Creates an empty pool.
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(PoolInner {
                proxies: HashMap::new(),
                order: Vec::new(),
                cursor: 0,
            }),
        }
    }

    /// Registers a proxy and returns its id. An existing entry with the same
    /// id (same protocol/host/port, credentials ignored) is replaced.
    pub async fn add(&self, proxy: Proxy) -> String {
        let id = proxy.id.clone();
        let mut inner = self.inner.write().await;
        if inner.proxies.insert(id.clone(), proxy).is_none() {
            inner.order.push(id.clone());
        } else {
            debug!(id = %id, "replacing proxy with colliding id");
        }
        id
    }

    /// Parses and registers proxies from raw text, one per line.
    ///
    /// Returns the number added; per-line errors are returned alongside and
    /// never fail the batch.
    pub async fn load_from_lines(&self, input: &str) -> (usize, Vec<ScrapeError>) {
        let (proxies, errors) = parse_lines(input);
        let added = proxies.len();
        for proxy in proxies {
            self.add(proxy).await;
        }
        for err in &errors {
            warn!("proxy load: {err}");
        }
        (added, errors)
    }

    /// Loads proxies from a file.
    pub async fn load_from_file(&self, path: impl AsRef<Path>) -> Result<(usize, Vec<ScrapeError>)> {
        let contents = tokio::fs::read_to_string(path).await?;
        Ok(self.load_from_lines(&contents).await)
    }

    /// Hands out one available proxy per the configured rotation strategy.
    ///
    /// With `single_flight` (the default) the proxy is leased: it will not
    /// be handed to another caller until an outcome is reported or it is
    /// released.
    pub async fn acquire(&self) -> Result<Proxy> {
        let now = Instant::now();
        let mut inner = self.inner.write().await;

        for id in inner.order.clone() {
            if let Some(proxy) = inner.proxies.get_mut(&id) {
                proxy.refresh_quarantine(now, self.config.quarantine_duration);
            }
        }

        let candidates: Vec<String> = inner
            .order
            .iter()
            .filter(|id| {
                inner
                    .proxies
                    .get(*id)
                    .map(|p| p.is_available_at(now) && !(self.config.single_flight && p.in_flight))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();

        if candidates.is_empty() {
            return Err(ScrapeError::NoProxyAvailable);
        }

        let chosen = self.select(&mut inner, &candidates);
        let proxy = inner
            .proxies
            .get_mut(&chosen)
            .ok_or_else(|| ScrapeError::ProxyNotFound(chosen.clone()))?;
        if self.config.single_flight {
            proxy.in_flight = true;
        }
        Ok(proxy.clone())
    }

    fn select(&self, inner: &mut PoolInner, candidates: &[String]) -> String {
        match self.config.rotation {
            RotationStrategy::RoundRobin => {
                // Advance the cursor over registration order until it lands
                // on a candidate, so rotation is stable under churn.
                for _ in 0..inner.order.len() {
                    let id = inner.order[inner.cursor % inner.order.len()].clone();
                    inner.cursor = (inner.cursor + 1) % inner.order.len();
                    if candidates.contains(&id) {
                        return id;
                    }
                }
                candidates[0].clone()
            }
            RotationStrategy::Random => {
                let idx = rand::thread_rng().gen_range(0..candidates.len());
                candidates[idx].clone()
            }
            RotationStrategy::LeastUsed => candidates
                .iter()
                .min_by_key(|id| inner.proxies[*id].counters.total)
                .cloned()
                .unwrap_or_else(|| candidates[0].clone()),
            RotationStrategy::LeastLatency => candidates
                .iter()
                .min_by_key(|id| {
                    inner.proxies[*id]
                        .avg_latency()
                        .unwrap_or(Duration::MAX)
                })
                .cloned()
                .unwrap_or_else(|| candidates[0].clone()),
            RotationStrategy::Weighted => {
                // Floor keeps zero-history proxies selectable.
                let weights: Vec<f64> = candidates
                    .iter()
                    .map(|id| inner.proxies[id].success_rate() + 0.05)
                    .collect();
                let total: f64 = weights.iter().sum();
                let mut roll = rand::thread_rng().gen_range(0.0..total);
                for (id, weight) in candidates.iter().zip(&weights) {
                    if roll < *weight {
                        return id.clone();
                    }
                    roll -= weight;
                }
                candidates[candidates.len() - 1].clone()
            }
        }
    }

    /// Releases a leased proxy without recording an outcome (e.g. the
    /// request was cancelled mid-flight).
    pub async fn release(&self, id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(proxy) = inner.proxies.get_mut(id) {
            proxy.in_flight = false;
        }
    }

    /// Records a successful round-trip through the proxy.
    pub async fn report_success(&self, id: &str, latency: Duration) -> Result<()> {
        self.with_proxy(id, |proxy, config| {
            proxy.record_success(latency, config.slow_threshold);
        })
        .await
    }

    /// Records a network/HTTP failure and applies the error cooldown.
    pub async fn report_failure(&self, id: &str) -> Result<()> {
        self.with_proxy(id, |proxy, config| {
            proxy.record_failure(config.error_cooldown, config.max_fail_count);
        })
        .await
    }

    /// Records a CAPTCHA wall and applies the CAPTCHA cooldown.
    pub async fn report_captcha(&self, id: &str) -> Result<()> {
        self.with_proxy(id, |proxy, config| {
            proxy.record_captcha(config.captcha_cooldown);
        })
        .await
    }

    /// Records a soft block; enough of these quarantines the proxy.
    pub async fn report_block(&self, id: &str) -> Result<()> {
        self.with_proxy(id, |proxy, config| {
            proxy.record_block(config.block_cooldown, config.quarantine_threshold);
        })
        .await
    }

    async fn with_proxy<F>(&self, id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut Proxy, &PoolConfig),
    {
        let mut inner = self.inner.write().await;
        let proxy = inner
            .proxies
            .get_mut(id)
            .ok_or_else(|| ScrapeError::ProxyNotFound(id.to_string()))?;
        proxy.in_flight = false;
        f(proxy, &self.config);
        Ok(())
    }

    /// Manually revives a dead or quarantined proxy back to `Unknown`,
    /// clearing the failure streak so it is not immediately re-killed.
    pub async fn reset(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let proxy = inner
            .proxies
            .get_mut(id)
            .ok_or_else(|| ScrapeError::ProxyNotFound(id.to_string()))?;
        proxy.status = ProxyStatus::Unknown;
        proxy.cooldown_until = None;
        proxy.quarantined_at = None;
        proxy.counters.fail = 0;
        proxy.counters.block = 0;
        Ok(())
    }

    /// Sets a proxy's status directly (used by the health checker).
    pub async fn set_status(&self, id: &str, status: ProxyStatus) -> Result<()> {
        let mut inner = self.inner.write().await;
        let proxy = inner
            .proxies
            .get_mut(id)
            .ok_or_else(|| ScrapeError::ProxyNotFound(id.to_string()))?;
        proxy.status = status;
        Ok(())
    }

    /// Returns a snapshot of one proxy.
    pub async fn get(&self, id: &str) -> Option<Proxy> {
        self.inner.read().await.proxies.get(id).cloned()
    }

    /// Returns snapshots of every proxy in registration order.
    pub async fn all(&self) -> Vec<Proxy> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .filter_map(|id| inner.proxies.get(id).cloned())
            .collect()
    }

    /// Returns the number of registered proxies.
    pub async fn len(&self) -> usize {
        self.inner.read().await.proxies.len()
    }

    /// Returns whether the pool is empty.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.proxies.is_empty()
    }

    /// Aggregate status counts.
    pub async fn stats(&self) -> PoolStats {
        let inner = self.inner.read().await;
        let mut stats = PoolStats {
            total: inner.proxies.len(),
            ..Default::default()
        };
        for proxy in inner.proxies.values() {
            match proxy.status {
                ProxyStatus::Alive => stats.alive += 1,
                ProxyStatus::Slow => stats.slow += 1,
                ProxyStatus::Dead => stats.dead += 1,
                ProxyStatus::Quarantined => stats.quarantined += 1,
                ProxyStatus::Unknown => stats.unknown += 1,
            }
        }
        stats
    }
}

impl Default for ProxyPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}
