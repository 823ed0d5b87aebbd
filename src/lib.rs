//! # harrow
//!
//! A high-throughput search-query ("dork") scraping engine. Harrow fans a
//! workload of search expressions across a pool of untrusted proxies,
//! issues rate-limited requests to a public search engine, classifies
//! adversarial responses (CAPTCHA walls, soft blocks, rate limits),
//! retries on fresh proxies, and streams extracted result URLs through a
//! deduplicating filter pipeline.
//!
//! The crate is built from five cooperating subsystems:
//!
//! - [`proxy`]: parsing, rotation, and per-proxy health with cooldowns
//!   and quarantine
//! - [`stealth`]: browser fingerprints and human-shaped request pacing
//! - [`backend`] / [`backends`]: request construction, transport, and
//!   response classification
//! - [`engine`]: the bounded-channel worker pool with retry discipline
//! - [`filter`]: redirect unwrapping and bloom-backed deduplication
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use harrow::{Engine, EngineConfig, Task};
//! use harrow::backends::Google;
//! use harrow::proxy::{PoolConfig, ProxyPool};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pool = Arc::new(ProxyPool::new(PoolConfig::default()));
//!     pool.load_from_file("proxies.txt").await?;
//!
//!     let engine = Engine::new(EngineConfig::default(), pool, Arc::new(Google::new()));
//!     engine.start().await;
//!     let mut results = engine.take_results().expect("results stream");
//!
//!     engine.submit(Task::new("t1", "inurl:admin filetype:php")).await?;
//!     while let Some(result) = results.recv().await {
//!         for url in &result.urls {
//!             println!("{url}");
//!         }
//!     }
//!     Ok(())
//! }
//! ```

mod backend;
mod engine;
mod error;

pub mod backends;
pub mod filter;
pub mod protocol;
pub mod proxy;
pub mod stealth;

pub use backend::{Classification, SearchBackend, SearchOutcome};
pub use engine::{Engine, EngineConfig, Stats, Task, TaskResult};
pub use error::{Result, ScrapeError};
pub use filter::{FilterConfig, FilterPipeline, FilterStats};
