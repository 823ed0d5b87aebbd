//! Traffic shaping: browser fingerprints and request pacing.
//!
//! Two independent controls live here. [`FingerprintSet`] supplies a
//! coherent header profile per request, rotating identities or pinning one
//! per proxy. [`TimingController`] spaces requests out with Gaussian delays,
//! burst pauses, and per-proxy session cooldowns so the traffic shape
//! resembles organic browsing.

mod fingerprint;
mod timing;

pub use fingerprint::{BrowserFamily, Fingerprint, FingerprintSet};
pub use timing::{Session, TimingConfig, TimingController, TimingProfile};
