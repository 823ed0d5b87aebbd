//! Request pacing with per-proxy sessions.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::Rng;
use rand_distr::{Distribution, Normal};

/// Named pacing presets, fastest to safest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimingProfile {
    Aggressive,
    #[default]
    Normal,
    Cautious,
    Stealth,
}

/// Pacing knobs; construct via [`TimingConfig::profile`] or literal.
#[derive(Debug, Clone)]
pub struct TimingConfig {
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Requests before a longer pause.
    pub burst_size: u32,
    /// Pause inserted after a burst.
    pub burst_pause: Duration,
    /// Requests before the session cools down and resets.
    pub session_max_requests: u32,
    pub session_cooldown: Duration,
    /// Random jitter as a fraction of the delay, `0.0..=1.0`.
    pub jitter_pct: f64,
    /// Delay multiplier reached as the session fills up.
    pub slowdown_factor: f64,
    pub captcha_cooldown: Duration,
    pub error_cooldown: Duration,
    pub block_cooldown: Duration,
}

impl TimingConfig {
    /// Returns the preset for a named profile.
    pub fn profile(profile: TimingProfile) -> Self {
        match profile {
            TimingProfile::Aggressive => Self {
                min_delay: Duration::from_millis(500),
                max_delay: Duration::from_millis(1500),
                burst_size: 20,
                burst_pause: Duration::from_secs(3),
                session_max_requests: 200,
                session_cooldown: Duration::from_secs(30),
                jitter_pct: 0.2,
                slowdown_factor: 1.1,
                captcha_cooldown: Duration::from_secs(60),
                error_cooldown: Duration::from_secs(5),
                block_cooldown: Duration::from_secs(120),
            },
            TimingProfile::Normal => Self {
                min_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(3),
                burst_size: 10,
                burst_pause: Duration::from_secs(5),
                session_max_requests: 100,
                session_cooldown: Duration::from_secs(60),
                jitter_pct: 0.3,
                slowdown_factor: 1.2,
                captcha_cooldown: Duration::from_secs(120),
                error_cooldown: Duration::from_secs(10),
                block_cooldown: Duration::from_secs(300),
            },
            TimingProfile::Cautious => Self {
                min_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(5),
                burst_size: 5,
                burst_pause: Duration::from_secs(10),
                session_max_requests: 50,
                session_cooldown: Duration::from_secs(120),
                jitter_pct: 0.4,
                slowdown_factor: 1.3,
                captcha_cooldown: Duration::from_secs(300),
                error_cooldown: Duration::from_secs(30),
                block_cooldown: Duration::from_secs(600),
            },
            TimingProfile::Stealth => Self {
                min_delay: Duration::from_secs(3),
                max_delay: Duration::from_secs(8),
                burst_size: 3,
                burst_pause: Duration::from_secs(15),
                session_max_requests: 30,
                session_cooldown: Duration::from_secs(180),
                jitter_pct: 0.5,
                slowdown_factor: 1.5,
                captcha_cooldown: Duration::from_secs(600),
                error_cooldown: Duration::from_secs(60),
                block_cooldown: Duration::from_secs(900),
            },
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self::profile(TimingProfile::Normal)
    }
}

/// Per-proxy pacing state.
///
/// Independent of the pool's cooldown: this one reflects local pacing
/// policy, the pool's reflects upstream adversary signals. The effective
/// wait is the max of the two.
#[derive(Debug, Clone)]
pub struct Session {
    pub request_count: u32,
    pub burst_count: u32,
    pub session_start: Instant,
    pub last_request: Option<Instant>,
    pub cooldown_until: Option<Instant>,
}

impl Session {
    fn new() -> Self {
        Self {
            request_count: 0,
            burst_count: 0,
            session_start: Instant::now(),
            last_request: None,
            cooldown_until: None,
        }
    }
}

/// Computes pre-request delays and tracks per-proxy sessions.
pub struct TimingController {
    config: TimingConfig,
    sessions: Mutex<HashMap<String, Session>>,
}

impl TimingController {
    /// Creates a controller with the given pacing config.
    pub fn new(config: TimingConfig) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a controller from a named profile.
    pub fn with_profile(profile: TimingProfile) -> Self {
        Self::new(TimingConfig::profile(profile))
    }

    pub fn config(&self) -> &TimingConfig {
        &self.config
    }

    /// Returns the delay to wait before the next request through `proxy_id`.
    ///
    /// Gaussian base delay, scaled by session progress, plus burst and
    /// session pauses, with jitter on top. If the session is cooling down,
    /// the remaining cooldown is returned instead.
    pub fn delay_for(&self, proxy_id: &str) -> Duration {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().expect("session map poisoned");
        let session = sessions
            .entry(proxy_id.to_string())
            .or_insert_with(Session::new);

        if let Some(until) = session.cooldown_until {
            if now < until {
                return until - now;
            }
            session.cooldown_until = None;
        }

        let mut delay = self.gaussian_delay().as_secs_f64();

        let progress = session.request_count as f64 / self.config.session_max_requests.max(1) as f64;
        delay *= 1.0 + progress * (self.config.slowdown_factor - 1.0);

        if session.burst_count >= self.config.burst_size {
            delay += self.config.burst_pause.as_secs_f64();
            session.burst_count = 0;
        }

        if session.request_count >= self.config.session_max_requests {
            delay += self.config.session_cooldown.as_secs_f64();
            session.request_count = 0;
            session.session_start = now;
        }

        let jitter = rand::thread_rng().gen_range(-1.0..=1.0) * self.config.jitter_pct;
        delay *= 1.0 + jitter;

        Duration::from_secs_f64(delay.max(0.0))
    }

    /// Records a completed request against the proxy's session.
    pub fn record_request(&self, proxy_id: &str) {
        let mut sessions = self.sessions.lock().expect("session map poisoned");
        let session = sessions
            .entry(proxy_id.to_string())
            .or_insert_with(Session::new);
        session.request_count += 1;
        session.burst_count += 1;
        session.last_request = Some(Instant::now());
    }

    /// Applies the CAPTCHA cooldown to the proxy's session.
    pub fn record_captcha(&self, proxy_id: &str) {
        self.cool_down(proxy_id, self.config.captcha_cooldown, true);
    }

    /// Applies the error cooldown to the proxy's session.
    pub fn record_error(&self, proxy_id: &str) {
        self.cool_down(proxy_id, self.config.error_cooldown, false);
    }

    /// Applies the block cooldown and resets the session counters.
    pub fn record_block(&self, proxy_id: &str) {
        let mut sessions = self.sessions.lock().expect("session map poisoned");
        let session = sessions
            .entry(proxy_id.to_string())
            .or_insert_with(Session::new);
        session.cooldown_until = Some(Instant::now() + self.config.block_cooldown);
        session.request_count = 0;
        session.burst_count = 0;
    }

    fn cool_down(&self, proxy_id: &str, cooldown: Duration, reset_burst: bool) {
        let mut sessions = self.sessions.lock().expect("session map poisoned");
        let session = sessions
            .entry(proxy_id.to_string())
            .or_insert_with(Session::new);
        session.cooldown_until = Some(Instant::now() + cooldown);
        if reset_burst {
            session.burst_count = 0;
        }
    }

    /// Remaining session cooldown for a proxy, zero if none.
    pub fn cooldown_remaining(&self, proxy_id: &str) -> Duration {
        let sessions = self.sessions.lock().expect("session map poisoned");
        sessions
            .get(proxy_id)
            .and_then(|s| s.cooldown_until)
            .map(|until| until.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::ZERO)
    }

    /// Snapshot of one proxy's session, if it exists.
    pub fn session(&self, proxy_id: &str) -> Option<Session> {
        self.sessions
            .lock()
            .expect("session map poisoned")
            .get(proxy_id)
            .cloned()
    }

    /// Discards a proxy's session state.
    pub fn reset_session(&self, proxy_id: &str) {
        self.sessions
            .lock()
            .expect("session map poisoned")
            .remove(proxy_id);
    }

    /// Gaussian base delay: mean `(min+max)/2`, stddev `(max-min)/4`,
    /// clamped to `[min, max]`. More human than uniform random.
    fn gaussian_delay(&self) -> Duration {
        let min = self.config.min_delay.as_secs_f64();
        let max = self.config.max_delay.as_secs_f64();
        if max <= min {
            return self.config.min_delay;
        }
        let mean = (min + max) / 2.0;
        let std_dev = (max - min) / 4.0;

        let sample = match Normal::new(mean, std_dev) {
            Ok(normal) => normal.sample(&mut rand::thread_rng()),
            Err(_) => mean,
        };
        Duration::from_secs_f64(sample.clamp(min, max))
    }
}

impl Default for TimingController {
    fn default() -> Self {
        Self::new(TimingConfig::default())
    }
}
