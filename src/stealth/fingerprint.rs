//! Browser fingerprint profiles and rotation.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

/// Browser family a fingerprint imitates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserFamily {
    Chrome,
    Firefox,
    Safari,
    Edge,
}

impl BrowserFamily {
    /// Chromium-family browsers emit client-hint and fetch-metadata headers.
    pub fn is_chromium(&self) -> bool {
        matches!(self, BrowserFamily::Chrome | BrowserFamily::Edge)
    }
}

/// An immutable, coherent header profile for one browser/OS pair.
#[derive(Debug, Clone)]
pub struct Fingerprint {
    pub id: &'static str,
    pub family: BrowserFamily,
    pub user_agent: &'static str,
    pub accept: &'static str,
    pub accept_language: &'static str,
    pub accept_encoding: &'static str,
    /// `Sec-CH-UA` value; empty for non-Chromium families.
    pub sec_ch_ua: &'static str,
    pub sec_ch_ua_platform: &'static str,
}

impl Fingerprint {
    /// Builds the full header map for one request.
    ///
    /// Always present: `User-Agent`, `Accept`, `Accept-Language`,
    /// `Accept-Encoding`, `Connection`. Chromium profiles add `Sec-CH-UA*`
    /// and `Sec-Fetch-*`.
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        insert(&mut headers, "User-Agent", self.user_agent);
        insert(&mut headers, "Accept", self.accept);
        insert(&mut headers, "Accept-Language", self.accept_language);
        insert(&mut headers, "Accept-Encoding", self.accept_encoding);
        insert(&mut headers, "Connection", "keep-alive");
        insert(&mut headers, "Upgrade-Insecure-Requests", "1");

        if self.family.is_chromium() {
            insert(&mut headers, "Sec-CH-UA", self.sec_ch_ua);
            insert(&mut headers, "Sec-CH-UA-Mobile", "?0");
            insert(&mut headers, "Sec-CH-UA-Platform", self.sec_ch_ua_platform);
            insert(&mut headers, "Sec-Fetch-Dest", "document");
            insert(&mut headers, "Sec-Fetch-Mode", "navigate");
            insert(&mut headers, "Sec-Fetch-Site", "none");
            insert(&mut headers, "Sec-Fetch-User", "?1");
        }

        headers
    }
}

fn insert(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let (Ok(name), Ok(value)) = (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
    ) {
        headers.insert(name, value);
    }
}

const CHROME_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7";
const FIREFOX_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";
const SAFARI_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

static PROFILES: &[Fingerprint] = &[
    Fingerprint {
        id: "chrome_win",
        family: BrowserFamily::Chrome,
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        accept: CHROME_ACCEPT,
        accept_language: "en-US,en;q=0.9",
        accept_encoding: "gzip, deflate, br",
        sec_ch_ua: r#""Not_A Brand";v="8", "Chromium";v="120", "Google Chrome";v="120""#,
        sec_ch_ua_platform: r#""Windows""#,
    },
    Fingerprint {
        id: "chrome_mac",
        family: BrowserFamily::Chrome,
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        accept: CHROME_ACCEPT,
        accept_language: "en-US,en;q=0.9",
        accept_encoding: "gzip, deflate, br",
        sec_ch_ua: r#""Not_A Brand";v="8", "Chromium";v="120", "Google Chrome";v="120""#,
        sec_ch_ua_platform: r#""macOS""#,
    },
    Fingerprint {
        id: "chrome_linux",
        family: BrowserFamily::Chrome,
        user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        accept: CHROME_ACCEPT,
        accept_language: "en-US,en;q=0.9",
        accept_encoding: "gzip, deflate, br",
        sec_ch_ua: r#""Not_A Brand";v="8", "Chromium";v="120", "Google Chrome";v="120""#,
        sec_ch_ua_platform: r#""Linux""#,
    },
    Fingerprint {
        id: "edge_win",
        family: BrowserFamily::Edge,
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
        accept: CHROME_ACCEPT,
        accept_language: "en-US,en;q=0.9",
        accept_encoding: "gzip, deflate, br",
        sec_ch_ua: r#""Not_A Brand";v="8", "Chromium";v="120", "Microsoft Edge";v="120""#,
        sec_ch_ua_platform: r#""Windows""#,
    },
    Fingerprint {
        id: "firefox_win",
        family: BrowserFamily::Firefox,
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
        accept: FIREFOX_ACCEPT,
        accept_language: "en-US,en;q=0.5",
        accept_encoding: "gzip, deflate, br",
        sec_ch_ua: "",
        sec_ch_ua_platform: "",
    },
    Fingerprint {
        id: "firefox_mac",
        family: BrowserFamily::Firefox,
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 14.2; rv:121.0) Gecko/20100101 Firefox/121.0",
        accept: FIREFOX_ACCEPT,
        accept_language: "en-US,en;q=0.5",
        accept_encoding: "gzip, deflate, br",
        sec_ch_ua: "",
        sec_ch_ua_platform: "",
    },
    Fingerprint {
        id: "safari_mac",
        family: BrowserFamily::Safari,
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_2) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
        accept: SAFARI_ACCEPT,
        accept_language: "en-US,en;q=0.9",
        accept_encoding: "gzip, deflate, br",
        sec_ch_ua: "",
        sec_ch_ua_platform: "",
    },
];

struct RotationState {
    current: usize,
    requests_since_rotation: u32,
}

/// Holds the fingerprint list and the rotation policy.
///
/// With `pin_per_proxy` enabled, each proxy id maps deterministically onto
/// one profile, so a proxy presents a stable identity across its lifetime.
pub struct FingerprintSet {
    profiles: Vec<Fingerprint>,
    rotate_every: u32,
    pin_per_proxy: bool,
    state: Mutex<RotationState>,
}

impl FingerprintSet {
    /// Creates a set with the built-in profiles, rotating every 100 requests.
    pub fn new() -> Self {
        Self {
            profiles: PROFILES.to_vec(),
            rotate_every: 100,
            pin_per_proxy: false,
            state: Mutex::new(RotationState {
                current: 0,
                requests_since_rotation: 0,
            }),
        }
    }

    /// Sets how many requests each fingerprint serves before rotating.
    pub fn with_rotate_every(mut self, requests: u32) -> Self {
        self.rotate_every = requests.max(1);
        self
    }

    /// Pins fingerprint choice per proxy id instead of rotating globally.
    pub fn with_proxy_pinning(mut self, pin: bool) -> Self {
        self.pin_per_proxy = pin;
        self
    }

    /// Adds a custom fingerprint to the set.
    pub fn add(&mut self, fingerprint: Fingerprint) {
        self.profiles.push(fingerprint);
    }

    /// Returns the number of profiles.
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Returns whether the set has no profiles.
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Returns the fingerprint to use for the given proxy, advancing the
    /// rotation counter.
    pub fn fingerprint_for(&self, proxy_id: &str) -> Fingerprint {
        if self.pin_per_proxy {
            return self.pinned(proxy_id);
        }

        let mut state = self.state.lock().expect("fingerprint state poisoned");
        state.requests_since_rotation += 1;
        if state.requests_since_rotation >= self.rotate_every {
            state.requests_since_rotation = 0;
            state.current = rand::thread_rng().gen_range(0..self.profiles.len());
        }
        self.profiles[state.current].clone()
    }

    /// Returns headers for one request through the given proxy.
    pub fn headers_for(&self, proxy_id: &str) -> HeaderMap {
        self.fingerprint_for(proxy_id).headers()
    }

    /// Forces rotation to a new random fingerprint.
    pub fn rotate(&self) {
        let mut state = self.state.lock().expect("fingerprint state poisoned");
        state.requests_since_rotation = 0;
        state.current = rand::thread_rng().gen_range(0..self.profiles.len());
    }

    /// Deterministic profile choice for a proxy: a seeded RNG keyed by the
    /// proxy id always lands on the same profile.
    fn pinned(&self, proxy_id: &str) -> Fingerprint {
        let mut hasher = DefaultHasher::new();
        proxy_id.hash(&mut hasher);
        let mut rng = StdRng::seed_from_u64(hasher.finish());
        let idx = rng.gen_range(0..self.profiles.len());
        self.profiles[idx].clone()
    }
}

impl Default for FingerprintSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles_have_required_headers() {
        let set = FingerprintSet::new();
        for profile in &set.profiles {
            let headers = profile.headers();
            for key in [
                "User-Agent",
                "Accept",
                "Accept-Language",
                "Accept-Encoding",
                "Connection",
            ] {
                assert!(headers.contains_key(key), "{} missing {key}", profile.id);
            }
        }
    }

    #[test]
    fn test_chromium_profiles_emit_client_hints() {
        let set = FingerprintSet::new();
        for profile in &set.profiles {
            let headers = profile.headers();
            if profile.family.is_chromium() {
                assert!(headers.contains_key("Sec-CH-UA"), "{}", profile.id);
                assert!(headers.contains_key("Sec-Fetch-Mode"), "{}", profile.id);
            } else {
                assert!(!headers.contains_key("Sec-CH-UA"), "{}", profile.id);
                assert!(!headers.contains_key("Sec-Fetch-Mode"), "{}", profile.id);
            }
        }
    }

    #[test]
    fn test_rotation_after_n_requests() {
        let set = FingerprintSet::new().with_rotate_every(5);
        let first = set.fingerprint_for("p1").id;
        // Within the window the identity is stable.
        for _ in 0..3 {
            assert_eq!(set.fingerprint_for("p1").id, first);
        }
        // After enough requests the counter resets; the chosen profile may
        // coincide with the previous one, so only check the counter rolled.
        for _ in 0..10 {
            set.fingerprint_for("p1");
        }
        let state = set.state.lock().unwrap();
        assert!(state.requests_since_rotation < 5);
    }

    #[test]
    fn test_pinned_fingerprint_is_stable() {
        let set = FingerprintSet::new().with_proxy_pinning(true);
        let a1 = set.fingerprint_for("http_10.0.0.1_8080").id;
        let a2 = set.fingerprint_for("http_10.0.0.1_8080").id;
        assert_eq!(a1, a2);
    }

    #[test]
    fn test_pinned_varies_across_proxies() {
        let set = FingerprintSet::new().with_proxy_pinning(true);
        let ids: std::collections::HashSet<&str> = (0..32)
            .map(|i| set.fingerprint_for(&format!("http_10.0.0.{i}_8080")).id)
            .collect();
        assert!(ids.len() > 1, "pinning collapsed onto one profile");
    }

    #[test]
    fn test_explicit_rotate_resets_counter() {
        let set = FingerprintSet::new().with_rotate_every(100);
        set.fingerprint_for("p1");
        set.rotate();
        let state = set.state.lock().unwrap();
        assert_eq!(state.requests_since_rotation, 0);
    }

    #[test]
    fn test_add_custom_profile() {
        let mut set = FingerprintSet::new();
        let before = set.len();
        set.add(Fingerprint {
            id: "custom",
            family: BrowserFamily::Firefox,
            user_agent: "Custom/1.0",
            accept: "*/*",
            accept_language: "en",
            accept_encoding: "gzip",
            sec_ch_ua: "",
            sec_ch_ua_platform: "",
        });
        assert_eq!(set.len(), before + 1);
    }
}
