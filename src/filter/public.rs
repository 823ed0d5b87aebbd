//! Curated set of "public" destinations the pipeline suppresses: major
//! social, search, cloud, and media hosts that dominate raw scrape output
//! without ever being interesting.

/// Registrable domains suppressed by the anti-public stage. Matched against
/// the result host and every ancestor suffix.
pub static PUBLIC_DOMAINS: &[&str] = &[
    // social
    "facebook.com",
    "fb.com",
    "instagram.com",
    "twitter.com",
    "x.com",
    "linkedin.com",
    "pinterest.com",
    "reddit.com",
    "tiktok.com",
    "tumblr.com",
    "snapchat.com",
    "threads.net",
    "vk.com",
    // search and portals
    "google.com",
    "bing.com",
    "yahoo.com",
    "duckduckgo.com",
    "baidu.com",
    "yandex.ru",
    "yandex.com",
    "ask.com",
    // video and media
    "youtube.com",
    "youtu.be",
    "vimeo.com",
    "dailymotion.com",
    "twitch.tv",
    "spotify.com",
    "soundcloud.com",
    "netflix.com",
    // knowledge and publishing
    "wikipedia.org",
    "wikimedia.org",
    "fandom.com",
    "medium.com",
    "blogspot.com",
    "wordpress.com",
    "quora.com",
    "stackoverflow.com",
    "stackexchange.com",
    "github.com",
    "gitlab.com",
    // commerce and big tech
    "amazon.com",
    "ebay.com",
    "aliexpress.com",
    "apple.com",
    "microsoft.com",
    "adobe.com",
    "cloudflare.com",
    "archive.org",
    "paypal.com",
];

/// Whether a registrable domain (or suffix) is in the public set.
pub fn is_public_domain(domain: &str) -> bool {
    PUBLIC_DOMAINS.contains(&domain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_public_domains() {
        assert!(is_public_domain("facebook.com"));
        assert!(is_public_domain("wikipedia.org"));
        assert!(!is_public_domain("example.com"));
    }

    #[test]
    fn test_set_is_registrable_level() {
        // Every entry should already be a bare registrable domain; the
        // suffix walk handles subdomains.
        for domain in PUBLIC_DOMAINS {
            assert!(!domain.starts_with("www."), "{domain}");
            assert!(!domain.starts_with("http"), "{domain}");
        }
    }
}
