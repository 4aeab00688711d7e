// Platform classification by URL host

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Platform a URL belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlatformTag {
    Youtube,
    Tiktok,
    Facebook,
    Instagram,
    #[default]
    Unknown,
}

impl PlatformTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Youtube => "youtube",
            Self::Tiktok => "tiktok",
            Self::Facebook => "facebook",
            Self::Instagram => "instagram",
            Self::Unknown => "unknown",
        }
    }

    /// Every concrete platform, in table order
    pub fn all() -> [PlatformTag; 4] {
        [Self::Youtube, Self::Tiktok, Self::Facebook, Self::Instagram]
    }
}

impl fmt::Display for PlatformTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformTag {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "youtube" => Ok(Self::Youtube),
            "tiktok" => Ok(Self::Tiktok),
            "facebook" => Ok(Self::Facebook),
            "instagram" => Ok(Self::Instagram),
            "unknown" => Ok(Self::Unknown),
            _ => Err(()),
        }
    }
}

/// Platform → domain suffixes. Order matters: first match wins.
pub const PLATFORM_DOMAINS: &[(PlatformTag, &[&str])] = &[
    (PlatformTag::Youtube, &["youtube.com", "youtu.be"]),
    (PlatformTag::Tiktok, &["tiktok.com", "vt.tiktok.com", "vm.tiktok.com"]),
    (PlatformTag::Facebook, &["facebook.com", "fb.watch"]),
    (PlatformTag::Instagram, &["instagram.com"]),
];

/// Classify a URL. Pure function of its input.
pub fn resolve(url: &str) -> PlatformTag {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return PlatformTag::Unknown;
    }

    let parsed = match url::Url::parse(trimmed) {
        Ok(u) => u,
        Err(_) => return PlatformTag::Unknown,
    };

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return PlatformTag::Unknown;
    }

    let host = match parsed.host_str() {
        Some(h) => h.to_ascii_lowercase(),
        None => return PlatformTag::Unknown,
    };

    for (tag, domains) in PLATFORM_DOMAINS {
        if domains.iter().any(|d| host_matches(&host, d)) {
            return *tag;
        }
    }

    PlatformTag::Unknown
}

fn host_matches(host: &str, pattern: &str) -> bool {
    host == pattern || host.ends_with(&format!(".{}", pattern))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiktok_short_link() {
        assert_eq!(resolve("https://vt.tiktok.com/abc"), PlatformTag::Tiktok);
        assert_eq!(resolve("https://vm.tiktok.com/xyz/"), PlatformTag::Tiktok);
    }

    #[test]
    fn test_unknown_host() {
        assert_eq!(resolve("https://example.com/video"), PlatformTag::Unknown);
    }

    #[test]
    fn test_subdomains_and_case() {
        assert_eq!(resolve("https://WWW.YouTube.com/watch?v=1"), PlatformTag::Youtube);
        assert_eq!(resolve("https://m.facebook.com/watch/?v=1"), PlatformTag::Facebook);
        assert_eq!(resolve("https://youtu.be/dQw4w9WgXcQ"), PlatformTag::Youtube);
        assert_eq!(resolve("https://www.instagram.com/reel/abc/"), PlatformTag::Instagram);
        assert_eq!(resolve("https://fb.watch/xyz"), PlatformTag::Facebook);
    }

    #[test]
    fn test_suffix_must_be_on_label_boundary() {
        assert_eq!(resolve("https://notyoutube.com/watch"), PlatformTag::Unknown);
        assert_eq!(resolve("https://youtube.com.evil.net/watch"), PlatformTag::Unknown);
    }

    #[test]
    fn test_malformed_input() {
        assert_eq!(resolve(""), PlatformTag::Unknown);
        assert_eq!(resolve("   "), PlatformTag::Unknown);
        assert_eq!(resolve("youtube.com/watch?v=1"), PlatformTag::Unknown);
        assert_eq!(resolve("ftp://youtube.com/x"), PlatformTag::Unknown);
        assert_eq!(resolve("http://"), PlatformTag::Unknown);
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let urls = [
            "https://www.tiktok.com/@u/video/1",
            "https://example.org",
            "https://instagram.com/p/x",
        ];
        for url in urls {
            let first = resolve(url);
            for _ in 0..10 {
                assert_eq!(resolve(url), first);
            }
        }
    }

    #[test]
    fn test_tag_round_trip_through_str() {
        for tag in PlatformTag::all() {
            assert_eq!(tag.as_str().parse::<PlatformTag>(), Ok(tag));
        }
    }
}
