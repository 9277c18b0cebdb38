//! Target platform classification for the popup.

use serde::Serialize;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetPlatform {
    Twitch,
    Youtube,
    Meta,
    Tiktok,
    Other,
}

impl TargetPlatform {
    const DOMAINS: [(&'static str, TargetPlatform); 5] = [
        ("twitch.tv", TargetPlatform::Twitch),
        ("youtube.com", TargetPlatform::Youtube),
        ("facebook.com", TargetPlatform::Meta),
        ("meta.com", TargetPlatform::Meta),
        ("tiktok.com", TargetPlatform::Tiktok),
    ];

    /// Classify by host. Subdomains count; unparseable URLs are `Other`.
    pub fn from_url(raw: &str) -> Self {
        let Some(host) = Url::parse(raw).ok().and_then(|u| u.host_str().map(str::to_ascii_lowercase)) else {
            return TargetPlatform::Other;
        };
        Self::DOMAINS
            .iter()
            .find(|(domain, _)| host == *domain || host.ends_with(&format!(".{}", domain)))
            .map(|(_, platform)| *platform)
            .unwrap_or(TargetPlatform::Other)
    }

    pub fn name(&self) -> &'static str {
        match self {
            TargetPlatform::Twitch => "Twitch",
            TargetPlatform::Youtube => "YouTube",
            TargetPlatform::Meta => "Meta/Facebook",
            TargetPlatform::Tiktok => "TikTok",
            TargetPlatform::Other => "Other Site",
        }
    }

    pub fn warning(&self) -> Option<&'static str> {
        match self {
            TargetPlatform::Youtube => Some("YouTube uses timing analysis. Avoid skipping ads."),
            TargetPlatform::Meta => Some("Meta uses server-side tracking. VPN is essential!"),
            TargetPlatform::Tiktok => Some("TikTok uses VM obfuscation. Protection is limited."),
            TargetPlatform::Twitch | TargetPlatform::Other => None,
        }
    }
}

/// Popup view of a classified tab.
#[derive(Debug, Clone, Serialize)]
pub struct PlatformInfo {
    pub platform: TargetPlatform,
    pub name: &'static str,
    pub warning: Option<&'static str>,
}

impl From<TargetPlatform> for PlatformInfo {
    fn from(platform: TargetPlatform) -> Self {
        Self {
            platform,
            name: platform.name(),
            warning: platform.warning(),
        }
    }
}
