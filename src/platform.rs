use serde::{Deserialize, Serialize};
use std::fmt;

/// Source platform of a video URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Youtube,
    Tiktok,
    Instagram,
    Facebook,
    Twitter,
    Unknown,
}

impl Platform {
    pub fn detect(url: &str) -> Self {
        let url = url.to_lowercase();
        let host = host_of(&url);

        let matches = |domain: &str| host == domain || host.ends_with(&format!(".{}", domain));
        if matches("youtube.com") || matches("youtu.be") {
            Self::Youtube
        } else if matches("tiktok.com") {
            Self::Tiktok
        } else if matches("instagram.com") {
            Self::Instagram
        } else if matches("facebook.com") || matches("fb.watch") {
            Self::Facebook
        } else if matches("twitter.com") || matches("x.com") {
            Self::Twitter
        } else {
            Self::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Youtube => "youtube",
            Self::Tiktok => "tiktok",
            Self::Instagram => "instagram",
            Self::Facebook => "facebook",
            Self::Twitter => "twitter",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn host_of(url: &str) -> &str {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    let host = authority.rsplit('@').next().unwrap_or(authority);
    host.split(':').next().unwrap_or(host)
}
