//! Link extraction from chat messages.

use std::sync::OnceLock;

use regex::Regex;
use url::Url;

/// Hosts whose links can be translated to SoundCloud.
pub const SUPPORTED_FOREIGN_HOSTS: [&str; 6] = [
    "spotify.com",
    "music.apple.com",
    "deezer.com",
    "tidal.com",
    "youtube.com",
    "youtu.be",
];

fn soundcloud_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(https?://(?:[\w-]+\.)?soundcloud\.com/[\w\-./?=&%+#]+)").unwrap()
    })
}

fn any_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)https?://\S+").unwrap())
}

fn trim_trailing(url: &str) -> &str {
    url.trim_end_matches(|c: char| matches!(c, ']' | ')' | '>' | ',') || c.is_whitespace())
}

/// The first SoundCloud URL in `text`.
pub fn extract_soundcloud_url(text: &str) -> Option<String> {
    let found = soundcloud_regex().captures(text)?.get(1)?.as_str();
    Some(trim_trailing(found).to_string()).filter(|u| !u.is_empty())
}

/// Whether `text` contains a SoundCloud URL.
pub fn contains_soundcloud_url(text: &str) -> bool {
    soundcloud_regex().is_match(text)
}

/// The first http(s) URL in `text`.
pub fn extract_first_url(text: &str) -> Option<String> {
    let found = any_url_regex().find(text)?.as_str();
    Some(trim_trailing(found).to_string()).filter(|u| !u.is_empty())
}

/// A SoundCloud set (playlist or album) rather than a single track.
pub fn is_soundcloud_playlist(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
    host.contains("soundcloud.com") && parsed.path().to_ascii_lowercase().contains("/sets/")
}

/// Whether the link resolver understands `url`.
pub fn is_supported_foreign_link(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
    SUPPORTED_FOREIGN_HOSTS
        .iter()
        .any(|supported| host.contains(supported))
}
