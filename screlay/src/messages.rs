//! Text shown to chat users.

use serde::{Deserialize, Serialize};

/// Fixed notices sent to requesters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Notice {
    StartIntro,
    UserIdMissing,
    AlreadyAuthorized,
    ConversionInProgress,
    ConversionNotFound,
    PremiumRateLimited,
    InvalidLink,
    DownloadPrep,
    FileTooLarge,
    PromptPassword,
    PasswordAccepted,
    PasswordRejected,
    AuthLimitReached,
    NotAdmin,
    BroadcastUsage,
    BroadcastNoUsers,
    GenericError,
    QueueFull,
    PlaylistNoEntries,
    PlaylistDone,
    PlaylistStopped,
    PlaylistAborted,
    OpusOnly,
    MissingAudio,
    SessionExpired,
    NotYourPlaylist,
    Continuing,
    Stopped,
}

impl Notice {
    pub fn text(self) -> String {
        let text = match self {
            Self::StartIntro => "Hi! Send me a SoundCloud link and I'll send the track back.",
            Self::UserIdMissing => "Unable to verify user id.",
            Self::AlreadyAuthorized => "You are already authorized, just send a SoundCloud link!",
            Self::ConversionInProgress => "Looking for that link on SoundCloud, hang on...",
            Self::ConversionNotFound => "I couldn't find this track on SoundCloud.",
            Self::PremiumRateLimited => {
                "SoundCloud is rate limiting premium requests right now (30-60 min cooldown). \
                 Continuing without credentials: quality is capped around 192 kbps AAC for now."
            }
            Self::InvalidLink => "Please send a valid SoundCloud link.",
            Self::DownloadPrep => "On it...",
            Self::FileTooLarge => "This track is too large to upload here.",
            Self::PromptPassword => "Password please.",
            Self::PasswordAccepted => "Password accepted, welcome!",
            Self::PasswordRejected => "Wrong password.",
            Self::AuthLimitReached => "Sorry, there is no room for new users right now.",
            Self::NotAdmin => "You are not an admin.",
            Self::BroadcastUsage => "usage: /broadcast your message here",
            Self::BroadcastNoUsers => "There are no authorized users to broadcast to.",
            Self::GenericError => "Couldn't fetch that one, check your link.",
            Self::QueueFull => "Too many requests right now, try again in a minute.",
            Self::PlaylistNoEntries => "No tracks found in that playlist (is it private?).",
            Self::PlaylistDone => "Playlist finished.",
            Self::PlaylistStopped => "OK, playlist stopped.",
            Self::PlaylistAborted => "The queue is full, playlist cancelled. Try again later.",
            Self::OpusOnly => "This track is only available as Opus, try another version.",
            Self::MissingAudio => {
                "SoundCloud did not provide an audio file for that link. Please try another track."
            }
            Self::SessionExpired => "Session expired",
            Self::NotYourPlaylist => "This is not your playlist ;)",
            Self::Continuing => "Continuing",
            Self::Stopped => "Stopped",
        };
        text.to_string()
    }
}

pub fn download_count(count: u64) -> String {
    let plural = if count == 1 { "" } else { "s" };
    format!("I've already downloaded {count} track{plural}.")
}

pub fn user_id_response(id: i64) -> String {
    format!("Your user id: {id}")
}

pub fn broadcast_result(sent: usize, failed: usize) -> String {
    let plural = if sent == 1 { "" } else { "s" };
    let fail_line = if failed > 0 {
        format!(", {failed} failed")
    } else {
        String::new()
    };
    format!("Sent to {sent} user{plural}{fail_line}")
}

pub fn operator_error_notice(text: &str) -> String {
    format!("\u{26a0}\u{fe0f} screlay error:\n{text}")
}

pub fn caption_default() -> String {
    "Enjoy!".to_string()
}

pub fn quality_line(text: &str) -> String {
    format!("Approx. quality: {text}")
}

pub fn bitrate_drop_warning(track: &str, measured: u32, source: u32) -> String {
    format!(
        "\u{26a0}\u{fe0f} {track}: estimated bitrate {measured} kbps (source {source} kbps?). \
         The uploader probably uploaded a degraded file."
    )
}

pub fn low_bitrate_warning(track: &str, measured: u32, min: u32) -> String {
    format!("\u{26a0}\u{fe0f} {track}: estimated bitrate {measured} kbps (<{min} kbps recommended).")
}

pub fn playlist_detected(count: usize, chunk_size: usize, cap: usize) -> String {
    format!(
        "Playlist spotted ({count} tracks, limit {cap}). I'll send the first {chunk_size}, \
         then you'll need to confirm the rest."
    )
}

pub fn playlist_chunk_prompt(delivered: usize, total: usize, chunk_size: usize) -> String {
    let remaining = total.saturating_sub(delivered);
    let next = chunk_size.min(remaining);
    format!("Sent {delivered}/{total} tracks. Continue with {next} more?")
}
