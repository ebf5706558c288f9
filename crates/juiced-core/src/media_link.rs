//! Media link classification.
//!
//! The server identifies queued media by a short type code and an id
//! (`yt` + video id, `fi` + file URL, ...). [`MediaLink::from_url`] turns a
//! user-supplied URL into that pair and [`MediaLink::url`] turns it back.
//!
//! ```
//! use juiced_core::MediaLink;
//!
//! let link = MediaLink::from_url("https://youtu.be/dQw4w9WgXcQ").unwrap();
//! assert_eq!(link.kind, "yt");
//! assert_eq!(link.id, "dQw4w9WgXcQ");
//! ```

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::error::MediaLinkError;

static YOUTUBE_SHORT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"youtu\.be/([^?&#/]+)").expect("Invalid youtu.be regex"));

static YOUTUBE_PLAYLIST_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"youtube\.com/playlist\?(?:.*&)?list=([^&#]+)")
        .expect("Invalid YouTube playlist regex")
});

static VIMEO_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"vimeo\.com/(\d+)").expect("Invalid Vimeo regex"));

static DAILYMOTION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"dailymotion\.com/video/([^?&#_/]+)").expect("Invalid Dailymotion regex")
});

static SOUNDCLOUD_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"soundcloud\.com/[^?&#]+").expect("Invalid SoundCloud regex"));

static TWITCH_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"twitch\.tv/([\w-]+)").expect("Invalid Twitch regex"));

static GOOGLE_DRIVE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:docs|drive)\.google\.com/file/d/([^/?#]+)")
        .expect("Invalid Google Drive regex")
});

static MEDIA_FILE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\.(mp4|flv|webm|og[gv]|mp3|mov|m4a|flac|wav)$")
        .expect("Invalid media file regex")
});

/// A queueable media reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaLink {
    /// Two-letter type code, e.g. `yt`.
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

impl MediaLink {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Classifies a URL.
    ///
    /// Direct media files are only accepted over HTTPS; anything else that
    /// matches no known source is rejected.
    pub fn from_url(input: &str) -> Result<Self, MediaLinkError> {
        let input = input.trim();
        let url = Url::parse(input).map_err(|_| MediaLinkError::InvalidUrl(input.to_string()))?;

        match url.scheme() {
            "rtmp" | "rtmps" => return Ok(Self::new("rt", input)),
            "http" | "https" => {}
            _ => return Err(MediaLinkError::Unsupported(input.to_string())),
        }

        let host = url.host_str().unwrap_or_default().trim_start_matches("www.");
        let path = url.path();

        if host.ends_with("youtube.com") {
            if let Some(caps) = YOUTUBE_PLAYLIST_REGEX.captures(input) {
                return Ok(Self::new("yp", &caps[1]));
            }
            if let Some((_, v)) = url.query_pairs().find(|(k, _)| k == "v") {
                return Ok(Self::new("yt", v.into_owned()));
            }
        }
        if let Some(caps) = YOUTUBE_SHORT_REGEX.captures(input) {
            return Ok(Self::new("yt", &caps[1]));
        }
        if let Some(caps) = VIMEO_REGEX.captures(input) {
            return Ok(Self::new("vi", &caps[1]));
        }
        if let Some(caps) = DAILYMOTION_REGEX.captures(input) {
            return Ok(Self::new("dm", &caps[1]));
        }
        if SOUNDCLOUD_REGEX.is_match(input) {
            return Ok(Self::new("sc", input));
        }
        if let Some(caps) = TWITCH_REGEX.captures(input) {
            return Ok(Self::new("tw", &caps[1]));
        }
        if let Some(caps) = GOOGLE_DRIVE_REGEX.captures(input) {
            return Ok(Self::new("gd", &caps[1]));
        }

        let is_hls = path.ends_with(".m3u8");
        let is_file = MEDIA_FILE_REGEX.is_match(path);
        if is_hls || is_file {
            if url.scheme() != "https" {
                return Err(MediaLinkError::InsecureFile(input.to_string()));
            }
            return Ok(Self::new(if is_hls { "hl" } else { "fi" }, input));
        }

        Err(MediaLinkError::Unsupported(input.to_string()))
    }

    /// The URL a user would open for this media.
    pub fn url(&self) -> String {
        match self.kind.as_str() {
            "yt" => format!("https://youtube.com/watch?v={}", self.id),
            "yp" => format!("https://youtube.com/playlist?list={}", self.id),
            "vi" => format!("https://vimeo.com/{}", self.id),
            "dm" => format!("https://dailymotion.com/video/{}", self.id),
            "tw" => format!("https://twitch.tv/{}", self.id),
            "gd" => format!("https://docs.google.com/file/d/{}", self.id),
            "sc" | "rt" | "hl" | "fi" | "cu" => self.id.clone(),
            other => {
                warn!(kind = other, id = %self.id, "Unknown media type");
                format!("{}:{}", self.kind, self.id)
            }
        }
    }
}

impl fmt::Display for MediaLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}
