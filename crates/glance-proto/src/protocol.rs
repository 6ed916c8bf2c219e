use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Layout used when the current track is drawn on the display surface.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    #[default]
    Reference,
    Bullets,
    Rows,
    Double,
    Wall,
}

impl DisplayMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reference => "reference",
            Self::Bullets => "bullets",
            Self::Rows => "rows",
            Self::Double => "double",
            Self::Wall => "wall",
        }
    }

    /// Lenient parse for settings values. Unknown names are `None` so the
    /// caller can decide on a fallback.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "reference" => Some(Self::Reference),
            "bullets" => Some(Self::Bullets),
            "rows" => Some(Self::Rows),
            "double" => Some(Self::Double),
            "wall" => Some(Self::Wall),
            _ => None,
        }
    }
}

/// Playback commands accepted by the player endpoints.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackAction {
    Play,
    Pause,
    Next,
    Previous,
}

impl PlaybackAction {
    pub const ALL: [PlaybackAction; 4] = [Self::Play, Self::Pause, Self::Next, Self::Previous];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Play => "play",
            Self::Pause => "pause",
            Self::Next => "next",
            Self::Previous => "previous",
        }
    }
}

impl fmt::Display for PlaybackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported playback action: {0:?}")]
pub struct ParseActionError(pub String);

impl FromStr for PlaybackAction {
    type Err = ParseActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| ParseActionError(s.to_string()))
    }
}

/// A decoded album-art bitmap, RGBA8, row-major.
#[derive(Clone, PartialEq, Eq)]
pub struct Artwork {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub rgba: Arc<Vec<u8>>,
}

impl fmt::Debug for Artwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artwork")
            .field("url", &self.url)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.rgba.len())
            .finish()
    }
}

/// The song currently shown on the display. An empty `track_id` means
/// nothing is playing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackState {
    /// Monotonic revision counter, incremented on every mutation.
    pub rev: u64,
    pub track_id: String,
    pub title: String,
    /// Artist names joined with ", ".
    pub artist: String,
    pub album: String,
    pub is_playing: bool,
    pub artwork: Option<Artwork>,
}

impl TrackState {
    pub fn is_empty(&self) -> bool {
        self.track_id.is_empty()
    }

    pub fn status_label(&self) -> &'static str {
        if self.is_playing {
            "▶️ Playing"
        } else {
            "⏸️ Paused"
        }
    }

    pub fn summary(&self) -> StateSummary {
        StateSummary {
            rev: self.rev,
            track_id: self.track_id.clone(),
            title: self.title.clone(),
            artist: self.artist.clone(),
            album: self.album.clone(),
            is_playing: self.is_playing,
            artwork_url: self.artwork.as_ref().map(|a| a.url.clone()),
        }
    }
}

/// JSON-friendly view of `TrackState` without bitmap bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StateSummary {
    pub rev: u64,
    pub track_id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub is_playing: bool,
    pub artwork_url: Option<String>,
}

/// One call on the display surface.
#[derive(Debug, Clone, PartialEq)]
pub enum Card {
    Reference { title: String, body: String },
    Bullets { title: String, items: Vec<String> },
    Rows { rows: Vec<String> },
    Double { top: String, bottom: String },
    TextWall { text: String },
    /// Short transient notice.
    Centered { text: String },
    Image(Artwork),
}

impl Card {
    pub fn kind(&self) -> &'static str {
        match self {
            Card::Reference { .. } => "reference",
            Card::Bullets { .. } => "bullets",
            Card::Rows { .. } => "rows",
            Card::Double { .. } => "double",
            Card::TextWall { .. } => "wall",
            Card::Centered { .. } => "centered",
            Card::Image(_) => "image",
        }
    }

    pub fn notice(text: impl Into<String>) -> Self {
        Card::Centered { text: text.into() }
    }

    /// Single-line text form, used for logging.
    pub fn text(&self) -> String {
        match self {
            Card::Reference { title, body } => format!("{title} | {}", body.replace('\n', " / ")),
            Card::Bullets { title, items } => format!("{title} | {}", items.join(" / ")),
            Card::Rows { rows } => rows.join(" / "),
            Card::Double { top, bottom } => {
                format!("{} | {}", top.replace('\n', " / "), bottom.replace('\n', " / "))
            }
            Card::TextWall { text } | Card::Centered { text } => text.replace('\n', " / "),
            Card::Image(art) => format!("{}x{} {}", art.width, art.height, art.url),
        }
    }
}
