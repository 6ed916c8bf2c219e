//! Web API client: currently-playing lookup and player commands.

use glance_proto::protocol::PlaybackAction;
use glance_proto::token::AuthToken;
use reqwest::header::CONTENT_LENGTH;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("network failure: {0}")]
    Network(#[from] reqwest::Error),
    #[error("access token rejected")]
    Unauthorized,
    #[error("unexpected status {0}")]
    Status(StatusCode),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("no usable access token")]
    NoToken,
}

/// One parsed track from the currently-playing endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackSnapshot {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub is_playing: bool,
    /// Smallest artwork offered (the API lists images largest first).
    pub artwork_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NowPlaying {
    /// 204, or an empty 2xx body.
    Nothing,
    /// A playback context without a track item, e.g. an ad break.
    NoItem { is_playing: bool },
    Track(TrackSnapshot),
}

/// A Connect device the player can be moved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Restricted devices may come without an id.
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub volume_percent: Option<u32>,
}

// ── Wire shapes ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CurrentlyPlayingBody {
    #[serde(default)]
    is_playing: bool,
    #[serde(default)]
    item: Option<ItemBody>,
}

#[derive(Debug, Deserialize)]
struct ItemBody {
    id: String,
    name: String,
    album: AlbumBody,
    #[serde(default)]
    artists: Vec<ArtistBody>,
}

#[derive(Debug, Deserialize)]
struct AlbumBody {
    name: String,
    #[serde(default)]
    images: Vec<ImageBody>,
}

#[derive(Debug, Deserialize)]
struct ImageBody {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ArtistBody {
    name: String,
}

#[derive(Debug, Deserialize)]
struct DevicesBody {
    #[serde(default)]
    devices: Vec<Device>,
}

#[derive(Debug, Serialize)]
struct TransferBody<'a> {
    device_ids: [&'a str; 1],
    play: bool,
}

pub fn parse_currently_playing(body: &str) -> Result<NowPlaying, ApiError> {
    if body.trim().is_empty() {
        return Ok(NowPlaying::Nothing);
    }

    let parsed: CurrentlyPlayingBody =
        serde_json::from_str(body).map_err(|e| ApiError::Malformed(e.to_string()))?;

    let Some(item) = parsed.item else {
        return Ok(NowPlaying::NoItem {
            is_playing: parsed.is_playing,
        });
    };

    let artist = item
        .artists
        .iter()
        .map(|a| a.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    Ok(NowPlaying::Track(TrackSnapshot {
        id: item.id,
        title: item.name,
        artist,
        album: item.album.name,
        is_playing: parsed.is_playing,
        artwork_url: item.album.images.into_iter().last().map(|i| i.url),
    }))
}

pub fn parse_devices(body: &str) -> Result<Vec<Device>, ApiError> {
    serde_json::from_str::<DevicesBody>(body)
        .map(|b| b.devices)
        .map_err(|e| ApiError::Malformed(e.to_string()))
}

// ── Client ───────────────────────────────────────────────────────────────────

pub struct SpotifyClient {
    http: reqwest::Client,
    base_url: String,
}

impl SpotifyClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("glance/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn currently_playing(&self, token: &AuthToken) -> Result<NowPlaying, ApiError> {
        let url = format!("{}/me/player/currently-playing", self.base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(token.secret())
            .send()
            .await?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(NowPlaying::Nothing),
            StatusCode::UNAUTHORIZED => Err(ApiError::Unauthorized),
            status if !status.is_success() => Err(ApiError::Status(status)),
            _ => {
                let body = response.text().await?;
                parse_currently_playing(&body)
            }
        }
    }

    pub async fn send_command(
        &self,
        token: &AuthToken,
        action: PlaybackAction,
    ) -> Result<(), ApiError> {
        let url = format!("{}/me/player/{}", self.base_url, action.as_str());
        let response = self
            .http
            .post(&url)
            .bearer_auth(token.secret())
            .header(CONTENT_LENGTH, 0)
            .send()
            .await?;

        expect_success(response.status())
    }

    pub async fn devices(&self, token: &AuthToken) -> Result<Vec<Device>, ApiError> {
        let url = format!("{}/me/player/devices", self.base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(token.secret())
            .send()
            .await?;

        expect_success(response.status())?;
        let body = response.text().await?;
        parse_devices(&body)
    }

    /// Move playback to `device_id`, keeping the current play/pause state
    /// unless `play` is set.
    pub async fn transfer_playback(
        &self,
        token: &AuthToken,
        device_id: &str,
        play: bool,
    ) -> Result<(), ApiError> {
        let url = format!("{}/me/player", self.base_url);
        let response = self
            .http
            .put(&url)
            .bearer_auth(token.secret())
            .json(&TransferBody {
                device_ids: [device_id],
                play,
            })
            .send()
            .await?;

        expect_success(response.status())
    }
}

fn expect_success(status: StatusCode) -> Result<(), ApiError> {
    match status {
        StatusCode::UNAUTHORIZED => Err(ApiError::Unauthorized),
        status if status.is_success() => Ok(()),
        status => Err(ApiError::Status(status)),
    }
}
