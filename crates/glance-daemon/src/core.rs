/// SessionCore: single-owner event loop for the displayed track.
///
/// Every input funnels into one `mpsc` queue: poll ticks, poll results,
/// artwork results, playback-command results, voice/tap requests and token
/// updates.  `SessionCore` owns `TrackState`, the auth state and the poll
/// timer exclusively; network calls run in spawned tasks that report back
/// as events.  Results are applied in arrival order, so overlapping ticks
/// resolve last-writer-wins.
use std::sync::Arc;
use std::time::Duration;

use glance_proto::config::DisplayPreferences;
use glance_proto::protocol::{Artwork, Card, PlaybackAction, StateSummary, TrackState};
use glance_proto::token::{AuthToken, TokenStore};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::api::{ApiError, Device, NowPlaying, SpotifyClient};
use crate::artwork::{ArtworkError, ArtworkFetcher};
use crate::poller::NowPlayingPoller;
use crate::render::{self, help_card, nothing_playing};
use crate::surface::DisplaySurface;

/// Pause between a successful playback command and the refresh tick.
pub const CONTROL_REFRESH_DELAY: Duration = Duration::from_millis(500);

// ── SessionEvent ──────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SessionEvent {
    /// Fetch currently-playing now (timer, refresh or notification).
    PollTick,
    PollFinished(Result<NowPlaying, ApiError>),
    ArtworkFinished {
        track_id: String,
        result: Result<Artwork, ArtworkError>,
    },
    Control(PlaybackAction),
    ControlFinished {
        action: PlaybackAction,
        result: Result<(), ApiError>,
    },
    /// Side tap: toggle play/pause from the current state.
    Tap,
    ShowNowPlaying,
    ShowControls,
    TokenUpdated(AuthToken),
    /// Connect devices visible to the account.
    ListDevices(oneshot::Sender<Result<Vec<Device>, ApiError>>),
    TransferPlayback {
        device_id: String,
        reply: oneshot::Sender<Result<(), ApiError>>,
    },
    TransferFinished {
        result: Result<(), ApiError>,
        reply: oneshot::Sender<Result<(), ApiError>>,
    },
    Snapshot(oneshot::Sender<TrackState>),
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Missing,
    Active(AuthToken),
    /// Rejected by the API; polling halts until a new token arrives.
    Expired,
}

// ── Poll result → state transition ───────────────────────────────────────────

/// What the core must do after folding a poll result into the state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollEffect {
    None,
    /// The previous track was cleared; show "nothing playing" once.
    Cleared,
    /// A different track id arrived; render, and fetch artwork if given.
    TrackChanged { artwork_url: Option<String> },
}

pub fn apply_now_playing(
    state: &mut TrackState,
    now: NowPlaying,
    show_album_art: bool,
) -> PollEffect {
    match now {
        NowPlaying::Nothing => {
            if state.is_empty() {
                return PollEffect::None;
            }
            *state = TrackState {
                rev: state.rev + 1,
                ..TrackState::default()
            };
            PollEffect::Cleared
        }
        NowPlaying::NoItem { is_playing } => {
            if state.is_playing != is_playing {
                state.is_playing = is_playing;
                state.rev += 1;
            }
            PollEffect::None
        }
        NowPlaying::Track(track) => {
            let track_changed = track.id != state.track_id;

            state.track_id = track.id;
            state.title = track.title;
            state.artist = track.artist;
            state.album = track.album;
            state.is_playing = track.is_playing;
            state.rev += 1;

            if !track_changed {
                return PollEffect::None;
            }

            // Old art belongs to the old track.
            state.artwork = None;
            PollEffect::TrackChanged {
                artwork_url: track.artwork_url.filter(|_| show_album_art),
            }
        }
    }
}

/// Store artwork if it still belongs to the current track.
pub fn apply_artwork(state: &mut TrackState, track_id: &str, artwork: Artwork) -> bool {
    if state.is_empty() || state.track_id != track_id {
        return false;
    }
    state.artwork = Some(artwork);
    state.rev += 1;
    true
}

// ── SessionHandle ─────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
#[error("session core has shut down")]
pub struct SessionClosed;

/// Cloneable front door to a running `SessionCore`.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionEvent>,
}

impl SessionHandle {
    pub fn new(tx: mpsc::Sender<SessionEvent>) -> Self {
        Self { tx }
    }

    async fn send(&self, event: SessionEvent) -> Result<(), SessionClosed> {
        self.tx.send(event).await.map_err(|_| SessionClosed)
    }

    pub async fn poll_now(&self) -> Result<(), SessionClosed> {
        self.send(SessionEvent::PollTick).await
    }

    pub async fn control(&self, action: PlaybackAction) -> Result<(), SessionClosed> {
        self.send(SessionEvent::Control(action)).await
    }

    /// Unknown action names are ignored. Returns whether a command was queued.
    pub async fn control_named(&self, name: &str) -> Result<bool, SessionClosed> {
        match name.parse::<PlaybackAction>() {
            Ok(action) => self.control(action).await.map(|_| true),
            Err(e) => {
                debug!("Ignoring control request: {}", e);
                Ok(false)
            }
        }
    }

    pub async fn tap(&self) -> Result<(), SessionClosed> {
        self.send(SessionEvent::Tap).await
    }

    pub async fn show_now_playing(&self) -> Result<(), SessionClosed> {
        self.send(SessionEvent::ShowNowPlaying).await
    }

    pub async fn show_controls(&self) -> Result<(), SessionClosed> {
        self.send(SessionEvent::ShowControls).await
    }

    pub async fn update_token(&self, token: AuthToken) -> Result<(), SessionClosed> {
        self.send(SessionEvent::TokenUpdated(token)).await
    }

    pub async fn devices(&self) -> Result<Result<Vec<Device>, ApiError>, SessionClosed> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionEvent::ListDevices(reply)).await?;
        rx.await.map_err(|_| SessionClosed)
    }

    pub async fn transfer_playback(
        &self,
        device_id: impl Into<String>,
    ) -> Result<Result<(), ApiError>, SessionClosed> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionEvent::TransferPlayback {
            device_id: device_id.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| SessionClosed)
    }

    pub async fn snapshot(&self) -> Result<TrackState, SessionClosed> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionEvent::Snapshot(reply)).await?;
        rx.await.map_err(|_| SessionClosed)
    }

    pub async fn summary(&self) -> Result<StateSummary, SessionClosed> {
        self.snapshot().await.map(|s| s.summary())
    }

    pub async fn shutdown(&self) -> Result<(), SessionClosed> {
        self.send(SessionEvent::Shutdown).await
    }
}

// ── SessionCore ───────────────────────────────────────────────────────────────

pub struct SessionCore {
    prefs: DisplayPreferences,
    api: Arc<SpotifyClient>,
    artwork: Arc<ArtworkFetcher>,
    surface: Arc<dyn DisplaySurface>,
    tokens: TokenStore,
    auth: AuthState,
    state: TrackState,
    poller: NowPlayingPoller,
    /// Loop-back sender for spawned tasks.
    event_tx: mpsc::Sender<SessionEvent>,
    refresh_delay: Duration,
}

impl SessionCore {
    pub fn new(
        prefs: DisplayPreferences,
        api: Arc<SpotifyClient>,
        artwork: Arc<ArtworkFetcher>,
        surface: Arc<dyn DisplaySurface>,
        tokens: TokenStore,
        event_tx: mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self {
            prefs,
            api,
            artwork,
            surface,
            tokens,
            auth: AuthState::Missing,
            state: TrackState::default(),
            poller: NowPlayingPoller::new(event_tx.clone()),
            event_tx,
            refresh_delay: CONTROL_REFRESH_DELAY,
        }
    }

    pub fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }

    /// Run the core event loop until `Shutdown`. The core and its poller
    /// hold senders of their own, so the queue never closes underneath it.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<SessionEvent>) -> anyhow::Result<()> {
        info!("SessionCore: starting event loop");
        self.resume_stored_session();

        while let Some(evt) = event_rx.recv().await {
            match evt {
                SessionEvent::Shutdown => {
                    info!("SessionCore: shutdown requested");
                    break;
                }
                SessionEvent::PollTick => self.poll(),
                SessionEvent::PollFinished(result) => self.handle_poll_result(result),
                SessionEvent::ArtworkFinished { track_id, result } => {
                    self.handle_artwork(track_id, result)
                }
                SessionEvent::Control(action) => self.control(action),
                SessionEvent::ControlFinished { action, result } => {
                    self.handle_control_result(action, result)
                }
                SessionEvent::Tap => {
                    self.show(&[Card::notice("Toggling playback...")]);
                    let action = if self.state.is_playing {
                        PlaybackAction::Pause
                    } else {
                        PlaybackAction::Play
                    };
                    self.control(action);
                }
                SessionEvent::ShowNowPlaying => self.render_current(),
                SessionEvent::ShowControls => self.show(&[help_card()]),
                SessionEvent::TokenUpdated(token) => self.update_token(token).await,
                SessionEvent::ListDevices(reply) => self.list_devices(reply),
                SessionEvent::TransferPlayback { device_id, reply } => {
                    self.transfer_playback(device_id, reply)
                }
                SessionEvent::TransferFinished { result, reply } => {
                    self.handle_transfer_result(result, reply)
                }
                SessionEvent::Snapshot(reply) => {
                    let _ = reply.send(self.state.clone());
                }
            }
        }

        self.poller.stop();
        info!("SessionCore: stopped");
        Ok(())
    }

    fn resume_stored_session(&mut self) {
        match self.tokens.load() {
            Some(token) => {
                info!("Using stored access token");
                self.auth = AuthState::Active(token);
                self.poller.start(self.prefs.poll_interval());
            }
            None => {
                info!("No stored access token; waiting for the auth callback");
                self.show(&[Card::Reference {
                    title: "Spotify Connection Needed".into(),
                    body: "Please use the companion app to authenticate with Spotify".into(),
                }]);
            }
        }
    }

    async fn update_token(&mut self, token: AuthToken) {
        if let Err(e) = self.tokens.save(&token).await {
            error!("Failed to persist access token: {}", e);
        }
        self.auth = AuthState::Active(token);
        self.poller.start(self.prefs.poll_interval());
        info!("Access token updated, polling resumed");
        self.show(&[Card::Reference {
            title: "Spotify Connected".into(),
            body: "Successfully connected to your Spotify account!".into(),
        }]);
    }

    fn active_token(&self) -> Option<AuthToken> {
        match &self.auth {
            AuthState::Active(token) => Some(token.clone()),
            AuthState::Missing | AuthState::Expired => None,
        }
    }

    // ── Polling ───────────────────────────────────────────────────────────────

    fn poll(&self) {
        let Some(token) = self.active_token() else {
            debug!("Skipping poll: no usable token");
            return;
        };

        let api = Arc::clone(&self.api);
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = api.currently_playing(&token).await;
            let _ = tx.send(SessionEvent::PollFinished(result)).await;
        });
    }

    fn handle_poll_result(&mut self, result: Result<NowPlaying, ApiError>) {
        let now = match result {
            Ok(now) => now,
            Err(ApiError::Unauthorized) => {
                self.halt_on_expired_token();
                return;
            }
            Err(e) => {
                warn!("Poll skipped: {}", e);
                return;
            }
        };

        match apply_now_playing(&mut self.state, now, self.prefs.show_album_art) {
            PollEffect::None => {}
            PollEffect::Cleared => {
                info!("Playback stopped");
                self.show(&[nothing_playing()]);
            }
            PollEffect::TrackChanged { artwork_url } => {
                info!(
                    "Now playing: {} by {} [{}]",
                    self.state.title, self.state.artist, self.state.track_id
                );
                if let Some(url) = artwork_url {
                    self.fetch_artwork(self.state.track_id.clone(), url);
                }
                self.render_current();
            }
        }
    }

    fn halt_on_expired_token(&mut self) {
        if self.auth == AuthState::Expired {
            // An overlapping tick already reported it.
            return;
        }
        error!("Access token rejected; polling halted until a new token arrives");
        self.poller.stop();
        self.auth = AuthState::Expired;
        self.show(&[Card::Reference {
            title: "Spotify Authentication Needed".into(),
            body: "Your Spotify access has expired. Please reconnect via the companion app."
                .into(),
        }]);
    }

    // ── Artwork ───────────────────────────────────────────────────────────────

    fn fetch_artwork(&self, track_id: String, url: String) {
        let fetcher = Arc::clone(&self.artwork);
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = fetcher.fetch(&url).await;
            let _ = tx
                .send(SessionEvent::ArtworkFinished { track_id, result })
                .await;
        });
    }

    fn handle_artwork(&mut self, track_id: String, result: Result<Artwork, ArtworkError>) {
        let artwork = match result {
            Ok(a) => a,
            Err(e) => {
                error!("Failed to fetch album art for {}: {}", track_id, e);
                return;
            }
        };

        if !apply_artwork(&mut self.state, &track_id, artwork) {
            debug!("Discarding album art for {}: track changed", track_id);
            return;
        }

        if self.prefs.show_album_art {
            self.render_current();
        }
    }

    // ── Playback control ─────────────────────────────────────────────────────

    fn control(&self, action: PlaybackAction) {
        let Some(token) = self.active_token() else {
            warn!("Cannot {}: no usable token", action);
            self.show(&[control_failed(action)]);
            return;
        };

        let api = Arc::clone(&self.api);
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = api.send_command(&token, action).await;
            let _ = tx
                .send(SessionEvent::ControlFinished { action, result })
                .await;
        });
    }

    fn handle_control_result(&self, action: PlaybackAction, result: Result<(), ApiError>) {
        if let Err(e) = result {
            error!("Failed to control playback ({}): {}", action, e);
            self.show(&[control_failed(action)]);
            return;
        }

        self.schedule_refresh();
        self.show(&[Card::notice(format!("{action} command sent"))]);
    }

    /// Give the player a moment, then refresh once out of band.
    fn schedule_refresh(&self) {
        let tx = self.event_tx.clone();
        let delay = self.refresh_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(SessionEvent::PollTick).await;
        });
    }

    // ── Devices ───────────────────────────────────────────────────────────────

    fn list_devices(&self, reply: oneshot::Sender<Result<Vec<Device>, ApiError>>) {
        let Some(token) = self.active_token() else {
            let _ = reply.send(Err(ApiError::NoToken));
            return;
        };

        let api = Arc::clone(&self.api);
        tokio::spawn(async move {
            let _ = reply.send(api.devices(&token).await);
        });
    }

    fn transfer_playback(&self, device_id: String, reply: oneshot::Sender<Result<(), ApiError>>) {
        let Some(token) = self.active_token() else {
            warn!("Cannot transfer playback: no usable token");
            self.show(&[Card::notice(TRANSFER_FAILED)]);
            let _ = reply.send(Err(ApiError::NoToken));
            return;
        };

        info!("Transferring playback to device {}", device_id);
        let api = Arc::clone(&self.api);
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = api.transfer_playback(&token, &device_id, false).await;
            let _ = tx
                .send(SessionEvent::TransferFinished { result, reply })
                .await;
        });
    }

    fn handle_transfer_result(
        &self,
        result: Result<(), ApiError>,
        reply: oneshot::Sender<Result<(), ApiError>>,
    ) {
        match &result {
            Ok(()) => {
                self.schedule_refresh();
                self.show(&[Card::notice("Playback transferred")]);
            }
            Err(e) => {
                error!("Failed to transfer playback: {}", e);
                self.show(&[Card::notice(TRANSFER_FAILED)]);
            }
        }
        let _ = reply.send(result);
    }

    // ── Display ───────────────────────────────────────────────────────────────

    fn render_current(&self) {
        let cards = render::render(&self.state, &self.prefs);
        self.show(&cards);
    }

    fn show(&self, cards: &[Card]) {
        render::present(cards, self.surface.as_ref());
    }
}

const TRANSFER_FAILED: &str = "Failed to transfer playback";

fn control_failed(action: PlaybackAction) -> Card {
    Card::notice(format!("Failed to {action} playback"))
}
