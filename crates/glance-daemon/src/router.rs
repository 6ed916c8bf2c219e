//! Voice, tap, head-gesture and notification input → session requests.

use glance_proto::protocol::PlaybackAction;
use std::future::Future;
use tracing::{debug, info};

use crate::core::{SessionClosed, SessionHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterAction {
    ShowNowPlaying,
    Control(PlaybackAction),
    ShowControls,
}

/// Checked in order; the first group with a matching phrase wins.
const PHRASES: &[(&[&str], RouterAction)] = &[
    (
        &[
            "what's playing",
            "what is playing",
            "what song is this",
            "now playing",
            "current song",
        ],
        RouterAction::ShowNowPlaying,
    ),
    (
        &["play music", "resume music"],
        RouterAction::Control(PlaybackAction::Play),
    ),
    (
        &["pause music", "stop music"],
        RouterAction::Control(PlaybackAction::Pause),
    ),
    (
        &["next track", "next song", "skip song", "skip track"],
        RouterAction::Control(PlaybackAction::Next),
    ),
    (
        &["previous track", "previous song", "last song", "go back"],
        RouterAction::Control(PlaybackAction::Previous),
    ),
    (
        &["show controls", "music controls"],
        RouterAction::ShowControls,
    ),
];

pub fn match_phrase(text: &str) -> Option<RouterAction> {
    let text = text.to_lowercase();
    PHRASES
        .iter()
        .find(|(phrases, _)| phrases.iter().any(|p| text.contains(p)))
        .map(|(_, action)| *action)
}

/// Input events delivered by the host integration layer.
///
/// Each method reports whether the event led to a session request.
pub trait InputEvents {
    fn on_transcript(
        &self,
        text: &str,
        is_final: bool,
    ) -> impl Future<Output = Result<bool, SessionClosed>> + Send;

    fn on_notification(&self, package: &str)
        -> impl Future<Output = Result<bool, SessionClosed>> + Send;

    fn on_tap(&self) -> impl Future<Output = Result<bool, SessionClosed>> + Send;

    /// Head position reported by the glasses ("up", "down", ...).
    fn on_head_position(
        &self,
        position: &str,
    ) -> impl Future<Output = Result<bool, SessionClosed>> + Send;
}

pub struct CommandRouter {
    session: SessionHandle,
    notification_package: String,
}

impl CommandRouter {
    pub fn new(session: SessionHandle, notification_package: impl Into<String>) -> Self {
        Self {
            session,
            notification_package: notification_package.into(),
        }
    }

    async fn dispatch(&self, action: RouterAction) -> Result<(), SessionClosed> {
        match action {
            RouterAction::ShowNowPlaying => self.session.show_now_playing().await,
            RouterAction::Control(action) => self.session.control(action).await,
            RouterAction::ShowControls => self.session.show_controls().await,
        }
    }
}

impl InputEvents for CommandRouter {
    async fn on_transcript(&self, text: &str, is_final: bool) -> Result<bool, SessionClosed> {
        if !is_final {
            return Ok(false);
        }

        let Some(action) = match_phrase(text) else {
            debug!("No command in transcript {:?}", text);
            return Ok(false);
        };

        info!("Voice command: {:?}", action);
        self.dispatch(action).await?;
        Ok(true)
    }

    async fn on_notification(&self, package: &str) -> Result<bool, SessionClosed> {
        if package != self.notification_package {
            return Ok(false);
        }
        debug!("Player notification, refreshing");
        self.session.poll_now().await?;
        Ok(true)
    }

    async fn on_tap(&self) -> Result<bool, SessionClosed> {
        self.session.tap().await?;
        Ok(true)
    }

    async fn on_head_position(&self, position: &str) -> Result<bool, SessionClosed> {
        if !position.trim().eq_ignore_ascii_case("up") {
            return Ok(false);
        }
        debug!("Head up, showing now playing");
        self.session.show_now_playing().await?;
        Ok(true)
    }
}
