use chrono::{DateTime, Local};
use glance_proto::protocol::Card;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// How many recently shown cards are kept for inspection.
const RECENT_CARDS: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum SurfaceError {
    #[error("no display attached")]
    Disconnected,
    #[error("display rejected {kind} card: {reason}")]
    Rejected { kind: &'static str, reason: String },
}

/// The head-worn display. Rendering primitives belong to the host; we only
/// hand over one card per call.
pub trait DisplaySurface: Send + Sync {
    fn show(&self, card: &Card) -> Result<(), SurfaceError>;
}

#[derive(Debug, Clone)]
pub struct DisplayEvent {
    pub at: DateTime<Local>,
    pub card: Card,
}

/// Text-only record of a shown card.
#[derive(Debug, Clone, Serialize)]
pub struct CardLog {
    pub at: String,
    pub kind: &'static str,
    pub text: String,
}

impl From<&DisplayEvent> for CardLog {
    fn from(event: &DisplayEvent) -> Self {
        Self {
            at: event.at.format("%H:%M:%S").to_string(),
            kind: event.card.kind(),
            text: event.card.text(),
        }
    }
}

/// Fans cards out to whoever is attached (the host bridge, the log writer,
/// tests) and remembers the last few.
pub struct BroadcastSurface {
    sender: broadcast::Sender<DisplayEvent>,
    recent: Mutex<VecDeque<CardLog>>,
}

impl BroadcastSurface {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            recent: Mutex::new(VecDeque::with_capacity(RECENT_CARDS)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DisplayEvent> {
        self.sender.subscribe()
    }

    pub fn recent(&self) -> Vec<CardLog> {
        match self.recent.lock() {
            Ok(guard) => guard.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    fn remember(&self, event: &DisplayEvent) {
        let mut guard = match self.recent.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.len() == RECENT_CARDS {
            guard.pop_front();
        }
        guard.push_back(CardLog::from(event));
    }
}

impl DisplaySurface for BroadcastSurface {
    fn show(&self, card: &Card) -> Result<(), SurfaceError> {
        let event = DisplayEvent {
            at: Local::now(),
            card: card.clone(),
        };
        self.remember(&event);
        self.sender
            .send(event)
            .map(|_| ())
            .map_err(|_| SurfaceError::Disconnected)
    }
}
