use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::SessionEvent;

#[derive(Debug)]
enum State {
    Stopped,
    Running {
        interval: Duration,
        cancel: CancellationToken,
    },
}

/// Periodic poll timer. Each tick is a `SessionEvent::PollTick` sent to the
/// session core; the fetch itself happens there.
///
/// At most one timer runs per poller: `start` replaces a running timer and
/// `stop` may be called any number of times.
#[derive(Debug)]
pub struct NowPlayingPoller {
    event_tx: mpsc::Sender<SessionEvent>,
    state: State,
}

impl NowPlayingPoller {
    pub fn new(event_tx: mpsc::Sender<SessionEvent>) -> Self {
        Self {
            event_tx,
            state: State::Stopped,
        }
    }

    /// First tick fires immediately, then every `interval`.
    pub fn start(&mut self, interval: Duration) {
        self.stop();

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let tx = self.event_tx.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = task_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if tx.send(SessionEvent::PollTick).await.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("Poll timer exited");
        });

        info!("Polling every {:?}", interval);
        self.state = State::Running { interval, cancel };
    }

    pub fn stop(&mut self) {
        if let State::Running { cancel, .. } = std::mem::replace(&mut self.state, State::Stopped) {
            cancel.cancel();
            info!("Polling stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, State::Running { .. })
    }

    pub fn interval(&self) -> Option<Duration> {
        match self.state {
            State::Running { interval, .. } => Some(interval),
            State::Stopped => None,
        }
    }
}

impl Drop for NowPlayingPoller {
    fn drop(&mut self) {
        self.stop();
    }
}
