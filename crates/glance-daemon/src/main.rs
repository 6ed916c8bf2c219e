use std::sync::Arc;

use glance_daemon::api::SpotifyClient;
use glance_daemon::artwork::ArtworkFetcher;
use glance_daemon::core::{SessionCore, SessionEvent, SessionHandle};
use glance_daemon::http::{self, HttpState};
use glance_daemon::router::CommandRouter;
use glance_daemon::surface::{BroadcastSurface, CardLog, DisplaySurface};
use glance_proto::config::Config;
use glance_proto::token::TokenStore;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Setup file logging + stderr
    let data_dir = glance_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,glance_daemon=debug")),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());
    let prefs = config.display_preferences();
    info!(
        "Display: mode={} interval={:?} controls={} album_art={}",
        prefs.display_mode.as_str(),
        prefs.poll_interval(),
        prefs.show_controls,
        prefs.show_album_art
    );

    let surface = Arc::new(BroadcastSurface::new(64));
    spawn_card_logger(&surface);

    let api = Arc::new(SpotifyClient::new(
        config.api.base_url.clone(),
        config.request_timeout(),
    )?);
    let artwork = Arc::new(ArtworkFetcher::new(&config.artwork, config.request_timeout())?);
    let tokens = TokenStore::new(
        config.daemon.token_file.clone(),
        config.daemon.token_key_file.clone(),
    );

    // Event channel: all inputs funnel into SessionCore
    let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(256);
    let session = SessionHandle::new(event_tx.clone());

    let core = SessionCore::new(
        prefs,
        api,
        artwork,
        surface.clone() as Arc<dyn DisplaySurface>,
        tokens,
        event_tx,
    );

    if config.http.enabled {
        let router = Arc::new(CommandRouter::new(
            session.clone(),
            config.api.notification_package.clone(),
        ));
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            HttpState {
                session: session.clone(),
                router,
                surface: surface.clone(),
            },
        );
    } else {
        warn!("HTTP API disabled; no input events or auth callbacks will arrive");
    }

    let shutdown = session.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
            let _ = shutdown.shutdown().await;
        }
    });

    info!("Daemon initialised, running event loop");
    core.run(event_rx).await?;

    Ok(())
}

/// Mirror every card shown on the display into the log.
fn spawn_card_logger(surface: &BroadcastSurface) {
    let mut rx = surface.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let log = CardLog::from(&event);
                    info!(target: "glance_daemon::display", "[{}] {}", log.kind, log.text);
                }
                Err(RecvError::Lagged(n)) => warn!("Card log lagged, {} cards skipped", n),
                Err(RecvError::Closed) => break,
            }
        }
    });
}
