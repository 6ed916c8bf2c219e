use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use glance_proto::protocol::StateSummary;
use glance_proto::token::{token_from_redirect, AuthToken};
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::api::ApiError;
use crate::core::{SessionClosed, SessionHandle};
use crate::router::{CommandRouter, InputEvents};
use crate::surface::{BroadcastSurface, CardLog};

#[derive(Clone)]
pub struct HttpState {
    pub session: SessionHandle,
    pub router: Arc<CommandRouter>,
    pub surface: Arc<BroadcastSurface>,
}

/// Either a full redirect URI (token in its fragment) or the bare token.
#[derive(Debug, Default, Deserialize)]
pub struct TokenPayload {
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

impl TokenPayload {
    fn token(&self) -> Option<AuthToken> {
        if let Some(uri) = &self.uri {
            return token_from_redirect(uri);
        }
        self.access_token.clone().and_then(AuthToken::new)
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptPayload {
    text: String,
    #[serde(default = "default_is_final")]
    is_final: bool,
}

fn default_is_final() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct NotificationPayload {
    package: String,
}

#[derive(Debug, Deserialize)]
struct HeadPayload {
    position: String,
}

pub fn app(state: HttpState) -> Router {
    Router::new()
        .route("/callback", get(token_from_query))
        .route("/api/token", post(token_from_body))
        .route("/api/transcript", post(transcript))
        .route("/api/tap", post(tap))
        .route("/api/notification", post(notification))
        .route("/api/head", post(head_position))
        .route("/api/control/:action", post(control))
        .route("/api/devices", get(get_devices))
        .route("/api/devices/:id", put(transfer_playback))
        .route("/api/state", get(get_state))
        .route("/api/display", get(get_display))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state: HttpState,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app(state)).await {
            error!("HTTP server error: {}", e);
        }
    })
}

fn accepted(result: Result<bool, SessionClosed>) -> StatusCode {
    match result {
        Ok(true) => StatusCode::ACCEPTED,
        Ok(false) => StatusCode::NO_CONTENT,
        Err(e) => {
            error!("HTTP API: {}", e);
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

async fn update_token(state: &HttpState, payload: &TokenPayload) -> Response {
    let Some(token) = payload.token() else {
        warn!("HTTP API: auth callback without an access token");
        return (StatusCode::BAD_REQUEST, "no access_token found").into_response();
    };

    info!("HTTP API: access token received");
    match state.session.update_token(token).await {
        Ok(()) => (
            StatusCode::OK,
            "Authentication successful! You can close this window and return to your glasses.",
        )
            .into_response(),
        Err(e) => {
            error!("HTTP API: {}", e);
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

async fn token_from_query(
    State(state): State<HttpState>,
    Query(payload): Query<TokenPayload>,
) -> Response {
    update_token(&state, &payload).await
}

async fn token_from_body(
    State(state): State<HttpState>,
    Json(payload): Json<TokenPayload>,
) -> Response {
    update_token(&state, &payload).await
}

async fn transcript(
    State(state): State<HttpState>,
    Json(payload): Json<TranscriptPayload>,
) -> StatusCode {
    accepted(
        state
            .router
            .on_transcript(&payload.text, payload.is_final)
            .await,
    )
}

async fn tap(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: tap");
    accepted(state.router.on_tap().await)
}

async fn notification(
    State(state): State<HttpState>,
    Json(payload): Json<NotificationPayload>,
) -> StatusCode {
    accepted(state.router.on_notification(&payload.package).await)
}

async fn head_position(
    State(state): State<HttpState>,
    Json(payload): Json<HeadPayload>,
) -> StatusCode {
    accepted(state.router.on_head_position(&payload.position).await)
}

fn api_failure(e: &ApiError) -> StatusCode {
    match e {
        ApiError::NoToken | ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
        _ => StatusCode::BAD_GATEWAY,
    }
}

async fn get_devices(State(state): State<HttpState>) -> Response {
    match state.session.devices().await {
        Ok(Ok(devices)) => Json(devices).into_response(),
        Ok(Err(e)) => {
            warn!("HTTP API: device list failed: {}", e);
            (api_failure(&e), e.to_string()).into_response()
        }
        Err(e) => {
            error!("HTTP API: {}", e);
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

async fn transfer_playback(
    State(state): State<HttpState>,
    Path(device_id): Path<String>,
) -> Response {
    info!("HTTP API: transfer playback to {}", device_id);
    match state.session.transfer_playback(device_id).await {
        Ok(Ok(())) => StatusCode::NO_CONTENT.into_response(),
        Ok(Err(e)) => (api_failure(&e), e.to_string()).into_response(),
        Err(e) => {
            error!("HTTP API: {}", e);
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

async fn control(State(state): State<HttpState>, Path(action): Path<String>) -> StatusCode {
    info!("HTTP API: control {}", action);
    match state.session.control_named(&action).await {
        Ok(true) => StatusCode::ACCEPTED,
        Ok(false) => StatusCode::BAD_REQUEST,
        Err(e) => {
            error!("HTTP API: {}", e);
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

async fn get_state(State(state): State<HttpState>) -> Result<Json<StateSummary>, StatusCode> {
    state
        .session
        .summary()
        .await
        .map(Json)
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)
}

async fn get_display(State(state): State<HttpState>) -> Json<Vec<CardLog>> {
    Json(state.surface.recent())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SessionEvent;
    use axum::body::Body;
    use axum::http::Request;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    fn test_app() -> (Router, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(8);
        let session = SessionHandle::new(tx);
        let state = HttpState {
            router: Arc::new(CommandRouter::new(session.clone(), "com.spotify.music")),
            session,
            surface: Arc::new(BroadcastSurface::new(8)),
        };
        (app(state), rx)
    }

    fn post_json(uri: &str, json: &str) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap()
    }

    #[test]
    fn token_payload_prefers_redirect_uri() {
        let payload = TokenPayload {
            uri: Some("glance://cb#access_token=from-uri".into()),
            access_token: Some("bare".into()),
        };
        assert_eq!(payload.token().unwrap().secret(), "from-uri");

        let bare = TokenPayload {
            uri: None,
            access_token: Some("bare".into()),
        };
        assert_eq!(bare.token().unwrap().secret(), "bare");
        assert!(TokenPayload::default().token().is_none());
    }

    #[tokio::test]
    async fn callback_forwards_token() {
        let (app, mut rx) = test_app();
        let response = app
            .oneshot(
                Request::get("/callback?uri=glance%3A%2F%2Fcb%23access_token%3Dabc%26x%3D1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        match rx.try_recv() {
            Ok(SessionEvent::TokenUpdated(token)) => assert_eq!(token.secret(), "abc"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn token_body_without_token_is_rejected() {
        let (app, mut rx) = test_app();
        let response = app
            .oneshot(post_json("/api/token", r#"{"uri": "glance://cb#error=denied"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn transcript_routes_final_commands() {
        let (app, mut rx) = test_app();
        let response = app
            .clone()
            .oneshot(post_json("/api/transcript", r#"{"text": "Next track"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(matches!(rx.try_recv(), Ok(SessionEvent::Control(_))));

        let interim = app
            .oneshot(post_json(
                "/api/transcript",
                r#"{"text": "next track", "is_final": false}"#,
            ))
            .await
            .unwrap();
        assert_eq!(interim.status(), StatusCode::NO_CONTENT);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_control_is_rejected_without_session_traffic() {
        let (app, mut rx) = test_app();
        let response = app
            .oneshot(
                Request::post("/api/control/bogus")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn head_up_requests_now_playing() {
        let (app, mut rx) = test_app();
        let down = app
            .clone()
            .oneshot(post_json("/api/head", r#"{"position": "down"}"#))
            .await
            .unwrap();
        assert_eq!(down.status(), StatusCode::NO_CONTENT);
        assert!(rx.try_recv().is_err());

        let up = app
            .oneshot(post_json("/api/head", r#"{"position": "up"}"#))
            .await
            .unwrap();
        assert_eq!(up.status(), StatusCode::ACCEPTED);
        assert!(matches!(rx.try_recv(), Ok(SessionEvent::ShowNowPlaying)));
    }

    #[tokio::test]
    async fn device_list_without_token_is_unauthorized() {
        let (app, mut rx) = test_app();
        tokio::spawn(async move {
            if let Some(SessionEvent::ListDevices(reply)) = rx.recv().await {
                let _ = reply.send(Err(ApiError::NoToken));
            }
        });

        let response = app
            .oneshot(Request::get("/api/devices").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn transfer_forwards_device_id() {
        let (app, mut rx) = test_app();
        let session = tokio::spawn(async move {
            match rx.recv().await {
                Some(SessionEvent::TransferPlayback { device_id, reply }) => {
                    let _ = reply.send(Ok(()));
                    device_id
                }
                other => panic!("unexpected {other:?}"),
            }
        });

        let response = app
            .oneshot(
                Request::put("/api/devices/kitchen-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(session.await.unwrap(), "kitchen-1");
    }

    #[tokio::test]
    async fn tap_and_notification_endpoints() {
        let (app, mut rx) = test_app();
        let tap = app
            .clone()
            .oneshot(Request::post("/api/tap").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(tap.status(), StatusCode::ACCEPTED);
        assert!(matches!(rx.try_recv(), Ok(SessionEvent::Tap)));

        let other = app
            .oneshot(post_json("/api/notification", r#"{"package": "com.other"}"#))
            .await
            .unwrap();
        assert_eq!(other.status(), StatusCode::NO_CONTENT);
        assert!(rx.try_recv().is_err());
    }
}
