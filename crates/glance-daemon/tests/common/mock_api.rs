//! In-process stand-in for the music Web API plus an image host.
//!
//! Tests set the reply for currently-playing and the status for player
//! commands, then inspect what the daemon asked for. Every response closes
//! its connection, so `hang_up` makes the next request fail at the transport
//! level instead of riding a pooled connection.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use image::{ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

const DEVICES: &str = r#"{"devices": [
    {"id": "phone-1", "name": "Phone", "type": "Smartphone", "is_active": true, "volume_percent": 70},
    {"id": "kitchen-1", "name": "Kitchen", "type": "Speaker", "is_active": false, "volume_percent": 30}
]}"#;

#[derive(Debug)]
struct Inner {
    now_status: u16,
    now_body: String,
    command_status: u16,
    image_status: u16,
    gets: usize,
    commands: Vec<String>,
    image_requests: usize,
    last_auth: Option<String>,
    transfers: Vec<String>,
}

#[derive(Default)]
struct Server {
    addr: Option<SocketAddr>,
    task: Option<JoinHandle<()>>,
}

#[derive(Clone)]
pub struct MockApi {
    inner: Arc<Mutex<Inner>>,
    server: Arc<Mutex<Server>>,
}

impl MockApi {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                now_status: 204,
                now_body: String::new(),
                command_status: 204,
                image_status: 200,
                gets: 0,
                commands: Vec::new(),
                image_requests: 0,
                last_auth: None,
                transfers: Vec::new(),
            })),
            server: Arc::new(Mutex::new(Server::default())),
        }
    }

    /// Start serving on an ephemeral port; returns the server root.
    pub async fn serve(&self) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        self.spawn(listener);
        format!("http://{addr}")
    }

    /// Stop listening; connections to the port are refused until `resume`.
    pub async fn hang_up(&self) {
        let task = self.server.lock().unwrap().task.take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
    }

    /// Listen again on the port `serve` picked.
    pub async fn resume(&self) {
        let addr = self.server.lock().unwrap().addr.expect("serve first");
        let listener = TcpListener::bind(addr).await.unwrap();
        self.spawn(listener);
    }

    fn spawn(&self, listener: TcpListener) {
        let app = Router::new()
            .route("/v1/me/player", axum::routing::put(transfer))
            .route("/v1/me/player/:endpoint", get(player_get).post(command))
            .route("/img/:name", get(image))
            .layer(middleware::map_response(close_connection))
            .with_state(self.clone());

        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        let mut server = self.server.lock().unwrap();
        server.addr = Some(addr);
        server.task = Some(task);
    }

    pub fn reply_playing(&self, id: &str, is_playing: bool, image_url: Option<&str>) {
        let images = image_url
            .map(|u| format!(r#"[{{"url": "http://unused/large"}}, {{"url": "{u}"}}]"#))
            .unwrap_or_else(|| "[]".to_string());
        let body = format!(
            r#"{{
                "is_playing": {is_playing},
                "item": {{
                    "id": "{id}",
                    "name": "Song {id}",
                    "album": {{"name": "Alb1", "images": {images}}},
                    "artists": [{{"name": "Art1"}}]
                }}
            }}"#
        );
        self.reply(200, &body);
    }

    pub fn reply(&self, status: u16, body: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.now_status = status;
        inner.now_body = body.to_string();
    }

    pub fn set_command_status(&self, status: u16) {
        self.inner.lock().unwrap().command_status = status;
    }

    pub fn set_image_status(&self, status: u16) {
        self.inner.lock().unwrap().image_status = status;
    }

    pub fn gets(&self) -> usize {
        self.inner.lock().unwrap().gets
    }

    pub fn commands(&self) -> Vec<String> {
        self.inner.lock().unwrap().commands.clone()
    }

    pub fn image_requests(&self) -> usize {
        self.inner.lock().unwrap().image_requests
    }

    pub fn last_auth(&self) -> Option<String> {
        self.inner.lock().unwrap().last_auth.clone()
    }

    /// Raw JSON bodies of playback transfer requests.
    pub fn transfers(&self) -> Vec<String> {
        self.inner.lock().unwrap().transfers.clone()
    }
}

async fn close_connection(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

fn status(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap()
}

async fn player_get(
    State(mock): State<MockApi>,
    Path(endpoint): Path<String>,
    headers: HeaderMap,
) -> Response {
    match endpoint.as_str() {
        "currently-playing" => {}
        "devices" => {
            return ([(header::CONTENT_TYPE, "application/json")], DEVICES).into_response()
        }
        _ => return StatusCode::NOT_FOUND.into_response(),
    }

    let mut inner = mock.inner.lock().unwrap();
    inner.gets += 1;
    inner.last_auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    match inner.now_status {
        204 => StatusCode::NO_CONTENT.into_response(),
        code => (status(code), inner.now_body.clone()).into_response(),
    }
}

async fn transfer(State(mock): State<MockApi>, body: Bytes) -> StatusCode {
    let mut inner = mock.inner.lock().unwrap();
    inner
        .transfers
        .push(String::from_utf8_lossy(&body).into_owned());
    status(inner.command_status)
}

async fn command(State(mock): State<MockApi>, Path(endpoint): Path<String>) -> StatusCode {
    let mut inner = mock.inner.lock().unwrap();
    inner.commands.push(endpoint);
    status(inner.command_status)
}

async fn image(State(mock): State<MockApi>, Path(_name): Path<String>) -> Response {
    let code = {
        let mut inner = mock.inner.lock().unwrap();
        inner.image_requests += 1;
        inner.image_status
    };

    if code != 200 {
        return status(code).into_response();
    }
    ([(header::CONTENT_TYPE, "image/png")], png(3, 3)).into_response()
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, Rgba([30, 215, 96, 255]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}
