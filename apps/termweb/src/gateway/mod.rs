//! HTTP/WebSocket front door.
//!
//! One axum router serves the embedded client, brokers token exchange,
//! runs the OAuth bridge, and upgrades the three WebSocket endpoints.
//! Every request passes the auth gate first; every response leaves with
//! the common header set.

pub mod assets;
pub mod auth_gate;
pub mod handlers;
pub mod ws;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Request;
use axum::http::header::{self, HeaderValue};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, watch};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::{AuthStore, RateLimiter};
use crate::config::Config;
use crate::transfer::TransferManager;
use crate::video::QualityController;

/// How long in-flight connections get to drain on shutdown.
pub const SHUTDOWN_DRAIN: Duration = Duration::from_secs(2);
/// Encoded-frame fanout buffer per subscriber.
const FRAME_CHANNEL_CAPACITY: usize = 64;

/// Commands for the encoder owner (the framebuffer producer loop).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoCommand {
    SetRate { bitrate: u32, fps: u32 },
    SetPixelBudget(u64),
    RequestKeyframe,
}

/// Hand-off point between the external framebuffer producer and the
/// streaming WebSockets: encoded frames fan out to `/ws/h264`
/// subscribers, control-channel feedback comes back as [`VideoCommand`]s.
pub struct VideoHub {
    frames: broadcast::Sender<Vec<u8>>,
    pub controller: Mutex<QualityController>,
    commands: mpsc::UnboundedSender<VideoCommand>,
    command_rx: Mutex<Option<mpsc::UnboundedReceiver<VideoCommand>>>,
}

impl VideoHub {
    pub fn new() -> Self {
        let (frames, _) = broadcast::channel(FRAME_CHANNEL_CAPACITY);
        let (commands, command_rx) = mpsc::unbounded_channel();
        Self {
            frames,
            controller: Mutex::new(QualityController::new()),
            commands,
            command_rx: Mutex::new(Some(command_rx)),
        }
    }

    /// Called by the producer for every encoded frame.
    pub fn publish_frame(&self, data: Vec<u8>) {
        self.controller.lock().on_frame_encoded();
        // No subscribers is fine; frames are simply dropped.
        let _ = self.frames.send(data);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Vec<u8>> {
        self.frames.subscribe()
    }

    pub fn send_command(&self, command: VideoCommand) {
        let _ = self.commands.send(command);
    }

    /// The producer claims the command stream once at startup.
    pub fn take_command_receiver(&self) -> Option<mpsc::UnboundedReceiver<VideoCommand>> {
        self.command_rx.lock().take()
    }
}

impl Default for VideoHub {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub auth: Arc<Mutex<AuthStore>>,
    pub limiter: Arc<RateLimiter>,
    pub transfers: Arc<Mutex<TransferManager>>,
    pub video: Arc<VideoHub>,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(config: Config, auth: AuthStore) -> Self {
        let transfers = TransferManager::new(config.transfer_state_dir());
        Self {
            config: Arc::new(config),
            auth: Arc::new(Mutex::new(auth)),
            limiter: Arc::new(RateLimiter::new()),
            transfers: Arc::new(Mutex::new(transfers)),
            video: Arc::new(VideoHub::new()),
            http: reqwest::Client::new(),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/index.html", get(handlers::index))
        .route("/healthz", get(handlers::healthz))
        .route("/auth/login", post(handlers::login))
        .route("/auth/:provider", get(handlers::oauth_authorize))
        .route("/auth/:provider/callback", get(handlers::oauth_callback))
        .route("/ws/h264", get(ws::h264_ws))
        .route("/ws/control", get(ws::control_ws))
        .route("/ws/file", get(ws::file_ws))
        .fallback(handlers::asset_or_404)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_gate::auth_gate,
        ))
        .layer(middleware::from_fn(common_headers))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Every response gets the shared header set. `frame-ancestors` is
/// deliberately absent so non-HTTP embedders can frame the client.
async fn common_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    // A WebSocket handshake must keep the Connection/Upgrade headers the
    // upgrade handler set; decorating a 101 would break it.
    if response.status() == StatusCode::SWITCHING_PROTOCOLS {
        return response;
    }
    let headers = response.headers_mut();
    headers.insert(
        "cross-origin-resource-policy",
        HeaderValue::from_static("cross-origin"),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store, no-cache, must-revalidate, max-age=0"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

/// Serves until `shutdown` resolves, then drains in-flight connections
/// for at most [`SHUTDOWN_DRAIN`].
pub async fn serve(
    state: AppState,
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let app = build_router(state);
    let addr = listener.local_addr()?;
    info!(%addr, "gateway listening");

    let mut drain_signal = shutdown.clone();
    let graceful = async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stopped| *stopped).await;
        })
        .await
    };

    // Give in-flight workers a bounded drain window after the stop signal.
    tokio::select! {
        result = graceful => result,
        _ = async {
            let _ = drain_signal.wait_for(|stopped| *stopped).await;
            tokio::time::sleep(SHUTDOWN_DRAIN).await;
        } => {
            info!("drain window elapsed, closing remaining connections");
            Ok(())
        }
    }
}
