//! # Transport Adapter
//!
//! HTTP and WebSocket plumbing around the [`Relay`]:
//!
//! - `GET /socket` upgrades to a WebSocket after checking the `Origin`
//!   allow-list and the sub-protocol token.
//! - Every socket gets a bounded outbound queue drained by its own writer
//!   task; inbound frames are fed to the relay one at a time under a lock.
//! - Static pages are served from the public directory, with game links
//!   such as `/231b158!solo` mapped to `index.html`.
//! - A background task sweeps expired round timers.
//!
//! ## Connection Flow
//!
//! ```text
//! browser --upgrade--> socket_handler --on_upgrade--> handle_socket
//!                                                      |-- relay.connect()
//!                                                      |-- writer task: outbox -> socket
//!                                                      |-- read loop: frame -> relay -> Disposition
//!                                                      '-- relay.disconnect()
//! ```

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Request, State,
    },
    http::{header, HeaderMap, StatusCode, Uri},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tower_http::services::{ServeDir, ServeFile};

use crate::common::config::ServerConfig;
use crate::common::messages::{current_timestamp_ms, ServerMessage};
use crate::server::catalogue::Catalogue;
use crate::server::relay::{Disposition, Relay};

/// Length of the hex id at the start of a game link.
const GAME_LINK_ID_LEN: usize = 7;

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    relay: Arc<Mutex<Relay>>,
    protocol: Arc<str>,
    origins: Option<Arc<[String]>>,
    send_queue: usize,
}

impl AppState {
    pub fn new(relay: Relay, protocol: &str, origins: Option<Vec<String>>, send_queue: usize) -> Self {
        Self {
            relay: Arc::new(Mutex::new(relay)),
            protocol: Arc::from(protocol),
            origins: origins.map(Arc::from),
            send_queue: send_queue.max(1),
        }
    }

    /// Capacity of each connection's outbound queue.
    pub fn send_queue(&self) -> usize {
        self.send_queue
    }

    /// Every origin is allowed when no allow-list is configured.
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        match (&self.origins, origin) {
            (None, _) => true,
            (Some(origins), Some(origin)) => origins.iter().any(|o| o == origin),
            (Some(_), None) => false,
        }
    }

    /// Whether the handshake offers our sub-protocol token.
    pub fn protocol_offered(&self, headers: &HeaderMap) -> bool {
        headers
            .get_all(header::SEC_WEBSOCKET_PROTOCOL)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .any(|token| token.trim() == &*self.protocol)
    }
}

/// The HTTP server: static pages plus the relay socket.
pub struct Server {
    config: ServerConfig,
    state: AppState,
}

impl Server {
    pub fn new(config: ServerConfig, catalogue: Catalogue) -> Self {
        let relay = Relay::new(catalogue, &config.rounds);
        let state = AppState::new(
            relay,
            &config.socket.protocol,
            config.socket.origins.clone(),
            config.socket.send_queue,
        );
        Self { config, state }
    }

    pub fn router(&self) -> Router {
        router(
            self.state.clone(),
            &self.config.socket.path,
            Path::new(&self.config.server.public_dir),
        )
    }

    /// Bind the listener and serve until the process stops.
    pub async fn run(self) -> Result<()> {
        match &self.config.socket.origins {
            Some(origins) => info!(
                "🌍 Loaded origin list:{}",
                origins
                    .iter()
                    .map(|origin| format!("\n  - {}", origin))
                    .collect::<String>()
            ),
            None => warn!("⚠️  No origin list configured; accepting every origin"),
        }

        tokio::spawn(sweep_round_timers(
            self.state.relay.clone(),
            Duration::from_secs(self.config.rounds.sweep_interval_secs.max(1)),
        ));

        let app = self.router();
        let listener = tokio::net::TcpListener::bind(&self.config.server.address)
            .await
            .with_context(|| format!("failed to bind {}", self.config.server.address))?;
        info!("📡 Server is listening on {}", self.config.server.address);

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;

        Ok(())
    }
}

/// Build the application router.
pub fn router(state: AppState, socket_path: &str, public_dir: &Path) -> Router {
    Router::new()
        .route(socket_path, get(socket_handler))
        .route_service("/", ServeFile::new(public_dir.join("games.html")))
        .route("/games.html", get(redirect_to_root))
        .fallback_service(ServeDir::new(public_dir))
        .layer(middleware::map_request(rewrite_game_link))
        .with_state(state)
}

async fn redirect_to_root() -> impl IntoResponse {
    (StatusCode::FOUND, [(header::LOCATION, "/")])
}

/// Serve `index.html` for game links.
async fn rewrite_game_link(mut request: Request) -> Request {
    if is_game_link(request.uri().path()) {
        *request.uri_mut() = Uri::from_static("/index.html");
    }
    request
}

/// `/<7 lowercase hex>` optionally followed by `!<options>`.
pub fn is_game_link(path: &str) -> bool {
    let Some(rest) = path.strip_prefix('/') else {
        return false;
    };
    let (id, options) = match rest.split_once('!') {
        Some((id, options)) => (id, Some(options)),
        None => (rest, None),
    };

    id.len() == GAME_LINK_ID_LEN
        && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        && options.map_or(true, |o| !o.is_empty())
}

async fn socket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok());

    if !state.origin_allowed(origin) {
        info!(
            "🚫 Connection from origin '{}' rejected",
            origin.unwrap_or_default()
        );
        return StatusCode::FORBIDDEN.into_response();
    }

    if !state.protocol_offered(&headers) {
        info!(
            "🚫 Connection from {} rejected: sub-protocol '{}' not offered",
            addr, state.protocol
        );
        return StatusCode::BAD_REQUEST.into_response();
    }

    let protocol = state.protocol.to_string();
    ws.protocols([protocol])
        .on_upgrade(move |socket| handle_socket(state, socket, addr.to_string()))
}

/// Drive one accepted socket until it closes.
async fn handle_socket(state: AppState, socket: WebSocket, remote: String) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(state.send_queue);

    let id = state.relay.lock().await.connect(&remote, tx);

    // The registry holds the only sender, so this ends once the session is
    // unregistered (on close, or when the relay finds the queue full) and the
    // queue is flushed.
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match message.to_text() {
                Ok(text) => text,
                Err(e) => {
                    error!("❌ Failed to serialize message: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    });

    while let Some(frame) = stream.next().await {
        let disposition = match frame {
            Ok(Message::Text(text)) => {
                state
                    .relay
                    .lock()
                    .await
                    .handle_text(&id, &text, current_timestamp_ms())
            }
            Ok(Message::Binary(_)) => state.relay.lock().await.handle_binary(&id),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => Disposition::Continue,
            Ok(Message::Close(_)) => break,
            Err(e) => {
                debug!("🔌 Socket error from {}: {}", remote, e);
                break;
            }
        };

        if disposition == Disposition::Close {
            break;
        }
    }

    state.relay.lock().await.disconnect(&id);

    if let Err(e) = writer.await {
        error!("❌ Writer task for {} failed: {}", remote, e);
    }
}

/// Periodically purge expired round timers.
async fn sweep_round_timers(relay: Arc<Mutex<Relay>>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        relay.lock().await.sweep(current_timestamp_ms());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn state(origins: Option<Vec<String>>) -> AppState {
        let relay = Relay::new(Catalogue::default(), &Default::default());
        AppState::new(relay, "whoami", origins, 8)
    }

    #[test]
    fn test_game_links() {
        assert!(is_game_link("/231b158"));
        assert!(is_game_link("/231b158!solo"));
        assert!(is_game_link("/0123abc!silent,solo"));

        assert!(!is_game_link("/231b158!"));
        assert!(!is_game_link("/231B158"));
        assert!(!is_game_link("/231b15"));
        assert!(!is_game_link("/231b1588"));
        assert!(!is_game_link("/client.js"));
        assert!(!is_game_link("/"));
        assert!(!is_game_link("231b158"));
    }

    #[test]
    fn test_origin_allow_list() {
        let open = state(None);
        assert!(open.origin_allowed(Some("https://anywhere.example")));
        assert!(open.origin_allowed(None));

        let closed = state(Some(vec!["https://whereami.example".to_string()]));
        assert!(closed.origin_allowed(Some("https://whereami.example")));
        assert!(!closed.origin_allowed(Some("https://evil.example")));
        assert!(!closed.origin_allowed(None));
    }

    #[test]
    fn test_send_queue_is_never_zero() {
        assert_eq!(state(None).send_queue(), 8);

        let relay = Relay::new(Catalogue::default(), &Default::default());
        let state = AppState::new(relay, "whoami", None, 0);
        assert_eq!(state.send_queue(), 1);
    }

    #[test]
    fn test_protocol_offered() {
        let state = state(None);

        let mut headers = HeaderMap::new();
        assert!(!state.protocol_offered(&headers));

        headers.insert(
            header::SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static("chat, whoami"),
        );
        assert!(state.protocol_offered(&headers));

        headers.insert(
            header::SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static("whoamix"),
        );
        assert!(!state.protocol_offered(&headers));
    }
}
