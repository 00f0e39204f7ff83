//! Peer-facing identity surface
//!
//! Serves the handshake half of the wire protocol so that peers can check
//! and dial this node back:
//!
//! - `GET  /v0/status`: liveness, empty body
//! - `GET  /v0/node`: our signed self-description
//! - `POST /v0/node`: a caller presents itself; we record it and answer
//!   with our own description
//!
//! A caller's self-report is only trusted as far as the socket proves it:
//! the stored location is the peer IP of the connection, whatever the page
//! claims.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{ConnectInfo, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::api::address::location_type_of;
use crate::api::{Address, ApiResponse, Timestamp};
use crate::identity::{now, Identity};
use crate::store::Store;
use crate::verify;

/// How far a presentation's timestamp may drift from our clock, in seconds.
pub const REPLAY_WINDOW_SECS: i64 = 600;

/// Nonces seen within the replay window.
#[derive(Debug, Default)]
pub struct ReplayGuard {
    seen: HashMap<String, Timestamp>,
}

impl ReplayGuard {
    /// Accept a (nonce, timestamp) pair once, and only while fresh.
    pub fn admit(&mut self, nonce: &str, timestamp: Timestamp, now: Timestamp) -> bool {
        if nonce.is_empty() || (now - timestamp).abs() > REPLAY_WINDOW_SECS {
            return false;
        }
        self.seen.retain(|_, ts| (now - *ts).abs() <= REPLAY_WINDOW_SECS);
        if self.seen.contains_key(nonce) {
            return false;
        }
        self.seen.insert(nonce.to_string(), timestamp);
        true
    }
}

pub struct InboundState {
    pub identity: Arc<Identity>,
    pub store: Arc<dyn Store>,
    /// Minimum proof of work on a presentation
    pub min_work: u32,
    pub replay: Mutex<ReplayGuard>,
}

impl InboundState {
    pub fn new(identity: Arc<Identity>, store: Arc<dyn Store>, min_work: u32) -> Self {
        Self {
            identity,
            store,
            min_work,
            replay: Mutex::new(ReplayGuard::default()),
        }
    }
}

type Rejection = (StatusCode, String);

pub fn create_router(state: Arc<InboundState>, sublocation: &str) -> Router {
    let routes = Router::new()
        .route("/v0/status", get(status))
        .route("/v0/node", get(node).post(present))
        .with_state(state);

    let sub = sublocation.trim_matches('/');
    if sub.is_empty() {
        routes
    } else {
        Router::new().nest(&format!("/{}", sub), routes)
    }
}

/// Serve until the listener fails.
pub async fn serve(listener: TcpListener, router: Router) -> anyhow::Result<()> {
    let local = listener.local_addr()?;
    info!(%local, "Inbound surface listening");
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// GET /v0/status
async fn status() -> StatusCode {
    StatusCode::OK
}

/// GET /v0/node
async fn node(State(state): State<Arc<InboundState>>) -> Result<Json<ApiResponse>, Rejection> {
    reply(&state).await
}

async fn reply(state: &InboundState) -> Result<Json<ApiResponse>, Rejection> {
    match state.identity.reply_presentation().await {
        Ok(page) => Ok(Json(page)),
        Err(e) => {
            warn!(error = %e, "Failed to stamp /node reply");
            Err((StatusCode::INTERNAL_SERVER_ERROR, "stamping failed".into()))
        }
    }
}

/// POST /v0/node
async fn present(
    State(state): State<Arc<InboundState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Json(page): Json<ApiResponse>,
) -> Result<Json<ApiResponse>, Rejection> {
    let reject = |status: StatusCode, reason: String| {
        debug!(%peer, %reason, "Presentation rejected");
        (status, reason)
    };

    if page.node_public_key.is_empty() {
        return Err(reject(StatusCode::UNAUTHORIZED, "presentation is unsigned".into()));
    }
    let node_id = verify::verify_page(&page)
        .map_err(|e| reject(StatusCode::UNAUTHORIZED, e.to_string()))?;
    verify::verify_page_work(&page, state.min_work)
        .map_err(|e| reject(StatusCode::UNAUTHORIZED, e.to_string()))?;
    if node_id == state.identity.node_id() {
        return Err(reject(StatusCode::CONFLICT, "presentation from ourselves".into()));
    }
    let fresh = state
        .replay
        .lock()
        .map(|mut guard| guard.admit(&page.nonce, page.timestamp, now()))
        .unwrap_or(false);
    if !fresh {
        return Err(reject(StatusCode::UNAUTHORIZED, "stale or replayed nonce".into()));
    }

    let caller = second_party(&page.address, peer);
    if let Err(e) = state.store.record_inbound_address(&caller) {
        warn!(%peer, error = %e, "Failed to record inbound caller");
        return Err((StatusCode::INTERNAL_SERVER_ERROR, "store failure".into()));
    }
    debug!(%peer, %node_id, port = caller.port, "Inbound presentation recorded");

    reply(&state).await
}

/// The record kept for an inbound caller: the socket's IP, the port it
/// says it listens on, and the time it reached us. Everything else it
/// claimed is dropped.
pub fn second_party(claimed: &Address, peer: SocketAddr) -> Address {
    let location = peer.ip().to_canonical().to_string();
    Address {
        location_type: location_type_of(&location),
        location,
        port: claimed.port,
        last_successful_ping: now(),
        ..Default::default()
    }
}
