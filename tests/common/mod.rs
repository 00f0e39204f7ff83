//! Shared fixtures: a mock remote peer and local node wiring

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::AtomicI64;
use std::sync::{Arc, Mutex};

use axum::{
    extract::State,
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Json, Response as HttpResponse},
    Router,
};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;

use aether_node::api::address::CONTENT_SUBPROTOCOL;
use aether_node::api::{
    address_type, Address, ApiResponse, Board, Entity, EntityKind, Pagination, Protocol,
    ResultCache, Subprotocol,
};
use aether_node::config::{Config, PowConfig};
use aether_node::identity::Identity;
use aether_node::store::{SqliteStore, Store};
use aether_node::sync::Syncer;
use aether_node::transport::Transport;
use aether_node::verify;

/// Cheap work for tests.
pub const TEST_BITS: u32 = 2;

pub fn test_config(data_dir: &Path) -> Config {
    let mut config = Config::default();
    config.node.data_dir = data_dir.to_path_buf();
    config.pow = PowConfig::uniform(TEST_BITS);
    config.network.connection_timeout_secs = 5;
    config.network.tcp_connect_timeout_secs = 1;
    config.network.tls_handshake_timeout_secs = 1;
    config.dispatch.pinger_page_size = 10;
    config
}

/// A local node: store, identity and syncer over a temp directory.
pub struct LocalNode {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub identity: Arc<Identity>,
    pub syncer: Syncer,
}

impl LocalNode {
    pub fn new(data_dir: &Path) -> Self {
        Self::with_config(test_config(data_dir))
    }

    pub fn with_config(config: Config) -> Self {
        let config = Arc::new(config);
        let store: Arc<dyn Store> = Arc::new(
            SqliteStore::open(&config.node.data_dir, config.retention.max_address_table_size)
                .unwrap(),
        );
        let identity = Arc::new(Identity::load_or_generate(&config).unwrap());
        let transport = Transport::new(&config.network, config.dispatch.address_limit).unwrap();
        let syncer = Syncer::new(
            config.clone(),
            store.clone(),
            identity.clone(),
            transport,
            Arc::new(AtomicI64::new(0)),
        );
        Self {
            config,
            store,
            identity,
            syncer,
        }
    }
}

/// An anonymous, sealed board.
pub fn board(name: &str, creation: i64) -> Entity {
    let mut entity = Entity::Board(Board {
        name: name.to_string(),
        ..Default::default()
    });
    entity.provable_mut().creation = creation;
    verify::seal(&mut entity, None, TEST_BITS);
    entity
}

pub fn page_of(entities: &[Entity], timestamp: i64) -> ApiResponse {
    let mut page = ApiResponse {
        timestamp,
        ..Default::default()
    };
    for e in entities {
        page.response.push(e.clone());
    }
    page
}

/// Cache page `n` of `pages`.
pub fn cache_page(entities: &[Entity], n: u64, pages: u64, timestamp: i64) -> ApiResponse {
    let mut page = page_of(entities, timestamp);
    page.pagination = Pagination {
        pages,
        current_page: n,
    };
    page
}

/// Endpoint index pointing at the given caches.
pub fn index_page(caches: &[(&str, i64, i64)], timestamp: i64) -> ApiResponse {
    ApiResponse {
        timestamp,
        results: caches
            .iter()
            .map(|(url, from, to)| ResultCache {
                response_url: url.to_string(),
                starts_from: *from,
                ends_at: *to,
            })
            .collect(),
        ..Default::default()
    }
}

/// A remote peer on 127.0.0.1 serving canned pages, signed on the way out.
pub struct MockPeer {
    pub key: SigningKey,
    pub addr: SocketAddr,
    pub address_type: u8,
    pages: Mutex<HashMap<String, ApiResponse>>,
    requests: Mutex<Vec<String>>,
}

impl MockPeer {
    pub async fn start(address_type: u8) -> Arc<Self> {
        Self::start_with_key(address_type, SigningKey::generate(&mut OsRng)).await
    }

    pub async fn start_with_key(address_type: u8, key: SigningKey) -> Arc<Self> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = Arc::new(Self {
            key,
            addr,
            address_type,
            pages: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        });

        let node = ApiResponse {
            address: peer.self_address(),
            endpoint: "node".into(),
            timestamp: 1_000,
            ..Default::default()
        };
        peer.serve("GET", "node", node.clone());
        peer.serve("POST", "node", node);

        let app = Router::new().fallback(handle).with_state(peer.clone());
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        peer
    }

    /// The address the peer reports for itself.
    pub fn self_address(&self) -> Address {
        let mut a = Address::new("127.0.0.1", self.addr.port());
        a.address_type = self.address_type;
        a.last_online = 1_000;
        a.protocol = Protocol {
            version_major: 1,
            version_minor: 0,
            subprotocols: vec![Subprotocol {
                name: CONTENT_SUBPROTOCOL.into(),
                version_major: 1,
                version_minor: 0,
                supported_entities: EntityKind::ALL.iter().map(|k| k.plural().to_string()).collect(),
            }],
        };
        a
    }

    /// Serve `page` for `method` on `path` (relative to `/v0/`).
    pub fn serve(&self, method: &str, path: &str, page: ApiResponse) {
        self.pages
            .lock()
            .unwrap()
            .insert(format!("{} {}", method, path), page);
    }

    pub fn remove(&self, method: &str, path: &str) {
        self.pages
            .lock()
            .unwrap()
            .remove(&format!("{} {}", method, path));
    }

    /// Requests seen so far, as `METHOD path`.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requested(&self, method: &str, path: &str) -> bool {
        let wanted = format!("{} {}", method, path);
        self.requests().iter().any(|r| *r == wanted)
    }

    /// The address a local node dials.
    pub fn address(&self) -> Address {
        let mut a = Address::new("127.0.0.1", self.addr.port());
        a.address_type = self.address_type;
        a
    }

    pub fn node_id(&self) -> String {
        verify::crypto::fingerprint_of(&verify::crypto::public_key_hex(&self.key))
    }
}

async fn handle(State(peer): State<Arc<MockPeer>>, method: Method, uri: Uri) -> HttpResponse {
    let path = uri.path().trim_start_matches('/');
    let Some(path) = path.strip_prefix("v0/") else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let key = format!("{} {}", method, path);
    peer.requests.lock().unwrap().push(key.clone());

    if path == "status" {
        return StatusCode::OK.into_response();
    }
    let page = peer.pages.lock().unwrap().get(&key).cloned();
    match page {
        Some(mut page) => {
            verify::sign_page(&mut page, &peer.key, None);
            Json(page).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
