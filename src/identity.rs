//! Local node identity
//!
//! The node key is an ed25519 key persisted as raw bytes at
//! `{data_dir}/node_key`. The node id is the fingerprint of its public key.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use tokio::task::JoinError;
use tracing::{debug, info};

use crate::api::{
    address_type, location_type, Address, ApiResponse, Client, EntityKind, Filter, Protocol,
    Subprotocol, Timestamp,
};
use crate::config::Config;
use crate::verify::{self, crypto};

pub const PROTOCOL_VERSION_MAJOR: u8 = 1;
pub const PROTOCOL_VERSION_MINOR: u16 = 0;

/// How long a stamped reply to GET/POST /node is served before restamping.
pub const REPLY_TTL_SECS: i64 = 60;

pub struct Identity {
    signing_key: SigningKey,
    node_id: String,
    address: Address,
    page_work_bits: u32,
    reply: Mutex<Option<ApiResponse>>,
}

impl Identity {
    pub fn load_or_generate(config: &Config) -> Result<Self> {
        let key = load_or_generate_key(&config.node.data_dir)?;
        Ok(Self::from_key(key, config))
    }

    pub fn from_key(signing_key: SigningKey, config: &Config) -> Self {
        let node_id = crypto::fingerprint_of(&crypto::public_key_hex(&signing_key));
        Self {
            signing_key,
            node_id,
            address: self_address(config),
            page_work_bits: config.pow.own_page,
            reply: Mutex::new(None),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// Our self-description as advertised to peers.
    pub fn address(&self) -> Address {
        let mut address = self.address.clone();
        address.last_online = now();
        address
    }

    /// Signed, PoW-stamped page describing this node, for POST /node and
    /// GET /node replies.
    pub fn presentation(&self) -> ApiResponse {
        let mut page = ApiResponse {
            address: self.address(),
            endpoint: "node".to_string(),
            ..Default::default()
        };
        self.seal(&mut page);
        page
    }

    /// Signed live-delta request for an endpoint: everything since `since`.
    pub fn delta_request(&self, endpoint: &str, since: Timestamp) -> ApiResponse {
        let mut page = ApiResponse {
            address: self.address(),
            endpoint: endpoint.to_string(),
            entity: endpoint.rsplit('/').next().unwrap_or(endpoint).to_string(),
            filters: vec![Filter::since(since)],
            ..Default::default()
        };
        self.seal(&mut page);
        page
    }

    /// `presentation` stamped on the blocking pool. Every call gets its own
    /// nonce, so this is the one to POST to peers.
    pub async fn fresh_presentation(self: &Arc<Self>) -> std::result::Result<ApiResponse, JoinError> {
        let me = self.clone();
        tokio::task::spawn_blocking(move || me.presentation()).await
    }

    /// `delta_request` stamped on the blocking pool.
    pub async fn fresh_delta_request(
        self: &Arc<Self>,
        endpoint: &str,
        since: Timestamp,
    ) -> std::result::Result<ApiResponse, JoinError> {
        let me = self.clone();
        let endpoint = endpoint.to_string();
        tokio::task::spawn_blocking(move || me.delta_request(&endpoint, since)).await
    }

    /// Presentation served to callers of /node. Reused for `REPLY_TTL_SECS`
    /// so callers cannot make us stamp on demand.
    pub async fn reply_presentation(self: &Arc<Self>) -> std::result::Result<ApiResponse, JoinError> {
        let now = now();
        if let Some(cached) = self.cached_reply(now) {
            return Ok(cached);
        }
        let page = self.fresh_presentation().await?;
        if let Ok(mut slot) = self.reply.lock() {
            *slot = Some(page.clone());
        }
        debug!("Restamped /node reply");
        Ok(page)
    }

    fn cached_reply(&self, now: Timestamp) -> Option<ApiResponse> {
        let slot = self.reply.lock().ok()?;
        slot.as_ref()
            .filter(|page| now - page.timestamp < REPLY_TTL_SECS)
            .cloned()
    }

    fn seal(&self, page: &mut ApiResponse) {
        page.timestamp = now();
        page.nonce = uuid::Uuid::new_v4().to_string();
        verify::sign_page(page, &self.signing_key, Some(self.page_work_bits));
    }
}

fn self_address(config: &Config) -> Address {
    Address {
        location: String::new(),
        sublocation: config.node.sublocation.clone(),
        location_type: location_type::IPV4,
        port: config.node.port,
        address_type: address_type::LIVE,
        last_online: 0,
        protocol: Protocol {
            version_major: PROTOCOL_VERSION_MAJOR,
            version_minor: PROTOCOL_VERSION_MINOR,
            subprotocols: vec![Subprotocol {
                name: crate::api::address::CONTENT_SUBPROTOCOL.to_string(),
                version_major: 1,
                version_minor: 0,
                supported_entities: EntityKind::ALL
                    .iter()
                    .map(|k| k.plural().to_string())
                    .collect(),
            }],
        },
        client: Client {
            name: config.node.client_name.clone(),
            version_major: env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0),
            version_minor: env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0),
            version_patch: env!("CARGO_PKG_VERSION_PATCH").parse().unwrap_or(0),
        },
        ..Default::default()
    }
}

/// Load the node key from disk, or generate and persist a new one.
fn load_or_generate_key(data_dir: &Path) -> Result<SigningKey> {
    let key_path = data_dir.join("node_key");

    if key_path.exists() {
        let bytes = std::fs::read(&key_path).context("reading node key")?;
        let secret: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("node key must be 32 bytes, found {}", bytes.len()))?;
        info!("Loaded existing node identity");
        Ok(SigningKey::from_bytes(&secret))
    } else {
        let key = SigningKey::generate(&mut OsRng);
        std::fs::create_dir_all(data_dir).context("creating data directory")?;
        std::fs::write(&key_path, key.to_bytes()).context("writing node key")?;
        info!("Generated new node identity");
        Ok(key)
    }
}

pub(crate) fn now() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as Timestamp
}
