//! Node configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::api::EntityKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub node: NodeConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub pow: PowConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub inbound: InboundConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Data directory (database, node key)
    pub data_dir: PathBuf,

    /// Port this node is reachable on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Sublocation this node is served under, if any
    #[serde(default)]
    pub sublocation: String,

    /// Client name advertised in the self-description
    #[serde(default = "default_client_name")]
    pub client_name: String,

    /// Bootstrapper to ask for a peer list on cold start, as host:port
    #[serde(default)]
    pub bootstrapper: Option<String>,
}

/// Connection limits for the cache transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Overall request timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// TCP connect timeout in seconds
    #[serde(default = "default_tcp_connect_timeout")]
    pub tcp_connect_timeout_secs: u64,

    /// TLS handshake timeout in seconds
    #[serde(default = "default_tls_handshake_timeout")]
    pub tls_handshake_timeout_secs: u64,

    /// Largest page body accepted from a remote, in bytes
    #[serde(default = "default_max_page_bytes")]
    pub max_page_bytes: usize,
}

/// Minimum proof-of-work strengths, in leading zero bits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowConfig {
    #[serde(default = "default_pow")]
    pub board: u32,
    #[serde(default = "default_pow")]
    pub board_update: u32,
    #[serde(default = "default_pow")]
    pub thread: u32,
    #[serde(default = "default_pow")]
    pub post: u32,
    #[serde(default = "default_pow")]
    pub vote: u32,
    #[serde(default = "default_pow")]
    pub vote_update: u32,
    #[serde(default = "default_pow")]
    pub key: u32,
    #[serde(default = "default_pow")]
    pub key_update: u32,
    #[serde(default = "default_pow")]
    pub truststate: u32,
    #[serde(default = "default_pow")]
    pub truststate_update: u32,

    /// Strength used when this node stamps its own pages
    #[serde(default = "default_pow")]
    pub own_page: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Cooldown for live peers after a sync, in seconds
    #[serde(default = "default_live_exclusion")]
    pub live_exclusion_secs: u64,

    /// Cooldown for static peers after a sync, in seconds
    #[serde(default = "default_static_exclusion")]
    pub static_exclusion_secs: u64,

    /// Size of the rolling neighbour list
    #[serde(default = "default_neighbour_count")]
    pub neighbour_count: usize,

    /// Number of addresses pinged concurrently
    #[serde(default = "default_pinger_page_size")]
    pub pinger_page_size: usize,

    /// Maximum addresses accepted from a single peer per sync
    #[serde(default = "default_address_limit")]
    pub address_limit: usize,

    /// Maximum bootstrappers used in one bootstrap
    #[serde(default = "default_bootstrapper_limit")]
    pub bootstrapper_limit: usize,

    /// Run a bootstrap when none succeeded within this many minutes
    #[serde(default = "default_bootstrap_after_offline")]
    pub bootstrap_after_offline_mins: u64,

    /// Explore re-syncs static peers every N ticks
    #[serde(default = "default_static_cadence")]
    pub explore_static_every: u64,

    /// Explore re-syncs bootstrappers every N ticks
    #[serde(default = "default_bootstrap_cadence")]
    pub explore_bootstrap_every: u64,

    #[serde(default = "default_neighbour_watch_interval")]
    pub neighbour_watch_interval_secs: u64,

    #[serde(default = "default_explore_interval")]
    pub explore_interval_secs: u64,

    #[serde(default = "default_address_scan_interval")]
    pub address_scan_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Content older than this is always eligible for deletion
    #[serde(default = "default_local_memory_days")]
    pub local_memory_days: u64,

    /// Votes older than this are eligible for deletion
    #[serde(default = "default_votes_memory_days")]
    pub votes_memory_days: u64,

    /// How far back a freshly bootstrapped node reaches
    #[serde(default = "default_network_head_days")]
    pub network_head_days: u64,

    /// Database size budget in megabytes
    #[serde(default = "default_max_db_size_mb")]
    pub max_db_size_mb: u64,

    /// Upper bound on stored addresses
    #[serde(default = "default_max_address_table_size")]
    pub max_address_table_size: usize,

    #[serde(default = "default_event_horizon_interval")]
    pub event_horizon_interval_secs: u64,
}

/// Cache export cadence. Caches are produced elsewhere; the windows are
/// still needed to reason about remote cache boundaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_hours")]
    pub cache_duration_hours: u64,

    #[serde(default = "default_cache_hours")]
    pub cache_generation_interval_hours: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundConfig {
    /// Serve the identity endpoints (status, node)
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_bind")]
    pub bind: String,
}

// Defaults
fn default_port() -> u16 { 49999 }
fn default_client_name() -> String { "aether-node".to_string() }
fn default_connection_timeout() -> u64 { 60 }
fn default_tcp_connect_timeout() -> u64 { 3 }
fn default_tls_handshake_timeout() -> u64 { 1 }
fn default_max_page_bytes() -> usize { 64 * 1024 * 1024 } // 64MB
fn default_pow() -> u32 { 20 }
fn default_live_exclusion() -> u64 { 60 }
fn default_static_exclusion() -> u64 { 72 * 3600 }
fn default_neighbour_count() -> usize { 100 }
fn default_pinger_page_size() -> usize { 100 }
fn default_address_limit() -> usize { 100 }
fn default_bootstrapper_limit() -> usize { 99 }
fn default_bootstrap_after_offline() -> u64 { 1440 }
fn default_static_cadence() -> u64 { 6 }
fn default_bootstrap_cadence() -> u64 { 36 }
fn default_neighbour_watch_interval() -> u64 { 60 }
fn default_explore_interval() -> u64 { 600 }
fn default_address_scan_interval() -> u64 { 2 * 3600 }
fn default_local_memory_days() -> u64 { 180 }
fn default_votes_memory_days() -> u64 { 14 }
fn default_network_head_days() -> u64 { 14 }
fn default_max_db_size_mb() -> u64 { 10_000 }
fn default_max_address_table_size() -> usize { 1000 }
fn default_event_horizon_interval() -> u64 { 6 * 3600 }
fn default_cache_hours() -> u64 { 6 }
fn default_true() -> bool { true }
fn default_bind() -> String { "0.0.0.0".to_string() }

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connection_timeout_secs: default_connection_timeout(),
            tcp_connect_timeout_secs: default_tcp_connect_timeout(),
            tls_handshake_timeout_secs: default_tls_handshake_timeout(),
            max_page_bytes: default_max_page_bytes(),
        }
    }
}

impl NetworkConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.tcp_connect_timeout_secs + self.tls_handshake_timeout_secs)
    }
}

impl Default for PowConfig {
    fn default() -> Self {
        Self::uniform(default_pow())
    }
}

impl PowConfig {
    /// Every type and update at the same strength.
    pub fn uniform(bits: u32) -> Self {
        Self {
            board: bits,
            board_update: bits,
            thread: bits,
            post: bits,
            vote: bits,
            vote_update: bits,
            key: bits,
            key_update: bits,
            truststate: bits,
            truststate_update: bits,
            own_page: bits,
        }
    }

    /// Minimum strength for an entity kind, creation or update.
    pub fn minimum(&self, kind: EntityKind, update: bool) -> u32 {
        match (kind, update) {
            (EntityKind::Board, false) => self.board,
            (EntityKind::Board, true) => self.board_update,
            (EntityKind::Thread, _) => self.thread,
            (EntityKind::Post, _) => self.post,
            (EntityKind::Vote, false) => self.vote,
            (EntityKind::Vote, true) => self.vote_update,
            (EntityKind::Key, false) => self.key,
            (EntityKind::Key, true) => self.key_update,
            (EntityKind::Truststate, false) => self.truststate,
            (EntityKind::Truststate, true) => self.truststate_update,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            live_exclusion_secs: default_live_exclusion(),
            static_exclusion_secs: default_static_exclusion(),
            neighbour_count: default_neighbour_count(),
            pinger_page_size: default_pinger_page_size(),
            address_limit: default_address_limit(),
            bootstrapper_limit: default_bootstrapper_limit(),
            bootstrap_after_offline_mins: default_bootstrap_after_offline(),
            explore_static_every: default_static_cadence(),
            explore_bootstrap_every: default_bootstrap_cadence(),
            neighbour_watch_interval_secs: default_neighbour_watch_interval(),
            explore_interval_secs: default_explore_interval(),
            address_scan_interval_secs: default_address_scan_interval(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            local_memory_days: default_local_memory_days(),
            votes_memory_days: default_votes_memory_days(),
            network_head_days: default_network_head_days(),
            max_db_size_mb: default_max_db_size_mb(),
            max_address_table_size: default_max_address_table_size(),
            event_horizon_interval_secs: default_event_horizon_interval(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_duration_hours: default_cache_hours(),
            cache_generation_interval_hours: default_cache_hours(),
        }
    }
}

impl Default for InboundConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_bind(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node: NodeConfig {
                data_dir: PathBuf::from("/var/lib/aether"),
                port: default_port(),
                sublocation: String::new(),
                client_name: default_client_name(),
                bootstrapper: None,
            },
            network: NetworkConfig::default(),
            pow: PowConfig::default(),
            dispatch: DispatchConfig::default(),
            retention: RetentionConfig::default(),
            cache: CacheConfig::default(),
            inbound: InboundConfig::default(),
        }
    }
}

impl Config {
    /// Parse a TOML document; absent sections fall back to defaults.
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }
}
