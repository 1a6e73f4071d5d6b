use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

/// runtime configuration, layered the way the reference signaling binary
/// layers its `Environment`: CLI flags win, falling back to the matching
/// `SIGNAL_*` environment variable, falling back to a hardcoded default.
#[derive(Parser, Debug)]
#[clap(
    name = "signal-core",
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS")
)]
pub struct Config {
    /// positional port argument (spec.md §6 CLI surface): `signal-core 9000`
    /// binds the websocket listener on port 9000 instead of `--listen`'s
    /// default, keeping the host half of `--listen`/`SIGNAL_LISTEN` as-is.
    #[clap(index = 1, value_name = "PORT")]
    pub port: Option<u16>,

    /// address and port the websocket signaling listener binds.
    #[clap(default_value = "0.0.0.0:8765", env = "SIGNAL_LISTEN", long)]
    pub listen: SocketAddr,

    /// address and port the HTTP management surface binds
    /// (`/health`, `/api/session/{id}`, `/api/links/*`, `/api/notifications`).
    #[clap(default_value = "127.0.0.1:8766", env = "SIGNAL_HTTP_LISTEN", long)]
    pub http_listen: SocketAddr,

    /// seconds between reaper sweeps of idle, aged-out sessions.
    #[clap(default_value = "60", env = "SIGNAL_REAP_INTERVAL_SECS", long)]
    pub reap_interval_secs: u64,

    /// seconds an emptied session is kept around before reclamation.
    #[clap(default_value = "3600", env = "SIGNAL_MAX_SESSION_AGE_SECS", long)]
    pub max_session_age_secs: u64,

    /// filesystem path of the encrypted link store (sled database directory).
    #[clap(default_value = "./links", env = "SIGNAL_LINK_STORE_PATH", long)]
    pub link_store_path: String,

    /// 32-byte AES-256-GCM key for the link store, base64-encoded. If unset
    /// a key is generated at startup and logged once — fine for local
    /// experimentation, not for a redeployed/restarted node.
    #[clap(env = "SIGNAL_LINK_STORE_KEY", long)]
    pub link_store_key: Option<String>,

    /// base URL of the wallet balance oracle's HTTP endpoint.
    #[clap(default_value = "http://127.0.0.1:9090", env = "SIGNAL_WALLET_RPC_URL", long)]
    pub wallet_rpc_url: String,

    /// seconds a wallet balance is cached before a fresh lookup is made.
    #[clap(default_value = "300", env = "SIGNAL_WALLET_CACHE_TTL_SECS", long)]
    pub wallet_cache_ttl_secs: u64,

    /// minimum wallet balance (in the oracle's base unit) required for the
    /// "wallet" persistent-link tier.
    #[clap(default_value = "1", env = "SIGNAL_WALLET_TIER_THRESHOLD", long)]
    pub wallet_tier_threshold: u64,

    /// minimum wallet balance required for the "premium" persistent-link tier.
    #[clap(default_value = "10", env = "SIGNAL_PREMIUM_TIER_THRESHOLD", long)]
    pub premium_tier_threshold: u64,

    /// maximum size in bytes of one websocket text frame.
    #[clap(default_value = "1048576", env = "SIGNAL_MAX_MESSAGE_SIZE", long)]
    pub max_message_size: usize,
}

impl Config {
    pub fn load() -> Arc<Self> {
        let mut config = Self::parse();
        if let Some(port) = config.port {
            config.listen.set_port(port);
        }
        Arc::new(config)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }

    pub fn max_session_age(&self) -> Duration {
        Duration::from_secs(self.max_session_age_secs)
    }

    pub fn wallet_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.wallet_cache_ttl_secs)
    }
}
