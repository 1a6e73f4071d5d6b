//! ## The signaling core
//!
//! Two or more endpoints — a host sharing its screen/input, and one or more
//! clients viewing and driving it — need to find each other by a short,
//! human-communicable session identifier, exchange the negotiation payloads
//! (offer / answer / ICE candidates) needed to set up a direct peer
//! connection, and relay small control messages for as long as that direct
//! path isn't available. This crate is that rendezvous and relay fabric.
//!
//! It intentionally knows nothing about media transport, screen capture,
//! input injection, or end-user authentication — those live in the
//! applications that speak its wire protocol. What it owns is the session
//! registry (module `registry`), the routing rules over that registry
//! (module `router`), the transport listener that frames messages onto it
//! (module `transport`), the liveness sweep that reclaims abandoned sessions
//! (module `reaper`), and the persistent-link overlay that lets a
//! human-friendly identifier survive host restarts (module `links`).

pub mod api;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod handshake;
pub mod links;
pub mod message;
pub mod notifications;
pub mod reaper;
pub mod registry;
pub mod router;
pub mod transport;
pub mod wallet;

use std::sync::Arc;

use tokio::net::TcpListener;

use crate::config::Config;
use crate::links::{load_or_generate_key, LinkManager, LinkStore};
use crate::notifications::NotificationLog;
use crate::registry::Registry;
use crate::router::SignalingRouter;
use crate::wallet::WalletOracle;

/// brings up every long-lived task the core needs and runs until one of
/// them fails. Factored out of `main` so integration tests can start a
/// full instance in-process.
pub async fn server_main(config: Arc<Config>) -> anyhow::Result<()> {
    let registry = Arc::new(Registry::new());
    let router = Arc::new(SignalingRouter::new(registry.clone()));

    let wallet = Arc::new(WalletOracle::new(
        config.wallet_rpc_url.clone(),
        config.wallet_cache_ttl(),
        config.wallet_tier_threshold,
        config.premium_tier_threshold,
    ));

    let key = load_or_generate_key(config.link_store_key.as_deref());
    let store = Arc::new(LinkStore::open(std::path::Path::new(&config.link_store_path), &key)?);
    let links = Arc::new(LinkManager::open(store.clone(), wallet).await?);
    let notifications = Arc::new(NotificationLog::open(store)?);

    let ws_listener = TcpListener::bind(config.listen).await?;
    log::info!("signaling listener bound: addr={}", config.listen);

    let http_listener = TcpListener::bind(config.http_listen).await?;
    log::info!("http management surface bound: addr={}", config.http_listen);

    let ws_config = transport::ws_config(config.max_message_size);

    tokio::spawn(reaper::run(router.clone(), config.reap_interval(), config.max_session_age()));
    tokio::spawn(links::regenerator::run(
        links.clone(),
        registry.clone(),
        notifications.clone(),
        links::regenerator::DEFAULT_INTERVAL,
    ));

    tokio::select! {
        _ = transport::serve(ws_listener, router.clone(), ws_config) => {
            anyhow::bail!("signaling listener exited unexpectedly");
        }
        result = api::serve(http_listener, registry, links, notifications) => {
            result?;
            anyhow::bail!("http management surface exited unexpectedly");
        }
    }
}
