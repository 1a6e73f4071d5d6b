use std::sync::Arc;
use std::time::Duration;

use crate::router::SignalingRouter;

/// default grace period an empty session is kept around before reclamation,
/// so a host that drops and immediately reconnects finds its session intact.
pub const DEFAULT_MAX_SESSION_AGE: Duration = Duration::from_secs(3600);

/// default interval between sweeps.
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(60);

/// periodic sweep that reclaims empty, aged-out sessions.
///
/// mirrors the credential store's background expiry loop, but runs as a
/// tokio task against the async registry lock instead of a dedicated
/// OS thread polling a `std::sync::RwLock`.
pub async fn run(router: Arc<SignalingRouter>, interval: Duration, max_age: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let reclaimed = router.registry().reap(max_age).await;
        if !reclaimed.is_empty() {
            log::info!("reaped {} idle session(s): {:?}", reclaimed.len(), reclaimed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use crate::router::SignalingRouter;
    use std::time::Duration;

    #[tokio::test]
    async fn reaps_sessions_past_max_age() {
        let registry = Arc::new(Registry::new());
        let router = Arc::new(SignalingRouter::new(registry.clone()));

        let (tx, _rx) = crate::endpoint::Tx::new_pair();
        registry
            .create_or_revive("host-1", tx, Some("stale".to_string()), None, None)
            .await
            .unwrap();
        router.depart("host-1").await;

        assert!(registry.lookup("stale").await.is_some());
        let reclaimed = registry.reap(Duration::from_secs(0)).await;
        assert_eq!(reclaimed, vec!["stale".to_string()]);
        assert!(registry.lookup("stale").await.is_none());
    }
}
