use std::sync::Arc;
use std::time::Duration;

use crate::links::LinkManager;
use crate::notifications::NotificationLog;
use crate::registry::Registry;

/// default cadence of the auto-regeneration sweep.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// periodically re-evaluates every wallet-associated link: if its session
/// currently has no host, or its expiry has passed, the link is regenerated
/// in place and a `regenerated` notification is recorded.
///
/// nft links are exempt from regeneration entirely (`LinkManager::
/// all_wallet_linked` already excludes them) — they are probed for activity
/// only, which this core has no further action to take on.
pub async fn run(
    manager: Arc<LinkManager>,
    registry: Arc<Registry>,
    notifications: Arc<NotificationLog>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        sweep_once(&manager, &registry, &notifications).await;
    }
}

async fn sweep_once(manager: &LinkManager, registry: &Registry, notifications: &NotificationLog) {
    let now = crate::links::unix_now();

    for link in manager.all_wallet_linked().await {
        // keep-alive (§4.5 paths b/c) runs first: a link that still has
        // recent activity or a wallet balance backing its tier gets its
        // expiry pushed out here, without counting as a regeneration.
        match manager.apply_keep_alive_if_due(&link.link_id).await {
            Ok(Some(_)) => continue,
            Ok(None) => {}
            Err(e) => log::warn!("keep-alive check failed: link_id={}, err={e}", link.link_id),
        }

        let has_host = registry.lookup(&link.session_id).await.map(|r| r.has_host).unwrap_or(false);
        let expired = link.expires_at_unix.map(|exp| now > exp).unwrap_or(false);

        if !has_host || expired {
            let reason = if expired { "expired" } else { "inactive" };

            match manager
                .create_or_regenerate(
                    link.link_id.clone(),
                    link.session_id.clone(),
                    link.wallet_address.clone(),
                    serde_json::Value::Null,
                )
                .await
            {
                Ok(_) => {
                    notifications.push(link.link_id.clone(), format!("regenerated:{reason}"), now).await;
                }
                Err(e) => {
                    log::warn!("auto-regeneration failed: link_id={}, err={e}", link.link_id);
                }
            }
        }
    }
}
