mod storage;

pub mod regenerator;

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::wallet::{Tier, WalletOracle};

pub use storage::{load_or_generate_key, LinkStore, StoreError, NOTIFICATIONS_KEY, NOTIFICATIONS_TREE};

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after 1970")
        .as_secs()
}

fn tier_expiry(tier: Tier, now: u64) -> Option<u64> {
    const DAY: u64 = 24 * 3600;
    match tier {
        Tier::Free => Some(now + DAY),
        Tier::Wallet => Some(now + 7 * DAY),
        Tier::Premium => Some(now + 30 * DAY),
        Tier::Nft => None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepAlive {
    pub enabled: bool,
    pub conditions: Vec<String>,
    pub last_check_unix: Option<u64>,
}

impl Default for KeepAlive {
    fn default() -> Self {
        Self {
            enabled: false,
            conditions: Vec::new(),
            last_check_unix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistentLink {
    pub link_id: String,
    pub session_id: String,
    pub wallet_address: Option<String>,
    pub tier: TierRepr,
    pub created_at_unix: u64,
    pub expires_at_unix: Option<u64>,
    pub activity_count: u64,
    pub last_activity_unix: Option<u64>,
    pub keep_alive: KeepAlive,
    pub regeneration_count: u64,
    pub metadata: Value,
}

/// a serializable mirror of [`Tier`] — `Tier` itself stays free of serde so
/// the wallet-oracle module has no reason to know about persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierRepr {
    Free,
    Wallet,
    Premium,
    Nft,
}

impl From<Tier> for TierRepr {
    fn from(t: Tier) -> Self {
        match t {
            Tier::Free => TierRepr::Free,
            Tier::Wallet => TierRepr::Wallet,
            Tier::Premium => TierRepr::Premium,
            Tier::Nft => TierRepr::Nft,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("link store error: {0}")]
    Store(#[from] StoreError),
}

/// associates long-lived `linkId`s with sessions, independent of how many
/// times the underlying session's host reconnects.
///
/// owns two logical maps (regular, nft) held by the store; the in-memory
/// notification log is separate (see [`crate::notifications::NotificationLog`])
/// so a persistence failure there never blocks a link mutation.
pub struct LinkManager {
    store: std::sync::Arc<LinkStore>,
    wallet: std::sync::Arc<WalletOracle>,
    cache: RwLock<HashMap<String, PersistentLink>>,
}

impl LinkManager {
    pub async fn open(store: std::sync::Arc<LinkStore>, wallet: std::sync::Arc<WalletOracle>) -> Result<Self, LinkError> {
        let cache = store.load_all()?;
        Ok(Self {
            store,
            wallet,
            cache: RwLock::new(cache),
        })
    }

    /// create a link, or regenerate it in place if `link_id` already exists.
    /// preserves `createdAt`, `walletAddress`, and `linkId`; increments
    /// `regenerationCount` on regeneration; always recomputes `expiresAt`
    /// from the current tier.
    pub async fn create_or_regenerate(
        &self,
        link_id: String,
        session_id: String,
        wallet_address: Option<String>,
        metadata: Value,
    ) -> Result<PersistentLink, LinkError> {
        let now = unix_now();
        let tier = self.effective_tier(wallet_address.as_deref()).await;

        let mut cache = self.cache.write().await;
        let link = if let Some(existing) = cache.get(&link_id) {
            PersistentLink {
                link_id: link_id.clone(),
                session_id,
                wallet_address: existing.wallet_address.clone().or(wallet_address),
                tier: tier.into(),
                created_at_unix: existing.created_at_unix,
                expires_at_unix: tier_expiry(tier, now),
                activity_count: existing.activity_count,
                last_activity_unix: existing.last_activity_unix,
                keep_alive: existing.keep_alive.clone(),
                regeneration_count: existing.regeneration_count + 1,
                metadata: merge_metadata(existing.metadata.clone(), metadata),
            }
        } else {
            PersistentLink {
                link_id: link_id.clone(),
                session_id,
                wallet_address,
                tier: tier.into(),
                created_at_unix: now,
                expires_at_unix: tier_expiry(tier, now),
                activity_count: 0,
                last_activity_unix: None,
                keep_alive: KeepAlive::default(),
                regeneration_count: 0,
                metadata,
            }
        };

        self.persist(&link).await?;
        cache.insert(link_id, link.clone());
        Ok(link)
    }

    pub async fn get(&self, link_id: &str) -> Option<PersistentLink> {
        self.cache.read().await.get(link_id).cloned()
    }

    pub async fn all_wallet_linked(&self) -> Vec<PersistentLink> {
        self.cache
            .read()
            .await
            .values()
            .filter(|l| l.tier != TierRepr::Nft)
            .cloned()
            .collect()
    }

    /// explicit keep-alive call. No-op for `nft` (never expires, §4.5) and
    /// for links with `keepAlive.enabled = false`.
    pub async fn keep_alive(&self, link_id: &str) -> Result<Option<PersistentLink>, LinkError> {
        let mut cache = self.cache.write().await;
        let Some(link) = cache.get_mut(link_id) else {
            return Ok(None);
        };

        if link.tier == TierRepr::Nft || !link.keep_alive.enabled {
            return Ok(Some(link.clone()));
        }

        let now = unix_now();
        link.keep_alive.last_check_unix = Some(now);
        link.expires_at_unix = tier_expiry(repr_to_tier(link.tier), now);

        let snapshot = link.clone();
        self.persist(&snapshot).await?;
        Ok(Some(snapshot))
    }

    /// the background half of keep-alive (§4.5 paths b/c): if the link opts
    /// in, extend its expiry when either it saw activity within the last
    /// hour, or a fresh wallet-balance read still clears the free tier —
    /// without this, a quiet-but-still-funded wallet link would be
    /// regenerated every sweep purely for looking expired. Never applies to
    /// `nft` or to links that didn't opt in; returns `None` in those cases
    /// and whenever neither condition currently holds.
    pub async fn apply_keep_alive_if_due(&self, link_id: &str) -> Result<Option<PersistentLink>, LinkError> {
        let now = unix_now();
        let snapshot = self.cache.read().await.get(link_id).cloned();
        let Some(link) = snapshot else {
            return Ok(None);
        };

        if !link.keep_alive.enabled || link.tier == TierRepr::Nft {
            return Ok(None);
        }

        let recent_activity = link
            .last_activity_unix
            .map(|t| now.saturating_sub(t) < 3600)
            .unwrap_or(false);

        let still_qualifies = if recent_activity {
            true
        } else {
            self.wallet.tier_of(link.wallet_address.as_deref()).await != Tier::Free
        };

        if !still_qualifies {
            return Ok(None);
        }

        let mut cache = self.cache.write().await;
        let Some(entry) = cache.get_mut(link_id) else {
            return Ok(None);
        };
        entry.keep_alive.last_check_unix = Some(now);
        entry.expires_at_unix = tier_expiry(repr_to_tier(entry.tier), now);

        let updated = entry.clone();
        self.persist(&updated).await?;
        Ok(Some(updated))
    }

    /// record an activity tick; also implicitly counts toward the
    /// "activity within the last hour" keep-alive condition.
    pub async fn record_activity(&self, link_id: &str) -> Result<(), LinkError> {
        let mut cache = self.cache.write().await;
        let Some(link) = cache.get_mut(link_id) else {
            return Ok(());
        };

        link.activity_count += 1;
        link.last_activity_unix = Some(unix_now());

        let snapshot = link.clone();
        drop(cache);
        self.persist(&snapshot).await
    }

    /// promotes a regular link to the permanent NFT store. Atomic with
    /// respect to the regular store: the regular entry is removed iff the
    /// NFT entry is written (§3 invariant).
    pub async fn promote_to_nft(&self, link_id: &str) -> Result<Option<PersistentLink>, LinkError> {
        let mut cache = self.cache.write().await;
        let Some(link) = cache.get_mut(link_id) else {
            return Ok(None);
        };

        link.tier = TierRepr::Nft;
        link.expires_at_unix = None;

        let snapshot = link.clone();
        self.store.promote(&snapshot)?;
        cache.insert(link_id.to_string(), snapshot.clone());
        Ok(Some(snapshot))
    }

    pub async fn remove(&self, link_id: &str) -> Result<Option<PersistentLink>, LinkError> {
        let mut cache = self.cache.write().await;
        let Some(link) = cache.remove(link_id) else {
            return Ok(None);
        };
        self.store.remove(link_id, link.tier == TierRepr::Nft)?;
        Ok(Some(link))
    }

    /// tier assignment per §4.5: an address that already owns an nft link
    /// is a lookup against the in-memory cache, never the balance oracle —
    /// only addresses with no nft link yet fall through to the
    /// balance-threshold tiers.
    async fn effective_tier(&self, wallet_address: Option<&str>) -> Tier {
        if let Some(address) = wallet_address {
            let owns_nft = self
                .cache
                .read()
                .await
                .values()
                .any(|l| l.tier == TierRepr::Nft && l.wallet_address.as_deref() == Some(address));
            if owns_nft {
                return Tier::Nft;
            }
        }

        self.wallet.tier_of(wallet_address).await
    }

    async fn persist(&self, link: &PersistentLink) -> Result<(), LinkError> {
        self.store.put(link)?;
        Ok(())
    }
}

fn repr_to_tier(repr: TierRepr) -> Tier {
    match repr {
        TierRepr::Free => Tier::Free,
        TierRepr::Wallet => Tier::Wallet,
        TierRepr::Premium => Tier::Premium,
        TierRepr::Nft => Tier::Nft,
    }
}

fn merge_metadata(existing: Value, incoming: Value) -> Value {
    match (existing, incoming) {
        (Value::Object(mut base), Value::Object(patch)) => {
            for (k, v) in patch {
                base.insert(k, v);
            }
            Value::Object(base)
        }
        (_, incoming) if !incoming.is_null() => incoming,
        (existing, _) => existing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn regeneration_preserves_created_at_and_increments_counter() {
        let dir = tempdir();
        let store = std::sync::Arc::new(LinkStore::open(dir.path(), &test_key()).unwrap());
        let wallet = std::sync::Arc::new(WalletOracle::new(
            "http://127.0.0.1:1".to_string(),
            Duration::from_secs(60),
            1,
            100,
        ));
        let manager = LinkManager::open(store, wallet).await.unwrap();

        let first = manager
            .create_or_regenerate("L1".to_string(), "S1".to_string(), None, Value::Null)
            .await
            .unwrap();
        let second = manager
            .create_or_regenerate("L1".to_string(), "S1".to_string(), None, Value::Null)
            .await
            .unwrap();

        assert_eq!(first.created_at_unix, second.created_at_unix);
        assert_eq!(second.regeneration_count, first.regeneration_count + 1);
        assert_eq!(first.link_id, second.link_id);
    }

    /// §4.5 tier assignment: once a wallet owns an nft link, every other
    /// link created under that same address is also nft tier, by lookup
    /// alone — never by re-checking the balance oracle.
    #[tokio::test]
    async fn wallet_owning_an_nft_link_gets_nft_tier_on_other_links() {
        let dir = tempdir();
        let store = std::sync::Arc::new(LinkStore::open(dir.path(), &test_key()).unwrap());
        let wallet = std::sync::Arc::new(WalletOracle::new(
            "http://127.0.0.1:1".to_string(),
            Duration::from_secs(60),
            1,
            100,
        ));
        let manager = LinkManager::open(store, wallet).await.unwrap();

        let nft_link = manager
            .create_or_regenerate("L-nft".to_string(), "S1".to_string(), Some("0xabc".to_string()), Value::Null)
            .await
            .unwrap();
        manager.promote_to_nft(&nft_link.link_id).await.unwrap();

        let other = manager
            .create_or_regenerate("L-other".to_string(), "S2".to_string(), Some("0xabc".to_string()), Value::Null)
            .await
            .unwrap();

        assert_eq!(other.tier, TierRepr::Nft);
        assert!(other.expires_at_unix.is_none());
    }

    #[tokio::test]
    async fn keep_alive_extends_expiry_on_recent_activity_but_not_when_disabled() {
        let dir = tempdir();
        let store = std::sync::Arc::new(LinkStore::open(dir.path(), &test_key()).unwrap());
        let wallet = std::sync::Arc::new(WalletOracle::new(
            "http://127.0.0.1:1".to_string(),
            Duration::from_secs(60),
            1,
            100,
        ));
        let manager = LinkManager::open(store, wallet).await.unwrap();

        let link = manager
            .create_or_regenerate("L1".to_string(), "S1".to_string(), None, Value::Null)
            .await
            .unwrap();
        assert!(manager.apply_keep_alive_if_due(&link.link_id).await.unwrap().is_none());

        manager.record_activity(&link.link_id).await.unwrap();
        {
            let mut cache = manager.cache.write().await;
            cache.get_mut(&link.link_id).unwrap().keep_alive.enabled = true;
        }

        let extended = manager
            .apply_keep_alive_if_due(&link.link_id)
            .await
            .unwrap()
            .expect("recent activity should satisfy keep-alive");
        assert!(extended.expires_at_unix.unwrap() >= link.expires_at_unix.unwrap());
    }

    #[tokio::test]
    async fn promote_moves_link_between_stores() {
        let dir = tempdir();
        let store = std::sync::Arc::new(LinkStore::open(dir.path(), &test_key()).unwrap());
        let wallet = std::sync::Arc::new(WalletOracle::new(
            "http://127.0.0.1:1".to_string(),
            Duration::from_secs(60),
            1,
            100,
        ));
        let manager = LinkManager::open(store, wallet).await.unwrap();

        manager
            .create_or_regenerate("L1".to_string(), "S1".to_string(), None, Value::Null)
            .await
            .unwrap();

        let promoted = manager.promote_to_nft("L1").await.unwrap().unwrap();
        assert_eq!(promoted.tier, TierRepr::Nft);
        assert!(promoted.expires_at_unix.is_none());

        let all = manager.all_wallet_linked().await;
        assert!(all.iter().all(|l| l.link_id != "L1"), "nft links are excluded from the wallet-linked view");
    }

    fn tempdir() -> tempfile::TempDir {
        tempfile::tempdir().expect("tempdir")
    }

    fn test_key() -> [u8; 32] {
        [7u8; 32]
    }
}
