use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

/// tiers a persistent link can be assigned, ordered lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    Free,
    Wallet,
    Premium,
    Nft,
}

struct CachedBalance {
    balance: u64,
    fetched_at: Instant,
}

/// read-through cache in front of the wallet balance oracle.
///
/// modeled on the reference project's `StaticCredentials` expiry table
/// (`turn-server/src/credentials.rs`): a plain `RwLock`-guarded map, entries
/// aged out by elapsed time rather than a background sweep, since lookups
/// are already on the read path and a sweep thread buys nothing extra here.
pub struct WalletOracle {
    client: reqwest::Client,
    base_url: String,
    ttl: Duration,
    wallet_threshold: u64,
    premium_threshold: u64,
    cache: RwLock<HashMap<String, CachedBalance>>,
}

impl WalletOracle {
    pub fn new(base_url: String, ttl: Duration, wallet_threshold: u64, premium_threshold: u64) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .expect("reqwest client builds with static config"),
            base_url,
            ttl,
            wallet_threshold,
            premium_threshold,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// balance for `wallet_address`, served from cache when fresh.
    /// a failed oracle call falls back to the last known balance if one is
    /// cached (stale is better than wrong-zero for a wallet that was
    /// recently above a tier threshold), otherwise zero.
    pub async fn balance_of(&self, wallet_address: &str) -> u64 {
        if let Some(cached) = self.cache.read().await.get(wallet_address) {
            if cached.fetched_at.elapsed() < self.ttl {
                return cached.balance;
            }
        }

        match self.fetch(wallet_address).await {
            Ok(balance) => {
                self.cache.write().await.insert(
                    wallet_address.to_string(),
                    CachedBalance {
                        balance,
                        fetched_at: Instant::now(),
                    },
                );
                balance
            }
            Err(e) => {
                log::warn!("wallet oracle lookup failed: address={wallet_address}, err={e}");
                self.cache
                    .read()
                    .await
                    .get(wallet_address)
                    .map(|c| c.balance)
                    .unwrap_or(0)
            }
        }
    }

    async fn fetch(&self, wallet_address: &str) -> anyhow::Result<u64> {
        #[derive(serde::Deserialize)]
        struct BalanceResponse {
            balance: u64,
        }

        let url = format!("{}/balance/{}", self.base_url, wallet_address);
        let response = self.client.get(&url).send().await?.error_for_status()?;
        Ok(response.json::<BalanceResponse>().await?.balance)
    }

    /// tier a wallet address qualifies for, `nft` excluded — that tier is
    /// granted by owning a specific NFT, not by balance, and is assigned by
    /// the caller out of band.
    pub async fn tier_of(&self, wallet_address: Option<&str>) -> Tier {
        let Some(address) = wallet_address else {
            return Tier::Free;
        };

        let balance = self.balance_of(address).await;
        if balance >= self.premium_threshold {
            Tier::Premium
        } else if balance >= self.wallet_threshold {
            Tier::Wallet
        } else {
            Tier::Free
        }
    }
}
