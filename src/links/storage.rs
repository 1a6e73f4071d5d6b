use std::collections::HashMap;
use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sled::transaction::Transactional;

use super::PersistentLink;

const REGULAR_TREE: &str = "links";
const NFT_TREE: &str = "nft_links";

/// tree/key backing the notification FIFO (§6's third persisted record).
pub const NOTIFICATIONS_TREE: &str = "notifications";
pub const NOTIFICATIONS_KEY: &str = "log";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("encryption error")]
    Crypto,
    #[error("transaction failed")]
    Transaction,
}

/// encrypted-at-rest persistence for the two link maps (`links`, `nftLinks`
/// in wire terms). Each record is stored as `nonce || ciphertext`, the cipher
/// keyed by a 32-byte secret supplied at startup (see `Config::link_store_key`).
pub struct LinkStore {
    db: sled::Db,
    cipher: Aes256Gcm,
}

impl LinkStore {
    pub fn open(path: &Path, key: &[u8; 32]) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| StoreError::Crypto)?;
        Ok(Self { db, cipher })
    }

    pub fn load_all(&self) -> Result<HashMap<String, PersistentLink>, StoreError> {
        let mut out = HashMap::new();
        for tree_name in [REGULAR_TREE, NFT_TREE] {
            let tree = self.db.open_tree(tree_name)?;
            for entry in tree.iter() {
                let (key, value) = entry?;
                let link_id = String::from_utf8_lossy(&key).to_string();
                let link: PersistentLink = self.decrypt(&value)?;
                out.insert(link_id, link);
            }
        }
        Ok(out)
    }

    /// writes a link to whichever tree matches its current tier, per the
    /// invariant that a `linkId` lives in exactly one store.
    pub fn put(&self, link: &PersistentLink) -> Result<(), StoreError> {
        let tree_name = if link.tier == super::TierRepr::Nft {
            NFT_TREE
        } else {
            REGULAR_TREE
        };
        let other_name = if tree_name == NFT_TREE { REGULAR_TREE } else { NFT_TREE };

        let payload = self.encrypt(link)?;
        self.db.open_tree(tree_name)?.insert(link.link_id.as_bytes(), payload)?;
        self.db.open_tree(other_name)?.remove(link.link_id.as_bytes())?;
        Ok(())
    }

    /// promotes a link to the NFT tree atomically: removed from `links` iff
    /// inserted into `nftLinks`.
    pub fn promote(&self, link: &PersistentLink) -> Result<(), StoreError> {
        let payload = self.encrypt(link)?;
        let regular = self.db.open_tree(REGULAR_TREE)?;
        let nft = self.db.open_tree(NFT_TREE)?;

        (&regular, &nft)
            .transaction(|(regular, nft)| {
                regular.remove(link.link_id.as_bytes())?;
                nft.insert(link.link_id.as_bytes(), payload.clone())?;
                Ok::<_, sled::transaction::ConflictableTransactionError<sled::Error>>(())
            })
            .map_err(|_| StoreError::Transaction)?;

        Ok(())
    }

    pub fn remove(&self, link_id: &str, is_nft: bool) -> Result<(), StoreError> {
        let tree_name = if is_nft { NFT_TREE } else { REGULAR_TREE };
        self.db.open_tree(tree_name)?.remove(link_id.as_bytes())?;
        Ok(())
    }

    /// the third persisted record (§6 "persisted state layout"): an opaque,
    /// encrypted blob under a fixed key in its own tree. Used for the
    /// notification FIFO, which has no per-entry key of its own — unlike
    /// `links`/`nftLinks` it is written and read back as one unit.
    pub fn load_blob<T: serde::de::DeserializeOwned>(&self, tree: &str, key: &str) -> Result<Option<T>, StoreError> {
        let tree = self.db.open_tree(tree)?;
        match tree.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(self.decrypt(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn save_blob<T: serde::Serialize>(&self, tree: &str, key: &str, value: &T) -> Result<(), StoreError> {
        let payload = self.encrypt(value)?;
        self.db.open_tree(tree)?.insert(key.as_bytes(), payload)?;
        Ok(())
    }

    fn encrypt<T: serde::Serialize>(&self, value: &T) -> Result<Vec<u8>, StoreError> {
        let plaintext = serde_json::to_vec(value)?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_ref())
            .map_err(|_| StoreError::Crypto)?;

        let mut out = Vec::with_capacity(nonce.len() + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt<T: serde::de::DeserializeOwned>(&self, stored: &[u8]) -> Result<T, StoreError> {
        if stored.len() < 12 {
            return Err(StoreError::Crypto);
        }
        let (nonce_bytes, ciphertext) = stored.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self.cipher.decrypt(nonce, ciphertext).map_err(|_| StoreError::Crypto)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}

/// decodes a base64-encoded 32-byte key from configuration, or generates a
/// fresh one and logs it once — acceptable for a single-process trial run,
/// not for a node that is expected to restart and read back old state.
pub fn load_or_generate_key(encoded: Option<&str>) -> [u8; 32] {
    if let Some(encoded) = encoded {
        if let Ok(bytes) = BASE64.decode(encoded) {
            if bytes.len() == 32 {
                let mut key = [0u8; 32];
                key.copy_from_slice(&bytes);
                return key;
            }
        }
        log::warn!("SIGNAL_LINK_STORE_KEY is not a valid 32-byte base64 value, generating a new key");
    }

    let mut key = [0u8; 32];
    use rand::RngCore;
    rand::thread_rng().fill_bytes(&mut key);
    log::warn!(
        "no link store key configured; generated an ephemeral key (base64: {}) — \
         set SIGNAL_LINK_STORE_KEY to persist across restarts",
        BASE64.encode(key)
    );
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::{KeepAlive, TierRepr};

    fn sample_link(id: &str) -> PersistentLink {
        PersistentLink {
            link_id: id.to_string(),
            session_id: "S1".to_string(),
            wallet_address: None,
            tier: TierRepr::Free,
            created_at_unix: 0,
            expires_at_unix: Some(86400),
            activity_count: 0,
            last_activity_unix: None,
            keep_alive: KeepAlive::default(),
            regeneration_count: 0,
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn round_trips_through_encryption() {
        let dir = tempfile::tempdir().unwrap();
        let store = LinkStore::open(dir.path(), &[1u8; 32]).unwrap();
        store.put(&sample_link("L1")).unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.get("L1").unwrap().session_id, "S1");
    }

    #[test]
    fn promotion_removes_from_regular_tree() {
        let dir = tempfile::tempdir().unwrap();
        let store = LinkStore::open(dir.path(), &[2u8; 32]).unwrap();
        store.put(&sample_link("L2")).unwrap();

        let mut nft_link = sample_link("L2");
        nft_link.tier = TierRepr::Nft;
        nft_link.expires_at_unix = None;
        store.promote(&nft_link).unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.get("L2").unwrap().tier, TierRepr::Nft);
        assert_eq!(loaded.len(), 1);
    }
}
