//! Session PIN gate
//!
//! The PIN is never stored in clear: the store holds the hex SHA-256 of
//! `{userId}:{pin}` under `app_pin_{userId}`.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use sha2::{Digest, Sha256};

use tapkey_core::prelude::*;
use tapkey_core::UserId;

use crate::storage::{self, KeyValueStore};

static PIN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4,8}$").expect("PIN regex pattern is valid"));

pub fn validate_pin(pin: &str) -> Result<()> {
    if PIN_PATTERN.is_match(pin) {
        Ok(())
    } else {
        Err(Error::invalid_pin("PIN must be 4 to 8 digits"))
    }
}

fn digest(user_id: &str, pin: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(b":");
    hasher.update(pin.as_bytes());
    hex::encode(hasher.finalize())
}

pub struct PinGate<K> {
    local: Arc<K>,
    user_id: UserId,
}

impl<K: KeyValueStore> PinGate<K> {
    pub fn new(local: Arc<K>, user_id: impl Into<UserId>) -> Self {
        Self {
            local,
            user_id: user_id.into(),
        }
    }

    async fn stored(&self) -> Result<Option<String>> {
        storage::get_json(self.local.as_ref(), &storage::pin_key(&self.user_id)).await
    }

    pub async fn has_pin(&self) -> Result<bool> {
        Ok(self.stored().await?.is_some())
    }

    /// Set a new PIN. When one is already set, `current` must match it.
    pub async fn set_pin(&self, pin: &str, current: Option<&str>) -> Result<()> {
        validate_pin(pin)?;
        self.require(current).await?;
        storage::set_json(
            self.local.as_ref(),
            &storage::pin_key(&self.user_id),
            &digest(&self.user_id, pin),
        )
        .await?;
        info!("PIN updated for {}", self.user_id);
        Ok(())
    }

    /// Check `pin` against the stored digest. `false` when no PIN is set.
    pub async fn verify_pin(&self, pin: &str) -> Result<bool> {
        match self.stored().await? {
            Some(stored) => Ok(stored == digest(&self.user_id, pin)),
            None => Ok(false),
        }
    }

    /// Gate an action: passes when no PIN is set or `pin` matches.
    pub async fn require(&self, pin: Option<&str>) -> Result<()> {
        let Some(stored) = self.stored().await? else {
            return Ok(());
        };
        match pin {
            None => Err(Error::PinRequired),
            Some(pin) if stored == digest(&self.user_id, pin) => Ok(()),
            Some(_) => {
                warn!("PIN mismatch for {}", self.user_id);
                Err(Error::PinMismatch)
            }
        }
    }

    pub async fn clear_pin(&self, current: &str) -> Result<()> {
        self.require(Some(current)).await?;
        self.local.remove(&storage::pin_key(&self.user_id)).await?;
        info!("PIN cleared for {}", self.user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn gate() -> (PinGate<MemoryStore>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (PinGate::new(Arc::clone(&store), "u1"), store)
    }

    #[test]
    fn test_validate_pin() {
        assert!(validate_pin("1234").is_ok());
        assert!(validate_pin("12345678").is_ok());
        assert!(validate_pin("123").is_err());
        assert!(validate_pin("123456789").is_err());
        assert!(validate_pin("12a4").is_err());
    }

    #[test]
    fn test_digest_is_salted_by_user() {
        assert_ne!(digest("u1", "1234"), digest("u2", "1234"));
        assert_eq!(digest("u1", "1234").len(), 64);
    }

    #[tokio::test]
    async fn test_set_and_verify() {
        let (gate, store) = gate();
        assert!(!gate.has_pin().await.unwrap());
        gate.set_pin("2468", None).await.unwrap();

        assert!(gate.has_pin().await.unwrap());
        assert!(gate.verify_pin("2468").await.unwrap());
        assert!(!gate.verify_pin("1357").await.unwrap());

        let raw = store.get("app_pin_u1").await.unwrap().unwrap();
        assert!(!raw.contains("2468"));
    }

    #[tokio::test]
    async fn test_require() {
        let (gate, _store) = gate();
        gate.require(None).await.unwrap();

        gate.set_pin("2468", None).await.unwrap();
        assert!(matches!(gate.require(None).await, Err(Error::PinRequired)));
        assert!(matches!(
            gate.require(Some("0000")).await,
            Err(Error::PinMismatch)
        ));
        gate.require(Some("2468")).await.unwrap();
    }

    #[tokio::test]
    async fn test_change_requires_current_pin() {
        let (gate, _store) = gate();
        gate.set_pin("2468", None).await.unwrap();
        assert!(gate.set_pin("1111", None).await.is_err());
        assert!(gate.set_pin("1111", Some("9999")).await.is_err());
        gate.set_pin("1111", Some("2468")).await.unwrap();
        assert!(gate.verify_pin("1111").await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_pin() {
        let (gate, _store) = gate();
        gate.set_pin("2468", None).await.unwrap();
        assert!(gate.clear_pin("0000").await.is_err());
        gate.clear_pin("2468").await.unwrap();
        assert!(!gate.has_pin().await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_pin_not_stored() {
        let (gate, store) = gate();
        assert!(matches!(
            gate.set_pin("12", None).await,
            Err(Error::InvalidPin { .. })
        ));
        assert!(store.is_empty());
    }
}
