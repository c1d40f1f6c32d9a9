//! Access/refresh token pair and its expiry rules.

use crate::{ClientStorage, StorageError, StorageKeys, StorageResult};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// An access token is treated as expired this long before its real expiry.
pub const VALIDITY_SKEW_MS: i64 = 30 * 1000;

/// Window in which a still-valid access token counts as expiring soon.
pub const EXPIRING_SOON_WINDOW_MS: i64 = 5 * 60 * 1000;

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Everything the store holds, read in one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    /// Epoch milliseconds.
    pub access_expires_at: Option<i64>,
}

impl TokenPair {
    /// Token present and `now < expires_at - 30s`.
    pub fn is_access_token_valid_at(&self, now_ms: i64) -> bool {
        match (&self.access_token, self.access_expires_at) {
            (Some(_), Some(expires_at)) => now_ms < expires_at - VALIDITY_SKEW_MS,
            _ => false,
        }
    }

    /// Expiry recorded and less than five minutes away. No expiry recorded
    /// means nothing is about to expire.
    pub fn is_expiring_soon_at(&self, now_ms: i64) -> bool {
        match self.access_expires_at {
            Some(expires_at) => expires_at < now_ms + EXPIRING_SOON_WINDOW_MS,
            None => false,
        }
    }

    /// A valid access token, or a refresh token that can mint one.
    pub fn has_usable_session_at(&self, now_ms: i64) -> bool {
        self.is_access_token_valid_at(now_ms) || self.refresh_token.is_some()
    }
}

/// Owns the persisted token pair. Cheap to clone; clones share state.
///
/// Each operation runs under one lock and commits through a single storage
/// group call, so readers never observe a half-written pair.
#[derive(Clone)]
pub struct TokenStore {
    storage: Arc<dyn ClientStorage>,
    lock: Arc<Mutex<()>>,
}

impl TokenStore {
    pub fn new(storage: Arc<dyn ClientStorage>) -> Self {
        Self {
            storage,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Store a freshly issued pair; expiry is `now + expires_in`.
    pub fn set_tokens(
        &self,
        access_token: &str,
        refresh_token: &str,
        expires_in_secs: u64,
    ) -> StorageResult<()> {
        let expires_at = expires_at_from(expires_in_secs).to_string();
        let _guard = self.lock.lock();
        self.storage.set_many(&[
            (StorageKeys::ACCESS_TOKEN, access_token),
            (StorageKeys::REFRESH_TOKEN, refresh_token),
            (StorageKeys::TOKEN_EXPIRES_AT, &expires_at),
        ])?;
        debug!(expires_in_secs, "Stored token pair");
        Ok(())
    }

    /// Replace the access token after renewal; refresh token untouched.
    pub fn update_access_token(&self, access_token: &str, expires_in_secs: u64) -> StorageResult<()> {
        let expires_at = expires_at_from(expires_in_secs).to_string();
        let _guard = self.lock.lock();
        self.storage.set_many(&[
            (StorageKeys::ACCESS_TOKEN, access_token),
            (StorageKeys::TOKEN_EXPIRES_AT, &expires_at),
        ])?;
        debug!(expires_in_secs, "Updated access token");
        Ok(())
    }

    /// Renewal result: new access token, plus a rotated refresh token when
    /// the server issued one. Committed as one group.
    pub fn apply_renewal(
        &self,
        access_token: &str,
        expires_in_secs: u64,
        rotated_refresh_token: Option<&str>,
    ) -> StorageResult<()> {
        match rotated_refresh_token {
            Some(refresh) => self.set_tokens(access_token, refresh, expires_in_secs),
            None => self.update_access_token(access_token, expires_in_secs),
        }
    }

    /// Remove the pair, its expiry and the session snapshot. Idempotent.
    pub fn clear(&self) -> StorageResult<()> {
        let _guard = self.lock.lock();
        self.storage.delete_many(&StorageKeys::ALL)?;
        debug!("Cleared token store");
        Ok(())
    }

    pub fn access_token(&self) -> StorageResult<Option<String>> {
        self.storage.get(StorageKeys::ACCESS_TOKEN)
    }

    pub fn refresh_token(&self) -> StorageResult<Option<String>> {
        self.storage.get(StorageKeys::REFRESH_TOKEN)
    }

    /// Expiry in epoch milliseconds. An unparsable value reads as absent.
    pub fn expires_at(&self) -> StorageResult<Option<i64>> {
        Ok(self
            .storage
            .get(StorageKeys::TOKEN_EXPIRES_AT)?
            .and_then(|raw| raw.trim().parse::<i64>().ok()))
    }

    /// Read the whole pair consistently.
    pub fn snapshot(&self) -> StorageResult<TokenPair> {
        let _guard = self.lock.lock();
        Ok(TokenPair {
            access_token: self.access_token()?,
            refresh_token: self.refresh_token()?,
            access_expires_at: self.expires_at()?,
        })
    }

    pub fn is_access_token_valid(&self) -> StorageResult<bool> {
        Ok(self.snapshot()?.is_access_token_valid_at(now_millis()))
    }

    pub fn is_expiring_soon(&self) -> StorageResult<bool> {
        Ok(self.snapshot()?.is_expiring_soon_at(now_millis()))
    }

    pub fn has_usable_session(&self) -> StorageResult<bool> {
        Ok(self.snapshot()?.has_usable_session_at(now_millis()))
    }

    /// Persist the displayed-session snapshot under `auth-storage`.
    pub fn save_session_snapshot<T: Serialize>(&self, snapshot: &T) -> StorageResult<()> {
        let json =
            serde_json::to_string(snapshot).map_err(|e| StorageError::Encoding(e.to_string()))?;
        let _guard = self.lock.lock();
        self.storage.set(StorageKeys::AUTH_STORAGE, &json)
    }

    /// Load the displayed-session snapshot. A malformed snapshot reads as
    /// absent rather than failing rehydration.
    pub fn load_session_snapshot<T: DeserializeOwned>(&self) -> StorageResult<Option<T>> {
        Ok(self
            .storage
            .get(StorageKeys::AUTH_STORAGE)?
            .and_then(|json| match serde_json::from_str(&json) {
                Ok(value) => Some(value),
                Err(e) => {
                    debug!(error = %e, "Ignoring malformed session snapshot");
                    None
                }
            }))
    }
}

fn expires_at_from(expires_in_secs: u64) -> i64 {
    let delta = i64::try_from(expires_in_secs)
        .unwrap_or(i64::MAX / 1000)
        .saturating_mul(1000);
    now_millis().saturating_add(delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStorage;
    use serde::Deserialize;

    fn create_test_store() -> (TokenStore, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        (TokenStore::new(storage.clone()), storage)
    }

    #[test]
    fn test_set_tokens_derives_expiry() {
        let (store, _) = create_test_store();
        let before = now_millis();
        store.set_tokens("access", "refresh", 900).unwrap();
        let after = now_millis();

        let pair = store.snapshot().unwrap();
        assert_eq!(pair.access_token.as_deref(), Some("access"));
        assert_eq!(pair.refresh_token.as_deref(), Some("refresh"));
        let expires_at = pair.access_expires_at.unwrap();
        assert!(expires_at >= before + 900_000 && expires_at <= after + 900_000);
        assert!(store.is_access_token_valid().unwrap());
        assert!(!store.is_expiring_soon().unwrap());
    }

    #[test]
    fn test_update_access_token_keeps_refresh() {
        let (store, _) = create_test_store();
        store.set_tokens("a1", "r1", 900).unwrap();
        store.update_access_token("a2", 60).unwrap();

        let pair = store.snapshot().unwrap();
        assert_eq!(pair.access_token.as_deref(), Some("a2"));
        assert_eq!(pair.refresh_token.as_deref(), Some("r1"));
        assert!(store.is_expiring_soon().unwrap());
    }

    #[test]
    fn test_apply_renewal_rotates_when_given() {
        let (store, _) = create_test_store();
        store.set_tokens("a1", "r1", 900).unwrap();

        store.apply_renewal("a2", 900, None).unwrap();
        assert_eq!(store.refresh_token().unwrap().as_deref(), Some("r1"));

        store.apply_renewal("a3", 900, Some("r2")).unwrap();
        assert_eq!(store.access_token().unwrap().as_deref(), Some("a3"));
        assert_eq!(store.refresh_token().unwrap().as_deref(), Some("r2"));
    }

    #[test]
    fn test_clear_removes_everything_and_is_idempotent() {
        let (store, storage) = create_test_store();
        store.set_tokens("a", "r", 900).unwrap();
        store.save_session_snapshot(&serde_json::json!({"user": null})).unwrap();
        assert_eq!(storage.len(), 4);

        store.clear().unwrap();
        assert!(storage.is_empty());
        store.clear().unwrap();

        assert_eq!(store.snapshot().unwrap(), TokenPair::default());
        assert!(!store.has_usable_session().unwrap());
    }

    #[test]
    fn test_validity_skew() {
        let now = 1_000_000_000;
        let pair = |expires_at| TokenPair {
            access_token: Some("a".into()),
            refresh_token: None,
            access_expires_at: Some(expires_at),
        };

        assert!(pair(now + VALIDITY_SKEW_MS + 1).is_access_token_valid_at(now));
        assert!(!pair(now + VALIDITY_SKEW_MS).is_access_token_valid_at(now));
        assert!(!pair(now - 1).is_access_token_valid_at(now));
    }

    #[test]
    fn test_expiring_soon_window() {
        let now = 1_000_000_000;
        let mut pair = TokenPair {
            access_token: Some("a".into()),
            refresh_token: Some("r".into()),
            access_expires_at: Some(now + EXPIRING_SOON_WINDOW_MS - 1),
        };
        assert!(pair.is_expiring_soon_at(now));

        pair.access_expires_at = Some(now + EXPIRING_SOON_WINDOW_MS);
        assert!(!pair.is_expiring_soon_at(now));

        pair.access_expires_at = None;
        assert!(!pair.is_expiring_soon_at(now));
    }

    #[test]
    fn test_usable_session_with_only_refresh_token() {
        let pair = TokenPair {
            access_token: Some("expired".into()),
            refresh_token: Some("r".into()),
            access_expires_at: Some(0),
        };
        assert!(!pair.is_access_token_valid_at(now_millis()));
        assert!(pair.has_usable_session_at(now_millis()));
    }

    #[test]
    fn test_missing_expiry_is_invalid() {
        let (store, storage) = create_test_store();
        storage.set(StorageKeys::ACCESS_TOKEN, "a").unwrap();
        assert!(!store.is_access_token_valid().unwrap());

        storage.set(StorageKeys::TOKEN_EXPIRES_AT, "not-a-number").unwrap();
        assert_eq!(store.expires_at().unwrap(), None);
        assert!(!store.is_access_token_valid().unwrap());
    }

    #[test]
    fn test_session_snapshot_roundtrip_and_malformed() {
        #[derive(Serialize, Deserialize, PartialEq, Debug)]
        struct Snapshot {
            username: String,
        }

        let (store, storage) = create_test_store();
        assert_eq!(store.load_session_snapshot::<Snapshot>().unwrap(), None);

        let snapshot = Snapshot {
            username: "admin".into(),
        };
        store.save_session_snapshot(&snapshot).unwrap();
        assert_eq!(store.load_session_snapshot::<Snapshot>().unwrap(), Some(snapshot));

        storage.set(StorageKeys::AUTH_STORAGE, "{not json").unwrap();
        assert_eq!(store.load_session_snapshot::<Snapshot>().unwrap(), None);
    }
}
