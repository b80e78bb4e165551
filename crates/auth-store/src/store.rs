//! The auth-state store: load, merge, reset.
//!
//! Every mutation of an organization's row goes through a per-org async
//! write lock so read-merge-write cycles for the same organization never
//! interleave.  Organizations never contend with each other.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;

use ob_domain::trace::TraceEvent;

use crate::credentials::{CredentialFactory, CredentialPatch, Credentials, GeneratedCredentials};
use crate::error::Result;
use crate::keys::{decode_key_map, encode_key_map, KeyMap, KeyStore};
use crate::record::ConnectionRecord;
use crate::repository::AuthRepository;

/// Credentials plus a live key-store handle for one organization.
pub struct LoadedAuth {
    pub credentials: Credentials,
    pub key_store: KeyStore,
    /// No row existed; a baseline was written.
    pub created: bool,
    /// The stored credentials were unusable and were regenerated.
    pub corrupted: bool,
}

pub struct AuthStateStore {
    repo: Arc<dyn AuthRepository>,
    factory: Arc<dyn CredentialFactory>,
    write_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl AuthStateStore {
    pub fn new(repo: Arc<dyn AuthRepository>, factory: Arc<dyn CredentialFactory>) -> Self {
        Self {
            repo,
            factory,
            write_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Store using the default X25519 baseline generator.
    pub fn with_generated_credentials(repo: Arc<dyn AuthRepository>) -> Self {
        Self::new(repo, Arc::new(GeneratedCredentials))
    }

    pub fn repository(&self) -> &Arc<dyn AuthRepository> {
        &self.repo
    }

    fn write_lock(&self, org_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.write_locks
            .lock()
            .entry(org_id.to_owned())
            .or_default()
            .clone()
    }

    /// Load the org's credentials and key store, creating a baseline when no
    /// row exists and regenerating one when the stored credentials are
    /// corrupted.
    pub async fn load(&self, org_id: &str) -> Result<LoadedAuth> {
        let lock = self.write_lock(org_id);
        let _guard = lock.lock().await;

        let record = self.repo.fetch(org_id).await?;
        let (credentials, keys, created, corrupted) = match record {
            None => {
                let creds = self.factory.generate();
                self.write_baseline(org_id, &creds).await?;
                (creds, KeyMap::new(), true, false)
            }
            Some(row) => match decode_credentials(row.auth_credentials.as_deref()) {
                Ok(creds) if creds.is_complete() => {
                    let keys = match row.auth_keys.as_deref().map(decode_key_map) {
                        Some(Ok(keys)) => keys,
                        Some(Err(e)) => {
                            tracing::warn!(org_id = %org_id, error = %e, "stored key material unreadable, starting with empty key store");
                            KeyMap::new()
                        }
                        None => KeyMap::new(),
                    };
                    (creds, keys, false, false)
                }
                outcome => {
                    match &outcome {
                        Ok(creds) => tracing::warn!(
                            org_id = %org_id,
                            missing = ?creds.missing_fields(),
                            "stored credentials incomplete, regenerating baseline"
                        ),
                        Err(e) => tracing::warn!(
                            org_id = %org_id,
                            error = %e,
                            "stored credentials undecodable, regenerating baseline"
                        ),
                    }
                    let creds = self.factory.generate();
                    self.write_baseline(org_id, &creds).await?;
                    (creds, KeyMap::new(), false, true)
                }
            },
        };

        let key_entries = keys.values().map(|b| b.len()).sum();
        TraceEvent::AuthStateLoaded {
            org_id: org_id.to_owned(),
            created,
            corrupted,
            key_entries,
        }
        .emit();

        Ok(LoadedAuth {
            credentials,
            key_store: KeyStore::new(org_id, keys, self.repo.clone()),
            created,
            corrupted,
        })
    }

    /// Merge `patch` over the persisted credentials and write the result.
    ///
    /// The persisted row is re-read under the org lock, so a patch never
    /// regresses fields written by an earlier patch.
    pub async fn save_credentials(&self, org_id: &str, patch: CredentialPatch) -> Result<Credentials> {
        let lock = self.write_lock(org_id);
        let _guard = lock.lock().await;

        let stored = self.repo.fetch(org_id).await?;
        let mut creds = match decode_credentials(stored.as_ref().and_then(|r| r.auth_credentials.as_deref())) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(org_id = %org_id, error = %e, "persisted credentials undecodable, merging onto empty map");
                Credentials::new()
            }
        };

        let fields = creds.merge(patch);
        let encoded = serde_json::to_string(&creds.to_json())?;
        self.repo.save_credentials(org_id, &encoded).await?;

        TraceEvent::CredentialsMerged {
            org_id: org_id.to_owned(),
            fields,
        }
        .emit();
        Ok(creds)
    }

    /// Wipe an organization back to an unpaired state: fresh (or supplied)
    /// credentials, empty key store, `is_connected = false`.
    pub async fn reset(&self, org_id: &str, fresh: Option<Credentials>, reason: &str) -> Result<Credentials> {
        let lock = self.write_lock(org_id);
        let _guard = lock.lock().await;

        let creds = fresh.unwrap_or_else(|| self.factory.generate());
        self.write_baseline(org_id, &creds).await?;

        TraceEvent::AuthStateReset {
            org_id: org_id.to_owned(),
            reason: reason.to_owned(),
        }
        .emit();
        Ok(creds)
    }

    /// Decoded credentials as currently persisted, without creating a row.
    pub async fn credentials(&self, org_id: &str) -> Result<Option<Credentials>> {
        let Some(row) = self.repo.fetch(org_id).await? else {
            return Ok(None);
        };
        Ok(Some(decode_credentials(row.auth_credentials.as_deref())?))
    }

    pub async fn mark_connected(&self, org_id: &str, identifier: Option<&str>) -> Result<()> {
        self.repo.mark_connected(org_id, identifier, Utc::now()).await
    }

    pub async fn mark_disconnected(&self, org_id: &str) -> Result<()> {
        self.repo.mark_disconnected(org_id, Utc::now()).await
    }

    pub async fn connection_record(&self, org_id: &str) -> Result<Option<ConnectionRecord>> {
        Ok(self.repo.fetch(org_id).await?.map(|r| r.connection()))
    }

    pub async fn connected_orgs(&self) -> Result<Vec<String>> {
        self.repo.list_connected().await
    }

    /// Remove the org's row entirely (organization teardown).
    pub async fn delete(&self, org_id: &str) -> Result<bool> {
        let lock = self.write_lock(org_id);
        let existed = {
            let _guard = lock.lock().await;
            self.repo.delete(org_id).await?
        };
        self.write_locks.lock().remove(org_id);
        Ok(existed)
    }

    async fn write_baseline(&self, org_id: &str, creds: &Credentials) -> Result<()> {
        let creds_json = serde_json::to_string(&creds.to_json())?;
        let keys_json = encode_key_map(&KeyMap::new())?;
        self.repo.replace_auth(org_id, &creds_json, &keys_json).await
    }
}

fn decode_credentials(raw: Option<&str>) -> Result<Credentials> {
    let Some(raw) = raw else {
        return Ok(Credentials::new());
    };
    let value: serde_json::Value = serde_json::from_str(raw)?;
    Ok(Credentials::from_json(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::AuthValue;
    use crate::record::AuthRecord;
    use crate::repository::MemoryRepository;
    use std::collections::BTreeMap;

    fn store() -> (Arc<MemoryRepository>, AuthStateStore) {
        let repo = Arc::new(MemoryRepository::new());
        let store = AuthStateStore::with_generated_credentials(repo.clone());
        (repo, store)
    }

    fn me_patch(id: &str) -> CredentialPatch {
        let mut me = BTreeMap::new();
        me.insert("id".to_string(), AuthValue::from(id));
        let mut patch = CredentialPatch::new();
        patch.insert("me".into(), AuthValue::Object(me));
        patch
    }

    #[tokio::test]
    async fn first_load_creates_baseline_row() {
        let (repo, store) = store();
        let loaded = store.load("org1").await.unwrap();
        assert!(loaded.created);
        assert!(!loaded.corrupted);
        assert!(loaded.credentials.is_complete());

        let row = repo.fetch_now("org1").unwrap();
        assert!(!row.is_connected);
        assert!(row.auth_credentials.is_some());
    }

    #[tokio::test]
    async fn second_load_returns_same_credentials() {
        let (_repo, store) = store();
        let first = store.load("org1").await.unwrap();
        let second = store.load("org1").await.unwrap();
        assert!(!second.created);
        assert_eq!(first.credentials, second.credentials);
    }

    #[tokio::test]
    async fn merge_preserves_previously_stored_fields() {
        let (_repo, store) = store();
        let loaded = store.load("org1").await.unwrap();

        store.save_credentials("org1", me_patch("15551234567@s.whatsapp.net")).await.unwrap();
        let mut second = CredentialPatch::new();
        second.insert("registered".into(), AuthValue::Bool(true));
        store.save_credentials("org1", second).await.unwrap();

        let reloaded = store.load("org1").await.unwrap().credentials;
        assert_eq!(reloaded.linked_identity(), Some("15551234567@s.whatsapp.net"));
        assert_eq!(reloaded.get("registered"), Some(&AuthValue::Bool(true)));
        for field in ["noiseKey", "signedIdentityKey", "signedPreKey", "registrationId", "advSecretKey"] {
            assert_eq!(reloaded.get(field), loaded.credentials.get(field), "field {field} changed");
        }
    }

    #[tokio::test]
    async fn incomplete_credentials_are_regenerated() {
        let (repo, store) = store();
        let mut row = AuthRecord::empty("org1", Utc::now());
        row.auth_credentials = Some(r#"{"me":{"id":"x"}}"#.into());
        row.auth_keys = Some(r#"{"session":{"a":{"type":"Buffer","data":"AQ=="}}}"#.into());
        repo.put_raw(row);

        let loaded = store.load("org1").await.unwrap();
        assert!(loaded.corrupted);
        assert!(loaded.credentials.is_complete());
        assert!(loaded.key_store.is_empty().await);
        let persisted = store.credentials("org1").await.unwrap().unwrap();
        assert_eq!(persisted, loaded.credentials);
    }

    #[tokio::test]
    async fn undecodable_credentials_are_regenerated() {
        let (repo, store) = store();
        let mut row = AuthRecord::empty("org1", Utc::now());
        row.auth_credentials = Some("not json".into());
        repo.put_raw(row);

        let loaded = store.load("org1").await.unwrap();
        assert!(loaded.corrupted);
        assert!(loaded.credentials.is_complete());
    }

    #[tokio::test]
    async fn reset_wipes_keys_and_connection_flag() {
        let (repo, store) = store();
        let loaded = store.load("org1").await.unwrap();
        let mut updates = crate::keys::KeyUpdates::new();
        updates.entry("session".into()).or_default().insert("peer".into(), Some(AuthValue::Bytes(vec![7; 64])));
        loaded.key_store.set(updates).await.unwrap();
        store.mark_connected("org1", Some("15550001111")).await.unwrap();

        let fresh = store.reset("org1", None, "logged_out").await.unwrap();
        assert_ne!(fresh, loaded.credentials);

        let row = repo.fetch_now("org1").unwrap();
        assert!(!row.is_connected);
        assert!(row.connected_identifier.is_none());
        let reloaded = store.load("org1").await.unwrap();
        assert!(reloaded.key_store.is_empty().await);
        assert_eq!(reloaded.credentials, fresh);
    }

    #[tokio::test]
    async fn reset_accepts_supplied_credentials() {
        let (_repo, store) = store();
        let supplied = GeneratedCredentials.generate();
        store.reset("org1", Some(supplied.clone()), "corrupted").await.unwrap();
        assert_eq!(store.credentials("org1").await.unwrap(), Some(supplied));
    }

    #[tokio::test]
    async fn concurrent_patches_are_all_applied() {
        let (_repo, store) = store();
        let store = Arc::new(store);
        store.load("org1").await.unwrap();

        let mut handles = Vec::new();
        for i in 0..16u32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut patch = CredentialPatch::new();
                patch.insert(format!("field{i}"), AuthValue::from(i));
                store.save_credentials("org1", patch).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let creds = store.credentials("org1").await.unwrap().unwrap();
        for i in 0..16u32 {
            assert_eq!(creds.get(&format!("field{i}")).and_then(AuthValue::as_u64), Some(i as u64));
        }
    }

    #[tokio::test]
    async fn delete_removes_row() {
        let (repo, store) = store();
        store.load("org1").await.unwrap();
        assert!(store.delete("org1").await.unwrap());
        assert!(repo.is_empty());
        assert!(store.connection_record("org1").await.unwrap().is_none());
    }
}
