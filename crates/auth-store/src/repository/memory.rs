use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::AuthRepository;
use crate::error::Result;
use crate::record::AuthRecord;

/// In-process repository.  Used by tests and by deployments configured
/// with `storage.backend = "memory"`.
#[derive(Default)]
pub struct MemoryRepository {
    rows: RwLock<HashMap<String, AuthRecord>>,
    key_writes: RwLock<HashMap<String, usize>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous row snapshot for assertions.
    pub fn fetch_now(&self, org_id: &str) -> Option<AuthRecord> {
        self.rows.read().get(org_id).cloned()
    }

    /// Overwrite a row verbatim (seeding corrupted or legacy data in tests).
    pub fn put_raw(&self, record: AuthRecord) {
        self.rows
            .write()
            .insert(record.organization_id.clone(), record);
    }

    /// Number of key-store writes seen for an org.
    pub fn key_writes(&self, org_id: &str) -> usize {
        self.key_writes.read().get(org_id).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    fn with_row<F>(&self, org_id: &str, f: F)
    where
        F: FnOnce(&mut AuthRecord),
    {
        let now = Utc::now();
        let mut rows = self.rows.write();
        let row = rows
            .entry(org_id.to_owned())
            .or_insert_with(|| AuthRecord::empty(org_id, now));
        f(row);
        row.updated_at = now;
    }
}

#[async_trait::async_trait]
impl AuthRepository for MemoryRepository {
    async fn fetch(&self, org_id: &str) -> Result<Option<AuthRecord>> {
        Ok(self.fetch_now(org_id))
    }

    async fn replace_auth(&self, org_id: &str, credentials: &str, keys: &str) -> Result<()> {
        self.with_row(org_id, |row| {
            row.auth_credentials = Some(credentials.to_owned());
            row.auth_keys = Some(keys.to_owned());
            row.is_connected = false;
            row.connected_identifier = None;
        });
        Ok(())
    }

    async fn save_credentials(&self, org_id: &str, credentials: &str) -> Result<()> {
        self.with_row(org_id, |row| row.auth_credentials = Some(credentials.to_owned()));
        Ok(())
    }

    async fn save_keys(&self, org_id: &str, keys: &str) -> Result<()> {
        self.with_row(org_id, |row| row.auth_keys = Some(keys.to_owned()));
        *self.key_writes.write().entry(org_id.to_owned()).or_insert(0) += 1;
        Ok(())
    }

    async fn mark_connected(
        &self,
        org_id: &str,
        identifier: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.with_row(org_id, |row| {
            row.is_connected = true;
            if let Some(id) = identifier {
                row.connected_identifier = Some(id.to_owned());
            }
            row.last_connected_at = Some(at);
        });
        Ok(())
    }

    async fn mark_disconnected(&self, org_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.with_row(org_id, |row| {
            row.is_connected = false;
            row.last_disconnected_at = Some(at);
        });
        Ok(())
    }

    async fn list_connected(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .rows
            .read()
            .values()
            .filter(|r| r.is_connected)
            .map(|r| r.organization_id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn delete(&self, org_id: &str) -> Result<bool> {
        self.key_writes.write().remove(org_id);
        Ok(self.rows.write().remove(org_id).is_some())
    }
}
