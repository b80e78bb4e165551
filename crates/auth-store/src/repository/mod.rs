//! Storage backends for the per-organization auth row.

mod memory;
mod sqlite;

pub use memory::MemoryRepository;
pub use sqlite::SqliteRepository;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::record::AuthRecord;

/// Column-granular access to `bridge_auth_state`.
///
/// Writers touch only the columns they own so a key-store flush never
/// clobbers a concurrent credential merge and vice versa.  Every write
/// creates the row if it does not exist yet.
#[async_trait::async_trait]
pub trait AuthRepository: Send + Sync {
    async fn fetch(&self, org_id: &str) -> Result<Option<AuthRecord>>;

    /// Replace credentials and keys together and force the row to the
    /// disconnected, unpaired state.  Used for baselines and wipes.
    async fn replace_auth(&self, org_id: &str, credentials: &str, keys: &str) -> Result<()>;

    async fn save_credentials(&self, org_id: &str, credentials: &str) -> Result<()>;

    async fn save_keys(&self, org_id: &str, keys: &str) -> Result<()>;

    async fn mark_connected(
        &self,
        org_id: &str,
        identifier: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<()>;

    async fn mark_disconnected(&self, org_id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Organization ids whose row says `is_connected = true`.
    async fn list_connected(&self) -> Result<Vec<String>>;

    /// Remove the row.  Returns whether a row existed.
    async fn delete(&self, org_id: &str) -> Result<bool>;
}
