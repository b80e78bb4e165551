//! Durable per-organization auth state for the messaging bridge.
//!
//! Each organization owns one persisted record holding the paired-device
//! credentials and the per-peer session key material.  Credentials are
//! updated by *merging* partial patches, key material is written back as a
//! whole map, and every binary field survives storage byte-for-byte through
//! the tagged codec in [`codec`].

pub mod codec;
pub mod credentials;
pub mod error;
pub mod keys;
pub mod record;
pub mod repository;
pub mod store;

pub use codec::{AuthValue, CodecError};
pub use credentials::{CredentialFactory, CredentialPatch, Credentials, GeneratedCredentials};
pub use error::{AuthStoreError, Result};
pub use keys::{decode_key_updates, KeyMap, KeyStore, KeyUpdates};
pub use record::{AuthRecord, ConnectionRecord};
pub use repository::{AuthRepository, MemoryRepository, SqliteRepository};
pub use store::{AuthStateStore, LoadedAuth};
