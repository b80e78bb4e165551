//! Paired-device credentials and baseline generation.

use std::collections::BTreeMap;

use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::codec::{AuthValue, CodecError};

/// Fields without which a stored identity cannot resume a session.
pub const REQUIRED_FIELDS: [&str; 4] = [
    "noiseKey",
    "signedIdentityKey",
    "signedPreKey",
    "registrationId",
];

/// A partial credential update as emitted by the protocol engine.
pub type CredentialPatch = BTreeMap<String, AuthValue>;

/// Device identity material for one organization.
///
/// Stored as a flat map of top-level fields so engine-specific additions pass
/// through untouched.  Updates are always [merged](Credentials::merge).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(BTreeMap<String, AuthValue>);

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&AuthValue> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<AuthValue>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &AuthValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Shallow merge: every top-level field in `patch` replaces the stored
    /// field of the same name; fields absent from the patch are kept.
    /// Returns the number of fields written.
    pub fn merge(&mut self, patch: CredentialPatch) -> usize {
        let n = patch.len();
        self.0.extend(patch);
        n
    }

    /// Required fields that are missing or null.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        REQUIRED_FIELDS
            .iter()
            .copied()
            .filter(|f| self.0.get(*f).map_or(true, AuthValue::is_null))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }

    /// The account the device is linked to (`me.id`), once paired.
    pub fn linked_identity(&self) -> Option<&str> {
        self.0.get("me")?.get("id")?.as_str()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self, CodecError> {
        match AuthValue::from_json(value)? {
            AuthValue::Object(fields) => Ok(Self(fields)),
            AuthValue::Null => Ok(Self::default()),
            _ => Err(CodecError::InvalidBufferShape),
        }
    }
}

impl From<CredentialPatch> for Credentials {
    fn from(fields: CredentialPatch) -> Self {
        Self(fields)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Baseline generation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Produces a fresh, unpaired identity for an organization.
pub trait CredentialFactory: Send + Sync {
    fn generate(&self) -> Credentials;
}

/// Default factory: X25519 key pairs for the noise, identity and signed
/// pre-key slots, a random registration id and adv secret.  The pre-key
/// signature is produced by the protocol engine during registration.
#[derive(Debug, Default, Clone, Copy)]
pub struct GeneratedCredentials;

impl CredentialFactory for GeneratedCredentials {
    fn generate(&self) -> Credentials {
        let mut rng = OsRng;
        let mut adv_secret = vec![0u8; 32];
        rng.fill_bytes(&mut adv_secret);

        let mut signed_pre_key = BTreeMap::new();
        signed_pre_key.insert("keyPair".to_string(), key_pair());
        signed_pre_key.insert("keyId".to_string(), AuthValue::from(1u32));

        let mut creds = Credentials::new();
        creds.insert("noiseKey", key_pair());
        creds.insert("pairingEphemeralKeyPair", key_pair());
        creds.insert("signedIdentityKey", key_pair());
        creds.insert("signedPreKey", AuthValue::Object(signed_pre_key));
        creds.insert("registrationId", rng.gen_range(1u32..=16383));
        creds.insert("advSecretKey", adv_secret);
        creds.insert("nextPreKeyId", 1u32);
        creds.insert("firstUnuploadedPreKeyId", 1u32);
        creds.insert("accountSyncCounter", 0u32);
        creds.insert("registered", false);
        creds
    }
}

fn key_pair() -> AuthValue {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);
    let mut pair = BTreeMap::new();
    pair.insert("private".to_string(), AuthValue::Bytes(secret.to_bytes().to_vec()));
    pair.insert("public".to_string(), AuthValue::Bytes(public.as_bytes().to_vec()));
    AuthValue::Object(pair)
}
