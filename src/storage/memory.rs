//! In-memory reference implementations of the storage traits.
//!
//! Suitable for tests and single-process deployments. Each store keeps
//! its map in a [`DashMap`]; mutations that must be atomic (backup-code
//! consumption, first-write-wins credential insertion) go through the
//! map's entry locks.

use async_trait::async_trait;
use dashmap::DashMap;
use secrecy::SecretString;
use std::time::SystemTime;
use uuid::Uuid;

use super::{BackupCodeStore, CredentialStore, SecretStore};
use crate::backup::StoredBackupCode;
use crate::error::Result;
use crate::webauthn::WebAuthnCredential;

/// In-memory TOTP secret store.
#[derive(Default)]
pub struct InMemorySecretStore {
    secrets: DashMap<String, SecretString>,
}

impl InMemorySecretStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn get_totp_secret(&self, user_id: &str) -> Result<Option<SecretString>> {
        Ok(self.secrets.get(user_id).map(|s| s.clone()))
    }

    async fn set_totp_secret(&self, user_id: &str, secret: SecretString) -> Result<()> {
        self.secrets.insert(user_id.to_string(), secret);
        Ok(())
    }

    async fn remove_totp_secret(&self, user_id: &str) -> Result<()> {
        self.secrets.remove(user_id);
        Ok(())
    }
}

/// In-memory backup code store.
#[derive(Default)]
pub struct InMemoryBackupCodeStore {
    sets: DashMap<String, Vec<StoredBackupCode>>,
}

impl InMemoryBackupCodeStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BackupCodeStore for InMemoryBackupCodeStore {
    async fn get_entries(&self, user_id: &str) -> Result<Option<Vec<StoredBackupCode>>> {
        Ok(self.sets.get(user_id).map(|entries| entries.clone()))
    }

    async fn replace_set(&self, user_id: &str, entries: Vec<StoredBackupCode>) -> Result<()> {
        self.sets.insert(user_id.to_string(), entries);
        Ok(())
    }

    async fn consume_entry(&self, user_id: &str, entry_id: Uuid, at: SystemTime) -> Result<bool> {
        // get_mut holds the shard lock for the whole read-modify-write,
        // which is what makes the swap atomic.
        let Some(mut entries) = self.sets.get_mut(user_id) else {
            return Ok(false);
        };
        let Some(entry) = entries.iter_mut().find(|e| e.id == entry_id) else {
            return Ok(false);
        };
        if entry.consumed {
            return Ok(false);
        }
        entry.consumed = true;
        entry.consumed_at = Some(at);
        Ok(true)
    }

    async fn remove_set(&self, user_id: &str) -> Result<()> {
        self.sets.remove(user_id);
        Ok(())
    }
}

/// In-memory WebAuthn credential store.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    credentials: DashMap<(String, Vec<u8>), WebAuthnCredential>,
}

impl InMemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn insert_new(&self, credential: WebAuthnCredential) -> Result<bool> {
        let key = (
            credential.relying_party_id.clone(),
            credential.credential_id.clone(),
        );
        match self.credentials.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(credential);
                Ok(true)
            }
        }
    }

    async fn find(
        &self,
        relying_party_id: &str,
        credential_id: &[u8],
    ) -> Result<Option<WebAuthnCredential>> {
        let key = (relying_party_id.to_string(), credential_id.to_vec());
        Ok(self.credentials.get(&key).map(|c| c.clone()))
    }

    async fn list_for_user(
        &self,
        relying_party_id: &str,
        user_handle: &str,
    ) -> Result<Vec<WebAuthnCredential>> {
        Ok(self
            .credentials
            .iter()
            .filter(|entry| {
                entry.key().0 == relying_party_id && entry.value().user_handle == user_handle
            })
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn update_sign_count(
        &self,
        relying_party_id: &str,
        credential_id: &[u8],
        sign_count: u32,
    ) -> Result<()> {
        let key = (relying_party_id.to_string(), credential_id.to_vec());
        if let Some(mut credential) = self.credentials.get_mut(&key) {
            credential.sign_count = sign_count;
        }
        Ok(())
    }

    async fn set_disabled(
        &self,
        relying_party_id: &str,
        credential_id: &[u8],
        disabled: bool,
    ) -> Result<()> {
        let key = (relying_party_id.to_string(), credential_id.to_vec());
        if let Some(mut credential) = self.credentials.get_mut(&key) {
            credential.disabled = disabled;
        }
        Ok(())
    }

    async fn remove(&self, relying_party_id: &str, credential_id: &[u8]) -> Result<()> {
        let key = (relying_party_id.to_string(), credential_id.to_vec());
        self.credentials.remove(&key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(id: &[u8], user: &str) -> WebAuthnCredential {
        WebAuthnCredential {
            credential_id: id.to_vec(),
            public_key: vec![1, 2, 3],
            sign_count: 0,
            relying_party_id: "example.com".to_string(),
            user_handle: user.to_string(),
            created_at: SystemTime::now(),
            disabled: false,
        }
    }

    #[tokio::test]
    async fn secret_store_round_trip() {
        let store = InMemorySecretStore::new();
        assert!(store.get_totp_secret("u1").await.unwrap().is_none());

        store
            .set_totp_secret("u1", SecretString::new("JBSWY3DP".to_string()))
            .await
            .unwrap();
        assert!(store.get_totp_secret("u1").await.unwrap().is_some());

        store.remove_totp_secret("u1").await.unwrap();
        assert!(store.get_totp_secret("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn credential_insert_is_first_write_wins() {
        let store = InMemoryCredentialStore::new();

        assert!(store.insert_new(credential(b"cred-1", "u1")).await.unwrap());
        assert!(!store.insert_new(credential(b"cred-1", "u2")).await.unwrap());

        let found = store.find("example.com", b"cred-1").await.unwrap().unwrap();
        assert_eq!(found.user_handle, "u1");
    }

    #[tokio::test]
    async fn credential_listing_filters_by_user() {
        let store = InMemoryCredentialStore::new();
        store.insert_new(credential(b"cred-1", "u1")).await.unwrap();
        store.insert_new(credential(b"cred-2", "u1")).await.unwrap();
        store.insert_new(credential(b"cred-3", "u2")).await.unwrap();

        assert_eq!(store.list_for_user("example.com", "u1").await.unwrap().len(), 2);
        assert_eq!(store.list_for_user("other.com", "u1").await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn sign_count_and_disable_updates() {
        let store = InMemoryCredentialStore::new();
        store.insert_new(credential(b"cred-1", "u1")).await.unwrap();

        store
            .update_sign_count("example.com", b"cred-1", 7)
            .await
            .unwrap();
        store
            .set_disabled("example.com", b"cred-1", true)
            .await
            .unwrap();

        let found = store.find("example.com", b"cred-1").await.unwrap().unwrap();
        assert_eq!(found.sign_count, 7);
        assert!(found.disabled);
    }
}
