//! Storage traits for the three persisted factor stores.
//!
//! Implement these for your database layer; [`memory`] provides
//! reference implementations backing the tests and suitable for
//! single-process deployments. Attempt/lockout state is not persisted
//! here: the orchestrator owns it in a fast in-process map, which is
//! reconstructable and defaults to "not locked" on loss.

pub mod memory;

use async_trait::async_trait;
use secrecy::SecretString;
use std::time::SystemTime;
use uuid::Uuid;

use crate::backup::StoredBackupCode;
use crate::error::Result;
use crate::webauthn::WebAuthnCredential;

/// Store for TOTP factor secrets, keyed by user.
///
/// Secrets arrive wrapped in [`SecretString`] and must never be logged;
/// removing a factor destroys the stored secret.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Get the TOTP secret for a user (`None` if not enrolled).
    async fn get_totp_secret(&self, user_id: &str) -> Result<Option<SecretString>>;

    /// Store a TOTP secret at enrollment.
    async fn set_totp_secret(&self, user_id: &str, secret: SecretString) -> Result<()>;

    /// Destroy a user's TOTP secret (factor removal).
    async fn remove_totp_secret(&self, user_id: &str) -> Result<()>;
}

/// Store for backup code hash sets, keyed by user.
#[async_trait]
pub trait BackupCodeStore: Send + Sync {
    /// Get the user's entries (`None` if never enrolled; an exhausted
    /// set is `Some` with every entry consumed).
    async fn get_entries(&self, user_id: &str) -> Result<Option<Vec<StoredBackupCode>>>;

    /// Replace the user's set wholesale (enrollment / regeneration).
    async fn replace_set(&self, user_id: &str, entries: Vec<StoredBackupCode>) -> Result<()>;

    /// Atomically mark an entry consumed if and only if it is currently
    /// unconsumed. Returns whether this call won the swap; concurrent
    /// submissions of the same code must observe exactly one `true`.
    async fn consume_entry(&self, user_id: &str, entry_id: Uuid, at: SystemTime) -> Result<bool>;

    /// Remove the user's set entirely.
    async fn remove_set(&self, user_id: &str) -> Result<()>;
}

/// Store for WebAuthn credentials, keyed by credential id within a
/// relying party and indexed by user handle.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert a new credential. Returns `false` (without writing) when a
    /// credential with this id already exists for the relying party.
    async fn insert_new(&self, credential: WebAuthnCredential) -> Result<bool>;

    /// Look up a credential by relying party and credential id.
    async fn find(
        &self,
        relying_party_id: &str,
        credential_id: &[u8],
    ) -> Result<Option<WebAuthnCredential>>;

    /// List a user's credentials for a relying party.
    async fn list_for_user(
        &self,
        relying_party_id: &str,
        user_handle: &str,
    ) -> Result<Vec<WebAuthnCredential>>;

    /// Persist an updated sign count after a successful assertion.
    async fn update_sign_count(
        &self,
        relying_party_id: &str,
        credential_id: &[u8],
        sign_count: u32,
    ) -> Result<()>;

    /// Disable or re-enable a credential. Disabled credentials never
    /// verify; clone suspicion disables in the same operation that
    /// rejects the assertion.
    async fn set_disabled(
        &self,
        relying_party_id: &str,
        credential_id: &[u8],
        disabled: bool,
    ) -> Result<()>;

    /// Remove a credential (factor removal).
    async fn remove(&self, relying_party_id: &str, credential_id: &[u8]) -> Result<()>;
}
