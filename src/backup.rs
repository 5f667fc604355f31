//! Single-use backup codes for account recovery.
//!
//! Codes are generated once, handed to the user in grouped form
//! (`xxxx-xxxx-xxxx-xxxx`), and persisted only as salted SHA-256 digests.
//! Consumption is a compare-and-swap through the store so a double
//! submission race admits exactly one winner.

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::SystemTime;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::config::get_env_with_prefix;
use crate::error::Result;
use crate::storage::BackupCodeStore;

// No 0, O, 1, I to avoid confusion
const CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

const SALT_LEN: usize = 16;

/// Configuration for backup code generation.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct BackupCodeConfig {
    /// Number of codes per set (default: 10).
    pub count: usize,
    /// Number of character groups per code (default: 4).
    pub groups: usize,
    /// Characters per group (default: 4).
    pub group_len: usize,
}

impl Default for BackupCodeConfig {
    fn default() -> Self {
        Self {
            count: 10,
            groups: 4,
            group_len: 4,
        }
    }
}

impl BackupCodeConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of codes per set.
    #[must_use]
    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    /// Set the grouped shape of each code.
    #[must_use]
    pub fn with_shape(mut self, groups: usize, group_len: usize) -> Self {
        self.groups = groups;
        self.group_len = group_len;
        self
    }

    /// Load backup code configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(count) = get_env_with_prefix("BACKUP_CODE_COUNT") {
            if let Ok(c) = count.parse() {
                config.count = c;
            }
        }

        config
    }

    fn code_len(&self) -> usize {
        self.groups * self.group_len
    }
}

/// A stored backup code: salt, digest, and consumption state.
///
/// The plaintext exists only in the `generate` return value; this record
/// is all that is ever persisted.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct StoredBackupCode {
    pub id: Uuid,
    pub salt: [u8; SALT_LEN],
    pub digest: [u8; 32],
    pub consumed: bool,
    pub consumed_at: Option<SystemTime>,
    pub created_at: SystemTime,
}

impl StoredBackupCode {
    /// Constant-time check of a normalized submission against this entry.
    fn matches(&self, normalized: &str) -> bool {
        let candidate = digest_code(&self.salt, normalized);
        candidate.ct_eq(&self.digest).into()
    }
}

/// A freshly generated set: plaintext for one-time display plus the
/// entries to persist.
pub struct GeneratedBackupCodes {
    /// Grouped plaintext codes, returned once and never retained.
    pub plaintext: Vec<String>,
    /// Salted digests for storage.
    pub entries: Vec<StoredBackupCode>,
}

/// Salted digest of a normalized code.
fn digest_code(salt: &[u8; SALT_LEN], normalized: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(normalized.as_bytes());
    hasher.finalize().into()
}

/// Normalize a submission: strip group separators, uppercase.
fn normalize(code: &str) -> String {
    code.replace(['-', ' '], "").to_uppercase()
}

/// Manages backup code generation and single-use consumption.
pub struct BackupCodeManager<S: BackupCodeStore> {
    store: S,
    config: BackupCodeConfig,
}

impl<S: BackupCodeStore> BackupCodeManager<S> {
    /// Create a new manager over the given store.
    pub fn new(store: S, config: BackupCodeConfig) -> Self {
        Self { store, config }
    }

    /// Generate a fresh set for a user, replacing any existing set.
    ///
    /// Returns the grouped plaintext codes exactly once. Replacement is
    /// the explicit re-enrollment path; an exhausted set is never
    /// regenerated implicitly.
    pub async fn generate(&self, user_id: &str) -> Result<Vec<String>> {
        let generated = self.generate_set();
        self.store.replace_set(user_id, generated.entries).await?;

        tracing::info!(
            target: "mfa.backup.generated",
            user_id = %user_id,
            count = generated.plaintext.len(),
            "Backup code set generated"
        );

        Ok(generated.plaintext)
    }

    /// Verify a submitted code and consume the matching entry.
    ///
    /// The submission is digested with each unconsumed entry's salt and
    /// compared constant-time; the scan covers every entry regardless of
    /// where a match occurs. On a match the entry is consumed through the
    /// store's compare-and-swap, so of two racing submissions of the same
    /// code exactly one observes success.
    ///
    /// Returns the consumed entry's id, `None` on mismatch (or when the
    /// race was lost), or `Ok(None)`-equivalent enrollment info via
    /// [`has_set`](Self::has_set).
    pub async fn consume(&self, user_id: &str, submitted: &str) -> Result<Option<Uuid>> {
        let entries = match self.store.get_entries(user_id).await? {
            Some(entries) => entries,
            None => return Ok(None),
        };

        let normalized = normalize(submitted);

        // Full scan: no early exit on match position.
        let mut matched = None;
        for entry in &entries {
            let hit = !entry.consumed && entry.matches(&normalized);
            if hit && matched.is_none() {
                matched = Some(entry.id);
            }
        }

        let Some(entry_id) = matched else {
            tracing::debug!(
                target: "mfa.backup.rejected",
                user_id = %user_id,
                "Backup code did not match any unconsumed entry"
            );
            return Ok(None);
        };

        let won = self
            .store
            .consume_entry(user_id, entry_id, SystemTime::now())
            .await?;
        if !won {
            // A concurrent submission consumed the entry first.
            tracing::warn!(
                target: "mfa.backup.race_lost",
                user_id = %user_id,
                "Backup code was consumed concurrently"
            );
            return Ok(None);
        }

        tracing::info!(
            target: "mfa.backup.consumed",
            user_id = %user_id,
            entry_id = %entry_id,
            "Backup code consumed"
        );
        Ok(Some(entry_id))
    }

    /// Whether the user has ever been issued a set.
    pub async fn has_set(&self, user_id: &str) -> Result<bool> {
        Ok(self.store.get_entries(user_id).await?.is_some())
    }

    /// Count of unconsumed codes remaining.
    pub async fn remaining(&self, user_id: &str) -> Result<usize> {
        Ok(self
            .store
            .get_entries(user_id)
            .await?
            .map(|entries| entries.iter().filter(|e| !e.consumed).count())
            .unwrap_or(0))
    }

    /// Remove the user's set entirely (factor removal).
    pub async fn revoke(&self, user_id: &str) -> Result<()> {
        self.store.remove_set(user_id).await
    }

    fn generate_set(&self) -> GeneratedBackupCodes {
        let mut rng = rand::rngs::OsRng;
        let now = SystemTime::now();

        let mut plaintext = Vec::with_capacity(self.config.count);
        let mut entries = Vec::with_capacity(self.config.count);

        for _ in 0..self.config.count {
            let raw: String = (0..self.config.code_len())
                .map(|_| {
                    let idx = rng.gen_range(0..CHARSET.len());
                    CHARSET[idx] as char
                })
                .collect();

            let mut salt = [0u8; SALT_LEN];
            rng.fill_bytes(&mut salt);

            entries.push(StoredBackupCode {
                id: Uuid::new_v4(),
                salt,
                digest: digest_code(&salt, &raw),
                consumed: false,
                consumed_at: None,
                created_at: now,
            });
            plaintext.push(self.group(&raw));
        }

        GeneratedBackupCodes { plaintext, entries }
    }

    /// Format a raw code for transcription (`xxxx-xxxx-xxxx-xxxx`).
    fn group(&self, raw: &str) -> String {
        raw.as_bytes()
            .chunks(self.config.group_len)
            .map(|chunk| std::str::from_utf8(chunk).unwrap_or_default())
            .collect::<Vec<_>>()
            .join("-")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::InMemoryBackupCodeStore;

    fn manager() -> BackupCodeManager<InMemoryBackupCodeStore> {
        BackupCodeManager::new(InMemoryBackupCodeStore::new(), BackupCodeConfig::default())
    }

    #[tokio::test]
    async fn generates_grouped_codes() {
        let manager = manager();
        let codes = manager.generate("user-1").await.unwrap();

        assert_eq!(codes.len(), 10);
        for code in &codes {
            let groups: Vec<&str> = code.split('-').collect();
            assert_eq!(groups.len(), 4);
            assert!(groups.iter().all(|g| g.len() == 4));
        }
        assert_eq!(manager.remaining("user-1").await.unwrap(), 10);
    }

    #[tokio::test]
    async fn consume_is_single_use() {
        let manager = manager();
        let codes = manager.generate("user-1").await.unwrap();

        let first = manager.consume("user-1", &codes[0]).await.unwrap();
        assert!(first.is_some());

        let second = manager.consume("user-1", &codes[0]).await.unwrap();
        assert!(second.is_none());

        assert_eq!(manager.remaining("user-1").await.unwrap(), 9);
    }

    #[tokio::test]
    async fn normalization_accepts_lowercase_and_separators() {
        let manager = manager();
        let codes = manager.generate("user-1").await.unwrap();

        let sloppy = codes[0].to_lowercase().replace('-', " ");
        assert!(manager.consume("user-1", &sloppy).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn invalid_code_rejected() {
        let manager = manager();
        manager.generate("user-1").await.unwrap();

        assert!(manager
            .consume("user-1", "ZZZZ-ZZZZ-ZZZZ-ZZZZ")
            .await
            .unwrap()
            .is_none());
        assert_eq!(manager.remaining("user-1").await.unwrap(), 10);
    }

    #[tokio::test]
    async fn no_set_reports_unenrolled() {
        let manager = manager();

        assert!(!manager.has_set("user-1").await.unwrap());
        assert!(manager
            .consume("user-1", "AAAA-AAAA-AAAA-AAAA")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn exhausted_set_stays_enrolled_and_rejects() {
        let manager = BackupCodeManager::new(
            InMemoryBackupCodeStore::new(),
            BackupCodeConfig::new().with_count(2),
        );
        let codes = manager.generate("user-1").await.unwrap();

        for code in &codes {
            assert!(manager.consume("user-1", code).await.unwrap().is_some());
        }

        assert!(manager.has_set("user-1").await.unwrap());
        assert_eq!(manager.remaining("user-1").await.unwrap(), 0);
        assert!(manager.consume("user-1", &codes[0]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn regeneration_replaces_set() {
        let manager = manager();
        let old = manager.generate("user-1").await.unwrap();
        let new = manager.generate("user-1").await.unwrap();

        assert!(manager.consume("user-1", &old[0]).await.unwrap().is_none());
        assert!(manager.consume("user-1", &new[0]).await.unwrap().is_some());
    }
}
