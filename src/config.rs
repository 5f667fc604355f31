use serde::{Deserialize, Serialize};

use crate::backup::BackupCodeConfig;
use crate::orchestrator::LockoutPolicy;
use crate::totp::TotpConfig;
use crate::webauthn::RelyingPartyConfig;

/// Main configuration for the verification engine.
///
/// Thresholds, code counts, and durations are deployment policy, not
/// product constants: every section has defaults, builder methods, and
/// `PORTCULLIS_`-prefixed environment overrides.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub totp: TotpConfig,
    #[serde(default)]
    pub backup: BackupCodeConfig,
    #[serde(default)]
    pub relying_party: RelyingPartyConfig,
    #[serde(default)]
    pub lockout: LockoutPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            totp: TotpConfig::default(),
            backup: BackupCodeConfig::default(),
            relying_party: RelyingPartyConfig::default(),
            lockout: LockoutPolicy::default(),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables with the
    /// `PORTCULLIS_` prefix, starting from defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            totp: TotpConfig::from_env(),
            backup: BackupCodeConfig::from_env(),
            relying_party: RelyingPartyConfig::from_env(),
            lockout: LockoutPolicy::from_env(),
        }
    }

    #[must_use]
    pub fn with_totp(mut self, totp: TotpConfig) -> Self {
        self.totp = totp;
        self
    }

    #[must_use]
    pub fn with_backup(mut self, backup: BackupCodeConfig) -> Self {
        self.backup = backup;
        self
    }

    #[must_use]
    pub fn with_relying_party(mut self, relying_party: RelyingPartyConfig) -> Self {
        self.relying_party = relying_party;
        self
    }

    #[must_use]
    pub fn with_lockout(mut self, lockout: LockoutPolicy) -> Self {
        self.lockout = lockout;
        self
    }
}

/// Read a `PORTCULLIS_`-prefixed environment variable.
pub(crate) fn get_env_with_prefix(name: &str) -> Option<String> {
    std::env::var(format!("PORTCULLIS_{}", name)).ok()
}
