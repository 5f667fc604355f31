//! TOTP (Time-based One-Time Password) issuance and verification.
//!
//! Secrets are generated from the OS CSPRNG (160 bits, base32-encoded for
//! the `otpauth://` provisioning URI) and verified against a sliding
//! window of time-step counters. Verification reports *which* counter
//! matched so the orchestrator can reject replays of an already-accepted
//! counter.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use totp_rs::{Algorithm, Secret, TOTP};

use crate::config::get_env_with_prefix;
use crate::error::{MfaError, Result};

/// Configuration for TOTP generation.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TotpConfig {
    /// Issuer name shown in authenticator apps (e.g., "MyApp").
    pub issuer: String,
    /// Number of digits in the code (6-8, default: 6).
    pub digits: usize,
    /// Time step in seconds (default: 30).
    pub step: u64,
    /// Accepted skew in steps on either side of the current counter
    /// (default: 1). A window of 0 rejects clock-skewed clients.
    pub window: u64,
    /// HMAC algorithm (default: SHA1 for authenticator-app compatibility).
    #[serde(skip, default = "default_algorithm")]
    pub algorithm: Algorithm,
}

fn default_algorithm() -> Algorithm {
    Algorithm::SHA1
}

impl Default for TotpConfig {
    fn default() -> Self {
        Self {
            issuer: "App".to_string(),
            digits: 6,
            step: 30,
            window: 1,
            algorithm: Algorithm::SHA1,
        }
    }
}

impl TotpConfig {
    /// Create a new TOTP config with the given issuer name.
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            ..Default::default()
        }
    }

    /// Set the number of digits.
    #[must_use]
    pub fn digits(mut self, digits: usize) -> Self {
        self.digits = digits;
        self
    }

    /// Set the time step in seconds.
    #[must_use]
    pub fn step(mut self, step: u64) -> Self {
        self.step = step;
        self
    }

    /// Set the accepted skew window in steps.
    #[must_use]
    pub fn window(mut self, window: u64) -> Self {
        self.window = window;
        self
    }

    /// Load TOTP configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(issuer) = get_env_with_prefix("TOTP_ISSUER") {
            config.issuer = issuer;
        }
        if let Some(digits) = get_env_with_prefix("TOTP_DIGITS") {
            if let Ok(d) = digits.parse() {
                config.digits = d;
            }
        }
        if let Some(step) = get_env_with_prefix("TOTP_STEP_SECONDS") {
            if let Ok(s) = step.parse() {
                config.step = s;
            }
        }
        if let Some(window) = get_env_with_prefix("TOTP_WINDOW") {
            if let Ok(w) = window.parse() {
                config.window = w;
            }
        }

        config
    }
}

/// Data returned when provisioning TOTP for a user.
///
/// The secret (and the URI embedding it) exists in plaintext only here,
/// at provisioning time. Store the secret via a [`SecretStore`] and drop
/// this value; it is never reconstructable from engine state.
///
/// [`SecretStore`]: crate::storage::SecretStore
pub struct TotpProvisioning {
    /// Base32-encoded secret, wrapped so it cannot end up in logs.
    pub secret: SecretString,
    /// Provisioning URI for authenticator apps (`otpauth://totp/...`).
    pub uri: String,
}

/// Issues enrollment secrets and verifies submitted codes.
#[derive(Clone)]
pub struct TotpEngine {
    config: TotpConfig,
}

impl TotpEngine {
    /// Create a new TOTP engine with the given configuration.
    pub fn new(config: TotpConfig) -> Self {
        Self { config }
    }

    /// Generate a fresh secret and provisioning URI for an account.
    pub fn provision(&self, account_label: &str) -> Result<TotpProvisioning> {
        let secret = Secret::generate_secret();
        let secret_base32 = secret.to_encoded().to_string();

        let totp = self.build_totp(&secret_base32, account_label)?;
        let uri = totp.get_url();

        Ok(TotpProvisioning {
            secret: SecretString::new(secret_base32),
            uri,
        })
    }

    /// Verify a submitted code against the current wall-clock time.
    ///
    /// See [`verify_at`](Self::verify_at).
    pub fn verify(
        &self,
        secret: &SecretString,
        code: &str,
        account_label: &str,
    ) -> Result<Option<u64>> {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|e| MfaError::provisioning(format!("system clock before epoch: {}", e)))?
            .as_secs();
        self.verify_at(secret, code, account_label, now)
    }

    /// Verify a submitted code at an explicit unix timestamp.
    ///
    /// Checks every counter in `[T - window, T + window]` where
    /// `T = at_time / step`, comparing in constant time. Returns the
    /// counter that matched (`None` if no candidate did) so the caller
    /// can enforce per-counter replay rejection; the engine itself keeps
    /// no attempt state.
    pub fn verify_at(
        &self,
        secret: &SecretString,
        code: &str,
        account_label: &str,
        at_time: u64,
    ) -> Result<Option<u64>> {
        let totp = self.build_totp(secret.expose_secret(), account_label)?;

        // Clean the code (remove spaces, dashes)
        let code = code.replace([' ', '-'], "");

        let current = at_time / self.config.step;
        let start = current.saturating_sub(self.config.window);
        let end = current.saturating_add(self.config.window);

        // Scan the whole window even after a hit; the submitted code is
        // compared constant-time against every candidate.
        let mut matched = None;
        for counter in start..=end {
            let candidate = totp.generate(counter * self.config.step);
            let equal: bool = candidate.as_bytes().ct_eq(code.as_bytes()).into();
            if equal && matched.is_none() {
                matched = Some(counter);
            }
        }

        if matched.is_none() {
            tracing::debug!(
                target: "mfa.totp.rejected",
                window = self.config.window,
                "TOTP code did not match any counter in the window"
            );
        }

        Ok(matched)
    }

    /// Generate the code for an explicit unix timestamp.
    ///
    /// Server-side generation is only appropriate for enrollment
    /// previews and tests; verification should always go through
    /// [`verify_at`](Self::verify_at).
    pub fn generate_at(
        &self,
        secret: &SecretString,
        account_label: &str,
        at_time: u64,
    ) -> Result<String> {
        let totp = self.build_totp(secret.expose_secret(), account_label)?;
        Ok(totp.generate(at_time))
    }

    fn build_totp(&self, secret: &str, account_label: &str) -> Result<TOTP> {
        TOTP::new(
            self.config.algorithm,
            self.config.digits,
            self.config.window as u8,
            self.config.step,
            Secret::Encoded(secret.to_string())
                .to_bytes()
                .map_err(|e| MfaError::provisioning(format!("invalid TOTP secret: {:?}", e)))?,
            Some(self.config.issuer.clone()),
            account_label.to_string(),
        )
        .map_err(|e| MfaError::provisioning(format!("failed to build TOTP: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> TotpEngine {
        TotpEngine::new(TotpConfig::new("TestApp"))
    }

    fn provisioned() -> (TotpEngine, SecretString) {
        let engine = engine();
        let provisioning = engine.provision("user@example.com").unwrap();
        (engine, provisioning.secret)
    }

    #[test]
    fn provision_produces_otpauth_uri() {
        let engine = engine();
        let provisioning = engine.provision("user@example.com").unwrap();

        assert!(provisioning.uri.starts_with("otpauth://totp/"));
        assert!(provisioning.uri.contains("issuer=TestApp"));
        assert!(!provisioning.secret.expose_secret().is_empty());
    }

    #[test]
    fn code_verifies_within_same_step() {
        let (engine, secret) = provisioned();

        let code = engine.generate_at(&secret, "user@example.com", 0).unwrap();
        let matched = engine
            .verify_at(&secret, &code, "user@example.com", 15)
            .unwrap();
        assert_eq!(matched, Some(0));
    }

    #[test]
    fn code_verifies_one_step_either_side() {
        let (engine, secret) = provisioned();

        // Code for counter 2 (t in [60, 90)).
        let code = engine.generate_at(&secret, "user@example.com", 65).unwrap();

        // One step earlier and one step later both accept it.
        assert_eq!(
            engine
                .verify_at(&secret, &code, "user@example.com", 35)
                .unwrap(),
            Some(2)
        );
        assert_eq!(
            engine
                .verify_at(&secret, &code, "user@example.com", 95)
                .unwrap(),
            Some(2)
        );
    }

    #[test]
    fn code_rejected_outside_window() {
        let (engine, secret) = provisioned();

        // Counter-0 code two steps later: outside the ±1 window.
        let code = engine.generate_at(&secret, "user@example.com", 15).unwrap();
        assert_eq!(
            engine
                .verify_at(&secret, &code, "user@example.com", 65)
                .unwrap(),
            None
        );

        // A fresh code for counter 2 verifies at the same instant.
        let fresh = engine.generate_at(&secret, "user@example.com", 65).unwrap();
        assert_eq!(
            engine
                .verify_at(&secret, &fresh, "user@example.com", 65)
                .unwrap(),
            Some(2)
        );
    }

    #[test]
    fn zero_window_rejects_skewed_clients() {
        let engine = TotpEngine::new(TotpConfig::new("TestApp").window(0));
        let provisioning = engine.provision("user@example.com").unwrap();
        let secret = provisioning.secret;

        let code = engine.generate_at(&secret, "user@example.com", 0).unwrap();
        assert_eq!(
            engine
                .verify_at(&secret, &code, "user@example.com", 15)
                .unwrap(),
            Some(0)
        );
        assert_eq!(
            engine
                .verify_at(&secret, &code, "user@example.com", 35)
                .unwrap(),
            None
        );
    }

    #[test]
    fn code_with_spaces_and_dashes_accepted() {
        let (engine, secret) = provisioned();

        let code = engine.generate_at(&secret, "user@example.com", 15).unwrap();
        let spaced = format!("{} {}", &code[..3], &code[3..]);
        assert!(engine
            .verify_at(&secret, &spaced, "user@example.com", 15)
            .unwrap()
            .is_some());
    }

    #[test]
    fn wrong_code_rejected() {
        let (engine, secret) = provisioned();

        assert_eq!(
            engine
                .verify_at(&secret, "000000", "user@example.com", 15)
                .unwrap(),
            None
        );
    }
}
