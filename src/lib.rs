//! Portcullis - a second-factor credential verification engine
//!
//! Portcullis implements the credential-verification core of an
//! account-security layer: TOTP issuance and verification, WebAuthn-style
//! public-key credential ceremonies, single-use backup codes, and an MFA
//! orchestrator that enforces attempt limits and lockout. It performs no
//! network I/O and renders no UI; the session layer hands it a pending
//! authentication context and gets back a typed verdict.
//!
//! # Features
//!
//! - **TOTP**: RFC 6238 codes over a configurable sliding window, with
//!   per-counter replay rejection and `otpauth://` provisioning URIs
//! - **WebAuthn**: single-use origin-bound challenges, ES256/RS256
//!   signature verification, sign-count clone detection, pluggable
//!   attestation trust
//! - **Backup codes**: grouped single-use recovery codes stored as
//!   salted digests, with race-safe consumption
//! - **Orchestration**: per-user serialized attempt counting, rolling
//!   failure windows, doubling lockouts, injected event sinks
//! - **Storage**: `async` store traits with in-memory reference
//!   implementations
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use portcullis::{
//!     EngineConfig, FactorPayload, MfaOrchestrator, NoopEvents, VerificationRequest,
//! };
//! use portcullis::storage::memory::{
//!     InMemoryBackupCodeStore, InMemoryCredentialStore, InMemorySecretStore,
//! };
//!
//! #[tokio::main]
//! async fn main() -> portcullis::Result<()> {
//!     portcullis::init_tracing();
//!
//!     let orchestrator = MfaOrchestrator::new(
//!         EngineConfig::from_env(),
//!         InMemorySecretStore::new(),
//!         InMemoryBackupCodeStore::new(),
//!         InMemoryCredentialStore::new(),
//!         Arc::new(NoopEvents),
//!     );
//!
//!     let provisioning = orchestrator.enroll_totp("user-1", "user@example.com").await?;
//!     println!("scan this: {}", provisioning.uri);
//!
//!     let outcome = orchestrator
//!         .verify(&VerificationRequest {
//!             user_id: "user-1".to_string(),
//!             payload: FactorPayload::Totp { code: "123456".to_string() },
//!         })
//!         .await?;
//!     println!("verified: {}", outcome.verified);
//!     Ok(())
//! }
//! ```

pub mod backup;
mod config;
mod error;
pub mod orchestrator;
pub mod storage;
pub mod totp;
pub mod webauthn;

// Re-exports for public API
pub use backup::{BackupCodeConfig, BackupCodeManager, StoredBackupCode};
pub use config::EngineConfig;
pub use error::{DenialReason, MfaError, Result};
pub use orchestrator::{
    transition, AttemptSnapshot, CredentialCompromisedEvent, EventSink, FactorKind,
    FactorPayload, LockoutEvent, LockoutPolicy, MfaEvent, MfaOrchestrator, MfaState, NoopEvents,
    VerificationOutcome, VerificationRequest, VerifiedEvent,
};
pub use totp::{TotpConfig, TotpEngine, TotpProvisioning};
pub use webauthn::{
    AcceptAllAttestation, AcceptNoneAttestation, AttestationVerifier, CeremonyEngine,
    RelyingPartyConfig, WebAuthnCredential,
};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging with sensible defaults
///
/// This should be called early in your application, typically in main()
/// before constructing the orchestrator.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Set log level (e.g., "info", "debug", "portcullis=debug")
/// - `PORTCULLIS_LOG_JSON`: Set to "true" for JSON formatted logs
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_logs = std::env::var("PORTCULLIS_LOG_JSON")
        .map(|v| v.parse::<bool>().unwrap_or(false))
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
