//! Pluggable attestation trust verification.
//!
//! Transport-level attestation-certificate chain validation is outside
//! the ceremony engine: formats differ (packed, tpm, android-key, ...)
//! and deployments differ in which they trust. The engine hands every
//! registration's attestation statement to an injected
//! [`AttestationVerifier`] and proceeds only when it accepts.

use ciborium::value::Value as CborValue;

use crate::error::{MfaError, Result};

/// Everything a verifier needs to judge an attestation statement.
pub struct AttestationContext<'a> {
    /// Attestation format identifier (`none`, `packed`, ...).
    pub format: &'a str,
    /// The format-specific attestation statement.
    pub statement: &'a CborValue,
    /// Raw authenticator data, the signed portion of most formats.
    pub auth_data: &'a [u8],
    /// SHA-256 of the client data JSON, the other signed portion.
    pub client_data_hash: &'a [u8; 32],
}

/// Capability interface for attestation trust decisions.
///
/// Implementations are per-format policies, not a hierarchy: match on
/// `context.format` and validate the statement for the formats you
/// trust, rejecting the rest.
pub trait AttestationVerifier: Send + Sync {
    fn verify(&self, context: &AttestationContext<'_>) -> Result<()>;
}

/// Accepts only the `none` attestation format.
///
/// The right default for deployments that want possession of the key,
/// not provenance of the authenticator.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptNoneAttestation;

impl AttestationVerifier for AcceptNoneAttestation {
    fn verify(&self, context: &AttestationContext<'_>) -> Result<()> {
        if context.format == "none" {
            Ok(())
        } else {
            Err(MfaError::invalid_payload(format!(
                "attestation format not accepted: {}",
                context.format
            )))
        }
    }
}

/// Accepts every attestation format without inspecting the statement.
///
/// For tests and for deployments that make the trust decision
/// out-of-band (e.g., an allow-listed device fleet).
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAllAttestation;

impl AttestationVerifier for AcceptAllAttestation {
    fn verify(&self, _context: &AttestationContext<'_>) -> Result<()> {
        Ok(())
    }
}
