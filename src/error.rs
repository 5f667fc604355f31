use serde::Serialize;

/// The main error type for verification operations.
///
/// Every cryptographic or validation failure inside a factor engine is
/// recovered into one of these kinds and handed back as a typed verdict,
/// so the orchestrator can always update attempt counters no matter how a
/// ceremony failed. Only `Storage` and `Provisioning` represent
/// infrastructure faults rather than attempt outcomes.
#[derive(Debug, thiserror::Error)]
pub enum MfaError {
    /// Submitted TOTP or backup code did not match.
    #[error("invalid code")]
    InvalidCode,

    /// The ceremony challenge expired (or was never issued).
    #[error("challenge expired")]
    ExpiredChallenge,

    /// The ceremony challenge was already consumed by a previous response.
    #[error("challenge already consumed")]
    ChallengeReplay,

    /// The client response was produced for a different origin.
    #[error("origin mismatch: expected {expected}, received {received}")]
    OriginMismatch { expected: String, received: String },

    /// The assertion signature did not verify under the stored public key.
    #[error("signature verification failed")]
    SignatureInvalid,

    /// The assertion's sign count regressed, indicating probable key
    /// extraction. The credential is disabled alongside this verdict.
    #[error("credential clone suspected (sign count regression)")]
    CredentialCloneSuspected,

    /// A credential with this id is already registered for the relying party.
    #[error("credential already registered")]
    DuplicateCredential,

    /// The user is inside a lockout window.
    #[error("verification locked for {remaining_seconds}s")]
    Locked { remaining_seconds: u64 },

    /// The user has no enrolled factor of the requested kind.
    #[error("no factors of the requested kind enrolled")]
    NoFactorsEnrolled,

    /// The client payload was malformed or failed a structural check
    /// (bad encoding, challenge echo mismatch, unknown credential, ...).
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// A backing store failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Secret or challenge generation failed.
    #[error("provisioning error: {0}")]
    Provisioning(String),
}

impl MfaError {
    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        Self::InvalidPayload(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn provisioning(msg: impl Into<String>) -> Self {
        Self::Provisioning(msg.into())
    }

    /// Whether this kind counts as a failed verification attempt.
    ///
    /// Attempt failures feed the orchestrator's failure counter. Lockout
    /// rejections, missing enrollment, and infrastructure faults do not:
    /// none of them gives an attacker information about a credential.
    #[must_use]
    pub fn is_attempt_failure(&self) -> bool {
        matches!(
            self,
            Self::InvalidCode
                | Self::ExpiredChallenge
                | Self::ChallengeReplay
                | Self::OriginMismatch { .. }
                | Self::SignatureInvalid
                | Self::CredentialCloneSuspected
                | Self::DuplicateCredential
                | Self::InvalidPayload(_)
        )
    }

    /// Whether this kind is an infrastructure fault rather than a verdict.
    #[must_use]
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Provisioning(_))
    }

    /// The denial bucket safe to surface to an end user.
    ///
    /// Everything collapses to a generic failure except lockout (which
    /// carries its cool-down) and clone suspicion (which must trigger a
    /// forced re-enrollment flow). This keeps the failing factor and
    /// reason unguessable from the outside.
    #[must_use]
    pub fn denial_reason(&self) -> DenialReason {
        match self {
            Self::Locked { .. } => DenialReason::Locked,
            Self::CredentialCloneSuspected => DenialReason::CredentialCompromised,
            Self::NoFactorsEnrolled => DenialReason::NoFactorsEnrolled,
            _ => DenialReason::VerificationFailed,
        }
    }
}

/// Coarse, enumeration-safe denial buckets for the session layer.
///
/// `NoFactorsEnrolled` is included so the caller can route the user to
/// enrollment; it should still be rendered as a generic failure to anyone
/// who is not the account holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// Generic "verification failed" for all credential mismatches.
    VerificationFailed,
    /// Within a lockout window; `remaining_lockout_seconds` applies.
    Locked,
    /// Sign-count regression; force re-enrollment of the credential.
    CredentialCompromised,
    /// Nothing enrolled for the requested factor kind.
    NoFactorsEnrolled,
}

/// Result type alias for verification operations.
pub type Result<T> = std::result::Result<T, MfaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_failure_classification() {
        assert!(MfaError::InvalidCode.is_attempt_failure());
        assert!(MfaError::SignatureInvalid.is_attempt_failure());
        assert!(MfaError::ChallengeReplay.is_attempt_failure());
        assert!(MfaError::CredentialCloneSuspected.is_attempt_failure());

        assert!(!MfaError::Locked {
            remaining_seconds: 60
        }
        .is_attempt_failure());
        assert!(!MfaError::NoFactorsEnrolled.is_attempt_failure());
        assert!(!MfaError::storage("down").is_attempt_failure());
    }

    #[test]
    fn infrastructure_classification() {
        assert!(MfaError::storage("down").is_infrastructure());
        assert!(MfaError::provisioning("rng").is_infrastructure());
        assert!(!MfaError::InvalidCode.is_infrastructure());
    }

    #[test]
    fn denial_reasons_collapse_to_generic() {
        assert_eq!(
            MfaError::InvalidCode.denial_reason(),
            DenialReason::VerificationFailed
        );
        assert_eq!(
            MfaError::OriginMismatch {
                expected: "https://a".into(),
                received: "https://b".into()
            }
            .denial_reason(),
            DenialReason::VerificationFailed
        );
        assert_eq!(
            MfaError::Locked {
                remaining_seconds: 30
            }
            .denial_reason(),
            DenialReason::Locked
        );
        assert_eq!(
            MfaError::CredentialCloneSuspected.denial_reason(),
            DenialReason::CredentialCompromised
        );
    }
}
