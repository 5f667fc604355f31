//! WebAuthn-style public-key credential ceremonies.
//!
//! Provides registration and authentication challenge/response
//! ceremonies with origin binding, single-use challenges, signature
//! verification (ES256/RS256), and sign-count clone detection.
//!
//! # Example
//!
//! ```rust,ignore
//! use portcullis::webauthn::{AcceptNoneAttestation, CeremonyEngine, RelyingPartyConfig};
//!
//! let engine = CeremonyEngine::new(
//!     RelyingPartyConfig::new("example.com", "https://example.com"),
//!     credentials,
//!     Arc::new(AcceptNoneAttestation),
//! );
//!
//! // Hand the options to the browser...
//! let challenge = engine.begin_registration("user-1", "user@example.com");
//!
//! // ...and verify what comes back.
//! let credential = engine.finish_registration(challenge.challenge_id, &response).await?;
//! ```

mod attestation;
mod authenticator;
mod ceremony;
mod config;
mod types;

pub use attestation::{
    AcceptAllAttestation, AcceptNoneAttestation, AttestationContext, AttestationVerifier,
};
pub use authenticator::{
    parse_attestation_object, parse_authenticator_data, AttestationObject,
    CredentialVerifyingKey, ParsedAuthenticatorData, FLAG_ATTESTED_CREDENTIAL_DATA,
    FLAG_USER_PRESENT,
};
pub use ceremony::{CeremonyEngine, CeremonyKind};
pub use config::RelyingPartyConfig;
pub use types::{
    decode_b64_any, encode_b64url, AssertionResponse, AuthenticatorAssertionResponse,
    AuthenticatorAttestationResponse, CollectedClientData, CreationChallenge,
    PublicKeyCredentialCreationOptions, PublicKeyCredentialDescriptor,
    PublicKeyCredentialParameters, PublicKeyCredentialRequestOptions,
    PublicKeyCredentialRpEntity, PublicKeyCredentialUserEntity, RegistrationResponse,
    RequestChallenge, VerifiedAssertion, WebAuthnCredential, COSE_ALG_ES256, COSE_ALG_RS256,
};
