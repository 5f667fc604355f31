//! Wire types for WebAuthn ceremonies.
//!
//! Field names mirror the W3C Web Authentication specification
//! (camelCase on the wire) so the payloads interoperate with browser and
//! platform authenticators without translation.

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

use crate::error::{MfaError, Result};

/// COSE algorithm identifier for ES256 (ECDSA w/ SHA-256 on P-256).
pub const COSE_ALG_ES256: i64 = -7;
/// COSE algorithm identifier for RS256 (RSASSA-PKCS1-v1_5 w/ SHA-256).
pub const COSE_ALG_RS256: i64 = -257;

/// A registered public-key credential.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct WebAuthnCredential {
    /// Opaque credential id chosen by the authenticator; unique per
    /// relying party.
    pub credential_id: Vec<u8>,
    /// COSE-encoded public key.
    pub public_key: Vec<u8>,
    /// Last accepted authenticator sign count. An assertion must carry a
    /// strictly greater value or the credential is treated as cloned.
    pub sign_count: u32,
    pub relying_party_id: String,
    pub user_handle: String,
    pub created_at: SystemTime,
    /// Set when clone suspicion (or an operator) disabled the credential.
    pub disabled: bool,
}

/// Client data echoed back by the authenticator in both ceremonies.
#[derive(Debug, Deserialize)]
pub struct CollectedClientData {
    #[serde(rename = "type")]
    pub type_: String,
    /// Base64url-encoded challenge echo.
    pub challenge: String,
    pub origin: String,
    #[serde(rename = "crossOrigin", default)]
    pub cross_origin: bool,
}

/// Registration ceremony response (`navigator.credentials.create`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistrationResponse {
    pub id: Option<String>,
    #[serde(rename = "rawId")]
    pub raw_id: Option<String>,
    pub response: AuthenticatorAttestationResponse,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthenticatorAttestationResponse {
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
    #[serde(rename = "attestationObject")]
    pub attestation_object: String,
}

/// Authentication ceremony response (`navigator.credentials.get`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssertionResponse {
    pub id: Option<String>,
    #[serde(rename = "rawId")]
    pub raw_id: Option<String>,
    pub response: AuthenticatorAssertionResponse,
}

impl AssertionResponse {
    /// The credential id, preferring `rawId` as browsers populate both.
    pub(crate) fn credential_id(&self) -> Result<Vec<u8>> {
        let encoded = self
            .raw_id
            .as_deref()
            .or(self.id.as_deref())
            .ok_or_else(|| MfaError::invalid_payload("assertion carries no credential id"))?;
        decode_b64_any(encoded)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthenticatorAssertionResponse {
    #[serde(rename = "authenticatorData")]
    pub authenticator_data: String,
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
    pub signature: String,
    #[serde(rename = "userHandle", default, skip_serializing_if = "Option::is_none")]
    pub user_handle: Option<String>,
}

/// Options handed to the client to start a registration ceremony.
#[derive(Debug, Clone, Serialize)]
pub struct PublicKeyCredentialCreationOptions {
    pub rp: PublicKeyCredentialRpEntity,
    pub user: PublicKeyCredentialUserEntity,
    /// Base64url-encoded challenge.
    pub challenge: String,
    #[serde(rename = "pubKeyCredParams")]
    pub pub_key_cred_params: Vec<PublicKeyCredentialParameters>,
    /// Milliseconds the client should allow for the ceremony.
    pub timeout: u64,
    pub attestation: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublicKeyCredentialRpEntity {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublicKeyCredentialUserEntity {
    /// Base64url-encoded user handle.
    pub id: String,
    pub name: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublicKeyCredentialParameters {
    #[serde(rename = "type")]
    pub type_: String,
    pub alg: i64,
}

/// Options handed to the client to start an authentication ceremony.
#[derive(Debug, Clone, Serialize)]
pub struct PublicKeyCredentialRequestOptions {
    /// Base64url-encoded challenge.
    pub challenge: String,
    #[serde(rename = "rpId")]
    pub rp_id: String,
    #[serde(rename = "allowCredentials")]
    pub allow_credentials: Vec<PublicKeyCredentialDescriptor>,
    pub timeout: u64,
    #[serde(rename = "userVerification")]
    pub user_verification: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublicKeyCredentialDescriptor {
    #[serde(rename = "type")]
    pub type_: String,
    /// Base64url-encoded credential id.
    pub id: String,
}

/// A registration challenge plus the options to forward to the client.
#[derive(Debug, Clone, Serialize)]
pub struct CreationChallenge {
    pub challenge_id: Uuid,
    pub options: PublicKeyCredentialCreationOptions,
}

/// An authentication challenge plus the options to forward to the client.
#[derive(Debug, Clone, Serialize)]
pub struct RequestChallenge {
    pub challenge_id: Uuid,
    pub options: PublicKeyCredentialRequestOptions,
}

/// Outcome of a verified assertion, reported for the audit trail.
#[derive(Debug, Clone)]
pub struct VerifiedAssertion {
    pub credential_id: Vec<u8>,
    pub user_handle: String,
    /// The authenticator's new sign count, already persisted.
    pub sign_count: u32,
}

/// Encode bytes as base64url without padding, the WebAuthn wire form.
pub fn encode_b64url(bytes: &[u8]) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode base64 accepting the encodings clients actually send:
/// base64url with or without padding, and standard base64.
pub fn decode_b64_any(input: &str) -> Result<Vec<u8>> {
    general_purpose::URL_SAFE_NO_PAD
        .decode(input)
        .or_else(|_| general_purpose::URL_SAFE.decode(input))
        .or_else(|_| general_purpose::STANDARD.decode(input))
        .or_else(|_| general_purpose::STANDARD_NO_PAD.decode(input))
        .map_err(|_| MfaError::invalid_payload("invalid base64 field"))
}
