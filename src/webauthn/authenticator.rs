//! Authenticator data and COSE key parsing, plus signature verification.
//!
//! Implements the byte-level formats of the W3C WebAuthn standard: the
//! authenticator-data structure (RP-id hash, flags, sign count, attested
//! credential data), CBOR attestation objects, and COSE public keys for
//! the two algorithms advertised in creation options (ES256, RS256).

use ciborium::value::Value as CborValue;
use p256::ecdsa::{
    signature::Verifier as _, Signature as P256Signature, VerifyingKey as P256VerifyingKey,
};
use rsa::pkcs1v15::{Signature as RsaSignature, VerifyingKey as RsaVerifyingKey};
use rsa::{BigUint, RsaPublicKey};
use sha2::Sha256;
use std::io::Cursor;

use crate::error::{MfaError, Result};
use crate::webauthn::types::{COSE_ALG_ES256, COSE_ALG_RS256};

/// User-presence flag (UP).
pub const FLAG_USER_PRESENT: u8 = 0x01;
/// Attested-credential-data-included flag (AT).
pub const FLAG_ATTESTED_CREDENTIAL_DATA: u8 = 0x40;

/// Parsed authenticator data.
#[derive(Debug, Clone)]
pub struct ParsedAuthenticatorData {
    pub rp_id_hash: [u8; 32],
    pub flags: u8,
    pub sign_count: u32,
    pub credential_id: Option<Vec<u8>>,
    pub credential_public_key: Option<Vec<u8>>,
}

impl ParsedAuthenticatorData {
    #[must_use]
    pub fn user_present(&self) -> bool {
        self.flags & FLAG_USER_PRESENT != 0
    }
}

/// Parse raw authenticator data.
///
/// `expect_attested_data` is set for registration, where the credential
/// id and COSE public key must follow the 37-byte header.
pub fn parse_authenticator_data(
    data: &[u8],
    expect_attested_data: bool,
) -> Result<ParsedAuthenticatorData> {
    if data.len() < 37 {
        return Err(MfaError::invalid_payload("authenticator data too short"));
    }

    let mut rp_id_hash = [0u8; 32];
    rp_id_hash.copy_from_slice(&data[..32]);
    let flags = data[32];
    let sign_count = u32::from_be_bytes([data[33], data[34], data[35], data[36]]);

    let mut credential_id = None;
    let mut credential_public_key = None;
    if expect_attested_data || flags & FLAG_ATTESTED_CREDENTIAL_DATA != 0 {
        if flags & FLAG_ATTESTED_CREDENTIAL_DATA == 0 {
            return Err(MfaError::invalid_payload(
                "attested credential data missing",
            ));
        }
        let mut offset = 37usize;
        if data.len() < offset + 18 {
            return Err(MfaError::invalid_payload(
                "attested credential data truncated",
            ));
        }
        offset += 16; // aaguid
        let cred_len = u16::from_be_bytes([data[offset], data[offset + 1]]) as usize;
        offset += 2;

        if data.len() < offset + cred_len {
            return Err(MfaError::invalid_payload("credential id truncated"));
        }
        credential_id = Some(data[offset..offset + cred_len].to_vec());
        offset += cred_len;

        // The COSE key is a CBOR item of unknown length; decode once to
        // find where it ends and keep the raw bytes.
        let mut cursor = Cursor::new(&data[offset..]);
        let _key: CborValue = ciborium::de::from_reader(&mut cursor)
            .map_err(|_| MfaError::invalid_payload("credential public key is not valid CBOR"))?;
        let used = cursor.position() as usize;
        if used == 0 || offset + used > data.len() {
            return Err(MfaError::invalid_payload("credential public key truncated"));
        }
        credential_public_key = Some(data[offset..offset + used].to_vec());
    }

    Ok(ParsedAuthenticatorData {
        rp_id_hash,
        flags,
        sign_count,
        credential_id,
        credential_public_key,
    })
}

/// A parsed CBOR attestation object.
#[derive(Debug)]
pub struct AttestationObject {
    pub format: String,
    /// Raw authenticator data bytes, needed for attestation signatures.
    pub auth_data_raw: Vec<u8>,
    pub auth_data: ParsedAuthenticatorData,
    /// The format-specific attestation statement, passed to the verifier.
    pub statement: CborValue,
}

/// Parse a CBOR attestation object (`fmt` / `authData` / `attStmt`).
pub fn parse_attestation_object(bytes: &[u8]) -> Result<AttestationObject> {
    let value: CborValue = ciborium::de::from_reader(Cursor::new(bytes))
        .map_err(|_| MfaError::invalid_payload("attestation object is not valid CBOR"))?;
    let map = value
        .as_map()
        .ok_or_else(|| MfaError::invalid_payload("attestation object is not a map"))?;

    let format = map_get_by_text(map, "fmt")
        .and_then(|v| v.as_text())
        .ok_or_else(|| MfaError::invalid_payload("attestation object missing fmt"))?
        .to_string();
    let auth_data_raw = map_get_by_text(map, "authData")
        .and_then(|v| v.as_bytes())
        .ok_or_else(|| MfaError::invalid_payload("attestation object missing authData"))?
        .clone();
    let statement = map_get_by_text(map, "attStmt")
        .cloned()
        .unwrap_or(CborValue::Map(Vec::new()));

    let auth_data = parse_authenticator_data(&auth_data_raw, true)?;

    Ok(AttestationObject {
        format,
        auth_data_raw,
        auth_data,
        statement,
    })
}

/// A credential public key ready to verify assertion signatures.
#[derive(Debug, Clone)]
pub enum CredentialVerifyingKey {
    Es256(P256VerifyingKey),
    Rs256(RsaPublicKey),
}

impl CredentialVerifyingKey {
    /// Parse a COSE-encoded public key, rejecting algorithms that were
    /// never offered in the creation options.
    pub fn parse_cose(cose_key: &[u8]) -> Result<Self> {
        let value: CborValue = ciborium::de::from_reader(Cursor::new(cose_key))
            .map_err(|_| MfaError::invalid_payload("COSE key is not valid CBOR"))?;
        let map = value
            .as_map()
            .ok_or_else(|| MfaError::invalid_payload("COSE key is not a map"))?;

        let kty = map_get_integer(map, 1)
            .ok_or_else(|| MfaError::invalid_payload("COSE key missing kty"))?;
        let alg = map_get_integer(map, 3)
            .ok_or_else(|| MfaError::invalid_payload("COSE key missing alg"))?;

        match (kty, alg as i64) {
            // EC2 key type with ES256 on P-256.
            (2, COSE_ALG_ES256) => {
                let crv = map_get_integer(map, -1)
                    .ok_or_else(|| MfaError::invalid_payload("COSE key missing crv"))?;
                if crv != 1 {
                    return Err(MfaError::invalid_payload("unsupported COSE curve"));
                }
                let x = map_get_bytes(map, -2)
                    .ok_or_else(|| MfaError::invalid_payload("COSE key missing x"))?;
                let y = map_get_bytes(map, -3)
                    .ok_or_else(|| MfaError::invalid_payload("COSE key missing y"))?;
                if x.len() != 32 || y.len() != 32 {
                    return Err(MfaError::invalid_payload("COSE key coordinate length"));
                }

                let mut sec1 = Vec::with_capacity(65);
                sec1.push(0x04);
                sec1.extend_from_slice(x);
                sec1.extend_from_slice(y);

                let key = P256VerifyingKey::from_sec1_bytes(&sec1)
                    .map_err(|_| MfaError::invalid_payload("COSE key is not a valid P-256 point"))?;
                Ok(Self::Es256(key))
            }
            // RSA key type with RS256.
            (3, COSE_ALG_RS256) => {
                let n = map_get_bytes(map, -1)
                    .ok_or_else(|| MfaError::invalid_payload("COSE key missing modulus"))?;
                let e = map_get_bytes(map, -2)
                    .ok_or_else(|| MfaError::invalid_payload("COSE key missing exponent"))?;

                let key =
                    RsaPublicKey::new(BigUint::from_bytes_be(n), BigUint::from_bytes_be(e))
                        .map_err(|_| MfaError::invalid_payload("invalid RSA public key"))?;
                Ok(Self::Rs256(key))
            }
            (kty, alg) => Err(MfaError::invalid_payload(format!(
                "unsupported COSE key: kty={}, alg={}",
                kty, alg
            ))),
        }
    }

    /// Verify a signature over the signed data.
    pub fn verify(&self, signed_data: &[u8], signature: &[u8]) -> Result<()> {
        match self {
            Self::Es256(key) => {
                let signature = P256Signature::from_der(signature)
                    .map_err(|_| MfaError::SignatureInvalid)?;
                key.verify(signed_data, &signature)
                    .map_err(|_| MfaError::SignatureInvalid)
            }
            Self::Rs256(key) => {
                let verifying_key = RsaVerifyingKey::<Sha256>::new(key.clone());
                let signature =
                    RsaSignature::try_from(signature).map_err(|_| MfaError::SignatureInvalid)?;
                verifying_key
                    .verify(signed_data, &signature)
                    .map_err(|_| MfaError::SignatureInvalid)
            }
        }
    }
}

fn map_get_by_text<'a>(map: &'a [(CborValue, CborValue)], key: &str) -> Option<&'a CborValue> {
    map.iter().find_map(|(k, v)| match k {
        CborValue::Text(t) if t == key => Some(v),
        _ => None,
    })
}

fn map_get_integer(map: &[(CborValue, CborValue)], key: i128) -> Option<i128> {
    map.iter().find_map(|(k, v)| match (k, v) {
        (CborValue::Integer(ki), CborValue::Integer(vi)) if i128::from(*ki) == key => {
            Some(i128::from(*vi))
        }
        _ => None,
    })
}

fn map_get_bytes(map: &[(CborValue, CborValue)], key: i128) -> Option<&[u8]> {
    map.iter().find_map(|(k, v)| match (k, v) {
        (CborValue::Integer(ki), CborValue::Bytes(b)) if i128::from(*ki) == key => {
            Some(b.as_slice())
        }
        _ => None,
    })
}
