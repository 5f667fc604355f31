//! Registration and authentication ceremonies.
//!
//! Each ceremony is a single-use challenge-response exchange:
//! `CHALLENGE_ISSUED -> (CLIENT_RESPONDED) -> VERIFIED | REJECTED`,
//! terminal in both directions. A challenge authorizes exactly one
//! `finish_*` call and is invalidated by use or expiry regardless of
//! outcome; expiry is checked at verification time against the stored
//! timestamp, so no background timer exists.

use dashmap::DashMap;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::SystemTime;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::error::{MfaError, Result};
use crate::storage::CredentialStore;
use crate::webauthn::attestation::{AttestationContext, AttestationVerifier};
use crate::webauthn::authenticator::{
    parse_attestation_object, parse_authenticator_data, CredentialVerifyingKey,
};
use crate::webauthn::config::RelyingPartyConfig;
use crate::webauthn::types::{
    decode_b64_any, encode_b64url, AssertionResponse, CollectedClientData,
    CreationChallenge, PublicKeyCredentialCreationOptions, PublicKeyCredentialDescriptor,
    PublicKeyCredentialParameters, PublicKeyCredentialRequestOptions,
    PublicKeyCredentialRpEntity, PublicKeyCredentialUserEntity, RegistrationResponse,
    RequestChallenge, VerifiedAssertion, WebAuthnCredential, COSE_ALG_ES256, COSE_ALG_RS256,
};

const CLIENT_DATA_TYPE_CREATE: &str = "webauthn.create";
const CLIENT_DATA_TYPE_GET: &str = "webauthn.get";

/// Which ceremony a challenge was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CeremonyKind {
    Registration,
    Authentication,
}

#[derive(Debug, Clone)]
struct ChallengeRecord {
    user_id: String,
    kind: CeremonyKind,
    value: [u8; 32],
    expires_at: SystemTime,
    consumed: bool,
}

/// In-memory single-use challenge store.
///
/// Consumed records are kept until their expiry passes so a replayed
/// challenge id is distinguishable from an unknown one; expired records
/// are purged lazily on the next insertion.
#[derive(Default)]
struct ChallengeStore {
    challenges: DashMap<Uuid, ChallengeRecord>,
}

impl ChallengeStore {
    fn insert(&self, record: ChallengeRecord, now: SystemTime) -> Uuid {
        self.challenges.retain(|_, existing| existing.expires_at > now);

        let id = Uuid::new_v4();
        self.challenges.insert(id, record);
        id
    }

    /// Consume a challenge: at most one call per id ever succeeds.
    fn consume(&self, id: Uuid, now: SystemTime) -> Result<ChallengeRecord> {
        let mut entry = match self.challenges.get_mut(&id) {
            // Unknown ids are treated exactly like expired ones: the
            // record may simply have been purged already.
            None => return Err(MfaError::ExpiredChallenge),
            Some(entry) => entry,
        };

        if entry.consumed {
            return Err(MfaError::ChallengeReplay);
        }
        if now >= entry.expires_at {
            drop(entry);
            self.challenges.remove(&id);
            return Err(MfaError::ExpiredChallenge);
        }

        entry.consumed = true;
        Ok(entry.clone())
    }
}

/// Runs WebAuthn registration and authentication ceremonies against a
/// credential store, delegating attestation trust to an injected
/// [`AttestationVerifier`].
pub struct CeremonyEngine<C> {
    config: RelyingPartyConfig,
    credentials: Arc<C>,
    attestation: Arc<dyn AttestationVerifier>,
    challenges: ChallengeStore,
}

impl<C: CredentialStore> CeremonyEngine<C> {
    /// Create a ceremony engine with the given attestation policy.
    pub fn new(
        config: RelyingPartyConfig,
        credentials: Arc<C>,
        attestation: Arc<dyn AttestationVerifier>,
    ) -> Self {
        Self {
            config,
            credentials,
            attestation,
            challenges: ChallengeStore::default(),
        }
    }

    /// The relying party this engine verifies for.
    #[must_use]
    pub fn relying_party(&self) -> &RelyingPartyConfig {
        &self.config
    }

    /// Issue a registration challenge.
    pub fn begin_registration(&self, user_id: &str, user_name: &str) -> CreationChallenge {
        self.begin_registration_at(user_id, user_name, SystemTime::now())
    }

    /// Issue a registration challenge at an explicit instant.
    pub fn begin_registration_at(
        &self,
        user_id: &str,
        user_name: &str,
        now: SystemTime,
    ) -> CreationChallenge {
        let value = fresh_challenge();
        let challenge_id = self.challenges.insert(
            ChallengeRecord {
                user_id: user_id.to_string(),
                kind: CeremonyKind::Registration,
                value,
                expires_at: now + self.config.challenge_ttl(),
                consumed: false,
            },
            now,
        );

        tracing::debug!(
            target: "mfa.webauthn.challenge_issued",
            user_id = %user_id,
            challenge_id = %challenge_id,
            kind = "registration",
            "WebAuthn challenge issued"
        );

        CreationChallenge {
            challenge_id,
            options: PublicKeyCredentialCreationOptions {
                rp: PublicKeyCredentialRpEntity {
                    id: self.config.id.clone(),
                    name: self.config.name.clone(),
                },
                user: PublicKeyCredentialUserEntity {
                    id: encode_b64url(user_id.as_bytes()),
                    name: user_name.to_string(),
                    display_name: user_name.to_string(),
                },
                challenge: encode_b64url(&value),
                pub_key_cred_params: vec![
                    PublicKeyCredentialParameters {
                        type_: "public-key".to_string(),
                        alg: COSE_ALG_ES256,
                    },
                    PublicKeyCredentialParameters {
                        type_: "public-key".to_string(),
                        alg: COSE_ALG_RS256,
                    },
                ],
                timeout: self.config.challenge_ttl_seconds * 1000,
                attestation: "none".to_string(),
            },
        }
    }

    /// Complete a registration ceremony and persist the new credential.
    pub async fn finish_registration(
        &self,
        challenge_id: Uuid,
        response: &RegistrationResponse,
    ) -> Result<WebAuthnCredential> {
        self.finish_registration_at(challenge_id, response, SystemTime::now())
            .await
    }

    /// Complete a registration ceremony at an explicit instant.
    pub async fn finish_registration_at(
        &self,
        challenge_id: Uuid,
        response: &RegistrationResponse,
        now: SystemTime,
    ) -> Result<WebAuthnCredential> {
        let record = self.challenges.consume(challenge_id, now)?;
        if record.kind != CeremonyKind::Registration {
            return Err(MfaError::invalid_payload("ceremony kind mismatch"));
        }

        let client_data_bytes = decode_b64_any(&response.response.client_data_json)?;
        let client_data = parse_client_data(&client_data_bytes, CLIENT_DATA_TYPE_CREATE)?;
        self.check_challenge_echo(&record.value, &client_data)?;
        self.check_origin(&client_data)?;

        let attestation_bytes = decode_b64_any(&response.response.attestation_object)?;
        let attestation = parse_attestation_object(&attestation_bytes)?;
        self.check_rp_id_hash(&attestation.auth_data.rp_id_hash)?;
        if !attestation.auth_data.user_present() {
            return Err(MfaError::invalid_payload("user presence required"));
        }

        let credential_id = attestation
            .auth_data
            .credential_id
            .clone()
            .ok_or_else(|| MfaError::invalid_payload("missing credential id"))?;
        let public_key = attestation
            .auth_data
            .credential_public_key
            .clone()
            .ok_or_else(|| MfaError::invalid_payload("missing credential public key"))?;

        // Rejects keys for algorithms never offered in the options.
        CredentialVerifyingKey::parse_cose(&public_key)?;

        let client_data_hash: [u8; 32] = Sha256::digest(&client_data_bytes).into();
        self.attestation.verify(&AttestationContext {
            format: &attestation.format,
            statement: &attestation.statement,
            auth_data: &attestation.auth_data_raw,
            client_data_hash: &client_data_hash,
        })?;

        if self
            .credentials
            .find(&self.config.id, &credential_id)
            .await?
            .is_some()
        {
            return Err(MfaError::DuplicateCredential);
        }

        let credential = WebAuthnCredential {
            credential_id,
            public_key,
            sign_count: attestation.auth_data.sign_count,
            relying_party_id: self.config.id.clone(),
            user_handle: record.user_id.clone(),
            created_at: now,
            disabled: false,
        };

        if !self.credentials.insert_new(credential.clone()).await? {
            return Err(MfaError::DuplicateCredential);
        }

        tracing::info!(
            target: "mfa.webauthn.registered",
            user_id = %record.user_id,
            credential_id = %encode_b64url(&credential.credential_id),
            "WebAuthn credential registered"
        );

        Ok(credential)
    }

    /// Issue an authentication challenge listing the user's credentials.
    pub async fn begin_authentication(&self, user_id: &str) -> Result<RequestChallenge> {
        self.begin_authentication_at(user_id, SystemTime::now())
            .await
    }

    /// Issue an authentication challenge at an explicit instant.
    pub async fn begin_authentication_at(
        &self,
        user_id: &str,
        now: SystemTime,
    ) -> Result<RequestChallenge> {
        let credentials: Vec<_> = self
            .credentials
            .list_for_user(&self.config.id, user_id)
            .await?
            .into_iter()
            .filter(|c| !c.disabled)
            .collect();
        if credentials.is_empty() {
            return Err(MfaError::NoFactorsEnrolled);
        }

        let value = fresh_challenge();
        let challenge_id = self.challenges.insert(
            ChallengeRecord {
                user_id: user_id.to_string(),
                kind: CeremonyKind::Authentication,
                value,
                expires_at: now + self.config.challenge_ttl(),
                consumed: false,
            },
            now,
        );

        tracing::debug!(
            target: "mfa.webauthn.challenge_issued",
            user_id = %user_id,
            challenge_id = %challenge_id,
            kind = "authentication",
            "WebAuthn challenge issued"
        );

        Ok(RequestChallenge {
            challenge_id,
            options: PublicKeyCredentialRequestOptions {
                challenge: encode_b64url(&value),
                rp_id: self.config.id.clone(),
                allow_credentials: credentials
                    .iter()
                    .map(|c| PublicKeyCredentialDescriptor {
                        type_: "public-key".to_string(),
                        id: encode_b64url(&c.credential_id),
                    })
                    .collect(),
                timeout: self.config.challenge_ttl_seconds * 1000,
                user_verification: "preferred".to_string(),
            },
        })
    }

    /// Complete an authentication ceremony.
    pub async fn finish_authentication(
        &self,
        challenge_id: Uuid,
        response: &AssertionResponse,
    ) -> Result<VerifiedAssertion> {
        self.finish_authentication_at(challenge_id, response, SystemTime::now())
            .await
    }

    /// Complete an authentication ceremony at an explicit instant.
    ///
    /// On a sign-count regression the credential is disabled in the same
    /// operation that rejects the assertion: a regressing counter with a
    /// valid signature means the private key exists in more than one
    /// place.
    pub async fn finish_authentication_at(
        &self,
        challenge_id: Uuid,
        response: &AssertionResponse,
        now: SystemTime,
    ) -> Result<VerifiedAssertion> {
        let record = self.challenges.consume(challenge_id, now)?;
        if record.kind != CeremonyKind::Authentication {
            return Err(MfaError::invalid_payload("ceremony kind mismatch"));
        }

        let client_data_bytes =
            decode_b64_any(&response.response.client_data_json)?;
        let client_data = parse_client_data(&client_data_bytes, CLIENT_DATA_TYPE_GET)?;
        self.check_challenge_echo(&record.value, &client_data)?;
        self.check_origin(&client_data)?;

        let auth_data_bytes = decode_b64_any(&response.response.authenticator_data)?;
        let auth_data = parse_authenticator_data(&auth_data_bytes, false)?;
        self.check_rp_id_hash(&auth_data.rp_id_hash)?;
        if !auth_data.user_present() {
            return Err(MfaError::invalid_payload("user presence required"));
        }

        let credential_id = response.credential_id()?;
        let stored = self
            .credentials
            .find(&self.config.id, &credential_id)
            .await?
            // Foreign and unknown credentials get the same rejection.
            .filter(|c| c.user_handle == record.user_id)
            .ok_or_else(|| MfaError::invalid_payload("credential not recognized"))?;
        if stored.disabled {
            return Err(MfaError::invalid_payload("credential disabled"));
        }

        let key = CredentialVerifyingKey::parse_cose(&stored.public_key)?;
        let signature = decode_b64_any(&response.response.signature)?;

        let mut signed_data = Vec::with_capacity(auth_data_bytes.len() + 32);
        signed_data.extend_from_slice(&auth_data_bytes);
        signed_data.extend_from_slice(&Sha256::digest(&client_data_bytes));
        key.verify(&signed_data, &signature)?;

        if auth_data.sign_count <= stored.sign_count {
            self.credentials
                .set_disabled(&self.config.id, &credential_id, true)
                .await?;
            tracing::warn!(
                target: "mfa.webauthn.clone_suspected",
                user_id = %record.user_id,
                credential_id = %encode_b64url(&credential_id),
                stored_sign_count = stored.sign_count,
                received_sign_count = auth_data.sign_count,
                "Sign count regression; credential disabled"
            );
            return Err(MfaError::CredentialCloneSuspected);
        }

        self.credentials
            .update_sign_count(&self.config.id, &credential_id, auth_data.sign_count)
            .await?;

        tracing::info!(
            target: "mfa.webauthn.verified",
            user_id = %record.user_id,
            credential_id = %encode_b64url(&credential_id),
            sign_count = auth_data.sign_count,
            "WebAuthn assertion verified"
        );

        Ok(VerifiedAssertion {
            credential_id,
            user_handle: record.user_id,
            sign_count: auth_data.sign_count,
        })
    }

    fn check_challenge_echo(
        &self,
        expected: &[u8; 32],
        client_data: &CollectedClientData,
    ) -> Result<()> {
        let echoed = decode_b64_any(&client_data.challenge)?;
        let equal: bool = echoed.as_slice().ct_eq(expected.as_slice()).into();
        if equal {
            Ok(())
        } else {
            Err(MfaError::invalid_payload("challenge echo mismatch"))
        }
    }

    fn check_origin(&self, client_data: &CollectedClientData) -> Result<()> {
        let expected = self.config.origin.trim_end_matches('/');
        let received = client_data.origin.trim_end_matches('/');
        if expected == received {
            Ok(())
        } else {
            Err(MfaError::OriginMismatch {
                expected: expected.to_string(),
                received: received.to_string(),
            })
        }
    }

    fn check_rp_id_hash(&self, received: &[u8; 32]) -> Result<()> {
        let expected: [u8; 32] = Sha256::digest(self.config.id.as_bytes()).into();
        if &expected == received {
            Ok(())
        } else {
            Err(MfaError::invalid_payload("relying party id hash mismatch"))
        }
    }
}

fn fresh_challenge() -> [u8; 32] {
    let mut value = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut value);
    value
}

fn parse_client_data(bytes: &[u8], expected_type: &str) -> Result<CollectedClientData> {
    let client_data: CollectedClientData = serde_json::from_slice(bytes)
        .map_err(|_| MfaError::invalid_payload("client data is not valid JSON"))?;
    if client_data.type_ != expected_type {
        return Err(MfaError::invalid_payload("client data type mismatch"));
    }
    Ok(client_data)
}
