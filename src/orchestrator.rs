//! MFA orchestration.
//!
//! Composes the factor engines behind one verification contract. The
//! orchestrator exclusively owns per-user attempt state (failure
//! counters, lockout, TOTP replay counters); the engines stay stateless
//! and only report match/no-match plus side-record updates.
//!
//! The state machine itself is the pure [`transition`] function,
//! `(state, event) -> state'` with no clock, store, or callback inside,
//! driven by the async service around it. All mutations of one user's
//! state run inside a per-user critical section so two concurrent
//! failures cannot both read a sub-threshold counter and skip the
//! lockout.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::backup::BackupCodeManager;
use crate::config::{get_env_with_prefix, EngineConfig};
use crate::error::{DenialReason, MfaError, Result};
use crate::storage::{BackupCodeStore, CredentialStore, SecretStore};
use crate::totp::{TotpEngine, TotpProvisioning};
use crate::webauthn::{
    AcceptNoneAttestation, AssertionResponse, AttestationVerifier, CeremonyEngine,
    CreationChallenge, RegistrationResponse, RequestChallenge, WebAuthnCredential,
};

/// The factor kinds the orchestrator can dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorKind {
    Totp,
    Webauthn,
    BackupCode,
}

impl FactorKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Totp => "totp",
            Self::Webauthn => "webauthn",
            Self::BackupCode => "backup_code",
        }
    }
}

/// Factor-specific verification payload.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "factor_kind", content = "payload", rename_all = "snake_case")]
pub enum FactorPayload {
    Totp {
        code: String,
    },
    Webauthn {
        challenge_id: Uuid,
        response: AssertionResponse,
    },
    BackupCode {
        code: String,
    },
}

impl FactorPayload {
    #[must_use]
    pub fn kind(&self) -> FactorKind {
        match self {
            Self::Totp { .. } => FactorKind::Totp,
            Self::Webauthn { .. } => FactorKind::Webauthn,
            Self::BackupCode { .. } => FactorKind::BackupCode,
        }
    }
}

/// A verification request from the session layer.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VerificationRequest {
    pub user_id: String,
    #[serde(flatten)]
    pub payload: FactorPayload,
}

/// The verdict for one verification attempt.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationOutcome {
    pub verified: bool,
    pub factor_used: FactorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_lockout_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denial: Option<DenialReason>,
}

impl VerificationOutcome {
    fn verified(factor: FactorKind) -> Self {
        Self {
            verified: true,
            factor_used: factor,
            remaining_lockout_seconds: None,
            denial: None,
        }
    }

    fn denied(factor: FactorKind, denial: DenialReason) -> Self {
        Self {
            verified: false,
            factor_used: factor,
            remaining_lockout_seconds: None,
            denial: Some(denial),
        }
    }
}

/// Lockout policy configuration.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct LockoutPolicy {
    /// Failures within the window that trigger a lockout (default: 5).
    pub max_failures: u32,
    /// Rolling window the failures must fall into (default: 900 s).
    pub window_seconds: u64,
    /// First lockout duration (default: 900 s).
    pub base_lockout_seconds: u64,
    /// Ceiling for the doubling lockout duration (default: 7200 s).
    pub max_lockout_seconds: u64,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_failures: 5,
            window_seconds: 15 * 60,
            base_lockout_seconds: 15 * 60,
            max_lockout_seconds: 2 * 60 * 60,
        }
    }
}

impl LockoutPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure threshold.
    #[must_use]
    pub fn max_failures(mut self, max: u32) -> Self {
        self.max_failures = max;
        self
    }

    /// Set the rolling failure window.
    #[must_use]
    pub fn window_seconds(mut self, seconds: u64) -> Self {
        self.window_seconds = seconds;
        self
    }

    /// Set the first lockout duration.
    #[must_use]
    pub fn base_lockout_seconds(mut self, seconds: u64) -> Self {
        self.base_lockout_seconds = seconds;
        self
    }

    /// Set the lockout duration ceiling.
    #[must_use]
    pub fn max_lockout_seconds(mut self, seconds: u64) -> Self {
        self.max_lockout_seconds = seconds;
        self
    }

    /// Load lockout policy from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let mut policy = Self::default();

        if let Some(max) = get_env_with_prefix("LOCKOUT_MAX_FAILURES") {
            if let Ok(m) = max.parse() {
                policy.max_failures = m;
            }
        }
        if let Some(window) = get_env_with_prefix("LOCKOUT_WINDOW_SECONDS") {
            if let Ok(w) = window.parse() {
                policy.window_seconds = w;
            }
        }
        if let Some(base) = get_env_with_prefix("LOCKOUT_BASE_SECONDS") {
            if let Ok(b) = base.parse() {
                policy.base_lockout_seconds = b;
            }
        }
        if let Some(max) = get_env_with_prefix("LOCKOUT_MAX_SECONDS") {
            if let Ok(m) = max.parse() {
                policy.max_lockout_seconds = m;
            }
        }

        policy
    }

    /// Lockout duration for the nth consecutive lockout: the base
    /// duration doubled per repeat, capped.
    #[must_use]
    pub fn lockout_duration(&self, streak: u32) -> Duration {
        let exponent = streak.saturating_sub(1).min(16);
        let seconds = self
            .base_lockout_seconds
            .saturating_mul(1u64 << exponent)
            .min(self.max_lockout_seconds);
        Duration::from_secs(seconds)
    }
}

/// Verification state for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MfaState {
    /// No factor attempt in flight.
    Unverified,
    /// A factor attempt was dispatched and has not yet succeeded.
    AwaitingFactor,
    /// Terminal success.
    Verified,
    /// Terminal until the expiry passes, then resets to `Unverified`.
    Locked { until: SystemTime },
}

/// Events driving the state machine.
#[derive(Debug, Clone, Copy)]
pub enum MfaEvent {
    FactorRequested,
    FactorPassed,
    /// A factor attempt failed; `lock_until` is set when the failure
    /// crossed the threshold.
    FactorFailed { lock_until: Option<SystemTime> },
    LockoutExpired,
}

/// The pure transition function: `(state, event) -> state'`.
///
/// `Locked` absorbs every event except `LockoutExpired`; everything else
/// follows the factor outcome.
#[must_use]
pub fn transition(state: MfaState, event: MfaEvent) -> MfaState {
    match (state, event) {
        (MfaState::Locked { .. }, MfaEvent::LockoutExpired) => MfaState::Unverified,
        (MfaState::Locked { until }, _) => MfaState::Locked { until },
        (_, MfaEvent::FactorRequested) => MfaState::AwaitingFactor,
        (_, MfaEvent::FactorPassed) => MfaState::Verified,
        (_, MfaEvent::FactorFailed { lock_until: Some(until) }) => MfaState::Locked { until },
        (_, MfaEvent::FactorFailed { lock_until: None }) => MfaState::AwaitingFactor,
        (state, MfaEvent::LockoutExpired) => state,
    }
}

#[derive(Debug, Clone)]
struct AttemptState {
    state: MfaState,
    failures: u32,
    window_started_at: Option<SystemTime>,
    lockout_streak: u32,
    last_totp_counter: Option<u64>,
    last_backup_code: Option<Uuid>,
}

impl Default for AttemptState {
    fn default() -> Self {
        Self {
            state: MfaState::Unverified,
            failures: 0,
            window_started_at: None,
            lockout_streak: 0,
            last_totp_counter: None,
            last_backup_code: None,
        }
    }
}

/// Read-only view of a user's attempt state, for the session layer.
#[derive(Debug, Clone, Copy)]
pub struct AttemptSnapshot {
    pub state: MfaState,
    pub failures: u32,
    pub lockout_streak: u32,
    /// Entry id of the last consumed backup code, so a client retry of
    /// an already-honored request can be told apart from a burned code.
    pub last_backup_code: Option<Uuid>,
}

/// A successful verification, for the audit trail.
#[derive(Debug, Clone)]
pub struct VerifiedEvent {
    pub user_id: String,
    pub factor: FactorKind,
    pub at: SystemTime,
}

/// A lockout transition.
#[derive(Debug, Clone)]
pub struct LockoutEvent {
    pub user_id: String,
    pub failures: u32,
    pub locked_until: SystemTime,
    pub streak: u32,
}

/// A sign-count regression; the credential is already disabled.
#[derive(Debug, Clone)]
pub struct CredentialCompromisedEvent {
    pub user_id: String,
    pub at: SystemTime,
}

/// Notification seam for the external notification collaborator.
///
/// Injected at construction; the engine never reaches for a global
/// manager. Every method defaults to a no-op so sinks implement only
/// what they care about.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn on_verified(&self, event: VerifiedEvent) {
        let _ = event;
    }

    async fn on_lockout(&self, event: LockoutEvent) {
        let _ = event;
    }

    async fn on_credential_compromised(&self, event: CredentialCompromisedEvent) {
        let _ = event;
    }
}

/// Sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEvents;

#[async_trait]
impl EventSink for NoopEvents {}

/// Composes the factor engines behind one verification contract.
pub struct MfaOrchestrator<S, B: BackupCodeStore, C> {
    totp: TotpEngine,
    secrets: Arc<S>,
    backup: BackupCodeManager<B>,
    credentials: Arc<C>,
    ceremony: CeremonyEngine<C>,
    policy: LockoutPolicy,
    attempts: DashMap<(String, FactorKind), Arc<Mutex<AttemptState>>>,
    events: Arc<dyn EventSink>,
}

impl<S, B, C> MfaOrchestrator<S, B, C>
where
    S: SecretStore,
    B: BackupCodeStore,
    C: CredentialStore,
{
    /// Create an orchestrator over the three stores with the default
    /// attestation policy (`none` only).
    pub fn new(
        config: EngineConfig,
        secrets: S,
        backup_store: B,
        credentials: C,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self::with_attestation(
            config,
            secrets,
            backup_store,
            credentials,
            Arc::new(AcceptNoneAttestation),
            events,
        )
    }

    /// Create an orchestrator with an explicit attestation policy.
    pub fn with_attestation(
        config: EngineConfig,
        secrets: S,
        backup_store: B,
        credentials: C,
        attestation: Arc<dyn AttestationVerifier>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let credentials = Arc::new(credentials);
        Self {
            totp: TotpEngine::new(config.totp.clone()),
            secrets: Arc::new(secrets),
            backup: BackupCodeManager::new(backup_store, config.backup.clone()),
            ceremony: CeremonyEngine::new(
                config.relying_party.clone(),
                Arc::clone(&credentials),
                attestation,
            ),
            credentials,
            policy: config.lockout,
            attempts: DashMap::new(),
            events,
        }
    }

    // ------------------------------------------------------------------
    // Enrollment
    // ------------------------------------------------------------------

    /// Provision a TOTP secret for a user and store it.
    ///
    /// The returned provisioning data (secret + `otpauth://` URI) is the
    /// only plaintext copy that will ever exist.
    pub async fn enroll_totp(
        &self,
        user_id: &str,
        account_label: &str,
    ) -> Result<TotpProvisioning> {
        let provisioning = self.totp.provision(account_label)?;
        self.secrets
            .set_totp_secret(user_id, provisioning.secret.clone())
            .await?;

        tracing::info!(
            target: "mfa.totp.enrolled",
            user_id = %user_id,
            "TOTP factor enrolled"
        );
        Ok(provisioning)
    }

    /// Remove a user's TOTP factor, destroying the stored secret.
    pub async fn remove_totp(&self, user_id: &str) -> Result<()> {
        self.secrets.remove_totp_secret(user_id).await
    }

    /// Generate (or regenerate) the user's backup code set.
    pub async fn generate_backup_codes(&self, user_id: &str) -> Result<Vec<String>> {
        self.backup.generate(user_id).await
    }

    /// Count of unconsumed backup codes.
    pub async fn backup_codes_remaining(&self, user_id: &str) -> Result<usize> {
        self.backup.remaining(user_id).await
    }

    /// Start a WebAuthn registration ceremony.
    pub fn begin_webauthn_registration(
        &self,
        user_id: &str,
        user_name: &str,
    ) -> CreationChallenge {
        self.ceremony.begin_registration(user_id, user_name)
    }

    /// Finish a WebAuthn registration ceremony.
    pub async fn finish_webauthn_registration(
        &self,
        challenge_id: Uuid,
        response: &RegistrationResponse,
    ) -> Result<WebAuthnCredential> {
        self.ceremony.finish_registration(challenge_id, response).await
    }

    /// Start a WebAuthn authentication ceremony.
    pub async fn begin_webauthn_authentication(&self, user_id: &str) -> Result<RequestChallenge> {
        self.ceremony.begin_authentication(user_id).await
    }

    /// The ceremony engine, for callers that drive ceremonies directly.
    #[must_use]
    pub fn ceremony(&self) -> &CeremonyEngine<C> {
        &self.ceremony
    }

    /// The factor kinds a user currently has enrolled.
    pub async fn enrolled_factors(&self, user_id: &str) -> Result<Vec<FactorKind>> {
        let mut factors = Vec::new();
        if self.secrets.get_totp_secret(user_id).await?.is_some() {
            factors.push(FactorKind::Totp);
        }
        let rp_id = &self.ceremony.relying_party().id;
        if self
            .credentials
            .list_for_user(rp_id, user_id)
            .await?
            .iter()
            .any(|c| !c.disabled)
        {
            factors.push(FactorKind::Webauthn);
        }
        if self.backup.has_set(user_id).await? {
            factors.push(FactorKind::BackupCode);
        }
        Ok(factors)
    }

    // ------------------------------------------------------------------
    // Verification
    // ------------------------------------------------------------------

    /// Verify one factor submission against the current wall clock.
    pub async fn verify(&self, request: &VerificationRequest) -> Result<VerificationOutcome> {
        self.verify_at(request, SystemTime::now()).await
    }

    /// Verify one factor submission at an explicit instant.
    ///
    /// Returns `Ok` with a verdict for every completed attempt; `Err` is
    /// reserved for infrastructure faults, which do not touch the
    /// failure counter.
    pub async fn verify_at(
        &self,
        request: &VerificationRequest,
        now: SystemTime,
    ) -> Result<VerificationOutcome> {
        let kind = request.payload.kind();
        let cell = self.attempt_cell(&request.user_id, kind);
        // The per-user critical section: everything from the lockout
        // gate to the counter update happens under this lock. Attempt
        // state is keyed per factor kind, so a TOTP lockout does not
        // block a WebAuthn assertion.
        let mut state = cell.lock().await;

        if let MfaState::Locked { until } = state.state {
            if now < until {
                let remaining = until
                    .duration_since(now)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                tracing::debug!(
                    target: "mfa.orchestrator.locked",
                    user_id = %request.user_id,
                    remaining_seconds = remaining,
                    "Verification rejected inside lockout window"
                );
                let mut outcome = VerificationOutcome::denied(kind, DenialReason::Locked);
                outcome.remaining_lockout_seconds = Some(remaining);
                return Ok(outcome);
            }
            state.state = transition(state.state, MfaEvent::LockoutExpired);
            state.failures = 0;
            state.window_started_at = None;
            // The streak survives so a repeat offender's next lockout
            // doubles.
        }

        state.state = transition(state.state, MfaEvent::FactorRequested);

        match self
            .dispatch(&request.user_id, &request.payload, &mut state, now)
            .await
        {
            Ok(()) => {
                state.state = transition(state.state, MfaEvent::FactorPassed);
                state.failures = 0;
                state.window_started_at = None;
                state.lockout_streak = 0;

                tracing::info!(
                    target: "mfa.orchestrator.verified",
                    user_id = %request.user_id,
                    factor = kind.as_str(),
                    "Verification succeeded"
                );
                self.events
                    .on_verified(VerifiedEvent {
                        user_id: request.user_id.clone(),
                        factor: kind,
                        at: now,
                    })
                    .await;

                Ok(VerificationOutcome::verified(kind))
            }
            Err(err) if err.is_infrastructure() => Err(err),
            Err(MfaError::NoFactorsEnrolled) => {
                tracing::debug!(
                    target: "mfa.orchestrator.not_enrolled",
                    user_id = %request.user_id,
                    factor = kind.as_str(),
                    "Verification requested for an unenrolled factor"
                );
                Ok(VerificationOutcome::denied(
                    kind,
                    DenialReason::NoFactorsEnrolled,
                ))
            }
            Err(err) => {
                self.record_failure(&request.user_id, kind, err, &mut state, now)
                    .await
            }
        }
    }

    /// Snapshot a user's attempt state for one factor kind.
    pub async fn attempt_snapshot(
        &self,
        user_id: &str,
        kind: FactorKind,
    ) -> Option<AttemptSnapshot> {
        let cell = self
            .attempts
            .get(&(user_id.to_string(), kind))?
            .clone();
        let state = cell.lock().await;
        Some(AttemptSnapshot {
            state: state.state,
            failures: state.failures,
            lockout_streak: state.lockout_streak,
            last_backup_code: state.last_backup_code,
        })
    }

    /// Forcefully clear a user's attempt state across all factor kinds
    /// (admin unlock).
    pub async fn reset_attempts(&self, user_id: &str) {
        let before = self.attempts.len();
        self.attempts.retain(|(user, _), _| user.as_str() != user_id);
        if self.attempts.len() != before {
            tracing::warn!(
                target: "mfa.orchestrator.reset",
                user_id = %user_id,
                "Attempt state cleared"
            );
        }
    }

    fn attempt_cell(&self, user_id: &str, kind: FactorKind) -> Arc<Mutex<AttemptState>> {
        self.attempts
            .entry((user_id.to_string(), kind))
            .or_insert_with(|| Arc::new(Mutex::new(AttemptState::default())))
            .clone()
    }

    async fn dispatch(
        &self,
        user_id: &str,
        payload: &FactorPayload,
        state: &mut AttemptState,
        now: SystemTime,
    ) -> Result<()> {
        match payload {
            FactorPayload::Totp { code } => {
                let secret = self
                    .secrets
                    .get_totp_secret(user_id)
                    .await?
                    .ok_or(MfaError::NoFactorsEnrolled)?;
                let at_time = unix_seconds(now)?;
                let matched = self.totp.verify_at(&secret, code, user_id, at_time)?;
                let Some(counter) = matched else {
                    return Err(MfaError::InvalidCode);
                };
                if state
                    .last_totp_counter
                    .is_some_and(|last| counter <= last)
                {
                    tracing::warn!(
                        target: "mfa.totp.replay",
                        user_id = %user_id,
                        counter,
                        "TOTP counter reuse rejected"
                    );
                    return Err(MfaError::InvalidCode);
                }
                state.last_totp_counter = Some(counter);
                Ok(())
            }
            FactorPayload::BackupCode { code } => {
                if !self.backup.has_set(user_id).await? {
                    return Err(MfaError::NoFactorsEnrolled);
                }
                match self.backup.consume(user_id, code).await? {
                    Some(entry_id) => {
                        state.last_backup_code = Some(entry_id);
                        Ok(())
                    }
                    None => Err(MfaError::InvalidCode),
                }
            }
            FactorPayload::Webauthn {
                challenge_id,
                response,
            } => {
                let rp_id = &self.ceremony.relying_party().id;
                let enrolled = self
                    .credentials
                    .list_for_user(rp_id, user_id)
                    .await?
                    .iter()
                    .any(|c| !c.disabled);
                if !enrolled {
                    return Err(MfaError::NoFactorsEnrolled);
                }

                let assertion = self
                    .ceremony
                    .finish_authentication_at(*challenge_id, response, now)
                    .await?;
                if assertion.user_handle != user_id {
                    return Err(MfaError::invalid_payload("credential not recognized"));
                }
                Ok(())
            }
        }
    }

    async fn record_failure(
        &self,
        user_id: &str,
        kind: FactorKind,
        err: MfaError,
        state: &mut AttemptState,
        now: SystemTime,
    ) -> Result<VerificationOutcome> {
        debug_assert!(err.is_attempt_failure());

        // Rolling window: failures outside it start a fresh count.
        let window = Duration::from_secs(self.policy.window_seconds);
        let in_window = state
            .window_started_at
            .and_then(|start| now.duration_since(start).ok())
            .map(|elapsed| elapsed < window)
            .unwrap_or(false);
        if !in_window {
            state.failures = 0;
            state.window_started_at = Some(now);
        }
        state.failures += 1;

        let denial = err.denial_reason();
        if matches!(err, MfaError::CredentialCloneSuspected) {
            self.events
                .on_credential_compromised(CredentialCompromisedEvent {
                    user_id: user_id.to_string(),
                    at: now,
                })
                .await;
        }

        tracing::debug!(
            target: "mfa.orchestrator.failed",
            user_id = %user_id,
            factor = kind.as_str(),
            failures = state.failures,
            error = %err,
            "Verification attempt failed"
        );

        let mut outcome = VerificationOutcome::denied(kind, denial);

        if state.failures >= self.policy.max_failures {
            state.lockout_streak += 1;
            let duration = self.policy.lockout_duration(state.lockout_streak);
            let until = now + duration;
            state.state = transition(
                state.state,
                MfaEvent::FactorFailed {
                    lock_until: Some(until),
                },
            );
            outcome.remaining_lockout_seconds = Some(duration.as_secs());

            tracing::warn!(
                target: "mfa.orchestrator.lockout",
                user_id = %user_id,
                failures = state.failures,
                streak = state.lockout_streak,
                duration_secs = duration.as_secs(),
                "Verification locked"
            );
            self.events
                .on_lockout(LockoutEvent {
                    user_id: user_id.to_string(),
                    failures: state.failures,
                    locked_until: until,
                    streak: state.lockout_streak,
                })
                .await;
        } else {
            state.state = transition(state.state, MfaEvent::FactorFailed { lock_until: None });
        }

        Ok(outcome)
    }
}

fn unix_seconds(now: SystemTime) -> Result<u64> {
    now.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| MfaError::provisioning(format!("system clock before epoch: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_defaults() {
        let policy = LockoutPolicy::new();
        assert_eq!(policy.max_failures, 5);
        assert_eq!(policy.window_seconds, 15 * 60);
        assert_eq!(policy.base_lockout_seconds, 15 * 60);
        assert_eq!(policy.max_lockout_seconds, 2 * 60 * 60);
    }

    #[test]
    fn lockout_duration_doubles_up_to_cap() {
        let policy = LockoutPolicy::new()
            .base_lockout_seconds(900)
            .max_lockout_seconds(7200);

        assert_eq!(policy.lockout_duration(1), Duration::from_secs(900));
        assert_eq!(policy.lockout_duration(2), Duration::from_secs(1800));
        assert_eq!(policy.lockout_duration(3), Duration::from_secs(3600));
        assert_eq!(policy.lockout_duration(4), Duration::from_secs(7200));
        assert_eq!(policy.lockout_duration(5), Duration::from_secs(7200));
        assert_eq!(policy.lockout_duration(40), Duration::from_secs(7200));
    }

    #[test]
    fn transition_success_path() {
        let state = transition(MfaState::Unverified, MfaEvent::FactorRequested);
        assert_eq!(state, MfaState::AwaitingFactor);

        let state = transition(state, MfaEvent::FactorPassed);
        assert_eq!(state, MfaState::Verified);
    }

    #[test]
    fn transition_failure_below_threshold_keeps_awaiting() {
        let state = transition(
            MfaState::AwaitingFactor,
            MfaEvent::FactorFailed { lock_until: None },
        );
        assert_eq!(state, MfaState::AwaitingFactor);
    }

    #[test]
    fn transition_threshold_failure_locks() {
        let until = SystemTime::now() + Duration::from_secs(900);
        let state = transition(
            MfaState::AwaitingFactor,
            MfaEvent::FactorFailed {
                lock_until: Some(until),
            },
        );
        assert_eq!(state, MfaState::Locked { until });
    }

    #[test]
    fn locked_absorbs_everything_but_expiry() {
        let until = SystemTime::now() + Duration::from_secs(900);
        let locked = MfaState::Locked { until };

        assert_eq!(transition(locked, MfaEvent::FactorRequested), locked);
        assert_eq!(transition(locked, MfaEvent::FactorPassed), locked);
        assert_eq!(
            transition(locked, MfaEvent::FactorFailed { lock_until: None }),
            locked
        );
        assert_eq!(
            transition(locked, MfaEvent::LockoutExpired),
            MfaState::Unverified
        );
    }

    #[test]
    fn factor_payload_wire_shape() {
        let request = VerificationRequest {
            user_id: "user-1".to_string(),
            payload: FactorPayload::Totp {
                code: "123456".to_string(),
            },
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["user_id"], "user-1");
        assert_eq!(json["factor_kind"], "totp");
        assert_eq!(json["payload"]["code"], "123456");

        let parsed: VerificationRequest = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.payload.kind(), FactorKind::Totp);
    }

    #[test]
    fn backup_code_kind_serializes_snake_case() {
        let payload = FactorPayload::BackupCode {
            code: "AAAA-BBBB".to_string(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["factor_kind"], "backup_code");
    }
}
