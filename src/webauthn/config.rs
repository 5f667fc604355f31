//! Relying party configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::get_env_with_prefix;

/// Identity and policy of the relying party running the ceremonies.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RelyingPartyConfig {
    /// Relying party id: the domain credentials are scoped to.
    pub id: String,
    /// Human-readable name shown by authenticators.
    pub name: String,
    /// Exact origin client responses must have been produced for.
    pub origin: String,
    /// Challenge lifetime in seconds (default: 300). A response arriving
    /// later is rejected exactly like an invalid one.
    pub challenge_ttl_seconds: u64,
}

impl Default for RelyingPartyConfig {
    fn default() -> Self {
        Self {
            id: "localhost".to_string(),
            name: "App".to_string(),
            origin: "http://localhost".to_string(),
            challenge_ttl_seconds: 300,
        }
    }
}

impl RelyingPartyConfig {
    /// Create a config for a relying party id and origin.
    pub fn new(id: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            origin: origin.into(),
            ..Default::default()
        }
    }

    /// Set the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the challenge lifetime.
    #[must_use]
    pub fn with_challenge_ttl(mut self, seconds: u64) -> Self {
        self.challenge_ttl_seconds = seconds;
        self
    }

    /// Load relying party configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(id) = get_env_with_prefix("RP_ID") {
            config.id = id;
        }
        if let Some(name) = get_env_with_prefix("RP_NAME") {
            config.name = name;
        }
        if let Some(origin) = get_env_with_prefix("RP_ORIGIN") {
            config.origin = origin;
        }
        if let Some(ttl) = get_env_with_prefix("CHALLENGE_TTL_SECONDS") {
            if let Ok(t) = ttl.parse() {
                config.challenge_ttl_seconds = t;
            }
        }

        config
    }

    pub(crate) fn challenge_ttl(&self) -> Duration {
        Duration::from_secs(self.challenge_ttl_seconds)
    }
}
