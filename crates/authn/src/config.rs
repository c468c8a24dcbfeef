//! Configuration for the authorization core.
//!
//! [`AuthConfig`] is loaded once at startup, either through its builder,
//! from a serialized document (durations in humantime notation, e.g. `"10s"`),
//! or from the process environment.

use std::time::Duration;

use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    jwt::DEFAULT_PERMISSIONS_CLAIM,
    key_store::{DEFAULT_FETCH_TIMEOUT, DEFAULT_MIN_REFRESH_INTERVAL, KeyStoreError, RefreshPolicy},
    validation::{algorithm_name, is_asymmetric},
};

/// Environment variable naming the identity provider domain.
pub const ENV_DOMAIN: &str = "AUTH0_DOMAIN";

/// Environment variable naming the expected audience.
pub const ENV_AUDIENCE: &str = "API_AUDIENCE";

/// Environment variable naming the accepted algorithm (optional).
pub const ENV_ALGORITHM: &str = "ALGORITHMS";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field is missing or has an unusable value.
    #[error("Invalid configuration for '{field}': {reason}")]
    Invalid {
        /// Name of the offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// The JWKS client could not be created.
    #[error("Failed to initialize JWKS client")]
    Client(#[source] KeyStoreError),
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid { field, reason: reason.into() }
    }
}

/// Authorization configuration.
///
/// # Example
///
/// ```
/// use drinks_authn::AuthConfig;
///
/// let config = AuthConfig::builder()
///     .domain("drinks.eu.auth0.com")
///     .audience("drinks")
///     .build()?;
///
/// assert_eq!(config.issuer(), "https://drinks.eu.auth0.com/");
/// assert_eq!(config.jwks_url(), "https://drinks.eu.auth0.com/.well-known/jwks.json");
/// # Ok::<(), drinks_authn::config::ConfigError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Identity provider domain, e.g. `tenant.auth0.com`.
    pub(crate) domain: String,

    /// Expected `aud` value.
    pub(crate) audience: String,

    /// Expected `iss` value; derived from the domain when absent.
    #[serde(default)]
    pub(crate) issuer: Option<String>,

    /// JWKS endpoint; derived from the domain when absent.
    #[serde(default)]
    pub(crate) jwks_url: Option<String>,

    /// The single accepted signature algorithm.
    #[serde(default = "default_algorithm")]
    pub(crate) algorithm: Algorithm,

    /// Name of the claim carrying permission strings.
    #[serde(default = "default_permissions_claim")]
    pub(crate) permissions_claim: String,

    /// Timeout for one JWKS fetch.
    #[serde(with = "humantime_serde", default = "default_fetch_timeout")]
    pub(crate) fetch_timeout: Duration,

    /// Refetch the key set once it is older than this.
    #[serde(with = "humantime_serde", default)]
    pub(crate) key_set_ttl: Option<Duration>,

    /// Refetch the key set when a token names an unknown key id.
    #[serde(default)]
    pub(crate) refresh_on_unknown_kid: bool,

    /// Minimum key set age before an unknown key id may trigger a refetch.
    #[serde(with = "humantime_serde", default = "default_min_refresh_interval")]
    pub(crate) min_refresh_interval: Duration,
}

fn default_algorithm() -> Algorithm {
    Algorithm::RS256
}

fn default_permissions_claim() -> String {
    DEFAULT_PERMISSIONS_CLAIM.to_owned()
}

fn default_fetch_timeout() -> Duration {
    DEFAULT_FETCH_TIMEOUT
}

fn default_min_refresh_interval() -> Duration {
    DEFAULT_MIN_REFRESH_INTERVAL
}

#[bon::bon]
impl AuthConfig {
    /// Creates a new configuration, validating all fields.
    ///
    /// # Optional Fields
    ///
    /// * `issuer` - Expected issuer (default: `https://{domain}/`).
    /// * `jwks_url` - JWKS endpoint (default: `https://{domain}/.well-known/jwks.json`).
    /// * `algorithm` - Accepted algorithm (default: RS256). Must be asymmetric.
    /// * `permissions_claim` - Permissions claim name (default: `permissions`).
    /// * `fetch_timeout` - JWKS fetch timeout (default: 10 seconds).
    /// * `key_set_ttl` - Key set lifetime (default: none, fetched once).
    /// * `refresh_on_unknown_kid` - Refetch on unknown key id (default: false).
    /// * `min_refresh_interval` - Rate limit for unknown key id refetches (default: 30 seconds).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a field fails [`validate`](Self::validate).
    #[builder]
    pub fn new(
        #[builder(into)] domain: String,
        #[builder(into)] audience: String,
        #[builder(into)] issuer: Option<String>,
        #[builder(into)] jwks_url: Option<String>,
        #[builder(default = default_algorithm())] algorithm: Algorithm,
        #[builder(into, default = default_permissions_claim())] permissions_claim: String,
        #[builder(default = DEFAULT_FETCH_TIMEOUT)] fetch_timeout: Duration,
        key_set_ttl: Option<Duration>,
        #[builder(default)] refresh_on_unknown_kid: bool,
        #[builder(default = DEFAULT_MIN_REFRESH_INTERVAL)] min_refresh_interval: Duration,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            domain,
            audience,
            issuer,
            jwks_url,
            algorithm,
            permissions_claim,
            fetch_timeout,
            key_set_ttl,
            refresh_on_unknown_kid,
            min_refresh_interval,
        };
        config.validate()?;
        Ok(config)
    }

    /// Loads the configuration from the process environment.
    ///
    /// Reads `AUTH0_DOMAIN`, `API_AUDIENCE` and, optionally, `ALGORITHMS`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a required variable is unset or a
    /// value fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads the configuration through `lookup`, which maps an environment
    /// variable name to its value.
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let domain = lookup(ENV_DOMAIN)
            .ok_or_else(|| ConfigError::invalid("domain", format!("{ENV_DOMAIN} is not set")))?;
        let audience = lookup(ENV_AUDIENCE)
            .ok_or_else(|| ConfigError::invalid("audience", format!("{ENV_AUDIENCE} is not set")))?;
        let algorithm = match lookup(ENV_ALGORITHM) {
            Some(name) => name.trim().parse::<Algorithm>().map_err(|_| {
                ConfigError::invalid("algorithm", format!("unknown algorithm '{name}'"))
            })?,
            None => default_algorithm(),
        };

        Self::builder().domain(domain).audience(audience).algorithm(algorithm).build()
    }
}

impl AuthConfig {
    /// Checks every field.
    ///
    /// Deserialized configurations are not validated automatically; call
    /// this (or let [`PermissionGuard::from_config`](crate::PermissionGuard::from_config)
    /// call it) before use.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if:
    /// - `domain`, `audience`, `issuer`, `jwks_url` or `permissions_claim` is empty
    /// - `domain` contains a scheme or path
    /// - `jwks_url` is not an `http(s)` URL
    /// - `algorithm` is symmetric
    /// - `fetch_timeout` is zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.domain.trim().is_empty() {
            return Err(ConfigError::invalid("domain", "cannot be empty"));
        }
        if self.domain.contains("://") || self.domain.contains('/') {
            return Err(ConfigError::invalid("domain", "must be a bare host name, e.g. tenant.auth0.com"));
        }
        if self.audience.is_empty() {
            return Err(ConfigError::invalid("audience", "cannot be empty"));
        }
        if self.issuer.as_deref().is_some_and(str::is_empty) {
            return Err(ConfigError::invalid("issuer", "cannot be empty"));
        }
        if let Some(url) = &self.jwks_url
            && !(url.starts_with("https://") || url.starts_with("http://"))
        {
            return Err(ConfigError::invalid("jwks_url", "must be an http(s) URL"));
        }
        if !is_asymmetric(self.algorithm) {
            return Err(ConfigError::invalid(
                "algorithm",
                format!("{} is symmetric; only asymmetric algorithms are accepted", algorithm_name(self.algorithm)),
            ));
        }
        if self.permissions_claim.is_empty() {
            return Err(ConfigError::invalid("permissions_claim", "cannot be empty"));
        }
        if self.fetch_timeout.is_zero() {
            return Err(ConfigError::invalid("fetch_timeout", "must be greater than zero"));
        }
        Ok(())
    }

    /// Returns the identity provider domain.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Returns the expected audience.
    #[must_use]
    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// Returns the expected issuer.
    #[must_use]
    pub fn issuer(&self) -> String {
        match &self.issuer {
            Some(issuer) => issuer.clone(),
            None => format!("https://{}/", self.domain),
        }
    }

    /// Returns the JWKS endpoint URL.
    #[must_use]
    pub fn jwks_url(&self) -> String {
        match &self.jwks_url {
            Some(url) => url.clone(),
            None => format!("https://{}/.well-known/jwks.json", self.domain),
        }
    }

    /// Returns the accepted algorithm.
    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Returns the permissions claim name.
    #[must_use]
    pub fn permissions_claim(&self) -> &str {
        &self.permissions_claim
    }

    /// Returns the JWKS fetch timeout.
    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    /// Returns the key store refresh policy.
    #[must_use]
    pub fn refresh_policy(&self) -> RefreshPolicy {
        RefreshPolicy {
            key_set_ttl: self.key_set_ttl,
            refresh_on_unknown_kid: self.refresh_on_unknown_kid,
            min_refresh_interval: self.min_refresh_interval,
        }
    }
}
