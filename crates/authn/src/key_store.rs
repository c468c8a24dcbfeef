//! Cached signing key set for JWT verification.
//!
//! [`KeyStore`] holds the identity provider's public keys, fetched from a
//! [`JwksSource`] and parsed into a [`KeySet`].
//!
//! # Architecture
//!
//! ```text
//! get_key(kid) → load current KeySet (atomic pointer)
//!              → empty or past TTL? fetch from JwksSource (single-flight, timeout)
//!              → parse entries, swap in the new KeySet wholesale
//!              → map lookup by kid
//!              → miss? optionally refetch once (rate-limited), else KeyNotFound
//! ```
//!
//! # Cache Strategy
//!
//! - **Default**: fetched once, reused until [`KeyStore::invalidate`] or [`KeyStore::refresh`]
//! - **TTL**: optional; a key set older than [`RefreshPolicy::key_set_ttl`] is refetched
//! - **Unknown kid**: optional refetch on lookup miss, at most once per
//!   [`RefreshPolicy::min_refresh_interval`]
//!
//! Readers always observe a complete key set: the cache is an
//! [`ArcSwapOption`] replaced in one store, never mutated in place.

use std::{
    collections::{HashMap, hash_map::Entry},
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use arc_swap::ArcSwapOption;
use fail::fail_point;
use jsonwebtoken::{
    Algorithm, DecodingKey,
    jwk::{AlgorithmParameters, Jwk, KeyAlgorithm, PublicKeyUse},
};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{AuthError, BoxError},
    jwks::{JwksDocument, JwksSource},
};

/// Default timeout for a single key set fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Default minimum age of a key set before an unknown kid may trigger a refetch.
pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Key store failures.
///
/// `Unavailable` is a retryable dependency fault and must never be reported
/// as `KeyNotFound`.
#[derive(Debug, Error)]
pub enum KeyStoreError {
    /// The key id is not in the current key set.
    #[error("Signing key not found: {kid}")]
    KeyNotFound {
        /// Key id that was looked up.
        kid: String,
    },

    /// The key set could not be fetched or contained no usable keys.
    #[error("Key store unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
        /// Underlying cause, when there is one.
        #[source]
        source: Option<BoxError>,
    },
}

impl KeyStoreError {
    /// Creates a [`KeyStoreError::KeyNotFound`].
    pub fn key_not_found(kid: impl Into<String>) -> Self {
        Self::KeyNotFound { kid: kid.into() }
    }

    /// Creates a [`KeyStoreError::Unavailable`] without a source.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable { message: message.into(), source: None }
    }

    /// Creates a [`KeyStoreError::Unavailable`] wrapping `source`.
    pub fn unavailable_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Unavailable { message: message.into(), source: Some(Arc::new(source)) }
    }
}

impl From<KeyStoreError> for AuthError {
    fn from(err: KeyStoreError) -> Self {
        match err {
            KeyStoreError::KeyNotFound { kid } => {
                AuthError::invalid_key(kid, "key id not found in the signing key set")
            },
            KeyStoreError::Unavailable { message, source } => {
                AuthError::KeyStoreUnavailable { message, source }
            },
        }
    }
}

/// A public key usable for signature verification.
pub struct SigningKey {
    kid: String,
    algorithm: Option<Algorithm>,
    decoding_key: DecodingKey,
}

impl SigningKey {
    /// Builds a signing key from one JWKS entry.
    ///
    /// # Errors
    ///
    /// Returns a description of why the entry is not a usable public
    /// signature key: unparsable JSON, no `kid`, `use: "enc"`, a symmetric
    /// `oct` key, a non-signature `alg`, or invalid key material.
    pub fn from_jwk_value(entry: &serde_json::Value) -> Result<Self, String> {
        let jwk: Jwk =
            serde_json::from_value(entry.clone()).map_err(|e| format!("unparsable JWK: {e}"))?;

        let kid = jwk
            .common
            .key_id
            .clone()
            .filter(|kid| !kid.is_empty())
            .ok_or_else(|| "JWK has no kid".to_owned())?;

        if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
            return Err(format!("JWK {kid} is an encryption key"));
        }

        if matches!(jwk.algorithm, AlgorithmParameters::OctetKey(_)) {
            return Err(format!("JWK {kid} is a symmetric key"));
        }

        let algorithm = match jwk.common.key_algorithm {
            Some(key_alg) => Some(
                signature_algorithm(key_alg)
                    .ok_or_else(|| format!("JWK {kid} declares a non-signature algorithm"))?,
            ),
            None => None,
        };

        let decoding_key =
            DecodingKey::from_jwk(&jwk).map_err(|e| format!("JWK {kid} has invalid material: {e}"))?;

        Ok(Self { kid, algorithm, decoding_key })
    }

    /// Returns the key id.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Returns the algorithm published with the key (`alg` member), if any.
    #[must_use]
    pub fn algorithm(&self) -> Option<Algorithm> {
        self.algorithm
    }

    /// Returns the key material for `jsonwebtoken`.
    #[must_use]
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Maps a JWK `alg` member to a signature algorithm.
///
/// Symmetric and key-encryption algorithms map to `None`.
fn signature_algorithm(key_alg: KeyAlgorithm) -> Option<Algorithm> {
    match key_alg {
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
        _ => None,
    }
}

/// An immutable generation of signing keys, in published order.
#[derive(Debug)]
pub struct KeySet {
    keys: Vec<Arc<SigningKey>>,
    index: HashMap<String, usize>,
    fetched_at: Instant,
}

impl KeySet {
    /// Parses a JWKS document.
    ///
    /// Unusable entries are skipped with a warning. When two entries share a
    /// key id, the first one wins.
    ///
    /// # Errors
    ///
    /// Returns [`KeyStoreError::Unavailable`] if no usable key remains.
    pub fn from_document(document: &JwksDocument) -> Result<Self, KeyStoreError> {
        let mut keys = Vec::with_capacity(document.keys.len());
        let mut index = HashMap::with_capacity(document.keys.len());

        for entry in &document.keys {
            let key = match SigningKey::from_jwk_value(entry) {
                Ok(key) => key,
                Err(reason) => {
                    tracing::warn!(%reason, "skipping unusable JWKS entry");
                    continue;
                },
            };

            match index.entry(key.kid.clone()) {
                Entry::Occupied(_) => {
                    tracing::warn!(kid = %key.kid, "skipping duplicate key id in JWKS");
                },
                Entry::Vacant(slot) => {
                    slot.insert(keys.len());
                    keys.push(Arc::new(key));
                },
            }
        }

        if keys.is_empty() {
            return Err(KeyStoreError::unavailable(format!(
                "key set contains no usable signing keys ({} entries published)",
                document.keys.len()
            )));
        }

        Ok(Self { keys, index, fetched_at: Instant::now() })
    }

    /// Looks up a key by id.
    #[must_use]
    pub fn get(&self, kid: &str) -> Option<&Arc<SigningKey>> {
        self.index.get(kid).map(|&i| &self.keys[i])
    }

    /// Returns the key ids in published order.
    pub fn kids(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(|key| key.kid())
    }

    /// Returns the number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` if the set holds no keys. Never true for a fetched set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Returns when this set was fetched.
    #[must_use]
    pub fn fetched_at(&self) -> Instant {
        self.fetched_at
    }

    /// Returns how long ago this set was fetched.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }
}

/// When the key store refetches the key set on its own.
///
/// The default never refetches automatically: keys are fetched once and
/// kept until [`KeyStore::invalidate`] or [`KeyStore::refresh`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// Refetch a key set older than this on the next lookup.
    pub key_set_ttl: Option<Duration>,
    /// Refetch once when a lookup misses, to pick up rotated keys.
    pub refresh_on_unknown_kid: bool,
    /// Minimum key set age before a miss may trigger a refetch.
    pub min_refresh_interval: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            key_set_ttl: None,
            refresh_on_unknown_kid: false,
            min_refresh_interval: DEFAULT_MIN_REFRESH_INTERVAL,
        }
    }
}

/// Process-wide cache of the identity provider's signing keys.
///
/// # Concurrency
///
/// Lookups are lock-free loads of the current [`KeySet`]. Fetches are
/// single-flight: concurrent misses wait for one fetch and share its result.
/// A generation counter bumped by [`invalidate`](Self::invalidate) keeps a
/// fetch that raced an invalidation from re-populating the cache.
pub struct KeyStore {
    /// Backing key set provider.
    source: Arc<dyn JwksSource>,
    /// Current key set, swapped wholesale on refresh.
    current: ArcSwapOption<KeySet>,
    /// Serializes fetches.
    refresh_lock: Mutex<()>,
    /// Monotonic counter incremented on every invalidation.
    invalidation_gen: AtomicU64,
    /// Automatic refetch policy.
    policy: RefreshPolicy,
    /// Upper bound on a single fetch.
    fetch_timeout: Duration,
    /// Cancels in-flight and future fetches on shutdown.
    cancel_token: CancellationToken,
    /// Number of fetch attempts, successful or not.
    fetch_count: AtomicU64,
}

impl KeyStore {
    /// Creates a key store with the default policy and fetch timeout.
    #[must_use]
    pub fn new(source: Arc<dyn JwksSource>) -> Self {
        Self {
            source,
            current: ArcSwapOption::empty(),
            refresh_lock: Mutex::new(()),
            invalidation_gen: AtomicU64::new(0),
            policy: RefreshPolicy::default(),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            cancel_token: CancellationToken::new(),
            fetch_count: AtomicU64::new(0),
        }
    }

    /// Sets the automatic refetch policy.
    #[must_use]
    pub fn with_policy(mut self, policy: RefreshPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the timeout applied to every fetch.
    #[must_use]
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Returns the signing key for `kid`, fetching the key set if needed.
    ///
    /// # Errors
    ///
    /// - [`KeyStoreError::KeyNotFound`] if the current key set has no such key
    /// - [`KeyStoreError::Unavailable`] if the key set could not be fetched
    #[tracing::instrument(skip(self))]
    pub async fn get_key(&self, kid: &str) -> Result<Arc<SigningKey>, KeyStoreError> {
        let key_set = self.current_key_set().await?;
        if let Some(key) = key_set.get(kid) {
            tracing::debug!(cache = "hit", "signing key resolved");
            return Ok(Arc::clone(key));
        }

        if self.policy.refresh_on_unknown_kid && key_set.age() >= self.policy.min_refresh_interval
        {
            tracing::debug!(cache = "miss", "unknown key id, refetching key set");
            let refreshed = self.refresh_from(Some(&key_set)).await?;
            if let Some(key) = refreshed.get(kid) {
                return Ok(Arc::clone(key));
            }
        }

        tracing::debug!(cache = "miss", "signing key not found");
        Err(KeyStoreError::key_not_found(kid))
    }

    /// Forces a refetch of the key set and returns the new set.
    ///
    /// If another task completed a fetch while this one waited, that result
    /// is returned instead of fetching again.
    ///
    /// # Errors
    ///
    /// Returns [`KeyStoreError::Unavailable`] if the fetch fails. The
    /// previously cached set, if any, stays in place.
    #[tracing::instrument(skip(self))]
    pub async fn refresh(&self) -> Result<Arc<KeySet>, KeyStoreError> {
        let seen = self.current.load_full();
        self.refresh_from(seen.as_ref()).await
    }

    /// Drops the cached key set; the next lookup refetches.
    ///
    /// An audit event is emitted at INFO level.
    #[tracing::instrument(skip(self))]
    pub fn invalidate(&self) {
        // Bump generation first so an in-flight fetch will not store its result
        self.invalidation_gen.fetch_add(1, Ordering::Release);
        let evicted = self.current.swap(None).map_or(0, |set| set.len());
        tracing::info!(
            audit.action = "invalidate_key_set",
            audit.source = %self.source.describe(),
            audit.evicted_keys = evicted,
            "audit_event"
        );
    }

    /// Returns the cached key set, if one is loaded.
    #[must_use]
    pub fn key_set(&self) -> Option<Arc<KeySet>> {
        self.current.load_full()
    }

    /// Returns the number of fetch attempts made so far.
    #[must_use]
    pub fn fetch_count(&self) -> u64 {
        self.fetch_count.load(Ordering::Relaxed)
    }

    /// Returns the cancellation token guarding fetches.
    ///
    /// Callers can use this to tie the store to an external shutdown signal.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    /// Cancels in-flight fetches and drops the cached key set.
    ///
    /// Every later lookup fails with [`KeyStoreError::Unavailable`].
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
        self.invalidate();
    }

    async fn current_key_set(&self) -> Result<Arc<KeySet>, KeyStoreError> {
        match self.current.load_full() {
            Some(set) if !self.is_stale(&set) => Ok(set),
            Some(set) => {
                tracing::debug!(age_secs = set.age().as_secs(), "key set past TTL");
                self.refresh_from(Some(&set)).await
            },
            None => self.refresh_from(None).await,
        }
    }

    fn is_stale(&self, set: &KeySet) -> bool {
        self.policy.key_set_ttl.is_some_and(|ttl| set.age() >= ttl)
    }

    /// Fetches a new key set unless the one in place differs from `seen`.
    async fn refresh_from(&self, seen: Option<&Arc<KeySet>>) -> Result<Arc<KeySet>, KeyStoreError> {
        let _guard = self.refresh_lock.lock().await;

        if let Some(current) = self.current.load_full() {
            let replaced = seen.is_none_or(|seen| !Arc::ptr_eq(seen, &current));
            if replaced && !self.is_stale(&current) {
                tracing::debug!("key set refreshed by a concurrent lookup");
                return Ok(current);
            }
        }

        let gen_before = self.invalidation_gen.load(Ordering::Acquire);
        let key_set = Arc::new(self.fetch_key_set().await?);

        if self.invalidation_gen.load(Ordering::Acquire) == gen_before {
            self.current.store(Some(Arc::clone(&key_set)));
        } else {
            // The caller still gets the keys; the cache stays empty.
            tracing::debug!("discarding fetched key set: invalidated during fetch");
        }

        Ok(key_set)
    }

    async fn fetch_key_set(&self) -> Result<KeySet, KeyStoreError> {
        fail_point!("key-store-before-fetch", |_| {
            Err(KeyStoreError::unavailable("injected failure before JWKS fetch"))
        });

        if self.cancel_token.is_cancelled() {
            return Err(KeyStoreError::unavailable("key store is shut down"));
        }

        self.fetch_count.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        let fetched = tokio::select! {
            biased;
            () = self.cancel_token.cancelled() => {
                return Err(KeyStoreError::unavailable("key store is shut down"));
            }
            fetched = tokio::time::timeout(self.fetch_timeout, self.source.fetch()) => fetched,
        };

        let document = match fetched {
            Ok(result) => result?,
            Err(_) => {
                return Err(KeyStoreError::unavailable(format!(
                    "JWKS fetch timed out after {}ms",
                    self.fetch_timeout.as_millis()
                )));
            },
        };

        let key_set = KeySet::from_document(&document)?;
        tracing::debug!(
            source = %self.source.describe(),
            keys = key_set.len(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "fetched signing key set"
        );
        Ok(key_set)
    }
}

impl fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyStore")
            .field("source", &self.source.describe())
            .field("cached_keys", &self.current.load_full().map(|set| set.len()))
            .field("policy", &self.policy)
            .field("fetch_timeout", &self.fetch_timeout)
            .finish_non_exhaustive()
    }
}
