//! Sources of the identity provider's JSON Web Key Set.
//!
//! [`KeyStore`](crate::key_store::KeyStore) never talks to the network
//! directly; it asks a [`JwksSource`] for the current document. The HTTP
//! implementation fetches the provider's published endpoint, and
//! [`StaticJwksSource`] serves a document held in memory.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::key_store::KeyStoreError;

/// A JWKS document as published by the identity provider.
///
/// Entries are kept as raw JSON so a single entry the verifier cannot use
/// (an encryption key, an unknown key type) does not make the whole document
/// unreadable. [`KeySet`](crate::key_store::KeySet) parses them one by one.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct JwksDocument {
    /// The published keys.
    pub keys: Vec<serde_json::Value>,
}

impl JwksDocument {
    /// Creates a document from raw key entries.
    #[must_use]
    pub fn new(keys: Vec<serde_json::Value>) -> Self {
        Self { keys }
    }
}

/// Provider of the signing key set.
///
/// Implementations must report every failure (transport, status, decoding)
/// as [`KeyStoreError::Unavailable`].
#[async_trait]
pub trait JwksSource: Send + Sync {
    /// Fetches the complete, current key set document.
    async fn fetch(&self) -> Result<JwksDocument, KeyStoreError>;

    /// Human-readable location of the key set, for logs.
    fn describe(&self) -> String;
}

/// Fetches the key set from a JWKS endpoint over HTTP(S).
#[derive(Clone, Debug)]
pub struct HttpJwksSource {
    client: reqwest::Client,
    url: String,
}

impl HttpJwksSource {
    /// Creates a source for `url` whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyStoreError::Unavailable`] if the HTTP client cannot be built
    /// (e.g. the TLS backend fails to initialize).
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, KeyStoreError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| KeyStoreError::unavailable_with_source("failed to build HTTP client", e))?;
        Ok(Self::with_client(client, url))
    }

    /// Creates a source using a caller-provided client (proxies, custom TLS roots).
    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self { client, url: url.into() }
    }

    /// Returns the JWKS endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl JwksSource for HttpJwksSource {
    async fn fetch(&self) -> Result<JwksDocument, KeyStoreError> {
        let response = self.client.get(&self.url).send().await.map_err(|e| {
            let message = if e.is_timeout() {
                "JWKS request timed out"
            } else {
                "JWKS request failed"
            };
            KeyStoreError::unavailable_with_source(message, e)
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(KeyStoreError::unavailable(format!("JWKS endpoint returned {status}")));
        }

        response
            .json::<JwksDocument>()
            .await
            .map_err(|e| KeyStoreError::unavailable_with_source("malformed JWKS document", e))
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Serves a key set held in memory.
///
/// The document can be swapped at runtime with [`replace`](Self::replace),
/// which is how tests simulate provider-side key rotation.
#[derive(Clone, Debug, Default)]
pub struct StaticJwksSource {
    document: Arc<RwLock<JwksDocument>>,
}

impl StaticJwksSource {
    /// Creates a source serving `document`.
    #[must_use]
    pub fn new(document: JwksDocument) -> Self {
        Self { document: Arc::new(RwLock::new(document)) }
    }

    /// Replaces the served document. Already-cached key sets are unaffected
    /// until the key store refreshes.
    pub fn replace(&self, document: JwksDocument) {
        *self.document.write() = document;
    }
}

#[async_trait]
impl JwksSource for StaticJwksSource {
    async fn fetch(&self) -> Result<JwksDocument, KeyStoreError> {
        Ok(self.document.read().clone())
    }

    fn describe(&self) -> String {
        "static".to_owned()
    }
}
