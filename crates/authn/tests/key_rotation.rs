//! Key rotation and concurrency tests for the key store.
//!
//! Readers must always observe a complete key set, either the one before a
//! refresh or the one after, and an invalidation that races a fetch must win.
#![allow(clippy::expect_used, clippy::panic)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use drinks_authn::{
    AuthError, JwksDocument, JwksSource, KeyStore, KeyStoreError, PermissionGuard, RawToken,
    StaticJwksSource, TokenVerifier,
    permissions::GET_DRINKS_DETAIL,
    testutil::{TestKey, jwks_document, test_settings, valid_claims},
};
use tokio::sync::Notify;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_readers_never_observe_torn_key_set() {
    let a1 = TestKey::generate("a1");
    let a2 = TestKey::generate("a2");
    let b1 = TestKey::generate("b1");
    let b2 = TestKey::generate("b2");
    let generation_a = jwks_document(&[&a1, &a2]);
    let generation_b = jwks_document(&[&b1, &b2]);

    let source = StaticJwksSource::new(generation_a.clone());
    let store = Arc::new(KeyStore::new(Arc::new(source.clone())));
    store.refresh().await.expect("initial fetch");

    let stop = Arc::new(AtomicBool::new(false));

    let writer = {
        let store = Arc::clone(&store);
        let stop = Arc::clone(&stop);
        tokio::spawn(async move {
            for round in 0..200 {
                let next = if round % 2 == 0 { &generation_b } else { &generation_a };
                source.replace(next.clone());
                if round % 3 == 0 {
                    store.invalidate();
                } else {
                    store.refresh().await.expect("refresh");
                }
                tokio::task::yield_now().await;
            }
            stop.store(true, Ordering::Release);
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            let stop = Arc::clone(&stop);
            tokio::spawn(async move {
                let mut observed = 0_u32;
                while !stop.load(Ordering::Acquire) {
                    if let Some(set) = store.key_set() {
                        let kids: Vec<&str> = set.kids().collect();
                        assert!(
                            kids == ["a1", "a2"] || kids == ["b1", "b2"],
                            "torn key set observed: {kids:?}"
                        );
                        observed += 1;
                    }
                    tokio::task::yield_now().await;
                }
                observed
            })
        })
        .collect();

    writer.await.expect("writer task");
    for reader in readers {
        reader.await.expect("reader task");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_authorize_during_rotation_only_sees_valid_outcomes() {
    let old = TestKey::generate("old");
    let new = TestKey::generate("new");
    let source = StaticJwksSource::new(jwks_document(&[&old]));
    let store = Arc::new(KeyStore::new(Arc::new(source.clone())));
    let guard = Arc::new(PermissionGuard::new(TokenVerifier::new(Arc::clone(&store), test_settings())));

    let header = format!("Bearer {}", old.sign(&valid_claims(&[GET_DRINKS_DETAIL])));

    let requests: Vec<_> = (0..64)
        .map(|i| {
            let guard = Arc::clone(&guard);
            let header = header.clone();
            tokio::spawn(async move {
                if i % 8 == 0 {
                    tokio::task::yield_now().await;
                }
                guard.authorize(Some(&header), GET_DRINKS_DETAIL).await
            })
        })
        .collect();

    source.replace(jwks_document(&[&new]));
    store.invalidate();

    for request in requests {
        let decision = request.await.expect("request task");
        match decision.failure() {
            None | Some(AuthError::InvalidKey { .. }) => {},
            Some(other) => panic!("unexpected failure during rotation: {other:?}"),
        }
    }

    let after = guard.authorize(Some(&header), GET_DRINKS_DETAIL).await;
    assert!(
        matches!(after.failure(), Some(AuthError::InvalidKey { .. })),
        "retired key must be rejected once the new set is loaded: {after:?}"
    );
}

/// Source whose fetch blocks until released, serving a fixed document.
struct GatedSource {
    document: JwksDocument,
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl JwksSource for GatedSource {
    async fn fetch(&self) -> Result<JwksDocument, KeyStoreError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(self.document.clone())
    }

    fn describe(&self) -> String {
        "gated".to_owned()
    }
}

#[tokio::test]
async fn invalidate_during_fetch_is_not_overwritten() {
    let key = TestKey::generate("k1");
    let source =
        Arc::new(GatedSource { document: jwks_document(&[&key]), entered: Notify::new(), release: Notify::new() });
    let store = Arc::new(KeyStore::new(Arc::clone(&source) as Arc<dyn JwksSource>));

    let lookup = {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.get_key("k1").await.map(|key| key.kid().to_owned()) })
    };

    source.entered.notified().await;
    store.invalidate();
    source.release.notify_one();

    let kid = lookup.await.expect("lookup task").expect("caller still gets the fetched key");
    assert_eq!(kid, "k1");
    assert!(store.key_set().is_none(), "pre-invalidation fetch must not repopulate the cache");
}

#[tokio::test]
async fn tokens_verify_across_generations_with_unknown_kid_refresh() {
    let old = TestKey::generate("gen-1");
    let new = TestKey::generate("gen-2");
    let source = StaticJwksSource::new(jwks_document(&[&old]));
    let store = KeyStore::new(Arc::new(source.clone())).with_policy(drinks_authn::RefreshPolicy {
        refresh_on_unknown_kid: true,
        min_refresh_interval: Duration::ZERO,
        ..Default::default()
    });
    let verifier = TokenVerifier::new(Arc::new(store), test_settings());

    let old_token = RawToken::new(old.sign(&valid_claims(&[])));
    assert!(verifier.verify(&old_token).await.is_ok());

    // Provider publishes the new key alongside the old one.
    source.replace(jwks_document(&[&old, &new]));
    let new_token = RawToken::new(new.sign(&valid_claims(&[])));
    assert!(verifier.verify(&new_token).await.is_ok(), "unknown kid triggers a refetch");
    assert!(verifier.verify(&old_token).await.is_ok(), "old key still published");
    assert_eq!(verifier.key_store().fetch_count(), 2);
}
