// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JWKS (JSON Web Key Set) fetching and caching.
//!
//! ## Caching
//!
//! - The parsed key set is cached for the configured TTL, or for the
//!   provider's `Cache-Control: max-age` when that is shorter
//! - A TTL of zero disables the cache and fetches on every request
//! - Concurrent misses share one fetch: the first caller refreshes while the
//!   rest wait on the fetch lock and then read the fresh entry
//! - A token naming a `kid` missing from the cached set forces a refresh, so
//!   key rotation at the provider is picked up before the TTL runs out.
//!   Forced refreshes are single-flight and spaced at least
//!   `min_refresh_interval` apart, so unknown `kid`s cannot drive fetches

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, JwkSet, KeyAlgorithm};
use jsonwebtoken::{Algorithm, DecodingKey};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::error::AuthErrorKind;
use crate::config::DEFAULT_JWKS_CACHE_TTL;

/// Default spacing between forced refreshes triggered by unknown `kid`s.
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// Verification keys published by the provider, keyed by key ID.
#[derive(Debug, Clone)]
pub struct KeySet {
    jwks: JwkSet,
}

impl KeySet {
    /// Parse a JWKS document. A document without keys is rejected.
    pub fn parse(body: &[u8]) -> Result<Self, AuthErrorKind> {
        let jwks: JwkSet = serde_json::from_slice(body)
            .map_err(|e| AuthErrorKind::JwksParseError(e.to_string()))?;
        if jwks.keys.is_empty() {
            return Err(AuthErrorKind::JwksParseError(
                "key set contains no keys".to_string(),
            ));
        }
        Ok(Self { jwks })
    }

    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.jwks
            .keys
            .iter()
            .find(|k| k.common.key_id.as_deref() == Some(kid))
    }

    pub fn contains(&self, kid: &str) -> bool {
        self.find(kid).is_some()
    }

    pub fn keys(&self) -> &[Jwk] {
        &self.jwks.keys
    }

    pub fn len(&self) -> usize {
        self.jwks.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jwks.keys.is_empty()
    }
}

/// Convert a JWK to a DecodingKey.
///
/// Returns the algorithm the key declares, if any.
pub(crate) fn jwk_to_decoding_key(jwk: &Jwk) -> Result<(DecodingKey, Option<Algorithm>), String> {
    let declared = jwk.common.key_algorithm.and_then(signing_algorithm);
    match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => {
            let key = DecodingKey::from_rsa_components(&rsa.n, &rsa.e)
                .map_err(|e| format!("Failed to create RSA key: {e}"))?;
            Ok((key, declared))
        }
        AlgorithmParameters::EllipticCurve(ec) => {
            let key = DecodingKey::from_ec_components(&ec.x, &ec.y)
                .map_err(|e| format!("Failed to create EC key: {e}"))?;
            Ok((key, declared))
        }
        AlgorithmParameters::OctetKeyPair(okp) => {
            let key = DecodingKey::from_ed_components(&okp.x)
                .map_err(|e| format!("Failed to create EdDSA key: {e}"))?;
            Ok((key, declared))
        }
        _ => Err("Unsupported key type in JWKS".to_string()),
    }
}

fn signing_algorithm(alg: KeyAlgorithm) -> Option<Algorithm> {
    match alg {
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
        // Encryption algorithms and HMAC never verify provider signatures here.
        _ => None,
    }
}

/// Race a provider call against shutdown.
pub(crate) async fn until_cancelled<T>(
    shutdown: &CancellationToken,
    call: impl Future<Output = Result<T, AuthErrorKind>>,
    on_cancel: impl FnOnce() -> AuthErrorKind,
) -> Result<T, AuthErrorKind> {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => Err(on_cancel()),
        result = call => result,
    }
}

/// Largest provider response body buffered in memory (1 MiB).
pub(crate) const MAX_PROVIDER_BODY_BYTES: usize = 1 << 20;

/// Read a provider response body, failing once it grows past `limit`.
pub(crate) async fn read_body_limited(
    mut response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, String> {
    if let Some(length) = response.content_length() {
        if length > limit as u64 {
            return Err(format!("response body of {length} bytes exceeds {limit} bytes"));
        }
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(|e| e.to_string())? {
        if body.len() + chunk.len() > limit {
            return Err(format!("response body exceeds {limit} bytes"));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

/// JWKS cache entry.
struct CacheEntry {
    key_set: Arc<KeySet>,
    fetched_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_fresh(&self) -> bool {
        self.fetched_at.elapsed() < self.ttl
    }
}

/// Resolves the provider's signing key set.
#[derive(Clone)]
pub struct KeySetResolver {
    /// JWKS endpoint
    jwks_uri: Url,
    /// Upper bound for how long a fetched key set is reused
    cache_ttl: Duration,
    /// Minimum spacing between forced refreshes
    min_refresh_interval: Duration,
    /// Last fetched set; kept past its TTL so forced refreshes can fall back to it
    cache: Arc<RwLock<Option<CacheEntry>>>,
    /// Serializes fetches so concurrent misses fetch once. Holds the time of
    /// the last forced refresh.
    fetch_lock: Arc<Mutex<Option<Instant>>>,
    client: reqwest::Client,
    shutdown: CancellationToken,
}

impl KeySetResolver {
    pub fn new(jwks_uri: Url, client: reqwest::Client) -> Self {
        Self {
            jwks_uri,
            cache_ttl: DEFAULT_JWKS_CACHE_TTL,
            min_refresh_interval: MIN_REFRESH_INTERVAL,
            cache: Arc::new(RwLock::new(None)),
            fetch_lock: Arc::new(Mutex::new(None)),
            client,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Resolve the key set, served from cache while fresh.
    pub async fn resolve(&self) -> Result<Arc<KeySet>, AuthErrorKind> {
        if let Some(key_set) = self.cached().await {
            return Ok(key_set);
        }

        let _guard = self.fetch_lock.lock().await;
        // Another caller may have refreshed while we waited.
        if let Some(key_set) = self.cached().await {
            return Ok(key_set);
        }
        self.fetch_and_store().await
    }

    /// Resolve a key set able to verify a token signed with `kid`.
    ///
    /// A set lacking `kid` is refreshed at most once per
    /// `min_refresh_interval`; the result is returned either way and the
    /// validator decides whether the token verifies.
    pub async fn resolve_for(&self, kid: Option<&str>) -> Result<Arc<KeySet>, AuthErrorKind> {
        let key_set = self.resolve().await?;
        match kid {
            Some(kid) if !key_set.contains(kid) => {
                tracing::debug!(kid, "kid not in cached key set, refreshing");
                self.force_refresh(Some(&key_set)).await
            }
            _ => Ok(key_set),
        }
    }

    /// Refresh the key set, rate limited to one fetch per
    /// `min_refresh_interval`.
    pub async fn refresh(&self) -> Result<Arc<KeySet>, AuthErrorKind> {
        self.force_refresh(None).await
    }

    /// Check if JWKS is currently cached and valid.
    pub async fn is_cached(&self) -> bool {
        self.cached().await.is_some()
    }

    async fn cached(&self) -> Option<Arc<KeySet>> {
        let cache = self.cache.read().await;
        cache
            .as_ref()
            .filter(|entry| entry.is_fresh())
            .map(|entry| entry.key_set.clone())
    }

    /// Fetch a new set unless one was fetched since `observed` or a forced
    /// refresh ran within `min_refresh_interval`.
    async fn force_refresh(
        &self,
        observed: Option<&Arc<KeySet>>,
    ) -> Result<Arc<KeySet>, AuthErrorKind> {
        let mut last_forced = self.fetch_lock.lock().await;

        if let Some(entry) = self.cache.read().await.as_ref() {
            let replaced = observed.is_some_and(|seen| !Arc::ptr_eq(seen, &entry.key_set));
            let throttled = last_forced.is_some_and(|at| at.elapsed() < self.min_refresh_interval);
            if replaced || throttled {
                return Ok(entry.key_set.clone());
            }
        }

        *last_forced = Some(Instant::now());
        self.fetch_and_store().await
    }

    /// Callers must hold `fetch_lock`.
    async fn fetch_and_store(&self) -> Result<Arc<KeySet>, AuthErrorKind> {
        let (key_set, ttl) = until_cancelled(&self.shutdown, self.fetch(), || {
            AuthErrorKind::JwksFetchError("request cancelled by shutdown".to_string())
        })
        .await?;
        let key_set = Arc::new(key_set);

        tracing::debug!(
            keys = key_set.len(),
            ttl_secs = ttl.as_secs(),
            "fetched JWKS"
        );

        // A zero TTL is stored too but never served as fresh.
        let mut cache = self.cache.write().await;
        *cache = Some(CacheEntry {
            key_set: key_set.clone(),
            fetched_at: Instant::now(),
            ttl,
        });

        Ok(key_set)
    }

    /// Fetch JWKS from the endpoint.
    async fn fetch(&self) -> Result<(KeySet, Duration), AuthErrorKind> {
        let response = self
            .client
            .get(self.jwks_uri.clone())
            .send()
            .await
            .map_err(|e| AuthErrorKind::JwksFetchError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthErrorKind::JwksFetchError(format!(
                "HTTP {} from JWKS endpoint",
                response.status()
            )));
        }

        let ttl = max_age(&response)
            .map(|max_age| max_age.min(self.cache_ttl))
            .unwrap_or(self.cache_ttl);

        let body = read_body_limited(response, MAX_PROVIDER_BODY_BYTES)
            .await
            .map_err(AuthErrorKind::JwksFetchError)?;

        Ok((KeySet::parse(&body)?, ttl))
    }
}

/// Parses the `Cache-Control` header to determine the TTL.
fn max_age(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::CACHE_CONTROL)?
        .to_str()
        .ok()?
        .split(',')
        .find_map(|directive| {
            directive
                .trim()
                .strip_prefix("max-age=")?
                .parse::<u64>()
                .ok()
                .map(Duration::from_secs)
        })
}
