// src/client.rs

use crate::config::Config;
use crate::error::VerifyError;
use crate::model::JsonWebKeySet;
use jsonwebtoken::{Algorithm, DecodingKey};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, instrument, warn};
use url::Url;

/// A public signing key resolved from the provider's key set.
///
/// Built only while a fetched key set is being parsed; the whole set is
/// replaced on refresh and individual keys are never mutated.
#[derive(Clone)]
pub struct SigningKey {
    /// The key identifier, unique within one key set.
    pub kid: String,
    /// The algorithm the provider declared for this key, when present.
    pub algorithm: Option<Algorithm>,
    /// The verification key material.
    pub key: Arc<DecodingKey>,
}

/// A client for fetching and caching the identity provider's signing keys.
///
/// The cache holds exactly one key set at a time and is replaced wholesale
/// on every refresh: readers observe either the previous complete set or
/// the new complete set, never a mixture. Refreshes are single-flight; a
/// refresh already in progress is never duplicated by concurrent callers.
///
/// Keys whose declared `alg` is not in the configured allow-list are
/// excluded from the cache even when their `kid` matches a token, so such
/// tokens fail with `KeyNotFound`. Keys that omit `alg` are kept.
#[derive(Clone)]
pub struct JwksClient {
    // Internally ref-counted to allow for cheap cloning.
    inner: Arc<Inner>,
}

struct Inner {
    http_client: reqwest::Client,
    jwks_uri: Url,
    default_ttl: Duration,
    allowed_algorithms: Vec<Algorithm>,
    state: RwLock<KeySetState>,
    // Serializes refreshes. Held only across a fetch, never while a caller
    // is merely reading the cache.
    refresh_lock: Mutex<()>,
}

struct KeySetState {
    keys: Arc<HashMap<String, SigningKey>>,
    fetched_at: Option<Instant>,
    ttl: Duration,
    // Incremented on every completed refresh, so callers that waited on the
    // refresh lock can tell whether someone else already refreshed.
    generation: u64,
}

impl KeySetState {
    fn is_fresh(&self) -> bool {
        self.fetched_at.is_some_and(|at| at.elapsed() < self.ttl)
    }
}

impl JwksClient {
    /// Creates a new `JwksClient` from the verifier configuration.
    pub fn new(config: &Config) -> Result<Self, VerifyError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.fetch_timeout)
            .build()
            .map_err(|e| VerifyError::KeySourceUnreachable(e.to_string()))?;

        Ok(Self {
            inner: Arc::new(Inner {
                http_client,
                jwks_uri: config.jwks_uri.clone(),
                default_ttl: config.cache_ttl,
                allowed_algorithms: config.validation.algorithms.clone(),
                state: RwLock::new(KeySetState {
                    keys: Arc::new(HashMap::new()),
                    fetched_at: None,
                    ttl: config.cache_ttl,
                    generation: 0,
                }),
                refresh_lock: Mutex::new(()),
            }),
        })
    }

    /// Retrieves the signing key for the given key identifier (`kid`).
    ///
    /// A fresh cache that contains `kid` answers immediately. On a miss or
    /// once the cache age exceeds its TTL, the full key set is re-fetched,
    /// the cache replaced wholesale, and the lookup retried exactly once;
    /// if the kid is still absent the key is retired or unknown and the
    /// call fails with `KeyNotFound`. Callers that arrive while a refresh
    /// is in flight wait for it and answer from its result instead of
    /// fetching again.
    #[instrument(skip(self), err)]
    pub async fn get_key(&self, kid: &str) -> Result<SigningKey, VerifyError> {
        let observed_generation = {
            let state = self.inner.state.read().await;
            if state.is_fresh() {
                if let Some(key) = state.keys.get(kid) {
                    debug!("key cache hit for kid {kid}");
                    return Ok(key.clone());
                }
            }
            state.generation
        };

        debug!("key cache miss or stale for kid {kid}");
        let _guard = self.inner.refresh_lock.lock().await;

        // Another caller may have completed a refresh while we waited for
        // the lock; its result stands for this lookup too.
        {
            let state = self.inner.state.read().await;
            if state.generation != observed_generation && state.is_fresh() {
                return state
                    .keys
                    .get(kid)
                    .cloned()
                    .ok_or_else(|| VerifyError::KeyNotFound(kid.to_string()));
            }
        }

        self.refresh().await?;

        let state = self.inner.state.read().await;
        state
            .keys
            .get(kid)
            .cloned()
            .ok_or_else(|| VerifyError::KeyNotFound(kid.to_string()))
    }

    /// Fetches the key set from the provider and replaces the cache
    /// wholesale. Must be called with the refresh lock held.
    #[instrument(skip(self), err)]
    async fn refresh(&self) -> Result<(), VerifyError> {
        let response = self
            .inner
            .http_client
            .get(self.inner.jwks_uri.clone())
            .send()
            .await
            .map_err(|e| VerifyError::KeySourceUnreachable(e.to_string()))?;

        let ttl = parse_cache_control(&response).unwrap_or(self.inner.default_ttl);

        let response = response
            .error_for_status()
            .map_err(|e| VerifyError::KeySourceUnreachable(e.to_string()))?;

        let jwks: JsonWebKeySet = response.json().await.map_err(|e| {
            VerifyError::KeySourceUnreachable(format!("malformed key set response: {e}"))
        })?;

        let mut keys = HashMap::new();
        for jwk in jwks.keys {
            if jwk.kty != "RSA" {
                debug!("skipping key {} with unsupported kty {:?}", jwk.kid, jwk.kty);
                continue;
            }

            let algorithm = match jwk.alg.as_deref() {
                Some(alg) => match Algorithm::from_str(alg) {
                    Ok(a) if self.inner.allowed_algorithms.contains(&a) => Some(a),
                    _ => {
                        warn!(
                            "skipping key {} declaring disallowed algorithm {alg:?}",
                            jwk.kid
                        );
                        continue;
                    }
                },
                None => None,
            };

            let n = jwk.n.as_deref().ok_or_else(|| {
                VerifyError::KeySourceUnreachable(format!(
                    "RSA key {} is missing its 'n' component",
                    jwk.kid
                ))
            })?;
            let e = jwk.e.as_deref().ok_or_else(|| {
                VerifyError::KeySourceUnreachable(format!(
                    "RSA key {} is missing its 'e' component",
                    jwk.kid
                ))
            })?;
            let decoding_key = DecodingKey::from_rsa_components(n, e).map_err(|e| {
                VerifyError::KeySourceUnreachable(format!(
                    "RSA key {} has invalid components: {e}",
                    jwk.kid
                ))
            })?;

            keys.insert(
                jwk.kid.clone(),
                SigningKey {
                    kid: jwk.kid,
                    algorithm,
                    key: Arc::new(decoding_key),
                },
            );
        }

        debug!("fetched {} usable keys, caching with TTL {ttl:?}", keys.len());

        let mut state = self.inner.state.write().await;
        state.keys = Arc::new(keys);
        state.fetched_at = Some(Instant::now());
        state.ttl = ttl;
        state.generation += 1;
        Ok(())
    }
}

/// Parses the `Cache-Control` header to determine the key set's TTL.
fn parse_cache_control(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::CACHE_CONTROL)?
        .to_str()
        .ok()?
        .split(',')
        .find_map(|part| {
            part.trim()
                .strip_prefix("max-age=")?
                .parse::<u64>()
                .ok()
                .map(Duration::from_secs)
        })
}
