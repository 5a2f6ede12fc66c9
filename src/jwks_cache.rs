use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use jsonwebtoken::jwk::Jwk;
use reqwest::header::CONTENT_TYPE;
use reqwest::header::USER_AGENT;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::clock::Clock;
use crate::clock::SystemClock;
use crate::error::fetch_jwks_error;
use crate::error::parse_jwks_error;
use crate::error::Error;
use crate::error::Result;
use crate::keys::LOCAL_KID;
use crate::retry::RetryPolicy;
use crate::retry::Sleeper;
use crate::retry::TokioSleeper;

const JWKS_PATH: &str = "/v1/jwks";
const DEFAULT_JWKS_CACHE_TTL_SECS: u64 = 3600;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
const CLIENT_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Public keys of one API origin, indexed by key id.
///
/// Keys keep the order in which they first appeared; a later entry with the
/// same key id replaces the earlier one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublicKeySet {
    keys: Vec<Jwk>,
    index: HashMap<String, usize>,
}

impl PublicKeySet {
    pub fn new(keys: impl IntoIterator<Item = Jwk>) -> Self {
        let mut set = Self::default();
        for jwk in keys {
            let Some(kid) = jwk.common.key_id.clone() else {
                warn!("Skipping JWK without a key id");
                continue;
            };
            match set.index.get(&kid).copied() {
                Some(position) => set.keys[position] = jwk,
                None => {
                    set.index.insert(kid, set.keys.len());
                    set.keys.push(jwk);
                }
            }
        }
        set
    }

    /// Build a set from raw JSON entries, skipping the ones that are not valid JWKs.
    fn from_json_entries(entries: Vec<Value>) -> Self {
        Self::new(entries.into_iter().filter_map(|entry| {
            serde_json::from_value::<Jwk>(entry)
                .map_err(|error| warn!(%error, "Skipping unparsable JWK"))
                .ok()
        }))
    }

    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.index.get(kid).map(|&position| &self.keys[position])
    }

    pub fn kids(&self) -> impl Iterator<Item = &str> {
        self.keys
            .iter()
            .filter_map(|jwk| jwk.common.key_id.as_deref())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    #[serde(default)]
    keys: Vec<Value>,
}

struct CachedKeySet {
    keys: Arc<PublicKeySet>,
    fetched_at: DateTime<Utc>,
}

impl CachedKeySet {
    fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        // A clock that moved backwards also counts as expired.
        (now - self.fetched_at)
            .to_std()
            .map_or(true, |age| age >= ttl)
    }
}

/// What to look up in [`JwksCache::load_remote_key`].
#[derive(Debug, Clone, Copy)]
pub struct RemoteKeyRequest<'a> {
    /// Key id from the token header
    pub kid: &'a str,
    /// Bearer credential for the JWKS endpoint
    pub secret_key: Option<&'a str>,
    /// API origin, also the cache key
    pub api_url: &'a str,
    /// Always go to the network; the result still refreshes the cache
    pub skip_jwks_cache: bool,
    /// Whether the caller also holds a local key, which is then listed as
    /// `local` among the available kids of a mismatch error.
    ///
    /// [`verify_token`](crate::verify_token) always sends `false` because a
    /// configured local key short-circuits the remote lookup. Callers driving
    /// [`JwksCache`] directly next to their own local key set it to `true`.
    pub local_key_configured: bool,
}

/// Cache for JWKS (JSON Web Key Sets) keyed by API origin, with TTL expiry,
/// refetch on unknown key ids and retried fetches.
pub struct JwksCache {
    cache: Arc<RwLock<HashMap<String, CachedKeySet>>>,
    ttl: Duration,
    client: Client,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl JwksCache {
    /// Create a cache with the default TTL (1 hour) and HTTP client.
    ///
    /// # Errors
    /// Returns `Error::Reqwest` if the HTTP client cannot be built
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self::with_client(client))
    }

    /// Create a cache that fetches with the given HTTP client
    pub fn with_client(client: Client) -> Self {
        Self {
            cache: Arc::new(RwLock::new(HashMap::new())),
            ttl: Duration::from_secs(DEFAULT_JWKS_CACHE_TTL_SECS),
            client,
            clock: Arc::new(SystemClock),
            retry: RetryPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Set the JWKS cache TTL
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the clock used to timestamp and expire entries
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set what waits between fetch attempts
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Resolve the key with `request.kid` for the requested API origin.
    ///
    /// Served from the cache when a fresh entry knows the key id. Otherwise the
    /// key set is fetched once, stored, and searched again.
    ///
    /// # Errors
    /// `Error::RemoteJwkFailedToLoad` when no secret key is configured or every
    /// fetch attempt failed, `Error::KidMismatch` when the fresh set lacks the key id
    #[instrument(skip(self, request), fields(kid = %request.kid, api_url = %request.api_url))]
    pub async fn load_remote_key(&self, request: &RemoteKeyRequest<'_>) -> Result<Jwk> {
        let secret_key = request
            .secret_key
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                Error::RemoteJwkFailedToLoad(
                    "Missing secret key. Remote JWKS loading requires a secret key".to_string(),
                )
            })?;
        let origin = cache_key(request.api_url);

        if !request.skip_jwks_cache {
            if let Some(jwk) = self.try_get_cached(origin, request.kid).await {
                debug!("JWKS cache hit");
                return Ok(jwk);
            }
        }

        // Expired, missing, or the key id is unknown: the key may have been rotated in
        let keys = self.refresh(origin, secret_key).await?;

        keys.find(request.kid).cloned().ok_or_else(|| {
            let mut available = keys.kids().map(str::to_string).collect::<Vec<_>>();
            if request.local_key_configured {
                available.push(LOCAL_KID.to_string());
            }
            Error::KidMismatch {
                kid: request.kid.to_string(),
                available,
            }
        })
    }

    /// The cached key set for an API origin, if present and not expired
    pub async fn cached_key_set(&self, api_url: &str) -> Option<Arc<PublicKeySet>> {
        let cache = self.cache.read().await;
        let cached = cache.get(cache_key(api_url))?;

        if cached.is_expired(self.clock.now(), self.ttl) {
            return None;
        }

        Some(Arc::clone(&cached.keys))
    }

    /// Drop the cached key set of one API origin
    pub async fn invalidate(&self, api_url: &str) {
        self.cache.write().await.remove(cache_key(api_url));
    }

    /// Drop every cached key set
    pub async fn clear(&self) {
        self.cache.write().await.clear();
    }

    /// Try to get a key from cache if present and not expired
    async fn try_get_cached(&self, origin: &str, kid: &str) -> Option<Jwk> {
        let cache = self.cache.read().await;
        let cached = cache.get(origin)?;

        if cached.is_expired(self.clock.now(), self.ttl) {
            return None;
        }

        cached.keys.find(kid).cloned()
    }

    /// Fetch the key set for the origin and replace its cache entry
    async fn refresh(&self, origin: &str, secret_key: &str) -> Result<Arc<PublicKeySet>> {
        let keys = Arc::new(self.fetch_with_retry(origin, secret_key).await?);

        let mut cache = self.cache.write().await;
        cache.insert(
            origin.to_string(),
            CachedKeySet {
                keys: Arc::clone(&keys),
                fetched_at: self.clock.now(),
            },
        );

        info!(key_count = keys.len(), "JWKS cache updated");
        Ok(keys)
    }

    async fn fetch_with_retry(&self, origin: &str, secret_key: &str) -> Result<PublicKeySet> {
        let max_attempts = self.retry.max_attempts();

        self.retry
            .execute(self.sleeper.as_ref(), |attempt| {
                debug!(attempt, "Fetching JWKS");
                self.fetch_jwks(origin, secret_key)
            })
            .await
            .map_err(|last_error| {
                error!(%last_error, max_attempts, "Giving up on fetching JWKS");
                Error::RemoteJwkFailedToLoad(format!(
                    "Failed to load JWKS from {origin} after {max_attempts} attempts: {last_error}"
                ))
            })
    }

    /// Fetch JWKS from the API origin
    async fn fetch_jwks(&self, origin: &str, secret_key: &str) -> Result<PublicKeySet> {
        let JwksResponse { keys } = self
            .client
            .get(format!("{origin}{JWKS_PATH}"))
            .bearer_auth(secret_key)
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, CLIENT_USER_AGENT)
            .send()
            .await
            .map_err(fetch_jwks_error)?
            .error_for_status()
            .map_err(fetch_jwks_error)?
            .json()
            .await
            .map_err(parse_jwks_error)?;

        Ok(PublicKeySet::from_json_entries(keys))
    }
}

impl fmt::Debug for JwksCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwksCache")
            .field("ttl", &self.ttl)
            .field("retry", &self.retry)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

fn cache_key(api_url: &str) -> &str {
    api_url.trim_end_matches('/')
}
