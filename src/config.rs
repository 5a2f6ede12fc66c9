use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::claims::ClaimsPolicy;
use crate::claims::IssuerMatcher;
use crate::clock::Clock;
use crate::clock::SystemClock;
use crate::keys::PublicKey;

/// API origin used when none is configured
pub const DEFAULT_API_URL: &str = "https://api.clerk.com";

const SECRET_KEY_VAR: &str = "CLERK_SECRET_KEY";
const API_URL_VAR: &str = "CLERK_API_URL";
const JWT_KEY_VAR: &str = "CLERK_JWT_KEY";
const AUTHORIZED_PARTIES_VAR: &str = "CLERK_AUTHORIZED_PARTIES";

/// Options for [`verify_token`](crate::verify_token): where the verification
/// key comes from and which claims to enforce.
#[derive(Clone)]
pub struct VerifyTokenOptions {
    /// Secret key used to authenticate against the JWKS endpoint
    pub(crate) secret_key: Option<String>,
    /// API origin serving `/v1/jwks`
    pub(crate) api_url: String,
    /// Local public key (PEM or compact body). Takes precedence over the remote key set
    pub(crate) jwt_key: Option<String>,
    pub(crate) skip_jwks_cache: bool,
    pub(crate) policy: ClaimsPolicy,
    pub(crate) clock: Arc<dyn Clock>,
}

impl Default for VerifyTokenOptions {
    fn default() -> Self {
        Self {
            secret_key: None,
            api_url: DEFAULT_API_URL.to_string(),
            jwt_key: None,
            skip_jwks_cache: false,
            policy: ClaimsPolicy::default(),
            clock: Arc::new(SystemClock),
        }
    }
}

impl VerifyTokenOptions {
    /// Create options with the default API origin and no key source
    pub fn new() -> Self {
        Self::default()
    }

    /// Read options from `CLERK_SECRET_KEY`, `CLERK_API_URL`, `CLERK_JWT_KEY`
    /// and `CLERK_AUTHORIZED_PARTIES` (comma separated). Blank variables count as unset.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let mut options = Self::default();

        options.secret_key = read(SECRET_KEY_VAR);
        options.jwt_key = read(JWT_KEY_VAR);
        if let Some(api_url) = read(API_URL_VAR) {
            options.api_url = api_url.trim().to_string();
        }
        if let Some(parties) = read(AUTHORIZED_PARTIES_VAR) {
            options.policy.authorized_parties = parties
                .split(',')
                .map(str::trim)
                .filter(|party| !party.is_empty())
                .map(str::to_string)
                .collect();
        }

        options
    }

    /// Set the secret key used to fetch the remote key set
    pub fn with_secret_key(mut self, secret_key: impl Into<String>) -> Self {
        self.secret_key = Some(secret_key.into());
        self
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    /// Set a local public key; no network call is made when one is configured
    pub fn with_jwt_key(mut self, jwt_key: impl Into<String>) -> Self {
        self.jwt_key = Some(jwt_key.into());
        self
    }

    /// Replace the allowed `azp` values
    pub fn with_authorized_parties<I, S>(mut self, parties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.policy.authorized_parties = parties.into_iter().map(Into::into).collect();
        self
    }

    /// Add a single allowed `azp` value
    pub fn with_authorized_party(mut self, party: impl Into<String>) -> Self {
        self.policy.authorized_parties.push(party.into());
        self
    }

    /// Add an accepted audience; the token's `aud` must match at least one of them
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.policy.audience.push(audience.into());
        self
    }

    pub fn with_issuer(mut self, issuer: impl Into<IssuerMatcher>) -> Self {
        self.policy.issuer = Some(issuer.into());
        self
    }

    /// Tolerance applied to `exp`, `nbf` and `iat`
    pub fn with_clock_skew(mut self, leeway: Duration) -> Self {
        self.policy.leeway = leeway;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Always fetch the key set; the response still refreshes the cache
    pub fn skip_jwks_cache(mut self, skip: bool) -> Self {
        self.skip_jwks_cache = skip;
        self
    }

    pub fn secret_key(&self) -> Option<&str> {
        self.secret_key.as_deref()
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// The local public key, if one is set. A blank key counts as unset.
    pub fn jwt_key(&self) -> Option<&str> {
        self.jwt_key.as_deref().filter(|key| !key.trim().is_empty())
    }

    pub fn policy(&self) -> &ClaimsPolicy {
        &self.policy
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }
}

impl fmt::Debug for VerifyTokenOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifyTokenOptions")
            .field("secret_key", &self.secret_key.as_ref().map(|_| "[redacted]"))
            .field("api_url", &self.api_url)
            .field("jwt_key", &self.jwt_key().is_some())
            .field("skip_jwks_cache", &self.skip_jwks_cache)
            .field("policy", &self.policy)
            .field("clock", &self.clock)
            .finish()
    }
}

/// Options for [`verify_jwt`](crate::verify_jwt), where the key is already known.
#[derive(Debug, Clone)]
pub struct VerifyJwtOptions {
    pub(crate) key: PublicKey,
    pub(crate) policy: ClaimsPolicy,
}

impl VerifyJwtOptions {
    pub fn new(key: impl Into<PublicKey>) -> Self {
        Self {
            key: key.into(),
            policy: ClaimsPolicy::default(),
        }
    }

    pub fn with_authorized_parties<I, S>(mut self, parties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.policy.authorized_parties = parties.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.policy.audience.push(audience.into());
        self
    }

    pub fn with_issuer(mut self, issuer: impl Into<IssuerMatcher>) -> Self {
        self.policy.issuer = Some(issuer.into());
        self
    }

    pub fn with_clock_skew(mut self, leeway: Duration) -> Self {
        self.policy.leeway = leeway;
        self
    }

    pub fn key(&self) -> &PublicKey {
        &self.key
    }

    pub fn policy(&self) -> &ClaimsPolicy {
        &self.policy
    }
}
