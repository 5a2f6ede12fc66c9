use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use tracing::instrument;

use crate::claims::validate_claims;
use crate::claims::JwtPayload;
use crate::config::VerifyJwtOptions;
use crate::config::VerifyTokenOptions;
use crate::error::Error;
use crate::error::ErrorAction;
use crate::error::ErrorReason;
use crate::error::Result;
use crate::error::TokenVerificationError;
use crate::jwks_cache::JwksCache;
use crate::jwks_cache::RemoteKeyRequest;
use crate::keys::load_local_key;
use crate::keys::parse_algorithm;
use crate::keys::verify_signature;
use crate::keys::PublicKey;
use crate::token::decode;
use crate::token::DecodedToken;

/// Outcome of a verification: the validated payload or every reason it was rejected.
pub type VerificationResult = std::result::Result<JwtPayload, Vec<TokenVerificationError>>;

/// Trait for JWT verification
#[async_trait]
pub trait VerifyJwt {
    /// Verify a token and return its payload
    async fn verify(&self, token: &str) -> VerificationResult;
}

/// Verify a token against an already resolved key.
///
/// `now` is the current time in Unix-epoch seconds.
pub fn verify_jwt(token: &str, options: &VerifyJwtOptions, now: i64) -> VerificationResult {
    let decoded = decode(token).map_err(into_errors)?;
    check_header(&decoded).map_err(into_errors)?;
    let signature = check_signature(&decoded, &options.key).map_err(into_errors)?;

    let claims = validate_claims(&decoded.payload, &options.policy, now);
    finish(decoded.payload, signature, claims)
}

/// Verify a token, resolving its key from the options: the local key when one
/// is configured, otherwise the remote key set through `cache`.
#[instrument(skip_all)]
pub async fn verify_token(
    token: &str,
    options: &VerifyTokenOptions,
    cache: &JwksCache,
) -> VerificationResult {
    let decoded = decode(token).map_err(into_errors)?;
    check_header(&decoded).map_err(into_errors)?;

    let key = resolve_key(&decoded, options, cache)
        .await
        .map_err(into_errors)?;
    let signature = check_signature(&decoded, &key).map_err(into_errors)?;

    let now = options.clock.unix_seconds();
    let claims = validate_claims(&decoded.payload, &options.policy, now);

    let payload = finish(decoded.payload, signature, claims)?;
    debug!(kid = ?decoded.header.kid, "Token verified");
    Ok(payload)
}

fn check_header(decoded: &DecodedToken) -> Result<()> {
    if let Some(typ) = decoded.header.typ.as_deref() {
        if typ != "JWT" {
            return Err(Error::TokenInvalid(format!(
                "Invalid JWT type {typ:?}. Expected \"JWT\"."
            )));
        }
    }

    parse_algorithm(&decoded.header.alg)?;
    Ok(())
}

async fn resolve_key(
    decoded: &DecodedToken,
    options: &VerifyTokenOptions,
    cache: &JwksCache,
) -> Result<PublicKey> {
    if let Some(jwt_key) = options.jwt_key() {
        debug!("Using local JWT key");
        return load_local_key(Some(jwt_key));
    }

    if options.secret_key.is_none() {
        return Err(Error::KeyUnresolved(
            "Failed to resolve JWK during verification. Configure a JWT key or a secret key"
                .to_string(),
        ));
    }

    let kid = decoded.header.kid.as_deref().ok_or_else(|| {
        Error::TokenInvalid("JWT has no key id (kid) header. Cannot select a remote key".to_string())
    })?;

    let request = RemoteKeyRequest {
        kid,
        secret_key: options.secret_key.as_deref(),
        api_url: &options.api_url,
        skip_jwks_cache: options.skip_jwks_cache,
        // A configured local key returns above, so it never reaches the cache here
        local_key_configured: false,
    };

    cache.load_remote_key(&request).await.map(PublicKey::from)
}

/// A mismatching signature is not an error here; it is reported by [`finish`]
/// together with the claim failures.
fn check_signature(
    decoded: &DecodedToken,
    key: &PublicKey,
) -> Result<Option<TokenVerificationError>> {
    if verify_signature(decoded, key)? {
        return Ok(None);
    }

    Ok(Some(
        TokenVerificationError::new(ErrorReason::TokenInvalid, "JWT signature is invalid.")
            .with_action(ErrorAction::EnsureValidToken),
    ))
}

// Claim failures such as expiry are reported even when the signature is wrong.
fn finish(
    payload: JwtPayload,
    signature_error: Option<TokenVerificationError>,
    claims: std::result::Result<(), Vec<TokenVerificationError>>,
) -> VerificationResult {
    let mut errors = signature_error.into_iter().collect::<Vec<_>>();
    if let Err(claim_errors) = claims {
        errors.extend(claim_errors);
    }

    if errors.is_empty() {
        Ok(payload)
    } else {
        Err(errors)
    }
}

fn into_errors(error: Error) -> Vec<TokenVerificationError> {
    debug!(%error, "Token rejected");
    vec![error.into()]
}

/// Token verifier bundling its options with a shared JWKS cache
#[derive(Debug, Clone)]
pub struct TokenVerifier {
    options: VerifyTokenOptions,
    jwks: Arc<JwksCache>,
}

impl TokenVerifier {
    /// Create a verifier with its own JWKS cache
    ///
    /// # Errors
    /// Returns `Error::Reqwest` if the HTTP client cannot be built
    pub fn new(options: VerifyTokenOptions) -> Result<Self> {
        Ok(Self::with_cache(options, Arc::new(JwksCache::new()?)))
    }

    /// Create a verifier sharing an existing JWKS cache
    pub fn with_cache(options: VerifyTokenOptions, jwks: Arc<JwksCache>) -> Self {
        Self { options, jwks }
    }

    /// Create a verifier configured from the `CLERK_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(VerifyTokenOptions::from_env())
    }

    pub fn options(&self) -> &VerifyTokenOptions {
        &self.options
    }

    pub fn jwks_cache(&self) -> &Arc<JwksCache> {
        &self.jwks
    }
}

#[async_trait]
impl VerifyJwt for TokenVerifier {
    async fn verify(&self, token: &str) -> VerificationResult {
        verify_token(token, &self.options, &self.jwks).await
    }
}
