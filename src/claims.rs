use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::error::Error;
use crate::error::ErrorAction;
use crate::error::ErrorReason;
use crate::error::Result;
use crate::error::TokenVerificationError;

/// Trait for accessing the registered claims used during validation.
///
/// Time claims are Unix-epoch seconds. Absent or mistyped claims read as `None`.
pub trait StandardClaims {
    /// Get the issuer (iss) claim
    fn iss(&self) -> Option<&str>;

    /// Get the subject (sub) claim
    fn sub(&self) -> Option<&str>;

    /// Get the authorized party (azp) claim
    fn azp(&self) -> Option<&str>;

    /// Get the audience (aud) claim, which may be a single string or a list
    fn aud(&self) -> Vec<&str>;

    /// Get the expiration time (exp) claim
    fn exp(&self) -> Option<i64>;

    /// Get the not-before (nbf) claim
    fn nbf(&self) -> Option<i64> {
        None
    }

    /// Get the issued at (iat) claim
    fn iat(&self) -> Option<i64> {
        None
    }
}

/// The claims of a token, kept exactly as they were encoded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JwtPayload(Map<String, Value>);

impl JwtPayload {
    pub fn get(&self, claim: &str) -> Option<&Value> {
        self.0.get(claim)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Deserialize the payload into a caller-defined claims structure.
    pub fn deserialize_into<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(Value::Object(self.0.clone()))
    }

    /// Extract the typed session claims of a verified session token.
    pub fn session_claims(&self) -> Result<SessionClaims> {
        SessionClaims::try_from(self)
    }

    fn str_claim(&self, claim: &str) -> Option<&str> {
        self.0.get(claim).and_then(Value::as_str)
    }

    fn numeric_claim(&self, claim: &str) -> Option<i64> {
        let value = self.0.get(claim)?;
        value
            .as_i64()
            .or_else(|| value.as_f64().map(|seconds| seconds.floor() as i64))
    }
}

impl From<Map<String, Value>> for JwtPayload {
    fn from(claims: Map<String, Value>) -> Self {
        Self(claims)
    }
}

impl StandardClaims for JwtPayload {
    fn iss(&self) -> Option<&str> {
        self.str_claim("iss")
    }

    fn sub(&self) -> Option<&str> {
        self.str_claim("sub")
    }

    fn azp(&self) -> Option<&str> {
        self.str_claim("azp")
    }

    fn aud(&self) -> Vec<&str> {
        match self.0.get("aud") {
            Some(Value::String(aud)) => vec![aud.as_str()],
            Some(Value::Array(values)) => values.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    fn exp(&self) -> Option<i64> {
        self.numeric_claim("exp")
    }

    fn nbf(&self) -> Option<i64> {
        self.numeric_claim("nbf")
    }

    fn iat(&self) -> Option<i64> {
        self.numeric_claim("iat")
    }
}

/// Identity carried by a session token
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionClaims {
    /// The user the session belongs to
    pub sub: String,
    #[serde(default)]
    pub sid: Option<String>,
    #[serde(default)]
    pub azp: Option<String>,
    #[serde(default)]
    pub org_id: Option<String>,
    #[serde(default)]
    pub org_role: Option<String>,
    #[serde(default)]
    pub org_slug: Option<String>,
    #[serde(default)]
    pub org_permissions: Vec<String>,
    /// Present when the session is an impersonation
    #[serde(default)]
    pub act: Option<Actor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Actor {
    pub sub: String,
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub sid: Option<String>,
}

impl TryFrom<&JwtPayload> for SessionClaims {
    type Error = Error;

    fn try_from(payload: &JwtPayload) -> Result<Self> {
        payload
            .deserialize_into()
            .map_err(|error| Error::TokenInvalid(format!("Malformed session claims: {error}")))
    }
}

/// How the `iss` claim is matched.
#[derive(Clone)]
pub enum IssuerMatcher {
    Exact(String),
    Predicate(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl IssuerMatcher {
    pub fn exact(issuer: impl Into<String>) -> Self {
        Self::Exact(issuer.into())
    }

    pub fn predicate(check: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Self::Predicate(Arc::new(check))
    }

    pub fn matches(&self, issuer: &str) -> bool {
        match self {
            Self::Exact(expected) => expected == issuer,
            Self::Predicate(check) => check(issuer),
        }
    }
}

impl fmt::Debug for IssuerMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(expected) => f.debug_tuple("Exact").field(expected).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl From<&str> for IssuerMatcher {
    fn from(issuer: &str) -> Self {
        Self::exact(issuer)
    }
}

impl From<String> for IssuerMatcher {
    fn from(issuer: String) -> Self {
        Self::Exact(issuer)
    }
}

/// Claim policy applied after the signature has been verified.
#[derive(Debug, Clone, Default)]
pub struct ClaimsPolicy {
    pub issuer: Option<IssuerMatcher>,
    /// Allowed `azp` values; blank entries are ignored.
    pub authorized_parties: Vec<String>,
    /// Accepted `aud` values; blank entries are ignored.
    pub audience: Vec<String>,
    /// Tolerance applied to `exp`, `nbf` and `iat`.
    pub leeway: Duration,
}

/// Check time and identity claims against `policy`, reporting every violation.
pub fn validate_claims<C>(
    claims: &C,
    policy: &ClaimsPolicy,
    now: i64,
) -> std::result::Result<(), Vec<TokenVerificationError>>
where
    C: StandardClaims + ?Sized,
{
    let leeway = i64::try_from(policy.leeway.as_secs()).unwrap_or(i64::MAX);
    let mut errors = Vec::new();

    match claims.exp() {
        Some(exp) if now >= exp.saturating_add(leeway) => errors.push(
            TokenVerificationError::new(
                ErrorReason::TokenExpired,
                format!(
                    "JWT is expired. Expiry date: {}, Current date: {}.",
                    format_timestamp(exp),
                    format_timestamp(now)
                ),
            )
            .with_action(ErrorAction::EnsureClockSync),
        ),
        Some(_) => {}
        None => errors.push(
            TokenVerificationError::new(
                ErrorReason::TokenInvalid,
                "Invalid JWT expiry date claim (exp). Expected a number of seconds.",
            )
            .with_action(ErrorAction::EnsureValidToken),
        ),
    }

    if let Some(nbf) = claims.nbf() {
        if now.saturating_add(leeway) < nbf {
            errors.push(
                TokenVerificationError::new(
                    ErrorReason::TokenNotYetValid,
                    format!(
                        "JWT cannot be used prior to not before date claim (nbf). Not before date: {}; Current date: {}.",
                        format_timestamp(nbf),
                        format_timestamp(now)
                    ),
                )
                .with_action(ErrorAction::EnsureClockSync),
            );
        }
    }

    if let Some(iat) = claims.iat() {
        if now.saturating_add(leeway) < iat {
            errors.push(
                TokenVerificationError::new(
                    ErrorReason::TokenIatInTheFuture,
                    format!(
                        "JWT issued at date claim (iat) is in the future. Issued at date: {}; Current date: {}.",
                        format_timestamp(iat),
                        format_timestamp(now)
                    ),
                )
                .with_action(ErrorAction::EnsureClockSync),
            );
        }
    }

    if let Some(matcher) = &policy.issuer {
        let issuer = claims.iss();
        if !issuer.is_some_and(|iss| matcher.matches(iss)) {
            errors.push(TokenVerificationError::new(
                ErrorReason::TokenInvalidIssuer,
                format!(
                    "Invalid JWT issuer claim (iss) {:?}.",
                    issuer.unwrap_or_default()
                ),
            ));
        }
    }

    let parties = non_blank(&policy.authorized_parties);
    if let Some(azp) = claims.azp() {
        if !parties.is_empty() && !parties.contains(&azp) {
            errors.push(TokenVerificationError::new(
                ErrorReason::TokenInvalidAuthorizedParties,
                format!(
                    "Invalid JWT Authorized party claim (azp) {azp:?}. Expected \"{}\".",
                    parties.join(", ")
                ),
            ));
        }
    }

    let audience = non_blank(&policy.audience);
    if !audience.is_empty() {
        let token_audience = claims.aud();
        if !token_audience.iter().any(|aud| audience.contains(aud)) {
            errors.push(TokenVerificationError::new(
                ErrorReason::TokenInvalidAudience,
                format!(
                    "Invalid JWT audience claim (aud) {:?}. Is not included in \"{}\".",
                    token_audience,
                    audience.join(", ")
                ),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn non_blank(values: &[String]) -> Vec<&str> {
    values
        .iter()
        .map(String::as_str)
        .filter(|value| !value.trim().is_empty())
        .collect()
}

fn format_timestamp(seconds: i64) -> String {
    DateTime::from_timestamp(seconds, 0)
        .map(|date| date.to_rfc2822())
        .unwrap_or_else(|| seconds.to_string())
}
