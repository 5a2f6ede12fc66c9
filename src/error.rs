use std::fmt;

use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Internal failure raised by the decoding, key and cache layers.
///
/// Callers of the verification entry points never see this type directly;
/// it is folded into a [`TokenVerificationError`] at the orchestration boundary.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid JWT: {0}")]
    TokenInvalid(String),
    #[error("Unsupported JWT algorithm: {0}")]
    AlgorithmNotSupported(String),
    #[error("Invalid public key: {0}")]
    KeyInvalid(String),
    #[error("Missing local JWK. Provide the PEM public key through the jwt key option")]
    LocalJwkMissing,
    #[error("Failed to load JWKS from the remote API: {0}")]
    RemoteJwkFailedToLoad(String),
    #[error("JWKS fetch error: {0}")]
    JwksFetch(String),
    #[error(
        "Unable to find a signing key in JWKS that matches the kid='{kid}' of the provided session token. Available kids: {}",
        .available.join(", ")
    )]
    KidMismatch { kid: String, available: Vec<String> },
    #[error("Failed to resolve a key to verify the token: {0}")]
    KeyUnresolved(String),
    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),
}

pub(crate) fn fetch_jwks_error(error: reqwest::Error) -> Error {
    Error::JwksFetch(format!("Failed to fetch JWKS: {error}"))
}

pub(crate) fn parse_jwks_error(error: reqwest::Error) -> Error {
    Error::JwksFetch(format!("Failed to parse JWKS response: {error}"))
}

/// Machine-readable classification of a verification failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorReason {
    TokenInvalid,
    TokenExpired,
    TokenNotYetValid,
    TokenIatInTheFuture,
    TokenInvalidIssuer,
    TokenInvalidAuthorizedParties,
    TokenInvalidAudience,
    TokenInvalidAlgorithm,
    JwkLocalMissing,
    JwkRemoteFailedToLoad,
    JwkKidMismatch,
    JwkFailedToResolve,
    JwkInvalid,
}

impl ErrorReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TokenInvalid => "token-invalid",
            Self::TokenExpired => "token-expired",
            Self::TokenNotYetValid => "token-not-yet-valid",
            Self::TokenIatInTheFuture => "token-iat-in-the-future",
            Self::TokenInvalidIssuer => "token-invalid-issuer",
            Self::TokenInvalidAuthorizedParties => "token-invalid-authorized-parties",
            Self::TokenInvalidAudience => "token-invalid-audience",
            Self::TokenInvalidAlgorithm => "token-invalid-algorithm",
            Self::JwkLocalMissing => "jwk-local-missing",
            Self::JwkRemoteFailedToLoad => "jwk-remote-failed-to-load",
            Self::JwkKidMismatch => "jwk-kid-mismatch",
            Self::JwkFailedToResolve => "jwk-failed-to-resolve",
            Self::JwkInvalid => "jwk-invalid",
        }
    }
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remediation hint attached to a verification failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorAction {
    ContactSupport,
    EnsureValidToken,
    SetJwtKey,
    SetSecretKey,
    EnsureClockSync,
    CheckKeyConfiguration,
}

impl ErrorAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContactSupport => "Contact support to resolve this issue.",
            Self::EnsureValidToken => "Make sure that this is a valid session token.",
            Self::SetJwtKey => "Set the jwt key option to the PEM public key of your instance.",
            Self::SetSecretKey => "Set the secret key option or the CLERK_SECRET_KEY environment variable.",
            Self::EnsureClockSync => "Make sure your system clock is in sync (e.g. turn off and on automatic time synchronization).",
            Self::CheckKeyConfiguration => "Go to your dashboard and validate your secret and public keys are correct.",
        }
    }
}

impl fmt::Display for ErrorAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured verification failure returned to callers.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("{message} (reason={reason})")]
pub struct TokenVerificationError {
    pub reason: ErrorReason,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<ErrorAction>,
}

impl TokenVerificationError {
    pub fn new(reason: ErrorReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
            action: None,
        }
    }

    pub fn with_action(mut self, action: ErrorAction) -> Self {
        self.action = Some(action);
        self
    }
}

impl From<Error> for TokenVerificationError {
    fn from(error: Error) -> Self {
        let message = error.to_string();
        match error {
            Error::TokenInvalid(_) => TokenVerificationError::new(ErrorReason::TokenInvalid, message)
                .with_action(ErrorAction::EnsureValidToken),
            Error::AlgorithmNotSupported(_) => {
                TokenVerificationError::new(ErrorReason::TokenInvalidAlgorithm, message)
            }
            Error::KeyInvalid(_) => TokenVerificationError::new(ErrorReason::JwkInvalid, message)
                .with_action(ErrorAction::CheckKeyConfiguration),
            Error::LocalJwkMissing => TokenVerificationError::new(ErrorReason::JwkLocalMissing, message)
                .with_action(ErrorAction::SetJwtKey),
            Error::RemoteJwkFailedToLoad(_) | Error::JwksFetch(_) | Error::Reqwest(_) => {
                TokenVerificationError::new(ErrorReason::JwkRemoteFailedToLoad, message)
                    .with_action(ErrorAction::ContactSupport)
            }
            Error::KidMismatch { .. } => TokenVerificationError::new(ErrorReason::JwkKidMismatch, message)
                .with_action(ErrorAction::CheckKeyConfiguration),
            Error::KeyUnresolved(_) => {
                TokenVerificationError::new(ErrorReason::JwkFailedToResolve, message)
                    .with_action(ErrorAction::SetSecretKey)
            }
        }
    }
}
