//! # jwtward
//!
//! Verification of session tokens signed with asymmetric keys, with remote
//! JWKS (JSON Web Key Set) loading, caching and retries.
//!
//! ## Features
//!
//! - Compact token decoding with structured, non-panicking errors
//! - RSA (RS*, PS*), EC (ES256, ES384) and Ed25519 signature verification
//! - Local keys in PEM or compact form, or keys fetched from `/v1/jwks`
//! - Per-origin JWKS caching with TTL, key-id refetch and bounded retries
//! - Expiration, not-before, issued-at, issuer, authorized party and audience checks
//!
//! ## Example
//!
//! ```rust,no_run
//! use jwtward::{TokenVerifier, VerifyJwt, VerifyTokenOptions};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = VerifyTokenOptions::new()
//!         .with_secret_key("sk_test_...")
//!         .with_authorized_parties(["https://app.example.com"])
//!         .with_clock_skew(Duration::from_secs(5));
//!
//!     let verifier = TokenVerifier::new(options)?;
//!
//!     let token = "eyJhbGciOiJSUzI1NiIsImtpZCI6Imluc18xIn0...";
//!     match verifier.verify(token).await {
//!         Ok(payload) => println!("Session of {:?}", payload.session_claims()?.sub),
//!         Err(errors) => {
//!             for error in errors {
//!                 eprintln!("{}: {}", error.reason, error.message);
//!             }
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

mod claims;
mod clock;
mod config;
mod error;
mod jwks_cache;
mod keys;
mod retry;
mod token;
mod verifier;

// Re-exports for public API
pub use claims::validate_claims;
pub use claims::Actor;
pub use claims::ClaimsPolicy;
pub use claims::IssuerMatcher;
pub use claims::JwtPayload;
pub use claims::SessionClaims;
pub use claims::StandardClaims;
pub use clock::Clock;
pub use clock::ManualClock;
pub use clock::SystemClock;
pub use config::VerifyJwtOptions;
pub use config::VerifyTokenOptions;
pub use config::DEFAULT_API_URL;
pub use error::Error;
pub use error::ErrorAction;
pub use error::ErrorReason;
pub use error::Result;
pub use error::TokenVerificationError;
pub use jwks_cache::JwksCache;
pub use jwks_cache::PublicKeySet;
pub use jwks_cache::RemoteKeyRequest;
pub use keys::load_local_key;
pub use keys::parse_algorithm;
pub use keys::verify_signature;
pub use keys::KeyFamily;
pub use keys::PublicKey;
pub use keys::VerificationKey;
pub use keys::LOCAL_KID;
pub use retry::RetryPolicy;
pub use retry::Sleeper;
pub use retry::TokioSleeper;
pub use token::decode;
pub use token::DecodedToken;
pub use token::JwtHeader;
pub use verifier::verify_jwt;
pub use verifier::verify_token;
pub use verifier::TokenVerifier;
pub use verifier::VerificationResult;
pub use verifier::VerifyJwt;
