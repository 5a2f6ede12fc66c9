use std::time::Duration;

use jwtward::TokenVerifier;
use jwtward::VerifyJwt;
use jwtward::VerifyTokenOptions;
use tracing_subscriber::EnvFilter;

// Usage: CLERK_SECRET_KEY=sk_test_... cargo run --example basic_usage -- <token>
// Set RUST_LOG=jwtward=debug to watch cache hits and fetch retries.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("jwtward=info")),
        )
        .init();

    let token = std::env::args()
        .nth(1)
        .ok_or("pass the session token as the first argument")?;

    // Example 1: Options from the CLERK_* environment variables
    println!("=== Example 1: Environment Configuration ===");
    let verifier = TokenVerifier::from_env()?;
    report(&verifier, &token).await;

    // Example 2: Same key source, stricter claim checks
    println!();
    println!("=== Example 2: Authorized Parties and Clock Skew ===");
    let options = verifier
        .options()
        .clone()
        .with_authorized_parties(["http://localhost:3000"])
        .with_clock_skew(Duration::from_secs(5));
    let strict = TokenVerifier::with_cache(options, verifier.jwks_cache().clone());
    // Shares the cache, so the key set fetched above is reused
    report(&strict, &token).await;

    Ok(())
}

async fn report(verifier: &impl VerifyJwt, token: &str) {
    match verifier.verify(token).await {
        Ok(payload) => {
            println!("✓ Token verified successfully!");
            match payload.session_claims() {
                Ok(session) => {
                    println!("  User: {}", session.sub);
                    println!("  Session: {}", session.sid.as_deref().unwrap_or("-"));
                    println!("  Organization: {}", session.org_id.as_deref().unwrap_or("-"));
                }
                Err(e) => eprintln!("  Payload is not a session token: {}", e),
            }
        }
        Err(errors) => {
            for error in errors {
                eprintln!("✗ {}: {}", error.reason, error.message);
                if let Some(action) = error.action {
                    eprintln!("  {}", action);
                }
            }
        }
    }
}
