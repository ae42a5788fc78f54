//! HTTP Basic authentication for token issuance.

use crate::config::AuthConfig;
use crate::server::error::AppError;
use crate::server::AppContext;
use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use axum_extra::{
    headers::{authorization::Basic, Authorization},
    typed_header::TypedHeader,
};
use gifforge_common::Error;

/// Realm announced in `WWW-Authenticate` challenges.
pub const REALM: &str = "gif-conversion-api";

/// Check a username and password against the configured credentials.
///
/// Always succeeds when authentication is disabled.
pub fn verify_credentials(config: &AuthConfig, username: &str, password: &str) -> bool {
    if !config.enabled {
        return true;
    }

    let (Some(expected_username), Some(password_hash)) = (&config.username, &config.password_hash)
    else {
        return false;
    };

    if username != expected_username {
        return false;
    }

    match bcrypt::verify(password, password_hash) {
        Ok(valid) => valid,
        Err(e) => {
            tracing::warn!(error = %e, "Configured password hash cannot be verified");
            false
        }
    }
}

/// Middleware rejecting requests without valid Basic credentials.
pub async fn basic_auth_middleware(
    State(ctx): State<AppContext>,
    credentials: Option<TypedHeader<Authorization<Basic>>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    if !ctx.config.server.auth.enabled {
        return Ok(next.run(request).await);
    }

    let Some(TypedHeader(basic)) = credentials else {
        return Err(Error::Unauthorized("Missing credentials".to_string()).into());
    };

    // Verification blocks for tens of milliseconds.
    let config = ctx.config.server.auth.clone();
    let username = basic.username().to_string();
    let password = basic.password().to_string();
    let verified = tokio::task::spawn_blocking(move || {
        verify_credentials(&config, &username, &password)
    })
    .await
    .map_err(|e| Error::internal(format!("credential check failed: {}", e)))?;

    if !verified {
        tracing::warn!(username = basic.username(), "Rejected token request with invalid credentials");
        return Err(Error::Unauthorized("Invalid credentials".to_string()).into());
    }

    Ok(next.run(request).await)
}

/// Generate a bcrypt password hash
pub fn hash_password(password: &str) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST)
}
