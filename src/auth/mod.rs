//! Authentication module.
//!
//! Issues and verifies HS256 JSON web tokens, hashes passwords with Argon2,
//! manages password reset tokens and provides the request gates:
//! [`protect`] requires a valid token, [`restrict_to`] checks the role and
//! [`is_logged_in`] exposes an optional user to rendered pages.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::config::Config;
use crate::errors::AppError;
use crate::models::{Role, User};
use crate::AppState;

/// Name of the cookie carrying the token.
pub const TOKEN_COOKIE: &str = "jwt";

/// Reset tokens expire after this many minutes.
pub const RESET_TOKEN_MINUTES: i64 = 10;

const NOT_LOGGED_IN: &str = "You are not logged in! Please log in to get access.";
const USER_GONE: &str = "The user belonging to this token does no longer exist.";
const PASSWORD_CHANGED: &str = "User recently changed password! Please log in again.";
const NOT_PERMITTED: &str = "You do not have permission to perform this action";

/// Token payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub id: String,
    pub iat: i64,
    pub exp: i64,
}

/// Sign a token for `user_id` valid for the configured number of days.
pub fn sign_token(user_id: &str, config: &Config) -> Result<String, AppError> {
    let now = Utc::now();
    let claims = Claims {
        id: user_id.to_string(),
        iat: now.timestamp(),
        exp: (now + Duration::days(config.jwt_expires_in_days)).timestamp(),
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("Failed to sign token: {}", e)))
}

/// Verify signature and expiry.
pub fn verify_token(token: &str, secret: &str) -> Result<Claims, AppError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )?;
    Ok(data.claims)
}

/// Hash a password on the blocking pool.
pub async fn hash_password(password: String) -> Result<String, AppError> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))
    })
    .await?
}

/// Check a candidate password against a stored hash on the blocking pool.
pub async fn verify_password(password: String, password_hash: String) -> Result<bool, AppError> {
    tokio::task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&password_hash)
            .map_err(|e| AppError::Internal(format!("Stored password hash is invalid: {}", e)))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    })
    .await?
}

/// A fresh reset token: the plain value to mail and its hash to store.
pub fn create_reset_token() -> (String, String) {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let token = hex::encode(bytes);
    let hash = hash_reset_token(&token);
    (token, hash)
}

pub fn hash_reset_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Constant-time comparison of a stored reset hash with a candidate hash.
pub fn reset_token_matches(stored: &str, candidate: &str) -> bool {
    stored.as_bytes().ct_eq(candidate.as_bytes()).into()
}

/// Cookie carrying a freshly issued token.
pub fn token_cookie(token: String, config: &Config) -> Cookie<'static> {
    Cookie::build((TOKEN_COOKIE, token))
        .path("/")
        .http_only(true)
        .secure(!config.environment.is_development())
        .max_age(time::Duration::days(config.jwt_cookie_expires_in_days))
        .build()
}

/// Short-lived placeholder that replaces the token on logout.
pub fn logout_cookie() -> Cookie<'static> {
    Cookie::build((TOKEN_COOKIE, "loggedout"))
        .path("/")
        .http_only(true)
        .max_age(time::Duration::seconds(10))
        .build()
}

/// Token from `Authorization: Bearer`, falling back to the cookie.
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());

    match bearer {
        Some(token) => Some(token.to_string()),
        None => CookieJar::from_headers(headers)
            .get(TOKEN_COOKIE)
            .map(|c| c.value().to_string())
            .filter(|t| !t.is_empty()),
    }
}

/// Resolve a token to the active user it was issued for.
async fn authenticate(state: &AppState, token: &str) -> Result<User, AppError> {
    let claims = verify_token(token, &state.config.jwt_secret)?;

    let user = state
        .repo
        .find_by_id::<User>(&claims.id)
        .await?
        .ok_or_else(|| AppError::Unauthorized(USER_GONE.to_string()))?;

    if user.changed_password_after(claims.iat) {
        return Err(AppError::Unauthorized(PASSWORD_CHANGED.to_string()));
    }
    Ok(user)
}

/// The authenticated user, set by [`protect`] or [`is_logged_in`].
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized(NOT_LOGGED_IN.to_string()))
    }
}

/// The user if one is logged in; never rejects.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<User>);

impl<S: Send + Sync> FromRequestParts<S> for MaybeUser {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(
            parts.extensions.get::<CurrentUser>().map(|c| c.0.clone()),
        ))
    }
}

/// Gate: require a valid token for an active user whose password has not
/// changed since the token was issued.
pub async fn protect(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = token_from_headers(request.headers())
        .ok_or_else(|| AppError::Unauthorized(NOT_LOGGED_IN.to_string()))?;

    let user = authenticate(&state, &token).await?;
    tracing::debug!("Authenticated {} ({})", user.email, user.role.as_str());

    request.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(request).await)
}

/// Gate: the current user must hold one of `roles`. Runs after [`protect`].
pub async fn restrict_to(
    roles: &'static [Role],
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let allowed = request
        .extensions()
        .get::<CurrentUser>()
        .is_some_and(|CurrentUser(user)| user.has_role(roles));

    if !allowed {
        return Err(AppError::Forbidden(NOT_PERMITTED.to_string()));
    }
    Ok(next.run(request).await)
}

/// Page helper: attach the user behind the cookie, if any. Never fails.
pub async fn is_logged_in(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = CookieJar::from_headers(request.headers())
        .get(TOKEN_COOKIE)
        .map(|c| c.value().to_string());

    if let Some(token) = token {
        if let Ok(user) = authenticate(&state, &token).await {
            request.extensions_mut().insert(CurrentUser(user));
        }
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn config() -> Config {
        Config::for_testing(std::path::Path::new("."))
    }

    #[test]
    fn test_token_round_trip() {
        let config = config();
        let token = sign_token("user-1", &config).unwrap();
        let claims = verify_token(&token, &config.jwt_secret).unwrap();
        assert_eq!(claims.id, "user-1");
        assert_eq!(
            claims.exp - claims.iat,
            config.jwt_expires_in_days * 24 * 60 * 60
        );
    }

    #[test]
    fn test_token_with_wrong_secret_is_invalid() {
        let token = sign_token("user-1", &config()).unwrap();
        let err = verify_token(&token, "other-secret").unwrap_err();
        assert_eq!(err.message(), "Invalid token. Please log in again!");
    }

    #[test]
    fn test_expired_token() {
        let mut config = config();
        config.jwt_expires_in_days = -1;
        let token = sign_token("user-1", &config).unwrap();
        let err = verify_token(&token, &config.jwt_secret).unwrap_err();
        assert_eq!(err.message(), "Your token has expired! Please log in again.");
    }

    #[tokio::test]
    async fn test_password_hashing() {
        let hash = hash_password("pass1234".to_string()).await.unwrap();
        assert_ne!(hash, "pass1234");
        assert!(verify_password("pass1234".to_string(), hash.clone())
            .await
            .unwrap());
        assert!(!verify_password("wrong-pass".to_string(), hash).await.unwrap());
    }

    #[test]
    fn test_reset_token_hash() {
        let (token, hash) = create_reset_token();
        assert_eq!(token.len(), 64);
        assert_eq!(hash, hash_reset_token(&token));
        assert_ne!(hash, token);
        assert!(reset_token_matches(&hash, &hash_reset_token(&token)));
        assert!(!reset_token_matches(&hash, &hash_reset_token("guess")));
    }

    #[test]
    fn test_bearer_header_wins_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("jwt=from-cookie"));
        assert_eq!(token_from_headers(&headers).as_deref(), Some("from-cookie"));

        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer from-header"),
        );
        assert_eq!(token_from_headers(&headers).as_deref(), Some("from-header"));
    }

    #[test]
    fn test_cookie_attributes() {
        let config = config();
        let cookie = token_cookie("abc".to_string(), &config);
        assert_eq!(cookie.name(), TOKEN_COOKIE);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(
            cookie.max_age(),
            Some(time::Duration::days(config.jwt_cookie_expires_in_days))
        );

        let logout = logout_cookie();
        assert_eq!(logout.value(), "loggedout");
        assert_eq!(logout.max_age(), Some(time::Duration::seconds(10)));
    }
}
