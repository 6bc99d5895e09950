//! Account endpoints: signup, login, logout and the password flows.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::{Duration, Utc};
use serde_json::json;

use super::ApiJson;
use crate::auth::{
    create_reset_token, hash_password, hash_reset_token, logout_cookie, reset_token_matches,
    sign_token, token_cookie, verify_password, CurrentUser, RESET_TOKEN_MINUTES,
};
use crate::errors::AppError;
use crate::models::{
    non_blank, ForgotPasswordRequest, LoginRequest, PasswordRequest, SignupRequest,
    UpdatePasswordRequest, User,
};
use crate::AppState;

const INVALID_RESET_TOKEN: &str = "Token is invalid or has expired";

/// Issue a token for `user` in the body and the `jwt` cookie.
fn send_token(
    state: &AppState,
    user: &User,
    status: StatusCode,
    jar: CookieJar,
) -> Result<Response, AppError> {
    let token = sign_token(&user.id, &state.config)?;
    let jar = jar.add(token_cookie(token.clone(), &state.config));

    let body = json!({
        "status": "success",
        "token": token,
        "data": { "user": user },
    });
    Ok((status, jar, Json(body)).into_response())
}

/// Refetch after a write so the response reflects the stored account.
async fn reload(state: &AppState, user_id: &str) -> Result<User, AppError> {
    state
        .repo
        .find_by_id::<User>(user_id)
        .await?
        .ok_or_else(|| AppError::Internal(format!("User {} vanished after update", user_id)))
}

/// POST /api/v1/users/signup
pub async fn signup(
    State(state): State<AppState>,
    jar: CookieJar,
    ApiJson(request): ApiJson<SignupRequest>,
) -> Result<Response, AppError> {
    let new_user = request.into_new_user()?;
    let password_hash = hash_password(new_user.password.clone()).await?;
    let user = state
        .repo
        .insert::<User>(new_user.into_record(password_hash))
        .await?;
    tracing::info!("New account {} ({})", user.id, user.email);

    let url = format!("{}/me", state.config.public_url);
    if let Err(e) = state.mailer.send_welcome(&user, &url).await {
        tracing::warn!("Welcome mail to {} not sent: {}", user.email, e);
    }

    send_token(&state, &user, StatusCode::CREATED, jar)
}

/// POST /api/v1/users/login
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    ApiJson(request): ApiJson<LoginRequest>,
) -> Result<Response, AppError> {
    let (Some(email), Some(password)) = (
        non_blank(request.email),
        request.password.filter(|p| !p.is_empty()),
    ) else {
        return Err(AppError::BadRequest(
            "Please provide email and password!".to_string(),
        ));
    };

    let incorrect = || AppError::Unauthorized("Incorrect email or password".to_string());
    let user = state
        .repo
        .find_user_by_email(&email)
        .await?
        .ok_or_else(incorrect)?;
    if !verify_password(password, user.password_hash.clone()).await? {
        return Err(incorrect());
    }

    send_token(&state, &user, StatusCode::OK, jar)
}

/// GET /api/v1/users/logout
pub async fn logout(jar: CookieJar) -> impl IntoResponse {
    (jar.add(logout_cookie()), Json(json!({ "status": "success" })))
}

/// POST /api/v1/users/forgotPassword
pub async fn forgot_password(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<ForgotPasswordRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let email = non_blank(request.email)
        .ok_or_else(|| AppError::BadRequest("Please provide your email".to_string()))?;
    let user = state
        .repo
        .find_user_by_email(&email)
        .await?
        .ok_or_else(|| AppError::NotFound("There is no user with email address.".to_string()))?;

    let (token, hash) = create_reset_token();
    let expires = Utc::now() + Duration::minutes(RESET_TOKEN_MINUTES);
    state
        .repo
        .set_reset_token(&user.id, Some((&hash, expires)))
        .await?;

    let url = format!(
        "{}/api/v1/users/resetPassword/{}",
        state.config.public_url, token
    );
    if let Err(e) = state.mailer.send_password_reset(&user, &url).await {
        state.repo.set_reset_token(&user.id, None).await?;
        return Err(e);
    }

    Ok(Json(json!({
        "status": "success",
        "message": "Token sent to email!",
    })))
}

/// PATCH /api/v1/users/resetPassword/{token}
pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    jar: CookieJar,
    ApiJson(request): ApiJson<PasswordRequest>,
) -> Result<Response, AppError> {
    let candidate = hash_reset_token(&token);
    let user = state
        .repo
        .users_with_pending_reset(Utc::now())
        .await?
        .into_iter()
        .find(|user| {
            user.password_reset_token
                .as_deref()
                .is_some_and(|stored| reset_token_matches(stored, &candidate))
        })
        .ok_or_else(|| AppError::BadRequest(INVALID_RESET_TOKEN.to_string()))?;

    let password = request.into_password()?;
    store_password(&state, &user.id, password).await?;
    tracing::info!("Password reset for {}", user.id);

    let user = reload(&state, &user.id).await?;
    send_token(&state, &user, StatusCode::OK, jar)
}

/// PATCH /api/v1/users/updateMyPassword
pub async fn update_password(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
    ApiJson(request): ApiJson<UpdatePasswordRequest>,
) -> Result<Response, AppError> {
    let current = request.password_current.unwrap_or_default();
    if !verify_password(current, user.password_hash.clone()).await? {
        return Err(AppError::Unauthorized(
            "Your current password is wrong".to_string(),
        ));
    }

    let password = request.new_password.into_password()?;
    store_password(&state, &user.id, password).await?;

    let user = reload(&state, &user.id).await?;
    send_token(&state, &user, StatusCode::OK, jar)
}

/// Hash and store a new password. The change is dated one second back so a
/// token issued right after it is not treated as stale.
async fn store_password(state: &AppState, user_id: &str, password: String) -> Result<(), AppError> {
    let password_hash = hash_password(password).await?;
    state
        .repo
        .set_password(user_id, &password_hash, Utc::now() - Duration::seconds(1))
        .await
}
