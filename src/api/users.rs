//! Endpoints for the signed-in user's own account, plus the admin-only
//! create placeholder.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use super::{factory, ApiResponse, ApiResult};
use crate::auth::CurrentUser;
use crate::db::Updatable;
use crate::errors::AppError;
use crate::media::FormPayload;
use crate::models::{UpdateUserRequest, User};
use crate::AppState;

const NOT_FOR_PASSWORDS: &str =
    "This route is not for password updates. Please use /updateMyPassword.";

/// GET /api/v1/users/me
pub async fn get_me(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> ApiResult {
    Ok(ApiResponse::document(
        factory::fetch_one::<User>(&state, &user.id).await?,
    ))
}

/// Apply the self-service fields (name, email, photo) to `user`.
pub async fn apply_profile_update(
    state: &AppState,
    user: &User,
    name: Option<String>,
    email: Option<String>,
    photo: Option<String>,
) -> Result<User, AppError> {
    let input = UpdateUserRequest {
        name,
        email,
        role: None,
        photo,
    };
    let record = User::update_record(user, input)?;
    state
        .repo
        .update::<User>(&user.id, record)
        .await?
        .ok_or_else(AppError::no_document)
}

/// PATCH /api/v1/users/updateMe
///
/// JSON or multipart with an optional `photo` file. Only name, email and
/// photo are applied; role and anything else in the body are ignored.
pub async fn update_me(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    payload: FormPayload,
) -> ApiResult {
    if payload.has_field("password") || payload.has_field("passwordConfirm") {
        return Err(AppError::BadRequest(NOT_FOR_PASSWORDS.to_string()));
    }

    let request: UpdateUserRequest = payload.deserialize()?;
    let photo = match payload.files_named("photo").next() {
        Some(file) => Some(state.images.save_user_photo(&user.id, file).await?),
        None => None,
    };

    let updated = apply_profile_update(&state, &user, request.name, request.email, photo).await?;
    Ok(ApiResponse::new(json!({ "user": updated })))
}

/// DELETE /api/v1/users/deleteMe
pub async fn delete_me(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<StatusCode, AppError> {
    state.repo.deactivate_user(&user.id).await?;
    tracing::info!("Account {} deactivated", user.id);
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/users
pub async fn create_user() -> impl IntoResponse {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "status": "error",
            "message": "This route is not defined! Please use /signup instead",
        })),
    )
}
