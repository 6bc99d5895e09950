//! Review endpoints, including the routes nested under a tour.

use axum::{
    extract::{Path, State},
    http::StatusCode,
};

use super::{factory, ApiJson, ApiResponse, ApiResult, QueryPairs};
use crate::auth::CurrentUser;
use crate::db::{parse_id, Condition, QueryFeatures, Resource};
use crate::errors::AppError;
use crate::models::{Review, ReviewInput, Tour, User};
use crate::AppState;

/// GET /api/v1/tours/{id}/reviews
pub async fn list_tour_reviews(
    State(state): State<AppState>,
    Path(tour_id): Path<String>,
    QueryPairs(params): QueryPairs,
) -> ApiResult {
    let tour_id = parse_id(&tour_id)?;
    let features = QueryFeatures::from_params(Review::FIELDS, &params)?
        .with_condition(Condition::eq("tour_id", tour_id));
    Ok(ApiResponse::list(
        factory::fetch_many::<Review>(&state, features).await?,
    ))
}

/// POST /api/v1/reviews
pub async fn create_review(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(input): ApiJson<ReviewInput>,
) -> ApiResult {
    create_for(&state, &user, None, input).await
}

/// POST /api/v1/tours/{id}/reviews
pub async fn create_tour_review(
    State(state): State<AppState>,
    Path(tour_id): Path<String>,
    CurrentUser(user): CurrentUser,
    ApiJson(input): ApiJson<ReviewInput>,
) -> ApiResult {
    create_for(&state, &user, Some(tour_id), input).await
}

/// The author is always the signed-in user; the tour comes from the path
/// when nested and must exist.
async fn create_for(
    state: &AppState,
    user: &User,
    tour_from_path: Option<String>,
    mut input: ReviewInput,
) -> ApiResult {
    input.user = Some(user.id.clone());
    if tour_from_path.is_some() {
        input.tour = tour_from_path;
    }

    if let Some(tour_id) = input.tour.as_deref().filter(|t| !t.trim().is_empty()) {
        let tour_id = parse_id(tour_id.trim())?;
        state
            .repo
            .find_by_id::<Tour>(&tour_id)
            .await?
            .ok_or_else(|| AppError::NotFound("No tour found with that ID".to_string()))?;
        input.tour = Some(tour_id);
    }

    let review = factory::create::<Review>(state, input).await?;
    Ok(ApiResponse::document(serde_json::to_value(&review)?).with_status(StatusCode::CREATED))
}
