//! Generic CRUD handlers.
//!
//! Written once over [`Resource`] and instantiated per entity in the router,
//! e.g. `get(factory::get_one::<Tour>)`. The `fetch_*`/`create`/`update`
//! functions hold the logic so resource-specific handlers can reuse it after
//! their own preparation (nested routes, uploads, forced fields).

use axum::{
    extract::{Path, State},
    http::StatusCode,
};
use serde_json::Value;

use super::{ApiJson, ApiResponse, ApiResult, QueryPairs};
use crate::db::{parse_id, Creatable, Detail, QueryFeatures, Resource, Updatable};
use crate::errors::AppError;
use crate::AppState;

/// List documents with the query features applied.
pub async fn fetch_many<R: Resource>(
    state: &AppState,
    features: QueryFeatures,
) -> Result<Vec<Value>, AppError> {
    let docs = state.repo.find_many::<R>(&features).await?;
    let mut hydrated = R::hydrate(&state.repo, docs, Detail::List).await?;
    for doc in &mut hydrated {
        features.project(doc);
    }
    Ok(hydrated)
}

/// One fully hydrated document.
pub async fn fetch_one<R: Resource>(state: &AppState, id: &str) -> Result<Value, AppError> {
    let id = parse_id(id)?;
    let doc = state
        .repo
        .find_by_id::<R>(&id)
        .await?
        .ok_or_else(AppError::no_document)?;
    hydrate_one::<R>(state, doc, Detail::Single).await
}

async fn hydrate_one<R: Resource>(
    state: &AppState,
    doc: R,
    detail: Detail,
) -> Result<Value, AppError> {
    R::hydrate(&state.repo, vec![doc], detail)
        .await?
        .pop()
        .ok_or_else(AppError::no_document)
}

pub async fn create<R: Creatable>(state: &AppState, input: R::Create) -> Result<R, AppError> {
    let record = R::insert_record(input)?;
    R::before_write(&state.repo, &record).await?;
    let doc = state.repo.insert::<R>(record).await?;
    R::after_write(&state.repo, &doc).await?;
    tracing::debug!("Created {} {}", R::TABLE, doc.id());
    Ok(doc)
}

/// Merge `input` over the stored document, validate, and store it.
pub async fn update<R: Updatable>(
    state: &AppState,
    id: &str,
    input: R::Update,
) -> Result<Value, AppError> {
    let id = parse_id(id)?;
    let existing = state
        .repo
        .find_by_id::<R>(&id)
        .await?
        .ok_or_else(AppError::no_document)?;

    let record = R::update_record(&existing, input)?;
    R::before_write(&state.repo, &record).await?;
    let doc = state
        .repo
        .update::<R>(&id, record)
        .await?
        .ok_or_else(AppError::no_document)?;
    R::after_write(&state.repo, &doc).await?;
    tracing::debug!("Updated {} {}", R::TABLE, id);

    hydrate_one::<R>(state, doc, Detail::List).await
}

/// GET /api/v1/<resource>
pub async fn get_all<R: Resource>(
    State(state): State<AppState>,
    QueryPairs(params): QueryPairs,
) -> ApiResult {
    let features = QueryFeatures::from_params(R::FIELDS, &params)?;
    Ok(ApiResponse::list(fetch_many::<R>(&state, features).await?))
}

/// GET /api/v1/<resource>/{id}
pub async fn get_one<R: Resource>(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult {
    Ok(ApiResponse::document(fetch_one::<R>(&state, &id).await?))
}

/// POST /api/v1/<resource>
pub async fn create_one<R: Creatable>(
    State(state): State<AppState>,
    ApiJson(input): ApiJson<R::Create>,
) -> ApiResult {
    let doc = create::<R>(&state, input).await?;
    Ok(ApiResponse::document(serde_json::to_value(&doc)?).with_status(StatusCode::CREATED))
}

/// PATCH /api/v1/<resource>/{id}
pub async fn update_one<R: Updatable>(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(input): ApiJson<R::Update>,
) -> ApiResult {
    Ok(ApiResponse::document(update::<R>(&state, &id, input).await?))
}

/// DELETE /api/v1/<resource>/{id}
pub async fn delete_one<R: Resource>(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&id)?;
    let rated_tours = R::rated_tours(&state.repo, &id).await?;
    let doc = state
        .repo
        .delete::<R>(&id)
        .await?
        .ok_or_else(AppError::no_document)?;
    R::after_write(&state.repo, &doc).await?;
    for tour_id in &rated_tours {
        state.repo.recompute_tour_ratings(tour_id).await?;
    }
    tracing::debug!("Deleted {} {}", R::TABLE, id);
    Ok(StatusCode::NO_CONTENT)
}
