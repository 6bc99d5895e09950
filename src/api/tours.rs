//! Tour endpoints beyond plain CRUD: the cheap-tours alias, analytics,
//! geospatial queries and image uploads.

use axum::extract::{Path, State};
use serde_json::{json, Value};

use super::{factory, ApiResponse, ApiResult, QueryPairs};
use crate::db::{parse_id, Detail, QueryFeatures, Resource};
use crate::errors::AppError;
use crate::media::{FormPayload, MAX_TOUR_IMAGES};
use crate::models::{parse_lat_lng, DistanceUnit, Tour, TourInput};
use crate::AppState;

const BAD_LAT_LNG: &str = "Please provide latitude and longitude in the format lat,lng.";

/// Query applied by `/top-5-cheap`, overriding the caller's.
const TOP_CHEAP_QUERY: [(&str, &str); 3] = [
    ("limit", "5"),
    ("sort", "-ratingsAverage,price"),
    ("fields", "name,price,ratingsAverage,summary,difficulty"),
];

/// GET /api/v1/tours/top-5-cheap
pub async fn top_cheap(
    State(state): State<AppState>,
    QueryPairs(mut params): QueryPairs,
) -> ApiResult {
    params.retain(|(key, _)| !TOP_CHEAP_QUERY.iter().any(|(k, _)| k == key));
    params.extend(
        TOP_CHEAP_QUERY
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string())),
    );

    let features = QueryFeatures::from_params(Tour::FIELDS, &params)?;
    Ok(ApiResponse::list(
        factory::fetch_many::<Tour>(&state, features).await?,
    ))
}

/// GET /api/v1/tours/tour-stats
pub async fn tour_stats(State(state): State<AppState>) -> ApiResult {
    let stats = state.repo.tour_stats().await?;
    Ok(ApiResponse::new(json!({ "stats": stats })))
}

/// GET /api/v1/tours/monthly-plan/{year}
pub async fn monthly_plan(State(state): State<AppState>, Path(year): Path<String>) -> ApiResult {
    let year = year
        .trim()
        .parse::<i32>()
        .ok()
        .filter(|year| (1..=9998).contains(year))
        .ok_or_else(|| AppError::BadRequest(format!("Invalid year: {}.", year)))?;

    let plan = state.repo.monthly_plan(year).await?;
    Ok(ApiResponse::new(json!({ "plan": plan })))
}

fn center_and_unit(latlng: &str, unit: &str) -> Result<((f64, f64), DistanceUnit), AppError> {
    let center = parse_lat_lng(latlng).ok_or_else(|| AppError::BadRequest(BAD_LAT_LNG.to_string()))?;
    let unit = DistanceUnit::from_str(unit).unwrap_or(DistanceUnit::Kilometers);
    Ok((center, unit))
}

/// GET /api/v1/tours/tours-within/{distance}/center/{latlng}/unit/{unit}
pub async fn tours_within(
    State(state): State<AppState>,
    Path((distance, latlng, unit)): Path<(String, String, String)>,
) -> ApiResult {
    let (center, unit) = center_and_unit(&latlng, &unit)?;
    let distance: f64 = distance
        .trim()
        .parse()
        .ok()
        .filter(|d: &f64| d.is_finite() && *d >= 0.0)
        .ok_or_else(|| AppError::BadRequest(format!("Invalid distance: {}.", distance)))?;
    let radius = distance / unit.earth_radius();

    let tours: Vec<Tour> = state
        .repo
        .tours_by_distance(center)
        .await?
        .into_iter()
        .filter(|(_, angle)| *angle <= radius)
        .map(|(tour, _)| tour)
        .collect();

    let docs = Tour::hydrate(&state.repo, tours, Detail::List).await?;
    Ok(ApiResponse::list(docs))
}

/// GET /api/v1/tours/distances/{latlng}/unit/{unit}
pub async fn distances(
    State(state): State<AppState>,
    Path((latlng, unit)): Path<(String, String)>,
) -> ApiResult {
    let (center, unit) = center_and_unit(&latlng, &unit)?;

    let docs: Vec<Value> = state
        .repo
        .tours_by_distance(center)
        .await?
        .into_iter()
        .map(|(tour, angle)| {
            json!({
                "id": tour.id,
                "name": tour.name,
                "distance": angle * unit.earth_radius(),
            })
        })
        .collect();

    Ok(ApiResponse::new(json!({ "data": docs })))
}

/// PATCH /api/v1/tours/{id}
///
/// Accepts JSON or a multipart form with an `imageCover` file and up to
/// three `images` files alongside the regular fields.
pub async fn update_tour(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: FormPayload,
) -> ApiResult {
    let id = parse_id(&id)?;
    let mut input: TourInput = payload.deserialize()?;

    let images: Vec<_> = payload.files_named("images").collect();
    if images.len() > MAX_TOUR_IMAGES {
        return Err(AppError::BadRequest(format!(
            "Too many files for images (max {})",
            MAX_TOUR_IMAGES
        )));
    }
    let cover = payload.files_named("imageCover").next();

    if cover.is_some() || !images.is_empty() {
        // Refuse before writing files for a tour that does not exist.
        state
            .repo
            .find_by_id::<Tour>(&id)
            .await?
            .ok_or_else(AppError::no_document)?;
    }

    if let Some(file) = cover {
        input.image_cover = Some(state.images.save_tour_image(&id, file, "cover").await?);
    }
    if !images.is_empty() {
        let mut stored = Vec::with_capacity(images.len());
        for (i, file) in images.into_iter().enumerate() {
            let suffix = (i + 1).to_string();
            stored.push(state.images.save_tour_image(&id, file, &suffix).await?);
        }
        input.images = Some(stored);
    }

    Ok(ApiResponse::document(
        factory::update::<Tour>(&state, &id, input).await?,
    ))
}
