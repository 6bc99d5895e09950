//! Checkout and booking creation from a completed checkout.

use axum::extract::{Path, State};
use serde_json::json;

use super::{factory, ApiResponse, ApiResult};
use crate::auth::CurrentUser;
use crate::db::parse_id;
use crate::errors::AppError;
use crate::models::{Booking, BookingInput, Tour, User};
use crate::AppState;

/// GET /api/v1/bookings/checkout-session/{tourId}
pub async fn checkout_session(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(tour_id): Path<String>,
) -> ApiResult {
    let tour_id = parse_id(&tour_id)?;
    let tour = state
        .repo
        .find_by_id::<Tour>(&tour_id)
        .await?
        .ok_or_else(|| AppError::NotFound("No tour found with that ID".to_string()))?;

    let session = state.payments.create_checkout_session(&tour, &user).await?;
    tracing::info!(tour = %tour.id, user = %user.id, "Checkout session created");

    Ok(ApiResponse::new(json!({ "session": session })))
}

/// Record the booking a checkout success redirect describes. The booking
/// must be for the signed-in user.
pub async fn create_from_checkout(
    state: &AppState,
    user: &User,
    tour_id: &str,
    user_id: &str,
    price: &str,
) -> Result<Booking, AppError> {
    if user_id != user.id {
        return Err(AppError::Forbidden(
            "You can only book tours for your own account".to_string(),
        ));
    }
    let tour_id = parse_id(tour_id)?;
    let price: f64 = price
        .trim()
        .parse()
        .map_err(|_| AppError::BadRequest(format!("Invalid price: {}.", price)))?;

    let booking = factory::create::<Booking>(
        state,
        BookingInput {
            tour: Some(tour_id),
            user: Some(user.id.clone()),
            price: Some(price),
            paid: Some(true),
        },
    )
    .await?;
    tracing::info!(booking = %booking.id, "Booking recorded from checkout");
    Ok(booking)
}
