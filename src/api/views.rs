//! Rendered pages.

use axum::{
    extract::{rejection::FormRejection, Path, State},
    response::{Html, IntoResponse, Redirect, Response},
    Form,
};
use minijinja::context;
use serde::Deserialize;

use super::{bookings, users, QueryPairs};
use crate::auth::{CurrentUser, MaybeUser};
use crate::db::{Detail, QueryFeatures, Resource};
use crate::errors::AppError;
use crate::models::{Tour, User};
use crate::AppState;

fn render(
    state: &AppState,
    template: &str,
    ctx: minijinja::Value,
) -> Result<Html<String>, AppError> {
    Ok(Html(state.views.render(template, ctx)?))
}

/// GET /
///
/// A checkout success redirect lands here with `tour`, `user` and `price`;
/// the booking is recorded and the query string dropped.
pub async fn overview(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    query: QueryPairs,
) -> Result<Response, AppError> {
    if let (Some(tour), Some(booked_for), Some(price)) =
        (query.get("tour"), query.get("user"), query.get("price"))
    {
        let user = user.as_ref().ok_or_else(|| {
            AppError::Unauthorized("Please log in to complete your booking.".to_string())
        })?;
        bookings::create_from_checkout(&state, user, tour, booked_for, price).await?;
        return Ok(Redirect::to("/").into_response());
    }

    let tours = state.repo.find_many::<Tour>(&QueryFeatures::default()).await?;
    let tours = Tour::hydrate(&state.repo, tours, Detail::List).await?;
    Ok(render(
        &state,
        "overview.html",
        context! { title => "All Tours", tours => tours, user => user },
    )?
    .into_response())
}

/// GET /tour/{slug}
pub async fn tour(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    Path(slug): Path<String>,
) -> Result<Html<String>, AppError> {
    let tour = state
        .repo
        .find_tour_by_slug(&slug)
        .await?
        .ok_or_else(|| AppError::NotFound("There is no tour with that name.".to_string()))?;
    let title = format!("{} Tour", tour.name);

    let tour = Tour::hydrate(&state.repo, vec![tour], Detail::Single)
        .await?
        .pop()
        .ok_or_else(|| AppError::NotFound("There is no tour with that name.".to_string()))?;
    render(
        &state,
        "tour.html",
        context! { title => title, tour => tour, user => user },
    )
}

/// GET /login
pub async fn login(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
) -> Result<Html<String>, AppError> {
    render(
        &state,
        "login.html",
        context! { title => "Log into your account", user => user },
    )
}

fn account_page(state: &AppState, user: &User) -> Result<Html<String>, AppError> {
    render(
        state,
        "account.html",
        context! { title => "Your account", user => user },
    )
}

/// GET /me
pub async fn account(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Html<String>, AppError> {
    account_page(&state, &user)
}

/// GET /my-tours
pub async fn my_tours(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Html<String>, AppError> {
    let tour_ids: Vec<String> = state
        .repo
        .bookings_for_user(&user.id)
        .await?
        .into_iter()
        .map(|booking| booking.tour)
        .collect();
    let tours = state.repo.tours_by_ids(&tour_ids).await?;
    let tours = Tour::hydrate(&state.repo, tours, Detail::List).await?;

    render(
        &state,
        "overview.html",
        context! { title => "My Tours", tours => tours, user => user },
    )
}

#[derive(Debug, Deserialize)]
pub struct AccountForm {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// POST /submit-user-data
pub async fn submit_user_data(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    form: Result<Form<AccountForm>, FormRejection>,
) -> Result<Html<String>, AppError> {
    let Form(form) = form?;
    let updated = users::apply_profile_update(&state, &user, form.name, form.email, None).await?;
    tracing::info!("Account {} updated from the settings page", updated.id);
    account_page(&state, &updated)
}
