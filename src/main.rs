//! Natours Backend
//!
//! REST API and server-rendered site for browsing and booking guided tours,
//! with SQLite persistence, JWT cookie authentication, image uploads,
//! transactional email and Stripe checkout.

mod api;
mod auth;
mod config;
mod db;
mod errors;
mod mail;
mod media;
mod models;
mod payments;
mod security;
mod views;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    handler::HandlerWithoutStateExt,
    http::{header, HeaderValue, Method, Uri},
    middleware,
    routing::{delete, get, patch, post},
    Router,
};
use sqlx::SqlitePool;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use api::{factory, views as pages};
use config::Config;
use db::Repository;
use errors::AppError;
use mail::Mailer;
use media::ImageStore;
use models::{Booking, Review, Role, Tour, User};
use payments::Payments;
use security::RateLimiter;
use views::Views;

/// Upper bound for multipart uploads; JSON bodies are capped separately.
const UPLOAD_LIMIT: usize = 10 * 1024 * 1024;

const ADMIN: &[Role] = &[Role::Admin];
const TOUR_STAFF: &[Role] = &[Role::Admin, Role::LeadGuide];
const ALL_GUIDES: &[Role] = &[Role::Admin, Role::LeadGuide, Role::Guide];
const REVIEWERS: &[Role] = &[Role::User];
const REVIEW_EDITORS: &[Role] = &[Role::User, Role::Admin];

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub config: Arc<Config>,
    pub views: Arc<Views>,
    pub mailer: Arc<Mailer>,
    pub payments: Arc<Payments>,
    pub images: Arc<ImageStore>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(config: Config, pool: SqlitePool) -> Result<Self, AppError> {
        let views = Arc::new(Views::new()?);
        let mailer = Arc::new(Mailer::new(&config, views.clone())?);
        let payments = Arc::new(Payments::new(&config)?);
        let images = Arc::new(ImageStore::new(&config.public_dir));
        let rate_limiter = Arc::new(RateLimiter::new(
            config.rate_limit_max,
            Duration::from_secs(config.rate_limit_window_secs),
        ));

        Ok(Self {
            repo: Arc::new(Repository::new(pool)),
            config: Arc::new(config),
            views,
            mailer,
            payments,
            images,
            rate_limiter,
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env();

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.environment.is_development() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    }

    tracing::info!("Starting Natours Backend ({:?})", config.environment);
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Public directory: {:?}", config.public_dir);
    tracing::info!("Bind address: {}", config.bind_addr);

    if config.uses_default_secret() {
        tracing::warn!("JWT_SECRET is not set. Tokens are signed with the development secret!");
    }
    if config.stripe_secret_key.is_none() {
        tracing::warn!("No STRIPE_SECRET_KEY configured. Checkout is disabled.");
    }

    // Initialize database
    let pool = db::init_database(&config.db_path).await?;

    let bind_addr = config.bind_addr;
    let state = AppState::new(config, pool)?;
    if state.mailer.is_log_only() {
        tracing::warn!("No mail transport configured. Emails are only logged.");
    }

    // Build router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on {}", bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

/// Gate a router behind `protect`.
fn protected(state: &AppState, router: Router<AppState>) -> Router<AppState> {
    router.route_layer(middleware::from_fn_with_state(state.clone(), auth::protect))
}

/// Gate a router behind `protect` and a role check.
fn restricted(
    state: &AppState,
    roles: &'static [Role],
    router: Router<AppState>,
) -> Router<AppState> {
    let router = router.route_layer(middleware::from_fn(move |req, next| {
        auth::restrict_to(roles, req, next)
    }));
    protected(state, router)
}

fn tour_routes(state: &AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/", get(factory::get_all::<Tour>))
        .route("/top-5-cheap", get(api::tours::top_cheap))
        .route("/tour-stats", get(api::tours::tour_stats))
        .route(
            "/tours-within/{distance}/center/{latlng}/unit/{unit}",
            get(api::tours::tours_within),
        )
        .route("/distances/{latlng}/unit/{unit}", get(api::tours::distances))
        .route("/{id}", get(factory::get_one::<Tour>));

    let guides = Router::new().route("/monthly-plan/{year}", get(api::tours::monthly_plan));

    let staff = Router::new()
        .route("/", post(factory::create_one::<Tour>))
        .route(
            "/{id}",
            patch(api::tours::update_tour).delete(factory::delete_one::<Tour>),
        );

    // Reviews nested under a tour
    let tour_reviews = Router::new().route("/{id}/reviews", get(api::reviews::list_tour_reviews));
    let tour_reviewers =
        Router::new().route("/{id}/reviews", post(api::reviews::create_tour_review));

    public
        .merge(restricted(state, ALL_GUIDES, guides))
        .merge(restricted(state, TOUR_STAFF, staff))
        .merge(protected(state, tour_reviews))
        .merge(restricted(state, REVIEWERS, tour_reviewers))
}

fn user_routes(state: &AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/signup", post(api::auth::signup))
        .route("/login", post(api::auth::login))
        .route("/logout", get(api::auth::logout))
        .route("/forgotPassword", post(api::auth::forgot_password))
        .route("/resetPassword/{token}", patch(api::auth::reset_password));

    let account = Router::new()
        .route("/updateMyPassword", patch(api::auth::update_password))
        .route("/me", get(api::users::get_me))
        .route("/updateMe", patch(api::users::update_me))
        .route("/deleteMe", delete(api::users::delete_me));

    let admin = Router::new()
        .route(
            "/",
            get(factory::get_all::<User>).post(api::users::create_user),
        )
        .route(
            "/{id}",
            get(factory::get_one::<User>)
                .patch(factory::update_one::<User>)
                .delete(factory::delete_one::<User>),
        );

    public
        .merge(protected(state, account))
        .merge(restricted(state, ADMIN, admin))
}

fn review_routes(state: &AppState) -> Router<AppState> {
    let readers = Router::new()
        .route("/", get(factory::get_all::<Review>))
        .route("/{id}", get(factory::get_one::<Review>));

    let authors = Router::new().route("/", post(api::reviews::create_review));

    let editors = Router::new().route(
        "/{id}",
        patch(factory::update_one::<Review>).delete(factory::delete_one::<Review>),
    );

    protected(state, readers)
        .merge(restricted(state, REVIEWERS, authors))
        .merge(restricted(state, REVIEW_EDITORS, editors))
}

fn booking_routes(state: &AppState) -> Router<AppState> {
    let checkout = Router::new().route(
        "/checkout-session/{tourId}",
        get(api::bookings::checkout_session),
    );

    let staff = Router::new()
        .route(
            "/",
            get(factory::get_all::<Booking>).post(factory::create_one::<Booking>),
        )
        .route(
            "/{id}",
            get(factory::get_one::<Booking>)
                .patch(factory::update_one::<Booking>)
                .delete(factory::delete_one::<Booking>),
        );

    protected(state, checkout).merge(restricted(state, TOUR_STAFF, staff))
}

fn view_routes(state: &AppState) -> Router<AppState> {
    let browsing = Router::new()
        .route("/", get(pages::overview))
        .route("/tour/{slug}", get(pages::tour))
        .route("/login", get(pages::login))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::is_logged_in,
        ));

    let account = Router::new()
        .route("/me", get(pages::account))
        .route("/my-tours", get(pages::my_tours))
        .route("/submit-user-data", post(pages::submit_user_data));

    browsing.merge(protected(state, account))
}

/// Unmatched paths that are not static files either.
async fn route_not_found(uri: Uri) -> AppError {
    AppError::NotFound(format!("Can't find {} on this server!", uri.path()))
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = match state.config.cors_origin.parse::<HeaderValue>() {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_credentials(true)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]),
        Err(_) => {
            tracing::warn!(
                "Invalid CORS origin {:?}, cross-origin requests are refused",
                state.config.cors_origin
            );
            CorsLayer::new()
        }
    };

    // Static files, then the not-found error
    let static_files = ServeDir::new(&state.config.public_dir)
        .call_fallback_on_method_not_allowed(true)
        .not_found_service(route_not_found.into_service());

    let api_routes = Router::new()
        .nest("/tours", tour_routes(&state))
        .nest("/users", user_routes(&state))
        .nest("/reviews", review_routes(&state))
        .nest("/bookings", booking_routes(&state));

    // Outermost first
    let stack = ServiceBuilder::new()
        .layer(cors)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            errors::error_funnel,
        ))
        .layer(middleware::from_fn(security::sanitize_body))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            security::rate_limit,
        ))
        .layer(DefaultBodyLimit::max(UPLOAD_LIMIT));

    let router = Router::new()
        .nest("/api/v1", api_routes)
        .merge(view_routes(&state))
        .fallback_service(static_files)
        .layer(stack);

    security::with_security_headers(router)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
