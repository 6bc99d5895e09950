//! Stripe checkout client.
//!
//! Creates hosted checkout sessions over the Stripe REST API. The session's
//! success URL points back at the overview page with the booking details in
//! the query string; visiting it records the booking.

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use crate::config::Config;
use crate::errors::AppError;
use crate::models::{Tour, User};

const NOT_CONFIGURED: &str = "Payments are not configured on this server.";
const PROVIDER_FAILED: &str = "Could not create a checkout session. Try again later!";

/// Timeout for calls to the payment provider.
const REQUEST_TIMEOUT_SECS: u64 = 30;

pub struct Payments {
    client: Client,
    secret_key: Option<String>,
    api_base: String,
    public_url: String,
}

impl Payments {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            secret_key: config.stripe_secret_key.clone(),
            api_base: config.stripe_api_base.trim_end_matches('/').to_string(),
            public_url: config.public_url.clone(),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.secret_key.is_some()
    }

    fn sessions_url(&self) -> String {
        format!("{}/v1/checkout/sessions", self.api_base)
    }

    /// Where the provider sends the customer after paying.
    pub fn success_url(&self, tour: &Tour, user: &User) -> String {
        format!(
            "{}/?tour={}&user={}&price={}",
            self.public_url, tour.id, user.id, tour.price
        )
    }

    /// Form parameters for a one-item card checkout priced in cents.
    fn session_params(&self, tour: &Tour, user: &User) -> Vec<(String, String)> {
        let item = |key: &str| format!("line_items[0][{}]", key);
        vec![
            ("mode".to_string(), "payment".to_string()),
            ("payment_method_types[]".to_string(), "card".to_string()),
            ("success_url".to_string(), self.success_url(tour, user)),
            (
                "cancel_url".to_string(),
                format!("{}/tour/{}", self.public_url, tour.slug),
            ),
            ("customer_email".to_string(), user.email.clone()),
            ("client_reference_id".to_string(), tour.id.clone()),
            (item("quantity"), "1".to_string()),
            (item("price_data][currency"), "usd".to_string()),
            (
                item("price_data][unit_amount"),
                ((tour.price * 100.0).round() as i64).to_string(),
            ),
            (
                item("price_data][product_data][name"),
                format!("{} Tour", tour.name),
            ),
            (
                item("price_data][product_data][description"),
                tour.summary.clone(),
            ),
            (
                item("price_data][product_data][images][0]"),
                format!("{}/img/tours/{}", self.public_url, tour.image_cover),
            ),
        ]
    }

    /// Create a checkout session and return the provider's session object.
    pub async fn create_checkout_session(
        &self,
        tour: &Tour,
        user: &User,
    ) -> Result<Value, AppError> {
        let Some(secret_key) = &self.secret_key else {
            return Err(AppError::ServiceUnavailable(NOT_CONFIGURED.to_string()));
        };

        tracing::debug!(tour = %tour.id, user = %user.id, "Creating checkout session");

        let response = self
            .client
            .post(self.sessions_url())
            .bearer_auth(secret_key)
            .form(&self.session_params(tour, user))
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Checkout request failed: {}", e);
                AppError::Delivery(PROVIDER_FAILED.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!("Checkout provider returned {}: {}", status, body);
            return Err(AppError::Delivery(PROVIDER_FAILED.to_string()));
        }

        response.json::<Value>().await.map_err(|e| {
            tracing::error!("Checkout response was not JSON: {}", e);
            AppError::Delivery(PROVIDER_FAILED.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Difficulty, Role, DEFAULT_PHOTO};
    use chrono::Utc;

    fn tour() -> Tour {
        Tour {
            id: "tour-1".to_string(),
            name: "The Forest Hiker".to_string(),
            slug: "the-forest-hiker".to_string(),
            duration: 5,
            max_group_size: 25,
            difficulty: Difficulty::Easy,
            ratings_average: 4.7,
            ratings_quantity: 37,
            price: 397.5,
            price_discount: None,
            summary: "Breathtaking hike through the Canadian Banff National Park".to_string(),
            description: None,
            image_cover: "tour-1-cover.jpg".to_string(),
            images: Vec::new(),
            start_dates: Vec::new(),
            secret_tour: false,
            start_location: None,
            locations: Vec::new(),
            guides: Vec::new(),
            created_at: Utc::now(),
            duration_weeks: 5.0 / 7.0,
        }
    }

    fn user() -> User {
        User {
            id: "user-1".to_string(),
            name: "Laura Wilson".to_string(),
            email: "laura@example.com".to_string(),
            photo: DEFAULT_PHOTO.to_string(),
            role: Role::User,
            password_hash: String::new(),
            password_changed_at: None,
            password_reset_token: None,
            password_reset_expires: None,
            active: true,
            created_at: Utc::now(),
        }
    }

    fn payments(key: Option<&str>) -> Payments {
        let mut config = Config::for_testing(std::path::Path::new("."));
        config.public_url = "http://127.0.0.1:3000".to_string();
        config.stripe_secret_key = key.map(str::to_string);
        Payments::new(&config).unwrap()
    }

    #[test]
    fn test_success_url_carries_booking() {
        assert_eq!(
            payments(None).success_url(&tour(), &user()),
            "http://127.0.0.1:3000/?tour=tour-1&user=user-1&price=397.5"
        );
    }

    #[test]
    fn test_price_is_sent_in_cents() {
        let params = payments(Some("sk_test")).session_params(&tour(), &user());
        let amount = params
            .iter()
            .find(|(k, _)| k == "line_items[0][price_data][unit_amount]")
            .map(|(_, v)| v.as_str());
        assert_eq!(amount, Some("39750"));
        assert!(params.contains(&("customer_email".to_string(), "laura@example.com".to_string())));
    }

    #[tokio::test]
    async fn test_missing_key_is_unavailable() {
        let err = payments(None)
            .create_checkout_session(&tour(), &user())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::SERVICE_UNAVAILABLE);
    }
}
