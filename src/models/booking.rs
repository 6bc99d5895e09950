//! Booking model.

use std::collections::HashMap;
use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use validator::Validate;

use super::{non_blank, validate_id, Tour, User, Violations};
use crate::db::{
    parse_timestamp, Creatable, Detail, Field, FieldKind, Record, Repository, Resource,
    SqlValue, Updatable,
};
use crate::errors::AppError;

/// A paid reservation of a tour by a user.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: String,
    pub tour: String,
    pub user: String,
    pub price: f64,
    pub paid: bool,
    pub created_at: DateTime<Utc>,
}

/// Request body for creating or updating a booking.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct BookingInput {
    #[serde(default)]
    #[validate(
        required(message = "Booking must belong to a Tour!"),
        custom(function = "validate_id", message = "Invalid tour id")
    )]
    pub tour: Option<String>,
    #[serde(default)]
    #[validate(
        required(message = "Booking must belong to a User!"),
        custom(function = "validate_id", message = "Invalid user id")
    )]
    pub user: Option<String>,
    #[serde(default)]
    #[validate(
        required(message = "Booking must have a price."),
        range(min = 0.0, message = "Booking price can not be negative")
    )]
    pub price: Option<f64>,
    #[serde(default)]
    pub paid: Option<bool>,
}

impl BookingInput {
    fn into_record(mut self) -> Result<Record, AppError> {
        self.tour = non_blank(self.tour);
        self.user = non_blank(self.user);

        let mut v = Violations::default();
        v.validate(&self);
        v.finish()?;

        let (Some(tour), Some(user), Some(price)) = (self.tour, self.user, self.price) else {
            return Err(AppError::Internal("Booking validation incomplete".to_string()));
        };

        Ok(vec![
            ("tour_id", tour.into()),
            ("user_id", user.into()),
            ("price", price.into()),
            ("paid", self.paid.unwrap_or(true).into()),
        ])
    }
}

/// The referenced tour and user must both exist.
async fn check_booking_references(repo: &Repository, record: &Record) -> Result<(), AppError> {
    for (column, value) in record {
        let SqlValue::Text(id) = value else {
            continue;
        };
        match *column {
            "tour_id" if repo.find_by_id::<Tour>(id).await?.is_none() => {
                return Err(AppError::NotFound("No tour found with that ID".to_string()));
            }
            "user_id" if repo.find_by_id::<User>(id).await?.is_none() => {
                return Err(AppError::NotFound("No user found with that ID".to_string()));
            }
            _ => {}
        }
    }
    Ok(())
}

impl Resource for Booking {
    const TABLE: &'static str = "bookings";
    const FIELDS: &'static [Field] = &[
        Field::new("tour", "tour_id", FieldKind::Text),
        Field::new("user", "user_id", FieldKind::Text),
        Field::new("price", "price", FieldKind::Number),
        Field::new("paid", "paid", FieldKind::Bool),
        Field::new("createdAt", "created_at", FieldKind::Date),
    ];

    fn id(&self) -> &str {
        &self.id
    }

    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let paid: i32 = row.try_get("paid")?;
        let created_at: String = row.try_get("created_at")?;
        Ok(Booking {
            id: row.try_get("id")?,
            tour: row.try_get("tour_id")?,
            user: row.try_get("user_id")?,
            price: row.try_get("price")?,
            paid: paid != 0,
            created_at: parse_timestamp(&created_at)?,
        })
    }

    fn hydrate<'a>(
        repo: &'a Repository,
        docs: Vec<Self>,
        _detail: Detail,
    ) -> impl Future<Output = Result<Vec<Value>, AppError>> + Send + 'a {
        hydrate_bookings(repo, docs)
    }

    fn before_write<'a>(
        repo: &'a Repository,
        record: &'a Record,
    ) -> impl Future<Output = Result<(), AppError>> + Send + 'a {
        check_booking_references(repo, record)
    }
}

/// Embed the booking user's summary and the tour name.
async fn hydrate_bookings(repo: &Repository, docs: Vec<Booking>) -> Result<Vec<Value>, AppError> {
    let mut users: HashMap<String, Value> = HashMap::new();
    let user_ids: Vec<String> = docs.iter().map(|b| b.user.clone()).collect();
    for user in repo.users_by_ids(&user_ids).await? {
        users.insert(user.id.clone(), serde_json::to_value(user.summary())?);
    }

    let mut tours: HashMap<String, Value> = HashMap::new();
    let mut hydrated = Vec::with_capacity(docs.len());
    for booking in &docs {
        if !tours.contains_key(&booking.tour) {
            let tour = repo
                .find_by_id::<Tour>(&booking.tour)
                .await?
                .map(|tour| json!({ "id": tour.id, "name": tour.name }))
                .unwrap_or(Value::Null);
            tours.insert(booking.tour.clone(), tour);
        }

        let mut value = serde_json::to_value(booking)?;
        value["user"] = users.get(&booking.user).cloned().unwrap_or(Value::Null);
        value["tour"] = tours.get(&booking.tour).cloned().unwrap_or(Value::Null);
        hydrated.push(value);
    }
    Ok(hydrated)
}

impl Creatable for Booking {
    type Create = BookingInput;

    fn insert_record(input: BookingInput) -> Result<Record, AppError> {
        input.into_record()
    }
}

impl Updatable for Booking {
    type Update = BookingInput;

    fn update_record(existing: &Booking, input: BookingInput) -> Result<Record, AppError> {
        BookingInput {
            tour: input.tour.or_else(|| Some(existing.tour.clone())),
            user: input.user.or_else(|| Some(existing.user.clone())),
            price: input.price.or(Some(existing.price)),
            paid: input.paid.or(Some(existing.paid)),
        }
        .into_record()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    #[test]
    fn test_booking_requires_references_and_price() {
        let err = Booking::insert_record(BookingInput::default()).unwrap_err();
        let message = err.message();
        assert!(message.contains("Booking must belong to a Tour!"));
        assert!(message.contains("Booking must belong to a User!"));
        assert!(message.contains("Booking must have a price."));
    }

    #[test]
    fn test_booking_rejects_malformed_ids_and_negative_price() {
        let message = Booking::insert_record(BookingInput {
            tour: Some("nope".to_string()),
            user: Some("nope".to_string()),
            price: Some(-1.0),
            paid: None,
        })
        .unwrap_err()
        .message();
        assert!(message.contains("Invalid tour id"));
        assert!(message.contains("Invalid user id"));
        assert!(message.contains("Booking price can not be negative"));
    }

    #[test]
    fn test_booking_is_paid_by_default() {
        let record = Booking::insert_record(BookingInput {
            tour: Some(id()),
            user: Some(id()),
            price: Some(497.0),
            paid: None,
        })
        .unwrap();
        assert!(record.contains(&("paid", SqlValue::Integer(1))));
    }

    #[test]
    fn test_update_keeps_references() {
        let existing = Booking {
            id: id(),
            tour: id(),
            user: id(),
            price: 497.0,
            paid: true,
            created_at: Utc::now(),
        };
        let record = Booking::update_record(
            &existing,
            BookingInput {
                paid: Some(false),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(record.contains(&("tour_id", SqlValue::Text(existing.tour.clone()))));
        assert!(record.contains(&("paid", SqlValue::Integer(0))));
    }
}
