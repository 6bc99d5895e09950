//! Review model.

use std::collections::HashMap;
use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use validator::Validate;

use super::{non_blank, validate_id, Violations};
use crate::db::{
    parse_timestamp, Creatable, Detail, Field, FieldKind, Record, Repository, Resource,
    Updatable,
};
use crate::errors::AppError;

/// A user's rating of a tour.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: String,
    pub review: String,
    pub rating: f64,
    /// Tour id
    pub tour: String,
    /// Author id; replaced by the author summary when hydrated
    pub user: String,
    pub created_at: DateTime<Utc>,
}

/// Request body for creating a review.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct ReviewInput {
    #[serde(default)]
    #[validate(required(message = "Review can not be empty!"))]
    pub review: Option<String>,
    #[serde(default)]
    #[validate(
        required(message = "A review must have a rating"),
        range(min = 1.0, max = 5.0, message = "Rating must be between 1.0 and 5.0")
    )]
    pub rating: Option<f64>,
    #[serde(default)]
    #[validate(
        required(message = "Review must belong to a tour."),
        custom(function = "validate_id", message = "Invalid tour id")
    )]
    pub tour: Option<String>,
    #[serde(default)]
    #[validate(
        required(message = "Review must belong to a user"),
        custom(function = "validate_id", message = "Invalid user id")
    )]
    pub user: Option<String>,
}

/// Request body for editing a review; the tour and author are fixed.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct ReviewUpdate {
    #[serde(default)]
    #[validate(length(min = 1, message = "Review can not be empty!"))]
    pub review: Option<String>,
    #[serde(default)]
    #[validate(range(min = 1.0, max = 5.0, message = "Rating must be between 1.0 and 5.0"))]
    pub rating: Option<f64>,
}

impl Resource for Review {
    const TABLE: &'static str = "reviews";
    const FIELDS: &'static [Field] = &[
        Field::new("rating", "rating", FieldKind::Number),
        Field::new("tour", "tour_id", FieldKind::Text),
        Field::new("user", "user_id", FieldKind::Text),
        Field::new("createdAt", "created_at", FieldKind::Date),
    ];

    fn id(&self) -> &str {
        &self.id
    }

    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let created_at: String = row.try_get("created_at")?;
        Ok(Review {
            id: row.try_get("id")?,
            review: row.try_get("review")?,
            rating: row.try_get("rating")?,
            tour: row.try_get("tour_id")?,
            user: row.try_get("user_id")?,
            created_at: parse_timestamp(&created_at)?,
        })
    }

    fn hydrate<'a>(
        repo: &'a Repository,
        docs: Vec<Self>,
        _detail: Detail,
    ) -> impl Future<Output = Result<Vec<Value>, AppError>> + Send + 'a {
        hydrate_reviews(repo, docs)
    }

    fn after_write<'a>(
        repo: &'a Repository,
        doc: &'a Self,
    ) -> impl Future<Output = Result<(), AppError>> + Send + 'a {
        repo.recompute_tour_ratings(&doc.tour)
    }
}

/// Embed each author's summary in place of the user id.
async fn hydrate_reviews(repo: &Repository, docs: Vec<Review>) -> Result<Vec<Value>, AppError> {
    let user_ids: Vec<String> = docs.iter().map(|r| r.user.clone()).collect();
    let mut authors: HashMap<String, Value> = HashMap::new();
    for user in repo.users_by_ids(&user_ids).await? {
        authors.insert(user.id.clone(), serde_json::to_value(user.summary())?);
    }

    let mut hydrated = Vec::with_capacity(docs.len());
    for review in &docs {
        let mut value = serde_json::to_value(review)?;
        value["user"] = authors.get(&review.user).cloned().unwrap_or(Value::Null);
        hydrated.push(value);
    }
    Ok(hydrated)
}

impl Creatable for Review {
    type Create = ReviewInput;

    fn insert_record(mut input: ReviewInput) -> Result<Record, AppError> {
        input.review = non_blank(input.review);
        input.tour = non_blank(input.tour);
        input.user = non_blank(input.user);

        let mut v = Violations::default();
        v.validate(&input);
        v.finish()?;

        let (Some(review), Some(rating), Some(tour), Some(user)) =
            (input.review, input.rating, input.tour, input.user)
        else {
            return Err(AppError::Internal("Review validation incomplete".to_string()));
        };

        Ok(vec![
            ("review", review.into()),
            ("rating", rating.into()),
            ("tour_id", tour.into()),
            ("user_id", user.into()),
        ])
    }
}

impl Updatable for Review {
    type Update = ReviewUpdate;

    fn update_record(existing: &Review, mut input: ReviewUpdate) -> Result<Record, AppError> {
        input.review = input.review.map(|review| review.trim().to_string());

        let mut v = Violations::default();
        v.validate(&input);
        v.finish()?;

        Ok(vec![
            (
                "review",
                input.review.unwrap_or_else(|| existing.review.clone()).into(),
            ),
            ("rating", input.rating.unwrap_or(existing.rating).into()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqlValue;

    fn existing() -> Review {
        Review {
            id: uuid::Uuid::new_v4().to_string(),
            review: "Amazing tour".to_string(),
            rating: 5.0,
            tour: uuid::Uuid::new_v4().to_string(),
            user: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_review_requires_text_and_parents() {
        let err = Review::insert_record(ReviewInput {
            rating: Some(4.0),
            ..Default::default()
        })
        .unwrap_err();
        let message = err.message();
        assert!(message.contains("Review can not be empty!"));
        assert!(message.contains("Review must belong to a tour."));
        assert!(message.contains("Review must belong to a user"));
    }

    #[test]
    fn test_rating_bounds() {
        let input = ReviewInput {
            review: Some("Too good".to_string()),
            rating: Some(6.0),
            tour: Some(uuid::Uuid::new_v4().to_string()),
            user: Some(uuid::Uuid::new_v4().to_string()),
        };
        assert!(Review::insert_record(input)
            .unwrap_err()
            .message()
            .contains("Rating must be between 1.0 and 5.0"));
    }

    #[test]
    fn test_parent_ids_must_be_ids() {
        let message = Review::insert_record(ReviewInput {
            review: Some("Lovely".to_string()),
            rating: Some(4.0),
            tour: Some("the-forest-hiker".to_string()),
            user: Some(uuid::Uuid::new_v4().to_string()),
        })
        .unwrap_err()
        .message();
        assert!(message.contains("Invalid tour id"));
        assert!(!message.contains("Invalid user id"));
    }

    #[test]
    fn test_update_rejects_blank_review() {
        let err = Review::update_record(
            &existing(),
            ReviewUpdate {
                review: Some("  ".to_string()),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(err.message().contains("Review can not be empty!"));
    }

    #[test]
    fn test_update_merges_with_existing() {
        let record = Review::update_record(
            &existing(),
            ReviewUpdate {
                rating: Some(3.0),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(
            record,
            vec![
                ("review", SqlValue::Text("Amazing tour".to_string())),
                ("rating", SqlValue::Real(3.0)),
            ]
        );
    }
}
