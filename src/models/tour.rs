//! Tour model.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use validator::{Validate, ValidationError};

use super::{non_blank, round_one_decimal, rule_failed, validate_id, Review, Violations};
use crate::db::{
    parse_json, parse_timestamp, Creatable, Detail, Field, FieldKind, Record, Repository,
    Resource, SqlValue, Updatable,
};
use crate::errors::AppError;

pub const DEFAULT_RATINGS_AVERAGE: f64 = 4.5;

/// Tour difficulty level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Difficult,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Difficult => "difficult",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "easy" => Some(Difficulty::Easy),
            "medium" => Some(Difficulty::Medium),
            "difficult" => Some(Difficulty::Difficult),
            _ => None,
        }
    }
}

/// GeoJSON point with optional labels. Coordinates are `[lng, lat]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    #[serde(rename = "type", default = "point_type")]
    pub kind: String,
    #[serde(default)]
    pub coordinates: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<i64>,
}

fn point_type() -> String {
    "Point".to_string()
}

impl GeoPoint {
    /// `(lat, lng)` when the point carries both coordinates.
    pub fn lat_lng(&self) -> Option<(f64, f64)> {
        match self.coordinates.as_slice() {
            [lng, lat, ..] => Some((*lat, *lng)),
            _ => None,
        }
    }
}

/// A bookable tour.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tour {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub duration: i64,
    pub max_group_size: i64,
    pub difficulty: Difficulty,
    pub ratings_average: f64,
    pub ratings_quantity: i64,
    pub price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_discount: Option<f64>,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub image_cover: String,
    pub images: Vec<String>,
    pub start_dates: Vec<DateTime<Utc>>,
    pub secret_tour: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_location: Option<GeoPoint>,
    pub locations: Vec<GeoPoint>,
    /// Guide user ids; replaced by guide summaries when hydrated
    pub guides: Vec<String>,
    #[serde(skip_serializing)]
    pub created_at: DateTime<Utc>,
    pub duration_weeks: f64,
}

/// Request body for creating or updating a tour.
///
/// Every field is optional on the wire so that missing required fields are
/// reported as validation errors rather than parse errors.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TourInput {
    #[serde(default)]
    #[validate(
        required(message = "A tour must have a name"),
        length(
            min = 10,
            max = 40,
            message = "A tour name must have between 10 and 40 characters"
        )
    )]
    pub name: Option<String>,
    #[serde(default)]
    #[validate(required(message = "A tour must have a duration"))]
    pub duration: Option<i64>,
    #[serde(default)]
    #[validate(required(message = "A tour must have a group size"))]
    pub max_group_size: Option<i64>,
    #[serde(default)]
    #[validate(
        required(message = "A tour must have a difficulty"),
        custom(
            function = "validate_difficulty",
            message = "Difficulty is either: easy, medium, difficult"
        )
    )]
    pub difficulty: Option<String>,
    #[serde(default)]
    #[validate(range(min = 1.0, max = 5.0, message = "Rating must be between 1.0 and 5.0"))]
    pub ratings_average: Option<f64>,
    #[serde(default)]
    pub ratings_quantity: Option<i64>,
    #[serde(default)]
    #[validate(required(message = "A tour must have a price"))]
    pub price: Option<f64>,
    #[serde(default)]
    pub price_discount: Option<f64>,
    #[serde(default)]
    #[validate(required(message = "A tour must have a description"))]
    pub summary: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    #[validate(required(message = "A tour must have a cover image"))]
    pub image_cover: Option<String>,
    #[serde(default)]
    pub images: Option<Vec<String>>,
    #[serde(default)]
    pub start_dates: Option<Vec<DateTime<Utc>>>,
    #[serde(default)]
    pub secret_tour: Option<bool>,
    #[serde(default)]
    pub start_location: Option<GeoPoint>,
    #[serde(default)]
    pub locations: Option<Vec<GeoPoint>>,
    #[serde(default)]
    #[validate(custom(function = "validate_guides", message = "Guides must be valid user ids"))]
    pub guides: Option<Vec<String>>,
}

fn validate_difficulty(value: &str) -> Result<(), ValidationError> {
    match Difficulty::from_str(value) {
        Some(_) => Ok(()),
        None => Err(rule_failed("difficulty")),
    }
}

fn validate_guides(guides: &[String]) -> Result<(), ValidationError> {
    guides.iter().try_for_each(|id| validate_id(id))
}

impl TourInput {
    /// Fill every absent field from the stored tour.
    pub fn merged(self, existing: &Tour) -> Self {
        Self {
            name: self.name.or_else(|| Some(existing.name.clone())),
            duration: self.duration.or(Some(existing.duration)),
            max_group_size: self.max_group_size.or(Some(existing.max_group_size)),
            difficulty: self
                .difficulty
                .or_else(|| Some(existing.difficulty.as_str().to_string())),
            ratings_average: self.ratings_average.or(Some(existing.ratings_average)),
            ratings_quantity: self.ratings_quantity.or(Some(existing.ratings_quantity)),
            price: self.price.or(Some(existing.price)),
            price_discount: self.price_discount.or(existing.price_discount),
            summary: self.summary.or_else(|| Some(existing.summary.clone())),
            description: self.description.or_else(|| existing.description.clone()),
            image_cover: self
                .image_cover
                .or_else(|| Some(existing.image_cover.clone())),
            images: self.images.or_else(|| Some(existing.images.clone())),
            start_dates: self
                .start_dates
                .or_else(|| Some(existing.start_dates.clone())),
            secret_tour: self.secret_tour.or(Some(existing.secret_tour)),
            start_location: self
                .start_location
                .or_else(|| existing.start_location.clone()),
            locations: self.locations.or_else(|| Some(existing.locations.clone())),
            guides: self.guides.or_else(|| Some(existing.guides.clone())),
        }
    }

    /// Validate the complete document and produce its columns.
    pub fn into_record(mut self) -> Result<Record, AppError> {
        self.name = non_blank(self.name);
        self.difficulty = non_blank(self.difficulty);
        self.summary = non_blank(self.summary);
        self.image_cover = non_blank(self.image_cover);

        let mut v = Violations::default();
        v.validate(&self);
        if let (Some(discount), Some(price)) = (self.price_discount, self.price) {
            v.check(
                discount < price,
                format!(
                    "Discount price ({}) should be below regular price",
                    discount
                ),
            );
        }
        v.finish()?;

        // All required values are present once validation passed.
        let (
            Some(name),
            Some(duration),
            Some(max_group_size),
            Some(difficulty),
            Some(price),
            Some(summary),
            Some(image_cover),
        ) = (
            self.name,
            self.duration,
            self.max_group_size,
            self.difficulty.as_deref().and_then(Difficulty::from_str),
            self.price,
            self.summary,
            self.image_cover,
        )
        else {
            return Err(AppError::Internal("Tour validation incomplete".to_string()));
        };
        let ratings_average = self.ratings_average.unwrap_or(DEFAULT_RATINGS_AVERAGE);
        let guides = self.guides.unwrap_or_default();

        Ok(vec![
            ("slug", slugify(&name).into()),
            ("name", name.into()),
            ("duration", duration.into()),
            ("max_group_size", max_group_size.into()),
            ("difficulty", difficulty.as_str().into()),
            ("ratings_average", round_one_decimal(ratings_average).into()),
            ("ratings_quantity", self.ratings_quantity.unwrap_or(0).into()),
            ("price", price.into()),
            ("price_discount", self.price_discount.into()),
            ("summary", summary.into()),
            ("description", non_blank(self.description).into()),
            ("image_cover", image_cover.into()),
            ("images", SqlValue::json(&self.images.unwrap_or_default())?),
            (
                "start_dates",
                SqlValue::json(&self.start_dates.unwrap_or_default())?,
            ),
            ("secret_tour", self.secret_tour.unwrap_or(false).into()),
            (
                "start_location",
                match &self.start_location {
                    Some(point) => SqlValue::json(point)?,
                    None => SqlValue::Null,
                },
            ),
            (
                "locations",
                SqlValue::json(&self.locations.unwrap_or_default())?,
            ),
            ("guides", SqlValue::json(&guides)?),
        ])
    }
}

/// URL slug: lowercase alphanumerics joined by single dashes.
pub fn slugify(name: &str) -> String {
    name.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Public fields of a guide embedded in a tour.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuideSummary {
    pub id: String,
    pub name: String,
    pub email: String,
    pub photo: String,
    pub role: super::Role,
}

impl Resource for Tour {
    const TABLE: &'static str = "tours";
    const FIELDS: &'static [Field] = &[
        Field::new("name", "name", FieldKind::Text),
        Field::new("slug", "slug", FieldKind::Text),
        Field::new("duration", "duration", FieldKind::Number),
        Field::new("maxGroupSize", "max_group_size", FieldKind::Number),
        Field::new("difficulty", "difficulty", FieldKind::Text),
        Field::new("ratingsAverage", "ratings_average", FieldKind::Number),
        Field::new("ratingsQuantity", "ratings_quantity", FieldKind::Number),
        Field::new("price", "price", FieldKind::Number),
        Field::new("priceDiscount", "price_discount", FieldKind::Number),
        Field::new("secretTour", "secret_tour", FieldKind::Bool),
    ];
    const LIST_SCOPE: Option<&'static str> = Some("secret_tour = 0");

    fn id(&self) -> &str {
        &self.id
    }

    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let difficulty: String = row.try_get("difficulty")?;
        let start_location: Option<String> = row.try_get("start_location")?;
        let created_at: String = row.try_get("created_at")?;
        let duration: i64 = row.try_get("duration")?;
        let secret_tour: i32 = row.try_get("secret_tour")?;

        Ok(Tour {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            slug: row.try_get("slug")?,
            duration,
            max_group_size: row.try_get("max_group_size")?,
            difficulty: Difficulty::from_str(&difficulty).unwrap_or(Difficulty::Medium),
            ratings_average: row.try_get("ratings_average")?,
            ratings_quantity: row.try_get("ratings_quantity")?,
            price: row.try_get("price")?,
            price_discount: row.try_get("price_discount")?,
            summary: row.try_get("summary")?,
            description: row.try_get("description")?,
            image_cover: row.try_get("image_cover")?,
            images: parse_json(row.try_get("images")?)?,
            start_dates: parse_json(row.try_get("start_dates")?)?,
            secret_tour: secret_tour != 0,
            start_location: start_location
                .as_deref()
                .map(parse_json::<GeoPoint>)
                .transpose()?,
            locations: parse_json(row.try_get("locations")?)?,
            guides: parse_json(row.try_get("guides")?)?,
            created_at: parse_timestamp(&created_at)?,
            duration_weeks: duration as f64 / 7.0,
        })
    }

    fn hydrate<'a>(
        repo: &'a Repository,
        docs: Vec<Self>,
        detail: Detail,
    ) -> impl Future<Output = Result<Vec<Value>, AppError>> + Send + 'a {
        hydrate_tours(repo, docs, detail)
    }
}

/// Swap guide ids for guide summaries; single tours also get their reviews.
async fn hydrate_tours(
    repo: &Repository,
    docs: Vec<Tour>,
    detail: Detail,
) -> Result<Vec<Value>, AppError> {
    let mut hydrated = Vec::with_capacity(docs.len());
    for tour in docs {
        let guides: Vec<GuideSummary> = repo
            .users_by_ids(&tour.guides)
            .await?
            .into_iter()
            .map(|user| user.guide_summary())
            .collect();

        let mut value = serde_json::to_value(&tour)?;
        value["guides"] = serde_json::to_value(guides)?;

        if detail == Detail::Single {
            let reviews = repo.reviews_for_tour(&tour.id).await?;
            value["reviews"] = Value::Array(Review::hydrate(repo, reviews, Detail::List).await?);
        }
        hydrated.push(value);
    }
    Ok(hydrated)
}

impl Creatable for Tour {
    type Create = TourInput;

    fn insert_record(input: TourInput) -> Result<Record, AppError> {
        input.into_record()
    }
}

impl Updatable for Tour {
    type Update = TourInput;

    fn update_record(existing: &Tour, input: TourInput) -> Result<Record, AppError> {
        input.merged(existing).into_record()
    }
}

/// Aggregate figures per difficulty level.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TourStats {
    pub difficulty: String,
    pub num_tours: i64,
    pub num_ratings: i64,
    pub avg_rating: f64,
    pub avg_price: f64,
    pub min_price: f64,
    pub max_price: f64,
}

/// Tour starts within one calendar month.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyPlan {
    pub month: i64,
    pub num_tour_starts: i64,
    pub tours: Vec<String>,
}

/// Distance unit for geospatial queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceUnit {
    Miles,
    Kilometers,
}

impl DistanceUnit {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "mi" => Some(DistanceUnit::Miles),
            "km" => Some(DistanceUnit::Kilometers),
            _ => None,
        }
    }

    pub fn earth_radius(&self) -> f64 {
        match self {
            DistanceUnit::Miles => 3963.2,
            DistanceUnit::Kilometers => 6378.1,
        }
    }
}

/// Parse `"lat,lng"`.
pub fn parse_lat_lng(raw: &str) -> Option<(f64, f64)> {
    let (lat, lng) = raw.split_once(',')?;
    let lat: f64 = lat.trim().parse().ok()?;
    let lng: f64 = lng.trim().parse().ok()?;
    ((-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng)).then_some((lat, lng))
}

/// Great-circle distance in radians between two `(lat, lng)` points.
pub fn angular_distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lat1, lng1) = (a.0.to_radians(), a.1.to_radians());
    let (lat2, lng2) = (b.0.to_radians(), b.1.to_radians());
    let h = ((lat2 - lat1) / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * ((lng2 - lng1) / 2.0).sin().powi(2);
    2.0 * h.sqrt().min(1.0).asin()
}
