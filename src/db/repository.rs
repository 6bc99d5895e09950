//! Database repository.
//!
//! Generic document operations work for any [`Resource`]; the remaining
//! methods cover queries that only make sense for one entity.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use super::{parse_json, timestamp, QueryFeatures, Record, Resource};
use crate::errors::AppError;
use crate::models::{
    angular_distance, round_one_decimal, Booking, MonthlyPlan, Review, Tour, TourStats, User,
    DEFAULT_RATINGS_AVERAGE,
};

/// Database repository for all data operations.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ==================== GENERIC DOCUMENT OPERATIONS ====================

    /// List documents matching the query features.
    pub async fn find_many<R: Resource>(
        &self,
        features: &QueryFeatures,
    ) -> Result<Vec<R>, AppError> {
        let (where_sql, values) = features.where_clause(&[R::SCOPE, R::LIST_SCOPE]);
        let sql = format!(
            "SELECT * FROM {}{} ORDER BY {} LIMIT ? OFFSET ?",
            R::TABLE,
            where_sql,
            features.order_clause()
        );

        let mut query = sqlx::query(&sql);
        for value in values {
            query = value.bind(query);
        }
        let rows = query
            .bind(features.limit as i64)
            .bind(features.offset())
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(R::from_row).collect::<Result<_, _>>()?)
    }

    /// Get a document by ID.
    pub async fn find_by_id<R: Resource>(&self, id: &str) -> Result<Option<R>, AppError> {
        let sql = format!(
            "SELECT * FROM {} WHERE id = ?{}",
            R::TABLE,
            scope_filter(R::SCOPE)
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(R::from_row).transpose()?)
    }

    /// Insert a validated record and return the stored document.
    pub async fn insert<R: Resource>(&self, record: Record) -> Result<R, AppError> {
        let id = uuid::Uuid::new_v4().to_string();
        let created_at = timestamp(Utc::now());

        let mut columns = vec!["id", "created_at"];
        columns.extend(record.iter().map(|(column, _)| *column));
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            R::TABLE,
            columns.join(", "),
            vec!["?"; columns.len()].join(", ")
        );

        let mut query = sqlx::query(&sql).bind(&id).bind(&created_at);
        for (_, value) in record {
            query = value.bind(query);
        }
        query.execute(&self.pool).await?;

        self.find_by_id::<R>(&id).await?.ok_or_else(|| {
            AppError::Internal(format!("{} {} vanished after insert", R::TABLE, id))
        })
    }

    /// Apply changed columns. Returns `None` when no document matched.
    pub async fn update<R: Resource>(
        &self,
        id: &str,
        record: Record,
    ) -> Result<Option<R>, AppError> {
        if record.is_empty() {
            return self.find_by_id::<R>(id).await;
        }

        let assignments = record
            .iter()
            .map(|(column, _)| format!("{} = ?", column))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {} WHERE id = ?{}",
            R::TABLE,
            assignments,
            scope_filter(R::SCOPE)
        );

        let mut query = sqlx::query(&sql);
        for (_, value) in record {
            query = value.bind(query);
        }
        let result = query.bind(id).execute(&self.pool).await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.find_by_id::<R>(id).await
    }

    /// Delete a document, returning what was removed.
    pub async fn delete<R: Resource>(&self, id: &str) -> Result<Option<R>, AppError> {
        let Some(existing) = self.find_by_id::<R>(id).await? else {
            return Ok(None);
        };

        let sql = format!(
            "DELETE FROM {} WHERE id = ?{}",
            R::TABLE,
            scope_filter(R::SCOPE)
        );
        let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;

        Ok((result.rows_affected() > 0).then_some(existing))
    }

    // ==================== USER OPERATIONS ====================

    /// Active users with the given ids, in the order the ids were given.
    pub async fn users_by_ids(&self, ids: &[String]) -> Result<Vec<User>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT * FROM users WHERE active = 1 AND id IN ({})",
            vec!["?"; ids.len()].join(", ")
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut by_id: HashMap<String, User> = rows
            .iter()
            .map(User::from_row)
            .map(|user| user.map(|u| (u.id.clone(), u)))
            .collect::<Result<_, _>>()?;

        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query("SELECT * FROM users WHERE email = ? AND active = 1")
            .bind(email.trim().to_lowercase())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(User::from_row).transpose()?)
    }

    /// Active users holding a reset token that has not expired yet.
    pub async fn users_with_pending_reset(&self, now: DateTime<Utc>) -> Result<Vec<User>, AppError> {
        let rows = sqlx::query(
            "SELECT * FROM users WHERE active = 1 AND password_reset_token IS NOT NULL AND password_reset_expires > ?",
        )
        .bind(timestamp(now))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(User::from_row).collect::<Result<_, _>>()?)
    }

    /// Store a hashed reset token with its expiry, or clear it with `None`.
    pub async fn set_reset_token(
        &self,
        user_id: &str,
        token: Option<(&str, DateTime<Utc>)>,
    ) -> Result<(), AppError> {
        let (hash, expires) = match token {
            Some((hash, expires)) => (Some(hash.to_string()), Some(timestamp(expires))),
            None => (None, None),
        };

        sqlx::query(
            "UPDATE users SET password_reset_token = ?, password_reset_expires = ? WHERE id = ?",
        )
        .bind(hash)
        .bind(expires)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Replace the password hash and drop any pending reset token.
    pub async fn set_password(
        &self,
        user_id: &str,
        password_hash: &str,
        changed_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE users SET password_hash = ?, password_changed_at = ?, password_reset_token = NULL, password_reset_expires = NULL WHERE id = ?",
        )
        .bind(password_hash)
        .bind(timestamp(changed_at))
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Soft delete: the account disappears from every query.
    pub async fn deactivate_user(&self, user_id: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET active = 0 WHERE id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ==================== REVIEW OPERATIONS ====================

    pub async fn reviews_for_tour(&self, tour_id: &str) -> Result<Vec<Review>, AppError> {
        let rows =
            sqlx::query("SELECT * FROM reviews WHERE tour_id = ? ORDER BY created_at DESC, rowid DESC")
                .bind(tour_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.iter().map(Review::from_row).collect::<Result<_, _>>()?)
    }

    /// Ids of the tours a user has reviewed.
    pub async fn tours_reviewed_by(&self, user_id: &str) -> Result<Vec<String>, AppError> {
        let rows = sqlx::query("SELECT DISTINCT tour_id FROM reviews WHERE user_id = ?")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(|row| row.get("tour_id")).collect())
    }

    /// Recompute a tour's rating count and average from its reviews.
    pub async fn recompute_tour_ratings(&self, tour_id: &str) -> Result<(), AppError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS quantity, AVG(rating) AS average FROM reviews WHERE tour_id = ?",
        )
        .bind(tour_id)
        .fetch_one(&self.pool)
        .await?;

        let quantity: i64 = row.get("quantity");
        let average: Option<f64> = row.get("average");
        let (quantity, average) = match average {
            Some(average) if quantity > 0 => (quantity, round_one_decimal(average)),
            _ => (0, DEFAULT_RATINGS_AVERAGE),
        };

        sqlx::query("UPDATE tours SET ratings_quantity = ?, ratings_average = ? WHERE id = ?")
            .bind(quantity)
            .bind(average)
            .bind(tour_id)
            .execute(&self.pool)
            .await?;

        tracing::debug!(
            "Tour {} now rated {} over {} reviews",
            tour_id,
            average,
            quantity
        );
        Ok(())
    }

    // ==================== TOUR OPERATIONS ====================

    pub async fn find_tour_by_slug(&self, slug: &str) -> Result<Option<Tour>, AppError> {
        let row = sqlx::query("SELECT * FROM tours WHERE slug = ? AND secret_tour = 0 LIMIT 1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(Tour::from_row).transpose()?)
    }

    pub async fn tours_by_ids(&self, ids: &[String]) -> Result<Vec<Tour>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT * FROM tours WHERE id IN ({}) ORDER BY created_at DESC",
            vec!["?"; ids.len()].join(", ")
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;

        Ok(rows.iter().map(Tour::from_row).collect::<Result<_, _>>()?)
    }

    /// Statistics of well-rated tours per difficulty, cheapest first.
    pub async fn tour_stats(&self) -> Result<Vec<TourStats>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT UPPER(difficulty) AS difficulty,
                   COUNT(*) AS num_tours,
                   SUM(ratings_quantity) AS num_ratings,
                   AVG(ratings_average) AS avg_rating,
                   AVG(price) AS avg_price,
                   MIN(price) AS min_price,
                   MAX(price) AS max_price
            FROM tours
            WHERE ratings_average >= 4.5 AND secret_tour = 0
            GROUP BY UPPER(difficulty)
            ORDER BY avg_price ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| TourStats {
                difficulty: row.get("difficulty"),
                num_tours: row.get("num_tours"),
                num_ratings: row.get("num_ratings"),
                avg_rating: row.get("avg_rating"),
                avg_price: row.get("avg_price"),
                min_price: row.get("min_price"),
                max_price: row.get("max_price"),
            })
            .collect())
    }

    /// Tour starts within `year` grouped by month, busiest month first.
    pub async fn monthly_plan(&self, year: i32) -> Result<Vec<MonthlyPlan>, AppError> {
        let next = year
            .checked_add(1)
            .filter(|next| *next <= 9999 && year >= 1)
            .ok_or_else(|| AppError::BadRequest(format!("Invalid year: {}.", year)))?;
        let rows = sqlx::query(
            r#"
            SELECT CAST(substr(d.value, 6, 2) AS INTEGER) AS month,
                   COUNT(*) AS num_tour_starts,
                   json_group_array(t.name) AS tours
            FROM tours t, json_each(t.start_dates) d
            WHERE d.value >= ? AND d.value < ? AND t.secret_tour = 0
            GROUP BY month
            ORDER BY num_tour_starts DESC, month ASC
            LIMIT 12
            "#,
        )
        .bind(format!("{:04}-01-01", year))
        .bind(format!("{:04}-01-01", next))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let tours: String = row.get("tours");
                Ok(MonthlyPlan {
                    month: row.get("month"),
                    num_tour_starts: row.get("num_tour_starts"),
                    tours: parse_json(&tours)?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(AppError::from)
    }

    /// Public tours with a start location, paired with their angular
    /// distance from `center` and sorted nearest first.
    pub async fn tours_by_distance(
        &self,
        center: (f64, f64),
    ) -> Result<Vec<(Tour, f64)>, AppError> {
        let rows = sqlx::query(
            "SELECT * FROM tours WHERE start_location IS NOT NULL AND secret_tour = 0",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut tours: Vec<(Tour, f64)> = rows
            .iter()
            .map(Tour::from_row)
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter_map(|tour| {
                let point = tour.start_location.as_ref()?.lat_lng()?;
                let distance = angular_distance(center, point);
                Some((tour, distance))
            })
            .collect();

        tours.sort_by(|a, b| a.1.total_cmp(&b.1));
        Ok(tours)
    }

    // ==================== BOOKING OPERATIONS ====================

    pub async fn bookings_for_user(&self, user_id: &str) -> Result<Vec<Booking>, AppError> {
        let rows =
            sqlx::query("SELECT * FROM bookings WHERE user_id = ? ORDER BY created_at DESC")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.iter().map(Booking::from_row).collect::<Result<_, _>>()?)
    }
}

fn scope_filter(scope: Option<&str>) -> String {
    scope.map(|s| format!(" AND {}", s)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_database, Condition, Creatable, SqlValue};
    use crate::models::{ReviewInput, TourInput};
    use tempfile::TempDir;

    async fn repo() -> (Repository, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let pool = init_database(&temp_dir.path().join("test.sqlite"))
            .await
            .expect("Failed to init DB");
        (Repository::new(pool), temp_dir)
    }

    fn tour_input(name: &str, price: f64) -> TourInput {
        TourInput {
            name: Some(name.to_string()),
            duration: Some(7),
            max_group_size: Some(15),
            difficulty: Some("medium".to_string()),
            price: Some(price),
            summary: Some("Exploring the jaw-dropping US east coast".to_string()),
            image_cover: Some("tour-2-cover.jpg".to_string()),
            ..TourInput::default()
        }
    }

    async fn insert_user(repo: &Repository, email: &str) -> User {
        repo.insert::<User>(vec![
            ("name", "Test User".into()),
            ("email", email.into()),
            ("password_hash", "not-a-real-hash".into()),
        ])
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let (repo, _dir) = repo().await;
        let record = Tour::insert_record(tour_input("The Sea Explorer", 497.0)).unwrap();
        let tour = repo.insert::<Tour>(record).await.unwrap();

        assert_eq!(tour.slug, "the-sea-explorer");
        assert_eq!(tour.duration_weeks, 1.0);

        let found = repo.find_by_id::<Tour>(&tour.id).await.unwrap().unwrap();
        assert_eq!(found.name, "The Sea Explorer");
        assert!(repo
            .find_by_id::<Tour>(&uuid::Uuid::new_v4().to_string())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_duplicate_name_is_reported() {
        let (repo, _dir) = repo().await;
        let record = Tour::insert_record(tour_input("The Sea Explorer", 497.0)).unwrap();
        repo.insert::<Tour>(record.clone()).await.unwrap();

        let err = repo.insert::<Tour>(record).await.unwrap_err();
        assert_eq!(
            err.message(),
            "Duplicate field value: name. Please use another value!"
        );
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let (repo, _dir) = repo().await;
        let record = Tour::insert_record(tour_input("The Sea Explorer", 497.0)).unwrap();
        let tour = repo.insert::<Tour>(record).await.unwrap();

        let updated = repo
            .update::<Tour>(&tour.id, vec![("price", SqlValue::Real(550.0))])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.price, 550.0);

        let deleted = repo.delete::<Tour>(&tour.id).await.unwrap();
        assert!(deleted.is_some());
        assert!(repo.delete::<Tour>(&tour.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_many_filters_and_sorts() {
        let (repo, _dir) = repo().await;
        for (name, price) in [
            ("The Forest Hiker", 397.0),
            ("The Sea Explorer", 497.0),
            ("The Snow Adventurer", 997.0),
        ] {
            let record = Tour::insert_record(tour_input(name, price)).unwrap();
            repo.insert::<Tour>(record).await.unwrap();
        }

        let params = vec![
            ("price[lt]".to_string(), "900".to_string()),
            ("sort".to_string(), "-price".to_string()),
        ];
        let features = QueryFeatures::from_params(Tour::FIELDS, &params).unwrap();
        let tours = repo.find_many::<Tour>(&features).await.unwrap();
        let names: Vec<_> = tours.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["The Sea Explorer", "The Forest Hiker"]);
    }

    #[tokio::test]
    async fn test_inactive_users_are_invisible() {
        let (repo, _dir) = repo().await;
        let user = insert_user(&repo, "ghost@example.com").await;

        repo.deactivate_user(&user.id).await.unwrap();
        assert!(repo.find_by_id::<User>(&user.id).await.unwrap().is_none());
        assert!(repo
            .find_user_by_email("ghost@example.com")
            .await
            .unwrap()
            .is_none());
        assert!(repo.users_by_ids(&[user.id]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reset_token_expiry() {
        let (repo, _dir) = repo().await;
        let user = insert_user(&repo, "reset@example.com").await;
        let now = Utc::now();

        repo.set_reset_token(&user.id, Some(("hash", now + chrono::Duration::minutes(10))))
            .await
            .unwrap();
        assert_eq!(repo.users_with_pending_reset(now).await.unwrap().len(), 1);
        assert!(repo
            .users_with_pending_reset(now + chrono::Duration::minutes(11))
            .await
            .unwrap()
            .is_empty());

        repo.set_password(&user.id, "new-hash", now).await.unwrap();
        assert!(repo.users_with_pending_reset(now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rating_recompute_and_reset() {
        let (repo, _dir) = repo().await;
        let record = Tour::insert_record(tour_input("The Sea Explorer", 497.0)).unwrap();
        let tour = repo.insert::<Tour>(record).await.unwrap();

        let mut reviews = Vec::new();
        for (email, rating) in [("a@example.com", 4.0), ("b@example.com", 5.0), ("c@example.com", 5.0)] {
            let user = insert_user(&repo, email).await;
            let record = Review::insert_record(ReviewInput {
                review: Some("Great".to_string()),
                rating: Some(rating),
                tour: Some(tour.id.clone()),
                user: Some(user.id),
            })
            .unwrap();
            reviews.push(repo.insert::<Review>(record).await.unwrap());
        }
        repo.recompute_tour_ratings(&tour.id).await.unwrap();

        let rated = repo.find_by_id::<Tour>(&tour.id).await.unwrap().unwrap();
        assert_eq!(rated.ratings_quantity, 3);
        assert_eq!(rated.ratings_average, 4.7);

        for review in &reviews {
            repo.delete::<Review>(&review.id).await.unwrap();
        }
        repo.recompute_tour_ratings(&tour.id).await.unwrap();

        let reset = repo.find_by_id::<Tour>(&tour.id).await.unwrap().unwrap();
        assert_eq!(reset.ratings_quantity, 0);
        assert_eq!(reset.ratings_average, 4.5);
    }

    #[tokio::test]
    async fn test_nested_condition_limits_reviews() {
        let (repo, _dir) = repo().await;
        let first = repo
            .insert::<Tour>(Tour::insert_record(tour_input("The Sea Explorer", 497.0)).unwrap())
            .await
            .unwrap();
        let second = repo
            .insert::<Tour>(Tour::insert_record(tour_input("The Forest Hiker", 397.0)).unwrap())
            .await
            .unwrap();
        let user = insert_user(&repo, "reviewer@example.com").await;

        for tour in [&first, &second] {
            let record = Review::insert_record(ReviewInput {
                review: Some("Lovely".to_string()),
                rating: Some(4.0),
                tour: Some(tour.id.clone()),
                user: Some(user.id.clone()),
            })
            .unwrap();
            repo.insert::<Review>(record).await.unwrap();
        }

        let features = QueryFeatures::default().with_condition(Condition::eq("tour_id", first.id.as_str()));
        let reviews = repo.find_many::<Review>(&features).await.unwrap();
        assert_eq!(reviews.len(), 1);
        assert_eq!(reviews[0].tour, first.id);
    }

    #[tokio::test]
    async fn test_monthly_plan_groups_by_month() {
        let (repo, _dir) = repo().await;
        let dates = |raw: &[&str]| {
            raw.iter()
                .map(|d| DateTime::parse_from_rfc3339(d).unwrap().with_timezone(&Utc))
                .collect::<Vec<_>>()
        };

        let mut first = tour_input("The Sea Explorer", 497.0);
        first.start_dates = Some(dates(&["2021-06-19T09:00:00Z", "2021-07-20T09:00:00Z", "2022-06-01T09:00:00Z"]));
        let mut second = tour_input("The Forest Hiker", 397.0);
        second.start_dates = Some(dates(&["2021-06-05T09:00:00Z"]));

        for input in [first, second] {
            repo.insert::<Tour>(Tour::insert_record(input).unwrap()).await.unwrap();
        }

        let plan = repo.monthly_plan(2021).await.unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].month, 6);
        assert_eq!(plan[0].num_tour_starts, 2);
        assert_eq!(plan[0].tours.len(), 2);
        assert_eq!(plan[1].month, 7);
    }

    #[tokio::test]
    async fn test_monthly_plan_rejects_out_of_range_years() {
        let (repo, _dir) = repo().await;
        for year in [0, 9999, i32::MAX, -5] {
            let err = repo.monthly_plan(year).await.unwrap_err();
            assert_eq!(err.message(), format!("Invalid year: {}.", year));
        }
        assert!(repo.monthly_plan(9998).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tours_reviewed_by() {
        let (repo, _dir) = repo().await;
        let tour = repo
            .insert::<Tour>(Tour::insert_record(tour_input("The Sea Explorer", 497.0)).unwrap())
            .await
            .unwrap();
        let reviewer = insert_user(&repo, "reviewer@example.com").await;
        let bystander = insert_user(&repo, "bystander@example.com").await;

        let record = Review::insert_record(ReviewInput {
            review: Some("Lovely".to_string()),
            rating: Some(4.0),
            tour: Some(tour.id.clone()),
            user: Some(reviewer.id.clone()),
        })
        .unwrap();
        repo.insert::<Review>(record).await.unwrap();

        assert_eq!(repo.tours_reviewed_by(&reviewer.id).await.unwrap(), vec![tour.id]);
        assert!(repo.tours_reviewed_by(&bystander.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dangling_reference_is_a_bad_request() {
        let (repo, _dir) = repo().await;
        let user = insert_user(&repo, "buyer@example.com").await;

        let err = repo
            .insert::<Review>(vec![
                ("review", "Lovely".into()),
                ("rating", 4.0_f64.into()),
                ("tour_id", uuid::Uuid::new_v4().to_string().into()),
                ("user_id", user.id.into()),
            ])
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
        assert_eq!(err.message(), "A referenced document does not exist");
    }
}
