//! Database module for SQLite persistence.
//!
//! Documents are stored one row per entity; nested lists and GeoJSON points
//! are kept as JSON text columns.

mod query;
mod repository;
mod resource;

pub use query::*;
pub use repository::*;
pub use resource::*;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Initialize the database connection pool and run migrations.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool, sqlx::Error> {
    // Ensure the parent directory exists
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }

    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .busy_timeout(std::time::Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    // Run embedded migrations
    run_migrations(&pool).await?;

    Ok(pool)
}

/// Run database migrations.
async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            photo TEXT NOT NULL DEFAULT 'default.jpg',
            role TEXT NOT NULL DEFAULT 'user',
            password_hash TEXT NOT NULL,
            password_changed_at TEXT,
            password_reset_token TEXT,
            password_reset_expires TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tours (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            slug TEXT NOT NULL,
            duration INTEGER NOT NULL,
            max_group_size INTEGER NOT NULL,
            difficulty TEXT NOT NULL,
            ratings_average REAL NOT NULL DEFAULT 4.5,
            ratings_quantity INTEGER NOT NULL DEFAULT 0,
            price REAL NOT NULL,
            price_discount REAL,
            summary TEXT NOT NULL,
            description TEXT,
            image_cover TEXT NOT NULL,
            images TEXT NOT NULL DEFAULT '[]',
            start_dates TEXT NOT NULL DEFAULT '[]',
            secret_tour INTEGER NOT NULL DEFAULT 0,
            start_location TEXT,
            locations TEXT NOT NULL DEFAULT '[]',
            guides TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reviews (
            id TEXT PRIMARY KEY,
            review TEXT NOT NULL,
            rating REAL NOT NULL,
            tour_id TEXT NOT NULL REFERENCES tours(id) ON DELETE CASCADE,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            created_at TEXT NOT NULL,
            UNIQUE (tour_id, user_id)
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bookings (
            id TEXT PRIMARY KEY,
            tour_id TEXT NOT NULL REFERENCES tours(id) ON DELETE CASCADE,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            price REAL NOT NULL,
            paid INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes for common queries
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_tours_price_rating ON tours(price, ratings_average DESC);
        CREATE INDEX IF NOT EXISTS idx_tours_slug ON tours(slug);
        CREATE INDEX IF NOT EXISTS idx_reviews_tour ON reviews(tour_id);
        CREATE INDEX IF NOT EXISTS idx_bookings_user ON bookings(user_id);
        CREATE INDEX IF NOT EXISTS idx_users_reset_token ON users(password_reset_token);
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
