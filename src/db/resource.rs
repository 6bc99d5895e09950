//! Per-entity persistence descriptors.
//!
//! Each stored entity implements [`Resource`], which lets the repository and
//! the CRUD handlers work over any of them without knowing their columns.

use std::future::Future;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::Sqlite;

use super::Repository;
use crate::errors::AppError;

pub type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Column values for an insert or update.
pub type Record = Vec<(&'static str, SqlValue)>;

/// How a query parameter is converted before it reaches the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Number,
    Text,
    Bool,
    Date,
}

/// A field clients may filter and sort on.
#[derive(Debug, Clone, Copy)]
pub struct Field {
    /// Name on the wire (camelCase)
    pub name: &'static str,
    pub column: &'static str,
    pub kind: FieldKind,
}

impl Field {
    pub const fn new(name: &'static str, column: &'static str, kind: FieldKind) -> Self {
        Self { name, column, kind }
    }
}

/// A value bound to a prepared statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Text(String),
    Real(f64),
    Integer(i64),
}

impl SqlValue {
    pub fn bind(self, query: SqliteQuery<'_>) -> SqliteQuery<'_> {
        match self {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Text(value) => query.bind(value),
            SqlValue::Real(value) => query.bind(value),
            SqlValue::Integer(value) => query.bind(value),
        }
    }

    /// Store a nested value as JSON text.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, AppError> {
        Ok(SqlValue::Text(serde_json::to_string(value)?))
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Real(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Integer(value as i64)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// How much of the related data to load when hydrating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detail {
    List,
    Single,
}

/// A stored entity the generic repository operations and handlers work with.
pub trait Resource: Serialize + Send + Sync + Unpin + Sized + 'static {
    const TABLE: &'static str;
    /// Fields clients may filter and sort on.
    const FIELDS: &'static [Field];
    /// Extra condition applied to listings only.
    const LIST_SCOPE: Option<&'static str> = None;
    /// Condition applied to every read, update and delete.
    const SCOPE: Option<&'static str> = None;

    fn id(&self) -> &str;

    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error>;

    /// Populate references and derived data for the response.
    fn hydrate<'a>(
        _repo: &'a Repository,
        docs: Vec<Self>,
        _detail: Detail,
    ) -> impl Future<Output = Result<Vec<Value>, AppError>> + Send + 'a {
        std::future::ready(
            docs.iter()
                .map(|doc| serde_json::to_value(doc).map_err(AppError::from))
                .collect::<Result<Vec<_>, _>>(),
        )
    }

    /// Runs before a validated record is inserted or written over a document.
    fn before_write<'a>(
        _repo: &'a Repository,
        _record: &'a Record,
    ) -> impl Future<Output = Result<(), AppError>> + Send + 'a {
        std::future::ready(Ok(()))
    }

    /// Tours whose ratings are derived from rows deleted along with this
    /// document. Collected before the delete, recomputed after it.
    fn rated_tours<'a>(
        _repo: &'a Repository,
        _id: &'a str,
    ) -> impl Future<Output = Result<Vec<String>, AppError>> + Send + 'a {
        std::future::ready(Ok(Vec::new()))
    }

    /// Runs after a document was created, updated or deleted.
    fn after_write<'a>(
        _repo: &'a Repository,
        _doc: &'a Self,
    ) -> impl Future<Output = Result<(), AppError>> + Send + 'a {
        std::future::ready(Ok(()))
    }
}

/// Resources that can be created through the generic handler.
pub trait Creatable: Resource {
    type Create: DeserializeOwned + Send + 'static;

    /// Validate the input and turn it into columns.
    fn insert_record(input: Self::Create) -> Result<Record, AppError>;
}

/// Resources that can be updated through the generic handler.
pub trait Updatable: Resource {
    type Update: DeserializeOwned + Send + 'static;

    /// Merge the input over the stored document, validate, and return changed columns.
    fn update_record(existing: &Self, input: Self::Update) -> Result<Record, AppError>;
}

/// Canonical timestamp text: fixed width, so lexical order is time order.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

/// Decode a JSON text column.
pub fn parse_json<T: DeserializeOwned>(raw: &str) -> Result<T, sqlx::Error> {
    serde_json::from_str(raw).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

/// Validate an identifier's format before it reaches a query.
pub fn parse_id(raw: &str) -> Result<String, AppError> {
    uuid::Uuid::parse_str(raw)
        .map(|id| id.to_string())
        .map_err(|_| AppError::BadRequest(format!("Invalid id: {}.", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_is_sortable() {
        let early = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 11, 2, 3, 4, 5).unwrap();
        assert!(timestamp(early) < timestamp(late));
        assert_eq!(timestamp(early), "2024-01-02T03:04:05.000000Z");
        assert_eq!(parse_timestamp(&timestamp(early)).unwrap(), early);
    }

    #[test]
    fn test_parse_id() {
        let id = uuid::Uuid::new_v4().to_string();
        assert_eq!(parse_id(&id).unwrap(), id);

        let err = parse_id("wwwww").unwrap_err();
        assert_eq!(err.message(), "Invalid id: wwwww.");
    }

    #[test]
    fn test_option_into_sql_value() {
        assert_eq!(SqlValue::from(None::<f64>), SqlValue::Null);
        assert_eq!(SqlValue::from(Some(2.5)), SqlValue::Real(2.5));
        assert_eq!(SqlValue::from(true), SqlValue::Integer(1));
    }
}
