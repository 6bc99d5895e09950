//! Query feature builder.
//!
//! Translates listing query parameters into one SQL query: filtering, sorting,
//! field projection and pagination, always applied in that order.

use serde_json::Value;

use super::{Field, FieldKind, SqlValue};
use crate::errors::AppError;

/// Parameters that drive the builder instead of filtering.
pub const RESERVED_PARAMS: [&str; 4] = ["page", "sort", "limit", "fields"];

/// Filters that may legitimately repeat (`?duration=5&duration=9`).
pub const REPEATABLE_PARAMS: [&str; 6] = [
    "duration",
    "ratingsQuantity",
    "ratingsAverage",
    "maxGroupSize",
    "difficulty",
    "price",
];

pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Comparison operators accepted as `field[op]=value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparison {
    pub fn parse(op: &str) -> Option<Self> {
        match op {
            "gt" => Some(Comparison::Gt),
            "gte" => Some(Comparison::Gte),
            "lt" => Some(Comparison::Lt),
            "lte" => Some(Comparison::Lte),
            _ => None,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Gt => ">",
            Comparison::Gte => ">=",
            Comparison::Lt => "<",
            Comparison::Lte => "<=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare {
        column: &'static str,
        op: Comparison,
        value: SqlValue,
    },
    AnyOf {
        column: &'static str,
        values: Vec<SqlValue>,
    },
}

impl Condition {
    pub fn eq(column: &'static str, value: impl Into<SqlValue>) -> Self {
        Condition::Compare {
            column,
            op: Comparison::Eq,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub column: &'static str,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Projection {
    #[default]
    All,
    Include(Vec<String>),
    Exclude(Vec<String>),
}

/// The assembled query description for a listing.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryFeatures {
    pub conditions: Vec<Condition>,
    pub sort: Vec<SortKey>,
    pub projection: Projection,
    pub page: u32,
    pub limit: u32,
}

impl Default for QueryFeatures {
    fn default() -> Self {
        Self {
            conditions: Vec::new(),
            sort: vec![default_sort()],
            projection: Projection::All,
            page: 1,
            limit: DEFAULT_PAGE_SIZE,
        }
    }
}

fn default_sort() -> SortKey {
    SortKey {
        column: "created_at",
        descending: true,
    }
}

impl QueryFeatures {
    /// Build features from raw query pairs for a resource's fields.
    pub fn from_params(fields: &[Field], params: &[(String, String)]) -> Result<Self, AppError> {
        let params = collapse_repeated(params);
        Ok(Self::default()
            .filter(fields, &params)?
            .sort(fields, &params)
            .limit_fields(&params)
            .paginate(&params))
    }

    /// Add a fixed condition, e.g. the parent of a nested route.
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.insert(0, condition);
        self
    }

    fn filter(mut self, fields: &[Field], params: &[(String, Vec<String>)]) -> Result<Self, AppError> {
        for (key, values) in params {
            let (name, op) = match split_operator(key) {
                Some(parts) => parts,
                None => {
                    tracing::debug!("Ignoring unsupported filter operator in {}", key);
                    continue;
                }
            };
            if RESERVED_PARAMS.contains(&name) {
                continue;
            }
            let Some(field) = fields.iter().find(|f| f.name == name) else {
                tracing::debug!("Ignoring filter on unknown field {}", name);
                continue;
            };

            let mut typed = values
                .iter()
                .map(|raw| typed_value(field, raw))
                .collect::<Result<Vec<_>, _>>()?;

            let condition = if typed.len() > 1 && op == Comparison::Eq {
                Condition::AnyOf {
                    column: field.column,
                    values: typed,
                }
            } else {
                let Some(value) = typed.pop() else { continue };
                Condition::Compare {
                    column: field.column,
                    op,
                    value,
                }
            };
            self.conditions.push(condition);
        }
        Ok(self)
    }

    fn sort(mut self, fields: &[Field], params: &[(String, Vec<String>)]) -> Self {
        let Some(raw) = last_value(params, "sort") else {
            return self;
        };

        let keys: Vec<SortKey> = raw
            .split(',')
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .filter_map(|key| {
                let (name, descending) = match key.strip_prefix('-') {
                    Some(name) => (name, true),
                    None => (key, false),
                };
                let column = if name == "createdAt" {
                    Some("created_at")
                } else {
                    fields.iter().find(|f| f.name == name).map(|f| f.column)
                };
                column.map(|column| SortKey { column, descending })
            })
            .collect();

        if !keys.is_empty() {
            self.sort = keys;
        }
        self
    }

    fn limit_fields(mut self, params: &[(String, Vec<String>)]) -> Self {
        let Some(raw) = last_value(params, "fields") else {
            return self;
        };

        let mut include = Vec::new();
        let mut exclude = Vec::new();
        for name in raw.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            match name.strip_prefix('-') {
                Some(excluded) => exclude.push(excluded.to_string()),
                None => include.push(name.to_string()),
            }
        }

        self.projection = if !include.is_empty() {
            Projection::Include(include)
        } else if !exclude.is_empty() {
            Projection::Exclude(exclude)
        } else {
            Projection::All
        };
        self
    }

    fn paginate(mut self, params: &[(String, Vec<String>)]) -> Self {
        let positive = |key: &str| {
            last_value(params, key)
                .and_then(|v| v.trim().parse::<u32>().ok())
                .filter(|v| *v > 0)
        };
        self.page = positive("page").unwrap_or(1);
        self.limit = positive("limit").unwrap_or(DEFAULT_PAGE_SIZE);
        self
    }

    pub fn offset(&self) -> i64 {
        (self.page as i64 - 1) * self.limit as i64
    }

    /// Render the WHERE clause (with leading space) and its bound values.
    pub fn where_clause(&self, scopes: &[Option<&'static str>]) -> (String, Vec<SqlValue>) {
        let mut parts: Vec<String> = scopes.iter().flatten().map(|s| s.to_string()).collect();
        let mut values = Vec::new();

        for condition in &self.conditions {
            match condition {
                Condition::Compare { column, op, value } => {
                    parts.push(format!("{} {} ?", column, op.as_sql()));
                    values.push(value.clone());
                }
                Condition::AnyOf {
                    column,
                    values: options,
                } => {
                    let placeholders = vec!["?"; options.len()].join(", ");
                    parts.push(format!("{} IN ({})", column, placeholders));
                    values.extend(options.iter().cloned());
                }
            }
        }

        if parts.is_empty() {
            (String::new(), values)
        } else {
            (format!(" WHERE {}", parts.join(" AND ")), values)
        }
    }

    /// ORDER BY terms; insertion order breaks ties.
    pub fn order_clause(&self) -> String {
        let mut terms: Vec<String> = self
            .sort
            .iter()
            .map(|key| {
                format!(
                    "{} {}",
                    key.column,
                    if key.descending { "DESC" } else { "ASC" }
                )
            })
            .collect();
        terms.push("rowid DESC".to_string());
        terms.join(", ")
    }

    /// Apply the field projection to a serialized document.
    pub fn project(&self, doc: &mut Value) {
        let Value::Object(map) = doc else { return };
        match &self.projection {
            Projection::All => {}
            Projection::Include(names) => {
                map.retain(|key, _| key == "id" || names.iter().any(|n| n == key));
            }
            Projection::Exclude(names) => {
                map.retain(|key, _| key == "id" || !names.iter().any(|n| n == key));
            }
        }
    }
}

/// Guard against parameter pollution: keep the last value of every key,
/// except whitelisted filters, which keep all of theirs.
fn collapse_repeated(params: &[(String, String)]) -> Vec<(String, Vec<String>)> {
    let mut collapsed: Vec<(String, Vec<String>)> = Vec::new();
    for (key, value) in params {
        match collapsed.iter_mut().find(|(k, _)| k == key) {
            Some((_, values)) if REPEATABLE_PARAMS.contains(&key.as_str()) => {
                values.push(value.clone())
            }
            Some((_, values)) => *values = vec![value.clone()],
            None => collapsed.push((key.clone(), vec![value.clone()])),
        }
    }
    collapsed
}

fn last_value<'a>(params: &'a [(String, Vec<String>)], key: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k == key)
        .and_then(|(_, values)| values.last())
        .map(String::as_str)
}

/// `price[gte]` -> (`price`, Gte); `price` -> (`price`, Eq).
fn split_operator(key: &str) -> Option<(&str, Comparison)> {
    match key.split_once('[') {
        None => Some((key, Comparison::Eq)),
        Some((name, rest)) => {
            let op = rest.strip_suffix(']')?;
            Comparison::parse(op).map(|op| (name, op))
        }
    }
}

fn typed_value(field: &Field, raw: &str) -> Result<SqlValue, AppError> {
    let invalid = || AppError::BadRequest(format!("Invalid {}: {}.", field.name, raw));
    match field.kind {
        FieldKind::Number => raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(SqlValue::Real)
            .ok_or_else(invalid),
        FieldKind::Bool => match raw.trim() {
            "true" | "1" => Ok(SqlValue::Integer(1)),
            "false" | "0" => Ok(SqlValue::Integer(0)),
            _ => Err(invalid()),
        },
        FieldKind::Text | FieldKind::Date => Ok(SqlValue::Text(raw.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const FIELDS: &[Field] = &[
        Field::new("duration", "duration", FieldKind::Number),
        Field::new("price", "price", FieldKind::Number),
        Field::new("difficulty", "difficulty", FieldKind::Text),
        Field::new("ratingsAverage", "ratings_average", FieldKind::Number),
        Field::new("secretTour", "secret_tour", FieldKind::Bool),
    ];

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let features = QueryFeatures::from_params(FIELDS, &[]).unwrap();
        assert!(features.conditions.is_empty());
        assert_eq!(features.page, 1);
        assert_eq!(features.limit, DEFAULT_PAGE_SIZE);
        assert_eq!(features.order_clause(), "created_at DESC, rowid DESC");
        assert_eq!(features.where_clause(&[]), (String::new(), vec![]));
    }

    #[test]
    fn test_range_operators_become_sql_comparisons() {
        let features = QueryFeatures::from_params(
            FIELDS,
            &params(&[("duration[gte]", "5"), ("difficulty", "easy"), ("price[lt]", "1500")]),
        )
        .unwrap();

        let (sql, values) = features.where_clause(&[Some("secret_tour = 0")]);
        assert_eq!(
            sql,
            " WHERE secret_tour = 0 AND duration >= ? AND difficulty = ? AND price < ?"
        );
        assert_eq!(
            values,
            vec![
                SqlValue::Real(5.0),
                SqlValue::Text("easy".to_string()),
                SqlValue::Real(1500.0)
            ]
        );
    }

    #[test]
    fn test_reserved_and_unknown_params_do_not_filter() {
        let features = QueryFeatures::from_params(
            FIELDS,
            &params(&[("page", "2"), ("sort", "price"), ("nope", "1"), ("price[regex]", "x")]),
        )
        .unwrap();
        assert!(features.conditions.is_empty());
    }

    #[test]
    fn test_non_numeric_value_is_rejected() {
        let err = QueryFeatures::from_params(FIELDS, &params(&[("duration", "abc")])).unwrap_err();
        assert_eq!(err.message(), "Invalid duration: abc.");
    }

    #[test]
    fn test_whitelisted_repeats_become_membership() {
        let features = QueryFeatures::from_params(
            FIELDS,
            &params(&[("duration", "5"), ("duration", "9")]),
        )
        .unwrap();
        let (sql, values) = features.where_clause(&[]);
        assert_eq!(sql, " WHERE duration IN (?, ?)");
        assert_eq!(values, vec![SqlValue::Real(5.0), SqlValue::Real(9.0)]);
    }

    #[test]
    fn test_polluted_sort_keeps_last_value() {
        let features = QueryFeatures::from_params(
            FIELDS,
            &params(&[("sort", "duration"), ("sort", "-price")]),
        )
        .unwrap();
        assert_eq!(features.order_clause(), "price DESC, rowid DESC");
    }

    #[test]
    fn test_sort_maps_wire_names_to_columns() {
        let features = QueryFeatures::from_params(
            FIELDS,
            &params(&[("sort", "-ratingsAverage,price,bogus")]),
        )
        .unwrap();
        assert_eq!(
            features.order_clause(),
            "ratings_average DESC, price ASC, rowid DESC"
        );
    }

    #[test]
    fn test_pagination_offset() {
        let features =
            QueryFeatures::from_params(FIELDS, &params(&[("page", "2"), ("limit", "5")])).unwrap();
        assert_eq!(features.offset(), 5);
        assert_eq!(features.limit, 5);

        let fallback =
            QueryFeatures::from_params(FIELDS, &params(&[("page", "zero"), ("limit", "0")]))
                .unwrap();
        assert_eq!(fallback.page, 1);
        assert_eq!(fallback.limit, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_projection_include_and_exclude() {
        let doc = json!({ "id": "1", "name": "Forest Hiker", "price": 397.0, "summary": "x" });

        let include =
            QueryFeatures::from_params(FIELDS, &params(&[("fields", "name,price")])).unwrap();
        let mut projected = doc.clone();
        include.project(&mut projected);
        assert_eq!(projected, json!({ "id": "1", "name": "Forest Hiker", "price": 397.0 }));

        let exclude = QueryFeatures::from_params(FIELDS, &params(&[("fields", "-summary")])).unwrap();
        let mut projected = doc;
        exclude.project(&mut projected);
        assert_eq!(projected, json!({ "id": "1", "name": "Forest Hiker", "price": 397.0 }));
    }

    #[test]
    fn test_nested_condition_comes_first() {
        let features = QueryFeatures::from_params(FIELDS, &params(&[("price", "10")]))
            .unwrap()
            .with_condition(Condition::eq("tour_id", "abc"));
        let (sql, _) = features.where_clause(&[]);
        assert_eq!(sql, " WHERE tour_id = ? AND price = ?");
    }
}
