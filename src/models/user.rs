//! User model.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use validator::{Validate, ValidationError};

use super::{non_blank, rule_failed, GuideSummary, Violations};
use crate::db::{parse_timestamp, Field, FieldKind, Record, Repository, Resource, Updatable};
use crate::errors::AppError;

pub const DEFAULT_PHOTO: &str = "default.jpg";

/// Access role. Stored and sent in kebab-case (`lead-guide`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    User,
    Guide,
    LeadGuide,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Guide => "guide",
            Role::LeadGuide => "lead-guide",
            Role::Admin => "admin",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "guide" => Some(Role::Guide),
            "lead-guide" => Some(Role::LeadGuide),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// A registered account.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub photo: String,
    pub role: Role,
    #[serde(skip_serializing)]
    pub password_hash: String,
    #[serde(skip_serializing)]
    pub password_changed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub password_reset_token: Option<String>,
    #[serde(skip_serializing)]
    pub password_reset_expires: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub active: bool,
    #[serde(skip_serializing)]
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Whether the password changed after a token issued at `issued_at` (unix seconds).
    pub fn changed_password_after(&self, issued_at: i64) -> bool {
        self.password_changed_at
            .map(|changed| changed.timestamp() > issued_at)
            .unwrap_or(false)
    }

    pub fn has_role(&self, roles: &[Role]) -> bool {
        roles.contains(&self.role)
    }

    pub fn first_name(&self) -> &str {
        self.name.split_whitespace().next().unwrap_or(&self.name)
    }

    pub fn guide_summary(&self) -> GuideSummary {
        GuideSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            photo: self.photo.clone(),
            role: self.role,
        }
    }

    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            photo: self.photo.clone(),
        }
    }
}

/// Public fields of a user embedded in reviews and bookings.
#[derive(Debug, Clone, Serialize)]
pub struct UserSummary {
    pub id: String,
    pub name: String,
    pub photo: String,
}

/// Request body for signing up.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    #[serde(default)]
    #[validate(required(message = "Please tell us your name!"))]
    pub name: Option<String>,
    #[serde(default)]
    #[validate(
        required(message = "Please provide your email"),
        email(message = "Please provide a valid email")
    )]
    pub email: Option<String>,
    #[serde(default)]
    #[validate(
        required(message = "Please provide a password"),
        length(min = 8, message = "A password must have at least 8 characters")
    )]
    pub password: Option<String>,
    #[serde(default)]
    #[validate(required(message = "Please confirm your password"))]
    pub password_confirm: Option<String>,
}

/// A validated signup, password still in clear text.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl SignupRequest {
    pub fn into_new_user(mut self) -> Result<NewUser, AppError> {
        self.name = non_blank(self.name);
        self.email = normalize_email(self.email);
        self.password = self.password.filter(|p| !p.is_empty());

        let mut v = Violations::default();
        v.validate(&self);
        check_confirmation(&mut v, &self.password, &self.password_confirm);
        v.finish()?;

        match (self.name, self.email, self.password) {
            (Some(name), Some(email), Some(password)) => Ok(NewUser {
                name,
                email,
                password,
            }),
            _ => Err(AppError::Internal("User validation incomplete".to_string())),
        }
    }
}

impl NewUser {
    /// Columns for the new account; role and photo take their defaults.
    pub fn into_record(self, password_hash: String) -> Record {
        vec![
            ("name", self.name.into()),
            ("email", self.email.into()),
            ("password_hash", password_hash.into()),
        ]
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ForgotPasswordRequest {
    #[serde(default)]
    pub email: Option<String>,
}

/// Request body carrying a new password and its confirmation.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PasswordRequest {
    #[serde(default)]
    #[validate(
        required(message = "Please provide a password"),
        length(min = 8, message = "A password must have at least 8 characters")
    )]
    pub password: Option<String>,
    #[serde(default)]
    #[validate(required(message = "Please confirm your password"))]
    pub password_confirm: Option<String>,
}

impl PasswordRequest {
    /// The new password once it is long enough and confirmed.
    pub fn into_password(mut self) -> Result<String, AppError> {
        self.password = self.password.filter(|p| !p.is_empty());

        let mut v = Violations::default();
        v.validate(&self);
        check_confirmation(&mut v, &self.password, &self.password_confirm);
        v.finish()?;

        self.password
            .ok_or_else(|| AppError::Internal("Password validation incomplete".to_string()))
    }
}

/// Request body for `updateMyPassword`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePasswordRequest {
    #[serde(default)]
    pub password_current: Option<String>,
    #[serde(flatten)]
    pub new_password: PasswordRequest,
}

/// Request body for an administrative user update, also used for `updateMe`
/// with `role` left empty.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "Please tell us your name!"))]
    pub name: Option<String>,
    #[serde(default)]
    #[validate(
        length(min = 1, message = "Please provide your email"),
        email(message = "Please provide a valid email")
    )]
    pub email: Option<String>,
    #[serde(default)]
    #[validate(custom(
        function = "validate_role",
        message = "Role is either: user, guide, lead-guide, admin"
    ))]
    pub role: Option<String>,
    #[serde(default)]
    pub photo: Option<String>,
}

fn validate_role(value: &str) -> Result<(), ValidationError> {
    match Role::from_str(value) {
        Some(_) => Ok(()),
        None => Err(rule_failed("role")),
    }
}

fn normalize_email(email: Option<String>) -> Option<String> {
    non_blank(email).map(|email| email.to_lowercase())
}

fn check_confirmation(v: &mut Violations, password: &Option<String>, confirm: &Option<String>) {
    if let (Some(password), Some(confirm)) = (password, confirm) {
        v.check(password == confirm, "Passwords are not the same!");
    }
}

impl Resource for User {
    const TABLE: &'static str = "users";
    const FIELDS: &'static [Field] = &[
        Field::new("name", "name", FieldKind::Text),
        Field::new("email", "email", FieldKind::Text),
        Field::new("role", "role", FieldKind::Text),
        Field::new("photo", "photo", FieldKind::Text),
    ];
    const SCOPE: Option<&'static str> = Some("active = 1");

    fn id(&self) -> &str {
        &self.id
    }

    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let role: String = row.try_get("role")?;
        let active: i32 = row.try_get("active")?;
        let changed: Option<String> = row.try_get("password_changed_at")?;
        let expires: Option<String> = row.try_get("password_reset_expires")?;
        let created_at: String = row.try_get("created_at")?;

        Ok(User {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            email: row.try_get("email")?,
            photo: row.try_get("photo")?,
            role: Role::from_str(&role).unwrap_or(Role::User),
            password_hash: row.try_get("password_hash")?,
            password_changed_at: changed.as_deref().map(parse_timestamp).transpose()?,
            password_reset_token: row.try_get("password_reset_token")?,
            password_reset_expires: expires.as_deref().map(parse_timestamp).transpose()?,
            active: active != 0,
            created_at: parse_timestamp(&created_at)?,
        })
    }

    fn rated_tours<'a>(
        repo: &'a Repository,
        id: &'a str,
    ) -> impl Future<Output = Result<Vec<String>, AppError>> + Send + 'a {
        repo.tours_reviewed_by(id)
    }
}

impl Updatable for User {
    type Update = UpdateUserRequest;

    fn update_record(existing: &User, mut input: UpdateUserRequest) -> Result<Record, AppError> {
        // Present but blank values are kept so the length rules reject them.
        input.name = input.name.map(|name| name.trim().to_string());
        input.email = input.email.map(|email| email.trim().to_lowercase());
        input.role = input.role.map(|role| role.trim().to_string());

        let mut v = Violations::default();
        v.validate(&input);
        v.finish()?;

        let role = match input.role.as_deref() {
            Some(role) => Role::from_str(role)
                .ok_or_else(|| AppError::Internal("User validation incomplete".to_string()))?,
            None => existing.role,
        };

        Ok(vec![
            ("name", input.name.unwrap_or_else(|| existing.name.clone()).into()),
            ("email", input.email.unwrap_or_else(|| existing.email.clone()).into()),
            ("role", role.as_str().into()),
            (
                "photo",
                non_blank(input.photo)
                    .unwrap_or_else(|| existing.photo.clone())
                    .into(),
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqlValue;
    use chrono::TimeZone;

    fn user() -> User {
        User {
            id: uuid::Uuid::new_v4().to_string(),
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

    fn signup() -> SignupRequest {
        SignupRequest {
            name: Some("Laura Wilson".to_string()),
            email: Some("Laura@Example.com".to_string()),
            password: Some("pass1234".to_string()),
            password_confirm: Some("pass1234".to_string()),
        }
    }

    #[test]
    fn test_role_wire_names() {
        assert_eq!(serde_json::to_value(Role::LeadGuide).unwrap(), "lead-guide");
        assert_eq!(Role::from_str("lead-guide"), Some(Role::LeadGuide));
        assert_eq!(Role::from_str("root"), None);
    }

    #[test]
    fn test_signup_lowercases_email() {
        let new_user = signup().into_new_user().unwrap();
        assert_eq!(new_user.email, "laura@example.com");
    }

    #[test]
    fn test_signup_password_rules() {
        let short = SignupRequest {
            password: Some("short".to_string()),
            password_confirm: Some("short".to_string()),
            ..signup()
        };
        assert!(short
            .into_new_user()
            .unwrap_err()
            .message()
            .contains("A password must have at least 8 characters"));

        let mismatch = SignupRequest {
            password_confirm: Some("pass12345".to_string()),
            ..signup()
        };
        assert!(mismatch
            .into_new_user()
            .unwrap_err()
            .message()
            .contains("Passwords are not the same!"));
    }

    #[test]
    fn test_signup_rejects_bad_email() {
        let req = SignupRequest {
            email: Some("not-an-email".to_string()),
            ..signup()
        };
        assert!(req
            .into_new_user()
            .unwrap_err()
            .message()
            .contains("Please provide a valid email"));
    }

    #[test]
    fn test_changed_password_after() {
        let mut user = user();
        assert!(!user.changed_password_after(0));

        let changed = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        user.password_changed_at = Some(changed);
        assert!(user.changed_password_after(changed.timestamp() - 60));
        assert!(!user.changed_password_after(changed.timestamp() + 60));
    }

    #[test]
    fn test_update_keeps_unspecified_fields() {
        let existing = user();
        let record = User::update_record(
            &existing,
            UpdateUserRequest {
                name: Some("Laura Smith".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(record.contains(&("name", SqlValue::Text("Laura Smith".to_string()))));
        assert!(record.contains(&("role", SqlValue::Text("user".to_string()))));
        assert!(record.contains(&("email", SqlValue::Text(existing.email.clone()))));
    }

    #[test]
    fn test_update_rejects_unknown_role() {
        let err = User::update_record(
            &user(),
            UpdateUserRequest {
                role: Some("emperor".to_string()),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(err.message().contains("Role is either"));
    }

    #[test]
    fn test_update_rejects_blank_name_and_bad_email() {
        let message = User::update_record(
            &user(),
            UpdateUserRequest {
                name: Some("   ".to_string()),
                email: Some("laura-at-example".to_string()),
                ..Default::default()
            },
        )
        .unwrap_err()
        .message();
        assert!(message.contains("Please tell us your name!"));
        assert!(message.contains("Please provide a valid email"));
    }

    #[test]
    fn test_password_request_requires_confirmation() {
        let message = PasswordRequest {
            password: Some("newpass123".to_string()),
            password_confirm: None,
        }
        .into_password()
        .unwrap_err()
        .message();
        assert!(message.contains("Please confirm your password"));
    }

    #[test]
    fn test_first_name() {
        assert_eq!(user().first_name(), "Laura");
    }
}
