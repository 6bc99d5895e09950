//! Data models for the Natours application.
//!
//! Wire format is camelCase JSON. Each model also knows how to validate its
//! input and how it is laid out in SQLite.

mod booking;
mod review;
mod tour;
mod user;

pub use booking::*;
pub use review::*;
pub use tour::*;
pub use user::*;

use validator::{Validate, ValidationError, ValidationErrors};

use crate::errors::AppError;

/// Collects constraint violations so all of them are reported at once.
#[derive(Debug, Default)]
pub struct Violations(Vec<String>);

impl Violations {
    /// Record every field rule `input` breaks, ordered by field name.
    pub fn validate<T: Validate>(&mut self, input: &T) {
        if let Err(errors) = input.validate() {
            self.0.extend(messages(&errors));
        }
    }

    /// Cross-field rule the derive cannot express.
    pub fn check(&mut self, ok: bool, message: impl Into<String>) {
        if !ok {
            self.0.push(message.into());
        }
    }

    pub fn finish(self) -> Result<(), AppError> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(self.0))
        }
    }
}

/// Flatten field errors into their messages.
pub fn messages(errors: &ValidationErrors) -> Vec<String> {
    let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
    fields.sort_by(|a, b| a.0.cmp(&b.0));

    let mut out = Vec::new();
    for (field, errs) in fields {
        for err in errs.iter() {
            match &err.message {
                Some(message) => out.push(message.to_string()),
                None => out.push(format!("Invalid {}", field)),
            }
        }
    }
    out
}

/// Error for a `custom` rule; the message comes from the field attribute.
pub fn rule_failed(code: &'static str) -> ValidationError {
    ValidationError::new(code)
}

/// `custom` rule: the value is a document id.
pub fn validate_id(value: &str) -> Result<(), ValidationError> {
    match uuid::Uuid::parse_str(value) {
        Ok(_) => Ok(()),
        Err(_) => Err(rule_failed("id")),
    }
}

/// Trim and drop empty strings.
pub fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Validate)]
    struct Sample {
        #[validate(required(message = "second"))]
        b: Option<String>,
        #[validate(email(message = "first"))]
        a: Option<String>,
    }

    #[test]
    fn test_violations_collects_all() {
        let mut v = Violations::default();
        v.validate(&Sample {
            a: Some("not-an-email".to_string()),
            b: None,
        });
        v.check(true, "skipped");
        v.check(false, "third");
        let err = v.finish().unwrap_err();
        assert_eq!(err.message(), "Invalid input data. first. second. third");
    }

    #[test]
    fn test_valid_input_passes() {
        let mut v = Violations::default();
        v.validate(&Sample {
            a: Some("laura@example.com".to_string()),
            b: Some("present".to_string()),
        });
        assert!(v.finish().is_ok());
    }

    #[test]
    fn test_round_one_decimal() {
        assert_eq!(round_one_decimal(4.666_666), 4.7);
        assert_eq!(round_one_decimal(4.0), 4.0);
    }

    #[test]
    fn test_id_rule() {
        assert!(validate_id(&uuid::Uuid::new_v4().to_string()).is_ok());
        assert!(validate_id("nope").is_err());
    }
}
