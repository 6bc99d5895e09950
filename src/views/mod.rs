//! Server-side templates.
//!
//! Page and email templates are compiled into the binary and rendered with
//! minijinja. `.html` templates are auto-escaped.

use minijinja::{context, Environment};
use serde::Serialize;

use crate::errors::AppError;

const TEMPLATES: &[(&str, &str)] = &[
    ("base.html", include_str!("../../templates/base.html")),
    ("overview.html", include_str!("../../templates/overview.html")),
    ("tour.html", include_str!("../../templates/tour.html")),
    ("login.html", include_str!("../../templates/login.html")),
    ("account.html", include_str!("../../templates/account.html")),
    ("error.html", include_str!("../../templates/error.html")),
    (
        "emails/base.html",
        include_str!("../../templates/emails/base.html"),
    ),
    (
        "emails/welcome.html",
        include_str!("../../templates/emails/welcome.html"),
    ),
    (
        "emails/welcome.txt",
        include_str!("../../templates/emails/welcome.txt"),
    ),
    (
        "emails/password_reset.html",
        include_str!("../../templates/emails/password_reset.html"),
    ),
    (
        "emails/password_reset.txt",
        include_str!("../../templates/emails/password_reset.txt"),
    ),
];

/// Template registry.
pub struct Views {
    env: Environment<'static>,
}

impl Views {
    pub fn new() -> Result<Self, AppError> {
        let mut env = Environment::new();
        for &(name, source) in TEMPLATES {
            env.add_template(name, source)?;
        }
        env.add_filter("month_year", month_year);
        env.add_filter("first_name", first_name);
        env.add_filter("paragraphs", paragraphs);
        Ok(Self { env })
    }

    pub fn render<S: Serialize>(&self, name: &str, ctx: S) -> Result<String, AppError> {
        Ok(self.env.get_template(name)?.render(ctx)?)
    }

    pub fn render_error(&self, message: &str) -> Result<String, AppError> {
        self.render(
            "error.html",
            context! { title => "Something went wrong!", msg => message },
        )
    }
}

/// `2021-06-19T09:00:00Z` -> `June 2021`.
fn month_year(value: String) -> String {
    const MONTHS: [&str; 12] = [
        "January", "February", "March", "April", "May", "June", "July", "August", "September",
        "October", "November", "December",
    ];
    let year = value.get(0..4);
    let month = value
        .get(5..7)
        .and_then(|m| m.parse::<usize>().ok())
        .and_then(|m| MONTHS.get(m.wrapping_sub(1)));
    match (month, year) {
        (Some(month), Some(year)) => format!("{} {}", month, year),
        _ => value,
    }
}

fn first_name(value: String) -> String {
    value.split_whitespace().next().unwrap_or_default().to_string()
}

/// Split text on newlines, dropping blank lines.
fn paragraphs(value: String) -> Vec<String> {
    value
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_templates_compile() {
        let views = Views::new().unwrap();
        for &(name, _) in TEMPLATES {
            assert!(views.env.get_template(name).is_ok(), "{} missing", name);
        }
    }

    #[test]
    fn test_error_page_escapes_message() {
        let views = Views::new().unwrap();
        let html = views.render_error("<b>There is no tour with that name.</b>").unwrap();
        assert!(html.contains("&lt;b&gt;There is no tour with that name."));
        assert!(html.contains("Something went wrong!"));
    }

    #[test]
    fn test_text_filters() {
        assert_eq!(first_name("Laura Wilson".to_string()), "Laura");
        assert_eq!(
            paragraphs("First.\n\n  Second.\n".to_string()),
            vec!["First.".to_string(), "Second.".to_string()]
        );
    }

    #[test]
    fn test_month_year_filter() {
        assert_eq!(month_year("2021-06-19T09:00:00Z".to_string()), "June 2021");
        assert_eq!(month_year("soon".to_string()), "soon");
    }
}
