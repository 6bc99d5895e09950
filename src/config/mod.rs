//! Configuration module for the Natours backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

const DEV_JWT_SECRET: &str = "natours-development-secret-change-me";

/// Runtime environment, selects error verbosity, cookie security and mail transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }

    pub fn is_development(&self) -> bool {
        *self == Environment::Development
    }
}

/// SMTP settings for outgoing mail.
#[derive(Debug, Clone, Default)]
pub struct MailConfig {
    /// Sender address used in the `From` header
    pub from: String,
    /// Development SMTP host (e.g. a mail trap)
    pub host: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// SendGrid credentials, used in production
    pub sendgrid_username: Option<String>,
    pub sendgrid_password: Option<String>,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Directory served as static files; uploaded images land below `img/`
    pub public_dir: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Externally visible base URL, used in emails and checkout redirects
    pub public_url: String,
    /// Origin allowed by CORS (credentials enabled)
    pub cors_origin: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    pub jwt_secret: String,
    pub jwt_expires_in_days: i64,
    pub jwt_cookie_expires_in_days: i64,
    /// Maximum API requests per client IP and window
    pub rate_limit_max: u32,
    pub rate_limit_window_secs: u64,
    pub mail: MailConfig,
    pub stripe_secret_key: Option<String>,
    pub stripe_api_base: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let environment = Environment::parse(
            &env::var("NATOURS_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let db_path = env::var("NATOURS_DB_PATH")
            .unwrap_or_else(|_| "./data/natours.sqlite".to_string())
            .into();

        let public_dir = env::var("NATOURS_PUBLIC_DIR")
            .unwrap_or_else(|_| "./public".to_string())
            .into();

        let bind_addr = env::var("NATOURS_BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
            .parse()
            .expect("Invalid NATOURS_BIND_ADDR format");

        let public_url = env::var("NATOURS_PUBLIC_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:3000".to_string())
            .trim_end_matches('/')
            .to_string();

        let cors_origin =
            env::var("NATOURS_CORS_ORIGIN").unwrap_or_else(|_| "http://localhost:3000".to_string());

        let log_level = env::var("NATOURS_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| DEV_JWT_SECRET.to_string());

        let mail = MailConfig {
            from: env::var("EMAIL_FROM").unwrap_or_else(|_| "hello@natours.io".to_string()),
            host: env::var("EMAIL_HOST").ok(),
            port: env_number("EMAIL_PORT", 2525),
            username: env::var("EMAIL_USERNAME").ok(),
            password: env::var("EMAIL_PASSWORD").ok(),
            sendgrid_username: env::var("SENDGRID_USERNAME").ok(),
            sendgrid_password: env::var("SENDGRID_PASSWORD").ok(),
        };

        Self {
            environment,
            db_path,
            public_dir,
            bind_addr,
            public_url,
            cors_origin,
            log_level,
            jwt_secret,
            jwt_expires_in_days: env_number("JWT_EXPIRES_IN_DAYS", 90),
            jwt_cookie_expires_in_days: env_number("JWT_COOKIE_EXPIRES_IN_DAYS", 90),
            rate_limit_max: env_number("NATOURS_RATE_LIMIT_MAX", 100),
            rate_limit_window_secs: env_number("NATOURS_RATE_LIMIT_WINDOW_SECS", 3600),
            mail,
            stripe_secret_key: env::var("STRIPE_SECRET_KEY").ok(),
            stripe_api_base: env::var("STRIPE_API_BASE")
                .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
        }
    }

    /// True when the JWT secret is still the built-in development value.
    pub fn uses_default_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}

#[cfg(test)]
impl Config {
    /// Development configuration rooted in `dir`, independent of the process environment.
    pub fn for_testing(dir: &std::path::Path) -> Self {
        Self {
            environment: Environment::Development,
            db_path: dir.join("test.sqlite"),
            public_dir: dir.join("public"),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            public_url: "http://127.0.0.1:3000".to_string(),
            cors_origin: "http://localhost:3000".to_string(),
            log_level: "warn".to_string(),
            jwt_secret: "test-secret".to_string(),
            jwt_expires_in_days: 90,
            jwt_cookie_expires_in_days: 90,
            rate_limit_max: 1000,
            rate_limit_window_secs: 3600,
            mail: MailConfig {
                from: "hello@natours.io".to_string(),
                port: 2525,
                ..MailConfig::default()
            },
            stripe_secret_key: None,
            stripe_api_base: "https://api.stripe.com".to_string(),
        }
    }
}

fn env_number<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        // Clear any existing env vars
        env::remove_var("NATOURS_ENV");
        env::remove_var("NATOURS_DB_PATH");
        env::remove_var("NATOURS_BIND_ADDR");
        env::remove_var("NATOURS_LOG_LEVEL");
        env::remove_var("NATOURS_RATE_LIMIT_MAX");
        env::remove_var("JWT_SECRET");
        env::remove_var("STRIPE_SECRET_KEY");

        let config = Config::from_env();

        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.db_path, PathBuf::from("./data/natours.sqlite"));
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:3000");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.rate_limit_max, 100);
        assert_eq!(config.jwt_expires_in_days, 90);
        assert!(config.uses_default_secret());
        assert!(config.stripe_secret_key.is_none());
    }

    #[test]
    fn test_environment_parse() {
        assert_eq!(Environment::parse("production"), Environment::Production);
        assert_eq!(Environment::parse(" PROD "), Environment::Production);
        assert_eq!(Environment::parse("development"), Environment::Development);
        assert_eq!(Environment::parse("anything"), Environment::Development);
    }
}
