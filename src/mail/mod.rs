//! Transactional email.
//!
//! Messages are rendered from the email templates as an HTML part with a
//! plain-text alternative. The transport depends on configuration:
//!
//! ```text
//! production + SendGrid credentials  -> smtp.sendgrid.net relay
//! EMAIL_HOST set                     -> plain SMTP to that host (mail trap)
//! neither                            -> log only, kept in the outbox
//! ```

use std::sync::{Arc, Mutex};

use lettre::{
    message::{Mailbox, MultiPart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use minijinja::context;

use crate::auth::RESET_TOKEN_MINUTES;
use crate::config::Config;
use crate::errors::AppError;
use crate::models::User;
use crate::views::Views;

pub const SEND_FAILED: &str = "There was an error sending the email. Try again later!";

const SENDGRID_RELAY: &str = "smtp.sendgrid.net";

/// Messages kept by a log-only mailer.
const OUTBOX_CAPACITY: usize = 64;

/// A rendered message.
#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// Renders and delivers account emails.
pub struct Mailer {
    from: Mailbox,
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
    views: Arc<Views>,
    outbox: Mutex<Vec<OutgoingEmail>>,
}

impl Mailer {
    pub fn new(config: &Config, views: Arc<Views>) -> Result<Self, AppError> {
        let from: Mailbox = format!("Natours <{}>", config.mail.from)
            .parse()
            .map_err(|e| AppError::Internal(format!("Invalid EMAIL_FROM: {}", e)))?;

        Ok(Self {
            from,
            transport: build_transport(config)?,
            views,
            outbox: Mutex::new(Vec::new()),
        })
    }

    /// True when messages are only logged.
    pub fn is_log_only(&self) -> bool {
        self.transport.is_none()
    }

    pub async fn send_welcome(&self, user: &User, url: &str) -> Result<(), AppError> {
        self.send(user, "welcome", "Welcome to the Natours Family!", url)
            .await
    }

    pub async fn send_password_reset(&self, user: &User, url: &str) -> Result<(), AppError> {
        self.send(
            user,
            "password_reset",
            "Your password reset token (valid for only 10 minutes)",
            url,
        )
        .await
    }

    /// Messages captured while no transport is configured, oldest first.
    pub fn outbox(&self) -> Vec<OutgoingEmail> {
        self.outbox
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    async fn send(
        &self,
        user: &User,
        template: &str,
        subject: &str,
        url: &str,
    ) -> Result<(), AppError> {
        let ctx = context! {
            first_name => user.first_name(),
            url => url,
            subject => subject,
            valid_minutes => RESET_TOKEN_MINUTES,
        };
        let email = OutgoingEmail {
            to: user.email.clone(),
            subject: subject.to_string(),
            text: self.views.render(&format!("emails/{}.txt", template), &ctx)?,
            html: self.views.render(&format!("emails/{}.html", template), &ctx)?,
        };

        let Some(transport) = &self.transport else {
            tracing::info!(to = %email.to, subject = %email.subject, "Mail transport not configured, logging message");
            tracing::debug!("{}", email.text);
            let mut outbox = self
                .outbox
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if outbox.len() >= OUTBOX_CAPACITY {
                outbox.remove(0);
            }
            outbox.push(email);
            return Ok(());
        };

        let to: Mailbox = format!("{} <{}>", user.name, user.email)
            .parse()
            .map_err(|e| AppError::BadRequest(format!("Invalid recipient address: {}", e)))?;
        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject.as_str())
            .multipart(MultiPart::alternative_plain_html(email.text, email.html))
            .map_err(|e| AppError::Internal(format!("Failed to build email: {}", e)))?;

        transport.send(message).await.map_err(|e| {
            tracing::error!("Failed to send '{}' to {}: {}", subject, user.email, e);
            AppError::Delivery(SEND_FAILED.to_string())
        })?;
        tracing::info!(to = %user.email, "Sent '{}'", subject);
        Ok(())
    }
}

fn build_transport(
    config: &Config,
) -> Result<Option<AsyncSmtpTransport<Tokio1Executor>>, AppError> {
    let mail = &config.mail;

    if !config.environment.is_development() {
        if let (Some(username), Some(password)) =
            (&mail.sendgrid_username, &mail.sendgrid_password)
        {
            let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(SENDGRID_RELAY)
                .map_err(|e| AppError::Internal(format!("Invalid SMTP relay: {}", e)))?
                .credentials(Credentials::new(username.clone(), password.clone()))
                .build();
            return Ok(Some(transport));
        }
    }

    let Some(host) = &mail.host else {
        return Ok(None);
    };
    let mut builder =
        AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host.as_str()).port(mail.port);
    if let (Some(username), Some(password)) = (&mail.username, &mail.password) {
        builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
    }
    Ok(Some(builder.build()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MailConfig;
    use crate::models::{Role, DEFAULT_PHOTO};
    use chrono::Utc;

    fn config(mail: MailConfig) -> Config {
        let mut config = Config::for_testing(std::path::Path::new("."));
        config.mail = MailConfig {
            from: "hello@natours.io".to_string(),
            ..mail
        };
        config
    }

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

    fn mailer(mail: MailConfig) -> Mailer {
        Mailer::new(&config(mail), Arc::new(Views::new().unwrap())).unwrap()
    }

    #[tokio::test]
    async fn test_log_only_mailer_keeps_outbox() {
        let mailer = mailer(MailConfig::default());
        assert!(mailer.is_log_only());

        mailer
            .send_password_reset(&user(), "http://127.0.0.1:3000/api/v1/users/resetPassword/abc")
            .await
            .unwrap();

        let outbox = mailer.outbox();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].to, "laura@example.com");
        assert!(outbox[0].subject.contains("valid for only 10 minutes"));
        assert!(outbox[0].text.starts_with("Hi Laura,"));
        assert!(outbox[0].text.contains("/resetPassword/abc"));
        assert!(outbox[0].html.contains("<p>Hi Laura,</p>"));
    }

    #[tokio::test]
    async fn test_welcome_mail_links_account_page() {
        let mailer = mailer(MailConfig::default());
        mailer
            .send_welcome(&user(), "http://127.0.0.1:3000/me")
            .await
            .unwrap();

        let email = mailer.outbox().pop().unwrap();
        assert_eq!(email.subject, "Welcome to the Natours Family!");
        assert!(email.html.contains("href=\"http://127.0.0.1:3000/me\""));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_a_delivery_error() {
        let mailer = mailer(MailConfig {
            host: Some("127.0.0.1".to_string()),
            port: 1,
            ..MailConfig::default()
        });
        assert!(!mailer.is_log_only());

        let err = mailer
            .send_welcome(&user(), "http://127.0.0.1:3000/me")
            .await
            .unwrap_err();
        assert_eq!(err.message(), SEND_FAILED);
        assert!(mailer.outbox().is_empty());
    }
}
