//! Security response headers.
//!
//! Every response gets the usual hardening headers unless the handler
//! already set one of them.

use axum::{
    http::{header, HeaderName, HeaderValue},
    Router,
};
use tower_http::set_header::SetResponseHeaderLayer;

/// Scripts and frames are limited to our own origin plus the payment widget.
pub const CONTENT_SECURITY_POLICY: &str = "default-src 'self'; base-uri 'self'; \
    font-src 'self' https: data:; form-action 'self'; frame-ancestors 'self'; \
    frame-src 'self' https://js.stripe.com; img-src 'self' data: https:; \
    object-src 'none'; script-src 'self' https://js.stripe.com; \
    script-src-attr 'none'; style-src 'self' https: 'unsafe-inline'; \
    connect-src 'self' https://api.stripe.com";

fn security_headers() -> Vec<(HeaderName, &'static str)> {
    vec![
        (header::CONTENT_SECURITY_POLICY, CONTENT_SECURITY_POLICY),
        (
            HeaderName::from_static("cross-origin-opener-policy"),
            "same-origin",
        ),
        (
            HeaderName::from_static("cross-origin-resource-policy"),
            "same-origin",
        ),
        (HeaderName::from_static("origin-agent-cluster"), "?1"),
        (header::REFERRER_POLICY, "no-referrer"),
        (
            header::STRICT_TRANSPORT_SECURITY,
            "max-age=15552000; includeSubDomains",
        ),
        (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
        (header::X_DNS_PREFETCH_CONTROL, "off"),
        (HeaderName::from_static("x-download-options"), "noopen"),
        (header::X_FRAME_OPTIONS, "SAMEORIGIN"),
        (
            HeaderName::from_static("x-permitted-cross-domain-policies"),
            "none",
        ),
        (header::X_XSS_PROTECTION, "0"),
    ]
}

/// Wrap `router` so every response carries the security headers.
pub fn with_security_headers<S>(router: Router<S>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    security_headers()
        .into_iter()
        .fold(router, |router, (name, value)| {
            router.layer(SetResponseHeaderLayer::if_not_present(
                name,
                HeaderValue::from_static(value),
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_values_are_valid() {
        for (name, value) in security_headers() {
            assert!(
                HeaderValue::from_str(value).is_ok(),
                "invalid value for {}",
                name
            );
        }
    }

    #[test]
    fn test_policy_allows_payment_scripts() {
        assert!(CONTENT_SECURITY_POLICY.contains("script-src 'self' https://js.stripe.com"));
        assert!(CONTENT_SECURITY_POLICY.contains("object-src 'none'"));
    }
}
