//! Body sanitisation.
//!
//! JSON and form bodies are capped at [`BODY_LIMIT`] and cleaned before any
//! extractor sees them: keys that look like query operators (`$gt`, `a.b`)
//! are dropped and markup in string values is escaped.

use axum::{
    body::{Body, Bytes},
    extract::Request,
    http::header,
    middleware::Next,
    response::Response,
};
use serde_json::Value;
use url::form_urlencoded;

use crate::errors::AppError;

/// Maximum size of a JSON or urlencoded request body.
pub const BODY_LIMIT: usize = 10 * 1024;

fn content_type(request: &Request) -> &str {
    request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

/// Middleware enforcing the body limit and cleaning JSON and form bodies.
pub async fn sanitize_body(request: Request, next: Next) -> Result<Response, AppError> {
    let kind = content_type(&request).to_ascii_lowercase();
    let is_json = kind.starts_with("application/json");
    let is_form = kind.starts_with("application/x-www-form-urlencoded");
    if !is_json && !is_form {
        return Ok(next.run(request).await);
    }

    let (mut parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, BODY_LIMIT).await.map_err(|_| {
        AppError::PayloadTooLarge(format!(
            "Request body is larger than {} KiB",
            BODY_LIMIT / 1024
        ))
    })?;

    let bytes = if is_json {
        clean_json(bytes)
    } else {
        clean_form(&bytes)
    };

    parts.headers.remove(header::CONTENT_LENGTH);
    Ok(next
        .run(Request::from_parts(parts, Body::from(bytes)))
        .await)
}

/// Clean a JSON document; bodies that do not parse are left for the
/// extractor to reject.
fn clean_json(bytes: Bytes) -> Bytes {
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(mut value) => {
            clean_value(&mut value);
            match serde_json::to_vec(&value) {
                Ok(cleaned) => Bytes::from(cleaned),
                Err(_) => bytes,
            }
        }
        Err(_) => bytes,
    }
}

/// Clean a urlencoded form, re-encoding the surviving pairs.
fn clean_form(bytes: &[u8]) -> Bytes {
    let mut cleaned = form_urlencoded::Serializer::new(String::new());
    for (key, value) in form_urlencoded::parse(bytes) {
        if is_operator_key(&key) {
            continue;
        }
        cleaned.append_pair(&key, &escape_markup(&value));
    }
    Bytes::from(cleaned.finish())
}

fn is_operator_key(key: &str) -> bool {
    key.starts_with('$') || key.contains('.')
}

fn clean_value(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|key, _| !is_operator_key(key));
            map.values_mut().for_each(clean_value);
        }
        Value::Array(items) => items.iter_mut().for_each(clean_value),
        Value::String(text) => {
            if text.contains(['<', '>']) {
                *text = escape_markup(text);
            }
        }
        _ => {}
    }
}

fn escape_markup(text: &str) -> String {
    text.replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operator_keys_are_dropped() {
        let mut value = json!({
            "email": { "$gt": "" },
            "password": "pass1234",
            "profile.role": "admin"
        });
        clean_value(&mut value);
        assert_eq!(value, json!({ "email": {}, "password": "pass1234" }));
    }

    #[test]
    fn test_markup_is_escaped_recursively() {
        let mut value = json!({
            "name": "<script>alert(1)</script>",
            "locations": [{ "description": "<b>Bay</b>" }]
        });
        clean_value(&mut value);
        assert_eq!(value["name"], "&lt;script&gt;alert(1)&lt;/script&gt;");
        assert_eq!(value["locations"][0]["description"], "&lt;b&gt;Bay&lt;/b&gt;");
    }

    #[test]
    fn test_form_values_are_escaped() {
        let cleaned = clean_form(b"name=%3Cb%3ELaura%3C%2Fb%3E&email=laura%40example.com&%24where=1");
        let pairs: Vec<(String, String)> = form_urlencoded::parse(&cleaned)
            .into_owned()
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("name".to_string(), "&lt;b&gt;Laura&lt;/b&gt;".to_string()),
                ("email".to_string(), "laura@example.com".to_string()),
            ]
        );
    }

    #[test]
    fn test_invalid_json_passes_through() {
        let raw = Bytes::from_static(b"{not json");
        assert_eq!(clean_json(raw.clone()), raw);
    }
}
