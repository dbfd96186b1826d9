//! Per-API CORS enforcement.
//!
//! [`evaluate`] decides what to do with a request before it reaches the
//! resource; the router turns the decision into a response or merges the
//! headers into the resource's response.
use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
};

use crate::core::CorsConfig;

pub const ORIGIN_NOT_ALLOWED: &str = "CORS: Origin not allowed";

#[derive(Debug, Clone, PartialEq)]
pub enum CorsDecision {
    /// CORS disabled or not a cross-origin request.
    Bypass,
    /// Origin rejected; answer 403 without invoking the resource.
    Forbidden,
    /// Preflight answered directly with 204 and these headers.
    Preflight(HeaderMap),
    /// Let the request through and add these headers to its response.
    Actual(HeaderMap),
}

fn insert(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => tracing::warn!(header = %name, value, "skipping invalid CORS header value"),
    }
}

pub fn evaluate(config: &CorsConfig, method: &Method, request_headers: &HeaderMap) -> CorsDecision {
    if !config.enabled {
        return CorsDecision::Bypass;
    }
    let Some(origin) = request_headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    else {
        return CorsDecision::Bypass;
    };

    if !config.is_origin_allowed(origin) {
        tracing::warn!(origin, "CORS origin rejected");
        return CorsDecision::Forbidden;
    }

    let mut headers = HeaderMap::new();
    // Credentialed responses may not use the wildcard.
    let allow_origin = if !config.allow_credentials && config.allows_any_origin() {
        "*"
    } else {
        origin
    };
    insert(&mut headers, header::ACCESS_CONTROL_ALLOW_ORIGIN, allow_origin);
    if allow_origin != "*" {
        headers.insert(header::VARY, HeaderValue::from_static("Origin"));
    }
    if config.allow_credentials {
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
    }

    if method == Method::OPTIONS {
        insert(
            &mut headers,
            header::ACCESS_CONTROL_ALLOW_METHODS,
            &config.allow_methods.join(", "),
        );
        let requested = request_headers
            .get(header::ACCESS_CONTROL_REQUEST_HEADERS)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.trim().is_empty());
        match requested {
            Some(requested) => {
                insert(&mut headers, header::ACCESS_CONTROL_ALLOW_HEADERS, requested)
            }
            None if !config.allow_headers.is_empty() => insert(
                &mut headers,
                header::ACCESS_CONTROL_ALLOW_HEADERS,
                &config.allow_headers.join(", "),
            ),
            None => {}
        }
        if config.max_age > 0 {
            headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from(config.max_age));
        }
        return CorsDecision::Preflight(headers);
    }

    if !config.expose_headers.is_empty() {
        insert(
            &mut headers,
            header::ACCESS_CONTROL_EXPOSE_HEADERS,
            &config.expose_headers.join(", "),
        );
    }
    CorsDecision::Actual(headers)
}

/// Response for decisions that short-circuit the resource.
pub fn short_circuit(decision: &CorsDecision) -> Option<Response> {
    match decision {
        CorsDecision::Forbidden => {
            Some((StatusCode::FORBIDDEN, ORIGIN_NOT_ALLOWED).into_response())
        }
        CorsDecision::Preflight(headers) => {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::NO_CONTENT;
            response.headers_mut().extend(headers.clone());
            Some(response)
        }
        CorsDecision::Bypass | CorsDecision::Actual(_) => None,
    }
}

/// Merge CORS headers into a resource response without overriding headers the
/// mediation already set.
pub fn apply(decision: &CorsDecision, response: &mut Response) {
    if let CorsDecision::Actual(cors_headers) = decision {
        let headers = response.headers_mut();
        for (name, value) in cors_headers {
            if !headers.contains_key(name) {
                headers.insert(name.clone(), value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CorsConfig {
        CorsConfig {
            enabled: true,
            allow_origins: vec!["http://app.test".into(), "*.trusted.io".into()],
            expose_headers: vec!["X-Total".into()],
            ..CorsConfig::default()
        }
    }

    fn request(origin: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(origin) = origin {
            headers.insert(header::ORIGIN, HeaderValue::from_str(origin).unwrap());
        }
        headers
    }

    #[test]
    fn test_bypass_without_origin_or_when_disabled() {
        assert_eq!(evaluate(&config(), &Method::GET, &request(None)), CorsDecision::Bypass);

        let disabled = CorsConfig {
            enabled: false,
            ..config()
        };
        assert_eq!(
            evaluate(&disabled, &Method::GET, &request(Some("http://evil.test"))),
            CorsDecision::Bypass
        );
    }

    #[test]
    fn test_disallowed_origin_is_forbidden() {
        let decision = evaluate(&config(), &Method::GET, &request(Some("http://evil.test")));
        assert_eq!(decision, CorsDecision::Forbidden);
        let response = short_circuit(&decision).unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let bare = evaluate(&config(), &Method::GET, &request(Some("http://trusted.io")));
        assert_eq!(bare, CorsDecision::Forbidden);
    }

    #[test]
    fn test_actual_request_headers() {
        let CorsDecision::Actual(headers) =
            evaluate(&config(), &Method::POST, &request(Some("http://api.trusted.io")))
        else {
            panic!("expected actual decision");
        };
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "http://api.trusted.io");
        assert_eq!(headers[header::ACCESS_CONTROL_EXPOSE_HEADERS], "X-Total");
        assert!(!headers.contains_key(header::ACCESS_CONTROL_ALLOW_CREDENTIALS));
    }

    #[test]
    fn test_wildcard_origin_without_credentials() {
        let open = CorsConfig {
            enabled: true,
            ..CorsConfig::default()
        };
        let CorsDecision::Actual(headers) =
            evaluate(&open, &Method::GET, &request(Some("http://any.test")))
        else {
            panic!("expected actual decision");
        };
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");

        let credentialed = CorsConfig {
            allow_credentials: true,
            ..open
        };
        let CorsDecision::Actual(headers) =
            evaluate(&credentialed, &Method::GET, &request(Some("http://any.test")))
        else {
            panic!("expected actual decision");
        };
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "http://any.test");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    }

    #[test]
    fn test_preflight() {
        let mut headers = request(Some("http://app.test"));
        let decision = evaluate(&config(), &Method::OPTIONS, &headers);
        let response = short_circuit(&decision).unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let h = response.headers();
        assert_eq!(
            h[header::ACCESS_CONTROL_ALLOW_METHODS],
            "GET, POST, PUT, DELETE, PATCH, OPTIONS"
        );
        assert_eq!(h[header::ACCESS_CONTROL_ALLOW_HEADERS], "Content-Type, Authorization");
        assert_eq!(h[header::ACCESS_CONTROL_MAX_AGE], "86400");

        headers.insert(
            header::ACCESS_CONTROL_REQUEST_HEADERS,
            HeaderValue::from_static("X-Custom"),
        );
        let CorsDecision::Preflight(h) = evaluate(&config(), &Method::OPTIONS, &headers) else {
            panic!("expected preflight");
        };
        assert_eq!(h[header::ACCESS_CONTROL_ALLOW_HEADERS], "X-Custom");
    }

    #[test]
    fn test_apply_keeps_existing_headers() {
        let decision = evaluate(&config(), &Method::GET, &request(Some("http://app.test")));
        let mut response = Response::new(Body::empty());
        response
            .headers_mut()
            .insert(header::ACCESS_CONTROL_EXPOSE_HEADERS, HeaderValue::from_static("X-Mine"));
        apply(&decision, &mut response);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_EXPOSE_HEADERS], "X-Mine");
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://app.test"
        );
    }
}
