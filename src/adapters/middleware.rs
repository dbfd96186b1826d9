//! Request-level helpers shared by every mounted API: access timing on the
//! outer router and the query-parameter contract checked before a resource
//! runs.
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
    time::Instant,
};

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};

/// Log the outcome and latency of every request.
pub async fn request_timing_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let version = req.version();

    let response = next.run(req).await;

    tracing::info!(
        %method,
        %path,
        ?version,
        status = response.status().as_u16(),
        elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
        "request completed"
    );
    response
}

/// Why a request's query string does not match a resource's declared keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryViolation {
    Unsupported(String),
    Missing(String),
}

impl fmt::Display for QueryViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryViolation::Unsupported(key) => write!(f, "Unsupported query parameter: {key}"),
            QueryViolation::Missing(key) => write!(f, "Missing required query parameter: {key}"),
        }
    }
}

impl IntoResponse for QueryViolation {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, self.to_string()).into_response()
    }
}

/// Decoded query string, keeping every value of repeated keys in order.
pub fn parse_query(query: Option<&str>) -> BTreeMap<String, Vec<String>> {
    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in url::form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
        params.entry(key.into_owned()).or_default().push(value.into_owned());
    }
    params
}

/// Enforce that the request's query keys are exactly the declared keys.
///
/// `declared` maps each accepted key to the variable it binds. An empty
/// declaration accepts anything and binds nothing. On success returns
/// variable name to first value.
pub fn check_query_contract(
    declared: &BTreeMap<String, String>,
    params: &BTreeMap<String, Vec<String>>,
) -> Result<HashMap<String, String>, QueryViolation> {
    if declared.is_empty() {
        return Ok(HashMap::new());
    }

    let declared_keys: BTreeSet<&str> = declared.keys().map(String::as_str).collect();
    if let Some(key) = params.keys().find(|k| !declared_keys.contains(k.as_str())) {
        tracing::debug!(key = %key, "query contract: undeclared parameter");
        return Err(QueryViolation::Unsupported(key.clone()));
    }

    let mut bound = HashMap::with_capacity(declared.len());
    for (key, variable) in declared {
        let value = params
            .get(key)
            .and_then(|values| values.first())
            .ok_or_else(|| {
                tracing::debug!(key = %key, "query contract: missing parameter");
                QueryViolation::Missing(key.clone())
            })?;
        bound.insert(variable.clone(), value.clone());
    }
    Ok(bound)
}

#[cfg(test)]
mod tests {
    use axum::{Router, body::Body, middleware, routing::get};
    use tower::ServiceExt;

    use super::*;

    fn declared(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_query_decodes_and_groups() {
        let params = parse_query(Some("a=1&b=hello%20world&a=2&flag"));
        assert_eq!(params["a"], vec!["1", "2"]);
        assert_eq!(params["b"], vec!["hello world"]);
        assert_eq!(params["flag"], vec![""]);
        assert!(parse_query(None).is_empty());
    }

    #[test]
    fn test_exact_key_set_binds_variables() {
        let contract = declared(&[("expand", "mode"), ("limit", "limit")]);
        let bound =
            check_query_contract(&contract, &parse_query(Some("limit=5&expand=full&limit=9")))
                .unwrap();
        assert_eq!(bound["mode"], "full");
        assert_eq!(bound["limit"], "5");
    }

    #[test]
    fn test_undeclared_key_rejected() {
        let contract = declared(&[("a", "a")]);
        let err = check_query_contract(&contract, &parse_query(Some("a=1&k=2"))).unwrap_err();
        assert_eq!(err.to_string(), "Unsupported query parameter: k");
    }

    #[test]
    fn test_missing_key_rejected() {
        let contract = declared(&[("a", "a"), ("b", "b")]);
        let err = check_query_contract(&contract, &parse_query(Some("a=1"))).unwrap_err();
        assert_eq!(err, QueryViolation::Missing("b".into()));
    }

    #[test]
    fn test_no_declaration_accepts_anything() {
        let bound =
            check_query_contract(&BTreeMap::new(), &parse_query(Some("anything=1"))).unwrap();
        assert!(bound.is_empty());
    }

    #[tokio::test]
    async fn test_request_timing_passes_response_through() {
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(middleware::from_fn(request_timing_middleware));

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
