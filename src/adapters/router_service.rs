//! HTTP surface: dynamic API mounting, request dispatch and server lifecycle.
//!
//! Every registered API becomes a mount keyed by its base path. Requests are
//! matched to the mount with the longest base path that prefixes the request
//! path at a segment boundary; the remainder is routed through the mount's
//! own template table. Mounts can be added while the server runs.
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    Json, Router,
    body::Body,
    extract::{Request, State},
    http::{HeaderName, HeaderValue, Method, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use tokio::{
    net::TcpListener,
    sync::{RwLock, oneshot},
    task::{AbortHandle, JoinHandle},
    time::timeout,
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::{
    adapters::{
        cors,
        middleware::{check_query_contract, parse_query, request_timing_middleware},
    },
    config::ServerConfig,
    core::{
        Api, CorsConfig, MediationEngine, MessageContext, Resource,
        message_context::{HTTP_METHOD, HTTP_PATH, HTTP_REQUEST_BODY, QUERY_PARAMS, URI_PARAMS},
    },
    ports::api_registry::{ApiRegistry, RouterError},
    tracing_setup::create_message_span,
    utils::graceful_shutdown::{GracefulShutdown, ShutdownReason},
};

const INTERNAL_ERROR: &str = "Internal server error";

/// Resources sharing one path template.
struct PathRoute {
    template: String,
    by_method: HashMap<Method, Arc<Resource>>,
    /// Resource declared without a `methods` attribute.
    any_method: Option<Arc<Resource>>,
}

impl PathRoute {
    fn new(template: String) -> Self {
        Self {
            template,
            by_method: HashMap::new(),
            any_method: None,
        }
    }

    fn select(&self, method: &Method) -> Option<&Arc<Resource>> {
        self.by_method
            .get(method)
            .or_else(|| {
                (*method == Method::HEAD)
                    .then(|| self.by_method.get(&Method::GET))
                    .flatten()
            })
            .or(self.any_method.as_ref())
    }

    fn allow_header(&self) -> String {
        let mut methods: Vec<&str> = self.by_method.keys().map(Method::as_str).collect();
        if self.by_method.contains_key(&Method::GET)
            && !self.by_method.contains_key(&Method::HEAD)
        {
            methods.push("HEAD");
        }
        methods.sort_unstable();
        methods.join(", ")
    }
}

/// One registered API.
struct MountedApi {
    name: String,
    base_path: String,
    /// Effective policy, present only when enabled.
    cors: Option<CorsConfig>,
    routes: matchit::Router<usize>,
    paths: Vec<PathRoute>,
}

impl MountedApi {
    fn build(api: &Api, default_cors: Option<&CorsConfig>) -> Result<Self, RouterError> {
        let base_path = api.base_path();
        let cors = api
            .cors
            .clone()
            .or_else(|| default_cors.cloned())
            .filter(|c| c.enabled);

        let mut slots: HashMap<String, usize> = HashMap::new();
        let mut paths: Vec<PathRoute> = Vec::new();
        for resource in &api.resources {
            let resource = Arc::new(resource.clone());
            let mut template = resource.uri_template.path_template.clone();
            if !template.starts_with('/') {
                template.insert(0, '/');
            }
            let slot = *slots.entry(template.clone()).or_insert_with(|| {
                paths.push(PathRoute::new(template.clone()));
                paths.len() - 1
            });
            let route = &mut paths[slot];
            let pattern = format!("{base_path}{template}");

            if resource.methods.is_empty() {
                if route.any_method.replace(Arc::clone(&resource)).is_some() {
                    return Err(RouterError::DuplicateRoute {
                        api: api.name.clone(),
                        method: "*".to_string(),
                        pattern,
                    });
                }
                tracing::info!(api = %api.name, method = "*", %pattern, "route registered");
                continue;
            }
            for method in &resource.methods {
                if route
                    .by_method
                    .insert(method.clone(), Arc::clone(&resource))
                    .is_some()
                {
                    return Err(RouterError::DuplicateRoute {
                        api: api.name.clone(),
                        method: method.to_string(),
                        pattern,
                    });
                }
                tracing::info!(api = %api.name, %method, %pattern, "route registered");
            }
        }

        let mut routes = matchit::Router::new();
        for (index, path) in paths.iter().enumerate() {
            routes
                .insert(path.template.clone(), index)
                .map_err(|e| RouterError::InvalidRoute {
                    api: api.name.clone(),
                    pattern: format!("{base_path}{}", path.template),
                    reason: e.to_string(),
                })?;
        }

        Ok(Self {
            name: api.name.clone(),
            base_path,
            cors,
            routes,
            paths,
        })
    }

    /// Remainder of `path` below this mount, if the mount covers it.
    fn strip<'p>(&self, path: &'p str) -> Option<&'p str> {
        if self.base_path == "/" {
            return Some(path);
        }
        let rest = path.strip_prefix(self.base_path.as_str())?;
        if rest.is_empty() {
            Some("/")
        } else if rest.starts_with('/') {
            Some(rest)
        } else {
            None
        }
    }
}

struct ServerHandle {
    local_addr: SocketAddr,
    /// Cancels the serve loop together with its listener.
    serve: AbortHandle,
    /// Resolves once the serve loop has finished or been aborted.
    monitor: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct RouterState {
    /// Sorted by descending base path length.
    mounts: Vec<Arc<MountedApi>>,
    started: bool,
    server: Option<ServerHandle>,
}

struct Inner {
    config: ServerConfig,
    engine: MediationEngine,
    shutdown: Arc<GracefulShutdown>,
    state: RwLock<RouterState>,
}

/// Registers APIs and serves them over HTTP.
#[derive(Clone)]
pub struct RouterService {
    inner: Arc<Inner>,
}

impl RouterService {
    pub fn new(config: ServerConfig, shutdown: Arc<GracefulShutdown>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                engine: MediationEngine::new(),
                shutdown,
                state: RwLock::new(RouterState::default()),
            }),
        }
    }

    /// The complete axum application: `/livez` plus every mounted API.
    pub fn app(&self) -> Router {
        Router::new()
            .route("/livez", get(livez))
            .fallback(dispatch)
            .with_state(Arc::clone(&self.inner))
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(middleware::from_fn(request_timing_middleware)),
            )
    }

    /// Address the listener is bound to, once started.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.inner
            .state
            .read()
            .await
            .server
            .as_ref()
            .map(|s| s.local_addr)
    }

    pub async fn is_started(&self) -> bool {
        self.inner.state.read().await.started
    }

    /// Base paths currently mounted, longest first.
    pub async fn base_paths(&self) -> Vec<String> {
        self.inner
            .state
            .read()
            .await
            .mounts
            .iter()
            .map(|m| m.base_path.clone())
            .collect()
    }

    pub async fn register_api(&self, api: Api) -> Result<(), RouterError> {
        let mount = Arc::new(MountedApi::build(&api, self.inner.config.cors.as_ref())?);

        let mut state = self.inner.state.write().await;
        if let Some(existing) = state.mounts.iter().find(|m| m.base_path == mount.base_path) {
            return Err(RouterError::DuplicateBasePath {
                api: api.name,
                base_path: mount.base_path.clone(),
                existing: existing.name.clone(),
            });
        }
        state.mounts.push(Arc::clone(&mount));
        state
            .mounts
            .sort_by(|a, b| b.base_path.len().cmp(&a.base_path.len()));
        tracing::info!(
            api = %mount.name,
            base_path = %mount.base_path,
            cors = mount.cors.is_some(),
            "API registered"
        );

        if self.inner.config.auto_start
            && !state.started
            && !self.inner.shutdown.is_shutdown_initiated()
        {
            if let Err(e) = self.start_locked(&mut state).await {
                state.mounts.retain(|m| !Arc::ptr_eq(m, &mount));
                return Err(e);
            }
        }
        Ok(())
    }

    pub async fn start_server(&self) -> Result<SocketAddr, RouterError> {
        let mut state = self.inner.state.write().await;
        if self.inner.shutdown.is_shutdown_initiated() {
            return Err(RouterError::ShuttingDown);
        }
        if let Some(server) = &state.server {
            return Ok(server.local_addr);
        }
        self.start_locked(&mut state).await
    }

    async fn start_locked(&self, state: &mut RouterState) -> Result<SocketAddr, RouterError> {
        if self.inner.shutdown.is_shutdown_initiated() {
            return Err(RouterError::ShuttingDown);
        }

        let address = self.inner.config.listen_address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| RouterError::Bind {
                address: address.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| RouterError::Bind {
            address: address.clone(),
            source,
        })?;

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let app = self.app();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = stop_rx.await;
                })
                .await
        });

        let serve = server.abort_handle();
        let mut token = self.inner.shutdown.shutdown_token();
        let drain = self.inner.config.shutdown_timeout();
        let monitor = tokio::spawn(async move {
            let reason = token.wait_for_shutdown().await;
            tracing::info!(?reason, address = %local_addr, "stopping HTTP server");
            let _ = stop_tx.send(());

            let abort = server.abort_handle();
            match timeout(drain, server).await {
                Ok(Ok(Ok(()))) => tracing::info!(address = %local_addr, "HTTP server stopped"),
                Ok(Ok(Err(e))) => {
                    tracing::error!(error = %e, "HTTP server terminated with error");
                }
                Ok(Err(e)) if e.is_cancelled() => {
                    tracing::warn!(address = %local_addr, "HTTP server aborted before draining");
                }
                Ok(Err(e)) => tracing::error!(error = %e, "HTTP server task failed"),
                Err(_) => {
                    tracing::warn!(?drain, "drain deadline exceeded, aborting connections");
                    abort.abort();
                }
            }
        });

        state.started = true;
        state.server = Some(ServerHandle {
            local_addr,
            serve,
            monitor: Some(monitor),
        });
        tracing::info!(address = %local_addr, "HTTP server started");
        Ok(local_addr)
    }

    /// Stop accepting connections and wait for in-flight requests, for at most
    /// `deadline` (or the configured drain window, whichever ends first).
    /// Requests still running when `deadline` passes are cut off and
    /// `ShutdownTimeout` is returned; the listener is closed either way.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), RouterError> {
        self.inner.shutdown.trigger_shutdown(ShutdownReason::Requested);

        let taken = {
            let mut state = self.inner.state.write().await;
            state
                .server
                .as_mut()
                .and_then(|s| s.monitor.take().map(|monitor| (s.serve.clone(), monitor)))
        };
        let Some((serve, mut monitor)) = taken else {
            return Ok(());
        };

        match timeout(deadline, &mut monitor).await {
            Ok(joined) => joined.map_err(|e| RouterError::Task(e.to_string())),
            Err(_) => {
                tracing::warn!(?deadline, "shutdown deadline exceeded, aborting HTTP server");
                serve.abort();
                monitor
                    .await
                    .map_err(|e| RouterError::Task(e.to_string()))?;
                Err(RouterError::ShutdownTimeout(deadline))
            }
        }
    }
}

#[async_trait]
impl ApiRegistry for RouterService {
    async fn register_api(&self, api: Api) -> Result<(), RouterError> {
        RouterService::register_api(self, api).await
    }

    async fn start_server(&self) -> Result<SocketAddr, RouterError> {
        RouterService::start_server(self).await
    }

    async fn shutdown(&self, deadline: Duration) -> Result<(), RouterError> {
        RouterService::shutdown(self, deadline).await
    }
}

async fn livez() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "UP",
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    }))
}

async fn dispatch(State(inner): State<Arc<Inner>>, req: Request) -> Response {
    let path = req.uri().path().to_string();

    let found = {
        let state = inner.state.read().await;
        state.mounts.iter().find_map(|mount| {
            mount
                .strip(&path)
                .map(|rest| (Arc::clone(mount), rest.to_string()))
        })
    };
    let Some((mount, sub_path)) = found else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let decision = match &mount.cors {
        Some(policy) => cors::evaluate(policy, req.method(), req.headers()),
        None => cors::CorsDecision::Bypass,
    };
    if let Some(response) = cors::short_circuit(&decision) {
        return response;
    }

    let Ok(matched) = mount.routes.at(&sub_path) else {
        let mut response = StatusCode::NOT_FOUND.into_response();
        cors::apply(&decision, &mut response);
        return response;
    };
    let route = &mount.paths[*matched.value];
    let path_params: HashMap<String, String> = matched
        .params
        .iter()
        .map(|(name, value)| {
            let value = urlencoding::decode(value)
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| value.to_string());
            (name.to_string(), value)
        })
        .collect();

    let mut response = match route.select(req.method()) {
        Some(resource) => {
            handle_resource(&inner, &mount.name, Arc::clone(resource), sub_path, path_params, req)
                .await
        }
        None => {
            let mut response = StatusCode::METHOD_NOT_ALLOWED.into_response();
            if let Ok(allow) = HeaderValue::from_str(&route.allow_header()) {
                response.headers_mut().insert(header::ALLOW, allow);
            }
            response
        }
    };
    cors::apply(&decision, &mut response);
    response
}

/// Build the message context a resource's sequences run against.
fn build_message_context(
    method: &Method,
    path: &str,
    content_type: &str,
    body: Bytes,
    path_params: HashMap<String, String>,
    query_params: Option<HashMap<String, String>>,
) -> MessageContext {
    let mut ctx = MessageContext::new(body.clone(), content_type);
    ctx.set_property(HTTP_REQUEST_BODY, body);
    ctx.set_property(HTTP_METHOD, method.as_str());
    ctx.set_property(HTTP_PATH, path);
    ctx.set_property(URI_PARAMS, path_params);
    if let Some(query_params) = query_params {
        ctx.set_property(QUERY_PARAMS, query_params);
    }
    ctx
}

async fn handle_resource(
    inner: &Inner,
    api: &str,
    resource: Arc<Resource>,
    sub_path: String,
    path_params: HashMap<String, String>,
    req: Request,
) -> Response {
    let declared = &resource.uri_template.query_parameters;
    let query = parse_query(req.uri().query());
    let query_params = match check_query_contract(declared, &query) {
        Ok(bound) => (!declared.is_empty()).then_some(bound),
        Err(violation) => {
            tracing::info!(path = %sub_path, %violation, "query contract rejected request");
            return violation.into_response();
        }
    };

    let method = req.method().clone();
    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let limit = inner.config.max_body_bytes;
    let declared_length = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared_length.is_some_and(|len| len > limit) {
        return StatusCode::PAYLOAD_TOO_LARGE.into_response();
    }
    let body = match axum::body::to_bytes(req.into_body(), limit).await {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(error = %e, "failed to read request body");
            return (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR).into_response();
        }
    };

    let mut ctx = build_message_context(
        &method,
        &sub_path,
        &content_type,
        body,
        path_params,
        query_params,
    );
    let message_id = ctx.id();
    let span = create_message_span(api, method.as_str(), &sub_path, &message_id.to_string());
    let engine = inner.engine;
    let outcome = tokio::task::spawn_blocking(move || {
        let outcome = span.in_scope(|| engine.mediate_resource(&resource, &mut ctx));
        (ctx, outcome)
    })
    .await;

    match outcome {
        Ok((ctx, outcome)) if outcome.is_success() => {
            success_response(&ctx, method == Method::HEAD)
        }
        Ok((_, outcome)) => {
            tracing::warn!(%message_id, ?outcome, "mediation faulted");
            (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR).into_response()
        }
        Err(e) => {
            tracing::error!(%message_id, error = %e, "mediation task failed");
            (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR).into_response()
        }
    }
}

fn success_response(ctx: &MessageContext, head: bool) -> Response {
    let body = if head {
        Body::empty()
    } else {
        Body::from(ctx.raw_payload().clone())
    };
    let mut response = Response::new(body);
    let headers = response.headers_mut();
    for (name, value) in &ctx.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!(header = %name, "skipping invalid response header"),
        }
    }
    if !headers.contains_key(header::CONTENT_TYPE)
        && !ctx.content_type().is_empty()
        && !ctx.raw_payload().is_empty()
    {
        if let Ok(value) = HeaderValue::from_str(ctx.content_type()) {
            headers.insert(header::CONTENT_TYPE, value);
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use tower::ServiceExt;

    use super::*;
    use crate::core::{PropertyValue, Position, unmarshal_api};

    fn config() -> ServerConfig {
        ServerConfig {
            hostname: "127.0.0.1".to_string(),
            port: 0,
            auto_start: false,
            ..ServerConfig::default()
        }
    }

    fn service() -> RouterService {
        RouterService::new(config(), Arc::new(GracefulShutdown::new()))
    }

    fn api(xml: &str) -> Api {
        unmarshal_api(xml, &Position::new("test.xml", 1)).unwrap()
    }

    const HELLO: &str = r#"<api name="Hello" context="/hello" version="v1" version-type="url">
    <resource methods="GET" uri-template="/greet/{name}">
        <inSequence>
            <header name="X-Greeting" value="hi"/>
            <payloadFactory media-type="json"><format>{"greeting":"hello"}</format></payloadFactory>
        </inSequence>
    </resource>
    <resource methods="POST" uri-template="/echo">
        <inSequence><log category="DEBUG"><message>echo</message></log></inSequence>
    </resource>
    <resource methods="GET" uri-template="/search?q={query}&amp;page={page}">
        <inSequence><log/></inSequence>
    </resource>
    <resource methods="GET" uri-template="/broken">
        <inSequence><drop/></inSequence>
        <faultSequence><header name="X-Fault" value="yes"/></faultSequence>
    </resource>
</api>"#;

    async fn call(app: Router, request: Request) -> (StatusCode, axum::http::HeaderMap, String) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, String::from_utf8(body.to_vec()).unwrap())
    }

    fn get(uri: &str) -> Request {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_livez() {
        let (status, _, body) = call(service().app(), get("/livez")).await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "UP");
        assert!(chrono::DateTime::parse_from_rfc3339(json["timestamp"].as_str().unwrap()).is_ok());
    }

    #[tokio::test]
    async fn test_url_versioned_resource() {
        let service = service();
        service.register_api(api(HELLO)).await.unwrap();
        assert_eq!(service.base_paths().await, vec!["/hello/v1"]);

        let (status, headers, body) = call(service.app(), get("/hello/v1/greet/ada")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers["x-greeting"], "hi");
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        assert_eq!(body, r#"{"greeting":"hello"}"#);

        let (status, _, _) = call(service.app(), get("/hello/greet/ada")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_context_versioned_resource() {
        let service = service();
        service
            .register_api(api(
                r#"<api name="Ctx" context="/shop/{version}/store"
                        version="2.0" version-type="context">
                    <resource methods="GET" uri-template="/items">
                        <inSequence><log/></inSequence>
                    </resource>
                </api>"#,
            ))
            .await
            .unwrap();

        let (status, _, _) = call(service.app(), get("/shop/2.0/store/items")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_root_context_with_url_version() {
        let service = service();
        service
            .register_api(api(
                r#"<api name="Root" context="/" version="v1" version-type="url">
                    <resource methods="GET" uri-template="/items">
                        <inSequence><log/></inSequence>
                    </resource>
                </api>"#,
            ))
            .await
            .unwrap();
        assert_eq!(service.base_paths().await, vec!["/v1"]);

        let (status, _, _) = call(service.app(), get("/v1/items")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_echoes_request_payload() {
        let service = service();
        service.register_api(api(HELLO)).await.unwrap();

        let request = Request::builder()
            .method(Method::POST)
            .uri("/hello/v1/echo")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"a":1}"#))
            .unwrap();
        let (status, headers, body) = call(service.app(), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        assert_eq!(body, r#"{"a":1}"#);
    }

    #[tokio::test]
    async fn test_method_handling() {
        let service = service();
        service.register_api(api(HELLO)).await.unwrap();

        let request = Request::builder()
            .method(Method::DELETE)
            .uri("/hello/v1/echo")
            .body(Body::empty())
            .unwrap();
        let (status, headers, _) = call(service.app(), request).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(headers[header::ALLOW], "POST");

        let request = Request::builder()
            .method(Method::HEAD)
            .uri("/hello/v1/greet/x")
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = call(service.app(), request).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());

        let (status, _, _) = call(service.app(), get("/hello/v1/unknown")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_query_contract() {
        let service = service();
        service.register_api(api(HELLO)).await.unwrap();

        let (status, _, _) = call(service.app(), get("/hello/v1/search?q=rust&page=2")).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _, body) =
            call(service.app(), get("/hello/v1/search?q=rust&page=2&k=1")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Unsupported query parameter: k");

        let (status, _, body) = call(service.app(), get("/hello/v1/search?q=rust")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Missing required query parameter: page");

        // Undeclared resources accept anything.
        let (status, _, _) = call(service.app(), get("/hello/v1/greet/x?anything=1")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_fault_yields_generic_500() {
        let service = service();
        service.register_api(api(HELLO)).await.unwrap();

        let (status, headers, body) = call(service.app(), get("/hello/v1/broken")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, INTERNAL_ERROR);
        assert!(!headers.contains_key("x-fault"));
    }

    #[tokio::test]
    async fn test_cors_enforced_per_api() {
        let service = service();
        service
            .register_api(api(
                r#"<api name="Cors" context="/cors">
                    <cors enabled="true" allow-origins="*.example.com" expose-headers="X-Total"/>
                    <resource methods="GET" uri-template="/data">
                        <inSequence><log/></inSequence>
                    </resource>
                </api>"#,
            ))
            .await
            .unwrap();
        service.register_api(api(HELLO)).await.unwrap();

        let request = |origin: &str, method: Method| {
            Request::builder()
                .method(method)
                .uri("/cors/data")
                .header(header::ORIGIN, origin)
                .body(Body::empty())
                .unwrap()
        };

        let (status, _, body) = call(service.app(), request("http://evil.test", Method::GET)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body, cors::ORIGIN_NOT_ALLOWED);

        let (status, headers, _) =
            call(service.app(), request("https://app.example.com", Method::GET)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "https://app.example.com");
        assert_eq!(headers[header::ACCESS_CONTROL_EXPOSE_HEADERS], "X-Total");

        let (status, headers, _) =
            call(service.app(), request("https://app.example.com", Method::OPTIONS)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(headers.contains_key(header::ACCESS_CONTROL_ALLOW_METHODS));

        // APIs without a policy ignore Origin entirely.
        let uncors = Request::builder()
            .uri("/hello/v1/greet/x")
            .header(header::ORIGIN, "http://evil.test")
            .body(Body::empty())
            .unwrap();
        let (status, headers, _) = call(service.app(), uncors).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!headers.contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    }

    #[tokio::test]
    async fn test_default_cors_from_config() {
        let config = ServerConfig {
            cors: Some(CorsConfig {
                enabled: true,
                allow_origins: vec!["http://only.test".into()],
                ..CorsConfig::default()
            }),
            ..config()
        };
        let service = RouterService::new(config, Arc::new(GracefulShutdown::new()));
        service.register_api(api(HELLO)).await.unwrap();

        let request = Request::builder()
            .uri("/hello/v1/greet/x")
            .header(header::ORIGIN, "http://other.test")
            .body(Body::empty())
            .unwrap();
        let (status, _, _) = call(service.app(), request).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_longest_base_path_wins() {
        let service = service();
        service
            .register_api(api(
                r#"<api name="Root" context="/"><resource methods="GET" uri-template="/a/b">
                    <inSequence><header name="X-Api" value="root"/></inSequence></resource></api>"#,
            ))
            .await
            .unwrap();
        service
            .register_api(api(
                r#"<api name="Nested" context="/a/"><resource methods="GET" uri-template="/b">
                    <inSequence><header name="X-Api" value="nested"/></inSequence>
                </resource></api>"#,
            ))
            .await
            .unwrap();

        let (_, headers, _) = call(service.app(), get("/a/b")).await;
        assert_eq!(headers["x-api"], "nested");
        // `/ab` is not below `/a`.
        let (status, _, _) = call(service.app(), get("/ab")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_registration_errors() {
        let service = service();
        service.register_api(api(HELLO)).await.unwrap();

        let err = service.register_api(api(HELLO)).await.unwrap_err();
        assert!(matches!(err, RouterError::DuplicateBasePath { .. }));

        let duplicate = api(
            r#"<api name="Dup" context="/dup">
                <resource methods="GET" uri-template="/x"/>
                <resource methods="GET POST" uri-template="/x"/>
            </api>"#,
        );
        assert!(matches!(
            service.register_api(duplicate).await,
            Err(RouterError::DuplicateRoute { .. })
        ));
        assert!(!service.base_paths().await.contains(&"/dup".to_string()));
    }

    #[tokio::test]
    async fn test_concurrent_registration() {
        let service = service();
        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let service = service.clone();
                tokio::spawn(async move {
                    let xml = format!(
                        r#"<api name="Api{i}" context="/api{i}">
                            <resource methods="GET" uri-template="/ping">
                                <inSequence><log/></inSequence>
                            </resource>
                        </api>"#
                    );
                    service.register_api(api(&xml)).await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(service.base_paths().await.len(), 16);
        for i in 0..16 {
            let (status, _, _) = call(service.app(), get(&format!("/api{i}/ping"))).await;
            assert_eq!(status, StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_registration_after_shutdown_never_starts() {
        let shutdown = Arc::new(GracefulShutdown::new());
        let service = RouterService::new(
            ServerConfig {
                auto_start: true,
                ..config()
            },
            Arc::clone(&shutdown),
        );
        service.shutdown(Duration::from_secs(1)).await.unwrap();

        service.register_api(api(HELLO)).await.unwrap();
        assert!(!service.is_started().await);
        assert!(service.local_addr().await.is_none());
        assert!(matches!(
            service.start_server().await,
            Err(RouterError::ShuttingDown)
        ));
    }

    #[test]
    fn test_message_context_properties() {
        let path_params = HashMap::from([("id".to_string(), "42".to_string())]);
        let query = HashMap::from([("mode".to_string(), "full".to_string())]);
        let ctx = build_message_context(
            &Method::POST,
            "/orders/42",
            "application/json",
            Bytes::from_static(b"{}"),
            path_params.clone(),
            Some(query.clone()),
        );

        assert_eq!(ctx.content_type(), "application/json");
        assert_eq!(ctx.property(HTTP_METHOD).and_then(PropertyValue::as_str), Some("POST"));
        assert_eq!(ctx.property(HTTP_PATH).and_then(PropertyValue::as_str), Some("/orders/42"));
        assert_eq!(ctx.property(URI_PARAMS).and_then(PropertyValue::as_map), Some(&path_params));
        assert_eq!(ctx.property(QUERY_PARAMS).and_then(PropertyValue::as_map), Some(&query));
        assert_eq!(
            ctx.property(HTTP_REQUEST_BODY).and_then(PropertyValue::as_bytes),
            Some(&Bytes::from_static(b"{}"))
        );
        assert!(ctx.headers.is_empty());
    }

    #[test]
    fn test_query_params_absent_without_declaration() {
        let ctx = build_message_context(
            &Method::GET,
            "/",
            "",
            Bytes::new(),
            HashMap::new(),
            None,
        );
        assert!(ctx.property(QUERY_PARAMS).is_none());
        assert!(ctx.property(URI_PARAMS).is_some());
    }
}
