//! Declarative configuration entities built from XML artifact definitions.
//!
//! Artifacts are parsed once at deployment time (see [`parser`]) and then
//! shared read-only by every request routed to them.
use std::{collections::BTreeMap, fmt, sync::Arc};

use http::Method;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod mediators;
pub mod parser;

pub use mediators::{MediationError, Mediator, MediatorRegistry};
pub use parser::{ApiParser, unmarshal_api};

/// Source location of an artifact or mediator, used in diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Position {
    pub file_name: String,
    pub line_number: usize,
    /// `->`-joined breadcrumb, e.g. `OrderAPI->/orders->inSequence->log`.
    pub hierarchy: String,
}

impl Position {
    pub fn new(file_name: impl Into<String>, line_number: usize) -> Self {
        Self {
            file_name: file_name.into(),
            line_number,
            hierarchy: String::new(),
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let file = if self.file_name.is_empty() {
            "<inline>"
        } else {
            &self.file_name
        };
        if self.hierarchy.is_empty() {
            write!(f, "{file}:{}", self.line_number)
        } else {
            write!(f, "{file}:{} ({})", self.line_number, self.hierarchy)
        }
    }
}

/// Errors detected while parsing artifact definitions. The artifact is
/// rejected as a whole; nothing is partially registered.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ArtifactError {
    #[error("{position}: malformed XML: {message}")]
    Xml { position: Position, message: String },

    #[error("{position}: no <api> element found")]
    MissingApiElement { position: Position },

    #[error("{position}: API context is required")]
    MissingContext { position: Position },

    #[error("{position}: API context must begin with '/' character, got: {context}")]
    ContextWithoutLeadingSlash { position: Position, context: String },

    #[error("{position}: API name is required")]
    MissingName { position: Position },

    #[error("{position}: both version and version-type must be specified together")]
    IncompleteVersion { position: Position },

    #[error("{position}: version-type must be either 'context' or 'url', got: {value}")]
    InvalidVersionType { position: Position, value: String },

    #[error("{position}: invalid HTTP method '{method}'")]
    InvalidMethod { position: Position, method: String },

    #[error("{position}: invalid <{element}> configuration: {message}")]
    InvalidElement {
        position: Position,
        element: String,
        message: String,
    },
}

impl ArtifactError {
    pub fn position(&self) -> &Position {
        match self {
            ArtifactError::Xml { position, .. }
            | ArtifactError::MissingApiElement { position }
            | ArtifactError::MissingContext { position }
            | ArtifactError::ContextWithoutLeadingSlash { position, .. }
            | ArtifactError::MissingName { position }
            | ArtifactError::IncompleteVersion { position }
            | ArtifactError::InvalidVersionType { position, .. }
            | ArtifactError::InvalidMethod { position, .. }
            | ArtifactError::InvalidElement { position, .. } => position,
        }
    }
}

/// How an API version is folded into its base path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionType {
    /// Appended as a trailing `/{version}` segment.
    Url,
    /// Substituted for the `{version}` token inside the context.
    Context,
}

impl VersionType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "url" => Some(Self::Url),
            "context" => Some(Self::Context),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Url => "url",
            Self::Context => "context",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiVersion {
    pub value: String,
    pub version_type: VersionType,
}

/// A deployed API: a context path plus the resources mounted beneath it.
#[derive(Debug, Clone)]
pub struct Api {
    pub context: String,
    pub name: String,
    /// Version and version type are present together or not at all.
    pub version: Option<ApiVersion>,
    pub resources: Vec<Resource>,
    /// CORS policy declared by the artifact, if any.
    pub cors: Option<CorsConfig>,
    pub position: Position,
}

impl Api {
    /// Path under which the API's resources are mounted.
    ///
    /// A single trailing `/` is removed from the context; `url` versioning
    /// appends `/{version}`, `context` versioning replaces the first
    /// `{version}` token (a context without the token is left unchanged).
    pub fn base_path(&self) -> String {
        let mut base = self.context.clone();
        if base.len() > 1 && base.ends_with('/') {
            base.pop();
        }
        match &self.version {
            Some(ApiVersion {
                value,
                version_type: VersionType::Url,
            }) if base == "/" => format!("/{value}"),
            Some(ApiVersion {
                value,
                version_type: VersionType::Url,
            }) => format!("{base}/{value}"),
            Some(ApiVersion {
                value,
                version_type: VersionType::Context,
            }) => base.replacen("{version}", value, 1),
            None => base,
        }
    }

    pub fn version_value(&self) -> Option<&str> {
        self.version.as_ref().map(|v| v.value.as_str())
    }
}

/// Parsed `uri-template`: path part, ordered path parameters and the
/// declared query parameters (declared key to bound variable name).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UriTemplate {
    pub full_template: String,
    pub path_template: String,
    pub path_parameters: Vec<String>,
    pub query_parameters: BTreeMap<String, String>,
}

impl UriTemplate {
    /// Parse templates such as `/orders/{id}?expand={expandMode}&verbose`.
    pub fn parse(template: &str) -> Self {
        let full_template = template.trim().to_string();
        let (path, query) = match full_template.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (full_template.as_str(), None),
        };
        let path_template = if path.is_empty() {
            "/".to_string()
        } else {
            path.to_string()
        };

        let mut path_parameters = Vec::new();
        let mut rest = path_template.as_str();
        while let Some(open) = rest.find('{') {
            let Some(close) = rest[open..].find('}') else {
                break;
            };
            let name = rest[open + 1..open + close].trim().trim_start_matches('*');
            if !name.is_empty() {
                path_parameters.push(name.to_string());
            }
            rest = &rest[open + close + 1..];
        }

        let mut query_parameters = BTreeMap::new();
        for item in query.unwrap_or_default().split('&') {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            let (key, variable) = match item.split_once('=') {
                Some((key, value)) => {
                    let value = value.trim();
                    let variable = value
                        .strip_prefix('{')
                        .and_then(|v| v.strip_suffix('}'))
                        .unwrap_or(value);
                    (key.trim(), variable)
                }
                None => (item, item),
            };
            let variable = if variable.is_empty() { key } else { variable };
            query_parameters.insert(key.to_string(), variable.to_string());
        }

        Self {
            full_template,
            path_template,
            path_parameters,
            query_parameters,
        }
    }
}

/// A routable (methods, URI template) pair with its success and fault pipelines.
#[derive(Debug, Clone)]
pub struct Resource {
    pub methods: Vec<Method>,
    pub uri_template: UriTemplate,
    pub in_sequence: Sequence,
    pub fault_sequence: Sequence,
    pub position: Position,
}

/// Ordered list of mediators.
#[derive(Debug, Clone, Default)]
pub struct Sequence {
    pub mediators: Vec<Arc<dyn Mediator>>,
    pub position: Position,
}

impl Sequence {
    pub fn new(mediators: Vec<Arc<dyn Mediator>>, position: Position) -> Self {
        Self {
            mediators,
            position,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.mediators.is_empty()
    }

    pub fn len(&self) -> usize {
        self.mediators.len()
    }
}

/// Cross-origin policy applied to every resource of an API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub enabled: bool,
    pub allow_origins: Vec<String>,
    pub allow_methods: Vec<String>,
    pub allow_headers: Vec<String>,
    pub expose_headers: Vec<String>,
    pub allow_credentials: bool,
    /// Preflight cache lifetime in seconds; `0` omits the header.
    pub max_age: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allow_origins: vec!["*".to_string()],
            allow_methods: ["GET", "POST", "PUT", "DELETE", "PATCH", "OPTIONS"]
                .into_iter()
                .map(String::from)
                .collect(),
            allow_headers: vec!["Content-Type".to_string(), "Authorization".to_string()],
            expose_headers: Vec::new(),
            allow_credentials: false,
            max_age: 86400,
        }
    }
}

/// Split an origin such as `https://api.example.com:8443` into scheme and host.
fn split_origin(origin: &str) -> (Option<&str>, &str) {
    let (scheme, rest) = match origin.split_once("://") {
        Some((scheme, rest)) => (Some(scheme), rest),
        None => (None, origin),
    };
    let host = rest
        .split(['/', ':'])
        .next()
        .unwrap_or_default();
    (scheme, host)
}

impl CorsConfig {
    pub fn allows_any_origin(&self) -> bool {
        self.allow_origins.iter().any(|o| o == "*")
    }

    /// Match `origin` against the allow-list. Entries are exact origins, `*`,
    /// or `*.domain` (optionally with a scheme, e.g. `https://*.domain`),
    /// which accepts strict subdomains of `domain` but not `domain` itself.
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        self.allow_origins.iter().any(|allowed| {
            if allowed == "*" || allowed.eq_ignore_ascii_case(origin) {
                return true;
            }
            let (allowed_scheme, allowed_host) = split_origin(allowed);
            let Some(domain) = allowed_host.strip_prefix("*.") else {
                return false;
            };
            let (origin_scheme, origin_host) = split_origin(origin);
            if let Some(scheme) = allowed_scheme {
                if !origin_scheme.is_some_and(|s| s.eq_ignore_ascii_case(scheme)) {
                    return false;
                }
            }
            let host = origin_host.to_ascii_lowercase();
            let suffix = format!(".{}", domain.to_ascii_lowercase());
            host.len() > suffix.len() && host.ends_with(&suffix)
        })
    }
}
