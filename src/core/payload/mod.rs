//! Format-agnostic message payloads.
//!
//! A [`PayloadObject`] wraps a parsed message body and answers queries in the
//! dialect native to its format (XPath for XML, dotted paths for JSON). The
//! [`PayloadFactory`] picks the implementation from a content type; adding a
//! format means adding a module here and one arm to
//! [`PayloadFactory::create_payload`].
use std::{any::Any, fmt};

use serde_json::Value;
use thiserror::Error;

pub mod json;
pub mod xml;

pub use json::JsonPayload;
pub use xml::XmlPayload;

/// Canonical content type reported by XML payloads.
pub const XML_CONTENT_TYPE: &str = "application/xml";
/// Alternative XML content type accepted by the factory.
pub const TEXT_XML_CONTENT_TYPE: &str = "text/xml";
/// Canonical content type reported by JSON payloads.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Errors raised while building payloads or evaluating expressions against them.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExpressionError {
    #[error("unsupported expression: {expression}")]
    UnsupportedExpression { expression: String },

    #[error("unsupported content type: {content_type}")]
    UnsupportedContentType { content_type: String },

    #[error("invalid payload for operation '{operation}' on '{payload_type}': {reason}")]
    InvalidPayloadForOperation {
        operation: &'static str,
        payload_type: String,
        reason: &'static str,
    },

    #[error("pipe operation '{operation}' requires string input from previous step, got {actual}")]
    PipeRequiresString {
        operation: String,
        actual: ResultKind,
    },

    #[error("evaluation failed for expression '{expression}': {reason}")]
    EvaluationFailed { expression: String, reason: String },

    #[error("invalid JSON content: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("XML parsing failed: {0}")]
    InvalidXml(String),

    #[error("error in expression part '{part}': {source}")]
    InPart {
        part: String,
        #[source]
        source: Box<ExpressionError>,
    },
}

impl ExpressionError {
    pub(crate) fn evaluation(expression: &str, reason: impl Into<String>) -> Self {
        Self::EvaluationFailed {
            expression: expression.to_string(),
            reason: reason.into(),
        }
    }

    /// Strip the `InPart` wrappers added while walking a pipe chain.
    pub fn root_cause(&self) -> &ExpressionError {
        match self {
            ExpressionError::InPart { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Kind tag attached to every [`QueryResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    Scalar,
    String,
    Number,
    Boolean,
    Object,
    Array,
    NodeSet,
    Unknown,
}

impl ResultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultKind::Scalar => "scalar",
            ResultKind::String => "string",
            ResultKind::Number => "number",
            ResultKind::Boolean => "boolean",
            ResultKind::Object => "object",
            ResultKind::Array => "array",
            ResultKind::NodeSet => "nodeset",
            ResultKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a query: a dynamic value plus the kind the evaluator assigned to it.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub value: Value,
    pub kind: ResultKind,
}

impl QueryResult {
    pub fn new(value: Value, kind: ResultKind) -> Self {
        Self { value, kind }
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::new(Value::String(value.into()), ResultKind::String)
    }

    pub fn number(value: f64) -> Self {
        Self::new(Value::from(value), ResultKind::Number)
    }

    pub fn boolean(value: bool) -> Self {
        Self::new(Value::Bool(value), ResultKind::Boolean)
    }

    /// The value as a string slice, if it is a JSON string.
    pub fn as_str(&self) -> Option<&str> {
        self.value.as_str()
    }

    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }

    /// Render the value as text: strings verbatim, whole numbers without a
    /// trailing `.0`, everything else as compact JSON.
    pub fn to_text(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            Value::Number(n) => match n.as_f64() {
                Some(f) if n.is_f64() => f.to_string(),
                _ => n.to_string(),
            },
            other => other.to_string(),
        }
    }
}

/// A parsed message body in one specific format.
pub trait PayloadObject: Send + Sync + fmt::Debug {
    /// The bytes the payload was built from.
    fn raw_bytes(&self) -> &[u8];

    /// Normalised content type of this payload.
    fn content_type(&self) -> &str;

    /// Evaluate a format-native query (no `xpath:`/`jsonpath:` prefix).
    fn query(&self, expression: &str) -> Result<QueryResult, ExpressionError>;

    /// The whole payload rendered as text.
    fn as_string(&self) -> Result<String, ExpressionError>;

    /// The parsed representation, for callers that know the concrete format.
    /// JSON payloads expose a `serde_json::Value`, XML payloads the validated
    /// document text as a `String`.
    fn underlying(&self) -> &dyn Any;
}

/// Strip media-type parameters and lower-case, e.g.
/// `"Application/JSON; charset=utf-8"` becomes `"application/json"`.
pub fn normalize_content_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Builds [`PayloadObject`]s keyed on normalised content type.
#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadFactory;

impl PayloadFactory {
    pub fn new() -> Self {
        Self
    }

    /// Parse `raw` according to `content_type`. Invalid documents and unknown
    /// content types fail here rather than at first query.
    pub fn create_payload(
        &self,
        raw: &[u8],
        content_type: &str,
    ) -> Result<Box<dyn PayloadObject>, ExpressionError> {
        match normalize_content_type(content_type).as_str() {
            XML_CONTENT_TYPE | TEXT_XML_CONTENT_TYPE => Ok(Box::new(XmlPayload::new(raw)?)),
            JSON_CONTENT_TYPE => Ok(Box::new(JsonPayload::new(raw)?)),
            _ => Err(ExpressionError::UnsupportedContentType {
                content_type: content_type.to_string(),
            }),
        }
    }
}
