//! Per-message mutable state shared by the mediators of one pipeline run.
use std::{any::Any, collections::HashMap, fmt, sync::Arc};

use bytes::Bytes;
use parking_lot::RwLock;
use uuid::Uuid;

use super::{
    expression::ExpressionEngine,
    payload::{ExpressionError, PayloadFactory, PayloadObject, QueryResult, ResultKind},
};

/// Property key holding the inbound request body.
pub const HTTP_REQUEST_BODY: &str = "http_request_body";
/// Property key holding the inbound request method.
pub const HTTP_METHOD: &str = "http_method";
/// Property key holding the request path as seen by the resource.
pub const HTTP_PATH: &str = "http_path";
/// Property key holding bound URI template path parameters.
pub const URI_PARAMS: &str = "uriParams";
/// Property key holding bound query parameters (variable name to value).
pub const QUERY_PARAMS: &str = "queryParams";

/// Values that can be stored in the message property map.
#[derive(Clone)]
pub enum PropertyValue {
    Bytes(Bytes),
    String(String),
    Number(f64),
    Bool(bool),
    Map(HashMap<String, String>),
    /// Opaque handle for collaborators that need to pass state between mediators.
    Handle(Arc<dyn Any + Send + Sync>),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            PropertyValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&HashMap<String, String>> {
        match self {
            PropertyValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            PropertyValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Textual form used when a property is copied into a header or logged.
    pub fn to_text(&self) -> String {
        match self {
            PropertyValue::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            PropertyValue::String(s) => s.clone(),
            PropertyValue::Number(n) => n.to_string(),
            PropertyValue::Bool(b) => b.to_string(),
            PropertyValue::Map(m) => {
                let mut pairs: Vec<_> = m.iter().map(|(k, v)| format!("{k}={v}")).collect();
                pairs.sort();
                pairs.join("&")
            }
            PropertyValue::Handle(_) => "<handle>".to_string(),
        }
    }
}

impl fmt::Debug for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            PropertyValue::String(s) => f.debug_tuple("String").field(s).finish(),
            PropertyValue::Number(n) => f.debug_tuple("Number").field(n).finish(),
            PropertyValue::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            PropertyValue::Map(m) => f.debug_tuple("Map").field(m).finish(),
            PropertyValue::Handle(_) => f.write_str("Handle(..)"),
        }
    }
}

impl PartialEq for PropertyValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            (Self::Handle(a), Self::Handle(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<Bytes> for PropertyValue {
    fn from(value: Bytes) -> Self {
        PropertyValue::Bytes(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Number(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<HashMap<String, String>> for PropertyValue {
    fn from(value: HashMap<String, String>) -> Self {
        PropertyValue::Map(value)
    }
}

impl From<QueryResult> for PropertyValue {
    fn from(result: QueryResult) -> Self {
        match (result.kind, &result.value) {
            (ResultKind::Number, serde_json::Value::Number(n)) => {
                n.as_f64().map_or_else(|| result.to_text().into(), PropertyValue::Number)
            }
            (ResultKind::Boolean, serde_json::Value::Bool(b)) => PropertyValue::Bool(*b),
            _ => PropertyValue::String(result.to_text()),
        }
    }
}

/// Mutable state for one message travelling through a mediation pipeline.
///
/// The parsed payload is created lazily on first use and cached until the raw
/// payload is replaced with [`MessageContext::set_payload`].
pub struct MessageContext {
    id: Uuid,
    raw_payload: Bytes,
    content_type: String,
    pub headers: HashMap<String, String>,
    pub properties: HashMap<String, PropertyValue>,
    processed_payload: RwLock<Option<Arc<dyn PayloadObject>>>,
    engine: ExpressionEngine,
    payload_factory: PayloadFactory,
}

impl MessageContext {
    pub fn new(raw_payload: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self::with_engine(raw_payload, content_type, ExpressionEngine::new())
    }

    pub fn with_engine(
        raw_payload: impl Into<Bytes>,
        content_type: impl Into<String>,
        engine: ExpressionEngine,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            raw_payload: raw_payload.into(),
            content_type: content_type.into(),
            headers: HashMap::new(),
            properties: HashMap::new(),
            processed_payload: RwLock::new(None),
            engine,
            payload_factory: PayloadFactory::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn raw_payload(&self) -> &Bytes {
        &self.raw_payload
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Replace the message body. Drops the cached parsed payload and records
    /// the new content type as the outbound `Content-Type` header.
    pub fn set_payload(&mut self, raw_payload: impl Into<Bytes>, content_type: impl Into<String>) {
        self.raw_payload = raw_payload.into();
        self.content_type = content_type.into();
        *self.processed_payload.get_mut() = None;
        let content_type = self.content_type.clone();
        self.set_header("Content-Type", content_type);
    }

    /// Set a header, replacing any existing entry whose name differs only by case.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|k, _| !k.eq_ignore_ascii_case(&name));
        self.headers.insert(name, value.into());
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers.retain(|k, _| !k.eq_ignore_ascii_case(name));
    }

    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<PropertyValue>) {
        self.properties.insert(name.into(), value.into());
    }

    pub fn remove_property(&mut self, name: &str) -> Option<PropertyValue> {
        self.properties.remove(name)
    }

    /// Parse the raw payload once and hand out the cached object.
    fn ensure_payload_parsed(&self) -> Result<Arc<dyn PayloadObject>, ExpressionError> {
        if let Some(payload) = self.processed_payload.read().as_ref() {
            return Ok(Arc::clone(payload));
        }

        let mut slot = self.processed_payload.write();
        // Another reader may have populated the slot between the two locks.
        if let Some(payload) = slot.as_ref() {
            return Ok(Arc::clone(payload));
        }

        let payload: Arc<dyn PayloadObject> = Arc::from(
            self.payload_factory
                .create_payload(&self.raw_payload, &self.content_type)?,
        );
        tracing::debug!(
            message_id = %self.id,
            content_type = %self.content_type,
            "payload parsed and cached"
        );
        *slot = Some(Arc::clone(&payload));
        Ok(payload)
    }

    /// Evaluate an expression against the message payload.
    pub fn evaluate_expression(&self, expression: &str) -> Result<QueryResult, ExpressionError> {
        let payload = self.ensure_payload_parsed()?;
        self.engine.evaluate(payload.as_ref(), expression)
    }

    /// The lazily parsed payload object.
    pub fn processed_payload(&self) -> Result<Arc<dyn PayloadObject>, ExpressionError> {
        self.ensure_payload_parsed()
    }
}

impl Default for MessageContext {
    fn default() -> Self {
        Self::new(Bytes::new(), String::new())
    }
}

impl fmt::Debug for MessageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageContext")
            .field("id", &self.id)
            .field("content_type", &self.content_type)
            .field("payload_len", &self.raw_payload.len())
            .field("headers", &self.headers)
            .field("properties", &self.properties)
            .finish()
    }
}
