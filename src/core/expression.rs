//! Pipe-chained expression evaluation over payloads.
//!
//! An expression is a bare query followed by zero or more pipe stages:
//!
//! ```text
//! jsonpath:inner | extractAsXML xpath:/a/text()
//! ```
//!
//! The first stage runs against the caller's payload. Every later stage names
//! a transform that re-parses the previous (string) result into a fresh
//! payload of another format, and the rest of the stage is evaluated against
//! that new payload.
use super::payload::{
    ExpressionError, JSON_CONTENT_TYPE, PayloadFactory, PayloadObject, QueryResult,
    TEXT_XML_CONTENT_TYPE, XML_CONTENT_TYPE,
};

pub const XPATH_PREFIX: &str = "xpath:";
pub const JSONPATH_PREFIX: &str = "jsonpath:";

/// Transforms available between pipe stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeOperation {
    ExtractAsJson,
    ExtractAsXml,
}

impl PipeOperation {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "extractAsJSON" => Some(Self::ExtractAsJson),
            "extractAsXML" => Some(Self::ExtractAsXml),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ExtractAsJson => "extractAsJSON",
            Self::ExtractAsXml => "extractAsXML",
        }
    }

    fn target_content_type(&self) -> &'static str {
        match self {
            Self::ExtractAsJson => JSON_CONTENT_TYPE,
            Self::ExtractAsXml => XML_CONTENT_TYPE,
        }
    }
}

/// Stateless evaluator; cheap to copy into every message context.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpressionEngine {
    factory: PayloadFactory,
}

impl ExpressionEngine {
    pub fn new() -> Self {
        Self {
            factory: PayloadFactory::new(),
        }
    }

    /// Evaluate `expression` against `payload`, following pipe stages.
    pub fn evaluate(
        &self,
        payload: &dyn PayloadObject,
        expression: &str,
    ) -> Result<QueryResult, ExpressionError> {
        let mut stages = expression.split('|').map(str::trim);
        let first = stages.next().unwrap_or_default();

        let mut result =
            self.evaluate_single(payload, first)
                .map_err(|e| ExpressionError::InPart {
                    part: first.to_string(),
                    source: Box::new(e),
                })?;

        for stage in stages {
            let input = match result.as_str() {
                Some(s) => s.to_string(),
                None => {
                    return Err(ExpressionError::PipeRequiresString {
                        operation: stage.to_string(),
                        actual: result.kind,
                    });
                }
            };

            let (operation_name, next_expression) = stage
                .split_once(char::is_whitespace)
                .map(|(op, rest)| (op, rest.trim()))
                .filter(|(_, rest)| !rest.is_empty())
                .ok_or_else(|| {
                    ExpressionError::evaluation(
                        expression,
                        format!("invalid pipe operation format: {stage}"),
                    )
                })?;

            let operation = PipeOperation::parse(operation_name).ok_or_else(|| {
                ExpressionError::UnsupportedExpression {
                    expression: format!("unknown pipe operation: {operation_name}"),
                }
            })?;

            let intermediate = self
                .factory
                .create_payload(input.as_bytes(), operation.target_content_type())
                .map_err(|e| {
                    ExpressionError::evaluation(
                        expression,
                        format!(
                            "failed to create intermediate payload for pipe '{}': {e}",
                            operation.name()
                        ),
                    )
                })?;

            result = self
                .evaluate_single(intermediate.as_ref(), next_expression)
                .map_err(|e| ExpressionError::InPart {
                    part: next_expression.to_string(),
                    source: Box::new(e),
                })?;
        }

        Ok(result)
    }

    /// Evaluate one prefixed query, checking the payload format first.
    fn evaluate_single(
        &self,
        payload: &dyn PayloadObject,
        part: &str,
    ) -> Result<QueryResult, ExpressionError> {
        if let Some(xpath) = part.strip_prefix(XPATH_PREFIX) {
            let content_type = payload.content_type();
            if content_type != XML_CONTENT_TYPE && content_type != TEXT_XML_CONTENT_TYPE {
                return Err(ExpressionError::InvalidPayloadForOperation {
                    operation: "XPath",
                    payload_type: content_type.to_string(),
                    reason: "XPath requires XML payload",
                });
            }
            return payload.query(xpath.trim());
        }

        if let Some(path) = part.strip_prefix(JSONPATH_PREFIX) {
            let content_type = payload.content_type();
            if content_type != JSON_CONTENT_TYPE {
                return Err(ExpressionError::InvalidPayloadForOperation {
                    operation: "JSONPath",
                    payload_type: content_type.to_string(),
                    reason: "JSONPath requires JSON payload",
                });
            }
            return payload.query(path.trim());
        }

        Err(ExpressionError::UnsupportedExpression {
            expression: part.to_string(),
        })
    }
}
