//! Mediators: the individual processing steps of a sequence.
//!
//! Each kind lives in its own module and is wired into the parser through a
//! [`MediatorRegistry`] entry keyed by XML element name. The mediation engine
//! only ever sees `Arc<dyn Mediator>`, so new kinds never touch dispatch.
use std::{any::Any, collections::HashMap, fmt, sync::Arc};

use thiserror::Error;

use super::{ArtifactError, Position, parser::XmlElement};
use crate::core::{message_context::MessageContext, payload::ExpressionError};

pub mod drop;
pub mod header;
pub mod log;
pub mod payload_factory;
pub mod property;

pub use drop::DropMediator;
pub use header::HeaderMediator;
pub use log::{LogCategory, LogLevel, LogMediator};
pub use payload_factory::PayloadFactoryMediator;
pub use property::{PropertyAction, PropertyMediator};

/// Why a mediator could not process a message.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MediationError {
    #[error("{position}: expression '{expression}' failed: {source}")]
    Expression {
        position: Position,
        expression: String,
        #[source]
        source: ExpressionError,
    },

    #[error("{position}: {message}")]
    Failed { position: Position, message: String },
}

impl MediationError {
    pub fn position(&self) -> &Position {
        match self {
            MediationError::Expression { position, .. }
            | MediationError::Failed { position, .. } => position,
        }
    }
}

/// One step of a sequence.
///
/// `execute` returns `Ok(true)` to continue with the next mediator and
/// `Ok(false)` to stop the sequence; an error also stops it. Either way a
/// stopped in-sequence hands the message to the fault sequence.
pub trait Mediator: Send + Sync + fmt::Debug {
    /// XML element name the mediator was built from.
    fn kind(&self) -> &'static str;

    fn position(&self) -> &Position;

    fn execute(&self, ctx: &mut MessageContext) -> Result<bool, MediationError>;

    /// Downcast support for diagnostics and tests.
    fn as_any(&self) -> &dyn Any;
}

/// Builds a mediator from its parsed element.
pub type MediatorBuilder = fn(&XmlElement, Position) -> Result<Arc<dyn Mediator>, ArtifactError>;

/// Element-name to builder table consulted by the artifact parser.
#[derive(Clone)]
pub struct MediatorRegistry {
    builders: HashMap<&'static str, MediatorBuilder>,
}

impl MediatorRegistry {
    pub fn empty() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    /// Registry with every built-in mediator.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register("log", log::build);
        registry.register("property", property::build);
        registry.register("header", header::build);
        registry.register("payloadFactory", payload_factory::build);
        registry.register("drop", drop::build);
        registry
    }

    /// Add or replace the builder for `element`.
    pub fn register(&mut self, element: &'static str, builder: MediatorBuilder) {
        self.builders.insert(element, builder);
    }

    pub fn contains(&self, element: &str) -> bool {
        self.builders.contains_key(element)
    }

    /// `None` when no mediator is registered under the element's name.
    pub fn build(
        &self,
        element: &XmlElement,
        position: Position,
    ) -> Option<Result<Arc<dyn Mediator>, ArtifactError>> {
        self.builders
            .get(element.name.as_str())
            .map(|builder| builder(element, position))
    }
}

impl Default for MediatorRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Debug for MediatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.builders.keys().collect();
        names.sort();
        f.debug_struct("MediatorRegistry")
            .field("mediators", &names)
            .finish()
    }
}

/// Literal value or expression source shared by the property and header mediators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    Literal(String),
    Expression(String),
}

impl ValueSource {
    /// Read `value`/`expression` from an element; `None` when neither is present.
    pub(crate) fn from_element(element: &XmlElement) -> Option<Self> {
        element
            .attribute("expression")
            .map(|e| Self::Expression(e.to_string()))
            .or_else(|| element.attribute("value").map(|v| Self::Literal(v.to_string())))
    }

    /// Resolve to text, evaluating expressions against the message payload.
    pub(crate) fn resolve_text(
        &self,
        ctx: &MessageContext,
        position: &Position,
    ) -> Result<String, MediationError> {
        match self {
            ValueSource::Literal(value) => Ok(value.clone()),
            ValueSource::Expression(expression) => ctx
                .evaluate_expression(expression)
                .map(|result| result.to_text())
                .map_err(|source| MediationError::Expression {
                    position: position.clone(),
                    expression: expression.clone(),
                    source,
                }),
        }
    }
}

/// Set or remove, shared by the property and header mediators.
pub(crate) fn parse_action(
    element: &XmlElement,
    position: &Position,
) -> Result<PropertyAction, ArtifactError> {
    match element.attribute("action").unwrap_or("set") {
        "set" => Ok(PropertyAction::Set),
        "remove" => Ok(PropertyAction::Remove),
        other => Err(ArtifactError::InvalidElement {
            position: position.clone(),
            element: element.name.clone(),
            message: format!("action must be 'set' or 'remove', got: {other}"),
        }),
    }
}

pub(crate) fn required_attribute<'a>(
    element: &'a XmlElement,
    attribute: &str,
    position: &Position,
) -> Result<&'a str, ArtifactError> {
    element
        .attribute(attribute)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ArtifactError::InvalidElement {
            position: position.clone(),
            element: element.name.clone(),
            message: format!("{attribute} attribute is required"),
        })
}
