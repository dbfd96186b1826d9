use std::{any::Any, sync::Arc};

use super::{MediationError, Mediator, ValueSource, parse_action, required_attribute};
use crate::core::{
    artifacts::{ArtifactError, Position, parser::XmlElement},
    message_context::{MessageContext, PropertyValue},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyAction {
    Set,
    Remove,
}

/// Stores a literal or evaluated value in the message property map.
#[derive(Debug, Clone)]
pub struct PropertyMediator {
    pub name: String,
    pub action: PropertyAction,
    pub source: Option<ValueSource>,
    pub position: Position,
}

impl Mediator for PropertyMediator {
    fn kind(&self) -> &'static str {
        "property"
    }

    fn position(&self) -> &Position {
        &self.position
    }

    fn execute(&self, ctx: &mut MessageContext) -> Result<bool, MediationError> {
        match (self.action, &self.source) {
            (PropertyAction::Remove, _) => {
                ctx.remove_property(&self.name);
            }
            (PropertyAction::Set, Some(ValueSource::Literal(value))) => {
                ctx.set_property(self.name.clone(), value.as_str());
            }
            (PropertyAction::Set, Some(ValueSource::Expression(expression))) => {
                // Keep the result's kind so numbers and booleans stay typed.
                let result = ctx.evaluate_expression(expression).map_err(|source| {
                    MediationError::Expression {
                        position: self.position.clone(),
                        expression: expression.clone(),
                        source,
                    }
                })?;
                ctx.set_property(self.name.clone(), PropertyValue::from(result));
            }
            (PropertyAction::Set, None) => {
                return Err(MediationError::Failed {
                    position: self.position.clone(),
                    message: format!("property '{}' has no value to set", self.name),
                });
            }
        }
        Ok(true)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(super) fn build(
    element: &XmlElement,
    position: Position,
) -> Result<Arc<dyn Mediator>, ArtifactError> {
    let name = required_attribute(element, "name", &position)?.to_string();
    let action = parse_action(element, &position)?;
    let source = ValueSource::from_element(element);
    if action == PropertyAction::Set && source.is_none() {
        return Err(ArtifactError::InvalidElement {
            position,
            element: element.name.clone(),
            message: "value or expression attribute is required".to_string(),
        });
    }
    Ok(Arc::new(PropertyMediator {
        name,
        action,
        source,
        position,
    }))
}
