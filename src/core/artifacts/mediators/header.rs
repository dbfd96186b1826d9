use std::{any::Any, sync::Arc};

use http::HeaderName;

use super::{
    MediationError, Mediator, PropertyAction, ValueSource, parse_action, required_attribute,
};
use crate::core::{
    artifacts::{ArtifactError, Position, parser::XmlElement},
    message_context::MessageContext,
};

/// Sets or removes an outbound header.
#[derive(Debug, Clone)]
pub struct HeaderMediator {
    pub name: String,
    pub action: PropertyAction,
    pub source: Option<ValueSource>,
    pub position: Position,
}

impl Mediator for HeaderMediator {
    fn kind(&self) -> &'static str {
        "header"
    }

    fn position(&self) -> &Position {
        &self.position
    }

    fn execute(&self, ctx: &mut MessageContext) -> Result<bool, MediationError> {
        match (self.action, &self.source) {
            (PropertyAction::Remove, _) => ctx.remove_header(&self.name),
            (PropertyAction::Set, Some(source)) => {
                let value = source.resolve_text(ctx, &self.position)?;
                ctx.set_header(self.name.clone(), value);
            }
            (PropertyAction::Set, None) => {
                return Err(MediationError::Failed {
                    position: self.position.clone(),
                    message: format!("header '{}' has no value to set", self.name),
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
    if HeaderName::from_bytes(name.as_bytes()).is_err() {
        return Err(ArtifactError::InvalidElement {
            position,
            element: element.name.clone(),
            message: format!("invalid header name: {name}"),
        });
    }
    let action = parse_action(element, &position)?;
    let source = ValueSource::from_element(element);
    if action == PropertyAction::Set && source.is_none() {
        return Err(ArtifactError::InvalidElement {
            position,
            element: element.name.clone(),
            message: "value or expression attribute is required".to_string(),
        });
    }
    Ok(Arc::new(HeaderMediator {
        name,
        action,
        source,
        position,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(attributes: &[(&str, &str)]) -> XmlElement {
        let mut element = XmlElement::new("header", 1);
        element.attributes = attributes
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        element
    }

    #[test]
    fn test_set_from_xpath() {
        let mediator = build(
            &element(&[("name", "X-Customer"), ("expression", "xpath:/order/customer")]),
            Position::default(),
        )
        .unwrap();
        let mut ctx = MessageContext::new(
            "<order><customer>ada</customer></order>",
            "application/xml",
        );
        assert!(mediator.execute(&mut ctx).unwrap());
        assert_eq!(ctx.header("x-customer"), Some("ada"));
    }

    #[test]
    fn test_remove_is_case_insensitive() {
        let xml = element(&[("name", "x-debug"), ("action", "remove")]);
        let mediator = build(&xml, Position::default()).unwrap();
        let mut ctx = MessageContext::default();
        ctx.set_header("X-Debug", "on");
        mediator.execute(&mut ctx).unwrap();
        assert!(ctx.header("X-Debug").is_none());
    }

    #[test]
    fn test_rejects_invalid_name() {
        let xml = element(&[("name", "bad header"), ("value", "1")]);
        assert!(build(&xml, Position::default()).is_err());
    }
}
