use std::{any::Any, sync::Arc};

use bytes::Bytes;

use super::{MediationError, Mediator};
use crate::core::{
    artifacts::{ArtifactError, Position, parser::XmlElement},
    message_context::MessageContext,
    payload::JSON_CONTENT_TYPE,
};

/// Replaces the message body with a fixed template.
#[derive(Debug, Clone)]
pub struct PayloadFactoryMediator {
    pub media_type: String,
    pub format: String,
    pub position: Position,
}

impl Mediator for PayloadFactoryMediator {
    fn kind(&self) -> &'static str {
        "payloadFactory"
    }

    fn position(&self) -> &Position {
        &self.position
    }

    fn execute(&self, ctx: &mut MessageContext) -> Result<bool, MediationError> {
        ctx.set_payload(Bytes::from(self.format.clone()), self.media_type.clone());
        Ok(true)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn media_type(value: &str) -> String {
    match value.trim().to_ascii_lowercase().as_str() {
        "json" => JSON_CONTENT_TYPE.to_string(),
        "xml" => "application/xml".to_string(),
        "text" => "text/plain".to_string(),
        _ => value.trim().to_string(),
    }
}

pub(super) fn build(
    element: &XmlElement,
    position: Position,
) -> Result<Arc<dyn Mediator>, ArtifactError> {
    let format = element.child("format").ok_or_else(|| ArtifactError::InvalidElement {
        position: position.clone(),
        element: element.name.clone(),
        message: "<format> child is required".to_string(),
    })?;
    let media_type = element
        .attribute("media-type")
        .map(media_type)
        .unwrap_or_else(|| JSON_CONTENT_TYPE.to_string());

    Ok(Arc::new(PayloadFactoryMediator {
        media_type,
        format: format.text.trim().to_string(),
        position,
    }))
}
