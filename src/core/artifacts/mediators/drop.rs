use std::{any::Any, sync::Arc};

use super::{MediationError, Mediator};
use crate::core::{
    artifacts::{ArtifactError, Position, parser::XmlElement},
    message_context::MessageContext,
};

/// Stops the current sequence.
#[derive(Debug, Clone)]
pub struct DropMediator {
    pub position: Position,
}

impl DropMediator {
    pub fn new(position: Position) -> Self {
        Self { position }
    }
}

impl Mediator for DropMediator {
    fn kind(&self) -> &'static str {
        "drop"
    }

    fn position(&self) -> &Position {
        &self.position
    }

    fn execute(&self, ctx: &mut MessageContext) -> Result<bool, MediationError> {
        tracing::debug!(message_id = %ctx.id(), position = %self.position, "message dropped");
        Ok(false)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(super) fn build(
    _element: &XmlElement,
    position: Position,
) -> Result<Arc<dyn Mediator>, ArtifactError> {
    Ok(Arc::new(DropMediator::new(position)))
}
