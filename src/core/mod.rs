pub mod artifacts;
pub mod expression;
pub mod mediation;
pub mod message_context;
pub mod payload;

pub use artifacts::{Api, ArtifactError, CorsConfig, Position, Resource, Sequence, unmarshal_api};
pub use expression::ExpressionEngine;
pub use mediation::{MediationEngine, MediationOutcome};
pub use message_context::{MessageContext, PropertyValue};
pub use payload::{ExpressionError, PayloadFactory, PayloadObject, QueryResult};
