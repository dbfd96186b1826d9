pub mod api_registry;

pub use api_registry::{ApiRegistry, RouterError};
