//! Synapse Gateway - a message mediation gateway.
//!
//! APIs are declared as XML artifacts: an `<api>` element with a context path,
//! an optional version and CORS policy, and `<resource>` children. Each
//! resource binds HTTP methods and a URI template to an in-sequence of
//! mediators (log, property, header, payloadFactory, drop) and a fault
//! sequence that runs when the in-sequence stops.
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use synapse_gateway::{GracefulShutdown, RouterService, config::ServerConfig, unmarshal_api};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let api = unmarshal_api(
//!     r#"<api name="Hello" context="/hello">
//!         <resource methods="GET" uri-template="/">
//!             <inSequence>
//!                 <payloadFactory media-type="json">
//!                     <format>{"hello":"world"}</format>
//!                 </payloadFactory>
//!             </inSequence>
//!         </resource>
//!     </api>"#,
//!     &Default::default(),
//! )?;
//!
//! let router = RouterService::new(ServerConfig::default(), Arc::new(GracefulShutdown::new()));
//! router.register_api(api).await?;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! `core` holds the artifact model, the payload/expression engines and the
//! mediation engine; it performs no I/O. `adapters` put it on the network
//! through axum, behind the traits in `ports`.
//!
//! # Error Handling
//! Library operations return domain errors (`ArtifactError`,
//! `ExpressionError`, `MediationError`, `RouterError`, `ValidationError`).
//! Start-up code uses `eyre::Result` with `WrapErr` context.
pub mod config;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::{ArtifactDeployer, RouterService},
    core::{Api, MediationEngine, MessageContext, unmarshal_api},
    ports::{ApiRegistry, RouterError},
    utils::GracefulShutdown,
};
