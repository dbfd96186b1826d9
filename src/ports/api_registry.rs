use std::{net::SocketAddr, time::Duration};

use async_trait::async_trait;
use thiserror::Error;

use crate::core::Api;

/// Errors raised while registering APIs or driving the server lifecycle.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RouterError {
    #[error("API '{api}' cannot be mounted at '{base_path}': already used by API '{existing}'")]
    DuplicateBasePath {
        api: String,
        base_path: String,
        existing: String,
    },

    #[error("API '{api}' declares {method} {pattern} more than once")]
    DuplicateRoute {
        api: String,
        method: String,
        pattern: String,
    },

    #[error("invalid route '{pattern}' in API '{api}': {reason}")]
    InvalidRoute {
        api: String,
        pattern: String,
        reason: String,
    },

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server cannot start: shutdown already initiated")]
    ShuttingDown,

    #[error("server did not stop within {0:?}")]
    ShutdownTimeout(Duration),

    #[error("server task failed: {0}")]
    Task(String),
}

/// Port through which deployed APIs reach the HTTP surface.
#[async_trait]
pub trait ApiRegistry: Send + Sync {
    /// Mount every resource of `api`. Registration is atomic: on error
    /// nothing of `api` is routable.
    async fn register_api(&self, api: Api) -> Result<(), RouterError>;

    /// Bind and start serving; a no-op returning the bound address when
    /// already running.
    async fn start_server(&self) -> Result<SocketAddr, RouterError>;

    /// Stop accepting connections and wait up to `deadline` for in-flight
    /// requests to finish.
    async fn shutdown(&self, deadline: Duration) -> Result<(), RouterError>;
}
