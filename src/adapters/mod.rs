pub mod cors;
pub mod deployer;
pub mod middleware;
pub mod router_service;

pub use deployer::ArtifactDeployer;
pub use router_service::RouterService;
