//! Top-level error aggregation (§10.2).
//!
//! Each subsystem raises its own typed error (`ConfigError`,
//! `RegistryError`, `DispatchError`, `ValidationError`, `DiscoveryError`);
//! this module composes them into the single error type a `Router`
//! operation can fail with, mirroring the way gotham's middleware chain
//! wraps per-stage errors into one enum rather than flattening them into a
//! string.

use thiserror::Error;

use crate::config::ConfigError;
use crate::discovery::DiscoveryError;
use crate::middleware::{DispatchError, RegistryError};
use crate::params::ValidationError;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("route configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("middleware registry: {0}")]
    Registry(#[from] RegistryError),
    #[error("middleware dispatch: {0}")]
    Dispatch(#[from] DispatchError),
    #[error("parameter validation: {0}")]
    Validation(#[from] ValidationError),
    #[error("route discovery: {0}")]
    Discovery(#[from] DiscoveryError),
    #[error("no route matched {0:?}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, RouterError>;
