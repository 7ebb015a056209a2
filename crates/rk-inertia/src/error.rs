//! Crate-level error type

use crate::config::ConfigError;
use crate::engine::GeometryError;
use crate::urdf::UrdfError;

/// Any failure of an analysis run
#[derive(Debug, Clone, thiserror::Error)]
pub enum InertiaError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Urdf(#[from] UrdfError),
}

pub type InertiaResult<T> = Result<T, InertiaError>;
