use sfm_core::LayoutError;
use thiserror::Error;

/// Reasons a forward projection cannot produce a pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DomainError {
    /// The point is on or behind the image plane.
    #[error("point is behind the camera")]
    BehindCamera,
    #[error("projection produced a non-finite value")]
    NonFinite,
}

/// Binding slots of a projection model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Camera,
    Image,
    Point,
    Observation,
}

impl std::fmt::Display for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Binding::Camera => "camera",
            Binding::Image => "image",
            Binding::Point => "point",
            Binding::Observation => "observation",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by projection models and their cost functions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProjectionError {
    /// A camera/image/point/observation binding is missing.
    #[error("{0} binding is not set")]
    Unbound(Binding),
    #[error("residual evaluation failed: {0}")]
    Domain(#[from] DomainError),
    #[error("invalid parameter layout: {0}")]
    Layout(#[from] LayoutError),
    #[error("expected {expected} parameter blocks, got {got}")]
    BlockCount { expected: usize, got: usize },
    #[error("parameter block {index} has {got} values, expected {expected}")]
    BlockSize {
        index: usize,
        expected: usize,
        got: usize,
    },
}
