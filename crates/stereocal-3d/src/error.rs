use stereocal_image::ImageError;

/// An error type for the geometry and calibration routines.
#[derive(thiserror::Error, Debug)]
pub enum CalibError {
    /// Too few points were given to a solver.
    #[error("Need at least {required} {what}, got {got}")]
    NotEnoughPoints {
        /// What was counted.
        what: &'static str,
        /// Minimum number required.
        required: usize,
        /// Number provided.
        got: usize,
    },

    /// Two sequences that must be paired have different lengths.
    #[error("Mismatched lengths: {0} != {1}")]
    LengthMismatch(usize, usize),

    /// The input does not constrain the solution.
    #[error("Degenerate configuration: {0}")]
    Degenerate(String),

    /// A matrix could not be inverted or factorized.
    #[error("Linear system solve failed: {0}")]
    SolveFailed(String),

    /// An argument is out of its valid range.
    #[error("Invalid parameter `{0}`: {1}")]
    InvalidParameter(&'static str, String),

    /// Error raised while building image maps.
    #[error(transparent)]
    Image(#[from] ImageError),
}
