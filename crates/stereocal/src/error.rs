use std::path::PathBuf;

use stereocal_3d::CalibError;
use stereocal_image::{ImageError, ImageSize};

/// An error returned by an [`ImageLoader`](crate::loader::ImageLoader).
#[derive(thiserror::Error, Debug)]
pub enum ImageLoadError {
    /// Error when the file does not exist.
    #[error("File does not exist: {0}")]
    FileDoesNotExist(PathBuf),

    /// Error when the identifier is unknown to the loader.
    #[error("Unknown image identifier: {0}")]
    UnknownId(String),

    /// Error to read the file.
    #[error("Failed to read the file. {0}")]
    FileError(#[from] std::io::Error),

    /// Error to decode the image.
    #[error("Failed to decode the image. {0}")]
    ImageDecodeError(#[from] ::image::ImageError),

    /// Error to create the image.
    #[error("Failed to create image. {0}")]
    ImageCreationError(#[from] ImageError),
}

/// A problem with one image pair. The pair is excluded and the run goes on.
#[derive(thiserror::Error, Debug)]
pub enum DataError {
    /// An image of the pair could not be loaded.
    #[error("Image {id} could not be loaded. {source}")]
    ImageNotFound {
        /// Identifier of the image.
        id: String,
        /// Reason reported by the loader.
        #[source]
        source: ImageLoadError,
    },

    /// An image does not have the size of the first loaded image.
    #[error("Image {id} has size {got}, different from the first image size {expected}")]
    SizeMismatch {
        /// Identifier of the image.
        id: String,
        /// Size of the first loaded image.
        expected: ImageSize,
        /// Size of this image.
        got: ImageSize,
    },

    /// Board detection failed on an image of the pair.
    #[error("Chessboard detection failed on image {id}. {source}")]
    DetectionFailed {
        /// Identifier of the image.
        id: String,
        /// Error raised by the detector.
        #[source]
        source: ImageError,
    },

    /// The chessboard was not found in an image of the pair.
    #[error("Chessboard corners not found in image {id}")]
    CornersNotFound {
        /// Identifier of the image.
        id: String,
    },
}

/// Invalid input detected before any solving.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ConfigurationError {
    /// The image list must hold pairs.
    #[error("The image list must contain an even number of entries, got {0}")]
    OddImageList(usize),

    /// The board needs at least 2x2 inner corners and a positive square size.
    #[error("Invalid board geometry: {rows}x{cols} inner corners, square size {square_size}")]
    InvalidBoardGeometry {
        /// Inner corners per column.
        rows: usize,
        /// Inner corners per row.
        cols: usize,
        /// Side of a square.
        square_size: f64,
    },

    /// An option is outside its valid range.
    #[error("Invalid option {0}: {1}")]
    InvalidOption(&'static str, String),
}

/// The error type of the calibration pipeline.
#[derive(thiserror::Error, Debug)]
pub enum StereoCalibError {
    /// Invalid configuration or input list.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Too few image pairs survived validation.
    #[error("Too few pairs to run the calibration: {accepted} accepted, at least {required} required")]
    InsufficientData {
        /// Number of accepted pairs.
        accepted: usize,
        /// Minimum number of pairs.
        required: usize,
    },

    /// A stage ran before the one it depends on.
    #[error("Missing {0}, run the previous stage first")]
    MissingStage(&'static str),

    /// No accepted pair has this index.
    #[error("Pair index {index} is out of range, {accepted} pairs were accepted")]
    PairIndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of accepted pairs.
        accepted: usize,
    },

    /// An image needed after validation could not be used.
    #[error(transparent)]
    Data(#[from] DataError),

    /// The solver or rectifier hit a degenerate configuration.
    #[error("Numerical error. {0}")]
    Numerical(#[from] CalibError),

    /// Error in an image operation.
    #[error(transparent)]
    Image(#[from] ImageError),
}
