use stereocal_3d::calib::{board_object_points, CalibrationFlags, StereoCalibrationParams};
use stereocal_3d::camera::CameraModel;
use stereocal_imgproc::calibration::chessboard::PatternSize;
use stereocal_imgproc::calibration::TermCriteria;

use crate::error::ConfigurationError;

pub use stereocal_imgproc::calibration::chessboard::ChessboardParams as DetectorParams;

/// Inner corner layout and square size of the calibration board.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BoardGeometry {
    /// Inner corners per column.
    pub rows: usize,
    /// Inner corners per row.
    pub cols: usize,
    /// Side of a square, in the unit of the reported translation.
    pub square_size: f64,
}

impl Default for BoardGeometry {
    fn default() -> Self {
        Self {
            rows: 9,
            cols: 6,
            square_size: 1.0,
        }
    }
}

impl BoardGeometry {
    /// Create a board geometry.
    pub fn new(rows: usize, cols: usize, square_size: f64) -> Self {
        Self {
            rows,
            cols,
            square_size,
        }
    }

    /// Corner counts as expected by the detector.
    pub fn pattern_size(&self) -> PatternSize {
        PatternSize {
            cols: self.cols,
            rows: self.rows,
        }
    }

    /// Board coordinates of the inner corners, row-major.
    pub fn object_points(&self) -> Vec<[f64; 3]> {
        board_object_points(self.rows, self.cols, self.square_size)
    }

    /// Check that the board has at least 2x2 corners and a positive square size.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.rows < 2 || self.cols < 2 || self.square_size.is_nan() || self.square_size <= 0.0 {
            return Err(ConfigurationError::InvalidBoardGeometry {
                rows: self.rows,
                cols: self.cols,
                square_size: self.square_size,
            });
        }
        Ok(())
    }
}

/// Which rectification to compute.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RectifyStrategyKind {
    /// Use the solved cameras and relative pose.
    #[default]
    Calibrated,
    /// Use the point correspondences only.
    Uncalibrated,
}

/// Parameters of the rectification stage.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RectifyParams {
    /// Free scaling in `[0, 1]`; negative disables the scaling.
    pub alpha: f64,
    /// Which rectification to compute.
    pub strategy: RectifyStrategyKind,
    /// Epipolar outlier distance of the uncalibrated path, in pixels.
    pub outlier_threshold: f64,
}

impl Default for RectifyParams {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            strategy: RectifyStrategyKind::Calibrated,
            outlier_threshold: stereocal_3d::rectify::DEFAULT_OUTLIER_THRESHOLD,
        }
    }
}

impl RectifyParams {
    /// Set the free scaling parameter.
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    /// Set the rectification strategy.
    pub fn with_strategy(mut self, strategy: RectifyStrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the outlier distance of the uncalibrated path.
    pub fn with_outlier_threshold(mut self, threshold: f64) -> Self {
        self.outlier_threshold = threshold;
        self
    }
}

/// Configuration of a whole calibration run.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct StereoCalibConfig {
    /// Calibration board.
    pub board: BoardGeometry,
    /// Chessboard detector.
    pub detector: DetectorParams,
    /// Parameter constraints of the solver.
    pub flags: CalibrationFlags,
    /// Stopping rule of the solver.
    pub criteria: TermCriteria,
    /// Initial camera models replacing the closed-form seeding.
    pub intrinsic_guess: Option<[CameraModel; 2]>,
    /// Rectification.
    pub rectify: RectifyParams,
}

impl Default for StereoCalibConfig {
    fn default() -> Self {
        let solver = StereoCalibrationParams::default();
        Self {
            board: BoardGeometry::default(),
            detector: DetectorParams::default(),
            flags: solver.flags,
            criteria: solver.criteria,
            intrinsic_guess: None,
            rectify: RectifyParams::default(),
        }
    }
}

impl StereoCalibConfig {
    /// Set the calibration board.
    pub fn with_board(mut self, board: BoardGeometry) -> Self {
        self.board = board;
        self
    }

    /// Set the detector parameters.
    pub fn with_detector(mut self, detector: DetectorParams) -> Self {
        self.detector = detector;
        self
    }

    /// Set the solver constraints.
    pub fn with_flags(mut self, flags: CalibrationFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set the solver stopping rule.
    pub fn with_criteria(mut self, criteria: TermCriteria) -> Self {
        self.criteria = criteria;
        self
    }

    /// Start the solver from known cameras.
    pub fn with_intrinsic_guess(mut self, cameras: [CameraModel; 2]) -> Self {
        self.intrinsic_guess = Some(cameras);
        self
    }

    /// Set the rectification parameters.
    pub fn with_rectify(mut self, rectify: RectifyParams) -> Self {
        self.rectify = rectify;
        self
    }

    /// Solver parameters of this configuration.
    pub fn calibration_params(&self) -> StereoCalibrationParams {
        StereoCalibrationParams {
            flags: self.flags,
            criteria: self.criteria,
            intrinsic_guess: self.intrinsic_guess,
        }
    }

    /// Check every section of the configuration.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.board.validate()?;

        if self.detector.scales.is_empty() {
            return Err(ConfigurationError::InvalidOption(
                "detector.scales",
                "at least one scale is required".to_string(),
            ));
        }
        if self.detector.scales.contains(&0) {
            return Err(ConfigurationError::InvalidOption(
                "detector.scales",
                format!("scales must be positive, got {:?}", self.detector.scales),
            ));
        }
        if self.detector.subpix.half_window == 0 {
            return Err(ConfigurationError::InvalidOption(
                "detector.subpix.half_window",
                "must be positive".to_string(),
            ));
        }

        if self.flags.radial_terms > 6 {
            return Err(ConfigurationError::InvalidOption(
                "flags.radial_terms",
                format!("at most 6 radial coefficients, got {}", self.flags.radial_terms),
            ));
        }
        if self.criteria.max_iterations == 0
            || self.criteria.epsilon.is_nan()
            || self.criteria.epsilon < 0.0
        {
            return Err(ConfigurationError::InvalidOption(
                "criteria",
                format!(
                    "need at least one iteration and a non-negative epsilon, got {:?}",
                    self.criteria
                ),
            ));
        }

        if !self.rectify.alpha.is_finite() {
            return Err(ConfigurationError::InvalidOption(
                "rectify.alpha",
                format!("must be finite, got {}", self.rectify.alpha),
            ));
        }
        Ok(())
    }
}
