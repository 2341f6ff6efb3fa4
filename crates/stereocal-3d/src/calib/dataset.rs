use crate::CalibError;

/// Corresponding board observations of a stereo pair.
///
/// View `v` holds the board points `object_points[v]` and their projections in the
/// first and second camera, `image_points[0][v]` and `image_points[1][v]`.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StereoDataset {
    /// Board points of every view.
    pub object_points: Vec<Vec<[f64; 3]>>,
    /// Detected corners of every view, per camera.
    pub image_points: [Vec<Vec<[f64; 2]>>; 2],
}

impl StereoDataset {
    /// Create an empty dataset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the observations of one view.
    ///
    /// # Errors
    ///
    /// Fails if the three point sequences do not have the same length.
    pub fn push(
        &mut self,
        object_points: Vec<[f64; 3]>,
        left: Vec<[f64; 2]>,
        right: Vec<[f64; 2]>,
    ) -> Result<(), CalibError> {
        if object_points.len() != left.len() {
            return Err(CalibError::LengthMismatch(object_points.len(), left.len()));
        }
        if object_points.len() != right.len() {
            return Err(CalibError::LengthMismatch(object_points.len(), right.len()));
        }

        self.object_points.push(object_points);
        self.image_points[0].push(left);
        self.image_points[1].push(right);
        Ok(())
    }

    /// Number of views.
    pub fn num_views(&self) -> usize {
        self.object_points.len()
    }

    /// Total number of correspondences over all views.
    pub fn num_points(&self) -> usize {
        self.object_points.iter().map(Vec::len).sum()
    }

    /// Image points of all views concatenated, per camera.
    pub fn pooled_points(&self) -> [Vec<[f64; 2]>; 2] {
        [
            self.image_points[0].concat(),
            self.image_points[1].concat(),
        ]
    }

    /// Check that all sequences are consistent.
    pub fn validate(&self) -> Result<(), CalibError> {
        for cam in &self.image_points {
            if cam.len() != self.object_points.len() {
                return Err(CalibError::LengthMismatch(self.object_points.len(), cam.len()));
            }
            for (obj, img) in self.object_points.iter().zip(cam.iter()) {
                if obj.len() != img.len() {
                    return Err(CalibError::LengthMismatch(obj.len(), img.len()));
                }
            }
        }
        Ok(())
    }
}
