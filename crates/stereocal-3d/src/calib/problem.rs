//! Reprojection error of one or two cameras observing a set of board views.
//!
//! The full state is laid out as
//! `[camera 0 (12) | camera 1 (12) | relative pose (6) | view poses (6 each)]`,
//! with the second camera and the relative pose only present for stereo problems.
//! A camera block is `[fx, fy, cx, cy, k1, k2, p1, p2, k3, k4, k5, k6]`.
//!
//! The optimizer only sees the free parameters. Each free slot drives one or more
//! entries of the full state with a fixed coefficient, which expresses a fixed
//! aspect ratio or a focal length shared by both cameras.

use stereocal_imgproc::calibration::distortion::PolynomialDistortion;

use super::extrinsics::BoardPose;
use super::projection::project_points;
use super::stereo::CalibrationFlags;
use crate::camera::CameraModel;
use crate::optim::{difference_step, LeastSquaresProblem};
use crate::transforms::rotation_vector_to_matrix;
use crate::CalibError;

const CAMERA_PARAMS: usize = 12;
const POSE_PARAMS: usize = 6;

/// Index of `k1..k6` inside a camera block.
const RADIAL_INDEX: [usize; 6] = [4, 5, 8, 9, 10, 11];
const TANGENTIAL_INDEX: [usize; 2] = [6, 7];

/// Mapping between free parameters and the full state.
#[derive(Debug, Clone)]
pub(crate) struct ParamLayout {
    num_cameras: usize,
    num_views: usize,
    fixed: Vec<f64>,
    slots: Vec<Vec<(usize, f64)>>,
}

impl ParamLayout {
    fn camera_offset(c: usize) -> usize {
        c * CAMERA_PARAMS
    }

    fn relative_offset(&self) -> usize {
        self.num_cameras * CAMERA_PARAMS
    }

    fn view_offset(&self, v: usize) -> usize {
        let relative = if self.num_cameras == 2 { POSE_PARAMS } else { 0 };
        self.num_cameras * CAMERA_PARAMS + relative + v * POSE_PARAMS
    }

    /// Pack the initial state and decide which entries are free.
    pub fn new(
        cameras: &[CameraModel],
        relative: Option<&BoardPose>,
        poses: &[BoardPose],
        flags: &CalibrationFlags,
    ) -> Self {
        let num_cameras = cameras.len();
        let mut layout = Self {
            num_cameras,
            num_views: poses.len(),
            fixed: Vec::new(),
            slots: Vec::new(),
        };

        let mut fixed = Vec::with_capacity(layout.view_offset(poses.len()));
        for cam in cameras {
            let k = &cam.camera_matrix;
            fixed.extend_from_slice(&[k[0][0], k[1][1], k[0][2], k[1][2]]);
            fixed.extend_from_slice(&cam.distortion.coefficients());
        }
        if num_cameras == 2 {
            let rel = relative.copied().unwrap_or_default();
            fixed.extend_from_slice(&rel.rvec);
            fixed.extend_from_slice(&rel.tvec);
        }
        for pose in poses {
            fixed.extend_from_slice(&pose.rvec);
            fixed.extend_from_slice(&pose.tvec);
        }

        let shared_focal = flags.same_focal_length && num_cameras == 2;
        if shared_focal {
            // the second camera starts from the focal length of the first one
            fixed[CAMERA_PARAMS] = fixed[0];
            fixed[CAMERA_PARAMS + 1] = fixed[1];
        }

        let mut slots = Vec::new();
        for c in 0..num_cameras {
            let base = Self::camera_offset(c);

            if flags.zero_tangent_dist {
                for i in TANGENTIAL_INDEX {
                    fixed[base + i] = 0.0;
                }
            }

            if !(shared_focal && c == 1) {
                let aspect = fixed[base + 1] / fixed[base];
                let mut tie = |slot: Vec<(usize, f64)>| {
                    let mut slot = slot;
                    if shared_focal {
                        let twin = slot
                            .iter()
                            .map(|&(i, coef)| (i + CAMERA_PARAMS, coef))
                            .collect::<Vec<_>>();
                        slot.extend(twin);
                    }
                    slots.push(slot);
                };
                if flags.fix_aspect_ratio {
                    tie(vec![(base, 1.0), (base + 1, aspect)]);
                } else {
                    tie(vec![(base, 1.0)]);
                    tie(vec![(base + 1, 1.0)]);
                }
            }

            if !flags.fix_principal_point {
                slots.push(vec![(base + 2, 1.0)]);
                slots.push(vec![(base + 3, 1.0)]);
            }

            if !flags.zero_tangent_dist {
                for i in TANGENTIAL_INDEX {
                    slots.push(vec![(base + i, 1.0)]);
                }
            }

            for &i in RADIAL_INDEX.iter().take(flags.radial_terms.min(6)) {
                slots.push(vec![(base + i, 1.0)]);
            }
        }

        if num_cameras == 2 {
            let off = layout.relative_offset();
            slots.extend((0..POSE_PARAMS).map(|i| vec![(off + i, 1.0)]));
        }
        for v in 0..poses.len() {
            let off = layout.view_offset(v);
            slots.extend((0..POSE_PARAMS).map(|i| vec![(off + i, 1.0)]));
        }

        layout.fixed = fixed;
        layout.slots = slots;
        layout
    }

    /// Number of free parameters.
    pub fn num_free(&self) -> usize {
        self.slots.len()
    }

    /// Free parameter values of the initial state.
    pub fn initial_free(&self) -> Vec<f64> {
        self.slots
            .iter()
            .map(|slot| slot.first().map(|&(i, coef)| self.fixed[i] / coef).unwrap_or(0.0))
            .collect()
    }

    /// Expand free parameters into the full state.
    pub fn unpack(&self, free: &[f64]) -> Vec<f64> {
        let mut full = self.fixed.clone();
        for (slot, value) in self.slots.iter().zip(free.iter()) {
            for &(i, coef) in slot {
                full[i] = value * coef;
            }
        }
        full
    }

    /// Camera `c` of a full state.
    pub fn camera(&self, full: &[f64], c: usize) -> CameraModel {
        let p = &full[Self::camera_offset(c)..Self::camera_offset(c) + CAMERA_PARAMS];
        CameraModel::new(
            [[p[0], 0.0, p[2]], [0.0, p[1], p[3]], [0.0, 0.0, 1.0]],
            PolynomialDistortion::from_coefficients(&p[4..]),
        )
    }

    fn pose_at(full: &[f64], off: usize) -> BoardPose {
        BoardPose {
            rvec: [full[off], full[off + 1], full[off + 2]],
            tvec: [full[off + 3], full[off + 4], full[off + 5]],
        }
    }

    /// Relative pose of a full stereo state.
    pub fn relative(&self, full: &[f64]) -> BoardPose {
        Self::pose_at(full, self.relative_offset())
    }

    /// Board pose of view `v` in the first camera.
    pub fn view(&self, full: &[f64], v: usize) -> BoardPose {
        Self::pose_at(full, self.view_offset(v))
    }

    /// Residual blocks `(camera, view)` that depend on a full state entry.
    fn blocks_of(&self, index: usize) -> Vec<(usize, usize)> {
        let all_views = |c: usize| (0..self.num_views).map(move |v| (c, v));
        if index < self.num_cameras * CAMERA_PARAMS {
            all_views(index / CAMERA_PARAMS).collect()
        } else if index < self.view_offset(0) {
            all_views(1).collect()
        } else {
            let v = (index - self.view_offset(0)) / POSE_PARAMS;
            (0..self.num_cameras).map(|c| (c, v)).collect()
        }
    }
}

/// Reprojection problem over free calibration parameters.
pub(crate) struct ReprojectionProblem<'a> {
    pub layout: ParamLayout,
    object_points: &'a [Vec<[f64; 3]>],
    image_points: Vec<&'a [Vec<[f64; 2]>]>,
    /// Residual offset of view `v`; camera `c` follows at `+ c * 2 * len(view)`.
    view_offsets: Vec<usize>,
    num_residuals: usize,
    /// Blocks touched by each free slot, sorted and deduplicated.
    slot_blocks: Vec<Vec<(usize, usize)>>,
}

impl<'a> ReprojectionProblem<'a> {
    pub fn new(
        layout: ParamLayout,
        object_points: &'a [Vec<[f64; 3]>],
        image_points: Vec<&'a [Vec<[f64; 2]>]>,
    ) -> Self {
        let mut view_offsets = Vec::with_capacity(object_points.len());
        let mut offset = 0;
        for obj in object_points {
            view_offsets.push(offset);
            offset += 2 * obj.len() * layout.num_cameras;
        }

        let slot_blocks = layout
            .slots
            .iter()
            .map(|slot| {
                let mut blocks = slot
                    .iter()
                    .flat_map(|&(i, _)| layout.blocks_of(i))
                    .collect::<Vec<_>>();
                blocks.sort_unstable();
                blocks.dedup();
                blocks
            })
            .collect();

        Self {
            layout,
            object_points,
            image_points,
            view_offsets,
            num_residuals: offset,
            slot_blocks,
        }
    }

    fn block_range(&self, c: usize, v: usize) -> std::ops::Range<usize> {
        let len = 2 * self.object_points[v].len();
        let start = self.view_offsets[v] + c * len;
        start..start + len
    }

    fn block_residuals(&self, full: &[f64], c: usize, v: usize, out: &mut [f64]) {
        let camera = self.layout.camera(full, c);
        let pose = self.layout.view(full, v);
        let (rotation, translation) = if c == 0 {
            (pose.rotation_matrix(), pose.tvec)
        } else {
            let rel = self.layout.relative(full);
            pose.then(&rotation_vector_to_matrix(&rel.rvec), &rel.tvec)
        };

        let projected = project_points(&self.object_points[v], &rotation, &translation, &camera);
        for (k, (p, o)) in projected.iter().zip(self.image_points[c][v].iter()).enumerate() {
            out[2 * k] = p[0] - o[0];
            out[2 * k + 1] = p[1] - o[1];
        }
    }

    /// Sum of squared residuals per view and camera.
    pub fn squared_errors(&self, free: &[f64]) -> Vec<Vec<f64>> {
        let full = self.layout.unpack(free);
        (0..self.object_points.len())
            .map(|v| {
                (0..self.layout.num_cameras)
                    .map(|c| {
                        let mut out = vec![0.0; self.block_range(c, v).len()];
                        self.block_residuals(&full, c, v, &mut out);
                        out.iter().map(|r| r * r).sum()
                    })
                    .collect()
            })
            .collect()
    }
}

impl LeastSquaresProblem for ReprojectionProblem<'_> {
    fn num_params(&self) -> usize {
        self.layout.num_free()
    }

    fn num_residuals(&self) -> usize {
        self.num_residuals
    }

    fn residuals(&self, params: &[f64], out: &mut [f64]) -> Result<(), CalibError> {
        let full = self.layout.unpack(params);
        for v in 0..self.object_points.len() {
            for c in 0..self.layout.num_cameras {
                let range = self.block_range(c, v);
                self.block_residuals(&full, c, v, &mut out[range]);
            }
        }
        Ok(())
    }

    /// Forward differences restricted to the residual blocks each parameter touches.
    fn jacobian(&self, params: &[f64], jac: &mut [f64]) -> Result<(), CalibError> {
        let n = self.num_params();
        jac.iter_mut().for_each(|v| *v = 0.0);

        let mut base = vec![0.0; self.num_residuals];
        self.residuals(params, &mut base)?;

        let mut moved = params.to_vec();
        let mut block = Vec::new();
        for (s, blocks) in self.slot_blocks.iter().enumerate() {
            let h = difference_step(params[s]);
            moved[s] = params[s] + h;
            let full = self.layout.unpack(&moved);
            moved[s] = params[s];

            for &(c, v) in blocks {
                let range = self.block_range(c, v);
                block.resize(range.len(), 0.0);
                self.block_residuals(&full, c, v, &mut block);
                for (k, row) in range.enumerate() {
                    jac[row * n + s] = (block[k] - base[row]) / h;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optim::forward_difference_jacobian;

    fn cameras() -> [CameraModel; 2] {
        [
            CameraModel::new(
                [[500.0, 0.0, 320.0], [0.0, 510.0, 240.0], [0.0, 0.0, 1.0]],
                PolynomialDistortion::from_coefficients(&[-0.1, 0.01, 0.001, 0.002]),
            ),
            CameraModel::new(
                [[505.0, 0.0, 322.0], [0.0, 508.0, 238.0], [0.0, 0.0, 1.0]],
                PolynomialDistortion::default(),
            ),
        ]
    }

    #[test]
    fn test_layout_flags() {
        let cams = cameras();
        let poses = [BoardPose::default(); 3];
        let rel = BoardPose::default();

        let all_free = CalibrationFlags {
            same_focal_length: false,
            fix_aspect_ratio: false,
            zero_tangent_dist: false,
            radial_terms: 3,
            fix_principal_point: false,
            refine_individually: false,
        };
        let layout = ParamLayout::new(&cams, Some(&rel), &poses, &all_free);
        // 2 * (4 + 2 + 3) + 6 + 3 * 6
        assert_eq!(layout.num_free(), 42);

        let constrained = CalibrationFlags {
            same_focal_length: true,
            fix_aspect_ratio: true,
            zero_tangent_dist: true,
            radial_terms: 2,
            fix_principal_point: true,
            refine_individually: false,
        };
        let layout = ParamLayout::new(&cams, Some(&rel), &poses, &constrained);
        // 1 shared focal + 2 * 2 radial + 6 + 18
        assert_eq!(layout.num_free(), 29);

        let mut free = layout.initial_free();
        free[0] = 600.0;
        let full = layout.unpack(&free);
        let (c0, c1) = (layout.camera(&full, 0), layout.camera(&full, 1));
        assert_eq!(c0.camera_matrix[0][0], 600.0);
        assert_eq!(c1.camera_matrix[0][0], 600.0);
        assert!((c0.camera_matrix[1][1] / 600.0 - 510.0 / 500.0).abs() < 1e-12);
        assert_eq!(c1.camera_matrix[1][1], c0.camera_matrix[1][1]);
        assert_eq!(c0.distortion.p1, 0.0);
        assert_eq!(c1.camera_matrix[0][2], 322.0);
    }

    #[test]
    fn test_structured_jacobian_matches_dense() -> Result<(), Box<dyn std::error::Error>> {
        let cams = cameras();
        let obj = vec![crate::calib::board_object_points(3, 4, 0.05); 2];
        let poses = [
            BoardPose {
                rvec: [0.1, -0.2, 0.05],
                tvec: [-0.1, -0.05, 0.6],
            },
            BoardPose {
                rvec: [-0.2, 0.1, 0.0],
                tvec: [-0.05, -0.08, 0.7],
            },
        ];
        let rel = BoardPose {
            rvec: [0.0, 0.02, 0.0],
            tvec: [-0.1, 0.0, 0.0],
        };
        let img = vec![vec![[300.0, 200.0]; 12]; 2];

        let flags = CalibrationFlags {
            same_focal_length: true,
            ..CalibrationFlags::default()
        };
        let layout = ParamLayout::new(&cams, Some(&rel), &poses, &flags);
        let problem = ReprojectionProblem::new(layout, &obj, vec![img.as_slice(), img.as_slice()]);
        let params = problem.layout.initial_free();

        let (m, n) = (problem.num_residuals(), problem.num_params());
        assert_eq!(m, 2 * 2 * 2 * 12);

        let mut structured = vec![0.0; m * n];
        problem.jacobian(&params, &mut structured)?;
        let mut dense = vec![0.0; m * n];
        forward_difference_jacobian(&problem, &params, &mut dense)?;

        for (a, b) in structured.iter().zip(dense.iter()) {
            assert!((a - b).abs() <= 1e-6 * b.abs().max(1.0), "{a} vs {b}");
        }
        Ok(())
    }
}
