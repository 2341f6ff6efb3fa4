use approx::assert_relative_eq;

use stereocal_3d::calib::{
    average_epipolar_error, board_object_points, project_points, stereo_calibrate,
    CalibrationFlags, StereoCalibrationParams, StereoDataset,
};
use stereocal_3d::camera::CameraModel;
use stereocal_3d::linalg::{mat33_mul, mat33_mul_vec3, norm3};
use stereocal_3d::rectify::{CalibratedRectifier, RectificationStrategy, UncalibratedRectifier};
use stereocal_3d::transforms::rotation_vector_to_matrix;
use stereocal_image::ImageSize;
use stereocal_imgproc::calibration::distortion::{undistort_points, PolynomialDistortion};

struct Rig {
    cameras: [CameraModel; 2],
    rotation: [[f64; 3]; 3],
    translation: [f64; 3],
}

fn rig() -> Rig {
    let camera = CameraModel::new(
        [[600.0, 0.0, 322.0], [0.0, 600.0, 238.0], [0.0, 0.0, 1.0]],
        PolynomialDistortion::from_coefficients(&[-0.12, 0.03]),
    );
    let second = CameraModel::new(
        [[600.0, 0.0, 317.0], [0.0, 600.0, 243.0], [0.0, 0.0, 1.0]],
        PolynomialDistortion::from_coefficients(&[-0.1, 0.02]),
    );
    Rig {
        cameras: [camera, second],
        rotation: rotation_vector_to_matrix(&[0.005, -0.02, 0.003]),
        translation: [-0.1, 0.002, 0.001],
    }
}

fn image_size() -> ImageSize {
    [640, 480].into()
}

/// Views of a 6x9 board with 3 cm squares seen by both cameras.
fn dataset(rig: &Rig) -> StereoDataset {
    let obj = board_object_points(6, 9, 0.03);
    let tilts = [
        [0.3, 0.1, 0.02],
        [-0.25, 0.2, -0.05],
        [0.1, -0.35, 0.1],
        [-0.15, -0.2, 0.0],
        [0.35, 0.3, -0.08],
        [0.0, 0.0, 0.15],
    ];
    let mut ds = StereoDataset::new();
    for (i, rvec) in tilts.iter().enumerate() {
        let r0 = rotation_vector_to_matrix(rvec);
        // keep the board centre on the optical axis
        let centre = mat33_mul_vec3(&r0, &[0.12, 0.075, 0.0]);
        let z = 0.55 + 0.05 * i as f64;
        let t0 = [-centre[0], -centre[1], z - centre[2]];

        let r1 = mat33_mul(&rig.rotation, &r0);
        let rt0 = mat33_mul_vec3(&rig.rotation, &t0);
        let t1 = [
            rt0[0] + rig.translation[0],
            rt0[1] + rig.translation[1],
            rt0[2] + rig.translation[2],
        ];

        let left = project_points(&obj, &r0, &t0, &rig.cameras[0]);
        let right = project_points(&obj, &r1, &t1, &rig.cameras[1]);
        ds.push(obj.clone(), left, right).expect("consistent view");
    }
    ds
}

#[test]
fn calibrate_synthetic_rig() -> Result<(), Box<dyn std::error::Error>> {
    let rig = rig();
    let ds = dataset(&rig);
    let flags = CalibrationFlags {
        same_focal_length: false,
        ..Default::default()
    };
    let calib = stereo_calibrate(
        &ds,
        image_size(),
        &StereoCalibrationParams::default().with_flags(flags),
    )?;

    assert!(calib.rms_error < 1e-2, "rms {}", calib.rms_error);
    assert_eq!(calib.per_view_errors.len(), 6);
    for (k, camera) in calib.cameras.iter().enumerate() {
        let truth = &rig.cameras[k];
        assert_relative_eq!(
            camera.camera_matrix[0][0],
            truth.camera_matrix[0][0],
            max_relative = 1e-2
        );
        assert_relative_eq!(camera.camera_matrix[0][2], truth.camera_matrix[0][2], epsilon = 2.0);
        assert_relative_eq!(camera.camera_matrix[1][2], truth.camera_matrix[1][2], epsilon = 2.0);
        assert_relative_eq!(camera.distortion.k1, truth.distortion.k1, epsilon = 1e-2);
        assert_eq!(camera.distortion.p1, 0.0);
    }
    assert_relative_eq!(
        norm3(&calib.translation),
        norm3(&rig.translation),
        max_relative = 1e-2
    );
    assert!(calib.translation[0] < 0.0);

    let err = average_epipolar_error(&ds, &calib.cameras, &calib.fundamental);
    assert!(err < 0.05, "epipolar error {err}");
    Ok(())
}

#[test]
fn rectify_calibrated_rig() -> Result<(), Box<dyn std::error::Error>> {
    let rig = rig();
    let ds = dataset(&rig);
    let model = CalibratedRectifier::new(rig.rotation, rig.translation)
        .rectify(&rig.cameras, image_size())?;
    assert!(!model.is_vertical_stereo());
    let roi = model.valid_roi.ok_or("calibrated rigs have a valid region")?;
    assert!(roi.iter().all(|r| !r.is_empty()));

    for (left, right) in ds.image_points[0].iter().zip(ds.image_points[1].iter()) {
        let a = undistort_points(
            left,
            &rig.cameras[0].intrinsic(),
            &rig.cameras[0].distortion,
            Some(&model.rectification[0]),
            Some(&model.camera_matrix(0)),
        );
        let b = undistort_points(
            right,
            &rig.cameras[1].intrinsic(),
            &rig.cameras[1].distortion,
            Some(&model.rectification[1]),
            Some(&model.camera_matrix(1)),
        );
        for (p, q) in a.iter().zip(b.iter()) {
            assert!((p[1] - q[1]).abs() < 1e-4, "{p:?} vs {q:?}");
        }
    }
    Ok(())
}

#[test]
fn rectify_without_calibration() -> Result<(), Box<dyn std::error::Error>> {
    let rig = rig();
    let ideal = Rig {
        cameras: rig.cameras.map(|c| CameraModel::new(c.camera_matrix, Default::default())),
        ..rig
    };
    let ds = dataset(&ideal);
    let nominal = CameraModel::nominal(image_size());
    let model = UncalibratedRectifier::from_dataset(&ds).rectify(&[nominal, nominal], image_size())?;
    assert!(model.disparity_to_depth.is_none());

    let [first, second] = ds.pooled_points();
    let a = undistort_points(
        &first,
        &nominal.intrinsic(),
        &nominal.distortion,
        Some(&model.rectification[0]),
        Some(&model.camera_matrix(0)),
    );
    let b = undistort_points(
        &second,
        &nominal.intrinsic(),
        &nominal.distortion,
        Some(&model.rectification[1]),
        Some(&model.camera_matrix(1)),
    );
    let worst = a
        .iter()
        .zip(b.iter())
        .map(|(p, q)| (p[1] - q[1]).abs())
        .fold(0.0, f64::max);
    assert!(worst < 1e-3, "row mismatch {worst}");
    Ok(())
}
