#![allow(dead_code)]

use stereocal::config::BoardGeometry;
use stereocal::image::{Image, ImageError, ImageSize};
use stereocal::imgproc::calibration::distortion::PolynomialDistortion;
use stereocal::k3d::camera::CameraModel;
use stereocal::k3d::linalg::{mat33_mul, mat33_mul_vec3};
use stereocal::k3d::transforms::rotation_vector_to_matrix;
use stereocal::loader::InMemoryLoader;

pub const FOCAL: f64 = 500.0;
pub const BASELINE: f64 = 0.1;

const SUPERSAMPLING: usize = 3;

pub fn image_size() -> ImageSize {
    [640, 480].into()
}

/// 6x9 inner corners with 3 cm squares.
pub fn board() -> BoardGeometry {
    BoardGeometry::new(9, 6, 0.03)
}

pub struct Rig {
    pub cameras: [CameraModel; 2],
    pub rotation: [[f64; 3]; 3],
    pub translation: [f64; 3],
}

/// Two identical cameras 10 cm apart along x, slightly toed in.
pub fn rig() -> Rig {
    let size = image_size();
    let k = [
        [FOCAL, 0.0, (size.width as f64 - 1.0) * 0.5],
        [0.0, FOCAL, (size.height as f64 - 1.0) * 0.5],
        [0.0, 0.0, 1.0],
    ];
    let camera = CameraModel::new(k, PolynomialDistortion::default());
    Rig {
        cameras: [camera, camera],
        rotation: rotation_vector_to_matrix(&[0.0, 0.01, 0.0]),
        translation: [-BASELINE, 0.0, 0.0],
    }
}

/// Board poses in the first camera frame, tilted so the focal length is observable.
pub fn board_poses(board: &BoardGeometry, views: usize) -> Vec<([[f64; 3]; 3], [f64; 3])> {
    let tilts = [
        [0.3, 0.1, 0.02],
        [-0.2, 0.3, -0.05],
        [0.1, -0.3, 0.08],
        [-0.25, -0.15, 0.0],
    ];
    let centre = [
        (board.cols - 1) as f64 * board.square_size * 0.5,
        (board.rows - 1) as f64 * board.square_size * 0.5,
        0.0,
    ];
    tilts
        .iter()
        .cycle()
        .take(views)
        .enumerate()
        .map(|(i, rvec)| {
            let r = rotation_vector_to_matrix(rvec);
            let rc = mat33_mul_vec3(&r, &centre);
            let target = [BASELINE * 0.5, 0.0, 0.65 + 0.03 * i as f64];
            (r, [target[0] - rc[0], target[1] - rc[1], target[2] - rc[2]])
        })
        .collect()
}

fn is_black(board: &BoardGeometry, bx: f64, by: f64) -> bool {
    let u = bx / board.square_size;
    let v = by / board.square_size;
    let (i, j) = ((v + 1.0).floor(), (u + 1.0).floor());
    let inside = i >= 0.0 && j >= 0.0 && i <= board.rows as f64 && j <= board.cols as f64;
    inside && (i as i64 + j as i64) % 2 == 0
}

/// Render a board seen by `camera` with anti-aliasing by supersampling.
///
/// `rotation` and `translation` take board coordinates to camera coordinates.
pub fn render_board(
    camera: &CameraModel,
    rotation: &[[f64; 3]; 3],
    translation: &[f64; 3],
    board: &BoardGeometry,
    size: ImageSize,
) -> Result<Image<u8, 1>, ImageError> {
    let k = &camera.camera_matrix;
    let normal = [rotation[0][2], rotation[1][2], rotation[2][2]];
    let plane_offset =
        normal[0] * translation[0] + normal[1] * translation[1] + normal[2] * translation[2];
    let distorted = camera.distortion != PolynomialDistortion::default();
    let n = SUPERSAMPLING;

    let mut data = vec![255u8; size.area()];
    for y in 0..size.height {
        let samples: Vec<[f64; 2]> = (0..size.width * n * n)
            .map(|s| {
                let (x, sub) = (s / (n * n), s % (n * n));
                [
                    x as f64 - 0.5 + ((sub % n) as f64 + 0.5) / n as f64,
                    y as f64 - 0.5 + ((sub / n) as f64 + 0.5) / n as f64,
                ]
            })
            .collect();
        let rays = if distorted {
            camera.undistort_normalized(&samples)
        } else {
            samples
                .iter()
                .map(|p| [(p[0] - k[0][2]) / k[0][0], (p[1] - k[1][2]) / k[1][1]])
                .collect()
        };

        for x in 0..size.width {
            let mut acc = 0.0f64;
            for ray in &rays[x * n * n..(x + 1) * n * n] {
                let d = [ray[0], ray[1], 1.0];
                let denom = normal[0] * d[0] + normal[1] * d[1] + normal[2];
                let lambda = plane_offset / denom;
                let black = denom.abs() > 1e-12 && lambda > 0.0 && {
                    let p = [
                        lambda * d[0] - translation[0],
                        lambda * d[1] - translation[1],
                        lambda * d[2] - translation[2],
                    ];
                    // board coordinates through the transposed rotation
                    let bx = rotation[0][0] * p[0] + rotation[1][0] * p[1] + rotation[2][0] * p[2];
                    let by = rotation[0][1] * p[0] + rotation[1][1] * p[1] + rotation[2][1] * p[2];
                    is_black(board, bx, by)
                };
                acc += if black { 20.0 } else { 235.0 };
            }
            data[y * size.width + x] = (acc / (n * n) as f64).round() as u8;
        }
    }
    Image::new(size, data)
}

/// Render `views` stereo pairs and register them as `left{i}` / `right{i}`.
pub fn stereo_scene(views: usize) -> Result<(InMemoryLoader, Vec<String>), ImageError> {
    let rig = rig();
    let board = board();
    let size = image_size();

    let mut loader = InMemoryLoader::new();
    let mut ids = Vec::new();
    for (i, (r0, t0)) in board_poses(&board, views).into_iter().enumerate() {
        let r1 = mat33_mul(&rig.rotation, &r0);
        let rt0 = mat33_mul_vec3(&rig.rotation, &t0);
        let t1 = [
            rt0[0] + rig.translation[0],
            rt0[1] + rig.translation[1],
            rt0[2] + rig.translation[2],
        ];

        let left = format!("left{i:02}.png");
        let right = format!("right{i:02}.png");
        loader.insert(left.clone(), render_board(&rig.cameras[0], &r0, &t0, &board, size)?);
        loader.insert(right.clone(), render_board(&rig.cameras[1], &r1, &t1, &board, size)?);
        ids.push(left);
        ids.push(right);
    }
    Ok((loader, ids))
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
