use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::Rng;

use stereocal_image::{Image, ImageSize};
use stereocal_imgproc::{
    calibration::{
        distortion::{generate_correction_map_polynomial, undistort_points, PolynomialDistortion},
        CameraIntrinsic,
    },
    interpolation::{remap, InterpolationMode},
};

fn bench_correction_map(c: &mut Criterion) {
    let mut group = c.benchmark_group("CorrectionMap");

    for (width, height) in [(320, 240), (640, 480), (1280, 960)].iter() {
        group.throughput(criterion::Throughput::Elements((*width * *height) as u64));

        let parameter_string = format!("{}x{}", width, height);
        let size: ImageSize = [*width, *height].into();

        let intrinsic = CameraIntrinsic {
            fx: *width as f64,
            fy: *width as f64,
            cx: *width as f64 / 2.0,
            cy: *height as f64 / 2.0,
        };
        let distortion = PolynomialDistortion::from_coefficients(&[-0.2, 0.05, 0.001, -0.001]);
        let identity = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        let k = intrinsic.to_matrix();

        group.bench_with_input(
            BenchmarkId::new("par_rows", &parameter_string),
            &size,
            |b, size| {
                b.iter(|| {
                    generate_correction_map_polynomial(
                        black_box(&intrinsic),
                        black_box(&identity),
                        black_box(&k),
                        black_box(&distortion),
                        black_box(size),
                    )
                })
            },
        );

        let (map_x, map_y) =
            generate_correction_map_polynomial(&intrinsic, &identity, &k, &distortion, &size)
                .unwrap();
        let mut rng = rand::rng();
        let data = (0..size.area() * 3).map(|_| rng.random::<f32>()).collect();
        let src = Image::<f32, 3>::new(size, data).unwrap();

        group.bench_with_input(
            BenchmarkId::new("remap_bilinear", &parameter_string),
            &(&src, &map_x, &map_y),
            |b, i| {
                let (src, map_x, map_y) = *i;
                let mut dst = Image::<f32, 3>::from_size_val(src.size(), 0.0).unwrap();
                b.iter(|| {
                    remap(
                        black_box(src),
                        black_box(&mut dst),
                        black_box(map_x),
                        black_box(map_y),
                        black_box(InterpolationMode::Bilinear),
                    )
                })
            },
        );
    }
    group.finish();
}

fn bench_undistort_points(c: &mut Criterion) {
    let mut group = c.benchmark_group("UndistortPoints");
    let mut rng = rand::rng();

    let intrinsic = CameraIntrinsic {
        fx: 640.0,
        fy: 640.0,
        cx: 320.0,
        cy: 240.0,
    };
    let distortion = PolynomialDistortion::from_coefficients(&[-0.2, 0.05, 0.001, -0.001]);

    for num_points in [54usize, 540, 5400].iter() {
        group.throughput(criterion::Throughput::Elements(*num_points as u64));
        let points: Vec<[f64; 2]> = (0..*num_points)
            .map(|_| [rng.random_range(0.0..640.0), rng.random_range(0.0..480.0)])
            .collect();

        group.bench_with_input(
            BenchmarkId::from_parameter(num_points),
            &points,
            |b, points| {
                b.iter(|| {
                    undistort_points(
                        black_box(points),
                        black_box(&intrinsic),
                        black_box(&distortion),
                        None,
                        None,
                    )
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_correction_map, bench_undistort_points);
criterion_main!(benches);
