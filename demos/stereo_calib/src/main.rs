use argh::FromArgs;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use stereocal::config::{BoardGeometry, RectifyStrategyKind, StereoCalibConfig};
use stereocal::image::Image;
use stereocal::loader::FileImageLoader;
use stereocal::session::CalibrationSession;

#[derive(FromArgs)]
/// Calibrate and rectify a stereo rig from checkerboard image pairs
struct Args {
    /// image list: a JSON file holding an array of paths, or the paths themselves,
    /// alternating between the first and the second camera
    #[argh(option, short = 'i')]
    images: Vec<String>,

    /// number of inner corners per board column
    #[argh(option)]
    rows: Option<usize>,

    /// number of inner corners per board row
    #[argh(option)]
    cols: Option<usize>,

    /// side of a board square, in the unit of the output translation
    #[argh(option)]
    square_size: Option<f64>,

    /// directory receiving the calibration files
    #[argh(option, short = 'o', default = "PathBuf::from(\".\")")]
    output_dir: PathBuf,

    /// rectify from the point correspondences only
    #[argh(switch)]
    uncalibrated: bool,

    /// free scaling of the rectified images, negative to disable
    #[argh(option)]
    alpha: Option<f64>,

    /// JSON configuration file
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    /// write the rectified pairs as PNG canvases
    #[argh(switch)]
    save_rectified: bool,

    /// directory receiving the detected corners drawn over each accepted image
    #[argh(option)]
    save_corners: Option<PathBuf>,
}

/// Expand a JSON image list. Relative entries are taken from the list's directory.
fn read_image_list(args: &[String]) -> Result<(Vec<String>, Option<PathBuf>), Box<dyn std::error::Error>> {
    match args {
        [list] if list.ends_with(".json") => {
            let ids: Vec<String> = serde_json::from_reader(File::open(list)?)?;
            let root = Path::new(list).parent().map(Path::to_path_buf);
            Ok((ids, root))
        }
        _ => Ok((args.to_vec(), None)),
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), Box<dyn std::error::Error>> {
    serde_json::to_writer_pretty(BufWriter::new(File::create(path)?), value)?;
    log::info!("wrote {}", path.display());
    Ok(())
}

fn save_rgb(path: &Path, canvas: &Image<u8, 3>) -> Result<(), Box<dyn std::error::Error>> {
    image::save_buffer(
        path,
        canvas.as_slice(),
        canvas.width() as u32,
        canvas.height() as u32,
        image::ExtendedColorType::Rgb8,
    )?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let mut config: StereoCalibConfig = match &args.config {
        Some(path) => serde_json::from_reader(File::open(path)?)?,
        None => StereoCalibConfig::default(),
    };
    config.board = BoardGeometry::new(
        args.rows.unwrap_or(config.board.rows),
        args.cols.unwrap_or(config.board.cols),
        args.square_size.unwrap_or(config.board.square_size),
    );
    if args.uncalibrated {
        config.rectify.strategy = RectifyStrategyKind::Uncalibrated;
    }
    if let Some(alpha) = args.alpha {
        config.rectify.alpha = alpha;
    }

    let (ids, root) = read_image_list(&args.images)?;
    let loader = match root {
        Some(root) => FileImageLoader::new().with_root(root),
        None => FileImageLoader::new(),
    };

    let mut session = CalibrationSession::new(config)?;
    let artifacts = session.run(&ids, &loader)?;

    println!("done with RMS error={}", artifacts.diagnostics.rms_error);
    println!("average epipolar err = {}", artifacts.diagnostics.epipolar_error);
    for index in &artifacts.diagnostics.rejected_pairs {
        println!("pair {index} was skipped");
    }

    std::fs::create_dir_all(&args.output_dir)?;
    write_json(&args.output_dir.join("intrinsics.json"), &artifacts.intrinsics)?;
    write_json(&args.output_dir.join("extrinsics.json"), &artifacts.extrinsics)?;

    if args.save_rectified {
        for (i, ids) in artifacts.diagnostics.accepted_pairs.iter().enumerate() {
            let canvas = session.render_accepted_pair(i, &loader)?;
            let path = args.output_dir.join(format!("rectified_{i:02}.png"));
            save_rgb(&path, &canvas)?;
            log::info!("rectified {} / {} -> {}", ids[0], ids[1], path.display());
        }
    }

    if let Some(dir) = &args.save_corners {
        std::fs::create_dir_all(dir)?;
        for (i, ids) in artifacts.diagnostics.accepted_pairs.iter().enumerate() {
            let overlays = session.render_accepted_corners(i, &loader)?;
            for (k, overlay) in overlays.iter().enumerate() {
                let path = dir.join(format!("corners_{i:02}_{k}.png"));
                save_rgb(&path, overlay)?;
                log::info!("corners of {} -> {}", ids[k], path.display());
            }
        }
    }

    Ok(())
}
