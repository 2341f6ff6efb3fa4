use rayon::prelude::*;

use stereocal_3d::calib::StereoDataset;
use stereocal_image::{Image, ImageSize};
use stereocal_imgproc::calibration::chessboard::{
    find_chessboard_corners, CornerDetection, PatternSize,
};

use crate::config::{DetectorParams, StereoCalibConfig};
use crate::error::{ConfigurationError, DataError, StereoCalibError};
use crate::loader::ImageLoader;

/// Minimum number of accepted pairs for a calibration.
pub const MIN_PAIRS: usize = 2;

/// A pair left out of the dataset.
#[derive(Debug)]
pub struct PairRejection {
    /// Position of the pair in the input list.
    pub index: usize,
    /// Identifiers of the first and second image.
    pub ids: [String; 2],
    /// Why the pair was left out.
    pub reason: DataError,
}

/// Outcome of the pair validation.
#[derive(Debug, Default)]
pub struct ValidationReport {
    /// Identifiers of the accepted pairs, in input order.
    pub accepted_ids: Vec<[String; 2]>,
    /// Every rejected pair with its reason, in input order.
    pub rejections: Vec<PairRejection>,
    /// Size shared by the accepted images.
    pub image_size: Option<ImageSize>,
}

impl ValidationReport {
    /// Number of accepted pairs.
    pub fn num_accepted(&self) -> usize {
        self.accepted_ids.len()
    }
}

/// Accepted correspondences and the validation report.
#[derive(Debug)]
pub struct ValidatedPairs {
    /// Board points and detected corners of the accepted pairs.
    pub dataset: StereoDataset,
    /// Which pairs were accepted or rejected and why.
    pub report: ValidationReport,
    /// Size shared by all accepted images.
    pub image_size: ImageSize,
}

struct LoadedPair {
    index: usize,
    ids: [String; 2],
    images: [Image<u8, 1>; 2],
}

fn reject(report: &mut ValidationReport, index: usize, ids: [String; 2], reason: DataError) {
    log::warn!("skipping pair {}: {}", index, reason);
    report.rejections.push(PairRejection { index, ids, reason });
}

/// Load one image and check it against the reference size.
///
/// The first image that loads sets the reference size.
fn load_checked<L: ImageLoader + ?Sized>(
    loader: &L,
    id: &str,
    reference: &mut Option<ImageSize>,
) -> Result<Image<u8, 1>, DataError> {
    let image = loader.load(id).map_err(|source| DataError::ImageNotFound {
        id: id.to_string(),
        source,
    })?;

    match reference {
        None => *reference = Some(image.size()),
        Some(expected) if *expected != image.size() => {
            return Err(DataError::SizeMismatch {
                id: id.to_string(),
                expected: *expected,
                got: image.size(),
            });
        }
        Some(_) => {}
    }
    Ok(image)
}

/// Detect the board in both images of a pair.
///
/// A detector error is turned into a rejection of the pair.
fn detect_pair(
    pair: &LoadedPair,
    pattern: PatternSize,
    params: &DetectorParams,
) -> Result<[CornerDetection; 2], DataError> {
    let detect = |k: usize| {
        find_chessboard_corners(&pair.images[k], pattern, params).map_err(|source| {
            DataError::DetectionFailed {
                id: pair.ids[k].clone(),
                source,
            }
        })
    };
    Ok([detect(0)?, detect(1)?])
}

/// Load, check and detect the board in a list of image pairs.
///
/// `image_ids` alternates between the first and the second camera. Pairs whose
/// images fail to load, differ in size from the first loaded image, miss the
/// board or make the detector fail are excluded and reported; the others form
/// the dataset in input order.
/// Board detection runs in parallel over the loaded pairs.
///
/// # Errors
///
/// * [`ConfigurationError::OddImageList`] if the list length is odd, before any load.
/// * [`StereoCalibError::InsufficientData`] if fewer than [`MIN_PAIRS`] pairs remain.
pub fn validate_pairs<L: ImageLoader + ?Sized>(
    image_ids: &[String],
    loader: &L,
    config: &StereoCalibConfig,
) -> Result<ValidatedPairs, StereoCalibError> {
    if image_ids.len() % 2 != 0 {
        return Err(ConfigurationError::OddImageList(image_ids.len()).into());
    }
    config.validate()?;

    let mut report = ValidationReport::default();
    let mut reference = None;
    let mut loaded = Vec::with_capacity(image_ids.len() / 2);

    for (index, chunk) in image_ids.chunks_exact(2).enumerate() {
        let ids = [chunk[0].clone(), chunk[1].clone()];
        let first = match load_checked(loader, &ids[0], &mut reference) {
            Ok(image) => image,
            Err(reason) => {
                reject(&mut report, index, ids, reason);
                continue;
            }
        };
        let second = match load_checked(loader, &ids[1], &mut reference) {
            Ok(image) => image,
            Err(reason) => {
                reject(&mut report, index, ids, reason);
                continue;
            }
        };
        loaded.push(LoadedPair {
            index,
            ids,
            images: [first, second],
        });
    }

    let pattern = config.board.pattern_size();
    let detections: Vec<_> = loaded
        .par_iter()
        .map(|pair| detect_pair(pair, pattern, &config.detector))
        .collect();

    let object_points = config.board.object_points();
    let mut dataset = StereoDataset::new();
    let mut rejected = Vec::new();
    for (pair, detection) in loaded.into_iter().zip(detections) {
        match detection {
            Ok([CornerDetection::Found(first), CornerDetection::Found(second)]) => {
                dataset.push(object_points.clone(), first, second)?;
                report.accepted_ids.push(pair.ids);
            }
            Ok([first, _]) => {
                let k = if first.is_found() { 1 } else { 0 };
                let id = pair.ids[k].clone();
                rejected.push((pair.index, pair.ids, DataError::CornersNotFound { id }));
            }
            Err(reason) => rejected.push((pair.index, pair.ids, reason)),
        }
    }
    for (index, ids, reason) in rejected {
        reject(&mut report, index, ids, reason);
    }
    report.rejections.sort_by_key(|r| r.index);

    log::info!(
        "{} pairs have been successfully detected, {} rejected",
        report.num_accepted(),
        report.rejections.len()
    );

    if report.num_accepted() < MIN_PAIRS {
        return Err(StereoCalibError::InsufficientData {
            accepted: report.num_accepted(),
            required: MIN_PAIRS,
        });
    }

    let image_size = reference.ok_or(StereoCalibError::InsufficientData {
        accepted: 0,
        required: MIN_PAIRS,
    })?;
    report.image_size = Some(image_size);

    Ok(ValidatedPairs {
        dataset,
        report,
        image_size,
    })
}
