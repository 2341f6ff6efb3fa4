use super::quads::{black_blobs, fit_quad, link_quads, CornerGraph, Quad};
use super::subpix::{corner_sub_pix, SubPixParams};
use super::{apply_homography, mat33_inverse};
use crate::draw::{draw_circle, draw_line};
use crate::interpolation::{interpolate_pixel, InterpolationMode};
use crate::morphology::dilate;
use crate::normalize::equalize_histogram;
use crate::resize::upscale;
use crate::threshold::adaptive_threshold_mean;
use stereocal_image::{ops::cast_and_scale, Image, ImageError};

/// Number of inner corners of a chessboard along each axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PatternSize {
    /// Inner corners per row.
    pub cols: usize,
    /// Inner corners per column.
    pub rows: usize,
}

impl PatternSize {
    /// Total number of inner corners.
    pub fn num_corners(&self) -> usize {
        self.cols * self.rows
    }
}

/// Outcome of a chessboard search.
///
/// Not finding the board is an expected outcome and not an error.
#[derive(Clone, Debug, PartialEq)]
pub enum CornerDetection {
    /// All inner corners were located, row-major from the board origin.
    Found(Vec<[f64; 2]>),
    /// The board could not be located.
    NotFound,
}

impl CornerDetection {
    /// Whether the board was found.
    pub fn is_found(&self) -> bool {
        matches!(self, CornerDetection::Found(_))
    }

    /// The detected corners, if any.
    pub fn corners(&self) -> Option<&[[f64; 2]]> {
        match self {
            CornerDetection::Found(c) => Some(c),
            CornerDetection::NotFound => None,
        }
    }
}

/// Parameters of the chessboard detector.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChessboardParams {
    /// Upscaling factors tried in order until the board is found.
    pub scales: Vec<usize>,
    /// Largest number of dilation passes tried on each binarized image.
    pub max_dilations: usize,
    /// Sub-pixel refinement applied on the original image.
    pub subpix: SubPixParams,
}

impl Default for ChessboardParams {
    fn default() -> Self {
        Self {
            scales: vec![1, 2],
            max_dilations: 3,
            subpix: SubPixParams::default(),
        }
    }
}

impl ChessboardParams {
    /// Set the upscaling factors.
    pub fn with_scales(mut self, scales: Vec<usize>) -> Self {
        self.scales = scales;
        self
    }

    /// Set the largest number of dilation passes.
    pub fn with_max_dilations(mut self, max_dilations: usize) -> Self {
        self.max_dilations = max_dilations;
        self
    }

    /// Set the sub-pixel refinement parameters.
    pub fn with_subpix(mut self, subpix: SubPixParams) -> Self {
        self.subpix = subpix;
        self
    }
}

/// How the equalized image is turned into a binary one.
#[derive(Clone, Copy, Debug)]
enum Binarization {
    /// Local mean over a window proportional to the image size.
    Adaptive(f64),
    /// A single threshold at mid-gray.
    Global,
}

const BINARIZATIONS: [Binarization; 3] = [
    Binarization::Adaptive(0.2),
    Binarization::Adaptive(0.1),
    Binarization::Global,
];

/// Offset subtracted from the local mean so that flat bright areas stay white.
const ADAPTIVE_OFFSET: f32 = 5.0;

/// Locate the inner corners of a chessboard in a grayscale image.
///
/// The search runs at each factor of `params.scales` in order and stops at the
/// first success. Corners found on an upscaled image are divided by the factor and
/// refined to sub-pixel accuracy on the original image.
///
/// When `rows + cols` is odd the board origin is the corner next to the dark outer
/// square, so that every view of the board is labelled consistently.
///
/// # Arguments
///
/// * `image` - The grayscale input image.
/// * `pattern` - Number of inner corners of the board.
/// * `params` - Detector parameters.
///
/// # Returns
///
/// The corners row-major, or [`CornerDetection::NotFound`].
pub fn find_chessboard_corners(
    image: &Image<u8, 1>,
    pattern: PatternSize,
    params: &ChessboardParams,
) -> Result<CornerDetection, ImageError> {
    if pattern.cols < 2 || pattern.rows < 2 {
        return Ok(CornerDetection::NotFound);
    }

    if image.width() == 0 || image.height() == 0 {
        return Err(ImageError::EmptyImage(image.width(), image.height()));
    }

    let mut gray = Image::from_size_val(image.size(), 0.0f32)?;
    cast_and_scale(image, &mut gray, 1.0)?;

    for &scale in &params.scales {
        if scale == 0 {
            continue;
        }

        let corners = if scale == 1 {
            find_grid(&gray, pattern, params.max_dilations)?
        } else {
            find_grid(&upscale(&gray, scale)?, pattern, params.max_dilations)?
        };

        let Some(mut corners) = corners else {
            log::debug!("chessboard {}x{} not found at scale {scale}", pattern.cols, pattern.rows);
            continue;
        };

        let inv = 1.0 / scale as f64;
        corners.iter_mut().for_each(|c| {
            c[0] *= inv;
            c[1] *= inv;
        });

        corner_sub_pix(&gray, &mut corners, &params.subpix)?;
        log::debug!("chessboard {}x{} found at scale {scale}", pattern.cols, pattern.rows);

        return Ok(CornerDetection::Found(corners));
    }

    Ok(CornerDetection::NotFound)
}

fn binarize(eq: &Image<f32, 1>, mode: Binarization) -> Result<Option<Image<u8, 1>>, ImageError> {
    let mut binary = Image::from_size_val(eq.size(), 0u8)?;
    match mode {
        Binarization::Adaptive(fraction) => {
            let min_dim = eq.width().min(eq.height()) as f64;
            let block = ((min_dim * fraction).round() as usize) | 1;
            if block < 3 {
                return Ok(None);
            }
            adaptive_threshold_mean(eq, &mut binary, block, ADAPTIVE_OFFSET, 255)?;
        }
        Binarization::Global => {
            binary
                .as_slice_mut()
                .iter_mut()
                .zip(eq.as_slice())
                .for_each(|(b, &v)| *b = if v > 127.5 { 255 } else { 0 });
        }
    }
    Ok(Some(binary))
}

fn find_grid(
    gray: &Image<f32, 1>,
    pattern: PatternSize,
    max_dilations: usize,
) -> Result<Option<Vec<[f64; 2]>>, ImageError> {
    let mut eq = Image::from_size_val(gray.size(), 0.0f32)?;
    equalize_histogram(gray, &mut eq)?;

    // each black square has at most four inner corners
    let min_quads = pattern.num_corners().div_ceil(4);
    let mut dilated = Image::from_size_val(gray.size(), 0u8)?;

    for mode in BINARIZATIONS {
        let Some(binary) = binarize(&eq, mode)? else {
            continue;
        };

        for d in 0..=max_dilations {
            dilate(&binary, &mut dilated, d)?;

            let quads = black_blobs(&dilated)
                .iter()
                .filter_map(|blob| fit_quad(blob))
                .collect::<Vec<Quad>>();
            if quads.len() < min_quads {
                continue;
            }

            let gap = (2 * d + 2) as f64 * 1.5 + 1.0;
            let graph = link_quads(&quads, gap);
            if let Some(corners) = order_grid(&graph, pattern, &eq) {
                log::debug!("grid assembled with {mode:?} binarization and {d} dilations");
                return Ok(Some(corners));
            }
        }
    }

    Ok(None)
}

/// Homography mapping the unit square `(0,0),(1,0),(1,1),(0,1)` onto `quad`.
fn square_to_quad(quad: &[[f64; 2]; 4]) -> [[f64; 3]; 3] {
    let [[x0, y0], [x1, y1], [x2, y2], [x3, y3]] = *quad;

    let sx = x0 - x1 + x2 - x3;
    let sy = y0 - y1 + y2 - y3;

    let (g, h) = if sx.abs() < 1e-12 && sy.abs() < 1e-12 {
        (0.0, 0.0)
    } else {
        let (dx1, dx2, dy1, dy2) = (x1 - x2, x3 - x2, y1 - y2, y3 - y2);
        let den = dx1 * dy2 - dx2 * dy1;
        ((sx * dy2 - dx2 * sy) / den, (dx1 * sy - sx * dy1) / den)
    };

    [
        [x1 - x0 + g * x1, x3 - x0 + h * x3, x0],
        [y1 - y0 + g * y1, y3 - y0 + h * y3, y0],
        [g, h, 1.0],
    ]
}

struct Labeling {
    origin: [f64; 2],
    to_image: [[f64; 3]; 3],
    labels: Vec<(usize, usize, usize)>,
}

/// Assign grid coordinates to the nodes of the largest graph component.
fn order_grid(graph: &CornerGraph, pattern: PatternSize, eq: &Image<f32, 1>) -> Option<Vec<[f64; 2]>> {
    let (cols, rows) = (pattern.cols, pattern.rows);

    let component = graph.largest_component();
    if component.len() != cols * rows {
        return None;
    }

    let degree_sum: usize = component.iter().map(|&n| graph.edges[n].len()).sum();
    if degree_sum != 2 * (rows * (cols - 1) + cols * (rows - 1)) {
        return None;
    }

    let mut extremes = component
        .iter()
        .copied()
        .filter(|&n| graph.edges[n].len() == 2)
        .map(|n| graph.nodes[n])
        .collect::<Vec<_>>();
    if extremes.len() != 4 {
        return None;
    }

    let mean = extremes
        .iter()
        .fold([0.0, 0.0], |acc, p| [acc[0] + p[0] / 4.0, acc[1] + p[1] / 4.0]);
    extremes.sort_by(|a, b| {
        let ta = (a[1] - mean[1]).atan2(a[0] - mean[0]);
        let tb = (b[1] - mean[1]).atan2(b[0] - mean[0]);
        ta.total_cmp(&tb)
    });

    let mut candidates = Vec::new();
    for start in 0..4 {
        for dir in [1, 3] {
            let quad = [0, 1, 2, 3].map(|k| extremes[(start + k * dir) % 4]);

            // keep the image handedness of the board axes
            let v_col = [quad[1][0] - quad[0][0], quad[1][1] - quad[0][1]];
            let v_row = [quad[3][0] - quad[0][0], quad[3][1] - quad[0][1]];
            if v_col[0] * v_row[1] - v_col[1] * v_row[0] <= 0.0 {
                continue;
            }

            let to_image = square_to_quad(&quad);
            let Some(to_square) = mat33_inverse(&to_image) else {
                continue;
            };

            if let Some(labels) = label_nodes(graph, &component, &to_square, pattern) {
                candidates.push(Labeling {
                    origin: quad[0],
                    to_image,
                    labels,
                });
            }
        }
    }

    if (rows + cols) % 2 == 1 && candidates.len() > 1 {
        let dark_origin = candidates
            .iter()
            .filter(|c| origin_is_dark(c, pattern, eq) == Some(true))
            .count();
        if dark_origin > 0 {
            candidates.retain(|c| origin_is_dark(c, pattern, eq) == Some(true));
        }
    }

    let best = candidates
        .into_iter()
        .min_by(|a, b| (a.origin[0] + a.origin[1]).total_cmp(&(b.origin[0] + b.origin[1])))?;

    let mut corners = vec![[0.0; 2]; cols * rows];
    for (node, gx, gy) in best.labels {
        corners[gy * cols + gx] = graph.nodes[node];
    }

    Some(corners)
}

/// Round every node to grid coordinates and check the labelling is a valid grid.
fn label_nodes(
    graph: &CornerGraph,
    component: &[usize],
    to_square: &[[f64; 3]; 3],
    pattern: PatternSize,
) -> Option<Vec<(usize, usize, usize)>> {
    let (cols, rows) = (pattern.cols, pattern.rows);
    let mut taken = vec![false; cols * rows];
    let mut grid_of = std::collections::HashMap::new();
    let mut labels = Vec::with_capacity(component.len());

    for &n in component {
        let [u, v] = apply_homography(to_square, graph.nodes[n]);
        let gx = (u * (cols - 1) as f64).round();
        let gy = (v * (rows - 1) as f64).round();
        if !(0.0..cols as f64).contains(&gx) || !(0.0..rows as f64).contains(&gy) {
            return None;
        }
        let (gx, gy) = (gx as usize, gy as usize);
        if std::mem::replace(&mut taken[gy * cols + gx], true) {
            return None;
        }
        grid_of.insert(n, (gx, gy));
        labels.push((n, gx, gy));
    }

    for &n in component {
        let (ax, ay) = grid_of[&n];
        for m in &graph.edges[n] {
            let (bx, by) = *grid_of.get(m)?;
            if ax.abs_diff(bx) + ay.abs_diff(by) != 1 {
                return None;
            }
        }
    }

    Some(labels)
}

/// Compare the outer squares diagonally beyond the origin and the opposite corner.
fn origin_is_dark(labeling: &Labeling, pattern: PatternSize, eq: &Image<f32, 1>) -> Option<bool> {
    let (cx, cy) = ((pattern.cols - 1) as f64, (pattern.rows - 1) as f64);
    let sample = |gx: f64, gy: f64| -> Option<f32> {
        let [x, y] = apply_homography(&labeling.to_image, [gx / cx, gy / cy]);
        if x < 0.0 || y < 0.0 || x > (eq.width() - 1) as f64 || y > (eq.height() - 1) as f64 {
            return None;
        }
        let [v] = interpolate_pixel(eq, x as f32, y as f32, InterpolationMode::Bilinear);
        Some(v)
    };

    let near = sample(-0.5, -0.5)?;
    let far = sample(cx + 0.5, cy + 0.5)?;
    Some(near < far)
}

/// Render detected corners onto an RGB canvas for inspection.
///
/// Found boards are drawn with one color per row and lines joining consecutive
/// corners; partial detections are drawn as red circles only.
pub fn draw_chessboard_corners(
    canvas: &mut Image<u8, 3>,
    pattern: PatternSize,
    corners: &[[f64; 2]],
    found: bool,
) {
    const PALETTE: [[u8; 3]; 7] = [
        [255, 0, 0],
        [255, 128, 0],
        [200, 200, 0],
        [0, 255, 0],
        [0, 200, 200],
        [0, 0, 255],
        [255, 0, 255],
    ];
    const RADIUS: i64 = 4;

    let to_px = |p: &[f64; 2]| (p[0].round() as i64, p[1].round() as i64);

    if !found || pattern.cols == 0 {
        for c in corners {
            draw_circle(canvas, to_px(c), RADIUS, PALETTE[0]);
        }
        return;
    }

    let mut prev: Option<(i64, i64)> = None;
    for (i, c) in corners.iter().enumerate() {
        let color = PALETTE[(i / pattern.cols) % PALETTE.len()];
        let p = to_px(c);
        draw_line(canvas, (p.0 - RADIUS, p.1 - RADIUS), (p.0 + RADIUS, p.1 + RADIUS), color, 1);
        draw_line(canvas, (p.0 - RADIUS, p.1 + RADIUS), (p.0 + RADIUS, p.1 - RADIUS), color, 1);
        draw_circle(canvas, p, RADIUS + 1, color);
        if let Some(q) = prev {
            draw_line(canvas, q, p, color, 1);
        }
        prev = Some(p);
    }
}
