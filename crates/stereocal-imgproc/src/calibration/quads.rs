//! Quad extraction and grid assembly for the chessboard detector.
//!
//! Black squares of the board are found as connected blobs of a binary image and
//! approximated by quadrilaterals. Every inner board corner is where two black
//! squares touch diagonally, so linking the matching quad corners recovers the
//! inner corners and the quad edges between them recover the grid topology.

use std::collections::{HashMap, HashSet, VecDeque};

use stereocal_image::Image;

/// A quadrilateral fitted to a black blob, corners in cyclic order.
#[derive(Clone, Debug)]
pub(crate) struct Quad {
    pub corners: [[f64; 2]; 4],
    pub center: [f64; 2],
    pub min_side: f64,
}

/// Smallest blob, in pixels, considered as a board square.
const MIN_BLOB_AREA: usize = 16;

/// Shortest accepted quad side in pixels.
const MIN_QUAD_SIDE: f64 = 3.0;

/// Tolerated ratio between the pixel count and the border corrected quad area.
const AREA_RATIO_RANGE: (f64, f64) = (0.7, 1.3);

/// Longest over shortest side allowed for a quad.
const MAX_SIDE_RATIO: f64 = 6.0;

fn dist(a: [f64; 2], b: [f64; 2]) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
}

fn cross(o: [f64; 2], a: [f64; 2], b: [f64; 2]) -> f64 {
    (a[0] - o[0]) * (b[1] - o[1]) - (a[1] - o[1]) * (b[0] - o[0])
}

/// Label the 4-connected components of zero-valued pixels that do not touch the border.
pub(crate) fn black_blobs(binary: &Image<u8, 1>) -> Vec<Vec<[usize; 2]>> {
    let (w, h) = (binary.width(), binary.height());
    let data = binary.as_slice();
    let mut visited = vec![false; w * h];
    let mut blobs = Vec::new();
    let mut queue = VecDeque::new();

    for start in 0..w * h {
        if visited[start] || data[start] != 0 {
            continue;
        }

        visited[start] = true;
        queue.push_back(start);
        let mut pixels = Vec::new();
        let mut touches_border = false;

        while let Some(idx) = queue.pop_front() {
            let (x, y) = (idx % w, idx / w);
            pixels.push([x, y]);
            if x == 0 || y == 0 || x + 1 == w || y + 1 == h {
                touches_border = true;
            }

            let mut visit = |n: usize| {
                if !visited[n] && data[n] == 0 {
                    visited[n] = true;
                    queue.push_back(n);
                }
            };
            if x > 0 {
                visit(idx - 1);
            }
            if x + 1 < w {
                visit(idx + 1);
            }
            if y > 0 {
                visit(idx - w);
            }
            if y + 1 < h {
                visit(idx + w);
            }
        }

        if !touches_border && pixels.len() >= MIN_BLOB_AREA {
            blobs.push(pixels);
        }
    }

    blobs
}

/// Approximate a blob by a quadrilateral built from its extreme points.
///
/// Returns `None` if the blob is not square-like enough.
pub(crate) fn fit_quad(pixels: &[[usize; 2]]) -> Option<Quad> {
    let n = pixels.len() as f64;
    let pts = pixels
        .iter()
        .map(|p| [p[0] as f64, p[1] as f64])
        .collect::<Vec<_>>();

    let centroid = pts.iter().fold([0.0, 0.0], |acc, p| [acc[0] + p[0], acc[1] + p[1]]);
    let centroid = [centroid[0] / n, centroid[1] / n];

    let farthest = |from: [f64; 2]| {
        pts.iter()
            .copied()
            .max_by(|a, b| dist(*a, from).total_cmp(&dist(*b, from)))
    };

    let c0 = farthest(centroid)?;
    let c2 = farthest(c0)?;

    let (mut c1, mut c3) = (c0, c2);
    let (mut best_pos, mut best_neg) = (0.0, 0.0);
    for &p in &pts {
        let s = cross(c0, c2, p);
        if s > best_pos {
            best_pos = s;
            c1 = p;
        }
        if s < best_neg {
            best_neg = s;
            c3 = p;
        }
    }

    if best_pos <= 0.0 || best_neg >= 0.0 {
        return None;
    }

    let corners = [c0, c1, c2, c3];
    let sides = [
        dist(c0, c1),
        dist(c1, c2),
        dist(c2, c3),
        dist(c3, c0),
    ];
    let min_side = sides.iter().copied().fold(f64::INFINITY, f64::min);
    let max_side = sides.iter().copied().fold(0.0, f64::max);
    if min_side < MIN_QUAD_SIDE || max_side > MAX_SIDE_RATIO * min_side {
        return None;
    }

    // convexity: all turns share a sign
    let turns = (0..4)
        .map(|i| cross(corners[i], corners[(i + 1) % 4], corners[(i + 2) % 4]))
        .collect::<Vec<_>>();
    if !(turns.iter().all(|&t| t > 0.0) || turns.iter().all(|&t| t < 0.0)) {
        return None;
    }

    // the polygon through pixel centres misses half a pixel along the border
    let area = 0.5 * (best_pos - best_neg);
    let perimeter: f64 = sides.iter().sum();
    let corrected = area + 0.5 * perimeter + 1.0;
    let ratio = n / corrected;
    if ratio < AREA_RATIO_RANGE.0 || ratio > AREA_RATIO_RANGE.1 {
        return None;
    }

    let center = corners
        .iter()
        .fold([0.0, 0.0], |acc, p| [acc[0] + p[0] / 4.0, acc[1] + p[1] / 4.0]);

    Some(Quad {
        corners,
        center,
        min_side,
    })
}

/// Inner corner candidates and the grid graph linking them.
#[derive(Debug, Default)]
pub(crate) struct CornerGraph {
    pub nodes: Vec<[f64; 2]>,
    pub edges: Vec<HashSet<usize>>,
}

/// Link corners of diagonally touching quads and build the grid graph.
///
/// `gap` is the expected distance between two touching quad corners, which grows
/// with the amount of dilation applied before the blobs were extracted.
pub(crate) fn link_quads(quads: &[Quad], gap: f64) -> CornerGraph {
    // flattened corner list: (quad index, corner index)
    let refs = quads
        .iter()
        .enumerate()
        .flat_map(|(qi, _)| (0..4).map(move |k| (qi, k)))
        .collect::<Vec<_>>();
    let pos = |r: (usize, usize)| quads[r.0].corners[r.1];

    let nearest = |a: usize| -> Option<(usize, f64)> {
        let pa = pos(refs[a]);
        refs.iter()
            .enumerate()
            .filter(|(_, r)| r.0 != refs[a].0)
            .map(|(b, r)| (b, dist(pa, pos(*r))))
            .min_by(|x, y| x.1.total_cmp(&y.1))
    };

    let mut node_of = HashMap::<(usize, usize), usize>::new();
    let mut nodes = Vec::new();

    for a in 0..refs.len() {
        if node_of.contains_key(&refs[a]) {
            continue;
        }
        let Some((b, d)) = nearest(a) else {
            continue;
        };
        if b < a || nearest(b).map(|(back, _)| back) != Some(a) {
            continue;
        }

        let (qa, qb) = (&quads[refs[a].0], &quads[refs[b].0]);
        let limit = gap
            .max(0.3 * qa.min_side.min(qb.min_side))
            .min(0.7 * qa.min_side.min(qb.min_side));
        if d > limit {
            continue;
        }

        let (pa, pb) = (pos(refs[a]), pos(refs[b]));
        let mid = [(pa[0] + pb[0]) / 2.0, (pa[1] + pb[1]) / 2.0];

        // the two squares must sit on opposite sides of the shared corner
        let va = [qa.center[0] - mid[0], qa.center[1] - mid[1]];
        let vb = [qb.center[0] - mid[0], qb.center[1] - mid[1]];
        if va[0] * vb[0] + va[1] * vb[1] >= 0.0 {
            continue;
        }

        node_of.insert(refs[a], nodes.len());
        node_of.insert(refs[b], nodes.len());
        nodes.push(mid);
    }

    let mut edges = vec![HashSet::new(); nodes.len()];
    for qi in 0..quads.len() {
        for k in 0..4 {
            let (Some(&n0), Some(&n1)) = (node_of.get(&(qi, k)), node_of.get(&(qi, (k + 1) % 4)))
            else {
                continue;
            };
            if n0 != n1 {
                edges[n0].insert(n1);
                edges[n1].insert(n0);
            }
        }
    }

    CornerGraph { nodes, edges }
}

impl CornerGraph {
    /// Node indices of the largest connected component.
    pub fn largest_component(&self) -> Vec<usize> {
        let mut seen = vec![false; self.nodes.len()];
        let mut best = Vec::new();

        for start in 0..self.nodes.len() {
            if seen[start] {
                continue;
            }
            seen[start] = true;
            let mut component = vec![start];
            let mut queue = VecDeque::from([start]);
            while let Some(n) = queue.pop_front() {
                for &m in &self.edges[n] {
                    if !seen[m] {
                        seen[m] = true;
                        component.push(m);
                        queue.push_back(m);
                    }
                }
            }
            if component.len() > best.len() {
                best = component;
            }
        }

        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stereocal_image::{ImageError, ImageSize};

    fn square_blob(x0: usize, y0: usize, side: usize) -> Vec<[usize; 2]> {
        (y0..y0 + side)
            .flat_map(|y| (x0..x0 + side).map(move |x| [x, y]))
            .collect()
    }

    #[test]
    fn test_black_blobs_skip_border() -> Result<(), ImageError> {
        let size = ImageSize {
            width: 20,
            height: 10,
        };
        let mut data = vec![255u8; 200];
        // interior blob
        for y in 2..7 {
            for x in 2..7 {
                data[y * 20 + x] = 0;
            }
        }
        // blob touching the right border
        for y in 2..7 {
            for x in 14..20 {
                data[y * 20 + x] = 0;
            }
        }
        let binary = Image::new(size, data)?;
        let blobs = black_blobs(&binary);
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs[0].len(), 25);
        Ok(())
    }

    #[test]
    fn test_fit_quad_square() {
        let quad = fit_quad(&square_blob(10, 10, 12)).expect("square blob");
        let mut xs = quad.corners.iter().map(|c| c[0]).collect::<Vec<_>>();
        xs.sort_by(f64::total_cmp);
        assert_eq!(xs, vec![10.0, 10.0, 21.0, 21.0]);
        assert!((quad.center[0] - 15.5).abs() < 1e-9);
        assert!((quad.min_side - 11.0).abs() < 1e-9);
    }

    #[test]
    fn test_fit_quad_rejects_line() {
        let line = (0..40).map(|x| [x, 5]).collect::<Vec<_>>();
        assert!(fit_quad(&line).is_none());
    }

    #[test]
    fn test_link_diagonal_quads() {
        // two squares touching at (20, 20) with a small gap
        let a = fit_quad(&square_blob(9, 9, 10)).expect("quad a");
        let b = fit_quad(&square_blob(21, 21, 10)).expect("quad b");
        let graph = link_quads(&[a, b], 5.0);
        assert_eq!(graph.nodes.len(), 1);
        assert!((graph.nodes[0][0] - 19.5).abs() < 1e-9);
        assert!((graph.nodes[0][1] - 19.5).abs() < 1e-9);
        assert_eq!(graph.largest_component(), vec![0]);
    }
}
