/// Canonical 3D coordinates of the inner corners of a planar chessboard.
///
/// The points lie on the plane `z = 0`, row-major: the point of row `i` and column
/// `j` is `(j * square_size, i * square_size, 0)`.
///
/// # Arguments
///
/// * `rows` - Number of inner corner rows.
/// * `cols` - Number of inner corner columns.
/// * `square_size` - Side of a board square in world units.
///
/// Example:
///
/// ```
/// use stereocal_3d::calib::board_object_points;
///
/// let points = board_object_points(9, 6, 0.025);
/// assert_eq!(points.len(), 54);
/// assert_eq!(points[7], [0.025, 0.025, 0.0]);
/// ```
pub fn board_object_points(rows: usize, cols: usize, square_size: f64) -> Vec<[f64; 3]> {
    (0..rows)
        .flat_map(|i| (0..cols).map(move |j| [j as f64 * square_size, i as f64 * square_size, 0.0]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_board_object_points_layout() {
        let (rows, cols, s) = (9, 6, 2.5);
        let points = board_object_points(rows, cols, s);
        assert_eq!(points.len(), rows * cols);
        for i in 0..rows {
            for j in 0..cols {
                assert_eq!(points[i * cols + j], [j as f64 * s, i as f64 * s, 0.0]);
            }
        }
    }

    #[test]
    fn test_board_object_points_empty() {
        assert!(board_object_points(0, 6, 1.0).is_empty());
    }
}
