use nalgebra::DMatrix;

/// Poor man's approx assertion for matrices
#[macro_export]
macro_rules! assert_approx_matrix_eq {
    ($x:expr, $y:expr, abstol = $tol:expr) => {{
        let diff = &$x - &$y;

        let max_absdiff = diff.abs().max();
        let approx_eq = max_absdiff <= $tol;

        if !approx_eq {
            println!("abstol: {:e}", $tol);
            println!("left: {}", $x);
            println!("right: {}", $y);
            println!("diff: {:e}", diff);
        }
        assert!(approx_eq);
    }};
}

/// Approx assertion for slices of reals, e.g. evaluated field values.
#[macro_export]
macro_rules! assert_approx_slice_eq {
    ($x:expr, $y:expr, abstol = $tol:expr) => {{
        let left: &[f64] = &$x;
        let right: &[f64] = &$y;
        assert_eq!(left.len(), right.len(), "slices differ in length");
        let max_absdiff = left
            .iter()
            .zip(right.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f64, f64::max);
        if max_absdiff > $tol {
            println!("abstol: {:e}", $tol);
            println!("left: {:?}", left);
            println!("right: {:?}", right);
        }
        assert!(max_absdiff <= $tol);
    }};
}

/// Builds a row-major matrix, which reads more naturally in tests than nalgebra's
/// column-major `from_vec`.
pub fn matrix_from_rows(rows: &[&[f64]]) -> DMatrix<f64> {
    let nrows = rows.len();
    let ncols = rows.first().map(|row| row.len()).unwrap_or(0);
    DMatrix::from_fn(nrows, ncols, |i, j| rows[i][j])
}

/// Trilinear interpolation of the eight corner values of the unit cube, with corners
/// ordered with the first xi direction varying fastest.
pub fn trilinear(corners: &[f64; 8], xi: &[f64; 3]) -> f64 {
    let mut value = 0.0;
    for (corner, corner_value) in corners.iter().enumerate() {
        let mut weight = 1.0;
        for (axis, &x) in xi.iter().enumerate() {
            weight *= if (corner >> axis) & 1 == 1 { x } else { 1.0 - x };
        }
        value += weight * corner_value;
    }
    value
}
