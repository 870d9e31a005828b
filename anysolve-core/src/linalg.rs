//! # Dense Linear Algebra
//!
//! Small dense routines backing the metrics estimator and the numeric
//! operators: row-echelon rank with redundant-row tracking, linear system
//! solving, and least-squares via normal equations. Matrices are tiny
//! (constraints x variables), so plain Vec<Vec<f64>> with partial pivoting
//! is enough.

/// Result of running ordered elimination over a row-major matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct RankAnalysis {
    pub rank: usize,
    /// Rows that eliminated to (numerically) zero, in input order.
    /// Earlier rows win pivots, so a later duplicate is the one flagged.
    pub redundant: Vec<usize>,
    /// For each redundant row, the pivot row it is a multiple of (when the
    /// dependence involves a single earlier row) and the scale factor.
    pub dependence: Vec<(usize, usize, f64)>,
}

/// Row-echelon rank with redundancy tracking.
///
/// Rows are processed in input order; a row whose entries all fall below
/// `rel_tol` times the matrix scale after elimination is redundant.
pub fn rank_and_redundant(matrix: &[Vec<f64>], rel_tol: f64) -> RankAnalysis {
    let rows = matrix.len();
    if rows == 0 {
        return RankAnalysis {
            rank: 0,
            redundant: Vec::new(),
            dependence: Vec::new(),
        };
    }
    let cols = matrix[0].len();
    let scale = matrix
        .iter()
        .flat_map(|r| r.iter())
        .fold(0.0_f64, |m, v| m.max(v.abs()))
        .max(1.0);
    let tol = rel_tol * scale;

    let mut work: Vec<Vec<f64>> = matrix.to_vec();
    // pivot column -> pivot row index
    let mut pivots: Vec<(usize, usize)> = Vec::new();
    let mut redundant = Vec::new();
    let mut dependence = Vec::new();

    for i in 0..rows {
        // Track single-source dependence: which pivot rows touched this one
        let mut touched: Vec<(usize, f64)> = Vec::new();
        for &(pcol, prow) in &pivots {
            let factor = work[i][pcol] / work[prow][pcol];
            if factor.abs() > 0.0 {
                for c in 0..cols {
                    work[i][c] -= factor * work[prow][c];
                }
                touched.push((prow, factor));
            }
        }
        let lead = (0..cols).find(|&c| work[i][c].abs() > tol);
        match lead {
            Some(col) => pivots.push((col, i)),
            None => {
                redundant.push(i);
                if touched.len() == 1 {
                    dependence.push((i, touched[0].0, touched[0].1));
                }
            }
        }
    }

    RankAnalysis {
        rank: pivots.len(),
        redundant,
        dependence,
    }
}

/// Solve the square system `a * x = b` by Gaussian elimination with partial
/// pivoting. `None` when the matrix is singular within `rel_tol`.
pub fn solve_linear(a: &[Vec<f64>], b: &[f64], rel_tol: f64) -> Option<Vec<f64>> {
    let n = a.len();
    if n == 0 || b.len() != n || a.iter().any(|r| r.len() != n) {
        return None;
    }
    let scale = a
        .iter()
        .flat_map(|r| r.iter())
        .fold(0.0_f64, |m, v| m.max(v.abs()))
        .max(1.0);
    let tol = rel_tol * scale;

    let mut aug: Vec<Vec<f64>> = a
        .iter()
        .zip(b)
        .map(|(row, rhs)| {
            let mut r = row.clone();
            r.push(*rhs);
            r
        })
        .collect();

    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| {
            aug[i][col]
                .abs()
                .partial_cmp(&aug[j][col].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        if aug[pivot][col].abs() <= tol {
            return None;
        }
        aug.swap(col, pivot);
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = aug[row][col] / aug[col][col];
            for c in col..=n {
                let v = aug[col][c];
                aug[row][c] -= factor * v;
            }
        }
    }

    let mut x = vec![0.0; n];
    for i in 0..n {
        x[i] = aug[i][n] / aug[i][i];
        if !x[i].is_finite() {
            return None;
        }
    }
    Some(x)
}

/// Least-squares solve of an overdetermined `a * x = b` via normal
/// equations. Adequate for the small well-scaled systems seen here.
pub fn solve_least_squares(a: &[Vec<f64>], b: &[f64], rel_tol: f64) -> Option<Vec<f64>> {
    let rows = a.len();
    if rows == 0 || b.len() != rows {
        return None;
    }
    let cols = a[0].len();
    if a.iter().any(|r| r.len() != cols) {
        return None;
    }

    // ata = A^T A, atb = A^T b
    let mut ata = vec![vec![0.0; cols]; cols];
    let mut atb = vec![0.0; cols];
    for r in 0..rows {
        for i in 0..cols {
            atb[i] += a[r][i] * b[r];
            for j in 0..cols {
                ata[i][j] += a[r][i] * a[r][j];
            }
        }
    }
    solve_linear(&ata, &atb, rel_tol)
}

/// Euclidean norm
pub fn l2_norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_full() {
        let m = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let r = rank_and_redundant(&m, 1e-9);
        assert_eq!(r.rank, 2);
        assert!(r.redundant.is_empty());
    }

    #[test]
    fn test_rank_flags_later_duplicate() {
        // Second row is twice the first; the later row gets flagged
        let m = vec![vec![1.0, 1.0], vec![2.0, 2.0]];
        let r = rank_and_redundant(&m, 1e-9);
        assert_eq!(r.rank, 1);
        assert_eq!(r.redundant, vec![1]);
        assert_eq!(r.dependence.len(), 1);
        let (row, pivot, factor) = r.dependence[0];
        assert_eq!((row, pivot), (1, 0));
        assert!((factor - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_rank_deficient_three_rows() {
        let m = vec![
            vec![1.0, 0.0, 1.0],
            vec![0.0, 1.0, 1.0],
            vec![1.0, 1.0, 2.0],
        ];
        let r = rank_and_redundant(&m, 1e-9);
        assert_eq!(r.rank, 2);
        assert_eq!(r.redundant, vec![2]);
    }

    #[test]
    fn test_rank_zero_matrix() {
        let m = vec![vec![0.0, 0.0]];
        let r = rank_and_redundant(&m, 1e-9);
        assert_eq!(r.rank, 0);
        assert_eq!(r.redundant, vec![0]);
    }

    #[test]
    fn test_solve_linear_2x2() {
        // x + y = 5, x - y = 1 -> x = 3, y = 2
        let a = vec![vec![1.0, 1.0], vec![1.0, -1.0]];
        let x = solve_linear(&a, &[5.0, 1.0], 1e-9).unwrap();
        assert!((x[0] - 3.0).abs() < 1e-12);
        assert!((x[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_solve_linear_singular() {
        let a = vec![vec![1.0, 1.0], vec![2.0, 2.0]];
        assert!(solve_linear(&a, &[1.0, 2.0], 1e-9).is_none());
    }

    #[test]
    fn test_least_squares_overdetermined() {
        // Fit x = 2 from three consistent observations
        let a = vec![vec![1.0], vec![1.0], vec![1.0]];
        let x = solve_least_squares(&a, &[2.0, 2.0, 2.0], 1e-9).unwrap();
        assert!((x[0] - 2.0).abs() < 1e-12);
    }
}
