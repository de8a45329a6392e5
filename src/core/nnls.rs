use faer::linalg::solvers::{Llt, Solve};
use faer::{Mat, MatRef, Side};

use crate::errors::NmfError;
use crate::utils::submat;

/// Coordinate descent least squares given an initial `x`
///
/// Polishes `x` towards `argmin ||a*x - b||^2` (subject to `x >= 0` when
/// `nonneg`) by cyclic single-coordinate updates. A running gradient
/// `a*x - b` is kept so each coordinate update costs one column pass.
/// The sweep statistic is the largest relative single-coordinate change
/// `2*|delta| / (x_new + x_old + 1e-16)`; iteration stops when it drops to
/// `cd_tol` or after `cd_maxit` sweeps. With `cd_maxit == 0` the input
/// is returned unchanged.
///
/// The diagonal of `a` must be non-zero; the ridge added to every Gram
/// matrix in this crate guarantees that for the internal callers.
///
/// ### Params
///
/// * `a` - Symmetric positive-definite k x k matrix
/// * `b` - Right-hand side of length k
/// * `x` - Starting point, consumed and returned refined
/// * `cd_maxit` - Maximum number of sweeps
/// * `cd_tol` - Stopping tolerance on the sweep statistic
/// * `nonneg` - Clamp negative proposals to zero
///
/// ### Returns
///
/// The refined solution.
pub fn cdnnls(
    a: MatRef<f64>,
    b: &[f64],
    mut x: Vec<f64>,
    cd_maxit: usize,
    cd_tol: f64,
    nonneg: bool,
) -> Vec<f64> {
    let k = x.len();

    // running gradient a * x - b
    let mut b0 = vec![0.0_f64; k];
    for i in 0..k {
        for j in 0..k {
            b0[i] += a[(i, j)] * x[j];
        }
        b0[i] -= b[i];
    }

    let mut tol_it = 1.0 + cd_tol;
    let mut it = 0;
    while it < cd_maxit && tol_it > cd_tol {
        tol_it = 0.0;
        for i in 0..k {
            let mut x_i = x[i] - b0[i] / a[(i, i)];
            if nonneg && x_i < 0.0 {
                x_i = 0.0;
            }
            if x_i != x[i] {
                let delta = x_i - x[i];
                for j in 0..k {
                    b0[j] += a[(j, i)] * delta;
                }
                let tol_xi = 2.0 * (x[i] - x_i).abs() / (x_i + x[i] + 1e-16);
                if tol_xi > tol_it {
                    tol_it = tol_xi;
                }
                x[i] = x_i;
            }
        }
        it += 1;
    }

    x
}

/// Fast active set tuning least squares over a shared Cholesky
///
/// Starts from the unconstrained solution through the caller-supplied
/// factorization of `a`, then (when `nonneg`) repeatedly re-solves the
/// unconstrained problem on the current feasible set `{i : x_i > 0}`,
/// zeroing everything else, until no negative values remain or
/// `fast_maxit` rounds have run. The feasible set only shrinks, so the
/// loop terminates. A coordinate descent polish enforces the KKT
/// conditions afterwards; with `nonneg == false` that polish degenerates
/// to plain Gauss-Seidel, and with `cd_maxit == 0 && nonneg` the active
/// set solution is returned as-is.
///
/// ### Params
///
/// * `a` - Symmetric positive-definite k x k matrix
/// * `b` - Right-hand side of length k
/// * `a_llt` - Cholesky factorization of `a`, amortized by the caller
///   across many right-hand sides
/// * `fast_maxit` - Maximum number of feasible set reduction rounds
/// * `cd_maxit` - Maximum number of polish sweeps
/// * `cd_tol` - Polish stopping tolerance
/// * `nonneg` - Solve subject to `x >= 0`
///
/// ### Returns
///
/// The solution vector, or `NumericFailure` when a feasible-set
/// submatrix cannot be factorized.
pub fn nnls(
    a: MatRef<f64>,
    b: &[f64],
    a_llt: &Llt<f64>,
    fast_maxit: usize,
    cd_maxit: usize,
    cd_tol: f64,
    nonneg: bool,
) -> Result<Vec<f64>, NmfError> {
    let k = b.len();

    // unconstrained least squares solution
    let b_mat = Mat::from_fn(k, 1, |i, _| b[i]);
    let x_mat = a_llt.solve(&b_mat);
    let mut x: Vec<f64> = (0..k).map(|i| x_mat[(i, 0)]).collect();

    let mut it = 0;
    while nonneg && it < fast_maxit && x.iter().any(|&v| v < 0.0) {
        let gtz: Vec<usize> = (0..k).filter(|&i| x[i] > 0.0).collect();
        if gtz.is_empty() {
            for v in x.iter_mut() {
                *v = 0.0;
            }
            break;
        }

        let a_sub = submat(a, &gtz);
        let b_sub = Mat::from_fn(gtz.len(), 1, |i, _| b[gtz[i]]);
        let sub_llt = match Llt::new(a_sub.as_ref(), Side::Lower) {
            Ok(f) => f,
            Err(_) => {
                return Err(NmfError::NumericFailure(
                    "Cholesky factorization failed on a feasible-set submatrix".to_string(),
                ))
            }
        };
        let x_sub = sub_llt.solve(&b_sub);

        for v in x.iter_mut() {
            *v = 0.0;
        }
        for (i, &gi) in gtz.iter().enumerate() {
            x[gi] = x_sub[(i, 0)];
        }
        it += 1;
    }

    if cd_maxit == 0 && nonneg {
        Ok(x)
    } else {
        Ok(cdnnls(a, b, x, cd_maxit, cd_tol, nonneg))
    }
}

/// Closed-form least squares for a shared 2 x 2 system
///
/// Case analysis on the KKT conditions: either both coordinates of the
/// unconstrained Cramer solution are feasible, or exactly one of them
/// is clamped to zero and the other solved in isolation. The three
/// cases exhaust the optimal active sets of a 2-variable problem.
///
/// ### Params
///
/// * `a` - Symmetric positive-definite 2 x 2 matrix
/// * `b0`, `b1` - Right-hand side
/// * `nonneg` - Solve subject to `x >= 0`
///
/// ### Returns
///
/// The solution pair `(x0, x1)`.
pub fn nnls2(a: MatRef<f64>, b0: f64, b1: f64, nonneg: bool) -> (f64, f64) {
    let denom = a[(0, 0)] * a[(1, 1)] - a[(0, 1)] * a[(0, 1)];
    if nonneg {
        let a01b1 = a[(0, 1)] * b1;
        let a11b0 = a[(1, 1)] * b0;
        if a11b0 < a01b1 {
            (0.0, b1 / a[(1, 1)])
        } else {
            let a01b0 = a[(0, 1)] * b0;
            let a00b1 = a[(0, 0)] * b1;
            if a00b1 < a01b0 {
                (b0 / a[(0, 0)], 0.0)
            } else {
                ((a11b0 - a01b1) / denom, (a00b1 - a01b0) / denom)
            }
        }
    } else {
        (
            (a[(1, 1)] * b0 - a[(0, 1)] * b1) / denom,
            (a[(0, 0)] * b1 - a[(0, 1)] * b0) / denom,
        )
    }
}

/// Solve one least squares problem per column of `b`
///
/// The factorization of `a` is computed once and shared across all
/// columns.
///
/// ### Params
///
/// * `a` - Symmetric positive-definite k x k matrix
/// * `b` - k x p matrix of right-hand sides
/// * `fast_maxit`, `cd_maxit`, `cd_tol`, `nonneg` - Passed through to
///   the per-column solver
///
/// ### Returns
///
/// A k x p matrix whose column i solves `a*x = b[:,i]`.
pub fn nnls_mat(
    a: MatRef<f64>,
    b: MatRef<f64>,
    fast_maxit: usize,
    cd_maxit: usize,
    cd_tol: f64,
    nonneg: bool,
) -> Result<Mat<f64>, NmfError> {
    let k = a.nrows();
    if a.ncols() != k {
        return Err(NmfError::InvalidShape(format!(
            "the system matrix must be square, got {}x{}",
            a.nrows(),
            a.ncols()
        )));
    }
    if b.nrows() != k {
        return Err(NmfError::InvalidShape(format!(
            "right-hand sides have {} rows but the system is {}x{}",
            b.nrows(),
            k,
            k
        )));
    }

    let a_llt = match Llt::new(a, Side::Lower) {
        Ok(f) => f,
        Err(_) => {
            return Err(NmfError::NumericFailure(
                "Cholesky factorization of the system matrix failed".to_string(),
            ))
        }
    };

    let mut out = Mat::<f64>::zeros(k, b.ncols());
    for i in 0..b.ncols() {
        let b_i: Vec<f64> = (0..k).map(|j| b[(j, i)]).collect();
        let x = nnls(a, &b_i, &a_llt, fast_maxit, cd_maxit, cd_tol, nonneg)?;
        for j in 0..k {
            out[(j, i)] = x[j];
        }
    }

    Ok(out)
}

/// Coordinate descent polish for each column of `x`
///
/// ### Params
///
/// * `a` - Symmetric positive-definite k x k matrix
/// * `b` - k x p matrix of right-hand sides
/// * `x` - k x p matrix of starting points
/// * `cd_maxit`, `cd_tol`, `nonneg` - Passed through to the polish
///
/// ### Returns
///
/// The polished starting points.
pub fn cdnnls_mat(
    a: MatRef<f64>,
    b: MatRef<f64>,
    x: MatRef<f64>,
    cd_maxit: usize,
    cd_tol: f64,
    nonneg: bool,
) -> Result<Mat<f64>, NmfError> {
    let k = a.nrows();
    if a.ncols() != k || b.nrows() != k {
        return Err(NmfError::InvalidShape(format!(
            "expected a square system matching {} right-hand side rows, got {}x{}",
            b.nrows(),
            a.nrows(),
            a.ncols()
        )));
    }
    if x.nrows() != b.nrows() || x.ncols() != b.ncols() {
        return Err(NmfError::InvalidShape(format!(
            "starting points are {}x{} but right-hand sides are {}x{}",
            x.nrows(),
            x.ncols(),
            b.nrows(),
            b.ncols()
        )));
    }

    let mut out = Mat::<f64>::zeros(k, b.ncols());
    for i in 0..b.ncols() {
        let b_i: Vec<f64> = (0..k).map(|j| b[(j, i)]).collect();
        let x_i: Vec<f64> = (0..k).map(|j| x[(j, i)]).collect();
        let x_i = cdnnls(a, &b_i, x_i, cd_maxit, cd_tol, nonneg);
        for j in 0..k {
            out[(j, i)] = x_i[j];
        }
    }

    Ok(out)
}

///////////
// Tests //
///////////

#[cfg(test)]
mod tests {
    use super::*;
    use faer::mat;

    fn llt_of(a: MatRef<f64>) -> Llt<f64> {
        Llt::new(a, Side::Lower).unwrap()
    }

    #[test]
    fn test_nnls_active_set() {
        let a = mat![[2.0, 1.0], [1.0, 2.0]];
        let b = vec![1.0, -1.0];

        let x = nnls(a.as_ref(), &b, &llt_of(a.as_ref()), 10, 100, 1e-8, true).unwrap();

        assert!((x[0] - 0.5).abs() < 1e-12);
        assert_eq!(x[1], 0.0);
    }

    #[test]
    fn test_nnls_unconstrained() {
        let a = mat![[2.0, 1.0], [1.0, 2.0]];
        let b = vec![1.0, 1.0];

        let x = nnls(a.as_ref(), &b, &llt_of(a.as_ref()), 10, 100, 1e-8, false).unwrap();

        assert!((x[0] - 1.0 / 3.0).abs() < 1e-12);
        assert!((x[1] - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_nnls_pure_least_squares_matches_cholesky() {
        let a = mat![[4.0, 1.0, 0.5], [1.0, 3.0, 0.2], [0.5, 0.2, 2.0]];
        let b = vec![1.0, -2.0, 0.7];

        let a_llt = llt_of(a.as_ref());
        let x = nnls(a.as_ref(), &b, &a_llt, 10, 0, 1e-8, false).unwrap();

        let b_mat = Mat::from_fn(3, 1, |i, _| b[i]);
        let expected = a_llt.solve(&b_mat);
        for i in 0..3 {
            assert_eq!(x[i], expected[(i, 0)]);
        }
    }

    #[test]
    fn test_nnls_feasible_solution_unchanged() {
        // unconstrained optimum is already non-negative
        let a = mat![[2.0, 0.0], [0.0, 3.0]];
        let b = vec![2.0, 6.0];

        let x = nnls(a.as_ref(), &b, &llt_of(a.as_ref()), 10, 100, 1e-8, true).unwrap();

        assert!((x[0] - 1.0).abs() < 1e-12);
        assert!((x[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_nnls_nonneg_invariant() {
        let a = mat![[3.0, 1.2, 0.4], [1.2, 2.0, 0.9], [0.4, 0.9, 1.5]];
        let rhs = [
            vec![1.0, -5.0, 2.0],
            vec![-1.0, -1.0, -1.0],
            vec![0.0, 3.0, -4.0],
        ];

        let a_llt = llt_of(a.as_ref());
        for b in rhs.iter() {
            let x = nnls(a.as_ref(), b, &a_llt, 10, 100, 1e-8, true).unwrap();
            assert!(x.iter().all(|&v| v >= 0.0));
        }
    }

    #[test]
    fn test_cdnnls_zero_sweeps_is_a_noop() {
        let a = mat![[2.0, 1.0], [1.0, 2.0]];
        let b = vec![1.0, 1.0];
        let x0 = vec![0.7, -0.3];

        let x = cdnnls(a.as_ref(), &b, x0.clone(), 0, 1e-8, true);
        assert_eq!(x, x0);
    }

    #[test]
    fn test_cdnnls_converges_from_zero() {
        let a = mat![[2.0, 0.0], [0.0, 4.0]];
        let b = vec![2.0, 2.0];

        let x = cdnnls(a.as_ref(), &b, vec![0.0, 0.0], 100, 1e-10, true);
        assert!((x[0] - 1.0).abs() < 1e-9);
        assert!((x[1] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_nnls2_matches_general_solver() {
        let grams = [
            mat![[2.0, 1.0], [1.0, 2.0]],
            mat![[4.0, 1.0], [1.0, 3.0]],
            mat![[1.0, 0.2], [0.2, 2.0]],
        ];
        let rhs = [
            (1.0, -1.0),
            (-1.0, 1.0),
            (2.0, 3.0),
            (-0.5, -0.5),
            (0.0, 1.0),
        ];

        for a in grams.iter() {
            let a_llt = llt_of(a.as_ref());
            for &(b0, b1) in rhs.iter() {
                let (x0, x1) = nnls2(a.as_ref(), b0, b1, true);
                let general =
                    nnls(a.as_ref(), &[b0, b1], &a_llt, 10, 100, 1e-10, true).unwrap();
                assert!(
                    (x0 - general[0]).abs() < 1e-10 && (x1 - general[1]).abs() < 1e-10,
                    "rank-2 kernel diverged from the general solver for b = ({}, {})",
                    b0,
                    b1
                );
            }
        }
    }

    #[test]
    fn test_nnls2_unconstrained_matches_cramer() {
        let a = mat![[2.0, 1.0], [1.0, 2.0]];
        let (x0, x1) = nnls2(a.as_ref(), 1.0, 1.0, false);
        assert!((x0 - 1.0 / 3.0).abs() < 1e-12);
        assert!((x1 - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_nnls_mat_solves_each_column() {
        let a = mat![[2.0, 1.0], [1.0, 2.0]];
        let b = mat![[1.0, 1.0], [-1.0, 1.0]];

        let x = nnls_mat(a.as_ref(), b.as_ref(), 10, 100, 1e-8, true).unwrap();

        assert!((x[(0, 0)] - 0.5).abs() < 1e-12);
        assert_eq!(x[(1, 0)], 0.0);
        assert!((x[(0, 1)] - 1.0 / 3.0).abs() < 1e-12);
        assert!((x[(1, 1)] - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_nnls_mat_rejects_mismatched_shapes() {
        let a = mat![[2.0, 1.0], [1.0, 2.0]];
        let b = mat![[1.0], [2.0], [3.0]];

        let res = nnls_mat(a.as_ref(), b.as_ref(), 10, 100, 1e-8, true);
        assert!(matches!(res, Err(NmfError::InvalidShape(_))));
    }

    #[test]
    fn test_cdnnls_mat_polishes_columns() {
        let a = mat![[2.0, 0.0], [0.0, 4.0]];
        let b = mat![[2.0, 4.0], [2.0, 8.0]];
        let x0 = Mat::<f64>::zeros(2, 2);

        let x = cdnnls_mat(a.as_ref(), b.as_ref(), x0.as_ref(), 100, 1e-10, true).unwrap();

        assert!((x[(0, 0)] - 1.0).abs() < 1e-9);
        assert!((x[(1, 0)] - 0.5).abs() < 1e-9);
        assert!((x[(0, 1)] - 2.0).abs() < 1e-9);
        assert!((x[(1, 1)] - 2.0).abs() < 1e-9);
    }
}
