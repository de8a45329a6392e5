use faer::linalg::solvers::Llt;
use faer::{Mat, MatRef, Side};
use rayon::prelude::*;

use crate::core::nnls::nnls;
use crate::core::sparse::ColumnAccess;
use crate::errors::NmfError;
use crate::utils::run_with_threads;

/// Project a factor matrix onto a target, solving `A ~ w^T * h` for `h`
///
/// `w` must be in wide form (k rows, one column per row of `A`). The
/// Gram matrix `w * w^T` receives a ridge of `1e-15` on its diagonal and
/// is factorized once; the factorization is shared read-only by all
/// workers. Columns of `A` are independent problems and are solved in
/// parallel with dynamic scheduling: each worker accumulates its own
/// right-hand side from the column entries, shifts it by `l1` when a
/// penalty is set, and writes the solution into its own column of `h`.
/// An error in any worker aborts the whole call.
///
/// ### Params
///
/// * `a` - The m x n target, dense or sparse
/// * `w` - The fixed factor in wide k x m form
/// * `nonneg` - Constrain the solutions to be non-negative
/// * `fast_maxit` - Active set rounds per column solve
/// * `cd_maxit` - Coordinate descent sweeps per column solve
/// * `cd_tol` - Coordinate descent tolerance
/// * `l1` - L1 penalty subtracted from every right-hand side entry
/// * `threads` - Worker count, 0 for the current rayon pool
///
/// ### Returns
///
/// The k x n solution matrix `h`.
pub fn project<A: ColumnAccess + Sync>(
    a: &A,
    w: MatRef<f64>,
    nonneg: bool,
    fast_maxit: usize,
    cd_maxit: usize,
    cd_tol: f64,
    l1: f64,
    threads: usize,
) -> Result<Mat<f64>, NmfError> {
    let k = w.nrows();
    if k == 0 {
        return Err(NmfError::InvalidShape(
            "the factor rank must be at least 1".to_string(),
        ));
    }
    if w.ncols() != a.rows() {
        return Err(NmfError::InvalidShape(format!(
            "the factor has {} columns but the target has {} rows",
            w.ncols(),
            a.rows()
        )));
    }

    let mut gram = w * w.transpose();
    for i in 0..k {
        gram[(i, i)] += 1e-15;
    }
    let a_llt = match Llt::new(gram.as_ref(), Side::Lower) {
        Ok(f) => f,
        Err(_) => {
            return Err(NmfError::NumericFailure(
                "Cholesky factorization of the Gram matrix failed".to_string(),
            ))
        }
    };

    let mut h = Mat::<f64>::zeros(k, a.cols());
    let gram_ref = gram.as_ref();
    run_with_threads(threads, || {
        h.par_col_iter_mut()
            .enumerate()
            .try_for_each(|(i, mut h_i)| {
                let mut b = vec![0.0_f64; k];
                a.for_each_in_col(i, |row, value| {
                    for j in 0..k {
                        b[j] += value * w[(j, row)];
                    }
                });
                if l1 != 0.0 {
                    for b_j in b.iter_mut() {
                        *b_j -= l1;
                    }
                }

                let x = nnls(gram_ref, &b, &a_llt, fast_maxit, cd_maxit, cd_tol, nonneg)?;
                for j in 0..k {
                    h_i[j] = x[j];
                }
                Ok(())
            })
    })?;

    Ok(h)
}

///////////
// Tests //
///////////
