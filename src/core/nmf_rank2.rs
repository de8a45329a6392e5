use faer::{Mat, MatRef};

use crate::core::nmf::{checkpoint, CancelToken, NmfFit, NmfOptions};
use crate::core::nnls::nnls2;
use crate::core::sparse::{ColumnAccess, SparseColumnRef};
use crate::errors::NmfError;
use crate::utils::pearson_distance;

/// Rank-2 factorization of a dense matrix
///
/// Same contract as the general driver but seeded by `h` and expanded
/// around the closed-form 2 x 2 solver; the work per iteration is a
/// couple of passes over the stored entries plus one case split per
/// row and column, so the loop runs fully sequentially.
///
/// ### Params
///
/// * `a` - The m x n target
/// * `h_init` - Initial h, 2 x n
/// * `opts` - Driver options; the penalties, solver limits and
///   `threads` are not consulted on this path
/// * `cancel` - Optional cancellation token
///
/// ### Returns
///
/// The fitted factorization.
pub fn nmf2_dense(
    a: MatRef<f64>,
    h_init: MatRef<f64>,
    opts: &NmfOptions,
    cancel: Option<&CancelToken>,
) -> Result<NmfFit, NmfError> {
    nmf2_core(&a, h_init, opts, cancel)
}

/// Rank-2 factorization of a sparse matrix
///
/// The transpose is never needed: the w update scatters the stored
/// entries of each column into a 2 x m right-hand side instead of
/// walking a transposed view.
///
/// ### Params
///
/// * `a` - The m x n target as a CSC view
/// * `h_init` - Initial h, 2 x n
/// * `opts` - Driver options
/// * `cancel` - Optional cancellation token
///
/// ### Returns
///
/// The fitted factorization.
pub fn nmf2_sparse(
    a: &SparseColumnRef,
    h_init: MatRef<f64>,
    opts: &NmfOptions,
    cancel: Option<&CancelToken>,
) -> Result<NmfFit, NmfError> {
    nmf2_core(a, h_init, opts, cancel)
}

fn nmf2_core<A: ColumnAccess>(
    a: &A,
    h_init: MatRef<f64>,
    opts: &NmfOptions,
    cancel: Option<&CancelToken>,
) -> Result<NmfFit, NmfError> {
    let m = a.rows();
    let n = a.cols();

    if h_init.nrows() != 2 {
        return Err(NmfError::InvalidShape(format!(
            "the rank-2 driver needs a 2-row seed, got {} rows",
            h_init.nrows()
        )));
    }
    if h_init.ncols() != n {
        return Err(NmfError::InvalidShape(format!(
            "the seed has {} columns but the target has {}",
            h_init.ncols(),
            n
        )));
    }

    checkpoint(cancel)?;

    if m == 0 || n == 0 {
        return Ok(NmfFit {
            w: Mat::zeros(m, 2),
            d: vec![1.0, 1.0],
            h: Mat::zeros(2, n),
            tol: 1.0,
            iter: 0,
        });
    }

    let mut h = h_init.to_owned();
    let mut w = Mat::<f64>::zeros(2, m);
    let mut wb = Mat::<f64>::zeros(2, m);
    let mut d = vec![1.0_f64, 1.0];
    let mut tol_ = 1.0;
    let mut it = 0;

    if opts.verbose {
        println!("\n{:>4} | {:>8}", "iter", "tol");
        println!("---------------");
    }

    while it < opts.maxit {
        // update w: scatter-accumulate the right-hand sides, one case
        // split per row
        let g = &h * h.transpose();
        for j in 0..m {
            wb[(0, j)] = 0.0;
            wb[(1, j)] = 0.0;
        }
        for i in 0..n {
            let h0 = h[(0, i)];
            let h1 = h[(1, i)];
            a.for_each_in_col(i, |row, value| {
                wb[(0, row)] += value * h0;
                wb[(1, row)] += value * h1;
            });
        }
        for i in 0..m {
            let (x0, x1) = nnls2(g.as_ref(), wb[(0, i)], wb[(1, i)], opts.nonneg);
            w[(0, i)] = x0;
            w[(1, i)] = x1;
        }

        // reset the diagonal and scale w
        if opts.diag {
            for i in 0..2 {
                let mut sum = 0.0;
                for j in 0..m {
                    sum += w[(i, j)];
                }
                d[i] = sum + 1e-15;
                for j in 0..m {
                    w[(i, j)] /= d[i];
                }
            }
        }

        // update h, one case split per column
        let h_it = h.clone();
        let g = &w * w.transpose();
        for i in 0..n {
            let mut b0 = 0.0;
            let mut b1 = 0.0;
            a.for_each_in_col(i, |row, value| {
                b0 += value * w[(0, row)];
                b1 += value * w[(1, row)];
            });
            let (x0, x1) = nnls2(g.as_ref(), b0, b1, opts.nonneg);
            h[(0, i)] = x0;
            h[(1, i)] = x1;
        }

        // reset the diagonal and scale h
        if opts.diag {
            for i in 0..2 {
                let mut sum = 0.0;
                for j in 0..n {
                    sum += h[(i, j)];
                }
                d[i] = sum + 1e-15;
                for j in 0..n {
                    h[(i, j)] /= d[i];
                }
            }
        }

        tol_ = pearson_distance(h.as_ref(), h_it.as_ref());
        if opts.verbose {
            println!("{:>4} | {:>8.2e}", it + 1, tol_);
        }
        checkpoint(cancel)?;

        if tol_ < opts.tol {
            break;
        }
        it += 1;
    }

    // sort the two factors by diagonal value
    if opts.diag && d[0] < d[1] {
        for j in 0..m {
            let w0 = w[(0, j)];
            w[(0, j)] = w[(1, j)];
            w[(1, j)] = w0;
        }
        for j in 0..n {
            let h0 = h[(0, j)];
            h[(0, j)] = h[(1, j)];
            h[(1, j)] = h0;
        }
        d.swap(0, 1);
    }

    Ok(NmfFit {
        w: w.transpose().to_owned(),
        d,
        h,
        tol: tol_,
        iter: it,
    })
}

///////////
// Tests //
///////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::loss::mse;
    use crate::core::sparse::SparseColumnMatrix;
    use faer::mat;

    fn rank_two_target() -> Mat<f64> {
        // w^T * h for w = [[1, 2, 0.5], [0.2, 1, 3]], h = [[1, 0, 2, 1], [0.5, 1, 0, 2]]
        let w = mat![[1.0, 2.0, 0.5], [0.2, 1.0, 3.0]];
        let h = mat![[1.0, 0.0, 2.0, 1.0], [0.5, 1.0, 0.0, 2.0]];
        w.transpose() * &h
    }

    #[test]
    fn test_rank_two_recovery() {
        let a = rank_two_target();
        let h0 = mat![[1.0, 0.5, 1.0, 0.8], [0.3, 1.0, 0.4, 1.0]];

        let opts = NmfOptions {
            tol: 1e-10,
            maxit: 500,
            ..NmfOptions::default()
        };
        let fit = nmf2_dense(a.as_ref(), h0.as_ref(), &opts, None).unwrap();

        assert_eq!(fit.w.nrows(), 3);
        assert_eq!(fit.w.ncols(), 2);
        assert_eq!(fit.h.nrows(), 2);
        assert_eq!(fit.h.ncols(), 4);

        let err = mse(&a.as_ref(), fit.w.as_ref(), &fit.d, fit.h.as_ref(), 0).unwrap();
        assert!(err < 1e-10, "rank-2 fit left error {}", err);
    }

    #[test]
    fn test_rank_two_sparse_matches_dense() {
        let mut a = rank_two_target();
        a[(1, 1)] = 0.0;
        a[(2, 3)] = 0.0;
        let sparse = SparseColumnMatrix::from_dense_matrix(a.as_ref());
        let h0 = mat![[1.0, 0.5, 1.0, 0.8], [0.3, 1.0, 0.4, 1.0]];

        let opts = NmfOptions {
            tol: 1e-8,
            maxit: 200,
            ..NmfOptions::default()
        };
        let dense_fit = nmf2_dense(a.as_ref(), h0.as_ref(), &opts, None).unwrap();
        let sparse_fit = nmf2_sparse(&sparse.as_view(), h0.as_ref(), &opts, None).unwrap();

        assert_eq!(dense_fit.iter, sparse_fit.iter);
        for i in 0..dense_fit.w.nrows() {
            for j in 0..2 {
                assert!((dense_fit.w[(i, j)] - sparse_fit.w[(i, j)]).abs() < 1e-12);
            }
        }
        for i in 0..2 {
            for j in 0..dense_fit.h.ncols() {
                assert!((dense_fit.h[(i, j)] - sparse_fit.h[(i, j)]).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_rank_two_factors_sorted_and_nonneg() {
        let a = rank_two_target();
        let h0 = mat![[0.2, 1.0, 0.1, 0.9], [1.0, 0.3, 1.0, 0.2]];

        let opts = NmfOptions {
            tol: 1e-8,
            maxit: 200,
            ..NmfOptions::default()
        };
        let fit = nmf2_dense(a.as_ref(), h0.as_ref(), &opts, None).unwrap();

        assert!(fit.d[0] >= fit.d[1]);
        assert!(fit.d.iter().all(|&v| v > 0.0));
        assert!(fit.w.col_iter().all(|c| c.iter().all(|&v| v >= 0.0)));
        assert!(fit.h.col_iter().all(|c| c.iter().all(|&v| v >= 0.0)));
    }

    #[test]
    fn test_rank_two_rejects_bad_seed() {
        let a = rank_two_target();
        let h0 = mat![[1.0, 0.5, 1.0, 0.8]];

        let res = nmf2_dense(a.as_ref(), h0.as_ref(), &NmfOptions::default(), None);
        assert!(matches!(res, Err(NmfError::InvalidShape(_))));
    }

    #[test]
    fn test_rank_two_cancellation() {
        let a = rank_two_target();
        let h0 = mat![[1.0, 0.5, 1.0, 0.8], [0.3, 1.0, 0.4, 1.0]];

        let token = CancelToken::new();
        token.cancel();
        let res = nmf2_dense(a.as_ref(), h0.as_ref(), &NmfOptions::default(), Some(&token));
        assert!(matches!(res, Err(NmfError::Cancelled)));
    }

    #[test]
    fn test_rank_two_empty_target() {
        let a = Mat::<f64>::zeros(0, 0);
        let h0 = Mat::<f64>::zeros(2, 0);

        let fit = nmf2_dense(a.as_ref(), h0.as_ref(), &NmfOptions::default(), None).unwrap();
        assert_eq!(fit.iter, 0);
        assert_eq!(fit.d, vec![1.0, 1.0]);
    }
}
