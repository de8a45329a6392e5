use faer::MatRef;
use rayon::prelude::*;

use crate::core::sparse::ColumnAccess;
use crate::errors::NmfError;
use crate::utils::run_with_threads;

/// Mean squared reconstruction error of `w^T * diag(d) * h` against `a`
///
/// `w` may be handed over in either orientation; when its row count
/// matches that of `h` it is taken to be in wide form and transposed
/// first. The diagonal is folded into the tall factor, then each
/// column residual `w * h[:,i]` minus the column entries of `a` fills
/// its own slot of a losses vector; the slots are summed sequentially
/// afterwards, so no locking is needed and the total is bit-identical
/// for any worker count.
///
/// ### Params
///
/// * `a` - The m x n target, dense or sparse
/// * `w` - The left factor, m x k or k x m
/// * `d` - The scaling diagonal, length k
/// * `h` - The right factor, k x n
/// * `threads` - Worker count, 0 for the current rayon pool
///
/// ### Returns
///
/// Total squared error divided by `m * n`.
pub fn mse<A: ColumnAccess + Sync>(
    a: &A,
    w: MatRef<f64>,
    d: &[f64],
    h: MatRef<f64>,
    threads: usize,
) -> Result<f64, NmfError> {
    let m = a.rows();
    let n = a.cols();
    let k = h.nrows();

    if h.ncols() != n {
        return Err(NmfError::InvalidShape(format!(
            "h has {} columns but the target has {}",
            h.ncols(),
            n
        )));
    }
    if d.len() != k {
        return Err(NmfError::InvalidShape(format!(
            "the diagonal has {} entries but the rank is {}",
            d.len(),
            k
        )));
    }

    // bring w into tall m x k orientation and fold in the diagonal
    let mut w_scaled = if w.nrows() == h.nrows() {
        w.transpose().to_owned()
    } else {
        w.to_owned()
    };
    if w_scaled.nrows() != m || w_scaled.ncols() != k {
        return Err(NmfError::InvalidShape(format!(
            "w is {}x{} but the target is {}x{} with rank {}",
            w.nrows(),
            w.ncols(),
            m,
            n,
            k
        )));
    }
    for i in 0..k {
        for j in 0..m {
            w_scaled[(j, i)] *= d[i];
        }
    }

    // one loss slot per column; summing the slots sequentially keeps
    // the total independent of how the columns were scheduled
    let losses: Vec<f64> = run_with_threads(threads, || {
        (0..n)
            .into_par_iter()
            .map(|i| {
                let mut wh_i = vec![0.0_f64; m];
                for j in 0..k {
                    let h_ji = h[(j, i)];
                    for r in 0..m {
                        wh_i[r] += w_scaled[(r, j)] * h_ji;
                    }
                }
                a.for_each_in_col(i, |row, value| {
                    wh_i[row] -= value;
                });
                wh_i.iter().map(|v| v * v).sum::<f64>()
            })
            .collect()
    });

    Ok(losses.iter().sum::<f64>() / (m as f64 * n as f64))
}

///////////
// Tests //
///////////
