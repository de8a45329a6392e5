use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use faer::{Mat, MatRef};

use crate::core::project::project;
use crate::core::sparse::{ColumnAccess, SparseColumnRef};
use crate::errors::NmfError;
use crate::utils::{pearson_distance, reorder, reorder_rows, run_with_threads, sort_index_desc};

//////////////////////////////
// ENUMS, TYPES, STRUCTURES //
//////////////////////////////

/// Options for the alternating least squares drivers
///
/// ### Fields
///
/// * `tol` - Stop once `1 - corr` between successive factor iterates
///   drops below this value
/// * `nonneg` - Constrain both factors to be non-negative
/// * `l1_w` - L1 penalty applied during the w updates
/// * `l1_h` - L1 penalty applied during the h updates
/// * `maxit` - Hard cap on outer iterations
/// * `diag` - Rescale factor rows to unit sum after each update,
///   accumulating the scales into the diagonal
/// * `fast_maxit` - Active set rounds per column solve
/// * `cd_maxit` - Coordinate descent sweeps per column solve; 0 skips
///   the polish
/// * `cd_tol` - Coordinate descent tolerance
/// * `verbose` - Print one `iter | tol` line per iteration
/// * `threads` - Worker count for the projections; the pool is
///   acquired once per fit and shared by every projection. 0 keeps
///   the current rayon pool
///
/// The rank-2 driver ignores the penalties, the solver limits and
/// `threads`; its inner solve is closed-form and sequential.
#[derive(Clone, Debug)]
pub struct NmfOptions {
    pub tol: f64,
    pub nonneg: bool,
    pub l1_w: f64,
    pub l1_h: f64,
    pub maxit: usize,
    pub diag: bool,
    pub fast_maxit: usize,
    pub cd_maxit: usize,
    pub cd_tol: f64,
    pub verbose: bool,
    pub threads: usize,
}

impl Default for NmfOptions {
    fn default() -> Self {
        Self {
            tol: 1e-3,
            nonneg: true,
            l1_w: 0.0,
            l1_h: 0.0,
            maxit: 100,
            diag: true,
            fast_maxit: 10,
            cd_maxit: 100,
            cd_tol: 1e-8,
            verbose: false,
            threads: 0,
        }
    }
}

/// Result of a factorization
///
/// The approximation is `w * diag(d) * h`.
///
/// ### Fields
///
/// * `w` - The left factor, m x k
/// * `d` - The scaling diagonal, strictly positive and sorted in
///   decreasing order when the driver ran with `diag`
/// * `h` - The right factor, k x n
/// * `tol` - Final value of the convergence statistic
/// * `iter` - The zero-based index of the converging iteration, or
///   `maxit` when the loop exited by the iteration cap
#[derive(Clone, Debug)]
pub struct NmfFit {
    pub w: Mat<f64>,
    pub d: Vec<f64>,
    pub h: Mat<f64>,
    pub tol: f64,
    pub iter: usize,
}

/// Cooperative cancellation token
///
/// Cloned handles share one flag. The drivers poll it between major
/// phases only: a running parallel projection always drains before the
/// token is honored, and a tripped token surfaces as `Cancelled`
/// rather than a partial iterate.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    tripped: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the token; every clone observes the trip.
    pub fn cancel(&self) {
        self.tripped.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.tripped.load(Ordering::Relaxed)
    }
}

pub(crate) fn checkpoint(cancel: Option<&CancelToken>) -> Result<(), NmfError> {
    match cancel {
        Some(token) if token.is_cancelled() => Err(NmfError::Cancelled),
        _ => Ok(()),
    }
}

/////////////
// Drivers //
/////////////

/// Factorize a dense matrix by alternating least squares
///
/// The transpose needed for the w updates is taken as a view of `a`
/// when `symmetric`, otherwise as a transposed view; nothing is copied.
///
/// ### Params
///
/// * `a` - The m x n target
/// * `symmetric` - Reuse `a` in both update directions; requires a
///   square target
/// * `w_init` - Initial w in wide k x m form
/// * `opts` - Driver options
/// * `cancel` - Optional cancellation token
///
/// ### Returns
///
/// The fitted factorization.
pub fn nmf_dense(
    a: MatRef<f64>,
    symmetric: bool,
    w_init: MatRef<f64>,
    opts: &NmfOptions,
    cancel: Option<&CancelToken>,
) -> Result<NmfFit, NmfError> {
    if symmetric && a.nrows() != a.ncols() {
        return Err(NmfError::InvalidShape(format!(
            "a symmetric factorization needs a square target, got {}x{}",
            a.nrows(),
            a.ncols()
        )));
    }
    let at = if symmetric { a } else { a.transpose() };
    nmf_core(&a, &at, w_init, opts, cancel)
}

/// Factorize a sparse matrix by alternating least squares
///
/// ### Params
///
/// * `a` - The m x n target as a CSC view
/// * `at` - CSC view of the transpose; required unless `symmetric`
/// * `symmetric` - Reuse `a` in both update directions; requires a
///   square target
/// * `w_init` - Initial w in wide k x m form
/// * `opts` - Driver options
/// * `cancel` - Optional cancellation token
///
/// ### Returns
///
/// The fitted factorization.
pub fn nmf_sparse<'a>(
    a: &'a SparseColumnRef<'a>,
    at: Option<&'a SparseColumnRef<'a>>,
    symmetric: bool,
    w_init: MatRef<f64>,
    opts: &NmfOptions,
    cancel: Option<&CancelToken>,
) -> Result<NmfFit, NmfError> {
    let at_view = if symmetric {
        if a.rows() != a.cols() {
            return Err(NmfError::InvalidShape(format!(
                "a symmetric factorization needs a square target, got {}x{}",
                a.rows(),
                a.cols()
            )));
        }
        a
    } else {
        at.ok_or_else(|| {
            NmfError::InvalidShape(
                "the transposed target is required when the factorization is not symmetric"
                    .to_string(),
            )
        })?
    };
    nmf_core(a, at_view, w_init, opts, cancel)
}

/// Validation and worker pool setup shared by both entry points
///
/// The pool sized by `threads` is acquired once here and installed
/// around the whole iteration loop, so every projection of every
/// iteration reuses the same workers.
fn nmf_core<A: ColumnAccess + Sync>(
    a: &A,
    at: &A,
    w_init: MatRef<f64>,
    opts: &NmfOptions,
    cancel: Option<&CancelToken>,
) -> Result<NmfFit, NmfError> {
    let k = w_init.nrows();
    let m = a.rows();
    let n = a.cols();

    if k == 0 {
        return Err(NmfError::InvalidShape(
            "the factor rank must be at least 1".to_string(),
        ));
    }
    if w_init.ncols() != m {
        return Err(NmfError::InvalidShape(format!(
            "the initial factor has {} columns but the target has {} rows",
            w_init.ncols(),
            m
        )));
    }
    if at.rows() != n || at.cols() != m {
        return Err(NmfError::InvalidShape(format!(
            "the transposed target is {}x{} but the target is {}x{}",
            at.rows(),
            at.cols(),
            m,
            n
        )));
    }

    checkpoint(cancel)?;

    if m == 0 || n == 0 {
        return Ok(NmfFit {
            w: Mat::zeros(m, k),
            d: vec![1.0; k],
            h: Mat::zeros(k, n),
            tol: 1.0,
            iter: 0,
        });
    }

    run_with_threads(opts.threads, || nmf_als_loop(a, at, w_init, opts, cancel))
}

/// The alternating least squares loop proper
///
/// `at` is the transpose of `a` (or `a` itself for the symmetric
/// case). Per iteration: update h against `a`, rescale, snapshot w,
/// update w against `at`, rescale, then compare the new w with the
/// snapshot. The snapshot only lives long enough to compute the
/// statistic. Runs inside the pool acquired by `nmf_core`; the
/// projections join the current pool instead of building their own.
fn nmf_als_loop<A: ColumnAccess + Sync>(
    a: &A,
    at: &A,
    w_init: MatRef<f64>,
    opts: &NmfOptions,
    cancel: Option<&CancelToken>,
) -> Result<NmfFit, NmfError> {
    let k = w_init.nrows();
    let m = a.rows();
    let n = a.cols();

    let mut w = w_init.to_owned();
    let mut h = Mat::<f64>::zeros(k, n);
    let mut d = vec![1.0_f64; k];
    let mut tol_ = 1.0;
    let mut it = 0;

    if opts.verbose {
        println!("\n{:>4} | {:>8}", "iter", "tol");
        println!("---------------");
    }

    while it < opts.maxit {
        // update h
        h = project(
            a,
            w.as_ref(),
            opts.nonneg,
            opts.fast_maxit,
            opts.cd_maxit,
            opts.cd_tol,
            opts.l1_h,
            0,
        )?;
        checkpoint(cancel)?;

        // reset the diagonal and scale h
        if opts.diag {
            for i in 0..k {
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

        // update w against the snapshot of the previous iterate
        let w_it = w.clone();
        w = project(
            at,
            h.as_ref(),
            opts.nonneg,
            opts.fast_maxit,
            opts.cd_maxit,
            opts.cd_tol,
            opts.l1_w,
            0,
        )?;
        checkpoint(cancel)?;

        // reset the diagonal and scale w
        if opts.diag {
            for i in 0..k {
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

        tol_ = pearson_distance(w.as_ref(), w_it.as_ref());
        if opts.verbose {
            println!("{:>4} | {:>8.2e}", it + 1, tol_);
        }

        if tol_ < opts.tol {
            break;
        }
        it += 1;
    }

    // reorder factors by the diagonal
    if opts.diag {
        let indx = sort_index_desc(&d);
        w = reorder_rows(w.as_ref(), &indx);
        d = reorder(&d, &indx);
        h = reorder_rows(h.as_ref(), &indx);
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
