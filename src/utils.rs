use faer::{Mat, MatRef};

//////////////////////
// Sorting, reorder //
//////////////////////

/// Calculate the sort index of `d` in decreasing order
///
/// ### Params
///
/// * `d` - The values to rank
///
/// ### Returns
///
/// Index permutation such that `d[idx[0]] >= d[idx[1]] >= ...`
pub fn sort_index_desc(d: &[f64]) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..d.len()).collect();
    idx.sort_by(|&i1, &i2| d[i2].total_cmp(&d[i1]));
    idx
}

/// Reorder the rows of a matrix by an index permutation
///
/// The function will panic if the permutation length does not match the
/// number of rows.
///
/// ### Params
///
/// * `x` - The matrix to reorder
/// * `ind` - The row permutation; row `i` of the result is row `ind[i]`
///   of the input
///
/// ### Returns
///
/// The reordered matrix.
pub fn reorder_rows(x: MatRef<f64>, ind: &[usize]) -> Mat<f64> {
    assert_eq!(
        x.nrows(),
        ind.len(),
        "Permutation length {} does not match {} rows",
        ind.len(),
        x.nrows()
    );
    Mat::from_fn(x.nrows(), x.ncols(), |i, j| x[(ind[i], j)])
}

/// Reorder the elements of a vector by an index permutation
pub fn reorder(x: &[f64], ind: &[usize]) -> Vec<f64> {
    ind.iter().map(|&i| x[i]).collect()
}

/// Principal submatrix of `x` given by an index set
///
/// Gathers `x[ind, ind]` into an owned matrix; the gather is a deep
/// copy because the downstream factorization needs contiguous memory.
///
/// ### Params
///
/// * `x` - The square source matrix
/// * `ind` - The row/column indices to keep
///
/// ### Returns
///
/// The owned principal submatrix.
pub fn submat(x: MatRef<f64>, ind: &[usize]) -> Mat<f64> {
    Mat::from_fn(ind.len(), ind.len(), |i, j| x[(ind[i], ind[j])])
}

/////////////////
// Convergence //
/////////////////

/// One minus the Pearson correlation of two flattened matrices
///
/// Both matrices are treated as long vectors of equal length and the
/// textbook formula is applied in a single pass:
/// `(n*sum_xy - sum_x*sum_y) / sqrt((n*sum_x2 - sum_x^2) * (n*sum_y2 - sum_y^2))`.
/// Constant inputs make the denominator zero and the statistic NaN,
/// which callers treat as "not converged".
///
/// ### Params
///
/// * `x` - First matrix
/// * `y` - Second matrix, same number of entries
///
/// ### Returns
///
/// `1 - corr(flatten(x), flatten(y))`
pub fn pearson_distance(x: MatRef<f64>, y: MatRef<f64>) -> f64 {
    assert_eq!(
        x.nrows() * x.ncols(),
        y.nrows() * y.ncols(),
        "Matrices have different number of entries"
    );
    let n = (x.nrows() * x.ncols()) as f64;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_x2 = 0.0;
    let mut sum_y2 = 0.0;
    for j in 0..x.ncols() {
        for i in 0..x.nrows() {
            let x_i = x[(i, j)];
            let y_i = y[(i, j)];
            sum_x += x_i;
            sum_y += y_i;
            sum_xy += x_i * y_i;
            sum_x2 += x_i * x_i;
            sum_y2 += y_i * y_i;
        }
    }
    1.0 - (n * sum_xy - sum_x * sum_y)
        / ((n * sum_x2 - sum_x * sum_x) * (n * sum_y2 - sum_y * sum_y)).sqrt()
}

/////////////////
// Parallelism //
/////////////////

/// Run `op` inside a rayon pool sized to `threads`
///
/// `threads == 0` keeps the current (usually global) pool. Pool
/// construction failure falls back to the current pool as well.
pub(crate) fn run_with_threads<R, F>(threads: usize, op: F) -> R
where
    F: FnOnce() -> R + Send,
    R: Send,
{
    if threads == 0 {
        return op();
    }
    match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
        Ok(pool) => pool.install(op),
        Err(_) => op(),
    }
}

///////////
// Tests //
///////////
