use faer::{Mat, MatRef};

use crate::errors::NmfError;

///////////////////////
// Column capability //
///////////////////////

/// Read-only column access shared by the dense and sparse code paths.
///
/// The projection, loss and factorization drivers only ever need the
/// matrix shape and a forward walk over one column at a time, so they
/// are written once against this capability. Dense implementations
/// visit every entry of the column; sparse ones visit only the stored
/// non-zeros. Implementations must be cheap to query concurrently for
/// distinct columns.
pub trait ColumnAccess {
    /// Number of rows of the viewed matrix.
    fn rows(&self) -> usize;

    /// Number of columns of the viewed matrix.
    fn cols(&self) -> usize;

    /// Visit the stored entries of column `col` as `(row, value)` pairs.
    fn for_each_in_col<F: FnMut(usize, f64)>(&self, col: usize, f: F);
}

impl ColumnAccess for MatRef<'_, f64> {
    fn rows(&self) -> usize {
        self.nrows()
    }

    fn cols(&self) -> usize {
        self.ncols()
    }

    fn for_each_in_col<F: FnMut(usize, f64)>(&self, col: usize, mut f: F) {
        for row in 0..self.nrows() {
            f(row, self[(row, col)]);
        }
    }
}

////////////////
// Structures //
////////////////

/// Zero-copy view over a matrix in compressed sparse column form
///
/// The view borrows the three parallel CSC arrays directly from the
/// caller; nothing is copied or re-ordered. Row indices are 32-bit
/// signed integers as handed over by host runtimes. Within a column
/// the entry order is irrelevant to every algorithm in this crate, but
/// each `(row, col)` pair must appear at most once.
///
/// ### Fields
///
/// * `data` - The non-zero values.
/// * `row_indices` - The row index of each value.
/// * `col_ptrs` - Length `ncol + 1` column pointers into the two
///   arrays above.
/// * `nrow` - Number of rows of the viewed matrix.
/// * `ncol` - Number of columns of the viewed matrix.
#[derive(Debug, Clone, Copy)]
pub struct SparseColumnRef<'a> {
    data: &'a [f64],
    row_indices: &'a [i32],
    col_ptrs: &'a [i32],
    nrow: usize,
    ncol: usize,
}

impl<'a> SparseColumnRef<'a> {
    /// Generate a new view over caller-owned CSC arrays
    ///
    /// Validates the column pointer structure once so the per-column
    /// iteration can stay check-free.
    ///
    /// ### Params
    ///
    /// * `data` - Slice of the non-zero values.
    /// * `row_indices` - Slice of the row indices of the values.
    /// * `col_ptrs` - Slice of the column pointers.
    /// * `nrow` - Number of rows of the viewed matrix.
    /// * `ncol` - Number of columns of the viewed matrix.
    ///
    /// ### Returns
    ///
    /// The validated view, or `InvalidShape` when the pointers are
    /// malformed.
    pub fn new(
        data: &'a [f64],
        row_indices: &'a [i32],
        col_ptrs: &'a [i32],
        nrow: usize,
        ncol: usize,
    ) -> Result<Self, NmfError> {
        if col_ptrs.len() != ncol + 1 {
            return Err(NmfError::InvalidShape(format!(
                "expected {} column pointers, got {}",
                ncol + 1,
                col_ptrs.len()
            )));
        }
        if col_ptrs[0] != 0 {
            return Err(NmfError::InvalidShape(
                "column pointers must start at 0".to_string(),
            ));
        }
        if col_ptrs.windows(2).any(|w| w[1] < w[0]) {
            return Err(NmfError::InvalidShape(
                "column pointers must be non-decreasing".to_string(),
            ));
        }
        let nnz = col_ptrs[ncol] as usize;
        if nnz != data.len() || nnz != row_indices.len() {
            return Err(NmfError::InvalidShape(format!(
                "column pointers describe {} entries but {} values and {} row indices were given",
                nnz,
                data.len(),
                row_indices.len()
            )));
        }
        if row_indices.iter().any(|&r| r < 0 || r as usize >= nrow) {
            return Err(NmfError::InvalidShape(format!(
                "row indices must lie in 0..{}",
                nrow
            )));
        }
        Ok(Self {
            data,
            row_indices,
            col_ptrs,
            nrow,
            ncol,
        })
    }

    /// Number of rows of the viewed matrix.
    pub fn rows(&self) -> usize {
        self.nrow
    }

    /// Number of columns of the viewed matrix.
    pub fn cols(&self) -> usize {
        self.ncol
    }

    /// Total number of stored values.
    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    /// Iterate the stored entries of column `col` as `(row, value)` pairs
    ///
    /// The iterator borrows the underlying arrays only, carries no
    /// allocation and can be instantiated concurrently for distinct
    /// columns.
    pub fn col_iter(&self, col: usize) -> impl Iterator<Item = (usize, f64)> + 'a {
        let start = self.col_ptrs[col] as usize;
        let end = self.col_ptrs[col + 1] as usize;
        let row_indices = self.row_indices;
        let data = self.data;
        row_indices[start..end]
            .iter()
            .zip(&data[start..end])
            .map(|(&row, &value)| (row as usize, value))
    }
}

impl ColumnAccess for SparseColumnRef<'_> {
    fn rows(&self) -> usize {
        self.nrow
    }

    fn cols(&self) -> usize {
        self.ncol
    }

    fn for_each_in_col<F: FnMut(usize, f64)>(&self, col: usize, mut f: F) {
        let start = self.col_ptrs[col] as usize;
        let end = self.col_ptrs[col + 1] as usize;
        for idx in start..end {
            f(self.row_indices[idx] as usize, self.data[idx]);
        }
    }
}

/// Owned matrix in compressed sparse column form
///
/// ### Fields
///
/// * `data` - Vector with the non-zero values.
/// * `row_indices` - The row indices of the values.
/// * `col_ptrs` - The column pointers of the values.
/// * `nrow` - Original number of rows.
/// * `ncol` - Original number of columns.
#[derive(Debug, Clone)]
pub struct SparseColumnMatrix {
    pub data: Vec<f64>,
    pub row_indices: Vec<i32>,
    pub col_ptrs: Vec<i32>,
    pub nrow: usize,
    pub ncol: usize,
}

impl SparseColumnMatrix {
    /// Generate a new sparse column matrix from pre-computed CSC data
    ///
    /// ### Params
    ///
    /// * `data` - Slice of the non-zero values.
    /// * `row_indices` - Slice of the row indices of the values.
    /// * `col_ptrs` - Slice of the column pointers.
    /// * `nrow` - Original number of rows.
    /// * `ncol` - Original number of columns.
    pub fn new(
        data: &[f64],
        row_indices: &[i32],
        col_ptrs: &[i32],
        nrow: usize,
        ncol: usize,
    ) -> Self {
        Self {
            data: data.to_vec(),
            row_indices: row_indices.to_vec(),
            col_ptrs: col_ptrs.to_vec(),
            nrow,
            ncol,
        }
    }

    /// Convert a dense matrix to sparse column format
    ///
    /// ### Params
    ///
    /// * `dense` - The original dense matrix.
    pub fn from_dense_matrix(dense: MatRef<f64>) -> Self {
        let nrow = dense.nrows();
        let ncol = dense.ncols();

        let mut data = Vec::new();
        let mut row_indices = Vec::new();
        let mut col_ptrs = Vec::with_capacity(ncol + 1);

        col_ptrs.push(0_i32);

        for col in 0..ncol {
            for row in 0..nrow {
                let value = dense[(row, col)];
                if value != 0.0 {
                    data.push(value);
                    row_indices.push(row as i32);
                }
            }
            col_ptrs.push(data.len() as i32);
        }

        Self {
            data,
            row_indices,
            col_ptrs,
            nrow,
            ncol,
        }
    }

    /// To a dense matrix
    ///
    /// ### Returns
    ///
    /// Returns the stored values scattered into a dense matrix.
    pub fn to_dense_matrix(&self) -> Mat<f64> {
        let mut dense = Mat::zeros(self.nrow, self.ncol);

        for col in 0..self.ncol {
            let start = self.col_ptrs[col] as usize;
            let end = self.col_ptrs[col + 1] as usize;

            for idx in start..end {
                let row = self.row_indices[idx] as usize;
                dense[(row, col)] = self.data[idx];
            }
        }

        dense
    }

    /// Return the number of stored values
    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    /// CSC representation of the transpose
    ///
    /// A counting sort over the row indices; equivalent to re-reading
    /// the stored values in CSR order. The non-symmetric factorization
    /// entry points consume this as their second target.
    ///
    /// ### Returns
    ///
    /// The transposed matrix, still in CSC form.
    pub fn transposed(&self) -> Self {
        let nnz = self.data.len();
        let mut col_ptrs = vec![0_i32; self.nrow + 1];

        for &r in &self.row_indices {
            col_ptrs[r as usize + 1] += 1;
        }

        for i in 0..self.nrow {
            col_ptrs[i + 1] += col_ptrs[i];
        }

        let mut data = vec![0.0; nnz];
        let mut row_indices = vec![0_i32; nnz];
        let mut next = col_ptrs[..self.nrow].to_vec();

        for col in 0..self.ncol {
            for idx in self.col_ptrs[col] as usize..self.col_ptrs[col + 1] as usize {
                let row = self.row_indices[idx] as usize;
                let pos = next[row] as usize;
                data[pos] = self.data[idx];
                row_indices[pos] = col as i32;
                next[row] += 1;
            }
        }

        Self {
            data,
            row_indices,
            col_ptrs,
            nrow: self.ncol,
            ncol: self.nrow,
        }
    }

    /// Borrow the stored arrays as a validated-by-construction view.
    pub fn as_view(&self) -> SparseColumnRef<'_> {
        SparseColumnRef {
            data: &self.data,
            row_indices: &self.row_indices,
            col_ptrs: &self.col_ptrs,
            nrow: self.nrow,
            ncol: self.ncol,
        }
    }
}

///////////
// Tests //
///////////

#[cfg(test)]
mod tests {
    use super::*;
    use faer::mat;

    #[test]
    fn test_dense_to_sparse_conversion() {
        let dense = mat![[1.0, 0.0, 3.0], [0.0, 2.0, 0.0], [4.0, 0.0, 5.0]];

        let sparse = SparseColumnMatrix::from_dense_matrix(dense.as_ref());

        assert_eq!(sparse.nrow, 3);
        assert_eq!(sparse.ncol, 3);
        assert_eq!(sparse.nnz(), 5);
        assert_eq!(sparse.data, vec![1.0, 4.0, 2.0, 3.0, 5.0]);
        assert_eq!(sparse.row_indices, vec![0, 2, 1, 0, 2]);
        assert_eq!(sparse.col_ptrs, vec![0, 2, 3, 5]);
    }

    #[test]
    fn test_dense_to_sparse_to_dense_conversion() {
        let dense = mat![[1.0, 0.0, 3.0], [0.0, 2.0, 0.0], [4.0, 0.0, 5.0]];

        let sparse = SparseColumnMatrix::from_dense_matrix(dense.as_ref());
        let redense = sparse.to_dense_matrix();

        assert_eq!(dense, redense);
    }

    #[test]
    fn test_raw_to_dense_conversion() {
        let data = vec![1.0, 4.0, 2.0, 3.0, 5.0];
        let row_indices: Vec<i32> = vec![0, 2, 1, 0, 2];
        let col_ptrs: Vec<i32> = vec![0, 2, 3, 5];

        let sparse = SparseColumnMatrix::new(&data, &row_indices, &col_ptrs, 3, 3);
        let dense = mat![[1.0, 0.0, 3.0], [0.0, 2.0, 0.0], [4.0, 0.0, 5.0]];

        assert_eq!(sparse.to_dense_matrix(), dense);
    }

    #[test]
    fn test_transposed() {
        let dense = mat![[1.0, 0.0, 3.0], [0.0, 2.0, 0.0], [4.0, 0.0, 5.0]];

        let sparse = SparseColumnMatrix::from_dense_matrix(dense.as_ref());
        let transposed = sparse.transposed();

        assert_eq!(transposed.nrow, 3);
        assert_eq!(transposed.ncol, 3);
        assert_eq!(
            transposed.to_dense_matrix(),
            dense.transpose().to_owned()
        );
    }

    #[test]
    fn test_col_iter() {
        let data = vec![1.0, 4.0, 2.0, 3.0, 5.0];
        let row_indices: Vec<i32> = vec![0, 2, 1, 0, 2];
        let col_ptrs: Vec<i32> = vec![0, 2, 3, 5];

        let view = SparseColumnRef::new(&data, &row_indices, &col_ptrs, 3, 3).unwrap();

        assert_eq!(view.nnz(), 5);
        assert_eq!(view.col_iter(0).collect::<Vec<_>>(), vec![(0, 1.0), (2, 4.0)]);
        assert_eq!(view.col_iter(1).collect::<Vec<_>>(), vec![(1, 2.0)]);
        assert_eq!(view.col_iter(2).collect::<Vec<_>>(), vec![(0, 3.0), (2, 5.0)]);
    }

    #[test]
    fn test_view_rejects_bad_pointer_length() {
        let data = vec![1.0];
        let row_indices = vec![0];
        let col_ptrs = vec![0, 1];

        let view = SparseColumnRef::new(&data, &row_indices, &col_ptrs, 1, 2);
        assert!(matches!(view, Err(NmfError::InvalidShape(_))));
    }

    #[test]
    fn test_view_rejects_nonzero_start() {
        let data = vec![1.0];
        let row_indices = vec![0];
        let col_ptrs = vec![1, 1];

        let view = SparseColumnRef::new(&data, &row_indices, &col_ptrs, 1, 1);
        assert!(matches!(view, Err(NmfError::InvalidShape(_))));
    }

    #[test]
    fn test_view_rejects_decreasing_pointers() {
        let data = vec![1.0, 2.0];
        let row_indices = vec![0, 0];
        let col_ptrs = vec![0, 2, 1];

        let view = SparseColumnRef::new(&data, &row_indices, &col_ptrs, 1, 2);
        assert!(matches!(view, Err(NmfError::InvalidShape(_))));
    }

    #[test]
    fn test_view_rejects_out_of_bounds_row() {
        let data = vec![1.0];
        let row_indices = vec![3];
        let col_ptrs = vec![0, 1];

        let view = SparseColumnRef::new(&data, &row_indices, &col_ptrs, 2, 1);
        assert!(matches!(view, Err(NmfError::InvalidShape(_))));
    }

    #[test]
    fn test_view_rejects_nnz_mismatch() {
        let data = vec![1.0, 2.0];
        let row_indices = vec![0, 1];
        let col_ptrs = vec![0, 1];

        let view = SparseColumnRef::new(&data, &row_indices, &col_ptrs, 2, 1);
        assert!(matches!(view, Err(NmfError::InvalidShape(_))));
    }

    #[test]
    fn test_dense_column_access_visits_every_entry() {
        let dense = mat![[1.0, 0.0], [0.0, 2.0]];
        let view = dense.as_ref();

        let mut seen = Vec::new();
        ColumnAccess::for_each_in_col(&view, 0, |row, value| seen.push((row, value)));
        assert_eq!(seen, vec![(0, 1.0), (1, 0.0)]);
        assert_eq!(ColumnAccess::rows(&view), 2);
        assert_eq!(ColumnAccess::cols(&view), 2);
    }
}
