//! Non-negative matrix factorization by alternating least squares.
//!
//! Given a dense or sparse target `A`, a rank and an initial factor,
//! the drivers compute `A ~ w * diag(d) * h` with both factors
//! non-negative when requested. The inner solver is a two-stage
//! non-negative least squares routine: unconstrained solves through a
//! Cholesky factorization shared across all columns, feasible set
//! reduction, and a coordinate descent polish. A closed-form 2 x 2
//! kernel backs the specialized rank-2 driver. Column updates inside
//! a projection run in parallel; everything else is sequential.
//!
//! Sparse targets are consumed through a zero-copy compressed sparse
//! column view; initial factors always come from the caller.

pub mod core;
pub mod errors;
pub mod utils;

pub use crate::core::loss::mse;
pub use crate::core::nmf::{nmf_dense, nmf_sparse, CancelToken, NmfFit, NmfOptions};
pub use crate::core::nmf_rank2::{nmf2_dense, nmf2_sparse};
pub use crate::core::nnls::{cdnnls, cdnnls_mat, nnls, nnls2, nnls_mat};
pub use crate::core::project::project;
pub use crate::core::sparse::{ColumnAccess, SparseColumnMatrix, SparseColumnRef};
pub use crate::errors::NmfError;
