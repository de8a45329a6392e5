/// Errors surfaced by the solvers and factorization drivers.
///
/// None of these are retried internally. A failure inside a parallel
/// projection region aborts the whole call; no partial factor matrix is
/// returned. NaN or Inf values in the input are not sanitised and
/// propagate silently through the arithmetic.
#[derive(Debug, thiserror::Error)]
pub enum NmfError {
    /// Dimension mismatches, malformed sparse column pointers, a zero
    /// factorization rank, or a missing transposed target.
    #[error("invalid shape: {0}")]
    InvalidShape(String),
    /// Cholesky factorization failed on a Gram matrix. The ridge added
    /// to the Gram diagonal makes this unreachable for finite inputs;
    /// if it happens anyway the call is aborted.
    #[error("numeric failure: {0}")]
    NumericFailure(String),
    /// The cancellation token was observed tripped at a checkpoint.
    #[error("cancelled before completion")]
    Cancelled,
}
