//! Row-wise dot-product similarity between embedding batches.

use crate::RankError;

/// Compute one similarity per row of `b`.
///
/// `a` must have either a single row, which is broadcast against every row of
/// `b`, or exactly as many rows as `b`, in which case rows are paired up.
/// Embeddings are expected to be L2-normalized upstream, so the dot product
/// lands in [-1, 1].
///
/// # Errors
/// Returns [`RankError::DimensionMismatch`] when the vector dimensionality
/// differs between the two batches, or when `a` has more than one row and
/// the row counts differ.
pub fn similarity<A, B>(a: &[A], b: &[B]) -> Result<Vec<f32>, RankError>
where
    A: AsRef<[f32]>,
    B: AsRef<[f32]>,
{
    if a.len() != 1 && a.len() != b.len() {
        return Err(RankError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    b.iter()
        .enumerate()
        .map(|(i, rhs)| {
            let lhs = if a.len() == 1 { a[0].as_ref() } else { a[i].as_ref() };
            let rhs = rhs.as_ref();
            if lhs.len() != rhs.len() {
                return Err(RankError::DimensionMismatch {
                    left: lhs.len(),
                    right: rhs.len(),
                });
            }
            Ok(lhs.iter().zip(rhs.iter()).map(|(x, y)| x * y).sum())
        })
        .collect()
}
