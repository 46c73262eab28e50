use nalgebra::{DVector, SVector, Scalar};

/// A struct of named scalar fields that can be viewed as a column vector.
///
/// Implemented through `#[derive(NamedVecOps)]`. Field order defines the
/// vector layout, so `State { x, y }` maps to `[x, y]`.
pub trait NamedVecOps<T: Scalar, const N: usize>:
    Copy
  + Clone
  + std::ops::Add<Self, Output = Self>
  + std::ops::Sub<Self, Output = Self>
  + std::ops::Mul<T, Output = Self>
  + std::ops::AddAssign<Self>
  + std::ops::SubAssign<Self>
{
    const SIZE: usize = N;

    fn to_svector(&self) -> SVector<T, N>;
    fn from_svector(v: &SVector<T, N>) -> Self;

    fn to_dvector(&self) -> DVector<T> {
        DVector::from_column_slice(self.to_svector().as_slice())
    }

    /// Reads the first `N` entries of `v`.
    ///
    /// # Panics
    /// If `v` has fewer than `N` entries.
    fn from_dvector(v: &DVector<T>) -> Self {
        assert!(v.len() >= N, "expected at least {} entries, got {}", N, v.len());
        Self::from_svector(&SVector::<T, N>::from_column_slice(&v.as_slice()[..N]))
    }
}
