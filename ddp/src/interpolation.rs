//! Linear interpolation over sampled trajectories.

use std::ops::Range;

use crate::{Matrix, Scalar, Vector};

/// Position of a query time in a time grid.
///
/// The interpolated value is `alpha * data[index] + (1 - alpha) * data[index + 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexAlpha {
    pub index: usize,
    pub alpha: Scalar,
}

/// Locates `time` in the non-decreasing grid `times`.
///
/// Queries before the first sample return `(0, 1)`, queries after the last
/// one return `(n - 2, 0)`. When a time is repeated (pre and post event
/// samples), a query at that time resolves to the later sample.
pub fn time_segment(time: Scalar, times: &[Scalar]) -> IndexAlpha {
    match times.len() {
        0 | 1 => IndexAlpha { index: 0, alpha: 1.0 },
        n => {
            if time <= times[0] {
                return IndexAlpha { index: 0, alpha: 1.0 };
            }
            if time >= times[n - 1] {
                return IndexAlpha { index: n - 2, alpha: 0.0 };
            }
            // first sample strictly after `time`
            let upper = times.partition_point(|&s| s <= time);
            let index = upper - 1;
            let span = times[upper] - times[index];
            let alpha = if span > 0.0 {
                (times[upper] - time) / span
            } else {
                0.0
            };
            IndexAlpha { index, alpha }
        }
    }
}

/// [`time_segment`] restricted to `times[range]`. The returned index refers
/// to the full grid.
pub fn time_segment_in(time: Scalar, times: &[Scalar], range: Range<usize>) -> IndexAlpha {
    let offset = range.start;
    let IndexAlpha { index, alpha } = time_segment(time, &times[range]);
    IndexAlpha {
        index: index + offset,
        alpha,
    }
}

/// Values that can be blended linearly.
pub trait Interpolatable: Clone {
    fn blend(&self, other: &Self, alpha: Scalar) -> Self;
}

impl Interpolatable for Scalar {
    fn blend(&self, other: &Self, alpha: Scalar) -> Self {
        alpha * self + (1.0 - alpha) * other
    }
}

impl Interpolatable for Vector {
    fn blend(&self, other: &Self, alpha: Scalar) -> Self {
        if self.len() != other.len() {
            return pick_larger_weight(self, other, alpha);
        }
        self * alpha + other * (1.0 - alpha)
    }
}

impl Interpolatable for Matrix {
    fn blend(&self, other: &Self, alpha: Scalar) -> Self {
        if self.shape() != other.shape() {
            return pick_larger_weight(self, other, alpha);
        }
        self * alpha + other * (1.0 - alpha)
    }
}

fn pick_larger_weight<T: Clone>(first: &T, second: &T, alpha: Scalar) -> T {
    if alpha >= 0.5 {
        first.clone()
    } else {
        second.clone()
    }
}

/// Interpolates a field of `data`, selected by `accessor`, at `index_alpha`.
///
/// # Panics
/// If `data` is empty.
pub fn interpolate<D, T, F>(index_alpha: IndexAlpha, data: &[D], accessor: F) -> T
where
    T: Interpolatable,
    F: Fn(&D) -> &T,
{
    assert!(!data.is_empty(), "cannot interpolate an empty trajectory");
    let IndexAlpha { index, alpha } = index_alpha;
    if data.len() == 1 || index + 1 >= data.len() {
        return accessor(&data[index.min(data.len() - 1)]).clone();
    }
    accessor(&data[index]).blend(accessor(&data[index + 1]), alpha)
}

/// Interpolates a plain trajectory at `time`.
pub fn interpolate_at<T: Interpolatable>(time: Scalar, times: &[Scalar], data: &[T]) -> T {
    interpolate(time_segment(time, times), data, |d| d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_segment_inside() {
        let times = [0.0, 1.0, 2.0, 3.0];
        let ia = time_segment(1.25, &times);
        assert_eq!(ia.index, 1);
        assert_relative_eq!(ia.alpha, 0.75);
    }

    #[test]
    fn test_segment_clamps() {
        let times = [0.0, 1.0, 2.0];
        assert_eq!(time_segment(-1.0, &times), IndexAlpha { index: 0, alpha: 1.0 });
        assert_eq!(time_segment(5.0, &times), IndexAlpha { index: 1, alpha: 0.0 });
        assert_eq!(time_segment(0.3, &[0.5]), IndexAlpha { index: 0, alpha: 1.0 });
    }

    #[test]
    fn test_segment_restricted_to_range() {
        let times = [0.0, 1.0, 1.0, 2.0];
        // the pre-event segment ends at the repeated time
        assert_eq!(time_segment_in(1.0, &times, 0..2), IndexAlpha { index: 0, alpha: 0.0 });
        assert_eq!(time_segment_in(1.0, &times, 2..4), IndexAlpha { index: 2, alpha: 1.0 });
    }

    #[test]
    fn test_repeated_time_takes_post_event_sample() {
        let times = [0.0, 1.0, 1.0, 2.0];
        let data = [0.0, 1.0, 10.0, 11.0];
        let ia = time_segment(1.0, &times);
        assert_eq!(ia.index, 2);
        assert_relative_eq!(interpolate(ia, &data, |d| d), 10.0);
        assert_relative_eq!(interpolate_at(0.5, &times, &data), 0.5);
    }

    #[test]
    fn test_vector_and_matrix_blend() {
        let times = [0.0, 2.0];
        let vectors = [Vector::from_vec(vec![0.0, 2.0]), Vector::from_vec(vec![2.0, 4.0])];
        let v = interpolate_at(0.5, &times, &vectors);
        assert_relative_eq!(v, Vector::from_vec(vec![0.5, 2.5]));

        let matrices = [Matrix::identity(2, 2), Matrix::zeros(2, 2)];
        let m = interpolate_at(1.0, &times, &matrices);
        assert_relative_eq!(m, Matrix::identity(2, 2) * 0.5);
    }

    #[test]
    fn test_shape_mismatch_picks_closer_sample() {
        let times = [0.0, 1.0];
        let data = [Matrix::zeros(1, 2), Matrix::zeros(0, 2)];
        assert_eq!(interpolate_at(0.2, &times, &data).nrows(), 1);
        assert_eq!(interpolate_at(0.8, &times, &data).nrows(), 0);
    }
}
