//! Row-major shape helpers.
//!
//! Reduction and slicing operators all walk their buffers through the same
//! three-level decomposition: a shape is split at an axis into an `outer`
//! extent (product of the dimensions before the axis), the axis extent
//! itself, and an `inner` extent (product of the dimensions after it).

use crate::error::{GradixError, Result};

/// Number of elements a shape addresses. Rank 0 is a scalar with one element.
pub fn num_elements(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Splits `shape` at `axis` into `(outer, axis_extent, inner)` extents.
pub fn axis_extents(shape: &[usize], axis: usize) -> (usize, usize, usize) {
    debug_assert!(axis < shape.len());
    let outer = shape[..axis].iter().product();
    let inner = shape[axis + 1..].iter().product();
    (outer, shape[axis], inner)
}

/// Checks that `axis` addresses a dimension of `shape`.
pub fn check_axis(shape: &[usize], axis: usize) -> Result<()> {
    if axis >= shape.len() {
        return Err(GradixError::AxisOutOfRange {
            axis,
            rank: shape.len(),
        });
    }
    Ok(())
}

/// Rejects shapes with a zero extent. A rank-0 shape is fine (scalar).
pub fn check_extents(shape: &[usize]) -> Result<()> {
    if shape.iter().any(|&d| d == 0) {
        return Err(GradixError::ZeroExtent {
            shape: shape.to_vec(),
        });
    }
    Ok(())
}

/// `shape` with the dimension at `axis` removed.
pub fn drop_axis(shape: &[usize], axis: usize) -> Vec<usize> {
    let mut out = Vec::with_capacity(shape.len() - 1);
    for (i, &d) in shape.iter().enumerate() {
        if i != axis {
            out.push(d);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_has_one_element() {
        assert_eq!(num_elements(&[]), 1);
        assert_eq!(num_elements(&[2, 3, 4]), 24);
    }

    #[test]
    fn extents_decompose_row_major() {
        assert_eq!(axis_extents(&[2, 3, 4], 0), (1, 2, 12));
        assert_eq!(axis_extents(&[2, 3, 4], 1), (2, 3, 4));
        assert_eq!(axis_extents(&[2, 3, 4], 2), (6, 4, 1));
    }

    #[test]
    fn axis_bounds_are_checked() {
        assert!(check_axis(&[2, 3], 1).is_ok());
        assert!(matches!(
            check_axis(&[2, 3], 2),
            Err(GradixError::AxisOutOfRange { axis: 2, rank: 2 })
        ));
    }

    #[test]
    fn zero_extents_are_rejected() {
        assert!(check_extents(&[2, 0, 3]).is_err());
        assert!(check_extents(&[]).is_ok());
    }

    #[test]
    fn drop_axis_removes_one_dimension() {
        assert_eq!(drop_axis(&[2, 3, 4], 1), vec![2, 4]);
        assert_eq!(drop_axis(&[5], 0), Vec::<usize>::new());
    }
}
