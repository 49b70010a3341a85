use itertools::EitherOrBoth::{Both, Left, Right};
use itertools::Itertools;
use std::cmp::max;

/// Advances `index` to the next position of a row-major walk over `shape`.
/// Returns `false` once the walk is finished.
pub fn increment_index(index: &mut [usize], shape: &[usize]) -> bool {
    for i in (0..index.len()).rev() {
        if index[i] + 1 < shape[i] {
            index[i] += 1;
            reset_trailing_indices(index, i);
            return true;
        }
    }
    false
}

fn reset_trailing_indices(index: &mut [usize], position: usize) {
    for idx in index.iter_mut().skip(position + 1) {
        *idx = 0;
    }
}

/// Numpy style broadcast of two shapes, aligned from the right.
pub fn broadcast_shape(left_shape: &[usize], right_shape: &[usize]) -> Option<Vec<usize>> {
    let mut shape = Vec::with_capacity(max(left_shape.len(), right_shape.len()));
    for pair in left_shape
        .iter()
        .rev()
        .zip_longest(right_shape.iter().rev())
        .rev()
    {
        let dim = match pair {
            Both(&l, &r) if l == r || r == 1 => l,
            Both(&l, &r) if l == 1 => r,
            Both(_, _) => return None,
            Left(&l) => l,
            Right(&r) => r,
        };
        shape.push(dim);
    }
    Some(shape)
}

/// Flat offset into a tensor of `shape` for every element of the broadcast
/// `out_shape`, in row-major order of `out_shape`.
pub(in crate::tensor) fn broadcast_offsets(shape: &[usize], out_shape: &[usize]) -> Vec<usize> {
    let count = out_shape.iter().product::<usize>();
    let mut offsets = Vec::with_capacity(count);
    if count == 0 {
        return offsets;
    }

    // Strides of `shape` laid out over `out_shape`, zero where a dim is broadcast.
    let rank_gap = out_shape.len() - shape.len();
    let mut strides = vec![0; out_shape.len()];
    let mut stride = 1;
    for (i, &dim) in shape.iter().enumerate().rev() {
        if dim != 1 {
            strides[i + rank_gap] = stride;
        }
        stride *= dim;
    }

    let mut index = vec![0; out_shape.len()];
    loop {
        offsets.push(index.iter().zip(strides.iter()).map(|(i, s)| i * s).sum());
        if !increment_index(&mut index, out_shape) {
            break;
        }
    }
    offsets
}

/// Flat offset of `index` into `shape`. Size 1 dims always resolve to 0 and
/// extra leading entries of `index` are ignored.
pub(in crate::tensor) fn global_index(index: &[usize], shape: &[usize]) -> Option<usize> {
    if index.len() < shape.len() {
        return None;
    }
    let mut global_idx = 0;
    let mut multiplier = 1;
    for (&dim, &idx) in shape.iter().rev().zip(index.iter().rev()) {
        if dim == 1 {
            continue;
        }
        if idx >= dim {
            return None;
        }
        global_idx += idx * multiplier;
        multiplier *= dim;
    }
    Some(global_idx)
}

#[test]
fn test_increment_index() {
    let mut index = vec![0, 0, 0];
    let dimensions = vec![2, 3, 2];
    let indices = vec![
        [0, 0, 1].to_vec(),
        [0, 1, 0].to_vec(),
        [0, 1, 1].to_vec(),
        [0, 2, 0].to_vec(),
        [0, 2, 1].to_vec(),
        [1, 0, 0].to_vec(),
        [1, 0, 1].to_vec(),
        [1, 1, 0].to_vec(),
        [1, 1, 1].to_vec(),
        [1, 2, 0].to_vec(),
        [1, 2, 1].to_vec(),
    ];
    for expected_idx in indices.into_iter() {
        let valid = increment_index(&mut index, &dimensions);
        assert!(valid);
        assert_eq!(index, expected_idx);
    }
    assert!(!increment_index(&mut index, &dimensions));
}

#[test]
fn test_broadcast_shape() {
    assert_eq!(broadcast_shape(&[4, 3], &[1, 3]), Some(vec![4, 3]));
    assert_eq!(broadcast_shape(&[2, 4, 4], &[4, 4]), Some(vec![2, 4, 4]));
    assert_eq!(broadcast_shape(&[], &[5]), Some(vec![5]));
    assert_eq!(broadcast_shape(&[4, 3], &[2, 3]), None);
}

#[test]
fn test_broadcast_offsets_for_row_bias() {
    // a [1, 3] bias spread over 2 rows
    assert_eq!(broadcast_offsets(&[1, 3], &[2, 3]), vec![0, 1, 2, 0, 1, 2]);
    // a [2, 1] column spread over 3 columns
    assert_eq!(broadcast_offsets(&[2, 1], &[2, 3]), vec![0, 0, 0, 1, 1, 1]);
    assert_eq!(broadcast_offsets(&[], &[2, 2]), vec![0, 0, 0, 0]);
    assert_eq!(broadcast_offsets(&[], &[]), vec![0]);
}

#[test]
fn test_global_index() {
    assert_eq!(global_index(&[1, 2], &[2, 3]), Some(5));
    assert_eq!(global_index(&[0, 4, 0, 1], &[2, 2]), Some(1));
    assert_eq!(global_index(&[2, 0], &[2, 3]), None);
    assert_eq!(global_index(&[0], &[2, 3]), None);
}
