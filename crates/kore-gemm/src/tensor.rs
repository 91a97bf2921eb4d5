//! Read-only view of 4-D tensor descriptors.

use serde::{Deserialize, Serialize};

/// What shape derivation needs from a tensor descriptor.
pub trait TensorDesc {
    fn lengths(&self) -> &[usize];
    fn strides(&self) -> &[usize];
}

/// A plain NCHW tensor shape with packed strides unless given explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorShape {
    lengths: Vec<usize>,
    strides: Vec<usize>,
}

impl TensorShape {
    /// Packed (row-major contiguous) strides for `lengths`.
    pub fn new(lengths: &[usize]) -> Self {
        let mut strides = vec![1usize; lengths.len()];
        for i in (0..lengths.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * lengths[i + 1];
        }
        Self {
            lengths: lengths.to_vec(),
            strides,
        }
    }

    /// # Panics
    /// If `lengths` and `strides` differ in length.
    pub fn with_strides(lengths: &[usize], strides: &[usize]) -> Self {
        assert_eq!(
            lengths.len(),
            strides.len(),
            "tensor lengths and strides must have the same rank"
        );
        Self {
            lengths: lengths.to_vec(),
            strides: strides.to_vec(),
        }
    }

    pub fn numel(&self) -> usize {
        self.lengths.iter().product()
    }
}

impl TensorDesc for TensorShape {
    fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    fn strides(&self) -> &[usize] {
        &self.strides
    }
}

/// Split a descriptor's lengths into `(n, c, h, w)`.
///
/// # Panics
/// If the descriptor is not 4-D.
pub fn tie4(desc: &dyn TensorDesc) -> (usize, usize, usize, usize) {
    let lens = desc.lengths();
    assert_eq!(
        lens.len(),
        4,
        "expected a 4-D (NCHW) tensor, got lengths {lens:?}"
    );
    (lens[0], lens[1], lens[2], lens[3])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_strides() {
        let t = TensorShape::new(&[8, 3, 32, 32]);
        assert_eq!(t.strides(), &[3072, 1024, 32, 1]);
        assert_eq!(t.numel(), 8 * 3 * 32 * 32);
    }

    #[test]
    fn test_tie4() {
        let t = TensorShape::new(&[2, 4, 6, 8]);
        assert_eq!(tie4(&t), (2, 4, 6, 8));
    }

    #[test]
    #[should_panic(expected = "4-D")]
    fn test_tie4_rejects_3d() {
        tie4(&TensorShape::new(&[2, 4, 6]));
    }
}
