use ndarray::Array4;
use num_complex::Complex64;

/// A dense four-index complex tensor for a single time slice.
pub type Tensor = Array4<Complex64>;

/// The shape of a [`Tensor`].
pub type Shape = [usize; 4];

/// Index into the global time axis.
pub type TimeIndex = usize;

/// Index of a process within a process group.
pub type GroupRank = usize;

/// Creates a tensor of the given shape with every entry set to `value`.
#[must_use]
pub fn constant_tensor(shape: Shape, value: Complex64) -> Tensor {
    Tensor::from_elem(shape, value)
}

/// Returns the shape of `tensor` as a fixed-size array.
#[inline]
#[must_use]
pub fn shape_of(tensor: &Tensor) -> Shape {
    tensor.dim().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_tensor_shape() {
        let tensor = constant_tensor([4, 2, 3, 1], Complex64::ONE);
        assert_eq!(shape_of(&tensor), [4, 2, 3, 1]);
        assert_eq!(tensor.len(), 24);
        assert!(tensor.iter().all(|z| *z == Complex64::ONE));
    }
}
