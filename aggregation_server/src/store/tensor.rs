use comms::msg::VarRef;

use super::{Result, StoreErr};

/// A dense `f32` tensor in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    dims: Vec<u32>,
    values: Vec<f32>,
}

impl Tensor {
    /// Creates a new `Tensor`.
    ///
    /// # Arguments
    /// * `dims` - The size of each dimension.
    /// * `values` - The flat values, their amount must be the product of `dims`.
    ///
    /// # Returns
    /// A new `Tensor` or `StoreErr::InvalidLength` if the sizes don't agree.
    pub fn new(dims: Vec<u32>, values: Vec<f32>) -> Result<Self> {
        if Self::volume(&dims) != values.len() {
            return Err(StoreErr::InvalidLength {
                dims,
                len: values.len(),
            });
        }

        Ok(Self { dims, values })
    }

    /// Creates a one dimensional `Tensor` holding `values`.
    ///
    /// A dimension is a `u32`, longer slices saturate it to `u32::MAX` and are then refused
    /// by `Tensor::new` on the receiving end. Such a tensor never fits in a frame anyway.
    pub fn from_slice(values: &[f32]) -> Self {
        Self {
            dims: vec![Self::dim_of(values.len())],
            values: values.to_vec(),
        }
    }

    /// Creates a `Tensor` with every element set to `value`.
    pub fn filled(dims: Vec<u32>, value: f32) -> Self {
        let values = vec![value; Self::volume(&dims)];
        Self { dims, values }
    }

    /// Creates a `Tensor` with every element set to zero.
    pub fn zeros(dims: Vec<u32>) -> Self {
        Self::filled(dims, 0.)
    }

    /// Copies a tensor out of a received wire var.
    ///
    /// # Arguments
    /// * `var` - The borrowed var from the receive buffer.
    ///
    /// # Returns
    /// A new `Tensor` or `StoreErr::InvalidLength` if the var is inconsistent.
    pub fn from_var(var: &VarRef<'_>) -> Result<Self> {
        Self::new(var.dims.to_vec(), var.values.to_vec())
    }

    /// Borrows this tensor as a wire var named `name`.
    pub fn as_var<'a>(&'a self, name: &'a str) -> VarRef<'a> {
        VarRef {
            name,
            dims: &self.dims,
            values: &self.values,
        }
    }

    pub fn dims(&self) -> &[u32] {
        &self.dims
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f32] {
        &mut self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn dim_of(len: usize) -> u32 {
        u32::try_from(len).unwrap_or(u32::MAX)
    }

    fn volume(dims: &[u32]) -> usize {
        dims.iter().map(|&d| d as usize).product()
    }
}
