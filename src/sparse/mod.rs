//! Sparse voxel tensor representation and sparse 3D convolution primitives.

mod conv;
mod norm;
mod tensor;

pub use conv::{ConvKind, SparseConv, SparseConvConfig};
pub use norm::{SparseNorm, SparseNormConfig};
pub use tensor::{sparse_shape, SparseTensor};
