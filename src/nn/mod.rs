//! Sparse convolution building blocks composed into backbone stages.

mod block;

pub use block::{PostActBlock, ShortcutProject, SparseBasicBlock};
