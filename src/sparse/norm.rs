//! Batch normalization over flat voxel features.

use burn::config::Config;
use burn::module::Module;
use burn::nn::{BatchNorm, BatchNormConfig};
use burn::prelude::*;

/// Configuration for [`SparseNorm`].
#[derive(Config, Debug)]
pub struct SparseNormConfig {
    /// Number of feature channels.
    pub num_features: usize,

    /// Numerical stability epsilon.
    #[config(default = 1e-3)]
    pub epsilon: f64,

    /// Running statistics momentum.
    #[config(default = 0.01)]
    pub momentum: f64,
}

impl SparseNormConfig {
    /// Initialize the normalization layer.
    pub fn init<B: Backend>(&self, device: &B::Device) -> SparseNorm<B> {
        SparseNorm {
            norm: BatchNormConfig::new(self.num_features)
                .with_epsilon(self.epsilon)
                .with_momentum(self.momentum)
                .init(device),
        }
    }
}

/// Batch normalization applied to a flat `[N, C]` voxel feature matrix.
///
/// Active voxels take the role of the spatial extent: the features are viewed
/// as `[1, C, N]`, normalized per channel, and viewed back.
#[derive(Module, Debug)]
pub struct SparseNorm<B: Backend> {
    norm: BatchNorm<B, 1>,
}

impl<B: Backend> SparseNorm<B> {
    /// Forward pass over `[N, C]` features.
    pub fn forward(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        let [n, c] = features.dims();
        let x = features.swap_dims(0, 1).reshape([1, c, n]);
        self.norm.forward(x).reshape([c, n]).swap_dims(0, 1)
    }
}
