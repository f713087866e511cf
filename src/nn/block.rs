//! Reusable sparse convolution blocks.

use burn::module::Module;
use burn::nn::Relu;
use burn::prelude::*;

use crate::sparse::{
    ConvKind, SparseConv, SparseConvConfig, SparseNorm, SparseNormConfig, SparseTensor,
};

/// Post-activation block: sparse conv followed by normalization and ReLU.
///
/// The convolution kind (submanifold, strided, inverse) is carried by the
/// conv config and resolved once at construction.
#[derive(Module, Debug)]
pub struct PostActBlock<B: Backend> {
    conv: SparseConv<B>,
    norm: SparseNorm<B>,
    activation: Relu,
}

impl<B: Backend> PostActBlock<B> {
    /// Create a new block from a convolution config.
    pub fn new(conv: &SparseConvConfig, device: &B::Device) -> Self {
        Self {
            conv: conv.init(device),
            norm: SparseNormConfig::new(conv.out_channels).init(device),
            activation: Relu::new(),
        }
    }

    /// Forward pass.
    pub fn forward(&self, x: &SparseTensor<B>) -> SparseTensor<B> {
        let out = self.conv.forward(x);
        let features = self.activation.forward(self.norm.forward(out.features.clone()));
        out.replace_features(features)
    }
}

/// Residual block built from two submanifold convolutions.
///
/// The transformed path is conv → norm → relu → conv → norm; the shortcut is
/// the identity, or a projected copy when the channel count changes. The sum
/// is passed through a final ReLU.
#[derive(Module, Debug)]
pub struct SparseBasicBlock<B: Backend> {
    conv1: SparseConv<B>,
    bn1: SparseNorm<B>,
    conv2: SparseConv<B>,
    bn2: SparseNorm<B>,
    downsample: Option<ShortcutProject<B>>,
    activation: Relu,
}

impl<B: Backend> SparseBasicBlock<B> {
    /// Create a new residual block.
    ///
    /// `norm` supplies the output channel count (`num_features`) and the
    /// epsilon/momentum used by every normalization layer inside the block.
    /// A shortcut projection is inserted automatically when the input
    /// channel count differs from `norm.num_features`.
    pub fn new(in_planes: usize, norm: &SparseNormConfig, device: &B::Device) -> Self {
        let planes = norm.num_features;
        let conv = |in_c: usize| {
            SparseConvConfig::new(in_c, planes, [3, 3, 3])
                .with_padding([1, 1, 1])
                .with_bias(true)
                .with_kind(ConvKind::Submanifold)
        };
        let norm_cfg = |c: usize| {
            SparseNormConfig::new(c)
                .with_epsilon(norm.epsilon)
                .with_momentum(norm.momentum)
        };

        let downsample = (in_planes != planes).then(|| ShortcutProject {
            conv: SparseConvConfig::new(in_planes, planes, [1, 1, 1])
                .with_kind(ConvKind::Submanifold)
                .init(device),
            norm: norm_cfg(planes).init(device),
        });

        Self {
            conv1: conv(in_planes).init(device),
            bn1: norm_cfg(planes).init(device),
            conv2: conv(planes).init(device),
            bn2: norm_cfg(planes).init(device),
            downsample,
            activation: Relu::new(),
        }
    }

    /// Forward pass.
    pub fn forward(&self, x: &SparseTensor<B>) -> SparseTensor<B> {
        let out = self.conv1.forward(x);
        let out = out.replace_features(
            self.activation
                .forward(self.bn1.forward(out.features.clone())),
        );

        let out = self.conv2.forward(&out);
        let out = out.replace_features(self.bn2.forward(out.features.clone()));

        let identity = match &self.downsample {
            Some(project) => project.forward(x).features,
            None => x.features.clone(),
        };

        out.replace_features(
            self.activation
                .forward(out.features.clone() + identity),
        )
    }
}

/// Channel projection used on the shortcut path of a residual block.
#[derive(Module, Debug)]
pub struct ShortcutProject<B: Backend> {
    conv: SparseConv<B>,
    norm: SparseNorm<B>,
}

impl<B: Backend> ShortcutProject<B> {
    fn forward(&self, x: &SparseTensor<B>) -> SparseTensor<B> {
        let out = self.conv.forward(x);
        let features = self.norm.forward(out.features.clone());
        out.replace_features(features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn make_input(device: &<TestBackend as Backend>::Device) -> SparseTensor<TestBackend> {
        let features = Tensor::ones([3, 8], device);
        let indices = vec![[0, 1, 1, 1], [0, 1, 1, 2], [0, 2, 1, 1]];
        SparseTensor::new(features, indices, [8, 8, 8], 1).unwrap()
    }

    #[test]
    fn test_post_act_block_submanifold() {
        let device = Default::default();
        let block = PostActBlock::<TestBackend>::new(
            &SparseConvConfig::new(8, 16, [3, 3, 3]).with_padding([1, 1, 1]),
            &device,
        );

        let x = make_input(&device);
        let y = block.forward(&x);
        assert_eq!(y.indices, x.indices);
        assert_eq!(y.features.dims(), [3, 16]);
    }

    #[test]
    fn test_post_act_block_strided() {
        let device = Default::default();
        let block = PostActBlock::<TestBackend>::new(
            &SparseConvConfig::new(8, 16, [3, 3, 3])
                .with_stride([2, 2, 2])
                .with_padding([1, 1, 1])
                .with_kind(ConvKind::Sparse),
            &device,
        );

        let x = make_input(&device);
        let y = block.forward(&x);
        assert_eq!(y.spatial_shape, [4, 4, 4]);
        assert_eq!(y.features.dims()[0], y.indices.len());
    }

    #[test]
    fn test_basic_block_identity_shortcut() {
        let device = Default::default();
        let block = SparseBasicBlock::<TestBackend>::new(8, &SparseNormConfig::new(8), &device);

        let x = make_input(&device);
        let y = block.forward(&x);
        assert_eq!(y.indices, x.indices);
        assert_eq!(y.features.dims(), [3, 8]);
    }

    #[test]
    fn test_basic_block_projected_shortcut() {
        let device = Default::default();
        let block = SparseBasicBlock::<TestBackend>::new(8, &SparseNormConfig::new(16), &device);

        let x = make_input(&device);
        let y = block.forward(&x);
        assert_eq!(y.indices, x.indices);
        assert_eq!(y.features.dims(), [3, 16]);
    }
}
