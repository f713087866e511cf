//! Fusion strategies: direct pixel sampling and attention enhancement.

use burn::prelude::*;
use burn::tensor::module::interpolate;
use burn::tensor::ops::{InterpolateMode, InterpolateOptions};

use crate::batch::VoxelBatch;
use crate::config::{CombineMethod, FusionConfig, FusionMethod, FusionPoint};
use crate::error::{Result, VoxelFusionError};
use crate::fusion::{align_voxels_to_image, AlignedVoxels, CrossAttention, ImageBackbone, ImagePyramid};
use crate::sparse::SparseTensor;

/// Ragged per-sample voxel sets padded into fixed-capacity dense tensors for
/// the cross-attention network.
#[derive(Debug, Clone)]
pub struct PaddedBatch<B: Backend> {
    /// Original-frame point coordinates: `[B, capacity, 3]`, `(x, y, z)`.
    pub point_coords: Tensor<B, 3>,
    /// Normalized projected pixel coordinates: `[B, capacity, 2]`.
    pub pixel_coords: Tensor<B, 3>,
    /// Voxel features: `[B, capacity, C]`.
    pub features: Tensor<B, 3>,
    /// True voxel count per sample, after any capacity truncation.
    pub counts: Vec<usize>,
}

/// Pad per-sample voxel sets into `[B, capacity, *]` tensors.
///
/// Rows at or beyond each sample's true count are zero-filled. Samples with
/// more voxels than `capacity` are truncated; the excess is dropped with a
/// warning and reflected in `counts`.
pub fn pad_ragged<B: Backend>(
    x: &SparseTensor<B>,
    aligned: &[AlignedVoxels],
    capacity: usize,
) -> PaddedBatch<B> {
    let device = x.device();
    let batch_size = aligned.len();
    let channels = x.num_channels();

    let features_flat: Vec<f32> = x.features.to_data().to_vec().unwrap();

    let mut points = vec![0.0f32; batch_size * capacity * 3];
    let mut pixels = vec![0.0f32; batch_size * capacity * 2];
    let mut features = vec![0.0f32; batch_size * capacity * channels];
    let mut counts = Vec::with_capacity(batch_size);

    for (b, sample) in aligned.iter().enumerate() {
        let total = sample.rows.len();
        let count = total.min(capacity);
        if total > capacity {
            log::warn!(
                "sample {} has {} active voxels, truncating to capacity {}",
                b,
                total,
                capacity
            );
        }
        counts.push(count);

        for i in 0..count {
            let row = sample.rows[i];
            let pt = points
                .iter_mut()
                .skip((b * capacity + i) * 3)
                .take(3);
            for (dst, src) in pt.zip(sample.world_points[i]) {
                *dst = src;
            }
            let px = pixels
                .iter_mut()
                .skip((b * capacity + i) * 2)
                .take(2);
            for (dst, src) in px.zip(sample.pixels_norm[i]) {
                *dst = src;
            }
            let dst_base = (b * capacity + i) * channels;
            let src_base = row * channels;
            features[dst_base..dst_base + channels]
                .copy_from_slice(&features_flat[src_base..src_base + channels]);
        }
    }

    PaddedBatch {
        point_coords: Tensor::from_data(
            TensorData::new(points, [batch_size, capacity, 3]),
            &device,
        ),
        pixel_coords: Tensor::from_data(
            TensorData::new(pixels, [batch_size, capacity, 2]),
            &device,
        ),
        features: Tensor::from_data(
            TensorData::new(features, [batch_size, capacity, channels]),
            &device,
        ),
        counts,
    }
}

/// Point-image fusion module.
///
/// Holds the injected image backbone and, for the attention method, the
/// cross-attention network. This struct intentionally doesn't derive Module:
/// the collaborators are trait objects owned by the caller's model, and the
/// module itself carries no learned parameters.
pub struct PointFusion<B: Backend> {
    config: FusionConfig,
    image_backbone: Box<dyn ImageBackbone<B>>,
    attention: Option<Box<dyn CrossAttention<B>>>,
}

impl<B: Backend> PointFusion<B> {
    /// Create a fusion module.
    ///
    /// Fails with `InvalidConfig` if the attention method is selected but no
    /// attention network is supplied.
    pub fn new(
        config: FusionConfig,
        image_backbone: Box<dyn ImageBackbone<B>>,
        attention: Option<Box<dyn CrossAttention<B>>>,
    ) -> Result<Self> {
        config.validate()?;
        if config.method == FusionMethod::Attention && attention.is_none() {
            return Err(VoxelFusionError::InvalidConfig {
                message: "attention fusion selected but no cross-attention network supplied"
                    .to_string(),
            });
        }
        Ok(Self {
            config,
            image_backbone,
            attention,
        })
    }

    /// Backbone depth at which this module is applied.
    pub fn injection_point(&self) -> &FusionPoint {
        &self.config.fusion_pos
    }

    /// Fusion configuration.
    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Fuse image features into the voxel feature map.
    ///
    /// Returns a sparse tensor sharing the input's indices, spatial shape
    /// and batch size; only the feature vectors change. `voxel_stride` is
    /// the cumulative downsampling factor of `x` at the injection point.
    pub fn forward(
        &self,
        x: &SparseTensor<B>,
        batch: &VoxelBatch<B>,
        voxel_stride: usize,
    ) -> Result<SparseTensor<B>> {
        let images = batch
            .images
            .as_ref()
            .ok_or_else(|| VoxelFusionError::MissingInput {
                field: "images".to_string(),
            })?;
        let [_, _, height, width] = images.dims();

        let pyramid = self.image_backbone.forward(images.clone())?;
        if pyramid.is_empty() {
            return Err(VoxelFusionError::InvalidConfig {
                message: "image backbone returned an empty feature pyramid".to_string(),
            });
        }

        let aligned = align_voxels_to_image(
            x,
            batch,
            voxel_stride,
            self.config.voxel_size,
            self.config.range_origin,
            (height, width),
        )?;

        let fused = match self.config.method {
            FusionMethod::DirectSample => {
                self.direct_sample(x, &pyramid, &aligned, (height, width))?
            }
            FusionMethod::Attention => self.attention_enhance(x, &pyramid, &aligned)?,
        };

        Ok(x.replace_features(fused))
    }

    /// Gather image features at projected pixel locations and combine them
    /// with the voxel features. Out-of-frustum voxels keep zero image
    /// features.
    fn direct_sample(
        &self,
        x: &SparseTensor<B>,
        pyramid: &ImagePyramid<B>,
        aligned: &[AlignedVoxels],
        image_size: (usize, usize),
    ) -> Result<Tensor<B, 2>> {
        let device = x.device();
        let (height, width) = image_size;

        let mut level0 = pyramid[0].1.clone();
        let dims = level0.dims();
        if dims[2] != height || dims[3] != width {
            level0 = interpolate(
                level0,
                [height, width],
                InterpolateOptions::new(InterpolateMode::Bilinear),
            );
        }
        let channels = level0.dims()[1];

        let num_voxels = x.num_voxels();
        let mut image_features = Tensor::zeros([num_voxels, channels], &device);

        for (b, sample) in aligned.iter().enumerate() {
            let mut rows: Vec<i64> = Vec::new();
            let mut flat_pixels: Vec<i64> = Vec::new();
            for (i, &row) in sample.rows.iter().enumerate() {
                if sample.in_frustum[i] {
                    let u = sample.pixels[i][0].floor() as i64;
                    let v = sample.pixels[i][1].floor() as i64;
                    rows.push(row as i64);
                    flat_pixels.push(v * width as i64 + u);
                }
            }
            if rows.is_empty() {
                continue;
            }

            // [C, H, W] -> [H*W, C] for row gathering.
            let image_b = level0
                .clone()
                .slice([b..b + 1])
                .reshape([channels, height * width])
                .swap_dims(0, 1);

            let pixel_idx = Tensor::<B, 1, Int>::from_data(flat_pixels.as_slice(), &device);
            let row_idx = Tensor::<B, 1, Int>::from_data(rows.as_slice(), &device);
            let gathered = image_b.select(0, pixel_idx);
            image_features = image_features.select_assign(0, row_idx, gathered);
        }

        self.combine(image_features, &x.features)
    }

    /// Pad ragged voxel sets, run the cross-attention network once, scatter
    /// the enhanced features back to original voxel order, and combine.
    fn attention_enhance(
        &self,
        x: &SparseTensor<B>,
        pyramid: &ImagePyramid<B>,
        aligned: &[AlignedVoxels],
    ) -> Result<Tensor<B, 2>> {
        let attention =
            self.attention
                .as_ref()
                .ok_or_else(|| VoxelFusionError::InvalidConfig {
                    message: "cross-attention network not available".to_string(),
                })?;
        let device = x.device();
        let batch_size = aligned.len();

        let padded = pad_ragged(x, aligned, self.config.max_num_voxels);
        let n_max = padded.counts.iter().copied().max().unwrap_or(0);
        if n_max == 0 {
            return self.combine(x.features.zeros_like(), &x.features);
        }

        let channels = x.num_channels();
        let enhanced = attention.forward(
            padded.features.slice([0..batch_size, 0..n_max]),
            padded.pixel_coords.slice([0..batch_size, 0..n_max]),
            pyramid,
            padded.point_coords.slice([0..batch_size, 0..n_max]),
        );
        let enhanced_channels = enhanced.dims()[2];
        if enhanced_channels != channels {
            return Err(VoxelFusionError::ShapeMismatch {
                expected: vec![batch_size, n_max, channels],
                got: enhanced.dims().to_vec(),
            });
        }

        let mut out = Tensor::zeros([x.num_voxels(), channels], &device);
        for (b, sample) in aligned.iter().enumerate() {
            let count = padded.counts[b];
            if count == 0 {
                continue;
            }
            let rows: Vec<i64> = sample.rows[..count].iter().map(|&r| r as i64).collect();
            let row_idx = Tensor::<B, 1, Int>::from_data(rows.as_slice(), &device);
            let slice_b = enhanced
                .clone()
                .slice([b..b + 1, 0..count])
                .reshape([count, channels]);
            out = out.select_assign(0, row_idx, slice_b);
        }

        self.combine(out, &x.features)
    }

    /// Merge image-derived features with the original voxel features.
    fn combine(&self, fused: Tensor<B, 2>, original: &Tensor<B, 2>) -> Result<Tensor<B, 2>> {
        match self.config.combine {
            CombineMethod::Sum => {
                if fused.dims()[1] != original.dims()[1] {
                    return Err(VoxelFusionError::ShapeMismatch {
                        expected: original.dims().to_vec(),
                        got: fused.dims().to_vec(),
                    });
                }
                Ok(fused + original.clone())
            }
            CombineMethod::Concat => Ok(Tensor::cat(vec![fused, original.clone()], 1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn make_aligned(rows: Vec<usize>) -> AlignedVoxels {
        let n = rows.len();
        AlignedVoxels {
            rows,
            world_points: vec![[1.0, 2.0, 3.0]; n],
            pixels: vec![[0.5, 0.5]; n],
            pixels_norm: vec![[0.125, 0.125]; n],
            in_frustum: vec![true; n],
        }
    }

    #[test]
    fn test_pad_ragged_zero_fills_beyond_count() {
        let device = Default::default();
        let features = Tensor::<TestBackend, 2>::ones([5, 4], &device);
        let indices = vec![
            [0, 0, 0, 0],
            [0, 0, 0, 1],
            [0, 0, 1, 0],
            [0, 1, 0, 0],
            [0, 1, 1, 1],
        ];
        let x = SparseTensor::new(features, indices, [8, 8, 8], 1).unwrap();
        let aligned = vec![make_aligned(vec![0, 1, 2, 3, 4])];

        let padded = pad_ragged(&x, &aligned, 10);
        assert_eq!(padded.counts, vec![5]);
        assert_eq!(padded.features.dims(), [1, 10, 4]);

        // Rows at and beyond the true count stay zero.
        let tail: f32 = padded
            .features
            .clone()
            .slice([0..1, 5..10])
            .sum()
            .into_scalar();
        assert_eq!(tail, 0.0);

        // Rows before the true count carry the voxel features.
        let head: f32 = padded
            .features
            .slice([0..1, 0..5])
            .sum()
            .into_scalar();
        assert_eq!(head, 20.0);
    }

    #[test]
    fn test_pad_ragged_truncates_over_capacity() {
        let device = Default::default();
        let features = Tensor::<TestBackend, 2>::ones([5, 4], &device);
        let indices = vec![
            [0, 0, 0, 0],
            [0, 0, 0, 1],
            [0, 0, 1, 0],
            [0, 1, 0, 0],
            [0, 1, 1, 1],
        ];
        let x = SparseTensor::new(features, indices, [8, 8, 8], 1).unwrap();
        let aligned = vec![make_aligned(vec![0, 1, 2, 3, 4])];

        let padded = pad_ragged(&x, &aligned, 3);
        assert_eq!(padded.counts, vec![3]);
        assert_eq!(padded.features.dims(), [1, 3, 4]);
    }
}
