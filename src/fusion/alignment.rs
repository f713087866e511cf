//! Point-image alignment.
//!
//! Converts active voxel grid indices to world coordinates, inverts any data
//! augmentation recorded for the batch element, projects through the camera
//! calibration, and computes the in-frustum mask. Out-of-frustum voxels are
//! never dropped; the mask only gates which image features get sampled.

use burn::prelude::*;

use crate::batch::{AugmentationState, VoxelBatch};
use crate::error::{Result, VoxelFusionError};
use crate::sparse::SparseTensor;

/// Projection result for the voxels of one batch element.
#[derive(Debug, Clone)]
pub struct AlignedVoxels {
    /// Row indices into the flat feature matrix, in original order.
    pub rows: Vec<usize>,
    /// World coordinates in the original (pre-augmentation) frame,
    /// `(x, y, z)` order.
    pub world_points: Vec<[f32; 3]>,
    /// Raw projected pixel coordinates `(u, v)`.
    pub pixels: Vec<[f32; 2]>,
    /// Pixel coordinates normalized by image width and height.
    pub pixels_norm: Vec<[f32; 2]>,
    /// Whether each projection falls inside the image bounds.
    pub in_frustum: Vec<bool>,
}

/// Rotate `(x, y, z)` points about the vertical (z) axis by `angle` radians.
pub fn rotate_points_along_z(points: &mut [[f32; 3]], angle: f32) {
    let (sin, cos) = angle.sin_cos();
    for p in points.iter_mut() {
        let (x, y) = (p[0], p[1]);
        p[0] = cos * x - sin * y;
        p[1] = sin * x + cos * y;
    }
}

/// Invert recorded augmentation on `(x, y, z)` points, in the exact reverse
/// of the forward augmentation order: scale, rotation, flip-x, flip-y.
pub fn invert_augmentation(points: &mut [[f32; 3]], aug: &AugmentationState) {
    if let Some(scale) = aug.scale {
        for p in points.iter_mut() {
            p[0] /= scale;
            p[1] /= scale;
            p[2] /= scale;
        }
    }
    if let Some(angle) = aug.rotation {
        rotate_points_along_z(points, -angle);
    }
    if aug.flip_x {
        for p in points.iter_mut() {
            p[1] = -p[1];
        }
    }
    if aug.flip_y {
        for p in points.iter_mut() {
            p[0] = -p[0];
        }
    }
}

/// Compute the in-frustum mask for projected pixel coordinates against an
/// image of `height` x `width` pixels.
pub fn compute_frustum_mask(pixels: &[[f32; 2]], height: usize, width: usize) -> Vec<bool> {
    pixels
        .iter()
        .map(|p| {
            let u = p[0].floor() as i64;
            let v = p[1].floor() as i64;
            u >= 0 && u < width as i64 && v >= 0 && v < height as i64
        })
        .collect()
}

/// Align the active voxels of a sparse feature map with the image plane.
///
/// `voxel_stride` is the cumulative downsampling factor of `x` relative to
/// the raw voxel grid; `voxel_size` and `range_origin` are in `(z, y, x)`
/// order, matching the grid index layout.
pub fn align_voxels_to_image<B: Backend>(
    x: &SparseTensor<B>,
    batch: &VoxelBatch<B>,
    voxel_stride: usize,
    voxel_size: [f32; 3],
    range_origin: [f32; 3],
    image_size: (usize, usize),
) -> Result<Vec<AlignedVoxels>> {
    if batch.calibrations.is_empty() {
        return Err(VoxelFusionError::MissingInput {
            field: "calib".to_string(),
        });
    }
    if batch.calibrations.len() != batch.batch_size {
        return Err(VoxelFusionError::InvalidConfig {
            message: format!(
                "expected {} calibrations, got {}",
                batch.batch_size,
                batch.calibrations.len()
            ),
        });
    }
    let metadata_lens = [
        batch.noise_scale.as_ref().map(Vec::len),
        batch.noise_rot.as_ref().map(Vec::len),
        batch.flip_x.as_ref().map(Vec::len),
        batch.flip_y.as_ref().map(Vec::len),
    ];
    for len in metadata_lens.into_iter().flatten() {
        if len != batch.batch_size {
            return Err(VoxelFusionError::InvalidConfig {
                message: format!(
                    "augmentation metadata covers {} elements, expected {}",
                    len, batch.batch_size
                ),
            });
        }
    }

    let (height, width) = image_size;
    let stride = voxel_stride as f32;
    let mut aligned = Vec::with_capacity(batch.batch_size);

    for b in 0..batch.batch_size {
        let mut rows = Vec::new();
        let mut points = Vec::new();
        for (row, site) in x.indices.iter().enumerate() {
            if site[0] != b as i32 {
                continue;
            }
            // Grid index -> world coordinate, permuted from (z, y, x) grid
            // order to the (x, y, z) frame the projector expects.
            let z = site[1] as f32 * stride * voxel_size[0] + range_origin[0];
            let y = site[2] as f32 * stride * voxel_size[1] + range_origin[1];
            let wx = site[3] as f32 * stride * voxel_size[2] + range_origin[2];
            rows.push(row);
            points.push([wx, y, z]);
        }

        invert_augmentation(&mut points, &batch.augmentation(b));

        let pixels = batch.calibrations[b].lidar_to_img(&points);
        let pixels_norm = pixels
            .iter()
            .map(|p| [p[0] / width as f32, p[1] / height as f32])
            .collect();
        let in_frustum = compute_frustum_mask(&pixels, height, width);

        aligned.push(AlignedVoxels {
            rows,
            world_points: points,
            pixels,
            pixels_norm,
            in_frustum,
        });
    }

    Ok(aligned)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::fusion::Calibration;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    /// Projects by dropping depth: (x, y, z) -> (x, y).
    struct DropDepthCalib;

    impl Calibration for DropDepthCalib {
        fn lidar_to_img(&self, points: &[[f32; 3]]) -> Vec<[f32; 2]> {
            points.iter().map(|p| [p[0], p[1]]).collect()
        }
    }

    fn make_batch(
        coords: Vec<[i32; 4]>,
        device: &<TestBackend as Backend>::Device,
    ) -> (SparseTensor<TestBackend>, VoxelBatch<TestBackend>) {
        let n = coords.len();
        let features = Tensor::ones([n, 4], device);
        let x = SparseTensor::new(features.clone(), coords.clone(), [8, 8, 8], 1).unwrap();
        let batch = VoxelBatch::new(features, coords, 1)
            .with_calibrations(vec![Arc::new(DropDepthCalib) as Arc<dyn Calibration>]);
        (x, batch)
    }

    #[test]
    fn test_rotation_helper() {
        let mut points = vec![[1.0, 0.0, 0.5]];
        rotate_points_along_z(&mut points, std::f32::consts::FRAC_PI_2);
        assert!(points[0][0].abs() < 1e-6);
        assert!((points[0][1] - 1.0).abs() < 1e-6);
        assert!((points[0][2] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_flip_inversion_applied_once() {
        let aug = AugmentationState {
            flip_x: true,
            ..Default::default()
        };

        let mut points = vec![[1.0, 2.0, 3.0]];
        invert_augmentation(&mut points, &aug);
        assert_eq!(points[0], [1.0, -2.0, 3.0]);

        // Flipping twice returns the original sign.
        invert_augmentation(&mut points, &aug);
        assert_eq!(points[0], [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_scale_then_rotation_inversion() {
        let aug = AugmentationState {
            scale: Some(2.0),
            rotation: Some(std::f32::consts::FRAC_PI_2),
            ..Default::default()
        };

        // Forward augmentation of (1, 0, 0): rotate +90deg -> (0, 1, 0),
        // then scale x2 -> (0, 2, 0). Inversion must recover the original.
        let mut points = vec![[0.0, 2.0, 0.0]];
        invert_augmentation(&mut points, &aug);
        assert!((points[0][0] - 1.0).abs() < 1e-6);
        assert!(points[0][1].abs() < 1e-6);
    }

    #[test]
    fn test_no_augmentation_matches_direct_projection() {
        let device = Default::default();
        let coords = vec![[0, 1, 2, 3], [0, 4, 5, 6]];
        let (x, batch) = make_batch(coords, &device);

        let aligned = align_voxels_to_image(
            &x,
            &batch,
            1,
            [1.0, 1.0, 1.0],
            [0.0, 0.0, 0.0],
            (16, 16),
        )
        .unwrap();

        // With unit voxel size and zero origin, projection is just (x, y)
        // of the grid index.
        assert_eq!(aligned[0].pixels[0], [3.0, 2.0]);
        assert_eq!(aligned[0].pixels[1], [6.0, 5.0]);
        assert_eq!(aligned[0].rows, vec![0, 1]);
    }

    #[test]
    fn test_voxel_stride_scales_world_coords() {
        let device = Default::default();
        let coords = vec![[0, 0, 1, 1]];
        let (x, batch) = make_batch(coords, &device);

        let aligned = align_voxels_to_image(
            &x,
            &batch,
            4,
            [1.0, 1.0, 1.0],
            [0.0, 0.0, 0.0],
            (16, 16),
        )
        .unwrap();

        assert_eq!(aligned[0].pixels[0], [4.0, 4.0]);
    }

    #[test]
    fn test_frustum_mask_monotonic_under_resize() {
        let pixels = vec![[0.0, 0.0], [3.5, 3.5], [7.0, 2.0], [-1.0, -1.0]];
        let small = compute_frustum_mask(&pixels, 4, 4);
        let large = compute_frustum_mask(&pixels, 8, 8);

        for (s, l) in small.iter().zip(&large) {
            // Enlarging the image can only add in-frustum voxels.
            assert!(!s | l);
        }
        assert_eq!(small, vec![true, true, false, false]);
        assert_eq!(large, vec![true, true, true, false]);
    }

    #[test]
    fn test_short_augmentation_metadata_is_fatal() {
        let device = Default::default();
        let coords = vec![[0, 0, 0, 0], [1, 1, 1, 1]];
        let features = Tensor::<TestBackend, 2>::ones([2, 4], &device);
        let x = SparseTensor::new(features.clone(), coords.clone(), [8, 8, 8], 2).unwrap();
        let batch = VoxelBatch::new(features, coords, 2)
            .with_calibrations(vec![
                Arc::new(DropDepthCalib) as Arc<dyn Calibration>,
                Arc::new(DropDepthCalib) as Arc<dyn Calibration>,
            ])
            .with_noise_scale(vec![1.0]);

        // One scale factor for two batch elements must error, not panic.
        let result = align_voxels_to_image(
            &x,
            &batch,
            1,
            [1.0, 1.0, 1.0],
            [0.0, 0.0, 0.0],
            (4, 4),
        );
        assert!(matches!(
            result,
            Err(VoxelFusionError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_missing_calibration_is_fatal() {
        let device = Default::default();
        let coords = vec![[0, 0, 0, 0]];
        let features = Tensor::<TestBackend, 2>::ones([1, 4], &device);
        let x = SparseTensor::new(features.clone(), coords.clone(), [8, 8, 8], 1).unwrap();
        let batch = VoxelBatch::new(features, coords, 1);

        let result = align_voxels_to_image(
            &x,
            &batch,
            1,
            [1.0, 1.0, 1.0],
            [0.0, 0.0, 0.0],
            (4, 4),
        );
        assert!(matches!(
            result,
            Err(VoxelFusionError::MissingInput { .. })
        ));
    }
}
