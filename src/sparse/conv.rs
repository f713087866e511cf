//! Sparse 3D convolution layers.
//!
//! Three kinds are supported, selected once at construction via [`ConvKind`]:
//! submanifold (the active-site set is preserved), strided sparse
//! (downsampling, new sites may appear), and inverse sparse (transpose
//! upsampling). The reference implementation keeps one `Linear` per kernel
//! offset and scatter-adds gathered neighbor contributions into the output
//! rows, with all site arithmetic done CPU-side on the index list.

use std::collections::HashMap;

use burn::config::Config;
use burn::module::{Ignored, Module, Param};
use burn::nn::{Initializer, Linear, LinearConfig};
use burn::prelude::*;

use crate::sparse::SparseTensor;

/// Convolution kind, resolved at construction time.
#[derive(Config, Debug, PartialEq)]
pub enum ConvKind {
    /// Output sites equal input sites; no spatial resampling.
    Submanifold,
    /// Strided sparse convolution; changes spatial resolution and may create
    /// new active sites.
    Sparse,
    /// Inverse (transpose) sparse convolution; upsampling.
    Inverse,
}

/// Configuration for a sparse 3D convolution.
#[derive(Config, Debug)]
pub struct SparseConvConfig {
    /// Input channels.
    pub in_channels: usize,
    /// Output channels.
    pub out_channels: usize,
    /// Kernel size per axis, `(z, y, x)`.
    pub kernel_size: [usize; 3],
    /// Stride per axis.
    #[config(default = "[1, 1, 1]")]
    pub stride: [usize; 3],
    /// Zero padding per axis.
    #[config(default = "[0, 0, 0]")]
    pub padding: [usize; 3],
    /// Whether to add a learned per-channel bias.
    #[config(default = false)]
    pub bias: bool,
    /// Convolution kind.
    #[config(default = "ConvKind::Submanifold")]
    pub kind: ConvKind,
}

impl SparseConvConfig {
    /// Initialize the convolution layer.
    pub fn init<B: Backend>(&self, device: &B::Device) -> SparseConv<B> {
        let volume: usize = self.kernel_size.iter().product();
        let kernels = (0..volume)
            .map(|_| {
                LinearConfig::new(self.in_channels, self.out_channels)
                    .with_bias(false)
                    .init(device)
            })
            .collect();
        let bias = if self.bias {
            Some(Initializer::Zeros.init([self.out_channels], device))
        } else {
            None
        };

        SparseConv {
            kernels,
            bias,
            kind: Ignored(self.kind.clone()),
            kernel_size: self.kernel_size,
            stride: self.stride,
            padding: self.padding,
            out_channels: self.out_channels,
        }
    }
}

/// Sparse 3D convolution over a [`SparseTensor`].
///
/// Weights are one `[in_channels, out_channels]` linear map per kernel
/// offset, enumerated in `(z, y, x)` order.
#[derive(Module, Debug)]
pub struct SparseConv<B: Backend> {
    /// Per-offset linear maps, length = kernel volume.
    kernels: Vec<Linear<B>>,
    /// Optional per-channel bias, added once per output site.
    bias: Option<Param<Tensor<B, 1>>>,
    /// Convolution kind, excluded from the parameter record.
    kind: Ignored<ConvKind>,
    /// Kernel size per axis.
    #[module(skip)]
    kernel_size: [usize; 3],
    /// Stride per axis.
    #[module(skip)]
    stride: [usize; 3],
    /// Zero padding per axis.
    #[module(skip)]
    padding: [usize; 3],
    /// Output channel count.
    #[module(skip)]
    out_channels: usize,
}

/// Gather/scatter plan for one forward pass: for each kernel offset, the
/// input rows to gather and the output rows to accumulate into.
struct ConvPlan {
    pairs: Vec<(Vec<i64>, Vec<i64>)>,
    out_indices: Vec<[i32; 4]>,
    out_shape: [usize; 3],
}

impl<B: Backend> SparseConv<B> {
    /// Forward pass.
    pub fn forward(&self, x: &SparseTensor<B>) -> SparseTensor<B> {
        let plan = match self.kind.0 {
            ConvKind::Submanifold => self.plan_submanifold(x),
            ConvKind::Sparse => self.plan_strided(x),
            ConvKind::Inverse => self.plan_inverse(x),
        };
        let features = self.apply(&x.features, &plan);

        SparseTensor {
            features,
            indices: plan.out_indices,
            spatial_shape: plan.out_shape,
            batch_size: x.batch_size,
        }
    }

    /// Output channel count.
    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    fn plan_submanifold(&self, x: &SparseTensor<B>) -> ConvPlan {
        let volume: usize = self.kernel_size.iter().product();
        let mut pairs = vec![(Vec::new(), Vec::new()); volume];

        let site_map: HashMap<[i32; 4], usize> = x
            .indices
            .iter()
            .enumerate()
            .map(|(row, &site)| (site, row))
            .collect();

        let k = self.kernel_size.map(|v| v as i32);
        let center = k.map(|v| v / 2);

        for (row, site) in x.indices.iter().enumerate() {
            let mut kidx = 0;
            for oz in 0..k[0] {
                for oy in 0..k[1] {
                    for ox in 0..k[2] {
                        let neighbor = [
                            site[0],
                            site[1] + oz - center[0],
                            site[2] + oy - center[1],
                            site[3] + ox - center[2],
                        ];
                        if let Some(&src) = site_map.get(&neighbor) {
                            pairs[kidx].0.push(src as i64);
                            pairs[kidx].1.push(row as i64);
                        }
                        kidx += 1;
                    }
                }
            }
        }

        ConvPlan {
            pairs,
            out_indices: x.indices.clone(),
            out_shape: x.spatial_shape,
        }
    }

    fn plan_strided(&self, x: &SparseTensor<B>) -> ConvPlan {
        let k = self.kernel_size.map(|v| v as i64);
        let s = self.stride.map(|v| v as i64);
        let p = self.padding.map(|v| v as i64);

        let mut out_shape = [0usize; 3];
        for d in 0..3 {
            let extent = (x.spatial_shape[d] as i64 + 2 * p[d] - k[d]) / s[d] + 1;
            out_shape[d] = extent.max(0) as usize;
        }

        let volume: usize = self.kernel_size.iter().product();
        let mut pairs = vec![(Vec::new(), Vec::new()); volume];
        let mut out_map: HashMap<[i32; 4], usize> = HashMap::new();
        let mut out_indices: Vec<[i32; 4]> = Vec::new();

        for (row, site) in x.indices.iter().enumerate() {
            let mut kidx = 0;
            for oz in 0..k[0] {
                for oy in 0..k[1] {
                    for ox in 0..k[2] {
                        let offset = [oz, oy, ox];
                        let mut out = [0i64; 3];
                        let mut valid = true;
                        for d in 0..3 {
                            let t = site[1 + d] as i64 + p[d] - offset[d];
                            if t < 0 || t % s[d] != 0 {
                                valid = false;
                                break;
                            }
                            out[d] = t / s[d];
                            if out[d] >= out_shape[d] as i64 {
                                valid = false;
                                break;
                            }
                        }
                        if valid {
                            let out_site =
                                [site[0], out[0] as i32, out[1] as i32, out[2] as i32];
                            let next = out_indices.len();
                            let out_row = *out_map.entry(out_site).or_insert_with(|| {
                                out_indices.push(out_site);
                                next
                            });
                            pairs[kidx].0.push(row as i64);
                            pairs[kidx].1.push(out_row as i64);
                        }
                        kidx += 1;
                    }
                }
            }
        }

        ConvPlan {
            pairs,
            out_indices,
            out_shape,
        }
    }

    fn plan_inverse(&self, x: &SparseTensor<B>) -> ConvPlan {
        let k = self.kernel_size.map(|v| v as i64);
        let s = self.stride.map(|v| v as i64);
        let p = self.padding.map(|v| v as i64);

        let mut out_shape = [0usize; 3];
        for d in 0..3 {
            let extent = (x.spatial_shape[d] as i64 - 1) * s[d] + k[d] - 2 * p[d];
            out_shape[d] = extent.max(0) as usize;
        }

        let volume: usize = self.kernel_size.iter().product();
        let mut pairs = vec![(Vec::new(), Vec::new()); volume];
        let mut out_map: HashMap<[i32; 4], usize> = HashMap::new();
        let mut out_indices: Vec<[i32; 4]> = Vec::new();

        for (row, site) in x.indices.iter().enumerate() {
            let mut kidx = 0;
            for oz in 0..k[0] {
                for oy in 0..k[1] {
                    for ox in 0..k[2] {
                        let offset = [oz, oy, ox];
                        let mut out = [0i64; 3];
                        let mut valid = true;
                        for d in 0..3 {
                            out[d] = site[1 + d] as i64 * s[d] - p[d] + offset[d];
                            if out[d] < 0 || out[d] >= out_shape[d] as i64 {
                                valid = false;
                                break;
                            }
                        }
                        if valid {
                            let out_site =
                                [site[0], out[0] as i32, out[1] as i32, out[2] as i32];
                            let next = out_indices.len();
                            let out_row = *out_map.entry(out_site).or_insert_with(|| {
                                out_indices.push(out_site);
                                next
                            });
                            pairs[kidx].0.push(row as i64);
                            pairs[kidx].1.push(out_row as i64);
                        }
                        kidx += 1;
                    }
                }
            }
        }

        ConvPlan {
            pairs,
            out_indices,
            out_shape,
        }
    }

    fn apply(&self, input: &Tensor<B, 2>, plan: &ConvPlan) -> Tensor<B, 2> {
        let device = input.device();
        let num_out = plan.out_indices.len();
        let mut out = Tensor::zeros([num_out, self.out_channels], &device);

        for (kidx, (in_rows, out_rows)) in plan.pairs.iter().enumerate() {
            if in_rows.is_empty() {
                continue;
            }
            let in_idx = Tensor::<B, 1, Int>::from_data(in_rows.as_slice(), &device);
            let out_idx = Tensor::<B, 1, Int>::from_data(out_rows.as_slice(), &device);
            let gathered = input.clone().select(0, in_idx);
            out = out.select_assign(0, out_idx, self.kernels[kidx].forward(gathered));
        }

        if let Some(bias) = &self.bias {
            let bias_row: Tensor<B, 2> = bias.val().unsqueeze_dim(0);
            out = out + bias_row;
        }

        out
    }
}
