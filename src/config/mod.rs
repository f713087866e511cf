//! Configuration types for voxel_fusion.
//!
//! All options are strongly typed and validated at construction; variant
//! selection (conv kind, fusion method, injection point) is a closed enum
//! resolved once, never re-dispatched per call.

mod backbone;
mod fusion;

pub use backbone::BackboneConfig;
pub use fusion::{CombineMethod, FusionConfig, FusionMethod, FusionPoint};
