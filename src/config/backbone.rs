//! Backbone configuration.

use burn::config::Config;

// The crate `Result` alias stays out of scope here: the Config derive
// expands serde impls that need the two-parameter `std::result::Result`.
use crate::error::VoxelFusionError;

/// Configuration shared by the voxel backbones.
#[derive(Config, Debug)]
pub struct BackboneConfig {
    /// Number of input feature channels per voxel.
    pub input_channels: usize,

    /// Voxel grid size as `(x, y, z)` counts.
    pub grid_size: [usize; 3],

    /// Zero padding applied by the final output stage.
    #[config(default = 0)]
    pub last_pad: usize,
}

impl BackboneConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.input_channels == 0 {
            return Err(VoxelFusionError::InvalidConfig {
                message: "input_channels must be positive".to_string(),
            });
        }
        if self.grid_size.iter().any(|&d| d == 0) {
            return Err(VoxelFusionError::InvalidConfig {
                message: format!("grid_size must be positive on every axis, got {:?}", self.grid_size),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BackboneConfig::new(4, [1600, 1408, 40]);
        assert_eq!(config.input_channels, 4);
        assert_eq!(config.last_pad, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_axes() {
        let config = BackboneConfig::new(4, [16, 0, 40]);
        assert!(config.validate().is_err());

        let config = BackboneConfig::new(0, [16, 16, 40]);
        assert!(config.validate().is_err());
    }
}
