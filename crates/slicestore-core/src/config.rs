//! Configuration management for SliceStore
//!
//! Provides rent and capacity presets for different network classes
//! and validation for custom configurations.

use alloy_primitives::U256;

use crate::error::{SliceError, SliceResult};

/// SliceStore configuration with network presets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Rent charged per stored byte per elapsed epoch
    pub rent_per_byte_epoch: U256,
    /// Fixed per-slice footprint added to the stored byte count
    pub record_overhead_bytes: u64,
    /// Largest `history_depth` a slice may be configured with
    pub max_history_depth: u32,
    /// Largest single content version in bytes
    pub max_payload_size: usize,
    /// Longest accepted path descriptor, in segments
    pub max_path_segments: usize,
}

impl Config {
    /// Production rates: 1 unit per byte-epoch, 256-byte record overhead.
    pub fn mainnet() -> Self {
        Self {
            rent_per_byte_epoch: U256::from(1u64),
            record_overhead_bytes: 256,
            max_history_depth: 64,
            max_payload_size: 1024 * 1024,
            max_path_segments: 32,
        }
    }

    /// Same limits as mainnet with a cheaper overhead for experimentation.
    pub fn testnet() -> Self {
        Self {
            rent_per_byte_epoch: U256::from(1u64),
            record_overhead_bytes: 32,
            max_history_depth: 64,
            max_payload_size: 1024 * 1024,
            max_path_segments: 32,
        }
    }

    /// Local development: small limits so boundaries are easy to hit in tests.
    pub fn devnet() -> Self {
        Self {
            rent_per_byte_epoch: U256::from(1u64),
            record_overhead_bytes: 0,
            max_history_depth: 8,
            max_payload_size: 64 * 1024,
            max_path_segments: 16,
        }
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> SliceResult<()> {
        if self.max_payload_size == 0 {
            return Err(SliceError::invalid("max_payload_size must be > 0"));
        }
        if self.max_path_segments == 0 {
            return Err(SliceError::invalid("max_path_segments must be > 0"));
        }
        if self.max_history_depth == 0 {
            return Err(SliceError::invalid("max_history_depth must be > 0"));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self { Self::mainnet() }
}
