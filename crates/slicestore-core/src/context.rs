//! Call context supplied by the host environment.

use alloy_primitives::{Address, U256};

/// Who is calling, when, and with how much payment attached.
///
/// The engine trusts these values: authenticating the caller and advancing
/// the epoch are the host's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallContext {
    pub caller: Address,
    /// Current rent epoch
    pub epoch: u64,
    /// Wall-clock seconds, mixed into new slice ids
    pub timestamp: u64,
    /// Payment attached to the call
    pub value: U256,
}

impl CallContext {
    pub fn new(caller: Address, epoch: u64) -> Self {
        Self { caller, epoch, timestamp: epoch, value: U256::ZERO }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn at_epoch(mut self, epoch: u64) -> Self {
        self.epoch = epoch;
        self
    }
}
