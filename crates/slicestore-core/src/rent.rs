//! Rent ledger: lazy, per-access rent assessment.
//!
//! Rent is never swept in the background. Every operation that depends on a
//! slice's balance first asks the ledger what the balance is *now*, which is
//! a pure function of the persisted balance, the epochs elapsed since the
//! last assessment, and the slice's storage footprint:
//!
//! ```text
//! footprint = record_overhead_bytes + Σ size(history[i])
//! due       = (epoch - last_rent_epoch) * footprint * rent_per_byte_epoch
//! balance'  = max(balance - due, 0)
//! expired   = balance' == 0
//! ```
//!
//! Assessing twice at the same epoch yields the same outcome, and an epoch
//! older than `last_rent_epoch` accrues nothing.

use alloy_primitives::U256;

use crate::config::Config;
use crate::content::ContentStore;
use crate::error::SliceResult;
use crate::slice::Slice;

/// Result of assessing a slice at some epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RentOutcome {
    pub balance: U256,
    pub expired: bool,
    /// Epoch the outcome is current as of
    pub epoch: u64,
    /// Amount deducted by this assessment
    pub charged: U256,
}

impl RentOutcome {
    /// Persist this outcome onto `slice`.
    pub fn apply(&self, slice: &mut Slice) {
        slice.balance = self.balance;
        slice.last_rent_epoch = self.epoch;
    }
}

/// Rent arithmetic for one configuration.
#[derive(Debug, Clone)]
pub struct RentLedger {
    rate: U256,
    overhead: u64,
}

impl RentLedger {
    pub fn new(config: &Config) -> Self {
        Self { rate: config.rent_per_byte_epoch, overhead: config.record_overhead_bytes }
    }

    /// Bytes a slice is billed for: the record overhead plus every retained
    /// version (a cid that appears twice in history is billed twice).
    pub fn footprint(&self, slice: &Slice, content: &ContentStore) -> SliceResult<u64> {
        slice
            .history
            .iter()
            .try_fold(self.overhead, |total, cid| Ok(total.saturating_add(content.size_of(cid)?)))
    }

    /// Cost of keeping `footprint` bytes for one epoch.
    pub fn per_epoch(&self, footprint: u64) -> U256 {
        self.rate.saturating_mul(U256::from(footprint))
    }

    /// Balance of `slice` as of `epoch`, without mutating it.
    pub fn assess(&self, slice: &Slice, footprint: u64, epoch: u64) -> RentOutcome {
        let elapsed = epoch.saturating_sub(slice.last_rent_epoch);
        let due = self.per_epoch(footprint).saturating_mul(U256::from(elapsed));
        let balance = slice.balance.saturating_sub(due);
        RentOutcome {
            balance,
            expired: balance.is_zero(),
            epoch: epoch.max(slice.last_rent_epoch),
            charged: slice.balance - balance,
        }
    }

    /// First epoch at which `balance` is exhausted, starting from `from_epoch`.
    /// `None` when keeping the footprint costs nothing and the balance is
    /// positive.
    pub fn projected_expiration(&self, balance: U256, footprint: u64, from_epoch: u64) -> Option<u64> {
        if balance.is_zero() {
            return Some(from_epoch);
        }
        let per_epoch = self.per_epoch(footprint);
        if per_epoch.is_zero() {
            return None;
        }
        let mut epochs = balance / per_epoch;
        if !(balance % per_epoch).is_zero() {
            epochs += U256::from(1u64);
        }
        let epochs = if epochs.bit_len() <= 64 { epochs.as_limbs()[0] } else { u64::MAX };
        Some(from_epoch.saturating_add(epochs))
    }
}
