//! SliceStore storage actor
//!
//! Exposes the slice interface (`createSlice`, `writeSubSliceUint256`,
//! `parseCIDAddressArray`, ...) over slicestore-core's engine.
//!
//! # Architecture
//!
//! The host authenticates the caller and supplies the epoch, timestamp and
//! attached payment. The actor turns that into a call scope:
//! - Each top-level call is an [`ActorTx`] owning the sub-slice staging buffer
//! - Methods are one enum with a kind tag instead of one entry point per type
//! - Only `createSlice` and `fundSlice` accept payment
//! - Every engine error surfaces as a [`Revert`] with no state change

pub mod actor;
pub mod method;
pub mod tx;

pub use actor::{Revert, SliceActor};
pub use method::{Method, Output};
pub use tx::ActorTx;
