//! Upstream adapters. Both converge on the `RawSource` line contract.
pub mod generic;
pub mod native;
