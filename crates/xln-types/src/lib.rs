//! XLN Types - canonical domain types for the XLN consensus core
//!
//! This crate has zero dependencies on other `xln-*` crates. It defines:
//!
//! - Identifiers (`EntityId`, `SignerId`, `AccountKey`, `TokenId`)
//! - The per-token `Delta` ledger entry that the RCPAN engine operates on
//! - The shared error taxonomy (`CoreError`) every consensus crate returns
//!
//! # Architectural invariant
//!
//! Every balance-bearing field (`collateral`, `on_delta`, `off_delta`, credit
//! limits) is a signed arbitrary-precision integer (`num_bigint::BigInt`).
//! Silent wraparound here would break the RCPAN invariant, so no crate in
//! this workspace is permitted to substitute a fixed-width integer for these
//! fields.

pub mod delta;
pub mod error;
pub mod identity;
pub mod token;

pub use delta::*;
pub use error::*;
pub use identity::*;
pub use token::*;

/// Schema version of the XLN wire/persisted types.
pub const TYPES_VERSION: &str = "0.1.0";
