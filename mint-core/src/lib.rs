//! Domain primitives shared by every mint component: addresses, asset names,
//! trading pairs, bounded amounts, price ratios and entity identifiers.
//!
//! Everything in this crate is pure data with strict parse/format round-trip
//! guarantees; no I/O happens here.

pub mod address;
pub mod amount;
pub mod error;
pub mod id;

pub use address::{Address, AssetName, AssetPair};
pub use amount::{Amount, Price};
pub use error::CodecError;
pub use id::EntityId;
