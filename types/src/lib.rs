//! Shared domain types for `chain-ro`.
//!
//! Kept deliberately free of I/O: this crate only owns construction,
//! validation, and the `serde` wire format shared between the JSON-RPC
//! server surface and the per-upstream node-agent client.

mod error;
mod head_change;
mod priority;
mod tipset;
mod upstream;
mod weight;

pub use error::ParseUpstreamError;
pub use head_change::{HeadChange, HeadChangeKind};
pub use priority::Priority;
pub use tipset::{BlockCid, BlockHeader, Tipset, TipsetKey};
pub use upstream::UpstreamConfig;
pub use weight::Weight;
