use thiserror::Error;

use chain_ro_types::BlockCid;

/// Error kinds raised by the core subsystem. These are *kinds*, not one
/// variant per upstream failure — most failures differ only in which RPC
/// call broke, not in how the caller should react.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Connection, subscription, or weight-fetch failure against a single
    /// upstream. Handled locally by the agent (backoff + error-channel
    /// demotion); never surfaced to a client.
    #[error("transient upstream error ({address}): {source}")]
    TransientUpstream {
        address: String,
        #[source]
        source: anyhow::Error,
    },

    /// Every priority band was empty (or every weight in it was zero) at
    /// selection time.
    #[error("no upstream node is available to serve this request")]
    NoNodeAvailable,

    /// `ReorgOps` failed to find a common ancestor inside `max_depth`
    /// steps, or a block fetch failed while walking parents.
    #[error("reorg reconstruction failed: {0}")]
    ReorgReconstruction(#[from] ReorgError),

    /// `SetWeight` called with an out-of-range value or unknown address.
    #[error("admin validation error: {0}")]
    AdminValidation(#[from] AdminValidationError),
}

#[derive(Error, Debug)]
pub enum ReorgError {
    #[error("block {0} could not be fetched while walking to a common ancestor")]
    BlockFetch(BlockCid),
    #[error("no common ancestor found within {max_depth} steps")]
    NoCommonAncestor { max_depth: u64 },
}

#[derive(Error, Debug)]
pub enum AdminValidationError {
    #[error("weight {value} is out of range [0, {max}]")]
    OutOfRange { value: String, max: String },
    #[error("unknown upstream address {0:?}")]
    UnknownAddress(String),
}

/// An error from a forwarded upstream JSON-RPC call. `Call` preserves the
/// upstream's own error object (code, message, data) unchanged so it can be
/// handed straight back to whoever made the forwarded call; `Transport`
/// covers everything that never got a JSON-RPC error response in the first
/// place (connection failure, timeout, malformed reply).
#[derive(Error, Debug)]
pub enum UpstreamCallError {
    #[error("{0}")]
    Call(jsonrpsee::types::ErrorObjectOwned),
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

impl From<jsonrpsee::core::Error> for UpstreamCallError {
    fn from(err: jsonrpsee::core::Error) -> Self {
        match err {
            jsonrpsee::core::Error::Call(call_err) => Self::Call(call_err.into()),
            other => Self::Transport(anyhow::Error::new(other)),
        }
    }
}
