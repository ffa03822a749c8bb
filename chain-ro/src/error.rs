use chain_ro_core::{CoreError, UpstreamCallError};
use jsonrpsee::types::error::{ErrorObject, ErrorObjectOwned};
use thiserror::Error;

/// Binary/RPC-boundary error taxonomy. Wraps `CoreError`, a forwarded
/// upstream call error, and the admin surface's own auth failure, and
/// knows how to render itself as a JSON-RPC error object with a stable
/// code.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("missing or invalid bearer token")]
    Unauthorized,

    #[error(transparent)]
    Upstream(#[from] UpstreamCallError),
}

/// Stable JSON-RPC error codes, outside the range reserved for standard
/// JSON-RPC errors (-32768..-32000).
const NO_NODE_AVAILABLE: i32 = -32001;
const ADMIN_VALIDATION: i32 = -32002;
const REORG_FAILED: i32 = -32003;
const UNAUTHORIZED: i32 = -32010;
const UPSTREAM_TRANSPORT: i32 = -32020;

impl From<Error> for ErrorObjectOwned {
    fn from(err: Error) -> Self {
        match err {
            Error::Core(CoreError::NoNodeAvailable) => {
                ErrorObject::owned(NO_NODE_AVAILABLE, err.to_string(), None::<()>)
            }
            Error::Core(CoreError::AdminValidation(_)) => {
                ErrorObject::owned(ADMIN_VALIDATION, err.to_string(), None::<()>)
            }
            Error::Core(CoreError::ReorgReconstruction(_)) => {
                ErrorObject::owned(REORG_FAILED, err.to_string(), None::<()>)
            }
            Error::Core(CoreError::TransientUpstream { .. }) => {
                ErrorObject::owned(UPSTREAM_TRANSPORT, err.to_string(), None::<()>)
            }
            Error::Unauthorized => ErrorObject::owned(UNAUTHORIZED, err.to_string(), None::<()>),
            // The upstream's own error object — code, message, and data —
            // is returned unchanged, not re-coded under one of ours.
            Error::Upstream(UpstreamCallError::Call(obj)) => obj,
            Error::Upstream(UpstreamCallError::Transport(_)) => {
                ErrorObject::owned(UPSTREAM_TRANSPORT, err.to_string(), None::<()>)
            }
        }
    }
}
