//! Head tracking, canonical-head arbitration, head-change fan-out, and
//! upstream selection for a pool of Filecoin full-node peers.

pub mod agent;
pub mod bootstrap;
pub mod cache;
pub mod candidate;
pub mod coordinator;
pub mod error;
pub mod metrics;
pub mod pubsub;
pub mod reorg;
pub mod rpc;
pub mod selector;

pub use cache::BlockHeaderCache;
pub use candidate::HeadCandidate;
pub use coordinator::Coordinator;
pub use error::{CoreError, UpstreamCallError};
pub use pubsub::Topic;
pub use selector::Selector;
