use once_cell::sync::Lazy;
use prometheus::{register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec};

/// Domain metrics registered directly against the default `prometheus`
/// registry, the same pattern `order-watcher/src/lib.rs` uses for its own
/// revalidation counters rather than threading a metrics handle through
/// every constructor.
pub static HEAD_INSTALLED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "chain_ro_head_installed_total",
        "Number of times the coordinator installed a new canonical head."
    )
    .unwrap()
});

pub static REORGS_DETECTED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "chain_ro_reorgs_detected_total",
        "Number of head installs that required walking back to a common ancestor."
    )
    .unwrap()
});

pub static AGENT_RECONNECTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "chain_ro_agent_reconnects_total",
        "Number of times a node agent re-entered the Disconnected state.",
        &["address"]
    )
    .unwrap()
});

pub static SELECTOR_PICKS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "chain_ro_selector_picks_total",
        "Number of times an upstream was chosen to serve a request.",
        &["address"]
    )
    .unwrap()
});
