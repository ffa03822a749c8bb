use std::collections::HashMap;
use std::sync::Mutex;

use chain_ro_types::Priority;
use tokio::sync::RwLock;

use crate::error::{AdminValidationError, CoreError};

/// Admin-configurable. 0 blocks the upstream entirely.
pub const MAX_VALID_WEIGHT: u32 = 1000;
pub const DEFAULT_WEIGHT: u32 = 1;

/// Owns the weight and priority mappings over upstream address and the
/// smooth-weighted round-robin scheduler used to pick within a band.
/// `Select` takes the lock in read mode; `SetWeight`/priority mutation take
/// it in write mode.
pub struct Selector {
    state: RwLock<State>,
    swrr: Mutex<SwrrState>,
}

struct State {
    weight: HashMap<String, u32>,
    priority: HashMap<String, Priority>,
}

#[derive(Default)]
struct SwrrState {
    current: HashMap<String, i64>,
}

impl Selector {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State {
                weight: HashMap::new(),
                priority: HashMap::new(),
            }),
            swrr: Mutex::new(SwrrState::default()),
        }
    }

    /// Registers a newly discovered upstream with `DefaultWeight` and
    /// `DelayPriority`.
    pub async fn register(&self, address: &str) {
        let mut state = self.state.write().await;
        state.weight.insert(address.to_string(), DEFAULT_WEIGHT);
        state
            .priority
            .insert(address.to_string(), Priority::DelayPriority);
    }

    pub async fn deregister(&self, address: &str) {
        let mut state = self.state.write().await;
        state.weight.remove(address);
        state.priority.remove(address);
    }

    pub async fn set_weight(&self, address: &str, weight: u32) -> Result<(), CoreError> {
        if weight > MAX_VALID_WEIGHT {
            return Err(CoreError::AdminValidation(AdminValidationError::OutOfRange {
                value: weight.to_string(),
                max: MAX_VALID_WEIGHT.to_string(),
            }));
        }
        let mut state = self.state.write().await;
        if !state.weight.contains_key(address) {
            return Err(CoreError::AdminValidation(AdminValidationError::UnknownAddress(
                address.to_string(),
            )));
        }
        state.weight.insert(address.to_string(), weight);
        Ok(())
    }

    pub async fn list_weight(&self) -> HashMap<String, u32> {
        self.state.read().await.weight.clone()
    }

    pub async fn list_priority(&self) -> HashMap<String, Priority> {
        self.state.read().await.priority.clone()
    }

    /// Called only by the coordinator.
    pub async fn set_priority(&self, level: Priority, addresses: impl IntoIterator<Item = String>) {
        let mut state = self.state.write().await;
        for address in addresses {
            state.priority.insert(address, level);
        }
    }

    pub async fn addresses_of_priority(&self, level: Priority) -> Vec<String> {
        let state = self.state.read().await;
        state
            .priority
            .iter()
            .filter(|(_, p)| **p == level)
            .map(|(addr, _)| addr.clone())
            .collect()
    }

    /// Partitions registered addresses by priority, keeping only those
    /// with `weight > 0`, then runs SWRR within the highest non-empty
    /// band.
    pub async fn select(&self) -> Result<String, CoreError> {
        let state = self.state.read().await;
        let mut bands: HashMap<Priority, HashMap<String, u32>> = HashMap::new();
        for (addr, priority) in state.priority.iter() {
            let weight = *state.weight.get(addr).unwrap_or(&0);
            if weight == 0 {
                continue;
            }
            bands.entry(*priority).or_default().insert(addr.clone(), weight);
        }
        drop(state);

        for band in Priority::DESCENDING {
            if let Some(weights) = bands.get(&band) {
                if !weights.is_empty() {
                    let picked = self.swrr_pick(weights);
                    crate::metrics::SELECTOR_PICKS
                        .with_label_values(&[&picked])
                        .inc();
                    return Ok(picked);
                }
            }
        }
        Err(CoreError::NoNodeAvailable)
    }

    /// Smooth weighted round robin: `current[addr] += weight[addr]` for
    /// every address, pick the largest, then subtract the total weight
    /// from the winner. Over any window of `sum(weight)` consecutive
    /// calls this returns each address exactly `weight[addr]` times.
    fn swrr_pick(&self, weights: &HashMap<String, u32>) -> String {
        let mut swrr = self.swrr.lock().expect("swrr mutex poisoned");
        let total: i64 = weights.values().map(|w| *w as i64).sum();

        let mut chosen: Option<(String, i64)> = None;
        // Iterate in a stable order so ties are broken deterministically.
        let mut addrs: Vec<&String> = weights.keys().collect();
        addrs.sort();
        for addr in addrs {
            let weight = *weights.get(addr).unwrap() as i64;
            let current = swrr.current.entry(addr.clone()).or_insert(0);
            *current += weight;
            if chosen.as_ref().map_or(true, |(_, best)| *current > *best) {
                chosen = Some((addr.clone(), *current));
            }
        }
        let (winner, _) = chosen.expect("weights map is non-empty");
        *swrr.current.get_mut(&winner).unwrap() -= total;
        winner
    }
}

impl Default for Selector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::{collection::vec as prop_vec, prop_assert_eq, proptest};

    async fn registered(addrs: &[&str]) -> Selector {
        let selector = Selector::new();
        for addr in addrs {
            selector.register(addr).await;
        }
        selector
    }

    #[tokio::test]
    async fn select_errors_when_no_upstream_registered() {
        let selector = Selector::new();
        assert!(matches!(
            selector.select().await,
            Err(CoreError::NoNodeAvailable)
        ));
    }

    #[tokio::test]
    async fn select_never_returns_zero_weight_address() {
        let selector = registered(&["a", "b"]).await;
        selector.set_priority(Priority::CatchUpPriority, ["a".to_string(), "b".to_string()]).await;
        selector.set_weight("a", 0).await.unwrap();
        for _ in 0..50 {
            assert_eq!(selector.select().await.unwrap(), "b");
        }
    }

    #[tokio::test]
    async fn swrr_is_fair_over_one_period() {
        let selector = registered(&["a", "b", "c"]).await;
        selector
            .set_priority(
                Priority::CatchUpPriority,
                ["a".to_string(), "b".to_string(), "c".to_string()],
            )
            .await;
        selector.set_weight("a", 0).await.unwrap();
        selector.set_weight("b", 1).await.unwrap();
        selector.set_weight("c", 1).await.unwrap();

        let mut counts: HashMap<String, u32> = HashMap::new();
        for _ in 0..300 {
            let picked = selector.select().await.unwrap();
            *counts.entry(picked).or_default() += 1;
        }
        assert_eq!(counts.get("a"), None);
        assert_eq!(*counts.get("b").unwrap(), 150);
        assert_eq!(*counts.get("c").unwrap(), 150);
    }

    #[tokio::test]
    async fn prefers_catch_up_band_over_delay_over_err() {
        let selector = registered(&["a", "b"]).await;
        selector.set_priority(Priority::ErrPriority, ["a".to_string()]).await;
        selector.set_priority(Priority::CatchUpPriority, ["b".to_string()]).await;
        for _ in 0..10 {
            assert_eq!(selector.select().await.unwrap(), "b");
        }
    }

    #[tokio::test]
    async fn falls_back_to_delay_band_when_catch_up_empty() {
        let selector = registered(&["a", "b"]).await;
        selector.set_priority(Priority::ErrPriority, ["a".to_string()]).await;
        // b stays at its registered DelayPriority.
        for _ in 0..10 {
            assert_eq!(selector.select().await.unwrap(), "b");
        }
    }

    #[tokio::test]
    async fn set_weight_rejects_out_of_range_and_unknown_address() {
        let selector = registered(&["a"]).await;
        assert!(selector.set_weight("a", MAX_VALID_WEIGHT + 1).await.is_err());
        assert!(selector.set_weight("ghost", 1).await.is_err());
    }

    #[tokio::test]
    async fn set_weight_does_not_change_priority() {
        let selector = registered(&["a"]).await;
        selector.set_priority(Priority::CatchUpPriority, ["a".to_string()]).await;
        selector.set_weight("a", 7).await.unwrap();
        assert_eq!(selector.list_weight().await["a"], 7);
        assert_eq!(selector.list_priority().await["a"], Priority::CatchUpPriority);
    }

    proptest! {
        // Over any window of sum(weight) consecutive selections, every
        // address in the band appears exactly weight[addr] times,
        // regardless of how many distinct weights are in play.
        #[test]
        fn swrr_period_matches_weights(weights in prop_vec(1u32..=20, 2..=6)) {
            let addrs: Vec<String> = (0..weights.len()).map(|i| format!("n{i}")).collect();
            let counts = tokio::runtime::Runtime::new().unwrap().block_on(async {
                let selector = registered(&addrs.iter().map(String::as_str).collect::<Vec<_>>()).await;
                selector.set_priority(Priority::CatchUpPriority, addrs.clone()).await;
                for (addr, weight) in addrs.iter().zip(&weights) {
                    selector.set_weight(addr, *weight).await.unwrap();
                }

                let total: u32 = weights.iter().sum();
                let mut counts: HashMap<String, u32> = HashMap::new();
                for _ in 0..total {
                    *counts.entry(selector.select().await.unwrap()).or_default() += 1;
                }
                counts
            });

            for (addr, weight) in addrs.iter().zip(&weights) {
                prop_assert_eq!(counts.get(addr).copied().unwrap_or(0), *weight);
            }
        }
    }
}
