use chain_ro_types::{Tipset, Weight};

/// `{source upstream, tipset, weight}` — produced exactly once per
/// Apply/Current event by an agent, after fetching the weight of the new
/// tipset.
#[derive(Clone, Debug)]
pub struct HeadCandidate {
    pub source: String,
    pub tipset: Tipset,
    pub weight: Weight,
}
