use serde::{Deserialize, Serialize};

use crate::tipset::Tipset;

/// `{kind, tipset}`. `Current` appears once at the start of a `ChainNotify`
/// subscription; `Apply`/`Revert` describe chain progression thereafter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeadChangeKind {
    Current,
    Apply,
    Revert,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadChange {
    pub kind: HeadChangeKind,
    pub tipset: Tipset,
}

impl HeadChange {
    pub fn current(tipset: Tipset) -> Self {
        Self {
            kind: HeadChangeKind::Current,
            tipset,
        }
    }

    pub fn apply(tipset: Tipset) -> Self {
        Self {
            kind: HeadChangeKind::Apply,
            tipset,
        }
    }

    pub fn revert(tipset: Tipset) -> Self {
        Self {
            kind: HeadChangeKind::Revert,
            tipset,
        }
    }
}
