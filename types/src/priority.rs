/// Priority band used to partition upstreams during selection. Ordered so
/// that `CatchUpPriority > DelayPriority > ErrPriority`; `Ord` derivation
/// relies on declaration order, lowest variant first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub enum Priority {
    ErrPriority,
    DelayPriority,
    CatchUpPriority,
}

impl Priority {
    /// Bands in descending selection order: CatchUp, then Delay, then Err.
    pub const DESCENDING: [Priority; 3] = [
        Priority::CatchUpPriority,
        Priority::DelayPriority,
        Priority::ErrPriority,
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_catch_up_above_delay_above_err() {
        assert!(Priority::CatchUpPriority > Priority::DelayPriority);
        assert!(Priority::DelayPriority > Priority::ErrPriority);
    }
}
