//! Kernel timestamps, used only for logging (§1.A) — this kernel's
//! scheduler is cooperative round-robin and never preempts on a timer.

/// In-kernel timestamp, measured in an arbitrary "tick" unit advanced by the
/// system tick interrupt.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
#[repr(transparent)]
pub struct Timestamp(u64);

impl From<u64> for Timestamp {
    fn from(v: u64) -> Self {
        Timestamp(v)
    }
}

impl From<Timestamp> for u64 {
    fn from(v: Timestamp) -> Self {
        v.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_u64() {
        let t = Timestamp::from(42u64);
        assert_eq!(u64::from(t), 42);
    }

    #[test]
    fn ordered_by_tick_count() {
        assert!(Timestamp::from(1) < Timestamp::from(2));
    }
}
