//! Network-tick throttling for per-lobby snapshot broadcasts.
//!
//! The actual per-recipient filtered `game:state` payload is built by
//! `MatchSimulation::build_snapshots`; this just tracks when the next
//! physics tick owes the lobby a network tick.

/// Counts physics ticks until the next scheduled network tick and
/// reports when one is due.
pub struct SnapshotBuilder {
    ticks_since_snapshot: u32,
    snapshot_interval: u32,
}

impl SnapshotBuilder {
    pub fn new(snapshot_interval: u32) -> Self {
        Self { ticks_since_snapshot: 0, snapshot_interval }
    }

    /// Advances the tick counter; returns true if a network tick is due.
    pub fn should_send(&mut self) -> bool {
        self.ticks_since_snapshot += 1;
        if self.ticks_since_snapshot >= self.snapshot_interval {
            self.ticks_since_snapshot = 0;
            true
        } else {
            false
        }
    }

    /// Forces the next physics tick to also emit a network tick, for
    /// events (match start/end, joins) that shouldn't wait on cadence.
    pub fn force_next(&mut self) {
        self.ticks_since_snapshot = self.snapshot_interval;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_per_interval() {
        let mut builder = SnapshotBuilder::new(3);
        assert!(!builder.should_send());
        assert!(!builder.should_send());
        assert!(builder.should_send());
        assert!(!builder.should_send());
    }

    #[test]
    fn force_next_fires_on_next_call() {
        let mut builder = SnapshotBuilder::new(3);
        builder.force_next();
        assert!(builder.should_send());
    }
}
