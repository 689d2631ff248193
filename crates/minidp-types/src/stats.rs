//! Per-step run statistics.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Counters collected while a processor runs one step.
///
/// Invariant: `num_out = num_in - dropped + expanded`, where `expanded`
/// counts output records beyond the first per input (an input emitting `k`
/// records contributes `k - 1`; an input emitting none contributes 1 to
/// `dropped`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    /// Input records read.
    pub num_in: u64,
    /// Output records written.
    pub num_out: u64,
    /// Dropped entries (empty emission or dropped sentinel).
    pub dropped: u64,
    /// Additional records emitted beyond one per input.
    pub expanded: u64,
    /// Wall-clock time for the step.
    #[serde(default)]
    pub wall_time: Duration,
}

impl RunStats {
    /// Check the counter identity `out = in - dropped + expanded`.
    pub fn is_balanced(&self) -> bool {
        self.num_out + self.dropped == self.num_in + self.expanded
    }
}

impl std::fmt::Display for RunStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "in={} out={} dropped={} expanded={} time={:.2}s",
            self.num_in,
            self.num_out,
            self.dropped,
            self.expanded,
            self.wall_time.as_secs_f64()
        )
    }
}
