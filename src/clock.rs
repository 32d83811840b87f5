//! Clock sampling and offset estimation.
//!
//! DESIGN
//! ======
//! Each completed four-timestamp exchange becomes one immutable
//! [`ClockSample`]. Samples live in a bounded most-recent-N window; the
//! estimate is recomputed from scratch on every insert rather than
//! maintained incrementally, so feeding the same samples in any order
//! produces the same result. Offset is averaged over the lowest-latency
//! half of the window only — high-latency exchanges are the ones most
//! likely to have asymmetric routes, which is exactly when the midpoint
//! formula lies.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

// =============================================================================
// TIME
// =============================================================================

/// Current wall-clock time as milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> f64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0.0;
    };
    dur.as_secs_f64() * 1000.0
}

/// Milliseconds to wait locally before a coordinator-clock instant `target`.
///
/// This is the single translation point between coordinator time and a local
/// delay: `target - (local_now + offset)`, floored at zero when the deadline
/// has already passed.
#[must_use]
pub fn wait_ms(target: f64, offset: f64, local_now: f64) -> f64 {
    (target - (local_now + offset)).max(0.0)
}

// =============================================================================
// CLOCK SAMPLE
// =============================================================================

/// One completed NTP-style exchange. All four timestamps are absolute
/// milliseconds since the Unix epoch: `t0` client send, `t1` coordinator
/// receive, `t2` coordinator send, `t3` client receive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockSample {
    pub t0: f64,
    pub t1: f64,
    pub t2: f64,
    pub t3: f64,
}

impl ClockSample {
    /// Network transit time for the exchange, excluding coordinator-side
    /// processing: `(t3 - t0) - (t2 - t1)`.
    #[must_use]
    pub fn round_trip_delay(&self) -> f64 {
        (self.t3 - self.t0) - (self.t2 - self.t1)
    }

    /// Estimated offset of the coordinator clock relative to the local
    /// clock: `((t1 - t0) + (t2 - t3)) / 2`.
    #[must_use]
    pub fn clock_offset(&self) -> f64 {
        ((self.t1 - self.t0) + (self.t2 - self.t3)) / 2.0
    }
}

// =============================================================================
// SAMPLE WINDOW
// =============================================================================

/// Bounded most-recent-N window of clock samples. Oldest evicted on overflow.
#[derive(Debug)]
pub struct SampleWindow {
    samples: VecDeque<ClockSample>,
    capacity: usize,
}

impl SampleWindow {
    /// A window holding at most `capacity` samples. Capacity is clamped to
    /// at least 1.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { samples: VecDeque::new(), capacity: capacity.max(1) }
    }

    /// Append a sample, evicting the oldest if the window is full.
    pub fn push(&mut self, sample: ClockSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Recompute the filtered estimate over the current window.
    ///
    /// Samples are ranked by round-trip delay ascending; the offset is
    /// averaged over the best `ceil(n/2)` samples, the round-trip over all
    /// `n`. Returns `None` on an empty window — callers must not ask for an
    /// estimate before at least one exchange has completed.
    #[must_use]
    pub fn estimate(&self) -> Option<OffsetEstimate> {
        if self.samples.is_empty() {
            return None;
        }

        let mut by_delay: Vec<&ClockSample> = self.samples.iter().collect();
        by_delay.sort_by(|a, b| a.round_trip_delay().total_cmp(&b.round_trip_delay()));

        let best = by_delay.len().div_ceil(2);
        #[allow(clippy::cast_precision_loss)]
        let average_offset =
            by_delay[..best].iter().map(|s| s.clock_offset()).sum::<f64>() / best as f64;
        #[allow(clippy::cast_precision_loss)]
        let average_round_trip = by_delay.iter().map(|s| s.round_trip_delay()).sum::<f64>()
            / by_delay.len() as f64;

        Some(OffsetEstimate { average_offset, average_round_trip })
    }
}

// =============================================================================
// OFFSET ESTIMATE
// =============================================================================

/// Filtered `(offset, round-trip)` pair derived from a sample window.
/// Superseded by the next recomputation; never mutated in place.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffsetEstimate {
    /// Coordinator clock minus local clock, milliseconds.
    pub average_offset: f64,
    /// Mean round-trip delay over the full window, milliseconds.
    pub average_round_trip: f64,
}

impl OffsetEstimate {
    /// Local wait in milliseconds until coordinator instant `target`.
    #[must_use]
    pub fn wait_ms(&self, target: f64, local_now: f64) -> f64 {
        wait_ms(target, self.average_offset, local_now)
    }
}

// =============================================================================
// CLOCK SYNC
// =============================================================================

/// Window plus latest estimate, with a minimum-sample gate.
///
/// The estimate exists from the first sample, but consumers that schedule
/// playback should use [`ClockSync::trusted_estimate`], which withholds it
/// until the initial burst has populated the window.
#[derive(Debug)]
pub struct ClockSync {
    window: SampleWindow,
    min_samples: usize,
    latest: Option<OffsetEstimate>,
}

impl ClockSync {
    #[must_use]
    pub fn new(window_capacity: usize, min_samples: usize) -> Self {
        Self { window: SampleWindow::new(window_capacity), min_samples, latest: None }
    }

    /// Record a completed exchange and recompute the estimate.
    pub fn record(&mut self, sample: ClockSample) {
        self.window.push(sample);
        self.latest = self.window.estimate();
    }

    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.window.len()
    }

    /// Latest estimate, present as soon as one sample has been recorded.
    #[must_use]
    pub fn estimate(&self) -> Option<OffsetEstimate> {
        self.latest
    }

    /// Latest estimate, but only once `min_samples` exchanges have landed.
    #[must_use]
    pub fn trusted_estimate(&self) -> Option<OffsetEstimate> {
        if self.window.len() < self.min_samples {
            return None;
        }
        self.latest
    }
}

// =============================================================================
// TESTS
// =============================================================================
