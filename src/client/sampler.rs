//! Clock sampler — the client end of the four-timestamp exchange.
//!
//! DESIGN
//! ======
//! The sampler pairs responses with pending requests by their `t0`; a
//! response with no matching request (lost, reordered, duplicated) is
//! ignored, and an unanswered request never blocks the next one. The
//! cadence is an initial burst to populate the window quickly, then one
//! exchange per steady-state interval, jittered so a fleet of clients
//! doesn't sample in lockstep. The cadence task ends on its own when the
//! outbound channel closes and is aborted on teardown, so no timer
//! outlives the connection.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::clock::{ClockSample, ClockSync, OffsetEstimate, now_ms};
use crate::config::Config;
use crate::message::ClientMessage;

/// Pending requests are bounded; on overflow the set is reset rather than
/// letting lost exchanges accumulate forever.
const MAX_PENDING: usize = 64;

// =============================================================================
// CLOCK SAMPLER
// =============================================================================

pub struct ClockSampler {
    sync: ClockSync,
    /// `t0` bit patterns of requests still awaiting a response.
    pending: HashSet<u64>,
}

impl ClockSampler {
    #[must_use]
    pub fn new(window_capacity: usize, min_samples: usize) -> Self {
        Self { sync: ClockSync::new(window_capacity, min_samples), pending: HashSet::new() }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.ntp_window, config.ntp_min_samples)
    }

    /// Begin an exchange: stamp `t0`, register it as pending, and produce
    /// the request to transmit. The current round-trip estimate rides
    /// along once one exists.
    pub fn begin_request(&mut self) -> ClientMessage {
        if self.pending.len() >= MAX_PENDING {
            self.pending.clear();
        }
        let t0 = now_ms();
        self.pending.insert(t0.to_bits());
        ClientMessage::NtpRequest { t0, rtt: self.sync.estimate().map(|e| e.average_round_trip) }
    }

    /// Complete an exchange from a response, stamping `t3` now.
    pub fn handle_response(&mut self, t0: f64, t1: f64, t2: f64) -> Option<OffsetEstimate> {
        self.complete(t0, t1, t2, now_ms())
    }

    /// Complete an exchange with an explicit `t3`. Responses that match no
    /// pending request are dropped.
    pub fn complete(&mut self, t0: f64, t1: f64, t2: f64, t3: f64) -> Option<OffsetEstimate> {
        if !self.pending.remove(&t0.to_bits()) {
            trace!(t0, "ntp response without matching request ignored");
            return None;
        }
        self.sync.record(ClockSample { t0, t1, t2, t3 });
        self.sync.estimate()
    }

    #[must_use]
    pub fn estimate(&self) -> Option<OffsetEstimate> {
        self.sync.estimate()
    }

    /// Estimate gated on the minimum sample count; `None` during startup.
    #[must_use]
    pub fn trusted_estimate(&self) -> Option<OffsetEstimate> {
        self.sync.trusted_estimate()
    }

    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.sync.sample_count()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

// =============================================================================
// CADENCE
// =============================================================================

/// Spawn the sampling cadence: `ntp_burst` requests spaced by
/// `ntp_burst_spacing`, then one per `ntp_interval` (plus up to 10%
/// jitter). The task stops when the outbound channel closes; abort the
/// returned handle to cancel it earlier.
pub fn spawn_sampling_task(
    sampler: Arc<Mutex<ClockSampler>>,
    outbound: mpsc::Sender<ClientMessage>,
    config: &Config,
) -> JoinHandle<()> {
    let burst = config.ntp_burst;
    let burst_spacing = config.ntp_burst_spacing;
    let interval = config.ntp_interval;

    tokio::spawn(async move {
        for _ in 0..burst {
            if !send_request(&sampler, &outbound).await {
                return;
            }
            tokio::time::sleep(burst_spacing).await;
        }

        loop {
            let jitter_ms = rand::rng().random_range(0..=interval.as_millis() as u64 / 10);
            tokio::time::sleep(interval + Duration::from_millis(jitter_ms)).await;
            if !send_request(&sampler, &outbound).await {
                return;
            }
        }
    })
}

/// Send one request if the channel is open. Returns false once the channel
/// has closed for good.
async fn send_request(
    sampler: &Arc<Mutex<ClockSampler>>,
    outbound: &mpsc::Sender<ClientMessage>,
) -> bool {
    if outbound.is_closed() {
        return false;
    }
    let msg = {
        let Ok(mut sampler) = sampler.lock() else {
            return false;
        };
        sampler.begin_request()
    };
    outbound.send(msg).await.is_ok()
}

#[cfg(test)]
#[path = "sampler_test.rs"]
mod tests;
