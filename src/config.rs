//! Runtime configuration.
//!
//! DESIGN
//! ======
//! Every tunable the protocol depends on lives here as an explicit field
//! with a default, overridable through `SYNCROOM_*` environment variables.
//! In particular the scheduler's safety-margin lead time is a named
//! constant, not a magic number at a call site.

use std::time::Duration;

use crate::spatial::{GainFalloff, Position};

// =============================================================================
// CONFIG
// =============================================================================

#[derive(Debug, Clone)]
pub struct Config {
    /// TCP port for the coordinator. `PORT` env var.
    pub port: u16,

    /// Lead time added to "now" when stamping a scheduled action, so the
    /// slowest client still receives the broadcast before the deadline.
    pub schedule_lead_ms: f64,
    /// Period of the listening-source orbit tick while spatial mode is on.
    pub spatial_tick: Duration,
    /// Radians the listening source advances per orbit tick.
    pub orbit_step: f64,
    /// Orbit circle radius for the moving listening source.
    pub orbit_radius: f64,

    /// Gain bounds applied to every assignment.
    pub min_gain: f64,
    pub max_gain: f64,
    /// Falloff policy and its distance coefficient.
    pub falloff: GainFalloff,
    pub falloff_coefficient: f64,
    /// Seconds a client takes to ramp from one gain to the next.
    pub ramp_time_secs: f64,

    /// Side length of the coordinate space; positions are clamped into
    /// `[0, grid_size]` on each axis.
    pub grid_size: f64,
    /// Radius of the circular member layout around the grid center.
    pub layout_radius: f64,

    /// Clock sample window capacity (most-recent-N).
    pub ntp_window: usize,
    /// Number of back-to-back exchanges fired on connect.
    pub ntp_burst: usize,
    /// Spacing between burst exchanges.
    pub ntp_burst_spacing: Duration,
    /// Steady-state interval between exchanges after the burst.
    pub ntp_interval: Duration,
    /// Samples required before the offset estimate is trusted.
    pub ntp_min_samples: usize,

    /// Tolerance when deciding whether a playback stop was the natural end
    /// of the track.
    pub end_tolerance_secs: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            schedule_lead_ms: 500.0,
            spatial_tick: Duration::from_millis(100),
            orbit_step: 0.05,
            orbit_radius: 15.0,
            min_gain: 0.15,
            max_gain: 1.0,
            falloff: GainFalloff::Quadratic,
            falloff_coefficient: 0.001,
            ramp_time_secs: 0.5,
            grid_size: 100.0,
            layout_radius: 25.0,
            ntp_window: 20,
            ntp_burst: 8,
            ntp_burst_spacing: Duration::from_millis(30),
            ntp_interval: Duration::from_secs(10),
            ntp_min_samples: 5,
            end_tolerance_secs: 0.3,
        }
    }
}

impl Config {
    /// Build a config from the environment, falling back to defaults for
    /// anything unset or unparsable.
    #[must_use]
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            port: env_parse("PORT", d.port),
            schedule_lead_ms: env_parse("SYNCROOM_LEAD_MS", d.schedule_lead_ms),
            spatial_tick: Duration::from_millis(env_parse(
                "SYNCROOM_SPATIAL_TICK_MS",
                u64::try_from(d.spatial_tick.as_millis()).unwrap_or(100),
            )),
            orbit_step: env_parse("SYNCROOM_ORBIT_STEP", d.orbit_step),
            orbit_radius: env_parse("SYNCROOM_ORBIT_RADIUS", d.orbit_radius),
            min_gain: env_parse("SYNCROOM_MIN_GAIN", d.min_gain),
            max_gain: env_parse("SYNCROOM_MAX_GAIN", d.max_gain),
            falloff: std::env::var("SYNCROOM_FALLOFF")
                .map(|v| GainFalloff::from_name(&v))
                .unwrap_or(d.falloff),
            falloff_coefficient: env_parse("SYNCROOM_FALLOFF_COEFF", d.falloff_coefficient),
            ramp_time_secs: env_parse("SYNCROOM_RAMP_SECS", d.ramp_time_secs),
            grid_size: env_parse("SYNCROOM_GRID_SIZE", d.grid_size),
            layout_radius: env_parse("SYNCROOM_LAYOUT_RADIUS", d.layout_radius),
            ntp_window: env_parse("SYNCROOM_NTP_WINDOW", d.ntp_window),
            ntp_burst: env_parse("SYNCROOM_NTP_BURST", d.ntp_burst),
            ntp_burst_spacing: Duration::from_millis(env_parse(
                "SYNCROOM_NTP_BURST_SPACING_MS",
                u64::try_from(d.ntp_burst_spacing.as_millis()).unwrap_or(30),
            )),
            ntp_interval: Duration::from_secs(env_parse(
                "SYNCROOM_NTP_INTERVAL_SECS",
                d.ntp_interval.as_secs(),
            )),
            ntp_min_samples: env_parse("SYNCROOM_NTP_MIN_SAMPLES", d.ntp_min_samples),
            end_tolerance_secs: env_parse("SYNCROOM_END_TOLERANCE_SECS", d.end_tolerance_secs),
        }
    }

    /// Center of the grid; the circular layout and the orbit share it.
    #[must_use]
    pub fn origin(&self) -> Position {
        Position::new(self.grid_size / 2.0, self.grid_size / 2.0)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let c = Config::default();
        assert!((c.min_gain - 0.15).abs() < f64::EPSILON);
        assert!((c.max_gain - 1.0).abs() < f64::EPSILON);
        assert!((c.ramp_time_secs - 0.5).abs() < f64::EPSILON);
        assert!((c.schedule_lead_ms - 500.0).abs() < f64::EPSILON);
        assert_eq!(c.spatial_tick, Duration::from_millis(100));
        assert_eq!(c.falloff, GainFalloff::Quadratic);
    }

    #[test]
    fn origin_is_grid_center() {
        let c = Config::default();
        let o = c.origin();
        assert!((o.x - 50.0).abs() < f64::EPSILON);
        assert!((o.y - 50.0).abs() < f64::EPSILON);
    }
}
