//! Positions, gain falloff, and the circular member layout.
//!
//! DESIGN
//! ======
//! Gain is a pure function of client position, listening-source position,
//! and the configured falloff policy. The policy is a tagged variant with a
//! single signature so call sites never change when the formula does;
//! quadratic is the wired default. Layout is likewise pure: given a member
//! count it yields evenly spaced points on a fixed-radius circle, recomputed
//! in full on every membership change.

use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

// =============================================================================
// POSITION
// =============================================================================

/// A point in the room's bounded 2D coordinate space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    #[must_use]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other`.
    #[must_use]
    pub fn distance_to(&self, other: Position) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    /// Clamp both axes into `[0, grid_size]`.
    #[must_use]
    pub fn clamped(self, grid_size: f64) -> Self {
        Self { x: self.x.clamp(0.0, grid_size), y: self.y.clamp(0.0, grid_size) }
    }
}

// =============================================================================
// GAIN FALLOFF
// =============================================================================

/// Falloff policy mapping distance to gain. All variants share one
/// signature; the selection lives in configuration, not at call sites.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GainFalloff {
    /// `max_gain - coefficient * distance²`. The default.
    #[default]
    Quadratic,
    /// `max_gain - coefficient * distance`.
    Linear,
    /// `min_gain + (max_gain - min_gain) * e^(-coefficient * distance)`.
    Exponential,
}

impl GainFalloff {
    /// Gain for a client at `client` relative to the listening source at
    /// `source`. Always clamped into `[min_gain, max_gain]`.
    #[must_use]
    pub fn gain(
        self,
        client: Position,
        source: Position,
        min_gain: f64,
        max_gain: f64,
        coefficient: f64,
    ) -> f64 {
        let distance = client.distance_to(source);
        let raw = match self {
            Self::Quadratic => max_gain - coefficient * distance * distance,
            Self::Linear => max_gain - coefficient * distance,
            Self::Exponential => min_gain + (max_gain - min_gain) * (-coefficient * distance).exp(),
        };
        raw.clamp(min_gain, max_gain)
    }

    /// Parse a policy name from configuration. Unknown names fall back to
    /// the quadratic default.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "linear" => Self::Linear,
            "exponential" => Self::Exponential,
            _ => Self::Quadratic,
        }
    }
}

// =============================================================================
// CIRCULAR LAYOUT
// =============================================================================

/// Positions for `count` members, evenly spaced on a circle of `radius`
/// around `origin`: member `i` sits at angle `2π·i/count`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn circular_layout(count: usize, origin: Position, radius: f64) -> Vec<Position> {
    (0..count)
        .map(|i| {
            let angle = TAU * i as f64 / count as f64;
            Position { x: origin.x + radius * angle.cos(), y: origin.y + radius * angle.sin() }
        })
        .collect()
}

/// Point at `angle` radians on the orbit circle of `radius` around `origin`.
/// Used to advance the listening source along its path.
#[must_use]
pub fn orbit_position(origin: Position, radius: f64, angle: f64) -> Position {
    Position { x: origin.x + radius * angle.cos(), y: origin.y + radius * angle.sin() }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: f64 = 0.15;
    const MAX: f64 = 1.0;
    const COEFF: f64 = 0.001;

    #[test]
    fn quadratic_full_gain_at_zero_distance() {
        let p = Position::new(50.0, 50.0);
        let gain = GainFalloff::Quadratic.gain(p, p, MIN, MAX, COEFF);
        assert!((gain - MAX).abs() < f64::EPSILON);
    }

    #[test]
    fn quadratic_clamps_to_min_gain_at_distance() {
        // distance 100 -> raw = 1.0 - 0.001 * 10000 = -9.0, clamped to 0.15.
        let client = Position::new(0.0, 0.0);
        let source = Position::new(100.0, 0.0);
        let gain = GainFalloff::Quadratic.gain(client, source, MIN, MAX, COEFF);
        assert!((gain - MIN).abs() < f64::EPSILON);
    }

    #[test]
    fn all_variants_stay_within_bounds() {
        let source = Position::new(50.0, 50.0);
        for falloff in [GainFalloff::Quadratic, GainFalloff::Linear, GainFalloff::Exponential] {
            for d in [0.0, 1.0, 10.0, 70.0, 1000.0] {
                let client = Position::new(50.0 + d, 50.0);
                let gain = falloff.gain(client, source, MIN, MAX, COEFF);
                assert!((MIN..=MAX).contains(&gain), "{falloff:?} at {d}: {gain}");
            }
        }
    }

    #[test]
    fn exponential_decays_toward_min() {
        let source = Position::new(0.0, 0.0);
        let near = GainFalloff::Exponential.gain(Position::new(1.0, 0.0), source, MIN, MAX, 0.1);
        let far = GainFalloff::Exponential.gain(Position::new(80.0, 0.0), source, MIN, MAX, 0.1);
        assert!(near > far);
        assert!(far >= MIN);
    }

    #[test]
    fn layout_spacing_is_uniform() {
        let origin = Position::new(50.0, 50.0);
        let radius = 25.0;
        for count in [1usize, 2, 3, 5, 8] {
            let layout = circular_layout(count, origin, radius);
            assert_eq!(layout.len(), count);
            for (i, pos) in layout.iter().enumerate() {
                // Same radius for every member.
                assert!((pos.distance_to(origin) - radius).abs() < 1e-9);
                // Angle of member i is exactly 2π·i/count.
                #[allow(clippy::cast_precision_loss)]
                let expected = TAU * i as f64 / count as f64;
                let angle = (pos.y - origin.y).atan2(pos.x - origin.x).rem_euclid(TAU);
                assert!((angle - expected.rem_euclid(TAU)).abs() < 1e-9, "member {i} of {count}");
            }
        }
    }

    #[test]
    fn adjacent_members_separated_by_equal_angle() {
        let origin = Position::new(50.0, 50.0);
        let layout = circular_layout(6, origin, 25.0);
        let angles: Vec<f64> = layout
            .iter()
            .map(|p| (p.y - origin.y).atan2(p.x - origin.x).rem_euclid(TAU))
            .collect();
        for pair in angles.windows(2) {
            assert!(((pair[1] - pair[0]).rem_euclid(TAU) - TAU / 6.0).abs() < 1e-9);
        }
    }

    #[test]
    fn clamped_keeps_positions_on_grid() {
        let p = Position::new(-5.0, 120.0).clamped(100.0);
        assert!((p.x - 0.0).abs() < f64::EPSILON);
        assert!((p.y - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn falloff_from_name_defaults_to_quadratic() {
        assert_eq!(GainFalloff::from_name("linear"), GainFalloff::Linear);
        assert_eq!(GainFalloff::from_name("exponential"), GainFalloff::Exponential);
        assert_eq!(GainFalloff::from_name("banana"), GainFalloff::Quadratic);
    }
}
