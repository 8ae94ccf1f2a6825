// Cinder - Handheld Emulation Core
// Copyright (C) 2026 Cinder Team
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Real-time pacing. A 100 Hz scheduler slot measures the wall-clock vs
//! emulated-clock ratio and asks the loop to block for a calibrated delay
//! when emulation runs ahead of the original hardware. This is the only
//! component allowed to introduce deliberate wall-clock delay.

use std::time::{Duration, Instant};

use crate::sched::CLOCK_REF_HZ;

/// Throttle firing rate, in ticks of the 27 MHz reference clock.
pub const THROTTLE_HZ: u64 = 100;
pub const THROTTLE_PERIOD_TICKS: u64 = CLOCK_REF_HZ / THROTTLE_HZ;

/// Speed ratio above which pacing kicks in (1.0 == native speed).
const PACE_THRESHOLD: f64 = 0.7;
/// Wall-clock window over which the instantaneous speed is recomputed.
const SPEED_WINDOW_MICROS: u64 = 500_000;

#[derive(Debug)]
pub struct Throttle {
    intervals: u64,
    prev_intervals: u64,
    window_start: Instant,
    speed: f64,
    delay: Duration,
    pacing: bool,
    turbo: bool,
}

impl Throttle {
    pub fn new(turbo: bool) -> Self {
        Self {
            intervals: 0,
            prev_intervals: 0,
            window_start: Instant::now(),
            // Assume native speed until the first measurement window
            // closes, so pacing starts immediately on fast hosts.
            speed: 1.0,
            delay: Duration::from_millis(10),
            pacing: false,
            turbo,
        }
    }

    /// Pacing stays off until the lifecycle enables it at the end of
    /// `start`, so setup work is never throttled.
    pub fn enable_pacing(&mut self) {
        self.pacing = true;
    }

    pub fn set_turbo(&mut self, turbo: bool) {
        self.turbo = turbo;
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Accounts one 100 Hz firing. Returns the freshly measured speed ratio
    /// when the half-second window closed, for the front-end readout.
    pub fn on_tick(&mut self, now: Instant) -> Option<f64> {
        self.intervals += 1;
        let elapsed = now.duration_since(self.window_start).as_micros() as u64;
        if elapsed < SPEED_WINDOW_MICROS {
            return None;
        }
        self.speed = 10_000.0 * (self.intervals - self.prev_intervals) as f64 / elapsed as f64;
        self.prev_intervals = self.intervals;
        self.window_start = now;
        Some(self.speed)
    }

    /// The calibrated delay the loop should block for after this tick, if
    /// any. Turbo mode disables pacing regardless of measured speed.
    pub fn pace(&self) -> Option<Duration> {
        if self.pacing && !self.turbo && self.speed > PACE_THRESHOLD {
            Some(self.delay)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticked(throttle: &mut Throttle, ticks: u64, at: Instant) -> Option<f64> {
        let start = throttle.window_start;
        for _ in 0..ticks.saturating_sub(1) {
            let _ = throttle.on_tick(start);
        }
        throttle.on_tick(at)
    }

    #[test]
    fn native_rate_measures_ratio_one() {
        let mut throttle = Throttle::new(false);
        let start = throttle.window_start;
        // 50 interval increments over a 500_000 us window is the nominal
        // 100 Hz rate.
        let speed = ticked(&mut throttle, 50, start + Duration::from_micros(500_000));
        assert_eq!(speed, Some(1.0));
    }

    #[test]
    fn overspeed_measures_proportionally() {
        let mut throttle = Throttle::new(false);
        let start = throttle.window_start;
        // 10_000 increments over the same window: 200x native.
        let speed = ticked(&mut throttle, 10_000, start + Duration::from_micros(500_000));
        assert_eq!(speed, Some(200.0));
    }

    #[test]
    fn window_does_not_close_early() {
        let mut throttle = Throttle::new(false);
        let start = throttle.window_start;
        assert_eq!(throttle.on_tick(start + Duration::from_micros(499_999)), None);
        // Still the initial assumption until a window closes.
        assert_eq!(throttle.speed(), 1.0);
    }

    #[test]
    fn paces_only_when_enabled_and_fast() {
        let mut throttle = Throttle::new(false);
        assert_eq!(throttle.pace(), None); // pacing not yet enabled

        throttle.enable_pacing();
        assert!(throttle.pace().is_some()); // assumed speed 1.0 > 0.7

        throttle.speed = 0.5;
        assert_eq!(throttle.pace(), None);
    }

    #[test]
    fn turbo_disables_delay_at_any_speed() {
        let mut throttle = Throttle::new(true);
        throttle.enable_pacing();
        throttle.speed = 1_000.0;
        assert_eq!(throttle.pace(), None);

        throttle.set_turbo(false);
        assert!(throttle.pace().is_some());
    }
}
