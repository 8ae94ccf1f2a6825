// Cinder - Handheld Emulation Core
// Copyright (C) 2026 Cinder Team
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Delta-time event queue driving the execution loop. Time is counted in
//! emulated CPU cycles; each slot converts ticks of its own clock source.
//! The published `cycle_count_delta` is the signed budget the loop polls:
//! negative while cycles remain before the next event.

use crate::snapshot::{RegionReader, SnapshotWriter};
use crate::{CoreError, CoreResult};

pub const CLOCK_CPU_HZ: u64 = 90_000_000;
pub const CLOCK_AHB_HZ: u64 = 45_000_000;
pub const CLOCK_REF_HZ: u64 = 27_000_000;

/// Budget published when no slot is armed, so the loop still returns to the
/// scheduler at a bounded interval.
const IDLE_HORIZON: u64 = 1 << 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Clock {
    #[default]
    Cpu,
    Ahb,
    Ref27M,
}

impl Clock {
    pub fn rate(self) -> u64 {
        match self {
            Clock::Cpu => CLOCK_CPU_HZ,
            Clock::Ahb => CLOCK_AHB_HZ,
            Clock::Ref27M => CLOCK_REF_HZ,
        }
    }

    fn from_u8(v: u8) -> CoreResult<Self> {
        match v {
            0 => Ok(Clock::Cpu),
            1 => Ok(Clock::Ahb),
            2 => Ok(Clock::Ref27M),
            _ => Err(CoreError::Snapshot(format!("unknown clock source {v}"))),
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Clock::Cpu => 0,
            Clock::Ahb => 1,
            Clock::Ref27M => 2,
        }
    }
}

/// Named event slots. The slot name doubles as the callback identifier: the
/// execution loop dispatches on it when a slot fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Throttle = 0,
    Timers = 1,
    Display = 2,
    Watchdog = 3,
}

impl Slot {
    pub const COUNT: usize = 4;
    pub const ALL: [Slot; Slot::COUNT] =
        [Slot::Throttle, Slot::Timers, Slot::Display, Slot::Watchdog];

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct EventSlot {
    clock: Clock,
    /// Absolute fire time in CPU cycles, `None` while disarmed.
    fire_at: Option<u64>,
    /// Fire time of the most recent firing; periodic re-arms are relative
    /// to this so the cadence does not drift.
    last_fire: u64,
}

#[derive(Debug)]
pub struct Scheduler {
    /// Total emulated CPU cycles folded in so far.
    now: u64,
    /// Absolute time of the published next event.
    next_event: u64,
    /// Signed cycles-remaining counter: `now - next_event` at publish time,
    /// moved toward zero by `consume`.
    cycle_count_delta: i64,
    slots: [EventSlot; Slot::COUNT],
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn delta_between(now: u64, next: u64) -> i64 {
    if next >= now {
        -((next - now) as i64)
    } else {
        (now - next) as i64
    }
}

impl Scheduler {
    pub fn new() -> Self {
        let mut sched = Self {
            now: 0,
            next_event: 0,
            cycle_count_delta: 0,
            slots: [EventSlot::default(); Slot::COUNT],
        };
        sched.publish();
        sched
    }

    /// Clears every slot and restarts emulated time. The lifecycle must
    /// re-arm the throttle slot immediately afterwards.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn set_clock(&mut self, slot: Slot, clock: Clock) {
        self.slots[slot.index()].clock = clock;
    }

    fn to_cycles(&self, slot: Slot, ticks: u64) -> u64 {
        let rate = self.slots[slot.index()].clock.rate();
        ((ticks as u128 * CLOCK_CPU_HZ as u128) / rate as u128) as u64
    }

    /// Arms `slot` to fire after `ticks` of its clock source, measured from
    /// the current emulated time.
    pub fn schedule(&mut self, slot: Slot, ticks: u64) {
        self.fold_elapsed();
        let cycles = self.to_cycles(slot, ticks);
        let item = &mut self.slots[slot.index()];
        item.fire_at = Some(self.now + cycles);
        item.last_fire = self.now;
        self.publish();
    }

    /// Re-arms `slot` relative to its previous fire time. Used by periodic
    /// callbacks so their cadence is independent of dispatch latency.
    pub fn repeat(&mut self, slot: Slot, ticks: u64) {
        self.fold_elapsed();
        let cycles = self.to_cycles(slot, ticks);
        let item = &mut self.slots[slot.index()];
        item.fire_at = Some(item.last_fire + cycles);
        self.publish();
    }

    pub fn cancel(&mut self, slot: Slot) {
        self.fold_elapsed();
        self.slots[slot.index()].fire_at = None;
        self.publish();
    }

    /// Remaining cycles until `slot` fires, `None` while disarmed.
    pub fn armed(&self, slot: Slot) -> Option<u64> {
        self.slots[slot.index()]
            .fire_at
            .map(|at| at.saturating_sub(self.now))
    }

    /// Executor-side budget decrement: one instruction's cycle cost.
    pub fn consume(&mut self, cycles: u32) {
        self.cycle_count_delta += i64::from(cycles);
    }

    /// Signed cycles-remaining counter polled by the execution loop.
    pub fn cycles_remaining(&self) -> i64 {
        self.cycle_count_delta
    }

    /// Folds the budget consumed since the last publish into emulated time.
    /// Called once per outer loop iteration, before draining due slots.
    pub fn advance(&mut self) {
        self.fold_elapsed();
    }

    /// Disarms and returns one due slot at a time, earliest first; the
    /// caller dispatches its callback, which may re-arm it. Republishes the
    /// minimum delta once no due slot remains.
    pub fn next_due(&mut self) -> Option<Slot> {
        let mut best: Option<(Slot, u64)> = None;
        for slot in Slot::ALL {
            if let Some(at) = self.slots[slot.index()].fire_at {
                if at <= self.now && best.map_or(true, |(_, b)| at < b) {
                    best = Some((slot, at));
                }
            }
        }
        match best {
            Some((slot, at)) => {
                let item = &mut self.slots[slot.index()];
                item.fire_at = None;
                item.last_fire = at;
                Some(slot)
            }
            None => {
                self.publish();
                None
            }
        }
    }

    fn fold_elapsed(&mut self) {
        let executed = self.cycle_count_delta - delta_between(self.now, self.next_event);
        if executed > 0 {
            self.now += executed as u64;
        }
    }

    /// Recomputes the published minimum remaining delta across armed slots.
    pub fn publish(&mut self) {
        let next = self
            .slots
            .iter()
            .filter_map(|s| s.fire_at)
            .min()
            .unwrap_or(self.now + IDLE_HORIZON);
        self.next_event = next;
        self.cycle_count_delta = delta_between(self.now, next);
    }

    pub fn suspend(&self, w: &mut SnapshotWriter) {
        w.put_u32(Slot::COUNT as u32);
        w.put_u64(self.now);
        for item in &self.slots {
            w.put_u8(u8::from(item.fire_at.is_some()));
            w.put_u8(item.clock.as_u8());
            w.put_u64(item.fire_at.map_or(0, |at| at.saturating_sub(self.now)));
        }
    }

    pub fn resume(r: &mut RegionReader<'_>) -> CoreResult<Self> {
        let count = r.get_u32()?;
        if count != Slot::COUNT as u32 {
            return Err(CoreError::Snapshot(format!(
                "scheduler slot count mismatch: {count}"
            )));
        }
        let now = r.get_u64()?;
        let mut sched = Self::new();
        sched.now = now;
        for slot in Slot::ALL {
            let armed = r.get_u8()? != 0;
            let clock = Clock::from_u8(r.get_u8()?)?;
            let remaining = r.get_u64()?;
            let fire_at = if armed {
                Some(now.checked_add(remaining).ok_or_else(|| {
                    CoreError::Snapshot(format!(
                        "slot fire time overflows ({now} + {remaining})"
                    ))
                })?)
            } else {
                None
            };
            let item = &mut sched.slots[slot.index()];
            item.clock = clock;
            item.fire_at = fire_at;
            item.last_fire = now;
        }
        sched.publish();
        Ok(sched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fires every due slot and re-publishes, for tests that don't care
    /// about callback dispatch.
    fn drain(sched: &mut Scheduler) -> Vec<Slot> {
        sched.advance();
        let mut fired = Vec::new();
        while let Some(slot) = sched.next_due() {
            fired.push(slot);
        }
        fired
    }

    #[test]
    fn publishes_minimum_remaining_delta() {
        let mut sched = Scheduler::new();
        sched.schedule(Slot::Timers, 100);
        sched.schedule(Slot::Throttle, 50);
        sched.schedule(Slot::Watchdog, 200);
        assert_eq!(sched.cycles_remaining(), -50);
    }

    #[test]
    fn rearm_is_relative_to_elapsed_budget() {
        let mut sched = Scheduler::new();
        sched.schedule(Slot::Timers, 100);
        sched.schedule(Slot::Throttle, 50);
        sched.schedule(Slot::Watchdog, 200);

        sched.consume(50);
        sched.advance();
        assert_eq!(sched.next_due(), Some(Slot::Throttle));
        sched.repeat(Slot::Throttle, 50);
        assert_eq!(sched.next_due(), None);

        // Both the re-armed throttle and the 100-cycle slot are now 50
        // cycles out; the published minimum tracks the elapsed budget.
        assert_eq!(sched.cycles_remaining(), -50);
        assert_eq!(sched.armed(Slot::Throttle), Some(50));
        assert_eq!(sched.armed(Slot::Timers), Some(50));
        assert_eq!(sched.armed(Slot::Watchdog), Some(150));
    }

    #[test]
    fn fires_earliest_first() {
        let mut sched = Scheduler::new();
        sched.schedule(Slot::Watchdog, 10);
        sched.schedule(Slot::Timers, 5);
        sched.consume(20);
        assert_eq!(drain(&mut sched), vec![Slot::Timers, Slot::Watchdog]);
        assert!(sched.armed(Slot::Timers).is_none());
    }

    #[test]
    fn periodic_rearm_does_not_drift_on_overshoot() {
        let mut sched = Scheduler::new();
        sched.schedule(Slot::Throttle, 100);
        // The executor overshoots the budget by 30 cycles.
        sched.consume(130);
        sched.advance();
        assert_eq!(sched.next_due(), Some(Slot::Throttle));
        sched.repeat(Slot::Throttle, 100);
        assert_eq!(sched.next_due(), None);
        // Next fire is 100 after the nominal fire time, so only 70 remain.
        assert_eq!(sched.cycles_remaining(), -70);
    }

    #[test]
    fn cancel_disarms_and_republishes() {
        let mut sched = Scheduler::new();
        sched.schedule(Slot::Timers, 40);
        sched.schedule(Slot::Display, 80);
        sched.cancel(Slot::Timers);
        assert_eq!(sched.cycles_remaining(), -80);
        assert!(sched.armed(Slot::Timers).is_none());
    }

    #[test]
    fn clock_conversion_scales_reference_ticks() {
        let mut sched = Scheduler::new();
        sched.set_clock(Slot::Throttle, Clock::Ref27M);
        // 1/100 s of the 27 MHz reference clock is 900_000 CPU cycles.
        sched.schedule(Slot::Throttle, CLOCK_REF_HZ / 100);
        assert_eq!(sched.armed(Slot::Throttle), Some(900_000));
    }

    #[test]
    fn reset_clears_all_slots() {
        let mut sched = Scheduler::new();
        sched.schedule(Slot::Throttle, 10);
        sched.schedule(Slot::Timers, 20);
        sched.reset();
        for slot in Slot::ALL {
            assert!(sched.armed(slot).is_none());
        }
        assert_eq!(sched.cycles_remaining(), -(IDLE_HORIZON as i64));
    }

    #[test]
    fn idle_scheduler_still_bounds_the_budget() {
        let sched = Scheduler::new();
        assert_eq!(sched.cycles_remaining(), -(IDLE_HORIZON as i64));
    }

    #[test]
    fn resume_rejects_overflowing_fire_time() {
        use crate::snapshot::{Region, SnapshotImage, SnapshotWriter};
        use std::time::{SystemTime, UNIX_EPOCH};

        let mut w = SnapshotWriter::new(0, 0, None, None);
        w.begin(Region::Cpu);
        w.end(Region::Cpu);
        w.begin(Region::Sched);
        w.put_u32(Slot::COUNT as u32);
        w.put_u64(u64::MAX); // now
        for _ in Slot::ALL {
            w.put_u8(1);
            w.put_u8(0);
            w.put_u64(u64::MAX); // remaining
        }
        w.end(Region::Sched);
        w.begin(Region::Mem);
        w.end(Region::Mem);
        w.begin(Region::Storage);
        w.end(Region::Storage);

        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path = std::env::temp_dir().join(format!("cinder-sched-overflow-{nonce}.snap"));
        let mut file = std::fs::File::create(&path).unwrap();
        w.commit(&mut file).unwrap();
        drop(file);

        let image = SnapshotImage::load(&path).unwrap();
        let err = Scheduler::resume(&mut image.region(Region::Sched)).unwrap_err();
        assert!(err.to_string().contains("overflows"));
        let _ = std::fs::remove_file(&path);
    }
}
