//! Turns the noisy stream of raw slot positions into positions that have
//! actually settled.
//!
//! Two flavors are offered. [stable_position] is a one-shot query that polls
//! the device for a whole window and only accepts a position that never
//! changed. [StabilityFilter] is fed one frame per polling tick and fires once
//! for every dwell of `required_frames` consecutive frames within the
//! stability radius of the slot's baseline.
//!
//! Slots are identified by array index only. If the device hands a slot to a
//! different person, the filter carries the old person's history over to the
//! new one.

use crate::device_data::Position;

use std::time::Duration;

/// Default stability radius, in millimeters.
pub const DEFAULT_STABILITY_RADIUS: u16 = 200;

/// Default number of frames a position must hold before it fires.
pub const DEFAULT_REQUIRED_FRAMES: u32 = 3;

/// The number of polls in a one-shot window of `timeout` when polls are
/// `pacing` apart: one to take the reference, plus one per full interval.
pub fn window_iterations(timeout: Duration, pacing: Duration) -> usize {
    let pacing_ms = pacing.as_millis().max(1);
    (timeout.as_millis() / pacing_ms) as usize + 1
}

/// Polls with `poll` until a position holds unchanged for `iterations`
/// consecutive polls, giving up after `max_tries` windows.
///
/// A window ends early at the first poll that differs from the window's
/// first one, or that fails. A window whose first poll is absent or failed
/// counts as a failed try, since absence is not a place one can be stable at.
pub fn stable_position<F>(mut poll: F, iterations: usize, max_tries: usize) -> Option<Position>
where
    F: FnMut() -> Option<Position>,
{
    for _ in 0..max_tries {
        let reference = match poll() {
            Some(p) if !p.is_absent() => p,
            _ => continue,
        };
        let held = (1..iterations).all(|_| poll() == Some(reference));
        if held {
            return Some(reference);
        }
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SlotTracker {
    baseline: Position,
    stable_frames: u32,
}

/// Per-slot dwell detection across successive frames.
///
/// A slot is seeded the first time a frame includes it. From then on, every
/// frame within `radius` (per-axis) of the slot's baseline advances its
/// counter, and a frame that reaches `required_frames` emits the position and
/// resets the counter. A frame at or beyond `radius` resets the counter and
/// becomes the new baseline. An absent position always resets the slot.
#[derive(Debug, Clone)]
pub struct StabilityFilter {
    radius: u16,
    slots: Vec<SlotTracker>,
}

impl Default for StabilityFilter {
    fn default() -> Self {
        Self::new(DEFAULT_STABILITY_RADIUS)
    }
}

impl StabilityFilter {
    /// A filter with no slots seeded yet.
    pub fn new(radius: u16) -> Self {
        Self {
            radius,
            slots: Vec::new(),
        }
    }

    #[allow(missing_docs)]
    pub fn radius(&self) -> u16 {
        self.radius
    }

    /// Changes the radius. Slot history is kept.
    pub fn set_radius(&mut self, radius: u16) {
        self.radius = radius;
    }

    /// Whether any frame has been seen since creation or the last reset.
    pub fn is_seeded(&self) -> bool {
        !self.slots.is_empty()
    }

    /// Forgets every slot, so the next frame seeds again.
    pub fn reset(&mut self) {
        self.slots.clear();
    }

    /// Feeds one frame of raw positions, one per slot, and returns for each
    /// slot either the position that just became stable or `None`.
    ///
    /// Slots seen for the first time are seeded and come back as they are,
    /// except absent ones, which come back as `None`. Slots the frame does
    /// not include keep their state.
    pub fn update(&mut self, positions: &[Position], required_frames: u32) -> Vec<Option<Position>> {
        let required_frames = required_frames.max(1);
        positions
            .iter()
            .enumerate()
            .map(|(i, &position)| match self.slots.get_mut(i) {
                None => {
                    self.slots.push(SlotTracker {
                        baseline: position,
                        stable_frames: 0,
                    });
                    Some(position).filter(|p| !p.is_absent())
                }
                Some(slot) => Self::advance(slot, position, self.radius, required_frames),
            })
            .collect()
    }

    fn advance(
        slot: &mut SlotTracker,
        position: Position,
        radius: u16,
        required_frames: u32,
    ) -> Option<Position> {
        let moved = position.is_absent()
            || slot.baseline.is_absent()
            || position.chebyshev_distance(&slot.baseline) >= radius;

        if moved {
            slot.baseline = position;
            slot.stable_frames = 0;
            return None;
        }

        slot.stable_frames += 1;
        if slot.stable_frames >= required_frames {
            slot.stable_frames = 0;
            Some(position)
        } else {
            None
        }
    }
}
