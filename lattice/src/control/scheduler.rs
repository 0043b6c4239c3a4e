//! Bounded-rate update delivery.
//!
//! A burst of submissions for one target collapses into a single apply per
//! flush interval, always using the most recent value. Earlier values in
//! the window are discarded, never queued; for a continuous parameter only
//! the latest control position matters. One scheduler owns one pending map
//! and one tick, rather than a timer per control, so the last-value-wins
//! contract lives in exactly one place.

use std::time::{Duration, Instant};

use indexmap::IndexMap;

use crate::control::params::ParameterRegistry;
use crate::core::prelude::*;
use crate::scene::Scene;

/// One flush per display frame, roughly.
pub const COALESCE_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Debug)]
pub struct UpdateScheduler {
    pending: IndexMap<String, f32>,
    interval: Duration,
    last_flush: Instant,
}

impl Default for UpdateScheduler {
    fn default() -> Self {
        Self::new(COALESCE_INTERVAL)
    }
}

impl UpdateScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            pending: IndexMap::new(),
            interval,
            last_flush: Instant::now(),
        }
    }

    /// Record a normalized value for `target`. Replaces any value already
    /// pending for the same target in this window.
    pub fn submit(&mut self, target: &str, unit_value: f32) {
        if let Some(slot) = self.pending.get_mut(target) {
            *slot = unit_value;
        } else {
            self.pending.insert(target.to_string(), unit_value);
        }
    }

    /// Drop any pending entry for `target`. Called on binding/band removal
    /// so a stale update can't fire after teardown.
    pub fn purge(&mut self, target: &str) {
        self.pending.shift_remove(target);
    }

    pub fn purge_all<'a>(&mut self, targets: impl IntoIterator<Item = &'a str>) {
        for target in targets {
            self.purge(target);
        }
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Whether a flush interval has elapsed. Advances the interval clock
    /// when it has, so callers can drive this from any loop cadence.
    pub fn due(&mut self, now: Instant) -> bool {
        if now.duration_since(self.last_flush) >= self.interval {
            self.last_flush = now;
            true
        } else {
            false
        }
    }

    /// Apply every pending update through the normalization layer, exactly
    /// once per target. A target removed between submit and flush is a
    /// logged skip, never an error; the race at the cancellation boundary
    /// is tolerated by design.
    pub fn flush(
        &mut self,
        registry: &mut ParameterRegistry,
        scene: &mut dyn Scene,
    ) -> usize {
        let mut applied = 0;
        for (target, unit_value) in std::mem::take(&mut self.pending) {
            match registry.apply_unit(&target, unit_value, scene) {
                Ok(_) => applied += 1,
                Err(e) => warn!("Skipping update for '{}': {}", target, e),
            }
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::RecordingScene;

    #[test]
    fn coalesces_to_the_last_value() {
        let mut scheduler = UpdateScheduler::default();
        let mut registry = ParameterRegistry::with_defaults();
        let mut scene = RecordingScene::default();

        scheduler.submit("light_intensity", 0.1);
        scheduler.submit("light_intensity", 0.4);
        scheduler.submit("light_intensity", 0.9);

        let applied = scheduler.flush(&mut registry, &mut scene);
        assert_eq!(applied, 1);
        assert_eq!(scene.lighting_calls, 1);
        assert_eq!(registry.get("light_intensity"), Some(9.0));
        assert_eq!(scheduler.pending_len(), 0);
    }

    #[test]
    fn distinct_targets_each_apply_once() {
        let mut scheduler = UpdateScheduler::default();
        let mut registry = ParameterRegistry::with_defaults();
        let mut scene = RecordingScene::default();

        scheduler.submit("cell_size", 0.5);
        scheduler.submit("bloom_strength", 0.25);
        scheduler.submit("cell_size", 1.0);

        let applied = scheduler.flush(&mut registry, &mut scene);
        assert_eq!(applied, 2);
        assert_eq!(scene.cell_size_calls, 1);
        assert_eq!(scene.post_processing_calls, 1);
        assert_eq!(registry.get("cell_size"), Some(4.0));
    }

    #[test]
    fn purge_prevents_a_late_apply() {
        let mut scheduler = UpdateScheduler::default();
        let mut registry = ParameterRegistry::with_defaults();
        let mut scene = RecordingScene::default();

        scheduler.submit("cell_size", 0.5);
        scheduler.purge("cell_size");

        assert_eq!(scheduler.flush(&mut registry, &mut scene), 0);
        assert_eq!(scene.total_calls(), 0);
    }

    #[test]
    fn unknown_target_is_a_skip_not_a_failure() {
        let mut scheduler = UpdateScheduler::default();
        let mut registry = ParameterRegistry::with_defaults();
        let mut scene = RecordingScene::default();

        scheduler.submit("gone", 0.5);
        scheduler.submit("cell_size", 0.5);

        assert_eq!(scheduler.flush(&mut registry, &mut scene), 1);
        assert_eq!(scene.cell_size_calls, 1);
    }

    #[test]
    fn due_advances_on_interval_boundaries() {
        let mut scheduler = UpdateScheduler::new(Duration::from_millis(16));
        let start = Instant::now();
        // Rebase the clock so the test is deterministic
        scheduler.last_flush = start;

        assert!(!scheduler.due(start + Duration::from_millis(5)));
        assert!(scheduler.due(start + Duration::from_millis(16)));
        assert!(!scheduler.due(start + Duration::from_millis(17)));
    }
}
