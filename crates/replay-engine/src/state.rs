use std::collections::BTreeMap;

use replay_protocol::{SensorHash, TimestampMicros};

/// Last-known value for one sensor, plus the dirty flag the tick loop uses
/// to decide what to emit. `dirty` implies `has_value`: a sensor is only
/// ever marked dirty when an event set its value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSlot {
    pub value: f64,
    pub has_value: bool,
    pub dirty: bool,
}

impl SensorSlot {
    const fn unset() -> Self {
        Self {
            value: 0.0,
            has_value: false,
            dirty: false,
        }
    }
}

/// The full reconstructed state of a sensor set at one point on the virtual
/// clock. Kept as a `BTreeMap` so iterating dirty sensors is already in the
/// hash-ascending order the tick loop's emission order requires.
#[derive(Debug, Clone, Default)]
pub struct EngineState {
    slots: BTreeMap<SensorHash, SensorSlot>,
}

impl EngineState {
    #[must_use]
    pub fn for_sensors(sensors: &[SensorHash]) -> Self {
        let slots = sensors.iter().map(|&s| (s, SensorSlot::unset())).collect();
        Self { slots }
    }

    pub fn apply(&mut self, sensor: SensorHash, value: f64) {
        if let Some(slot) = self.slots.get_mut(&sensor) {
            slot.value = value;
            slot.has_value = true;
            slot.dirty = true;
        }
    }

    /// Like [`Self::apply`] but leaves `dirty` clear — used by warmup and by
    /// snapshot/seek restoration, neither of which emits anything.
    pub fn seed(&mut self, sensor: SensorHash, value: f64) {
        if let Some(slot) = self.slots.get_mut(&sensor) {
            slot.value = value;
            slot.has_value = true;
        }
    }

    /// Sensors with unflushed updates, in ascending hash order.
    pub fn dirty_sensors(&self) -> Vec<SensorHash> {
        self.slots
            .iter()
            .filter(|(_, slot)| slot.dirty)
            .map(|(&hash, _)| hash)
            .collect()
    }

    pub fn clear_dirty(&mut self) {
        for slot in self.slots.values_mut() {
            slot.dirty = false;
        }
    }

    #[must_use]
    pub fn slot(&self, sensor: SensorHash) -> Option<SensorSlot> {
        self.slots.get(&sensor).copied()
    }

    /// All sensors currently holding a value, ascending by hash — used by
    /// `apply()` (full-state emit) and by the WS `snapshot` message.
    pub fn known_sensors(&self) -> impl Iterator<Item = (SensorHash, SensorSlot)> + '_ {
        self.slots
            .iter()
            .filter(|(_, slot)| slot.has_value)
            .map(|(&hash, &slot)| (hash, slot))
    }

    pub fn mark_all_dirty(&mut self) {
        for slot in self.slots.values_mut() {
            if slot.has_value {
                slot.dirty = true;
            }
        }
    }
}

/// A deep copy of engine state at one tick, kept for backward seeks.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    pub step_id: u64,
    pub step_ts: TimestampMicros,
    pub state: EngineState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_sets_value_has_value_and_dirty() {
        let mut state = EngineState::for_sensors(&[1, 2]);
        state.apply(1, 3.5);
        let slot = state.slot(1).unwrap();
        assert_eq!(slot.value, 3.5);
        assert!(slot.has_value);
        assert!(slot.dirty);
        assert!(!state.slot(2).unwrap().has_value);
    }

    #[test]
    fn seed_sets_value_and_has_value_but_not_dirty() {
        let mut state = EngineState::for_sensors(&[1]);
        state.seed(1, 2.5);
        let slot = state.slot(1).unwrap();
        assert_eq!(slot.value, 2.5);
        assert!(slot.has_value);
        assert!(!slot.dirty);
        assert!(state.dirty_sensors().is_empty());
    }

    #[test]
    fn apply_to_unknown_sensor_is_a_no_op() {
        let mut state = EngineState::for_sensors(&[1]);
        state.apply(999, 1.0);
        assert!(state.slot(999).is_none());
    }

    #[test]
    fn dirty_sensors_are_ascending_and_cleared_after_clear_dirty() {
        let mut state = EngineState::for_sensors(&[5, 1, 3]);
        state.apply(5, 1.0);
        state.apply(1, 2.0);
        assert_eq!(state.dirty_sensors(), vec![1, 5]);
        state.clear_dirty();
        assert!(state.dirty_sensors().is_empty());
    }

    #[test]
    fn mark_all_dirty_only_touches_known_sensors() {
        let mut state = EngineState::for_sensors(&[1, 2]);
        state.apply(1, 1.0);
        state.clear_dirty();
        state.mark_all_dirty();
        assert_eq!(state.dirty_sensors(), vec![1]);
    }
}
