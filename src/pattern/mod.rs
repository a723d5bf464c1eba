// Pattern module - symbolic drum data
//
// A DrumPattern is the portable form of one track's content: an ordered list
// of loop-relative DrumEvents plus the loop duration. The duration is carried
// explicitly because the silence after the last hit is part of the loop.

mod format;

pub use format::{load_file, parse, save_file, to_text};

use serde::{Deserialize, Serialize};

use crate::analysis::classifier::DrumClass;

/// One percussive hit inside a loop
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DrumEvent {
    pub class: DrumClass,
    /// Seconds from loop start
    pub timestamp: f64,
    /// Normalized loudness in [0, 1]
    pub intensity: f32,
}

impl DrumEvent {
    pub fn new(class: DrumClass, timestamp: f64, intensity: f32) -> Self {
        Self {
            class,
            timestamp,
            intensity: intensity.clamp(0.0, 1.0),
        }
    }
}

/// Events plus loop duration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DrumPattern {
    pub events: Vec<DrumEvent>,
    pub loop_duration: f64,
}

impl DrumPattern {
    pub fn new(events: Vec<DrumEvent>, loop_duration: f64) -> Self {
        let mut pattern = Self {
            events,
            loop_duration,
        };
        pattern.sort();
        pattern
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Restore the non-decreasing timestamp order (stable for equal times)
    pub fn sort(&mut self) {
        self.events.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
    }

    /// Gap from each event to the next, the last one wrapping to loop end
    pub fn delta_times(&self) -> Vec<f64> {
        self.events
            .iter()
            .enumerate()
            .map(|(i, event)| match self.events.get(i + 1) {
                Some(next) => next.timestamp - event.timestamp,
                None => self.loop_duration - event.timestamp,
            })
            .collect()
    }

    /// Number of events per class, in [`DrumClass::ALL`] order
    pub fn class_counts(&self) -> [usize; 3] {
        let mut counts = [0; 3];
        for event in &self.events {
            counts[event.class.index() as usize] += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_sorts_events() {
        let pattern = DrumPattern::new(
            vec![
                DrumEvent::new(DrumClass::Hat, 0.5, 0.4),
                DrumEvent::new(DrumClass::Kick, 0.0, 0.9),
                DrumEvent::new(DrumClass::Snare, 0.25, 0.7),
            ],
            1.0,
        );
        let times: Vec<f64> = pattern.events.iter().map(|e| e.timestamp).collect();
        assert_eq!(times, vec![0.0, 0.25, 0.5]);
    }

    #[test]
    fn test_delta_times_wrap_to_loop_end() {
        let pattern = DrumPattern::new(
            vec![
                DrumEvent::new(DrumClass::Kick, 0.0, 1.0),
                DrumEvent::new(DrumClass::Snare, 0.5, 1.0),
            ],
            2.0,
        );
        assert_eq!(pattern.delta_times(), vec![0.5, 1.5]);
        let total: f64 = pattern.delta_times().iter().sum::<f64>() + pattern.events[0].timestamp;
        assert_eq!(total, pattern.loop_duration);
    }

    #[test]
    fn test_intensity_is_clamped() {
        assert_eq!(DrumEvent::new(DrumClass::Kick, 0.0, 1.7).intensity, 1.0);
        assert_eq!(DrumEvent::new(DrumClass::Kick, 0.0, -0.2).intensity, 0.0);
    }

    #[test]
    fn test_class_counts() {
        let pattern = DrumPattern::new(
            vec![
                DrumEvent::new(DrumClass::Kick, 0.0, 1.0),
                DrumEvent::new(DrumClass::Hat, 0.1, 1.0),
                DrumEvent::new(DrumClass::Hat, 0.2, 1.0),
            ],
            1.0,
        );
        assert_eq!(pattern.class_counts(), [1, 0, 2]);
    }
}
