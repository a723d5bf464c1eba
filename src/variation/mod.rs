// Variation module - algorithmic rewrites of a recorded pattern
//
// Every generator keeps the loop duration, returns events sorted by time and
// keeps timestamps inside [0, loop_duration). Randomness comes from the
// caller's Rng so a seeded StdRng reproduces the same variation.

use std::fmt;
use std::str::FromStr;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::analysis::classifier::DrumClass;
use crate::pattern::{DrumEvent, DrumPattern};

/// Timestamps are kept this far before the loop end
const END_GUARD_SECS: f64 = 0.01;

/// Lowest intensity a rewritten hit can end up with
const MIN_INTENSITY: f32 = 0.1;

/// Available variation algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariationKind {
    /// Small timing and intensity jitter on every hit
    Humanize,
    /// Random class swaps, dropped hits and ghost notes
    Mutate,
    /// Hat fills in long gaps
    Densify,
    /// Drop hits, always keeping the first kick
    Simplify,
    /// Rotate the pattern by one or two sixteenths
    Shift,
    /// Tight jitter plus accents on downbeat kicks and backbeat snares
    GroovePreserve,
}

impl VariationKind {
    pub const ALL: [VariationKind; 6] = [
        VariationKind::Humanize,
        VariationKind::Mutate,
        VariationKind::Densify,
        VariationKind::Simplify,
        VariationKind::Shift,
        VariationKind::GroovePreserve,
    ];

    pub fn name(self) -> &'static str {
        match self {
            VariationKind::Humanize => "humanize",
            VariationKind::Mutate => "mutate",
            VariationKind::Densify => "densify",
            VariationKind::Simplify => "simplify",
            VariationKind::Shift => "shift",
            VariationKind::GroovePreserve => "groove_preserve",
        }
    }
}

impl fmt::Display for VariationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for VariationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        VariationKind::ALL
            .into_iter()
            .find(|kind| kind.name() == wanted)
            .ok_or_else(|| format!("unknown variation '{}'", s))
    }
}

/// Produce a variation of `pattern`
pub fn generate<R: Rng>(
    pattern: &DrumPattern,
    kind: VariationKind,
    rng: &mut R,
) -> DrumPattern {
    if pattern.is_empty() || pattern.loop_duration <= 0.0 {
        return pattern.clone();
    }

    let events = match kind {
        VariationKind::Humanize => humanize(pattern, rng),
        VariationKind::Mutate => mutate(pattern, rng),
        VariationKind::Densify => densify(pattern, rng),
        VariationKind::Simplify => simplify(pattern, rng),
        VariationKind::Shift => shift(pattern, rng),
        VariationKind::GroovePreserve => groove_preserve(pattern, rng),
    };

    let result = DrumPattern::new(events, pattern.loop_duration);
    log::debug!(
        "[Variation] {}: {} -> {} events",
        kind,
        pattern.len(),
        result.len()
    );
    result
}

/// Uniform jitter in [-spread, spread]
fn jitter<R: Rng>(rng: &mut R, spread: f64) -> f64 {
    if spread <= 0.0 {
        return 0.0;
    }
    rng.gen_range(-spread..=spread)
}

fn clamp_time(timestamp: f64, loop_duration: f64) -> f64 {
    let upper = (loop_duration - END_GUARD_SECS).max(0.0);
    timestamp.clamp(0.0, upper)
}

fn clamp_intensity(intensity: f32) -> f32 {
    intensity.clamp(MIN_INTENSITY, 1.0)
}

fn humanize<R: Rng>(pattern: &DrumPattern, rng: &mut R) -> Vec<DrumEvent> {
    const TIMING: f64 = 0.02;
    const INTENSITY: f64 = 0.1;

    pattern
        .events
        .iter()
        .map(|event| DrumEvent {
            class: event.class,
            timestamp: clamp_time(
                event.timestamp + jitter(rng, TIMING / 2.0),
                pattern.loop_duration,
            ),
            intensity: clamp_intensity(event.intensity + jitter(rng, INTENSITY / 2.0) as f32),
        })
        .collect()
}

fn mutate<R: Rng>(pattern: &DrumPattern, rng: &mut R) -> Vec<DrumEvent> {
    const SWAP: f64 = 0.2;
    const ADD: f64 = 0.1;
    const REMOVE: f64 = 0.1;

    let mut events = Vec::with_capacity(pattern.len());
    for event in &pattern.events {
        if rng.gen_bool(REMOVE) {
            continue;
        }

        let mut kept = *event;
        if rng.gen_bool(SWAP) {
            let others: Vec<DrumClass> = DrumClass::ALL
                .into_iter()
                .filter(|c| *c != event.class)
                .collect();
            if let Some(class) = others.choose(rng) {
                kept.class = *class;
            }
        }
        events.push(kept);

        if rng.gen_bool(ADD) {
            let ghost_time = event.timestamp + rng.gen_range(0.05f64..0.15);
            if ghost_time < pattern.loop_duration {
                let class = *DrumClass::ALL.choose(rng).unwrap_or(&DrumClass::Hat);
                events.push(DrumEvent {
                    class,
                    timestamp: clamp_time(ghost_time, pattern.loop_duration),
                    intensity: clamp_intensity(event.intensity * rng.gen_range(0.3f32..0.6)),
                });
            }
        }
    }
    events
}

fn densify<R: Rng>(pattern: &DrumPattern, rng: &mut R) -> Vec<DrumEvent> {
    const FILL: f64 = 0.3;
    const MIN_GAP: f64 = 0.2;

    let mut events = pattern.events.clone();
    for pair in pattern.events.windows(2) {
        let gap = pair[1].timestamp - pair[0].timestamp;
        if gap <= MIN_GAP || !rng.gen_bool(FILL) {
            continue;
        }

        let max_fills = ((gap / 0.1) as usize).clamp(1, 3);
        let fills = rng.gen_range(1..=max_fills);
        for j in 0..fills {
            events.push(DrumEvent {
                class: DrumClass::Hat,
                timestamp: pair[0].timestamp + gap * (j + 1) as f64 / (fills + 1) as f64,
                intensity: rng.gen_range(0.3..0.6),
            });
        }
    }
    events
}

fn simplify<R: Rng>(pattern: &DrumPattern, rng: &mut R) -> Vec<DrumEvent> {
    const KEEP: f64 = 0.6;

    let first_kick = pattern
        .events
        .iter()
        .position(|e| e.class == DrumClass::Kick);

    pattern
        .events
        .iter()
        .enumerate()
        .filter(|(i, _)| Some(*i) == first_kick || rng.gen_bool(KEEP))
        .map(|(_, e)| *e)
        .collect()
}

fn shift<R: Rng>(pattern: &DrumPattern, rng: &mut R) -> Vec<DrumEvent> {
    let sixteenth = pattern.loop_duration / 16.0;
    let steps = *[-2.0, -1.0, 1.0, 2.0].choose(rng).unwrap_or(&1.0);
    let amount = steps * sixteenth;

    pattern
        .events
        .iter()
        .map(|event| DrumEvent {
            timestamp: (event.timestamp + amount).rem_euclid(pattern.loop_duration),
            ..*event
        })
        .collect()
}

fn groove_preserve<R: Rng>(pattern: &DrumPattern, rng: &mut R) -> Vec<DrumEvent> {
    const TIMING: f64 = 0.015;
    const INTENSITY: f64 = 0.08;
    const ACCENT: f64 = 0.1;

    let beat = pattern.loop_duration / 4.0;
    let half_beat = beat / 2.0;

    pattern
        .events
        .iter()
        .map(|event| {
            // Kicks stay tighter to the grid than snares and hats
            let spread = if event.class == DrumClass::Kick {
                TIMING / 3.0
            } else {
                TIMING / 2.0
            };
            let timestamp = clamp_time(event.timestamp + jitter(rng, spread), pattern.loop_duration);

            let position = timestamp.rem_euclid(beat);
            let downbeat = position < beat * 0.1;
            let backbeat = (position - half_beat).abs() < beat * 0.1;

            let mut shift = jitter(rng, INTENSITY / 2.0);
            if downbeat && event.class == DrumClass::Kick {
                shift += ACCENT * rng.gen_range(0.5f64..1.0);
            } else if backbeat && event.class == DrumClass::Snare {
                shift += ACCENT * rng.gen_range(0.3f64..0.8);
            }

            DrumEvent {
                class: event.class,
                timestamp,
                intensity: clamp_intensity(event.intensity + shift as f32),
            }
        })
        .collect()
}
