// MasterSync - rational loop-length fitting
//
// The first loop to finish recording becomes the master reference and keeps
// its raw duration. Every later loop is snapped to master × m, with m taken
// from SYNC_RATIOS and chosen to minimize |raw - master × m|. Ties go to the
// first candidate in the list. When the snap moves the duration by more than
// epsilon, the loop's event timestamps are scaled by adjusted / raw so the
// relative spacing survives.
//
// The reference is owned here and only changes through `sync_loop`,
// `adopt_loaded` and `release_if_idle`.

use std::sync::{Mutex, PoisonError};

use serde::Serialize;

use crate::pattern::DrumEvent;

/// Musically common loop-length ratios, in tie-break order
pub const SYNC_RATIOS: [f64; 10] = [0.25, 0.5, 0.75, 1.0, 1.5, 2.0, 3.0, 4.0, 6.0, 8.0];

/// Result of fitting one raw duration to the master
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FitResult {
    pub multiplier: f64,
    pub adjusted: f64,
}

/// Snap `raw` to the nearest `master × m`
pub fn fit(raw: f64, master: f64) -> FitResult {
    let mut multiplier = SYNC_RATIOS[0];
    let mut best_error = (raw - master * multiplier).abs();

    for &candidate in &SYNC_RATIOS[1..] {
        let error = (raw - master * candidate).abs();
        // Strict comparison keeps the first candidate on ties
        if error < best_error {
            best_error = error;
            multiplier = candidate;
        }
    }

    FitResult {
        multiplier,
        adjusted: master * multiplier,
    }
}

/// Scale event timestamps by `adjusted / raw`
///
/// Returns false (and leaves the events alone) when the change is within
/// `epsilon` seconds or `raw` is not positive.
pub fn rescale_events(events: &mut [DrumEvent], raw: f64, adjusted: f64, epsilon: f64) -> bool {
    if raw <= 0.0 || (adjusted - raw).abs() <= epsilon {
        return false;
    }
    let ratio = adjusted / raw;
    for event in events.iter_mut() {
        event.timestamp *= ratio;
    }
    true
}

/// The loop every other loop is fitted against
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MasterReference {
    pub track_id: usize,
    pub duration: f64,
}

/// How a new loop duration was decided
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncOutcome {
    /// The loop became (or redefined) the master and keeps its duration
    Master { duration: f64 },
    /// The loop was snapped to the existing master
    Fitted { raw: f64, fit: FitResult },
}

impl SyncOutcome {
    pub fn duration(&self) -> f64 {
        match self {
            SyncOutcome::Master { duration } => *duration,
            SyncOutcome::Fitted { fit, .. } => fit.adjusted,
        }
    }
}

/// Process-wide optional master reference
pub struct MasterSync {
    reference: Mutex<Option<MasterReference>>,
    epsilon: f64,
}

impl MasterSync {
    /// `epsilon` is the smallest duration change (seconds) that triggers rescaling
    pub fn new(epsilon: f64) -> Self {
        Self {
            reference: Mutex::new(None),
            epsilon,
        }
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn reference(&self) -> Option<MasterReference> {
        *self.lock()
    }

    /// Decide the duration of a loop that just finished recording
    pub fn sync_loop(&self, track_id: usize, raw: f64) -> SyncOutcome {
        let mut reference = self.lock();
        match *reference {
            None => {
                *reference = Some(MasterReference {
                    track_id,
                    duration: raw,
                });
                log::info!(
                    "[MasterSync] Track {} is master at {:.3}s",
                    track_id,
                    raw
                );
                SyncOutcome::Master { duration: raw }
            }
            Some(master) => {
                let fit = fit(raw, master.duration);
                log::info!(
                    "[MasterSync] Track {}: {:.3}s -> {:.3}s (master {:.3}s x {})",
                    track_id,
                    raw,
                    fit.adjusted,
                    master.duration,
                    fit.multiplier
                );
                SyncOutcome::Fitted { raw, fit }
            }
        }
    }

    /// Decide the duration of a loop loaded from disk
    ///
    /// `other_loops` counts the tracks other than `track_id` that hold a
    /// loop. With no master, or nothing else looping, the file's duration
    /// defines the master. Otherwise it is fitted to the current master, even
    /// on the master track itself, so every loop stays a ratio multiple.
    pub fn adopt_loaded(
        &self,
        track_id: usize,
        duration: f64,
        other_loops: usize,
    ) -> SyncOutcome {
        let mut reference = self.lock();
        match *reference {
            Some(master) if other_loops > 0 => {
                let fit = fit(duration, master.duration);
                log::info!(
                    "[MasterSync] Loaded track {}: {:.3}s -> {:.3}s (x {})",
                    track_id,
                    duration,
                    fit.adjusted,
                    fit.multiplier
                );
                SyncOutcome::Fitted {
                    raw: duration,
                    fit,
                }
            }
            _ => {
                *reference = Some(MasterReference { track_id, duration });
                log::info!(
                    "[MasterSync] Loaded track {} defines master at {:.3}s",
                    track_id,
                    duration
                );
                SyncOutcome::Master { duration }
            }
        }
    }

    /// Drop the reference once no track holds a loop
    ///
    /// Returns true if a reference was dropped.
    pub fn release_if_idle(&self, loops_remaining: usize) -> bool {
        if loops_remaining > 0 {
            return false;
        }
        let released = self.lock().take();
        if let Some(master) = released {
            log::info!(
                "[MasterSync] No loops left, releasing master (track {})",
                master.track_id
            );
        }
        released.is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<MasterReference>> {
        self.reference.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
