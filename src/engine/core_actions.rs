// Boundary actions and the recording watchdog for EngineInner

use std::sync::Arc;

use tokio::time::{sleep, Duration, Instant};

use super::{EngineInner, LooperEventKind};
use crate::engine::coordinator::{ActionApplier, PendingAction};
use crate::error::log_pattern_error;
use crate::pattern::{self, DrumPattern};
use crate::track::{SyncOutcome, Track};

impl ActionApplier for EngineInner {
    fn apply_actions(&self, actions: Vec<PendingAction>) {
        for action in actions {
            match action {
                PendingAction::ToggleVariation => self.apply_toggle(),
                PendingAction::Load(index) => {
                    if let Some(track) = self.tracks.get(index) {
                        self.apply_load(track);
                    }
                }
                PendingAction::Clear(index) => {
                    if let Some(track) = self.tracks.get(index) {
                        self.clear_track(track);
                    }
                }
            }
        }
    }
}

impl EngineInner {
    /// Swap every loop that has an alternate; playing tracks are re-armed
    fn apply_toggle(&self) {
        let mut swapped = Vec::new();
        for track in &self.tracks {
            let was_playing = track.playback_active();
            if !track.swap_variation() {
                continue;
            }
            if was_playing {
                self.scheduler.start(track);
            }
            swapped.push(track.id());
        }

        if swapped.is_empty() {
            log::info!("[LooperEngine] Variation toggle: no track has an alternate");
        } else {
            log::info!("[LooperEngine] Variation toggled on tracks {:?}", swapped);
        }
        self.publish(LooperEventKind::VariationToggled { tracks: swapped });
    }

    /// Replace `track` with its pattern file and start playing it
    ///
    /// A missing or unusable file leaves the track untouched.
    fn apply_load(&self, track: &Arc<Track>) {
        let path = self.config.looper.pattern_path(track.id());
        let loaded = match pattern::load_file(&path) {
            Ok(loaded) => loaded,
            Err(err) => {
                log_pattern_error(&err, "apply_load");
                log::warn!(
                    "[LooperEngine] Track {} keeps its current content",
                    track.id()
                );
                return;
            }
        };

        let other_loops = self
            .tracks
            .iter()
            .filter(|t| t.id() != track.id() && t.has_loop())
            .count();
        let outcome = self
            .master
            .adopt_loaded(track.id(), loaded.loop_duration, other_loops);
        let fitted = fit_pattern(loaded, outcome, self.master.epsilon());
        let events = fitted.len();
        let loop_secs = fitted.loop_duration;

        // Epoch bump, then data, then re-arm
        track.replace_pattern(fitted);
        self.scheduler.start(track);

        log::info!(
            "[LooperEngine] Track {} loaded {} events ({:.3}s) from {}",
            track.id(),
            events,
            loop_secs,
            path.display()
        );
        self.publish(LooperEventKind::PatternLoaded {
            track: track.id(),
            events,
            loop_secs,
        });
    }

    /// Force-stop `track`'s recording `session` once it runs too long
    pub(super) fn spawn_watchdog(self: &Arc<Self>, track: Arc<Track>, session: u64) {
        let inner = Arc::clone(self);
        let limit = Duration::from_secs_f64(self.config.looper.max_recording_secs);
        let poll = Duration::from_millis(self.config.looper.watchdog_poll_ms.max(1));

        self.runtime.spawn(async move {
            loop {
                sleep(poll).await;
                if track.session() != session || !track.is_recording() {
                    return;
                }
                let Some(elapsed) = track.recording_elapsed(Instant::now()) else {
                    return;
                };
                if elapsed >= limit {
                    log::warn!(
                        "[LooperEngine] Track {} recorded for {:.1}s, forcing stop",
                        track.id(),
                        elapsed.as_secs_f64()
                    );
                    inner.publish(LooperEventKind::WatchdogStopped { track: track.id() });
                    inner.finish_recording(&track);
                    return;
                }
            }
        });
    }
}

/// Scale a loaded pattern to the duration the master sync decided
fn fit_pattern(mut loaded: DrumPattern, outcome: SyncOutcome, epsilon: f64) -> DrumPattern {
    if let SyncOutcome::Fitted { raw, fit } = outcome {
        crate::track::rescale_events(&mut loaded.events, raw, fit.adjusted, epsilon);
        loaded.loop_duration = fit.adjusted;
        loaded.events.retain(|e| e.timestamp < fit.adjusted);
    }
    loaded
}
