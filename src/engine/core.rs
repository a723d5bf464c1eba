//! LooperEngine: control surface over tracks, scheduler and coordinator.
//!
//! A cheap-to-clone handle shared by the CLI, control-surface adapters and
//! tests. Track indices are validated here, once; everything below works on
//! `Arc<Track>` and cannot fail on an index.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use crate::analysis::classifier::{select_classifier, DrumClass, DrumClassifier};
use crate::analysis::spectrum::SpectrumAnalyzer;
use crate::analysis::{AnalysisFrame, DetectedHit, Transcriber};
use crate::audio::AnalysisInput;
use crate::config::AppConfig;
use crate::engine::coordinator::{self, ActionQueue, PendingAction, SeamGate};
use crate::engine::scheduler::{Scheduler, TriggerPulse, TriggerSink};
use crate::error::{log_pattern_error, LooperError};
use crate::managers::BroadcastChannelManager;
use crate::pattern::{self, DrumPattern};
use crate::track::{MasterReference, MasterSync, SyncOutcome, Track, TrackSnapshot};
use crate::variation::{self, VariationKind};

#[path = "core_actions.rs"]
mod core_actions;

/// Engine lifecycle event for observers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LooperEvent {
    /// Milliseconds since the engine was created
    pub timestamp_ms: u64,
    pub kind: LooperEventKind,
}

impl LooperEvent {
    pub fn new(kind: LooperEventKind) -> Self {
        Self {
            timestamp_ms: 0,
            kind,
        }
    }
}

/// Types of lifecycle events emitted by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LooperEventKind {
    RecordingStarted {
        track: usize,
    },
    RecordingStopped {
        track: usize,
        raw_secs: f64,
        loop_secs: f64,
        multiplier: Option<f64>,
    },
    RecordingDiscarded {
        track: usize,
        raw_secs: f64,
    },
    WatchdogStopped {
        track: usize,
    },
    PatternLoaded {
        track: usize,
        events: usize,
        loop_secs: f64,
    },
    PatternSaved {
        track: usize,
        path: String,
    },
    TrackCleared {
        track: usize,
    },
    VariationReady {
        track: usize,
    },
    VariationToggled {
        tracks: Vec<usize>,
    },
    MasterReleased,
}

pub(crate) struct EngineInner {
    config: AppConfig,
    tracks: Vec<Arc<Track>>,
    master: MasterSync,
    queue: Arc<ActionQueue>,
    scheduler: Scheduler,
    transcriber: Mutex<Transcriber>,
    broadcasts: BroadcastChannelManager,
    runtime: Handle,
    shutdown: watch::Sender<bool>,
    start_instant: Instant,
}

/// Handle to a running looper engine
#[derive(Clone)]
pub struct LooperEngine {
    inner: Arc<EngineInner>,
}

impl LooperEngine {
    /// Create an engine, picking the classifier from the configuration
    ///
    /// Must be called inside a Tokio runtime; the coordinator task is
    /// spawned immediately.
    pub fn new(config: AppConfig, sink: Arc<dyn TriggerSink>) -> Result<Self, LooperError> {
        let classifier = select_classifier(&config.classifier);
        Self::with_classifier(config, sink, classifier)
    }

    /// Create an engine with an explicit classifier strategy
    pub fn with_classifier(
        config: AppConfig,
        sink: Arc<dyn TriggerSink>,
        classifier: Box<dyn DrumClassifier>,
    ) -> Result<Self, LooperError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| LooperError::RuntimeUnavailable)?;

        let broadcasts = BroadcastChannelManager::new();
        let pulses = broadcasts.init_pulses();
        broadcasts.init_events();

        let seam = Arc::new(SeamGate::new());
        let (shutdown, _) = watch::channel(false);

        let tracks = (0..config.looper.track_count)
            .map(|id| Arc::new(Track::new(id)))
            .collect();

        let inner = Arc::new(EngineInner {
            transcriber: Mutex::new(Transcriber::new(&config, classifier)),
            master: MasterSync::new(config.looper.fit_epsilon_secs),
            queue: Arc::new(ActionQueue::new()),
            scheduler: Scheduler::new(runtime.clone(), sink, pulses, Arc::clone(&seam)),
            broadcasts,
            tracks,
            runtime,
            shutdown,
            start_instant: Instant::now(),
            config,
        });

        inner.runtime.spawn(coordinator::run(
            inner.tracks.clone(),
            Arc::clone(&inner.queue),
            Arc::clone(&inner) as Arc<dyn coordinator::ActionApplier>,
            seam,
            Duration::from_millis(inner.config.looper.coordinator_poll_ms),
            inner.shutdown.subscribe(),
        ));

        log::info!(
            "[LooperEngine] Started with {} tracks, classifier={}",
            inner.tracks.len(),
            inner.transcriber_guard().classifier_name()
        );

        Ok(Self { inner })
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    pub fn track_count(&self) -> usize {
        self.inner.tracks.len()
    }

    // ========================================================================
    // RECORDING
    // ========================================================================

    /// Clear `track` and start recording into it
    pub fn start_recording(&self, track: usize) -> Result<(), LooperError> {
        let track = self.inner.track(track)?;
        let session = {
            // Held so no frame is analyzed between reading the origin and opening the session
            let transcriber = self.inner.transcriber_guard();
            track.start_recording(Instant::now(), transcriber.stream_time())
        };
        self.inner.release_master_if_idle();
        log::info!("[LooperEngine] Track {} recording", track.id());
        self.inner
            .publish(LooperEventKind::RecordingStarted { track: track.id() });
        self.inner.spawn_watchdog(Arc::clone(track), session);
        Ok(())
    }

    /// Stop recording on `track`, fit the loop and start playing it
    ///
    /// Returns the raw recorded duration, or None when the track was not
    /// recording (a no-op).
    pub fn stop_recording(&self, track: usize) -> Result<Option<f64>, LooperError> {
        let track = self.inner.track(track)?;
        Ok(self.inner.finish_recording(track))
    }

    /// Append a hit to `track` at the current time
    ///
    /// Ignored (returns false) when the track is not recording.
    pub fn record_hit(
        &self,
        track: usize,
        class: DrumClass,
        intensity: f32,
    ) -> Result<bool, LooperError> {
        let track = self.inner.track(track)?;
        Ok(track.record_event(class, intensity, Instant::now()))
    }

    /// Feed one analysis frame
    ///
    /// A detected hit is appended to every track that is recording, stamped
    /// on the analysis stream clock rather than the time it was processed.
    pub fn on_frame(&self, frame: &AnalysisFrame) -> Option<DetectedHit> {
        let mut transcriber = self.inner.transcriber_guard();
        let hit = transcriber.process_frame(frame)?;
        for track in &self.inner.tracks {
            track.record_event_at(hit.class, hit.intensity, hit.time_secs);
        }
        Some(hit)
    }

    /// Spawn the analysis task that drains captured audio every hop
    pub fn spawn_analysis(&self, mut input: AnalysisInput) -> JoinHandle<()> {
        let engine = self.clone();
        let hop = Duration::from_secs_f64(self.inner.config.analysis.hop_secs());
        let mut analyzer = SpectrumAnalyzer::new(self.inner.config.analysis.window_size);
        let mut shutdown = self.inner.shutdown.subscribe();

        self.inner.runtime.spawn(async move {
            let mut ticker = tokio::time::interval(hop);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }
                input.drain(|samples| {
                    for frame in analyzer.push_samples(samples) {
                        engine.on_frame(&frame);
                    }
                });
            }
            log::debug!("[LooperEngine] Analysis task stopped");
        })
    }

    // ========================================================================
    // IMMEDIATE AND QUEUED MUTATIONS
    // ========================================================================

    /// Empty `track` now
    ///
    /// Returns false when the track was already empty.
    pub fn clear(&self, track: usize) -> Result<bool, LooperError> {
        let track = self.inner.track(track)?;
        Ok(self.inner.clear_track(track))
    }

    /// Reload `track` from its pattern file at the next loop boundary
    pub fn queue_load(&self, track: usize) -> Result<(), LooperError> {
        self.inner.track(track)?;
        self.inner.enqueue(PendingAction::Load(track));
        Ok(())
    }

    /// Clear `track` at the next loop boundary
    pub fn queue_clear(&self, track: usize) -> Result<(), LooperError> {
        self.inner.track(track)?;
        self.inner.enqueue(PendingAction::Clear(track));
        Ok(())
    }

    /// Swap every loop with an alternate at the next loop boundary
    pub fn queue_toggle_variation(&self) {
        self.inner.enqueue(PendingAction::ToggleVariation);
    }

    pub fn pending_actions(&self) -> Vec<PendingAction> {
        self.inner.queue.pending()
    }

    // ========================================================================
    // PERSISTENCE AND VARIATIONS
    // ========================================================================

    /// Write `track` to its pattern file
    ///
    /// Returns the path written, or None when the track holds no loop.
    pub fn save_track(&self, track: usize) -> Result<Option<PathBuf>, LooperError> {
        let track = self.inner.track(track)?;
        if !track.has_loop() {
            log::info!("[LooperEngine] Track {} has no loop to save", track.id());
            return Ok(None);
        }

        let path = self.inner.config.looper.pattern_path(track.id());
        pattern::save_file(&path, &track.pattern()).map_err(|err| {
            log_pattern_error(&err, "save_track");
            LooperError::Pattern(err)
        })?;
        self.inner.publish(LooperEventKind::PatternSaved {
            track: track.id(),
            path: path.display().to_string(),
        });
        Ok(Some(path))
    }

    /// Generate a variation of `track` into its alternate slot
    ///
    /// A seed makes the result reproducible. Returns false when the track
    /// holds no loop.
    pub fn generate_variation(
        &self,
        track: usize,
        kind: VariationKind,
        seed: Option<u64>,
    ) -> Result<bool, LooperError> {
        let track_ref = self.inner.track(track)?;
        if !track_ref.has_loop() {
            log::info!("[LooperEngine] Track {} has no loop to vary", track);
            return Ok(false);
        }
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let varied = variation::generate(&track_ref.pattern(), kind, &mut rng);
        self.set_variation(track, varied)
    }

    /// Store `pattern` as the alternate of `track`
    pub fn set_variation(&self, track: usize, pattern: DrumPattern) -> Result<bool, LooperError> {
        let track = self.inner.track(track)?;
        let stored = track.set_alternate(pattern);
        if stored {
            self.inner
                .publish(LooperEventKind::VariationReady { track: track.id() });
        }
        Ok(stored)
    }

    // ========================================================================
    // OBSERVATION
    // ========================================================================

    pub fn snapshot(&self) -> Vec<TrackSnapshot> {
        self.inner.tracks.iter().map(|t| t.snapshot()).collect()
    }

    pub fn track_pattern(&self, track: usize) -> Result<DrumPattern, LooperError> {
        Ok(self.inner.track(track)?.pattern())
    }

    pub fn master(&self) -> Option<MasterReference> {
        self.inner.master.reference()
    }

    pub fn subscribe_pulses(&self) -> broadcast::Receiver<TriggerPulse> {
        self.inner.broadcasts.init_pulses().subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<LooperEvent> {
        self.inner.broadcasts.init_events().subscribe()
    }

    /// Trigger pulses as a stream; gaps from a lagging consumer are skipped
    pub fn pulse_stream(&self) -> impl Stream<Item = TriggerPulse> + Send + 'static {
        BroadcastStream::new(self.subscribe_pulses()).filter_map(|result| result.ok())
    }

    /// Engine events as a stream; gaps from a lagging consumer are skipped
    pub fn event_stream(&self) -> impl Stream<Item = LooperEvent> + Send + 'static {
        BroadcastStream::new(self.subscribe_events()).filter_map(|result| result.ok())
    }

    /// Stop the coordinator and analysis tasks and silence every track
    pub fn shutdown(&self) {
        if self.inner.shutdown.send_replace(true) {
            return;
        }
        for track in &self.inner.tracks {
            self.inner.scheduler.stop(track);
        }
        log::info!("[LooperEngine] Shut down");
    }
}

impl EngineInner {
    fn track(&self, index: usize) -> Result<&Arc<Track>, LooperError> {
        self.tracks.get(index).ok_or(LooperError::TrackOutOfRange {
            index,
            track_count: self.tracks.len(),
        })
    }

    fn transcriber_guard(&self) -> std::sync::MutexGuard<'_, Transcriber> {
        self.transcriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn loops_remaining(&self) -> usize {
        self.tracks.iter().filter(|t| t.has_loop()).count()
    }

    fn release_master_if_idle(&self) {
        if self.master.release_if_idle(self.loops_remaining()) {
            self.publish(LooperEventKind::MasterReleased);
        }
    }

    fn enqueue(&self, action: PendingAction) {
        log::info!("[LooperEngine] Queued {:?} for next loop boundary", action);
        self.queue.push(action);
    }

    fn publish(&self, kind: LooperEventKind) {
        self.broadcasts.publish_event(LooperEvent {
            timestamp_ms: self.start_instant.elapsed().as_millis() as u64,
            kind,
        });
    }

    /// Close the recording on `track` and turn it into a playing loop
    pub(crate) fn finish_recording(&self, track: &Arc<Track>) -> Option<f64> {
        let Some(raw) = track.stop_recording(Instant::now()) else {
            log::info!(
                "[LooperEngine] Track {} is not recording, ignoring stop",
                track.id()
            );
            return None;
        };

        if raw < self.config.looper.min_loop_secs {
            log::warn!(
                "[LooperEngine] Track {}: {:.3}s is too short for a loop, discarding",
                track.id(),
                raw
            );
            track.discard_recording();
            self.release_master_if_idle();
            self.publish(LooperEventKind::RecordingDiscarded {
                track: track.id(),
                raw_secs: raw,
            });
            return Some(raw);
        }

        let outcome = self.master.sync_loop(track.id(), raw);
        track.commit_loop(outcome, self.master.epsilon());
        self.scheduler.start(track);

        let multiplier = match outcome {
            SyncOutcome::Master { .. } => None,
            SyncOutcome::Fitted { fit, .. } => Some(fit.multiplier),
        };
        self.publish(LooperEventKind::RecordingStopped {
            track: track.id(),
            raw_secs: raw,
            loop_secs: outcome.duration(),
            multiplier,
        });
        Some(raw)
    }

    pub(crate) fn clear_track(&self, track: &Arc<Track>) -> bool {
        if !track.clear() {
            log::info!("[LooperEngine] Track {} already empty", track.id());
            return false;
        }
        log::info!("[LooperEngine] Track {} cleared", track.id());
        self.publish(LooperEventKind::TrackCleared { track: track.id() });
        self.release_master_if_idle();
        true
    }
}
