//! Playback scheduler: re-triggers a track's events every loop cycle.
//!
//! One loop task runs per playback generation. At each cycle start it takes a
//! snapshot of the events and spawns one trigger task per event, all in a
//! single synchronous burst, then sleeps until the cycle ends. Trigger tasks
//! sleep until their due time and fire only if the track is still playing
//! under the epoch captured at arming time. There is no cancel path; a
//! structural mutation bumps the epoch and every pending trigger of the old
//! generation quietly drops itself when it wakes.
//!
//! Each cycle is scheduled inside the coordinator's [`SeamGate`], so work
//! applied at a boundary is visible to the generation that wakes there.

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::time::{sleep_until, Duration, Instant};

use crate::analysis::classifier::DrumClass;
use crate::engine::coordinator::SeamGate;
use crate::track::Track;

/// Receiver of honored triggers (the sample player)
///
/// `intensity` is in [0, 1]; mapping it to gain is up to the receiver.
pub trait TriggerSink: Send + Sync {
    fn trigger(&self, class: DrumClass, intensity: f32);
}

/// Sink that only logs, for headless runs
#[derive(Debug, Default)]
pub struct LogSink;

impl TriggerSink for LogSink {
    fn trigger(&self, class: DrumClass, intensity: f32) {
        log::debug!("[Scheduler] trigger {} ({:.2})", class, intensity);
    }
}

/// One trigger captured by [`MemorySink`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FiredTrigger {
    pub class: DrumClass,
    pub intensity: f32,
    pub at: Instant,
}

/// Sink that keeps every trigger in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    fired: Mutex<Vec<FiredTrigger>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything fired so far, in firing order
    pub fn fired(&self) -> Vec<FiredTrigger> {
        self.fired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self) -> usize {
        self.fired.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn clear(&self) {
        self.fired.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl TriggerSink for MemorySink {
    fn trigger(&self, class: DrumClass, intensity: f32) {
        self.fired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(FiredTrigger {
                class,
                intensity,
                at: Instant::now(),
            });
    }
}

/// Visualization pulse for one honored trigger
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TriggerPulse {
    pub track: usize,
    pub class: DrumClass,
    pub intensity: f32,
    pub epoch: u64,
}

/// Spawns playback generations on a tokio runtime
#[derive(Clone)]
pub struct Scheduler {
    runtime: Handle,
    sink: Arc<dyn TriggerSink>,
    pulses: broadcast::Sender<TriggerPulse>,
    seam: Arc<SeamGate>,
}

impl Scheduler {
    pub fn new(
        runtime: Handle,
        sink: Arc<dyn TriggerSink>,
        pulses: broadcast::Sender<TriggerPulse>,
        seam: Arc<SeamGate>,
    ) -> Self {
        Self {
            runtime,
            sink,
            pulses,
            seam,
        }
    }

    /// Arm playback on `track` and start a new generation
    ///
    /// The first cycle starts now. Any earlier generation of this track is
    /// invalidated by the epoch bump inside [`Track::arm_playback`]. Returns
    /// the generation's epoch, or None when the track holds no loop.
    pub fn start(&self, track: &Arc<Track>) -> Option<u64> {
        let epoch = track.arm_playback()?;
        log::info!(
            "[Scheduler] Track {} looping ({:.3}s, epoch {})",
            track.id(),
            track.loop_duration(),
            epoch
        );

        let track = Arc::clone(track);
        let sink = Arc::clone(&self.sink);
        let pulses = self.pulses.clone();
        let runtime = self.runtime.clone();
        let seam = Arc::clone(&self.seam);
        self.runtime
            .spawn(run_generation(runtime, track, epoch, sink, pulses, seam));
        Some(epoch)
    }

    /// Stop playback on `track`; pending triggers go stale
    pub fn stop(&self, track: &Track) {
        if track.playback_active() {
            log::info!("[Scheduler] Track {} stopped", track.id());
        }
        track.stop_playback();
    }
}

async fn run_generation(
    runtime: Handle,
    track: Arc<Track>,
    epoch: u64,
    sink: Arc<dyn TriggerSink>,
    pulses: broadcast::Sender<TriggerPulse>,
    seam: Arc<SeamGate>,
) {
    let mut loop_start = Instant::now();

    loop {
        let seam_guard = seam.enter().await;
        if !track.is_current(epoch) {
            break;
        }
        let pattern = track.pattern();
        if pattern.loop_duration <= 0.0 {
            break;
        }
        track.mark_cycle(epoch, loop_start, pattern.loop_duration);

        // Whole cycle is scheduled before any trigger can run
        for event in pattern.events {
            let due = loop_start + Duration::from_secs_f64(event.timestamp);
            let track = Arc::clone(&track);
            let sink = Arc::clone(&sink);
            let pulses = pulses.clone();
            runtime.spawn(async move {
                sleep_until(due).await;
                if !track.is_current(epoch) {
                    return;
                }
                sink.trigger(event.class, event.intensity);
                let _ = pulses.send(TriggerPulse {
                    track: track.id(),
                    class: event.class,
                    intensity: event.intensity,
                    epoch,
                });
            });
        }

        drop(seam_guard);

        // Next cycle starts at the scheduled seam, not at the wakeup time
        let loop_end = loop_start + Duration::from_secs_f64(pattern.loop_duration);
        sleep_until(loop_end).await;
        loop_start = loop_end;
    }

    log::debug!(
        "[Scheduler] Track {} generation {} finished",
        track.id(),
        epoch
    );
}
