//! Sync coordinator: applies queued structural changes at loop seams.
//!
//! Control surfaces enqueue [`PendingAction`]s instead of mutating tracks
//! directly. A single task watches the reference track (the first track
//! that is looping with a positive duration), sleeps until its next cycle
//! start and then drains the whole queue in a fixed order: the variation
//! toggle first, then loads, then clears. With no reference looping, the
//! queue is applied on the next poll.
//!
//! The coordinator wakes [`SEAM_LEAD`] ahead of the boundary and, when there
//! is work queued, holds the [`SeamGate`] across it. Loop generations enter
//! the gate before scheduling a cycle, so the epoch bump always lands before
//! the old generation can fire its cycle-start events. Actions queued inside
//! the lead window wait for the following boundary.

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::{watch, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::time::{sleep, sleep_until, Duration, Instant};

use crate::track::Track;

/// A structural mutation waiting for the next loop boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingAction {
    Load(usize),
    Clear(usize),
    ToggleVariation,
}

/// FIFO of pending actions, drained once per boundary
#[derive(Debug, Default)]
pub struct ActionQueue {
    actions: Mutex<Vec<PendingAction>>,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, action: PendingAction) {
        self.lock().push(action);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn pending(&self) -> Vec<PendingAction> {
        self.lock().clone()
    }

    /// Take every queued action in application order
    ///
    /// Toggles first, then loads, then clears. Enqueue order is kept within
    /// each group.
    pub fn drain_ordered(&self) -> Vec<PendingAction> {
        let drained: Vec<PendingAction> = std::mem::take(&mut *self.lock());

        let mut ordered = Vec::with_capacity(drained.len());
        ordered.extend(
            drained
                .iter()
                .filter(|a| matches!(a, PendingAction::ToggleVariation))
                .copied(),
        );
        ordered.extend(
            drained
                .iter()
                .filter(|a| matches!(a, PendingAction::Load(_)))
                .copied(),
        );
        ordered.extend(
            drained
                .iter()
                .filter(|a| matches!(a, PendingAction::Clear(_)))
                .copied(),
        );
        ordered
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<PendingAction>> {
        self.actions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// How far ahead of a boundary the coordinator claims the seam
pub const SEAM_LEAD: Duration = Duration::from_millis(2);

/// Orders boundary work between the coordinator and loop generations
///
/// Generations hold a shared guard while they schedule a cycle. The
/// coordinator holds the exclusive guard while it waits for the boundary and
/// applies the queue.
#[derive(Debug, Default)]
pub struct SeamGate {
    lock: RwLock<()>,
}

impl SeamGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared guard for scheduling one cycle
    pub async fn enter(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read().await
    }

    async fn hold(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.write().await
    }
}

/// Applies drained actions; implemented by the engine
pub trait ActionApplier: Send + Sync {
    fn apply_actions(&self, actions: Vec<PendingAction>);
}

/// First looping track with a positive loop duration
pub fn reference_track(tracks: &[Arc<Track>]) -> Option<&Arc<Track>> {
    tracks
        .iter()
        .find(|t| t.playback_active() && t.loop_duration() > 0.0)
}

/// Run the coordinator until `shutdown` turns true
pub async fn run(
    tracks: Vec<Arc<Track>>,
    queue: Arc<ActionQueue>,
    applier: Arc<dyn ActionApplier>,
    seam: Arc<SeamGate>,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    log::info!("[Coordinator] Started (poll {:?})", poll_interval);

    loop {
        if *shutdown.borrow() {
            break;
        }
        match next_wait(&tracks, Instant::now()) {
            Wait::Boundary(boundary) => {
                let wake = boundary.checked_sub(SEAM_LEAD).unwrap_or(boundary);
                tokio::select! {
                    _ = sleep_until(wake) => {}
                    _ = shutdown.changed() => break,
                }
                if queue.is_empty() {
                    tokio::select! {
                        _ = sleep_until(boundary) => {}
                        _ = shutdown.changed() => break,
                    }
                } else {
                    let gate = seam.hold().await;
                    tokio::select! {
                        _ = sleep_until(boundary) => {}
                        _ = shutdown.changed() => break,
                    }
                    let actions = queue.drain_ordered();
                    log::info!(
                        "[Coordinator] Applying {} action(s) at loop boundary",
                        actions.len()
                    );
                    applier.apply_actions(actions);
                    drop(gate);
                }
                // Let the new cycle start before scanning again
                tokio::task::yield_now().await;
            }
            Wait::Poll => {
                if !queue.is_empty() && reference_track(&tracks).is_none() {
                    let actions = queue.drain_ordered();
                    log::info!(
                        "[Coordinator] No loop playing, applying {} action(s) now",
                        actions.len()
                    );
                    applier.apply_actions(actions);
                }
                tokio::select! {
                    _ = sleep(poll_interval) => {}
                    _ = shutdown.changed() => break,
                }
            }
        }
    }

    log::info!("[Coordinator] Stopped");
}

enum Wait {
    Boundary(Instant),
    Poll,
}

fn next_wait(tracks: &[Arc<Track>], now: Instant) -> Wait {
    let Some(reference) = reference_track(tracks) else {
        return Wait::Poll;
    };
    let Some(boundary) = reference.next_boundary(now) else {
        return Wait::Poll;
    };

    let remaining = boundary.saturating_duration_since(now);
    let period = Duration::from_secs_f64(reference.loop_duration());
    if remaining > Duration::ZERO && remaining < period {
        Wait::Boundary(boundary)
    } else {
        // Reference is between generations; look again shortly
        Wait::Poll
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_orders_toggle_loads_clears() {
        let queue = ActionQueue::new();
        queue.push(PendingAction::Clear(2));
        queue.push(PendingAction::Load(1));
        queue.push(PendingAction::ToggleVariation);
        queue.push(PendingAction::Load(0));

        assert_eq!(
            queue.drain_ordered(),
            vec![
                PendingAction::ToggleVariation,
                PendingAction::Load(1),
                PendingAction::Load(0),
                PendingAction::Clear(2),
            ]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_each_action_is_drained_once() {
        let queue = ActionQueue::new();
        queue.push(PendingAction::ToggleVariation);
        queue.push(PendingAction::Clear(0));
        queue.push(PendingAction::ToggleVariation);

        assert_eq!(queue.drain_ordered().len(), 3);
        assert!(queue.drain_ordered().is_empty());
    }

    #[test]
    fn test_reference_is_first_looping_track() {
        use crate::pattern::DrumPattern;

        let tracks: Vec<Arc<Track>> = (0..3).map(|i| Arc::new(Track::new(i))).collect();
        assert!(reference_track(&tracks).is_none());

        tracks[2].replace_pattern(DrumPattern::new(vec![], 2.0));
        tracks[2].arm_playback();
        tracks[1].replace_pattern(DrumPattern::new(vec![], 1.0));

        // Track 1 has a loop but is not playing
        assert_eq!(reference_track(&tracks).map(|t| t.id()), Some(2));

        tracks[1].arm_playback();
        assert_eq!(reference_track(&tracks).map(|t| t.id()), Some(1));
    }

    struct ClearingApplier {
        tracks: Vec<Arc<Track>>,
        applied: Mutex<Vec<PendingAction>>,
    }

    impl ActionApplier for ClearingApplier {
        fn apply_actions(&self, actions: Vec<PendingAction>) {
            for action in &actions {
                if let PendingAction::Clear(index) = action {
                    self.tracks[*index].clear();
                }
            }
            self.applied.lock().unwrap().extend(actions);
        }
    }

    fn spawn_coordinator(
        tracks: Vec<Arc<Track>>,
        queue: Arc<ActionQueue>,
        seam: Arc<SeamGate>,
        shutdown: watch::Receiver<bool>,
    ) -> (Arc<ClearingApplier>, tokio::task::JoinHandle<()>) {
        let applier = Arc::new(ClearingApplier {
            tracks: tracks.clone(),
            applied: Mutex::new(Vec::new()),
        });
        let handle = tokio::spawn(run(
            tracks,
            queue,
            Arc::clone(&applier) as Arc<dyn ActionApplier>,
            seam,
            Duration::from_millis(10),
            shutdown,
        ));
        (applier, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_exits_when_shutdown_already_set() {
        let (tx, rx) = watch::channel(false);
        tx.send_replace(true);

        let tracks = vec![Arc::new(Track::new(0))];
        let (_applier, handle) = spawn_coordinator(
            tracks,
            Arc::new(ActionQueue::new()),
            Arc::new(SeamGate::new()),
            rx,
        );

        let finished = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(finished.is_ok());
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_exits_on_shutdown_while_waiting_for_boundary() {
        use crate::engine::scheduler::{MemorySink, Scheduler};
        use crate::pattern::DrumPattern;

        let (tx, rx) = watch::channel(false);
        let seam = Arc::new(SeamGate::new());
        let (pulses, _pulse_rx) = tokio::sync::broadcast::channel(16);
        let scheduler = Scheduler::new(
            tokio::runtime::Handle::current(),
            Arc::new(MemorySink::new()),
            pulses,
            Arc::clone(&seam),
        );
        let track = Arc::new(Track::new(0));
        track.replace_pattern(DrumPattern::new(vec![], 10.0));
        scheduler.start(&track).unwrap();

        let (_applier, handle) =
            spawn_coordinator(vec![track], Arc::new(ActionQueue::new()), seam, rx);
        sleep(Duration::from_millis(500)).await;
        tx.send_replace(true);

        let finished = tokio::time::timeout(Duration::from_millis(100), handle).await;
        assert!(finished.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_at_boundary_lands_before_next_cycle_fires() {
        use crate::analysis::classifier::DrumClass;
        use crate::engine::scheduler::{MemorySink, Scheduler};
        use crate::pattern::{DrumEvent, DrumPattern};

        let (_tx, rx) = watch::channel(false);
        let seam = Arc::new(SeamGate::new());
        let sink = Arc::new(MemorySink::new());
        let (pulses, _pulse_rx) = tokio::sync::broadcast::channel(16);
        let scheduler = Scheduler::new(
            tokio::runtime::Handle::current(),
            Arc::clone(&sink) as Arc<dyn crate::engine::scheduler::TriggerSink>,
            pulses,
            Arc::clone(&seam),
        );
        let track = Arc::new(Track::new(0));
        track.replace_pattern(DrumPattern::new(
            vec![DrumEvent::new(DrumClass::Kick, 0.0, 1.0)],
            1.0,
        ));
        scheduler.start(&track).unwrap();

        let queue = Arc::new(ActionQueue::new());
        let (applier, _handle) =
            spawn_coordinator(vec![Arc::clone(&track)], Arc::clone(&queue), seam, rx);

        sleep(Duration::from_millis(500)).await;
        queue.push(PendingAction::Clear(0));
        sleep(Duration::from_millis(1000)).await;

        // Only the first cycle's kick; the cycle starting at the seam is never scheduled
        assert_eq!(sink.count(), 1);
        assert_eq!(*applier.applied.lock().unwrap(), vec![PendingAction::Clear(0)]);
        assert!(!track.has_loop());
    }
}
