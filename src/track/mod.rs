// Track module - per-track symbolic store
//
// A Track owns its event list, loop duration and loop flag behind a lock,
// plus two atomics read on every scheduled trigger:
//
// - epoch: generation counter. Every structural mutation bumps it before the
//   data changes, and every scheduled trigger compares its captured value at
//   fire time. A mismatch means the trigger belongs to stale data and is
//   dropped.
// - playback_active: whether the scheduler should fire at all.
//
// State machine: Idle -> Armed (has_loop, no playback) -> Looping -> Idle.
// Recording is orthogonal to it and always starts from Idle.

pub mod master;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tokio::time::{Duration, Instant};

use crate::analysis::classifier::DrumClass;
use crate::pattern::{DrumEvent, DrumPattern};

pub use master::{fit, rescale_events, FitResult, MasterReference, MasterSync, SyncOutcome};

/// Playback phase derived from the track flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Idle,
    Armed,
    Looping,
}

/// Read-only view of one track for visualization
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrackSnapshot {
    pub track: usize,
    pub has_loop: bool,
    pub is_recording: bool,
    pub playback_active: bool,
    pub variation_active: bool,
    pub event_count: usize,
    pub loop_duration: f64,
    pub epoch: u64,
}

/// Loop start of the cycle the scheduler is currently playing
#[derive(Debug, Clone, Copy)]
struct Cycle {
    epoch: u64,
    start: Instant,
    duration: f64,
}

#[derive(Debug, Default)]
struct TrackData {
    events: Vec<DrumEvent>,
    loop_duration: f64,
    has_loop: bool,
    alternate: Option<Vec<DrumEvent>>,
    variation_active: bool,
    recording_start: Option<Instant>,
    stream_origin: f64,
    cycle: Option<Cycle>,
}

impl TrackData {
    /// Append an event, pinning an earlier timestamp to the previous one
    fn push_monotonic(&mut self, class: DrumClass, timestamp: f64, intensity: f32) {
        let floor = self.events.last().map(|e| e.timestamp).unwrap_or(0.0);
        self.events.push(DrumEvent::new(class, timestamp.max(floor), intensity));
    }
}

pub struct Track {
    id: usize,
    data: RwLock<TrackData>,
    epoch: AtomicU64,
    playback_active: AtomicBool,
    recording: AtomicBool,
    session: AtomicU64,
}

impl Track {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            data: RwLock::new(TrackData::default()),
            epoch: AtomicU64::new(0),
            playback_active: AtomicBool::new(false),
            recording: AtomicBool::new(false),
            session: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    // ========================================================================
    // EPOCH GATE
    // ========================================================================

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Invalidate every trigger scheduled so far; returns the new epoch
    pub fn bump_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Whether a trigger captured under `epoch` may still fire
    pub fn is_current(&self, epoch: u64) -> bool {
        self.playback_active.load(Ordering::SeqCst) && self.epoch() == epoch
    }

    pub fn playback_active(&self) -> bool {
        self.playback_active.load(Ordering::SeqCst)
    }

    /// Enable playback under a fresh epoch
    ///
    /// Returns the epoch owned by the playback generation that the caller is
    /// about to start, or None when there is no loop to play.
    pub fn arm_playback(&self) -> Option<u64> {
        let data = self.read();
        if !data.has_loop || data.loop_duration <= 0.0 {
            return None;
        }
        let epoch = self.bump_epoch();
        self.playback_active.store(true, Ordering::SeqCst);
        Some(epoch)
    }

    /// Silence the track; pending triggers become stale
    pub fn stop_playback(&self) {
        self.bump_epoch();
        self.playback_active.store(false, Ordering::SeqCst);
        self.write().cycle = None;
    }

    pub fn playback_state(&self) -> PlaybackState {
        if self.playback_active() {
            PlaybackState::Looping
        } else if self.has_loop() {
            PlaybackState::Armed
        } else {
            PlaybackState::Idle
        }
    }

    // ========================================================================
    // RECORDING
    // ========================================================================

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    /// Identifier of the current (or last) recording session
    pub fn session(&self) -> u64 {
        self.session.load(Ordering::SeqCst)
    }

    /// Clear the track and open a recording session starting at `now`
    ///
    /// `stream_origin` is the analysis stream time (audio-rate seconds) at
    /// which the session opens; detected hits are stamped relative to it.
    /// Returns the session id, used by the watchdog to recognize its session.
    pub fn start_recording(&self, now: Instant, stream_origin: f64) -> u64 {
        self.bump_epoch();
        self.playback_active.store(false, Ordering::SeqCst);
        {
            let mut data = self.write();
            *data = TrackData {
                recording_start: Some(now),
                stream_origin,
                ..TrackData::default()
            };
        }
        self.recording.store(true, Ordering::SeqCst);
        self.session.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Append an event stamped `now - recording_start`
    ///
    /// Ignored when the track is not recording. Timestamps never go
    /// backwards; an earlier `now` is pinned to the previous event's time.
    pub fn record_event(&self, class: DrumClass, intensity: f32, now: Instant) -> bool {
        if !self.is_recording() {
            return false;
        }
        let mut data = self.write();
        let Some(start) = data.recording_start else {
            return false;
        };

        let elapsed = now.saturating_duration_since(start).as_secs_f64();
        data.push_monotonic(class, elapsed, intensity);
        true
    }

    /// Append a detected hit stamped `stream_time - stream_origin`
    ///
    /// `stream_time` comes from the analysis clock, so hits drained from one
    /// captured block keep their relative spacing. Ignored when the track is
    /// not recording.
    pub fn record_event_at(&self, class: DrumClass, intensity: f32, stream_time: f64) -> bool {
        if !self.is_recording() {
            return false;
        }
        let mut data = self.write();
        if data.recording_start.is_none() {
            return false;
        }
        let offset = (stream_time - data.stream_origin).max(0.0);
        data.push_monotonic(class, offset, intensity);
        true
    }

    /// Close the recording session
    ///
    /// Returns the raw duration, or None if the track was not recording.
    /// The events stay in place; the caller decides the loop duration.
    pub fn stop_recording(&self, now: Instant) -> Option<f64> {
        if !self.recording.swap(false, Ordering::SeqCst) {
            return None;
        }
        let start = self.write().recording_start.take()?;
        Some(now.saturating_duration_since(start).as_secs_f64())
    }

    /// Elapsed time of the open recording session
    pub fn recording_elapsed(&self, now: Instant) -> Option<Duration> {
        if !self.is_recording() {
            return None;
        }
        self.read()
            .recording_start
            .map(|start| now.saturating_duration_since(start))
    }

    /// Turn the recorded events into a loop with the duration `outcome` decided
    ///
    /// A fitted loop has its timestamps scaled by adjusted / raw when the
    /// change exceeds `epsilon`. Events at or past the loop end are dropped.
    pub fn commit_loop(&self, outcome: SyncOutcome, epsilon: f64) {
        let duration = outcome.duration();
        let mut data = self.write();
        if let SyncOutcome::Fitted { raw, fit } = outcome {
            rescale_events(&mut data.events, raw, fit.adjusted, epsilon);
        }
        data.events.retain(|e| e.timestamp < duration);
        data.loop_duration = duration;
        data.has_loop = true;
    }

    /// Drop the recorded events without producing a loop
    pub fn discard_recording(&self) {
        self.recording.store(false, Ordering::SeqCst);
        let mut data = self.write();
        *data = TrackData::default();
    }

    // ========================================================================
    // STRUCTURAL MUTATIONS
    // ========================================================================

    /// Replace the track content with `pattern`
    ///
    /// Bumps the epoch first and leaves playback disabled; the caller
    /// re-arms it afterwards. Events at or past the loop end are dropped.
    pub fn replace_pattern(&self, pattern: DrumPattern) {
        self.bump_epoch();
        self.playback_active.store(false, Ordering::SeqCst);
        let duration = pattern.loop_duration;
        let mut events = pattern.events;
        events.retain(|e| e.timestamp < duration);
        let mut data = self.write();
        *data = TrackData {
            has_loop: duration > 0.0,
            events,
            loop_duration: duration,
            ..TrackData::default()
        };
    }

    /// Empty the track
    ///
    /// Returns false and changes nothing when the track is already empty, so
    /// two clears in a row leave the same state as one.
    pub fn clear(&self) -> bool {
        if self.is_empty() {
            return false;
        }
        self.bump_epoch();
        self.playback_active.store(false, Ordering::SeqCst);
        self.recording.store(false, Ordering::SeqCst);
        *self.write() = TrackData::default();
        true
    }

    fn is_empty(&self) -> bool {
        let data = self.read();
        !self.is_recording()
            && !self.playback_active()
            && !data.has_loop
            && data.events.is_empty()
            && data.alternate.is_none()
    }

    /// Store an alternate event list for this loop
    ///
    /// Returns false when the track holds no loop.
    pub fn set_alternate(&self, pattern: DrumPattern) -> bool {
        let mut data = self.write();
        if !data.has_loop {
            return false;
        }
        let duration = data.loop_duration;
        let mut events = pattern.events;
        if pattern.loop_duration > 0.0 && (pattern.loop_duration - duration).abs() > f64::EPSILON
        {
            let ratio = duration / pattern.loop_duration;
            for event in events.iter_mut() {
                event.timestamp *= ratio;
            }
        }
        events.retain(|e| e.timestamp < duration);
        data.alternate = Some(events);
        true
    }

    pub fn has_alternate(&self) -> bool {
        self.read().alternate.is_some()
    }

    /// Swap the active events with the alternate set
    ///
    /// Bumps the epoch first. Playback is left as it was; the caller
    /// re-arms a playing track so the new generation starts cleanly.
    pub fn swap_variation(&self) -> bool {
        if !self.has_loop() || !self.has_alternate() {
            return false;
        }
        self.bump_epoch();
        let mut data = self.write();
        let Some(alternate) = data.alternate.take() else {
            return false;
        };
        let previous = std::mem::replace(&mut data.events, alternate);
        data.alternate = Some(previous);
        data.variation_active = !data.variation_active;
        true
    }

    // ========================================================================
    // READ ACCESS
    // ========================================================================

    pub fn has_loop(&self) -> bool {
        self.read().has_loop
    }

    pub fn loop_duration(&self) -> f64 {
        self.read().loop_duration
    }

    pub fn event_count(&self) -> usize {
        self.read().events.len()
    }

    /// Copy of the current content
    pub fn pattern(&self) -> DrumPattern {
        let data = self.read();
        DrumPattern {
            events: data.events.clone(),
            loop_duration: data.loop_duration,
        }
    }

    /// Copy of the alternate content, if any
    pub fn alternate_pattern(&self) -> Option<DrumPattern> {
        let data = self.read();
        data.alternate.as_ref().map(|events| DrumPattern {
            events: events.clone(),
            loop_duration: data.loop_duration,
        })
    }

    pub fn snapshot(&self) -> TrackSnapshot {
        let data = self.read();
        TrackSnapshot {
            track: self.id,
            has_loop: data.has_loop,
            is_recording: self.is_recording(),
            playback_active: self.playback_active(),
            variation_active: data.variation_active,
            event_count: data.events.len(),
            loop_duration: data.loop_duration,
            epoch: self.epoch(),
        }
    }

    // ========================================================================
    // CYCLE TRACKING
    // ========================================================================

    /// Record that the playback generation `epoch` started a cycle at `start`
    pub(crate) fn mark_cycle(&self, epoch: u64, start: Instant, duration: f64) {
        self.write().cycle = Some(Cycle {
            epoch,
            start,
            duration,
        });
    }

    /// Start of the next cycle of the live playback generation
    pub fn next_boundary(&self, now: Instant) -> Option<Instant> {
        if !self.playback_active() {
            return None;
        }
        let cycle = self.read().cycle?;
        if cycle.epoch != self.epoch() || cycle.duration <= 0.0 {
            return None;
        }

        let period = Duration::from_secs_f64(cycle.duration);
        let mut boundary = cycle.start + period;
        while boundary <= now {
            boundary += period;
        }
        Some(boundary)
    }

    fn read(&self) -> RwLockReadGuard<'_, TrackData> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TrackData> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn looped_track(duration: f64) -> Track {
        let track = Track::new(0);
        track.replace_pattern(DrumPattern::new(
            vec![
                DrumEvent::new(DrumClass::Kick, 0.0, 1.0),
                DrumEvent::new(DrumClass::Snare, duration / 2.0, 0.8),
            ],
            duration,
        ));
        track
    }

    #[test]
    fn test_record_event_only_while_recording() {
        let track = Track::new(0);
        let now = Instant::now();
        assert!(!track.record_event(DrumClass::Kick, 1.0, now));

        track.start_recording(now, 0.0);
        assert!(track.record_event(DrumClass::Kick, 1.0, now + Duration::from_millis(250)));
        assert_eq!(track.pattern().events[0].timestamp, 0.25);
    }

    #[test]
    fn test_recorded_timestamps_never_decrease() {
        let track = Track::new(0);
        let start = Instant::now();
        track.start_recording(start, 0.0);
        track.record_event(DrumClass::Kick, 1.0, start + Duration::from_millis(500));
        track.record_event(DrumClass::Hat, 1.0, start + Duration::from_millis(400));

        let events = track.pattern().events;
        assert!(events[1].timestamp >= events[0].timestamp);
    }

    #[test]
    fn test_stream_hits_are_relative_to_session_origin() {
        let track = Track::new(0);
        assert!(!track.record_event_at(DrumClass::Kick, 1.0, 5.0));

        track.start_recording(Instant::now(), 4.0);
        assert!(track.record_event_at(DrumClass::Kick, 1.0, 4.25));
        assert!(track.record_event_at(DrumClass::Snare, 0.8, 4.55));
        // Frame analyzed before the session opened
        assert!(track.record_event_at(DrumClass::Hat, 0.5, 3.9));

        let stamps: Vec<f64> = track.pattern().events.iter().map(|e| e.timestamp).collect();
        assert!((stamps[0] - 0.25).abs() < 1e-9);
        assert!((stamps[1] - 0.55).abs() < 1e-9);
        assert_eq!(stamps[2], stamps[1]);
    }

    #[test]
    fn test_replace_pattern_drops_events_past_loop_end() {
        let track = Track::new(0);
        track.replace_pattern(DrumPattern {
            events: vec![
                DrumEvent::new(DrumClass::Kick, 0.0, 1.0),
                DrumEvent::new(DrumClass::Snare, 0.9, 1.0),
            ],
            loop_duration: 0.5,
        });

        assert_eq!(track.event_count(), 1);
        assert_eq!(track.loop_duration(), 0.5);
    }

    #[test]
    fn test_start_recording_clears_previous_loop() {
        let track = looped_track(2.0);
        let epoch = track.epoch();

        track.start_recording(Instant::now(), 0.0);
        assert!(track.epoch() > epoch);
        assert!(!track.has_loop());
        assert_eq!(track.event_count(), 0);
        assert!(track.is_recording());
    }

    #[test]
    fn test_stop_recording_when_idle_is_noop() {
        let track = Track::new(0);
        assert_eq!(track.stop_recording(Instant::now()), None);
    }

    #[test]
    fn test_stop_recording_returns_raw_duration() {
        let track = Track::new(0);
        let start = Instant::now();
        track.start_recording(start, 0.0);
        let raw = track.stop_recording(start + Duration::from_millis(3200));
        assert_eq!(raw, Some(3.2));
        assert!(!track.is_recording());
    }

    #[test]
    fn test_commit_loop_rescales_events() {
        let track = Track::new(0);
        let start = Instant::now();
        track.start_recording(start, 0.0);
        track.record_event(DrumClass::Snare, 1.0, start + Duration::from_secs(1));
        let raw = track.stop_recording(start + Duration::from_millis(6500)).unwrap();

        track.commit_loop(
            SyncOutcome::Fitted {
                raw,
                fit: fit(raw, 3.2),
            },
            0.001,
        );
        assert!(track.has_loop());
        assert_eq!(track.loop_duration(), 6.4);
        assert!((track.pattern().events[0].timestamp - 0.984615).abs() < 1e-5);
    }

    #[test]
    fn test_arm_playback_requires_loop() {
        let track = Track::new(0);
        assert_eq!(track.arm_playback(), None);
        assert_eq!(track.playback_state(), PlaybackState::Idle);

        let track = looped_track(1.0);
        assert_eq!(track.playback_state(), PlaybackState::Armed);
        let epoch = track.arm_playback().unwrap();
        assert!(track.is_current(epoch));
        assert_eq!(track.playback_state(), PlaybackState::Looping);
    }

    #[test]
    fn test_replace_pattern_invalidates_epoch() {
        let track = looped_track(1.0);
        let epoch = track.arm_playback().unwrap();

        track.replace_pattern(DrumPattern::new(vec![], 2.0));
        assert!(!track.is_current(epoch));
        assert!(!track.playback_active());
    }

    #[test]
    fn test_clear_is_idempotent() {
        let track = looped_track(1.0);
        track.arm_playback();

        assert!(track.clear());
        let after_first = track.snapshot();
        assert!(!track.clear());
        assert_eq!(track.snapshot(), after_first);
        assert!(!after_first.has_loop);
        assert_eq!(after_first.event_count, 0);
    }

    #[test]
    fn test_swap_variation_toggles_and_bumps_epoch() {
        let track = looped_track(2.0);
        assert!(!track.swap_variation());

        let alternate = DrumPattern::new(vec![DrumEvent::new(DrumClass::Hat, 0.5, 0.5)], 2.0);
        assert!(track.set_alternate(alternate));
        let epoch = track.epoch();

        assert!(track.swap_variation());
        assert!(track.epoch() > epoch);
        assert_eq!(track.event_count(), 1);
        assert!(track.snapshot().variation_active);

        assert!(track.swap_variation());
        assert_eq!(track.event_count(), 2);
        assert!(!track.snapshot().variation_active);
    }

    #[test]
    fn test_alternate_is_fitted_to_loop_duration() {
        let track = looped_track(2.0);
        let alternate = DrumPattern::new(vec![DrumEvent::new(DrumClass::Hat, 2.0, 0.5)], 4.0);
        track.set_alternate(alternate);
        assert_eq!(track.alternate_pattern().unwrap().events[0].timestamp, 1.0);
    }

    #[test]
    fn test_next_boundary_follows_cycle() {
        let track = looped_track(1.0);
        let epoch = track.arm_playback().unwrap();
        let start = Instant::now();
        track.mark_cycle(epoch, start, 1.0);

        assert_eq!(
            track.next_boundary(start + Duration::from_millis(300)),
            Some(start + Duration::from_secs(1))
        );
        assert_eq!(
            track.next_boundary(start + Duration::from_millis(2300)),
            Some(start + Duration::from_secs(3))
        );

        track.bump_epoch();
        assert_eq!(track.next_boundary(start), None);
    }
}
