// BroadcastChannelManager: Centralized tokio broadcast channel management
// Single Responsibility: Broadcast channel lifecycle and subscription

use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

use crate::engine::core::LooperEvent;
use crate::engine::scheduler::TriggerPulse;

/// Manages the engine's tokio broadcast channels
///
/// # Channel Types
/// - Pulses: one message per honored trigger, for visualization
/// - Events: engine lifecycle (recording, loop commits, swaps, clears)
///
/// Senders are created lazily; publishing before initialization is a no-op.
pub struct BroadcastChannelManager {
    pulses: Arc<Mutex<Option<broadcast::Sender<TriggerPulse>>>>,
    events: Arc<Mutex<Option<broadcast::Sender<LooperEvent>>>>,
}

impl BroadcastChannelManager {
    /// Create a new BroadcastChannelManager with all channels uninitialized
    pub fn new() -> Self {
        Self {
            pulses: Arc::new(Mutex::new(None)),
            events: Arc::new(Mutex::new(None)),
        }
    }

    // ========================================================================
    // TRIGGER PULSE CHANNEL
    // ========================================================================

    /// Initialize the trigger pulse channel
    ///
    /// # Notes
    /// - Buffer size: 256 messages (dense hat patterns on several tracks)
    /// - Old messages dropped if buffer fills (lagged subscribers)
    pub fn init_pulses(&self) -> broadcast::Sender<TriggerPulse> {
        let mut slot = self.pulses.lock().unwrap();
        if let Some(tx) = slot.as_ref() {
            return tx.clone();
        }
        let (tx, _) = broadcast::channel(256);
        *slot = Some(tx.clone());
        tx
    }

    /// Subscribe to trigger pulses
    ///
    /// Returns None if init_pulses() was not called yet.
    pub fn subscribe_pulses(&self) -> Option<broadcast::Receiver<TriggerPulse>> {
        self.pulses.lock().unwrap().as_ref().map(|tx| tx.subscribe())
    }

    // ========================================================================
    // ENGINE EVENT CHANNEL
    // ========================================================================

    /// Initialize the engine event channel (64-message buffer)
    pub fn init_events(&self) -> broadcast::Sender<LooperEvent> {
        let mut slot = self.events.lock().unwrap();
        if let Some(tx) = slot.as_ref() {
            return tx.clone();
        }
        let (tx, _) = broadcast::channel(64);
        *slot = Some(tx.clone());
        tx
    }

    /// Subscribe to engine events
    pub fn subscribe_events(&self) -> Option<broadcast::Receiver<LooperEvent>> {
        self.events.lock().unwrap().as_ref().map(|tx| tx.subscribe())
    }

    /// Publish an engine event if the channel exists
    ///
    /// Having no subscribers is not an error.
    pub fn publish_event(&self, event: LooperEvent) {
        if let Some(tx) = self.events.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }
}

impl Default for BroadcastChannelManager {
    fn default() -> Self {
        Self::new()
    }
}
