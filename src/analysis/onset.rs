// OnsetDetector - spectral flux-based onset detection
//
// Real-time onset detection over a continuous stream of analysis frames.
//
// Algorithm (per frame):
// 1. Half-wave rectified flux: flux_t = Σ max(0, |X_t[k]| - |X_(t-1)[k]|)
//    Only increases count, so sustained or decaying energy does not retrigger.
// 2. Adaptive threshold: mean(recent flux history) × multiplier.
//    Until the history buffer is full a conservative fixed floor is used.
// 3. Accept an onset only when ALL hold:
//    - flux >= adaptive threshold
//    - flux >= absolute floor
//    - time since the last accepted onset >= debounce interval
//
// The debounce clock resets only on acceptance, so the ringing tail of one
// transient cannot produce a second onset.

use std::collections::VecDeque;

use super::AnalysisFrame;
use crate::config::OnsetDetectionConfig;

/// Outcome of evaluating one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OnsetDecision {
    /// Spectral flux of this frame
    pub flux: f32,
    /// Threshold the flux was compared against
    pub threshold: f32,
    /// Whether an onset was accepted at this frame
    pub is_onset: bool,
}

/// OnsetDetector keeps the previous spectrum, a bounded flux history and
/// the time of the last accepted onset
pub struct OnsetDetector {
    prev_spectrum: Vec<f32>,
    flux_history: VecDeque<f32>,
    history_len: usize,
    threshold_multiplier: f32,
    warmup_floor: f32,
    absolute_floor: f32,
    debounce_secs: f64,
    last_onset: Option<f64>,
}

impl OnsetDetector {
    /// Create a detector with default tuning
    pub fn new() -> Self {
        Self::with_config(OnsetDetectionConfig::default())
    }

    /// Create a detector with explicit configuration parameters
    pub fn with_config(config: OnsetDetectionConfig) -> Self {
        let history_len = config.history_len.max(1);
        Self {
            prev_spectrum: Vec::new(),
            flux_history: VecDeque::with_capacity(history_len),
            history_len,
            threshold_multiplier: config.threshold_multiplier,
            warmup_floor: config.warmup_floor,
            absolute_floor: config.absolute_floor,
            debounce_secs: config.debounce_ms as f64 / 1000.0,
            last_onset: None,
        }
    }

    /// Process one analysis frame
    ///
    /// # Arguments
    /// * `frame` - Spectral magnitudes for this hop
    /// * `timestamp` - Stream time of the frame in seconds
    pub fn process(&mut self, frame: &AnalysisFrame, timestamp: f64) -> OnsetDecision {
        let flux = self.compute_spectral_flux(&frame.magnitudes);

        if self.prev_spectrum.len() != frame.magnitudes.len() {
            self.prev_spectrum = frame.magnitudes.clone();
        } else {
            self.prev_spectrum.copy_from_slice(&frame.magnitudes);
        }

        self.evaluate_flux(flux, timestamp)
    }

    /// Apply the detection rule to an already computed flux value
    ///
    /// Updates the flux history; resets the debounce clock only when the
    /// onset is accepted.
    pub fn evaluate_flux(&mut self, flux: f32, timestamp: f64) -> OnsetDecision {
        let threshold = self.adaptive_threshold();
        self.push_history(flux);

        let debounced = self
            .last_onset
            .map(|last| timestamp - last >= self.debounce_secs)
            .unwrap_or(true);

        let is_onset = flux >= threshold && flux >= self.absolute_floor && debounced;
        if is_onset {
            self.last_onset = Some(timestamp);
            log::debug!(
                "[Onset] accepted at {:.3}s flux={:.3} threshold={:.3}",
                timestamp,
                flux,
                threshold
            );
        }

        OnsetDecision {
            flux,
            threshold,
            is_onset,
        }
    }

    /// Compute spectral flux as sum of positive differences
    ///
    /// SF(t) = Σ max(0, |X(t)| - |X(t-1)|)
    ///
    /// A missing previous spectrum counts as silence.
    fn compute_spectral_flux(&self, spectrum: &[f32]) -> f32 {
        spectrum
            .iter()
            .enumerate()
            .map(|(i, curr)| {
                let prev = self.prev_spectrum.get(i).copied().unwrap_or(0.0);
                (curr - prev).max(0.0)
            })
            .sum()
    }

    /// mean(history) × multiplier once the history is full, otherwise the warmup floor
    fn adaptive_threshold(&self) -> f32 {
        if self.flux_history.len() < self.history_len {
            return self.warmup_floor;
        }
        let mean = self.flux_history.iter().sum::<f32>() / self.flux_history.len() as f32;
        mean * self.threshold_multiplier
    }

    fn push_history(&mut self, flux: f32) {
        if self.flux_history.len() == self.history_len {
            self.flux_history.pop_front();
        }
        self.flux_history.push_back(flux);
    }

    /// Forget all history (e.g. when the input device changes)
    pub fn reset(&mut self) {
        self.prev_spectrum.clear();
        self.flux_history.clear();
        self.last_onset = None;
    }

    /// Most recent flux value, or 0.0 before any frame was processed
    pub fn last_spectral_flux(&self) -> f32 {
        self.flux_history.back().copied().unwrap_or(0.0)
    }

    /// Stream time of the last accepted onset
    pub fn last_onset(&self) -> Option<f64> {
        self.last_onset
    }
}

impl Default for OnsetDetector {
    fn default() -> Self {
        Self::new()
    }
}
