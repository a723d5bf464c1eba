// Analysis module - transcription pipeline from audio frames to drum hits
//
// Architecture:
// - SpectrumAnalyzer: raw PCM -> AnalysisFrame (one per hop)
// - Transcriber: OnsetDetector -> FeatureExtractor -> DrumClassifier
// - Output: DetectedHit stamped with stream time (hop count × hop duration)
//
// The Transcriber keeps its own audio-rate clock: frame N is at
// N × hop_size / sample_rate seconds, independent of wall-clock jitter.

pub mod classifier;
pub mod features;
pub mod onset;
pub mod spectrum;
pub mod training;

use crate::config::AppConfig;

use classifier::{select_classifier, DrumClass, DrumClassifier};
use features::{FeatureExtractor, FeatureVector};
use onset::OnsetDetector;
use spectrum::SpectrumAnalyzer;

/// One hop's worth of spectral magnitudes plus scalar energy
///
/// `magnitudes` holds half the analysis window. Frames are ephemeral and
/// only live for the duration of one hop.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisFrame {
    pub magnitudes: Vec<f32>,
    pub energy: f32,
}

/// A classified percussive onset
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectedHit {
    pub class: DrumClass,
    /// Normalized loudness in [0, 1]
    pub intensity: f32,
    /// Stream time of the onset frame in seconds
    pub time_secs: f64,
    pub features: FeatureVector,
}

/// Onset detection + feature extraction + classification over a frame stream
pub struct Transcriber {
    detector: OnsetDetector,
    extractor: FeatureExtractor,
    classifier: Box<dyn DrumClassifier>,
    hop_secs: f64,
    full_scale_energy: f32,
    frames_processed: u64,
}

impl Transcriber {
    /// Build the pipeline with an explicit classifier strategy
    pub fn new(config: &AppConfig, classifier: Box<dyn DrumClassifier>) -> Self {
        let bin_count = config.analysis.window_size / 2;
        Self {
            detector: OnsetDetector::with_config(config.onset_detection.clone()),
            extractor: FeatureExtractor::new(config.analysis.sample_rate, bin_count),
            classifier,
            hop_secs: config.analysis.hop_secs(),
            full_scale_energy: config.classifier.full_scale_energy.max(f32::EPSILON),
            frames_processed: 0,
        }
    }

    /// Build the pipeline, selecting k-NN or heuristic from the configuration
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config, select_classifier(&config.classifier))
    }

    /// Name of the active classifier strategy
    pub fn classifier_name(&self) -> &'static str {
        self.classifier.name()
    }

    /// Stream time of the next frame to be processed
    pub fn stream_time(&self) -> f64 {
        self.frames_processed as f64 * self.hop_secs
    }

    /// Run one frame through the pipeline
    ///
    /// Returns a hit only when the onset detector accepts this frame.
    pub fn process_frame(&mut self, frame: &AnalysisFrame) -> Option<DetectedHit> {
        let time_secs = self.stream_time();
        self.frames_processed += 1;

        let decision = self.detector.process(frame, time_secs);
        if !decision.is_onset {
            return None;
        }

        let features = self.extractor.extract(frame, decision.flux);
        let class = self.classifier.classify(&features);
        let intensity = (frame.energy / self.full_scale_energy).clamp(0.0, 1.0);

        tracing::debug!(
            "[Transcriber] {} at {:.3}s (intensity {:.2}, flux {:.2})",
            class,
            time_secs,
            intensity,
            decision.flux
        );

        Some(DetectedHit {
            class,
            intensity,
            time_secs,
            features,
        })
    }

    /// Transcribe a block of raw samples through `analyzer`
    pub fn transcribe_samples(
        &mut self,
        analyzer: &mut SpectrumAnalyzer,
        samples: &[f32],
    ) -> Vec<DetectedHit> {
        analyzer
            .push_samples(samples)
            .iter()
            .filter_map(|frame| self.process_frame(frame))
            .collect()
    }

    /// Most recent spectral flux, for meters
    pub fn last_spectral_flux(&self) -> f32 {
        self.detector.last_spectral_flux()
    }
}

#[cfg(test)]
mod tests;
