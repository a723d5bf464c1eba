// SpectrumAnalyzer - raw PCM to analysis frames
//
// Buffers incoming mono samples and emits one AnalysisFrame per hop
// (hop = window / 4, i.e. 75% overlap). Each frame carries the first
// window/2 FFT magnitudes of the Hann-windowed block and the RMS energy of
// the unwindowed block.

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use super::AnalysisFrame;

pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    window_size: usize,
    hop_size: usize,
    pending: Vec<f32>,
    scratch: Vec<Complex<f32>>,
}

impl SpectrumAnalyzer {
    /// Create an analyzer for `window_size`-sample blocks
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(4);
        let hop_size = window_size / 4;

        // Pre-compute Hann window to reduce spectral leakage
        let window = (0..window_size)
            .map(|i| {
                0.5 * (1.0
                    - ((2.0 * std::f32::consts::PI * i as f32) / (window_size as f32 - 1.0)).cos())
            })
            .collect();

        let fft = FftPlanner::new().plan_fft_forward(window_size);

        Self {
            fft,
            window,
            window_size,
            hop_size,
            pending: Vec::with_capacity(window_size * 2),
            scratch: vec![Complex::new(0.0, 0.0); window_size],
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    /// Magnitudes per emitted frame
    pub fn bin_count(&self) -> usize {
        self.window_size / 2
    }

    /// Append samples and return every frame that became complete
    pub fn push_samples(&mut self, samples: &[f32]) -> Vec<AnalysisFrame> {
        self.pending.extend_from_slice(samples);

        let mut frames = Vec::new();
        while self.pending.len() >= self.window_size {
            frames.push(self.analyze_block());
            self.pending.drain(..self.hop_size);
        }
        frames
    }

    fn analyze_block(&mut self) -> AnalysisFrame {
        let block = &self.pending[..self.window_size];

        let energy =
            (block.iter().map(|s| s * s).sum::<f32>() / self.window_size as f32).sqrt();

        for ((slot, sample), w) in self.scratch.iter_mut().zip(block).zip(&self.window) {
            *slot = Complex::new(sample * w, 0.0);
        }
        self.fft.process(&mut self.scratch);

        let magnitudes = self.scratch[..self.window_size / 2]
            .iter()
            .map(|c| c.norm())
            .collect();

        AnalysisFrame { magnitudes, energy }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_count_follows_hop() {
        let mut analyzer = SpectrumAnalyzer::new(256);
        assert_eq!(analyzer.hop_size(), 64);

        // First frame needs a full window, then one per hop
        let frames = analyzer.push_samples(&vec![0.0; 256 + 64 * 3]);
        assert_eq!(frames.len(), 4);
        assert!(frames.iter().all(|f| f.magnitudes.len() == 128));
    }

    #[test]
    fn test_incremental_pushes_match_single_push() {
        let signal: Vec<f32> = (0..2048).map(|i| ((i as f32) * 0.1).sin()).collect();

        let mut whole = SpectrumAnalyzer::new(256);
        let expected = whole.push_samples(&signal);

        let mut chunked = SpectrumAnalyzer::new(256);
        let mut actual = Vec::new();
        for chunk in signal.chunks(100) {
            actual.extend(chunked.push_samples(chunk));
        }

        assert_eq!(actual.len(), expected.len());
        assert_eq!(actual[5], expected[5]);
    }

    #[test]
    fn test_energy_is_rms() {
        let mut analyzer = SpectrumAnalyzer::new(256);
        let frames = analyzer.push_samples(&vec![0.5; 256]);
        assert!((frames[0].energy - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_sine_peaks_at_expected_bin() {
        let window = 512;
        let bin = 20;
        let signal: Vec<f32> = (0..window)
            .map(|i| (2.0 * std::f32::consts::PI * bin as f32 * i as f32 / window as f32).sin())
            .collect();

        let mut analyzer = SpectrumAnalyzer::new(window);
        let frame = &analyzer.push_samples(&signal)[0];
        let peak = frame
            .magnitudes
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, bin);
    }
}
