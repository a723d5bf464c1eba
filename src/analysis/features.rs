// FeatureExtractor - per-frame feature vector for drum classification
//
// Converts one analysis frame (spectral magnitudes + energy) into a fixed
// 25-element feature vector:
//
//   [0]      spectral flux (supplied by the onset detector)
//   [1]      frame energy
//   [2..7]   five band energies, each as a fraction of total energy
//   [7]      spectral centroid (magnitude-weighted mean bin index)
//   [8]      spectral rolloff (bin where cumulative energy reaches 90%)
//   [9]      spectral flatness (geometric / arithmetic mean of magnitudes)
//   [10]     low-band ratio  (sub + low band energy / total)
//   [11]     high-band ratio (top band energy / total)
//   [12..25] 13 cepstral coefficients from a mel filterbank
//
// Band edges are fixed proportional slices of the spectrum:
// [0, N/32), [N/32, N/16), [N/16, N/8), [N/8, N/4), [N/4, N).

use super::AnalysisFrame;

/// Number of values in a feature vector
pub const FEATURE_COUNT: usize = 25;

/// Number of cepstral coefficients kept
pub const CEPSTRAL_COUNT: usize = 13;

/// Number of fixed frequency bands
pub const BAND_COUNT: usize = 5;

/// Guard against division by zero on silent frames
const EPSILON: f32 = 1e-10;

/// Cumulative energy fraction that defines the rolloff bin
const ROLLOFF_FRACTION: f32 = 0.90;

/// Triangular mel filters feeding the cepstrum
const MEL_FILTER_COUNT: usize = 26;

pub const IDX_FLUX: usize = 0;
pub const IDX_ENERGY: usize = 1;
pub const IDX_BAND_START: usize = 2;
pub const IDX_CENTROID: usize = 7;
pub const IDX_ROLLOFF: usize = 8;
pub const IDX_FLATNESS: usize = 9;
pub const IDX_LOW_RATIO: usize = 10;
pub const IDX_HIGH_RATIO: usize = 11;
pub const IDX_CEPSTRUM_START: usize = 12;

/// Immutable fixed-length feature vector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector([f32; FEATURE_COUNT]);

impl FeatureVector {
    /// Wrap an owned array of features
    pub fn new(values: [f32; FEATURE_COUNT]) -> Self {
        Self(values)
    }

    /// Build a vector from a slice
    ///
    /// # Panics
    /// Panics if `values` does not contain exactly [`FEATURE_COUNT`] entries.
    /// A wrong length is a caller bug, not a runtime condition.
    pub fn from_slice(values: &[f32]) -> Self {
        assert_eq!(
            values.len(),
            FEATURE_COUNT,
            "feature vector must have {} values, got {}",
            FEATURE_COUNT,
            values.len()
        );
        let mut out = [0.0; FEATURE_COUNT];
        out.copy_from_slice(values);
        Self(out)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn flux(&self) -> f32 {
        self.0[IDX_FLUX]
    }

    pub fn energy(&self) -> f32 {
        self.0[IDX_ENERGY]
    }

    /// Normalized energy of band `index` (0 = sub-bass, 4 = high)
    pub fn band(&self, index: usize) -> f32 {
        assert!(index < BAND_COUNT, "band index {} out of range", index);
        self.0[IDX_BAND_START + index]
    }

    pub fn centroid(&self) -> f32 {
        self.0[IDX_CENTROID]
    }

    pub fn rolloff(&self) -> f32 {
        self.0[IDX_ROLLOFF]
    }

    pub fn flatness(&self) -> f32 {
        self.0[IDX_FLATNESS]
    }

    pub fn low_ratio(&self) -> f32 {
        self.0[IDX_LOW_RATIO]
    }

    pub fn high_ratio(&self) -> f32 {
        self.0[IDX_HIGH_RATIO]
    }

    pub fn cepstrum(&self) -> &[f32] {
        &self.0[IDX_CEPSTRUM_START..IDX_CEPSTRUM_START + CEPSTRAL_COUNT]
    }
}

/// FeatureExtractor computes feature vectors from analysis frames
///
/// Holds only precomputed lookup tables (mel filterbank); extraction itself
/// is a pure function of its inputs.
pub struct FeatureExtractor {
    bin_count: usize,
    band_edges: [usize; BAND_COUNT + 1],
    mel_filters: Vec<Vec<(usize, f32)>>,
}

impl FeatureExtractor {
    /// Create an extractor for frames with `bin_count` magnitudes
    ///
    /// # Arguments
    /// * `sample_rate` - Audio sample rate in Hz (e.g., 44100)
    /// * `bin_count` - Magnitudes per frame (half the analysis window)
    pub fn new(sample_rate: u32, bin_count: usize) -> Self {
        let n = bin_count.max(1);
        let band_edges = [0, n / 32, n / 16, n / 8, n / 4, n];
        let mel_filters = build_mel_filterbank(sample_rate, n);

        Self {
            bin_count: n,
            band_edges,
            mel_filters,
        }
    }

    /// Magnitudes per frame this extractor was built for
    pub fn bin_count(&self) -> usize {
        self.bin_count
    }

    /// Extract the full feature vector from one frame
    ///
    /// # Arguments
    /// * `frame` - Spectral magnitudes and energy for one hop
    /// * `flux` - Spectral flux computed by the onset detector for this frame
    pub fn extract(&self, frame: &AnalysisFrame, flux: f32) -> FeatureVector {
        let mags = &frame.magnitudes[..frame.magnitudes.len().min(self.bin_count)];
        let power: Vec<f32> = mags.iter().map(|m| m * m).collect();
        let total_energy: f32 = power.iter().sum();
        let norm = total_energy + EPSILON;

        let mut values = [0.0_f32; FEATURE_COUNT];
        values[IDX_FLUX] = flux;
        values[IDX_ENERGY] = frame.energy;

        let bands = self.band_energies(&power);
        for (i, band) in bands.iter().enumerate() {
            values[IDX_BAND_START + i] = band / norm;
        }

        values[IDX_CENTROID] = compute_centroid(mags);
        values[IDX_ROLLOFF] = compute_rolloff(&power, total_energy);
        values[IDX_FLATNESS] = compute_flatness(mags);
        values[IDX_LOW_RATIO] = (bands[0] + bands[1]) / norm;
        values[IDX_HIGH_RATIO] = bands[BAND_COUNT - 1] / norm;

        let cepstrum = self.compute_cepstrum(&power);
        values[IDX_CEPSTRUM_START..IDX_CEPSTRUM_START + CEPSTRAL_COUNT]
            .copy_from_slice(&cepstrum);

        FeatureVector(values)
    }

    fn band_energies(&self, power: &[f32]) -> [f32; BAND_COUNT] {
        let mut bands = [0.0; BAND_COUNT];
        for (i, band) in bands.iter_mut().enumerate() {
            let start = self.band_edges[i].min(power.len());
            let end = self.band_edges[i + 1].min(power.len());
            *band = power[start..end].iter().sum();
        }
        bands
    }

    /// Mel-frequency cepstral coefficients (log filterbank energies + DCT-II)
    fn compute_cepstrum(&self, power: &[f32]) -> [f32; CEPSTRAL_COUNT] {
        let log_energies: Vec<f32> = self
            .mel_filters
            .iter()
            .map(|filter| {
                let energy: f32 = filter
                    .iter()
                    .filter(|(bin, _)| *bin < power.len())
                    .map(|(bin, weight)| power[*bin] * weight)
                    .sum();
                (energy + EPSILON).ln()
            })
            .collect();

        let m = log_energies.len() as f32;
        let mut coeffs = [0.0; CEPSTRAL_COUNT];
        for (n, coeff) in coeffs.iter_mut().enumerate() {
            *coeff = log_energies
                .iter()
                .enumerate()
                .map(|(j, e)| {
                    e * (std::f32::consts::PI * n as f32 * (j as f32 + 0.5) / m).cos()
                })
                .sum();
        }
        coeffs
    }
}

/// Magnitude-weighted mean bin index
fn compute_centroid(mags: &[f32]) -> f32 {
    let weighted: f32 = mags.iter().enumerate().map(|(i, m)| i as f32 * m).sum();
    let total: f32 = mags.iter().sum();
    weighted / (total + EPSILON)
}

/// First bin at which cumulative energy reaches 90% of the total
fn compute_rolloff(power: &[f32], total_energy: f32) -> f32 {
    if total_energy < EPSILON {
        return 0.0;
    }

    let threshold = ROLLOFF_FRACTION * total_energy;
    let mut cumulative = 0.0;
    for (i, p) in power.iter().enumerate() {
        cumulative += p;
        if cumulative >= threshold {
            return i as f32;
        }
    }
    power.len().saturating_sub(1) as f32
}

/// Geometric mean over arithmetic mean; 0 for tonal, 1 for white noise
fn compute_flatness(mags: &[f32]) -> f32 {
    if mags.is_empty() {
        return 0.0;
    }

    let n = mags.len() as f32;
    let log_mean: f32 = mags.iter().map(|m| (m + EPSILON).ln()).sum::<f32>() / n;
    let arithmetic_mean: f32 = mags.iter().sum::<f32>() / n;

    if arithmetic_mean < EPSILON {
        return 0.0;
    }
    (log_mean.exp() / arithmetic_mean).clamp(0.0, 1.0)
}

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10f32.powf(mel / 2595.0) - 1.0)
}

/// Sparse triangular mel filters over `bin_count` bins up to Nyquist
fn build_mel_filterbank(sample_rate: u32, bin_count: usize) -> Vec<Vec<(usize, f32)>> {
    let nyquist = sample_rate as f32 / 2.0;
    let bin_hz = nyquist / bin_count as f32;
    let max_mel = hz_to_mel(nyquist);

    // Filter corner positions expressed as fractional bins
    let corners: Vec<f32> = (0..MEL_FILTER_COUNT + 2)
        .map(|i| {
            let mel = max_mel * i as f32 / (MEL_FILTER_COUNT + 1) as f32;
            mel_to_hz(mel) / bin_hz
        })
        .collect();

    (0..MEL_FILTER_COUNT)
        .map(|j| {
            let (left, center, right) = (corners[j], corners[j + 1], corners[j + 2]);
            (0..bin_count)
                .filter_map(|k| {
                    let pos = k as f32;
                    let weight = if pos >= left && pos < center {
                        (pos - left) / (center - left).max(EPSILON)
                    } else if pos >= center && pos < right {
                        (right - pos) / (right - center).max(EPSILON)
                    } else {
                        0.0
                    };
                    (weight > 0.0).then_some((k, weight))
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BINS: usize = 512;

    fn frame_with(f: impl Fn(usize) -> f32) -> AnalysisFrame {
        AnalysisFrame {
            magnitudes: (0..BINS).map(f).collect(),
            energy: 0.1,
        }
    }

    #[test]
    fn test_vector_layout() {
        let extractor = FeatureExtractor::new(44100, BINS);
        let features = extractor.extract(&frame_with(|_| 1.0), 3.5);

        assert_eq!(features.as_slice().len(), FEATURE_COUNT);
        assert_eq!(features.flux(), 3.5);
        assert_eq!(features.energy(), 0.1);
        assert_eq!(features.cepstrum().len(), CEPSTRAL_COUNT);
    }

    #[test]
    fn test_band_energies_sum_to_one() {
        let extractor = FeatureExtractor::new(44100, BINS);
        let features = extractor.extract(&frame_with(|i| (i % 7) as f32 + 0.5), 0.0);

        let sum: f32 = (0..BAND_COUNT).map(|b| features.band(b)).sum();
        assert!((sum - 1.0).abs() < 1e-3, "band fractions sum to {}", sum);
    }

    #[test]
    fn test_low_energy_frame_has_high_low_ratio() {
        let extractor = FeatureExtractor::new(44100, BINS);
        // Energy concentrated in the first N/16 bins
        let features = extractor.extract(&frame_with(|i| if i < BINS / 16 { 1.0 } else { 0.0 }), 0.0);

        assert!(features.low_ratio() > 0.99);
        assert!(features.high_ratio() < 0.01);
        assert!(features.centroid() < (BINS / 16) as f32);
    }

    #[test]
    fn test_high_energy_frame_has_high_high_ratio() {
        let extractor = FeatureExtractor::new(44100, BINS);
        let features = extractor.extract(&frame_with(|i| if i >= BINS / 4 { 1.0 } else { 0.0 }), 0.0);

        assert!(features.high_ratio() > 0.99);
        assert!(features.low_ratio() < 0.01);
    }

    #[test]
    fn test_centroid_single_bin() {
        let extractor = FeatureExtractor::new(44100, BINS);
        let features = extractor.extract(&frame_with(|i| if i == 100 { 2.0 } else { 0.0 }), 0.0);

        assert!((features.centroid() - 100.0).abs() < 1e-3);
        assert_eq!(features.rolloff(), 100.0);
    }

    #[test]
    fn test_flatness_extremes() {
        let extractor = FeatureExtractor::new(44100, BINS);

        let flat = extractor.extract(&frame_with(|_| 1.0), 0.0);
        assert!(flat.flatness() > 0.99, "flat spectrum flatness {}", flat.flatness());

        let tonal = extractor.extract(&frame_with(|i| if i == 10 { 1.0 } else { 0.0 }), 0.0);
        assert!(tonal.flatness() < 0.01, "tonal flatness {}", tonal.flatness());
    }

    #[test]
    fn test_silence_produces_finite_features() {
        let extractor = FeatureExtractor::new(44100, BINS);
        let features = extractor.extract(
            &AnalysisFrame {
                magnitudes: vec![0.0; BINS],
                energy: 0.0,
            },
            0.0,
        );

        assert!(features.as_slice().iter().all(|v| v.is_finite()));
        assert_eq!(features.centroid(), 0.0);
        assert_eq!(features.rolloff(), 0.0);
        assert_eq!(features.low_ratio(), 0.0);
    }

    #[test]
    fn test_mel_filterbank_covers_spectrum() {
        let filters = build_mel_filterbank(44100, BINS);
        assert_eq!(filters.len(), MEL_FILTER_COUNT);
        assert!(filters.iter().filter(|f| !f.is_empty()).count() >= MEL_FILTER_COUNT - 2);
    }

    #[test]
    #[should_panic(expected = "feature vector must have 25 values")]
    fn test_wrong_length_is_contract_violation() {
        FeatureVector::from_slice(&[0.0; 5]);
    }
}
