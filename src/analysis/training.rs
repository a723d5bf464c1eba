//! Labeled training samples for the k-NN classifier.
//!
//! CSV layout, one sample per line:
//!
//! ```text
//! label,flux,energy,band_sub,band_low,band_high
//! kick,12.5,0.21,0.48,0.31,0.02
//! ```
//!
//! Labels are class names (`kick`, `snare`, `hat`) or indices (`0`..`2`).
//! The header, blank lines and `#` comments are ignored; malformed lines are
//! skipped with a warning.

use std::fs;
use std::io;
use std::path::Path;

use super::classifier::DrumClass;
use super::features::FeatureVector;

/// Feature subset used for nearest-neighbor distance
pub const TRAINING_DIMENSIONS: usize = 5;

/// CSV header written by [`TrainingSet::to_csv`]
pub const TRAINING_HEADER: &str = "label,flux,energy,band_sub,band_low,band_high";

/// Standard deviations below this are treated as 1.0 (constant column)
const MIN_SCALE: f32 = 1e-6;

/// One labeled point in training space
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSample {
    pub label: DrumClass,
    pub values: [f32; TRAINING_DIMENSIONS],
}

impl TrainingSample {
    /// Label a live feature vector (used when collecting training data)
    pub fn from_features(label: DrumClass, features: &FeatureVector) -> Self {
        Self {
            label,
            values: Self::subset_of(features),
        }
    }

    /// Project a full feature vector onto the training subset:
    /// flux, energy, sub band, low band, high band
    pub fn subset_of(features: &FeatureVector) -> [f32; TRAINING_DIMENSIONS] {
        [
            features.flux(),
            features.energy(),
            features.band(0),
            features.band(1),
            features.band(4),
        ]
    }

    fn parse_line(line: &str) -> Option<Self> {
        let mut parts = line.split(',');
        let label: DrumClass = parts.next()?.parse().ok()?;

        let mut values = [0.0_f32; TRAINING_DIMENSIONS];
        for value in values.iter_mut() {
            *value = parts.next()?.trim().parse().ok()?;
            if !value.is_finite() {
                return None;
            }
        }
        if parts.next().is_some() {
            return None;
        }
        Some(Self { label, values })
    }
}

/// Collection of labeled samples
#[derive(Debug, Clone, Default)]
pub struct TrainingSet {
    samples: Vec<TrainingSample>,
}

impl TrainingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: TrainingSample) {
        self.samples.push(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[TrainingSample] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<TrainingSample> {
        self.samples
    }

    /// Number of samples carrying `label`
    pub fn count(&self, label: DrumClass) -> usize {
        self.samples.iter().filter(|s| s.label == label).count()
    }

    /// Per-dimension mean and standard deviation
    pub fn standardization(&self) -> ([f32; TRAINING_DIMENSIONS], [f32; TRAINING_DIMENSIONS]) {
        let mut mean = [0.0; TRAINING_DIMENSIONS];
        let mut scale = [1.0; TRAINING_DIMENSIONS];
        if self.samples.is_empty() {
            return (mean, scale);
        }

        let n = self.samples.len() as f32;
        for sample in &self.samples {
            for (m, v) in mean.iter_mut().zip(sample.values.iter()) {
                *m += v / n;
            }
        }
        for (i, s) in scale.iter_mut().enumerate() {
            let variance = self
                .samples
                .iter()
                .map(|sample| (sample.values[i] - mean[i]).powi(2))
                .sum::<f32>()
                / n;
            let std = variance.sqrt();
            *s = if std < MIN_SCALE { 1.0 } else { std };
        }
        (mean, scale)
    }

    /// Parse CSV text, skipping malformed lines with a warning
    pub fn parse_csv(text: &str) -> Self {
        let mut set = Self::new();
        for (line_no, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.to_ascii_lowercase().starts_with("label") {
                continue;
            }
            match TrainingSample::parse_line(line) {
                Some(sample) => set.push(sample),
                None => log::warn!(
                    "[Training] Skipping malformed line {}: {:?}",
                    line_no + 1,
                    line
                ),
            }
        }
        set
    }

    pub fn load_csv<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(Self::parse_csv(&text))
    }

    pub fn to_csv(&self) -> String {
        let mut out = String::from(TRAINING_HEADER);
        out.push('\n');
        for sample in &self.samples {
            out.push_str(sample.label.name());
            for v in &sample.values {
                out.push_str(&format!(",{}", v));
            }
            out.push('\n');
        }
        out
    }

    pub fn save_csv<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        fs::write(path, self.to_csv())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_csv_skips_header_comments_and_bad_lines() {
        let text = "label,flux,energy,band_sub,band_low,band_high\n\
                    # recorded 2024\n\
                    kick,12.0,0.2,0.5,0.3,0.01\n\
                    snare,8.0,0.1\n\
                    2,3.0,0.05,0.01,0.02,0.6\n\
                    cowbell,1,1,1,1,1\n\
                    \n";
        let set = TrainingSet::parse_csv(text);

        assert_eq!(set.len(), 2);
        assert_eq!(set.samples()[0].label, DrumClass::Kick);
        assert_eq!(set.samples()[1].label, DrumClass::Hat);
        assert_eq!(set.samples()[1].values[4], 0.6);
    }

    #[test]
    fn test_parse_csv_skips_non_finite_values() {
        let text = "kick,NaN,0.2,0.5,0.3,0.01\n\
                    snare,8.0,inf,0.1,0.2,0.3\n\
                    hat,3.0,0.05,0.01,0.02,0.6\n";
        let set = TrainingSet::parse_csv(text);

        assert_eq!(set.len(), 1);
        assert_eq!(set.samples()[0].label, DrumClass::Hat);
        assert!(set.samples()[0].values.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_csv_roundtrip_on_disk() {
        let mut set = TrainingSet::new();
        set.push(TrainingSample {
            label: DrumClass::Snare,
            values: [4.5, 0.125, 0.25, 0.5, 0.0625],
        });
        set.push(TrainingSample {
            label: DrumClass::Kick,
            values: [9.0, 0.5, 0.75, 0.125, 0.0],
        });

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("training_samples.csv");
        set.save_csv(&path).unwrap();
        let loaded = TrainingSet::load_csv(&path).unwrap();

        assert_eq!(loaded.samples(), set.samples());
        assert_eq!(loaded.count(DrumClass::Kick), 1);
    }

    #[test]
    fn test_standardization_constant_column_uses_unit_scale() {
        let mut set = TrainingSet::new();
        for flux in [1.0, 3.0] {
            set.push(TrainingSample {
                label: DrumClass::Kick,
                values: [flux, 0.5, 0.5, 0.5, 0.5],
            });
        }
        let (mean, scale) = set.standardization();

        assert_eq!(mean[0], 2.0);
        assert_eq!(scale[0], 1.0);
        assert_eq!(mean[1], 0.5);
        assert_eq!(scale[1], 1.0);
    }
}
