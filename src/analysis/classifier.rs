// Classifier - drum class decision from a feature vector
//
// Two interchangeable strategies behind the `DrumClassifier` trait:
//
// - KnnClassifier: k-nearest-neighbor over a labeled subset of the feature
//   vector (flux, energy, sub band, low band, high band), z-score scaled.
//   Majority vote among the k nearest; ties go to the class of the single
//   nearest neighbor among the tied classes.
// - HeuristicClassifier: degradation path when no training data exists.
//   low-band ratio > 0.5 => Kick, else high-band ratio > 0.3 => Hat, else Snare.
//
// `select_classifier` picks the strategy at startup from the configuration.

use std::fmt;
use std::str::FromStr;

use super::features::FeatureVector;
use super::training::{TrainingSample, TrainingSet, TRAINING_DIMENSIONS};
use crate::config::ClassifierConfig;

/// Closed set of percussive event classes
///
/// The numeric index (0 = kick, 1 = snare, 2 = hat) is the persisted form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrumClass {
    /// Low-frequency dominated hit
    Kick,
    /// Broadband mid hit
    Snare,
    /// High-frequency dominated hit
    Hat,
}

impl DrumClass {
    /// All classes in index order
    pub const ALL: [DrumClass; 3] = [DrumClass::Kick, DrumClass::Snare, DrumClass::Hat];

    /// Persisted numeric index
    pub fn index(self) -> u8 {
        match self {
            DrumClass::Kick => 0,
            DrumClass::Snare => 1,
            DrumClass::Hat => 2,
        }
    }

    /// Inverse of [`DrumClass::index`]
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(DrumClass::Kick),
            1 => Some(DrumClass::Snare),
            2 => Some(DrumClass::Hat),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DrumClass::Kick => "kick",
            DrumClass::Snare => "snare",
            DrumClass::Hat => "hat",
        }
    }
}

impl fmt::Display for DrumClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DrumClass {
    type Err = String;

    /// Accepts class names (`kick`, `snare`, `hat`/`hihat`) or indices
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kick" | "0" => Ok(DrumClass::Kick),
            "snare" | "1" => Ok(DrumClass::Snare),
            "hat" | "hihat" | "2" => Ok(DrumClass::Hat),
            other => Err(format!("unknown drum class '{}'", other)),
        }
    }
}

/// Single capability shared by every classification strategy
pub trait DrumClassifier: Send + Sync {
    /// Classify one feature vector; always returns a class
    fn classify(&self, features: &FeatureVector) -> DrumClass;

    /// Short strategy name for logs
    fn name(&self) -> &'static str;
}

/// Rule-based fallback classifier
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicClassifier;

impl HeuristicClassifier {
    const KICK_LOW_RATIO: f32 = 0.5;
    const HAT_HIGH_RATIO: f32 = 0.3;
}

impl DrumClassifier for HeuristicClassifier {
    fn classify(&self, features: &FeatureVector) -> DrumClass {
        if features.low_ratio() > Self::KICK_LOW_RATIO {
            DrumClass::Kick
        } else if features.high_ratio() > Self::HAT_HIGH_RATIO {
            DrumClass::Hat
        } else {
            DrumClass::Snare
        }
    }

    fn name(&self) -> &'static str {
        "heuristic"
    }
}

/// k-nearest-neighbor classifier over the training feature subset
pub struct KnnClassifier {
    k: usize,
    samples: Vec<TrainingSample>,
    mean: [f32; TRAINING_DIMENSIONS],
    scale: [f32; TRAINING_DIMENSIONS],
}

impl KnnClassifier {
    /// Build a classifier from a labeled training set
    ///
    /// Samples are standardized (z-score) with statistics computed from the
    /// set itself, so features with large ranges (flux) do not dominate the
    /// distance.
    ///
    /// # Panics
    /// Panics if the training set is empty or `k` is zero.
    pub fn new(training: TrainingSet, k: usize) -> Self {
        assert!(k > 0, "k must be greater than 0");
        assert!(!training.is_empty(), "k-NN needs at least one training sample");

        let (mean, scale) = training.standardization();
        let samples = training
            .into_samples()
            .into_iter()
            .map(|sample| TrainingSample {
                label: sample.label,
                values: standardize(&sample.values, &mean, &scale),
            })
            .collect();

        Self {
            k,
            samples,
            mean,
            scale,
        }
    }

    /// Number of stored training samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Classify a raw (unscaled) training-subset vector
    ///
    /// # Panics
    /// Panics if `values` does not have [`TRAINING_DIMENSIONS`] entries.
    pub fn classify_subset(&self, values: &[f32]) -> DrumClass {
        assert_eq!(
            values.len(),
            TRAINING_DIMENSIONS,
            "k-NN input must have {} values, got {}",
            TRAINING_DIMENSIONS,
            values.len()
        );
        let mut raw = [0.0; TRAINING_DIMENSIONS];
        raw.copy_from_slice(values);
        let query = standardize(&raw, &self.mean, &self.scale);

        let mut neighbors: Vec<(f32, DrumClass)> = self
            .samples
            .iter()
            .map(|sample| (squared_distance(&query, &sample.values), sample.label))
            .collect();
        neighbors.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        neighbors.truncate(self.k);

        let mut votes = [0usize; 3];
        for (_, label) in &neighbors {
            votes[label.index() as usize] += 1;
        }
        let best = votes.iter().copied().max().unwrap_or(0);

        // Nearest neighbor whose class holds the winning vote count
        neighbors
            .iter()
            .map(|(_, label)| *label)
            .find(|label| votes[label.index() as usize] == best)
            .unwrap_or(DrumClass::Snare)
    }
}

impl DrumClassifier for KnnClassifier {
    fn classify(&self, features: &FeatureVector) -> DrumClass {
        self.classify_subset(&TrainingSample::subset_of(features))
    }

    fn name(&self) -> &'static str {
        "knn"
    }
}

fn standardize(
    values: &[f32; TRAINING_DIMENSIONS],
    mean: &[f32; TRAINING_DIMENSIONS],
    scale: &[f32; TRAINING_DIMENSIONS],
) -> [f32; TRAINING_DIMENSIONS] {
    let mut out = [0.0; TRAINING_DIMENSIONS];
    for i in 0..TRAINING_DIMENSIONS {
        out[i] = (values[i] - mean[i]) / scale[i];
    }
    out
}

fn squared_distance(a: &[f32; TRAINING_DIMENSIONS], b: &[f32; TRAINING_DIMENSIONS]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Choose the classification strategy at startup
///
/// Uses k-NN when a non-empty training file is configured and readable,
/// otherwise logs a warning and degrades to the heuristic.
pub fn select_classifier(config: &ClassifierConfig) -> Box<dyn DrumClassifier> {
    let Some(path) = config.training_data.as_ref() else {
        log::info!("[Classifier] No training data configured, using heuristic classifier");
        return Box::new(HeuristicClassifier);
    };

    match TrainingSet::load_csv(path) {
        Ok(set) if !set.is_empty() => {
            log::info!(
                "[Classifier] Loaded {} training samples from {:?}, using k-NN (k={})",
                set.len(),
                path,
                config.k
            );
            Box::new(KnnClassifier::new(set, config.k.max(1)))
        }
        Ok(_) => {
            log::warn!(
                "[Classifier] Training file {:?} has no usable samples, falling back to heuristic",
                path
            );
            Box::new(HeuristicClassifier)
        }
        Err(err) => {
            log::warn!(
                "[Classifier] Could not read training file {:?}: {}. Falling back to heuristic",
                path,
                err
            );
            Box::new(HeuristicClassifier)
        }
    }
}

#[cfg(test)]
#[path = "classifier_tests.rs"]
mod tests;
