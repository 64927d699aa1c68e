//! Calibrated face profile and descriptor matching.
//!
//! Descriptors come from an external face-embedding model; this module only
//! stores them and scores a candidate descriptor against the calibrated samples.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Distance at which two descriptors are considered different people.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// One face descriptor captured during calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceDescriptor {
    #[serde(rename = "descriptor")]
    pub values: Vec<f32>,
    pub timestamp: DateTime<Local>,
}

impl FaceDescriptor {
    /// Euclidean distance to `other`. Descriptors of different length are
    /// infinitely far apart.
    pub fn euclidean_distance(&self, other: &[f32]) -> f32 {
        if self.values.len() != other.len() {
            return f32::INFINITY;
        }
        self.values
            .iter()
            .zip(other.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// The monitored person's calibrated face samples.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceProfile {
    #[serde(rename = "faceDescriptors")]
    pub descriptors: Vec<FaceDescriptor>,
    pub calibrated_at: Option<DateTime<Local>>,
}

impl FaceProfile {
    /// Build a calibrated profile from captured samples. `None` when no sample
    /// was captured.
    pub fn from_samples(samples: Vec<Vec<f32>>, now: DateTime<Local>) -> Option<Self> {
        let descriptors: Vec<FaceDescriptor> = samples
            .into_iter()
            .filter(|s| !s.is_empty())
            .map(|values| FaceDescriptor {
                values,
                timestamp: now,
            })
            .collect();
        if descriptors.is_empty() {
            return None;
        }
        Some(Self {
            descriptors,
            calibrated_at: Some(now),
        })
    }

    pub fn is_calibrated(&self) -> bool {
        !self.descriptors.is_empty() && self.calibrated_at.is_some()
    }
}

/// Strategy for scoring a candidate descriptor against a profile.
pub trait Matcher {
    /// Match confidence in [0, 1]. An empty profile scores 0.
    fn confidence(&self, candidate: &[f32], profile: &FaceProfile) -> f64;
}

/// Scores by mean Euclidean distance to every calibrated sample:
/// `max(0, 1 - mean_distance / threshold)`.
#[derive(Debug, Clone, Copy)]
pub struct DistanceMatcher {
    pub threshold: f32,
}

impl Default for DistanceMatcher {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MATCH_THRESHOLD,
        }
    }
}

impl Matcher for DistanceMatcher {
    fn confidence(&self, candidate: &[f32], profile: &FaceProfile) -> f64 {
        if profile.descriptors.is_empty() || self.threshold <= 0.0 {
            return 0.0;
        }

        let total: f32 = profile
            .descriptors
            .iter()
            .map(|d| d.euclidean_distance(candidate))
            .sum();
        let mean = total / profile.descriptors.len() as f32;

        f64::from((1.0 - mean / self.threshold).max(0.0))
    }
}
