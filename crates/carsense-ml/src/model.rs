//! Baseline anomaly model
//!
//! Per-feature Gaussian baseline learned from training feature vectors.
//! Scoring takes the largest absolute z-score across features, divided by
//! `threshold_scale`, and squashes it to [0, 1] with a logistic centred at
//! z = 3 (three sigmas scores 0.5). A smaller `threshold_scale` therefore
//! flags more readily; feedback moves it between retrains.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MlError;
use crate::features::FeatureVector;

/// z-score beyond which a feature is listed as contributing
const CONTRIBUTION_GATE: f64 = 3.0;
/// Logistic midpoint in sigmas
const SCORE_MIDPOINT: f64 = 3.0;
/// Floor for learned standard deviations
const MIN_STD: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureStat {
    pub mean: f64,
    pub std: f64,
}

/// Scoring result for one feature vector
#[derive(Debug, Clone, PartialEq)]
pub struct Scored {
    /// Score in [0, 1]
    pub score: f64,
    /// Features whose |z| exceeded the contribution gate
    pub contributing: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineModel {
    pub version_id: Uuid,
    pub stats: BTreeMap<String, FeatureStat>,
    /// Sensitivity divisor applied to every z-score; lower flags more
    pub threshold_scale: f64,
}

impl BaselineModel {
    /// Untrained baseline: scores everything 0 until a model is fitted
    pub fn bootstrap() -> Self {
        Self {
            version_id: Uuid::new_v4(),
            stats: BTreeMap::new(),
            threshold_scale: 1.0,
        }
    }

    /// Learn per-feature mean/std from training vectors
    pub fn fit(
        samples: &[FeatureVector],
        threshold_scale: f64,
    ) -> Result<Self, MlError> {
        if samples.is_empty() {
            return Err(MlError::Training("no training samples".to_string()));
        }

        let mut sums: BTreeMap<&str, (f64, f64, usize)> = BTreeMap::new();
        for vector in samples {
            for (name, &value) in vector {
                if !value.is_finite() {
                    return Err(MlError::Training(format!(
                        "non-finite value for feature {name}"
                    )));
                }
                let entry = sums.entry(name).or_insert((0.0, 0.0, 0));
                entry.0 += value;
                entry.2 += 1;
            }
        }
        let means: BTreeMap<&str, f64> = sums
            .iter()
            .map(|(&name, &(sum, _, count))| (name, sum / count as f64))
            .collect();
        for vector in samples {
            for (name, &value) in vector {
                if let (Some(entry), Some(mean)) =
                    (sums.get_mut(name.as_str()), means.get(name.as_str()))
                {
                    entry.1 += (value - mean).powi(2);
                }
            }
        }

        let stats = sums
            .into_iter()
            .map(|(name, (_, sq_sum, count))| {
                let std = (sq_sum / count as f64).sqrt().max(MIN_STD);
                (
                    name.to_string(),
                    FeatureStat {
                        mean: means[name],
                        std,
                    },
                )
            })
            .collect();

        Ok(Self {
            version_id: Uuid::new_v4(),
            stats,
            threshold_scale,
        })
    }

    /// Score one feature vector; deterministic for a given model
    pub fn score(&self, features: &FeatureVector) -> Scored {
        let mut max_z = 0.0f64;
        let mut contributing = Vec::new();

        for (name, &value) in features {
            let Some(stat) = self.stats.get(name) else {
                continue;
            };
            let z = ((value - stat.mean).abs() / stat.std) / self.threshold_scale;
            if z > CONTRIBUTION_GATE {
                contributing.push(name.clone());
            }
            max_z = max_z.max(z);
        }

        Scored {
            score: logistic(max_z - SCORE_MIDPOINT),
            contributing,
        }
    }
}

fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn vector(pairs: &[(&str, f64)]) -> FeatureVector {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), *value))
            .collect()
    }

    fn trained() -> BaselineModel {
        // rpm.mean baseline: mean 100, std 10
        let samples: Vec<FeatureVector> = [90.0, 100.0, 110.0, 100.0]
            .iter()
            .map(|&v| vector(&[("rpm.mean", v)]))
            .collect();
        BaselineModel::fit(&samples, 1.0).unwrap()
    }

    #[test]
    fn fit_learns_mean_and_std() {
        let model = trained();
        let stat = &model.stats["rpm.mean"];
        assert_eq!(stat.mean, 100.0);
        assert!((stat.std - 7.0710678118654755).abs() < 1e-12);
    }

    #[test]
    fn baseline_sample_scores_low_outlier_scores_high() {
        let model = trained();
        let normal = model.score(&vector(&[("rpm.mean", 100.0)]));
        let outlier = model.score(&vector(&[("rpm.mean", 200.0)]));

        assert!(normal.score < 0.1);
        assert!(outlier.score > 0.9);
        assert!(normal.contributing.is_empty());
        assert_eq!(outlier.contributing, vec!["rpm.mean".to_string()]);
    }

    #[test]
    fn scores_stay_in_unit_interval() {
        let model = trained();
        for value in [-1e9, 0.0, 100.0, 1e9] {
            let scored = model.score(&vector(&[("rpm.mean", value)]));
            assert!((0.0..=1.0).contains(&scored.score), "score {}", scored.score);
        }
    }

    #[test]
    fn lower_threshold_scale_scores_higher() {
        let samples: Vec<FeatureVector> = [90.0, 100.0, 110.0, 100.0]
            .iter()
            .map(|&v| vector(&[("rpm.mean", v)]))
            .collect();
        let loose = BaselineModel::fit(&samples, 1.0).unwrap();
        let tight = BaselineModel::fit(&samples, 0.5).unwrap();

        let probe = vector(&[("rpm.mean", 125.0)]);
        assert!(tight.score(&probe).score > loose.score(&probe).score);
    }

    #[test]
    fn unknown_features_are_ignored() {
        let model = trained();
        let scored = model.score(&vector(&[("coolant.mean", 1e6)]));
        assert_eq!(scored.score, logistic(-SCORE_MIDPOINT));
        assert!(scored.contributing.is_empty());
    }

    #[test]
    fn non_finite_training_data_is_rejected() {
        let samples = vec![vector(&[("rpm.mean", f64::NAN)])];
        assert!(matches!(
            BaselineModel::fit(&samples, 1.0),
            Err(MlError::Training(_))
        ));
    }
}
