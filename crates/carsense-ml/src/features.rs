//! Windowed feature extraction
//!
//! Each parameter keeps a rolling window of its last `window_size` samples.
//! A full window yields a deterministic feature vector: the same samples
//! always produce the same features, keyed `"{parameter}.{stat}"`.

use std::collections::{BTreeMap, VecDeque};

/// Feature name -> value; ordered so extraction and training iterate
/// features identically
pub type FeatureVector = BTreeMap<String, f64>;

/// Rolling sample window for one parameter
pub struct FeatureWindow {
    parameter_id: String,
    capacity: usize,
    samples: VecDeque<f64>,
}

impl FeatureWindow {
    pub fn new(parameter_id: impl Into<String>, capacity: usize) -> Self {
        Self {
            parameter_id: parameter_id.into(),
            capacity: capacity.max(2),
            samples: VecDeque::new(),
        }
    }

    /// Push a sample, dropping the oldest once the window is full
    pub fn push(&mut self, value: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() == self.capacity
    }

    /// Extract the feature vector; `None` until the window is full
    pub fn features(&self) -> Option<FeatureVector> {
        if !self.is_full() {
            return None;
        }

        let n = self.samples.len() as f64;
        let mean = self.samples.iter().sum::<f64>() / n;
        let variance = self
            .samples
            .iter()
            .map(|v| (v - mean).powi(2))
            .sum::<f64>()
            / n;
        let std = variance.sqrt();
        let min = self.samples.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = self
            .samples
            .iter()
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max);
        // Window position is empty only when capacity is zero, which new()
        // rules out
        let latest = *self.samples.back().unwrap_or(&0.0);

        // Least-squares slope over sample index
        let x_mean = (n - 1.0) / 2.0;
        let mut num = 0.0;
        let mut den = 0.0;
        for (i, v) in self.samples.iter().enumerate() {
            let dx = i as f64 - x_mean;
            num += dx * (v - mean);
            den += dx * dx;
        }
        let slope = if den > 0.0 { num / den } else { 0.0 };

        let mut features = FeatureVector::new();
        for (stat, value) in [
            ("mean", mean),
            ("std", std),
            ("min", min),
            ("max", max),
            ("latest", latest),
            ("slope", slope),
        ] {
            features.insert(format!("{}.{stat}", self.parameter_id), value);
        }
        Some(features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn window_with(samples: &[f64]) -> FeatureWindow {
        let mut window = FeatureWindow::new("rpm", samples.len());
        for &v in samples {
            window.push(v);
        }
        window
    }

    #[test]
    fn not_full_yields_nothing() {
        let mut window = FeatureWindow::new("rpm", 4);
        window.push(1.0);
        window.push(2.0);
        assert!(window.features().is_none());
    }

    #[test]
    fn features_are_deterministic_and_named() {
        let window = window_with(&[1.0, 2.0, 3.0, 4.0]);
        let features = window.features().unwrap();

        assert_eq!(features["rpm.mean"], 2.5);
        assert_eq!(features["rpm.min"], 1.0);
        assert_eq!(features["rpm.max"], 4.0);
        assert_eq!(features["rpm.latest"], 4.0);
        assert_eq!(features["rpm.slope"], 1.0);
        assert!((features["rpm.std"] - 1.118033988749895).abs() < 1e-12);

        assert_eq!(window.features().unwrap(), features);
    }

    #[test]
    fn flat_window_has_zero_slope_and_std() {
        let features = window_with(&[5.0, 5.0, 5.0, 5.0]).features().unwrap();
        assert_eq!(features["rpm.std"], 0.0);
        assert_eq!(features["rpm.slope"], 0.0);
    }

    #[test]
    fn window_slides_oldest_out() {
        let mut window = window_with(&[1.0, 2.0, 3.0]);
        window.push(10.0);
        let features = window.features().unwrap();
        assert_eq!(features["rpm.min"], 2.0);
        assert_eq!(features["rpm.latest"], 10.0);
    }
}
