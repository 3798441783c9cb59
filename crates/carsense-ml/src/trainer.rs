//! Retraining task
//!
//! Periodically rebuilds a candidate model from the engine's accumulated
//! feature vectors and the feedback collected since the last pass, then
//! attempts drift-gated promotion. Confirmed events tighten the threshold
//! scale (more readily flagged), dismissed events widen it. A failed pass
//! leaves the active model untouched and is retried next cycle; the task
//! never leaves a partially-promoted version behind.

use std::sync::Arc;
use std::time::Duration;

use carsense_core::model::{ModelVersion, Resolution};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::AnomalyEngine;
use crate::error::MlError;
use crate::model::BaselineModel;

/// Cadence of trigger checks between retrains
const CHECK_INTERVAL: Duration = Duration::from_secs(5);
/// Multiplier per confirmed event; below 1 so confirmations tighten
const CONFIRM_TIGHTEN: f64 = 0.95;
/// Multiplier per dismissed event
const DISMISS_WIDEN: f64 = 1.05;
/// Bounds on the threshold scale after feedback adjustment
const SCALE_BOUNDS: (f64, f64) = (0.25, 4.0);
/// Share of the sample pool held out for validation
const HOLDOUT_DENOMINATOR: usize = 5;

pub struct Trainer {
    engine: Arc<AnomalyEngine>,
    consumed_feedback: usize,
}

impl Trainer {
    pub fn new(engine: Arc<AnomalyEngine>) -> Self {
        Self {
            engine,
            consumed_feedback: 0,
        }
    }

    /// Feedback entries accumulated since the last training pass
    pub fn pending_feedback(&self) -> usize {
        self.engine.feedback().len().saturating_sub(self.consumed_feedback)
    }

    /// One full training pass: fit, validate, attempt promotion
    pub fn retrain(&mut self) -> Result<ModelVersion, MlError> {
        let config = self.engine.config().clone();
        let samples = self.engine.training_snapshot();
        if samples.len() < config.min_training_samples {
            return Err(MlError::Training(format!(
                "insufficient data: {} of {} samples",
                samples.len(),
                config.min_training_samples
            )));
        }

        let active = self.engine.registry().active();
        let mut scale = active.threshold_scale;
        for record in self.engine.feedback().records_since(self.consumed_feedback) {
            match record.resolution {
                Resolution::Confirmed => scale *= CONFIRM_TIGHTEN,
                Resolution::Dismissed => scale *= DISMISS_WIDEN,
                Resolution::Unconfirmed => {}
            }
        }
        let scale = scale.clamp(SCALE_BOUNDS.0, SCALE_BOUNDS.1);

        let holdout_len = (samples.len() / HOLDOUT_DENOMINATOR).max(1);
        let (train, holdout) = samples.split_at(samples.len() - holdout_len);

        let model = BaselineModel::fit(train, scale)?;
        let validation_score = holdout
            .iter()
            .map(|vector| 1.0 - model.score(vector).score)
            .sum::<f64>()
            / holdout.len() as f64;
        if !validation_score.is_finite() {
            return Err(MlError::Training(
                "non-finite validation score".to_string(),
            ));
        }

        let version =
            self.engine
                .registry()
                .register_candidate(model, train.len(), validation_score);
        let promoted = self.engine.registry().promote(version.version_id)?;
        // Feedback is consumed even when the gate holds the candidate back,
        // so a rejection is not re-applied against the next pass
        self.consumed_feedback = self.engine.feedback().len();

        if promoted {
            info!(
                version_id = %version.version_id,
                validation_score,
                threshold_scale = scale,
                "retrain pass promoted a new model"
            );
        } else {
            warn!(
                version_id = %version.version_id,
                validation_score,
                "retrain pass gated, active model unchanged"
            );
        }
        Ok(version)
    }
}

/// Run the trainer until the task is aborted
pub fn spawn_trainer(engine: Arc<AnomalyEngine>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let retrain_interval = Duration::from_secs(engine.config().retrain_interval_secs);
        let feedback_threshold = engine.config().feedback_threshold;
        let mut trainer = Trainer::new(engine);
        let mut last_pass = tokio::time::Instant::now();

        loop {
            tokio::time::sleep(CHECK_INTERVAL.min(retrain_interval)).await;

            let due = last_pass.elapsed() >= retrain_interval
                || trainer.pending_feedback() >= feedback_threshold;
            if !due {
                continue;
            }

            match trainer.retrain() {
                Ok(version) => debug!(version_id = %version.version_id, "retrain pass complete"),
                Err(e) => debug!(%e, "retrain pass skipped"),
            }
            last_pass = tokio::time::Instant::now();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::FeedbackStore;
    use crate::registry::ModelRegistry;
    use carsense_core::config::AnomalyConfig;
    use carsense_core::model::{ModelStatus, ParameterReading};
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn reading(value: f64, sequence: u64) -> ParameterReading {
        ParameterReading {
            parameter_id: "rpm".to_string(),
            value,
            unit: "rpm".to_string(),
            sample_time: Utc::now(),
            sequence,
        }
    }

    fn engine(dir: &std::path::Path, min_samples: usize) -> Arc<AnomalyEngine> {
        let config = AnomalyConfig {
            window_size: 4,
            score_threshold: 0.7,
            min_training_samples: min_samples,
            model_path: dir.join("model.json").display().to_string(),
            feedback_path: dir.join("feedback.log").display().to_string(),
            ..AnomalyConfig::default()
        };
        // Generous tolerance: these tests exercise training mechanics, the
        // gate itself is covered by the registry tests
        let registry = Arc::new(ModelRegistry::open(&config.model_path, 0.25).unwrap());
        let feedback = Arc::new(FeedbackStore::open(&config.feedback_path).unwrap());
        Arc::new(AnomalyEngine::new(config, registry, feedback))
    }

    /// Jittered readings around 100 so every feature has learned spread
    fn feed_normal_traffic(engine: &AnomalyEngine, count: usize) {
        let jitter = [0.0, 1.0, -1.0, 0.5, -0.5, 2.0, -2.0, 0.0];
        for i in 0..count {
            let value = 100.0 + jitter[i % jitter.len()] + (i % 5) as f64 * 0.2;
            engine.ingest(&reading(value, i as u64));
        }
    }

    #[test]
    fn insufficient_data_fails_without_touching_the_active_model() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), 50);
        let before = engine.registry().active_version();

        let mut trainer = Trainer::new(engine.clone());
        assert!(matches!(trainer.retrain(), Err(MlError::Training(_))));
        assert_eq!(engine.registry().active_version(), before);
    }

    #[test]
    fn first_pass_replaces_the_bootstrap_model() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), 20);
        feed_normal_traffic(&engine, 40);

        let mut trainer = Trainer::new(engine.clone());
        let version = trainer.retrain().unwrap();

        assert_eq!(engine.registry().active_version().version_id, version.version_id);
        assert_eq!(version.status, ModelStatus::Candidate);
        assert_eq!(
            engine.registry().active_version().status,
            ModelStatus::Active
        );
        assert!(engine.registry().active().stats.contains_key("rpm.mean"));
    }

    #[test]
    fn confirmed_feedback_tightens_the_threshold_scale() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), 20);
        feed_normal_traffic(&engine, 60);

        let mut trainer = Trainer::new(engine.clone());
        trainer.retrain().unwrap();
        let scale_before = engine.registry().active().threshold_scale;

        // Raise an outlier event and confirm it as a true anomaly
        let mut event = None;
        for i in 0..8 {
            if let Some(e) = engine.ingest(&reading(500.0, 100 + i)) {
                event = Some(e);
                break;
            }
        }
        engine.confirm(event.expect("outlier should raise an event").event_id).unwrap();

        trainer.retrain().unwrap();
        let scale_after = engine.registry().active().threshold_scale;
        assert!(scale_after < scale_before);
    }

    #[test]
    fn dismissed_feedback_widens_the_threshold_scale() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), 20);
        feed_normal_traffic(&engine, 60);

        let mut trainer = Trainer::new(engine.clone());
        trainer.retrain().unwrap();
        let scale_before = engine.registry().active().threshold_scale;

        let mut event = None;
        for i in 0..8 {
            if let Some(e) = engine.ingest(&reading(500.0, 100 + i)) {
                event = Some(e);
                break;
            }
        }
        engine.dismiss(event.expect("outlier should raise an event").event_id).unwrap();

        trainer.retrain().unwrap();
        assert!(engine.registry().active().threshold_scale > scale_before);
    }

    #[test]
    fn feedback_is_consumed_once_per_pass() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), 20);
        feed_normal_traffic(&engine, 60);

        let mut trainer = Trainer::new(engine.clone());
        trainer.retrain().unwrap();

        let mut event = None;
        for i in 0..8 {
            if let Some(e) = engine.ingest(&reading(500.0, 100 + i)) {
                event = Some(e);
                break;
            }
        }
        engine.confirm(event.unwrap().event_id).unwrap();
        assert_eq!(trainer.pending_feedback(), 1);

        trainer.retrain().unwrap();
        assert_eq!(trainer.pending_feedback(), 0);

        // A further pass without new feedback keeps the scale put
        let scale = engine.registry().active().threshold_scale;
        trainer.retrain().unwrap();
        assert_eq!(engine.registry().active().threshold_scale, scale);
    }
}
