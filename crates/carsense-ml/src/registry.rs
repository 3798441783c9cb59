//! Model registry
//!
//! Version table plus the active-model pointer. The pointer is an
//! `RwLock<Arc<BaselineModel>>` swapped whole, so scoring always sees a
//! fully-formed model and promotion never blocks readers for longer than
//! the pointer swap.
//!
//! Promotion applies the drift gate: a candidate goes live only if its
//! validation score has not regressed past `drift_tolerance` below the
//! active model's. A rejected candidate stays `Candidate`; re-promoting it
//! with the same scores is rejected again.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use carsense_core::model::{ModelStatus, ModelVersion};
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::MlError;
use crate::model::BaselineModel;

/// On-disk snapshot of the active model
#[derive(Debug, Serialize, Deserialize)]
struct ModelSnapshot {
    version: ModelVersion,
    model: BaselineModel,
}

struct RegistryInner {
    versions: HashMap<Uuid, ModelVersion>,
    models: HashMap<Uuid, Arc<BaselineModel>>,
    active_id: Uuid,
}

pub struct ModelRegistry {
    inner: RwLock<RegistryInner>,
    active: RwLock<Arc<BaselineModel>>,
    drift_tolerance: f64,
    snapshot_path: PathBuf,
}

impl ModelRegistry {
    /// Open the registry, reloading a persisted active model if present,
    /// otherwise seeding an untrained bootstrap baseline
    pub fn open(
        snapshot_path: impl AsRef<Path>,
        drift_tolerance: f64,
    ) -> Result<Self, MlError> {
        let snapshot_path = snapshot_path.as_ref().to_path_buf();

        let (version, model) = if snapshot_path.exists() {
            let snapshot: ModelSnapshot =
                serde_json::from_str(&fs::read_to_string(&snapshot_path)?)?;
            info!(
                version_id = %snapshot.version.version_id,
                validation_score = snapshot.version.validation_score,
                "reloaded persisted model"
            );
            (snapshot.version, snapshot.model)
        } else {
            let model = BaselineModel::bootstrap();
            let version = ModelVersion {
                version_id: model.version_id,
                trained_at: Utc::now(),
                training_samples: 0,
                validation_score: 0.0,
                status: ModelStatus::Active,
            };
            (version, model)
        };

        let active_id = version.version_id;
        let model = Arc::new(model);
        let mut versions = HashMap::new();
        versions.insert(active_id, version);
        let mut models = HashMap::new();
        models.insert(active_id, model.clone());

        Ok(Self {
            inner: RwLock::new(RegistryInner {
                versions,
                models,
                active_id,
            }),
            active: RwLock::new(model),
            drift_tolerance,
            snapshot_path,
        })
    }

    /// The model scoring should use right now
    pub fn active(&self) -> Arc<BaselineModel> {
        self.active.read().clone()
    }

    pub fn active_version(&self) -> ModelVersion {
        let inner = self.inner.read();
        inner.versions[&inner.active_id].clone()
    }

    pub fn versions(&self) -> Vec<ModelVersion> {
        let mut versions: Vec<ModelVersion> = self.inner.read().versions.values().cloned().collect();
        versions.sort_by_key(|v| v.trained_at);
        versions
    }

    /// Register a freshly trained candidate
    pub fn register_candidate(
        &self,
        model: BaselineModel,
        training_samples: usize,
        validation_score: f64,
    ) -> ModelVersion {
        let version = ModelVersion {
            version_id: model.version_id,
            trained_at: Utc::now(),
            training_samples,
            validation_score,
            status: ModelStatus::Candidate,
        };
        let mut inner = self.inner.write();
        inner.models.insert(version.version_id, Arc::new(model));
        inner.versions.insert(version.version_id, version.clone());
        version
    }

    /// Attempt to promote a candidate past the drift gate.
    ///
    /// Returns `true` if the candidate went live. A gated candidate keeps
    /// `Candidate` status and is left in the table for review.
    pub fn promote(&self, candidate_id: Uuid) -> Result<bool, MlError> {
        let mut inner = self.inner.write();

        let active_score = inner.versions[&inner.active_id].validation_score;
        let candidate = inner
            .versions
            .get(&candidate_id)
            .ok_or(MlError::UnknownVersion(candidate_id))?
            .clone();
        let model = inner
            .models
            .get(&candidate_id)
            .ok_or(MlError::UnknownVersion(candidate_id))?
            .clone();

        if candidate.validation_score < active_score - self.drift_tolerance {
            warn!(
                candidate_id = %candidate_id,
                candidate_score = candidate.validation_score,
                active_score,
                "drift gate rejected candidate"
            );
            return Ok(false);
        }

        let old_active = inner.active_id;
        if let Some(old) = inner.versions.get_mut(&old_active) {
            old.status = ModelStatus::Retired;
        }
        if let Some(new) = inner.versions.get_mut(&candidate_id) {
            new.status = ModelStatus::Active;
        }
        inner.active_id = candidate_id;
        *self.active.write() = model.clone();

        let snapshot = ModelSnapshot {
            version: inner.versions[&candidate_id].clone(),
            model: (*model).clone(),
        };
        drop(inner);

        // The in-memory swap already happened; a failed snapshot write only
        // costs the restart-survival of this version
        if let Err(e) = self.persist(&snapshot) {
            warn!(version_id = %candidate_id, %e, "failed to persist promoted model");
        }
        info!(
            version_id = %candidate_id,
            validation_score = snapshot.version.validation_score,
            "model promoted"
        );
        Ok(true)
    }

    fn persist(&self, snapshot: &ModelSnapshot) -> Result<(), MlError> {
        if let Some(parent) = self.snapshot_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.snapshot_path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(snapshot)?)?;
        fs::rename(&tmp, &self.snapshot_path)?;
        Ok(())
    }
}
