//! Anomaly engine
//!
//! Folds readings into per-parameter windows, scores full windows against
//! the registry's active model, and raises events above the configured
//! threshold. Confirm/dismiss is the feedback ingestion boundary: it is the
//! only place an event's resolution changes, and every verdict lands in the
//! feedback store before the call returns.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use carsense_core::config::AnomalyConfig;
use carsense_core::model::{AnomalyEvent, ParameterReading, Resolution, Severity};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::MlError;
use crate::features::{FeatureVector, FeatureWindow};
use crate::feedback::{FeedbackRecord, FeedbackStore};
use crate::registry::ModelRegistry;

/// Cap on accumulated training vectors; oldest are dropped beyond this
const TRAINING_POOL_CAP: usize = 10_000;

/// Cap on open events awaiting a verdict; oldest are dropped beyond this
const EVENT_RETENTION: usize = 256;

/// Open events plus the feature vectors they were scored on.
///
/// A resolved event is removed once its verdict is in the feedback store,
/// and the oldest unresolved events are dropped past `EVENT_RETENTION`, so
/// the table stays bounded for the life of the process.
#[derive(Default)]
struct EventTable {
    entries: HashMap<Uuid, (AnomalyEvent, FeatureVector)>,
    order: VecDeque<Uuid>,
}

impl EventTable {
    fn insert(&mut self, event: AnomalyEvent, features: FeatureVector) {
        self.order.push_back(event.event_id);
        self.entries.insert(event.event_id, (event, features));
        // `order` may hold ids already resolved away; popping those is a no-op
        while self.entries.len() > EVENT_RETENTION {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }
}

pub struct AnomalyEngine {
    config: AnomalyConfig,
    registry: Arc<ModelRegistry>,
    feedback: Arc<FeedbackStore>,
    windows: Mutex<HashMap<String, FeatureWindow>>,
    events: RwLock<EventTable>,
    training_pool: Mutex<Vec<FeatureVector>>,
}

impl AnomalyEngine {
    pub fn new(
        config: AnomalyConfig,
        registry: Arc<ModelRegistry>,
        feedback: Arc<FeedbackStore>,
    ) -> Self {
        Self {
            config,
            registry,
            feedback,
            windows: Mutex::new(HashMap::new()),
            events: RwLock::new(EventTable::default()),
            training_pool: Mutex::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn feedback(&self) -> &Arc<FeedbackStore> {
        &self.feedback
    }

    pub fn config(&self) -> &AnomalyConfig {
        &self.config
    }

    /// Fold one reading in; returns an event if its window scored above
    /// the threshold
    pub fn ingest(&self, reading: &ParameterReading) -> Option<AnomalyEvent> {
        let features = {
            let mut windows = self.windows.lock();
            let window = windows
                .entry(reading.parameter_id.clone())
                .or_insert_with(|| {
                    FeatureWindow::new(reading.parameter_id.clone(), self.config.window_size)
                });
            window.push(reading.value);
            window.features()?
        };

        {
            let mut pool = self.training_pool.lock();
            pool.push(features.clone());
            if pool.len() > TRAINING_POOL_CAP {
                let excess = pool.len() - TRAINING_POOL_CAP;
                pool.drain(..excess);
            }
        }

        let scored = self.registry.active().score(&features);
        if scored.score < self.config.score_threshold {
            return None;
        }

        let event = AnomalyEvent {
            event_id: Uuid::new_v4(),
            score: scored.score,
            severity: Severity::from_score(scored.score, self.config.score_threshold),
            contributing_features: scored.contributing,
            detected_at: Utc::now(),
            resolution: Resolution::Unconfirmed,
        };
        info!(
            event_id = %event.event_id,
            score = event.score,
            severity = ?event.severity,
            parameter = %reading.parameter_id,
            "anomaly detected"
        );
        self.events.write().insert(event.clone(), features);
        Some(event)
    }

    /// Look up an open (unresolved) event
    pub fn event(&self, event_id: Uuid) -> Option<AnomalyEvent> {
        self.events
            .read()
            .entries
            .get(&event_id)
            .map(|(e, _)| e.clone())
    }

    /// Mark an event a true anomaly and log the verdict
    pub fn confirm(&self, event_id: Uuid) -> Result<AnomalyEvent, MlError> {
        self.resolve(event_id, Resolution::Confirmed)
    }

    /// Mark an event a false positive and log the verdict
    pub fn dismiss(&self, event_id: Uuid) -> Result<AnomalyEvent, MlError> {
        self.resolve(event_id, Resolution::Dismissed)
    }

    fn resolve(&self, event_id: Uuid, resolution: Resolution) -> Result<AnomalyEvent, MlError> {
        let (mut event, features) = {
            let events = self.events.read();
            events
                .entries
                .get(&event_id)
                .cloned()
                .ok_or(MlError::UnknownEvent(event_id))?
        };
        event.resolution = resolution;

        self.feedback.append(FeedbackRecord {
            event_id,
            resolution,
            features,
            recorded_at: Utc::now(),
        })?;
        // Dropped only after the verdict is durable; a failed append leaves
        // the event open for another attempt
        self.events.write().entries.remove(&event_id);
        debug!(event_id = %event_id, ?resolution, "event resolved");
        Ok(event)
    }

    /// Snapshot of the accumulated training vectors
    pub fn training_snapshot(&self) -> Vec<FeatureVector> {
        self.training_pool.lock().clone()
    }
}

/// Consume the reading broadcast and forward raised events.
///
/// Bounded staleness is acceptable: a lagged receiver skips to the
/// newest readings with a warning. Reordering is not possible on a
/// broadcast channel.
pub fn spawn_scoring(
    engine: Arc<AnomalyEngine>,
    mut readings: broadcast::Receiver<ParameterReading>,
    events: mpsc::Sender<AnomalyEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match readings.recv().await {
                Ok(reading) => {
                    if let Some(event) = engine.ingest(&reading) {
                        if events.send(event).await.is_err() {
                            debug!("event channel closed, scoring task stopping");
                            break;
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "scoring task lagged behind the reading stream");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("reading stream closed, scoring task stopping");
                    break;
                }
            }
        }
    })
}
