//! Anomaly engine
//!
//! Readings are folded into per-parameter rolling windows; full windows
//! produce feature vectors that the active baseline model scores into [0, 1].
//! Scores above the configured threshold raise anomaly events. User feedback
//! on those events is logged durably and steers the next retraining pass,
//! and a drift gate keeps regressed candidates from ever going live:
//!
//! ```text
//! readings -> FeatureWindow -> BaselineModel::score -> AnomalyEvent
//!                                   ^                       |
//!                                   | promote (drift gate)  v confirm/dismiss
//!                              ModelRegistry <- Trainer <- FeedbackStore
//! ```

pub mod engine;
pub mod error;
pub mod features;
pub mod feedback;
pub mod model;
pub mod registry;
pub mod trainer;

pub use engine::{spawn_scoring, AnomalyEngine};
pub use error::MlError;
pub use features::{FeatureVector, FeatureWindow};
pub use feedback::{FeedbackRecord, FeedbackStore};
pub use model::BaselineModel;
pub use registry::ModelRegistry;
pub use trainer::spawn_trainer;
