//! Drift detection and error classification

pub mod drift;
pub mod error_classifier;

pub use drift::{DriftClass, DriftDetector, DriftOutcome, DriftThresholds};
pub use error_classifier::{classify_error, ErrorClassification, ErrorClassifier};
