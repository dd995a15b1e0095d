/// Classifier capability and the logistic regression model file loader
use log::info;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::error::{ModelLoadError, PredictionError};

/// Feature names the fire model was trained on, in feature-vector order.
///
/// `SensorReading::features` builds vectors in this order; a model trained on a
/// different order or set of columns is rejected at load time.
pub const FEATURE_NAMES: [&str; 3] = ["temperature", "humidity", "smoke_level"];

/// A trained binary fire classifier.
///
/// `predict` receives `[temperature_celsius, humidity_percent, smoke_adc]` and
/// returns the label (0 = no fire, 1 = fire) with `[P(no fire), P(fire)]`.
pub trait Classifier: Send + Sync {
    fn predict(&self, features: [f64; 3]) -> Result<(u8, [f64; 2]), PredictionError>;
}

/// Shared, read-only reference to a loaded classifier.
///
/// Cloning is cheap. An unloaded handle makes every prediction fail with
/// `PredictionError::ModelNotReady`.
#[derive(Clone, Default)]
pub struct ClassifierHandle {
    model: Option<Arc<dyn Classifier>>,
}

impl ClassifierHandle {
    pub fn new(model: impl Classifier + 'static) -> Self {
        ClassifierHandle {
            model: Some(Arc::new(model)),
        }
    }

    pub fn unloaded() -> Self {
        ClassifierHandle { model: None }
    }

    /// Load a logistic regression model exported as JSON
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelLoadError> {
        let path = path.as_ref();
        let model = LogisticModel::load(path)?;
        info!("Successfully loaded classifier from {}", path.display());
        Ok(ClassifierHandle::new(model))
    }

    pub fn is_ready(&self) -> bool {
        self.model.is_some()
    }

    pub(crate) fn model(&self) -> Option<&dyn Classifier> {
        self.model.as_deref()
    }
}

impl fmt::Debug for ClassifierHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassifierHandle")
            .field("ready", &self.is_ready())
            .finish()
    }
}

// On-disk layout of an exported model
#[derive(Debug, Deserialize)]
struct ModelFile {
    #[serde(default)]
    feature_names: Option<Vec<String>>,
    coefficients: Vec<f64>,
    intercept: f64,
}

/// Binary logistic regression over the three sensor features
#[derive(Debug, Clone, PartialEq)]
pub struct LogisticModel {
    coefficients: [f64; 3],
    intercept: f64,
}

impl LogisticModel {
    pub fn new(coefficients: [f64; 3], intercept: f64) -> Self {
        LogisticModel {
            coefficients,
            intercept,
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelLoadError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Parse a model export of the form
    /// `{"feature_names": [...], "coefficients": [w0, w1, w2], "intercept": b}`.
    /// `feature_names` is optional but checked when present.
    pub fn from_json(text: &str) -> Result<Self, ModelLoadError> {
        let file: ModelFile = serde_json::from_str(text)?;

        if let Some(found) = file.feature_names {
            if found.iter().map(String::as_str).ne(FEATURE_NAMES) {
                return Err(ModelLoadError::FeatureContract {
                    expected: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
                    found,
                });
            }
        }

        let coefficients: [f64; 3] =
            file.coefficients
                .as_slice()
                .try_into()
                .map_err(|_| ModelLoadError::Shape {
                    expected: FEATURE_NAMES.len(),
                    found: file.coefficients.len(),
                })?;

        Ok(LogisticModel::new(coefficients, file.intercept))
    }

    /// Linear decision value `w·x + b`
    pub fn decision(&self, features: [f64; 3]) -> f64 {
        self.coefficients
            .iter()
            .zip(features)
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + self.intercept
    }
}

impl Classifier for LogisticModel {
    fn predict(&self, features: [f64; 3]) -> Result<(u8, [f64; 2]), PredictionError> {
        let z = self.decision(features);
        if !z.is_finite() {
            return Err(PredictionError::InferenceFailure {
                reason: format!("decision value is not finite for features {:?}", features),
            });
        }

        let p_fire = 1.0 / (1.0 + (-z).exp());
        let label = u8::from(z > 0.0);
        Ok((label, [1.0 - p_fire, p_fire]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_model_with_feature_contract() {
        let model = LogisticModel::from_json(
            r#"{"feature_names": ["temperature", "humidity", "smoke_level"],
                "coefficients": [0.2, -0.1, 0.01], "intercept": -5.0}"#,
        )
        .unwrap();
        assert_eq!(model, LogisticModel::new([0.2, -0.1, 0.01], -5.0));
    }

    #[test]
    fn feature_names_are_optional() {
        let model =
            LogisticModel::from_json(r#"{"coefficients": [1.0, 2.0, 3.0], "intercept": 0.5}"#)
                .unwrap();
        assert_eq!(model.decision([1.0, 1.0, 1.0]), 6.5);
    }

    #[test]
    fn rejects_reordered_features() {
        let err = LogisticModel::from_json(
            r#"{"feature_names": ["humidity", "temperature", "smoke_level"],
                "coefficients": [0.2, -0.1, 0.01], "intercept": 0.0}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ModelLoadError::FeatureContract { .. }));
    }

    #[test]
    fn rejects_wrong_coefficient_count() {
        let err = LogisticModel::from_json(r#"{"coefficients": [0.2, 0.1], "intercept": 0.0}"#)
            .unwrap_err();
        assert!(matches!(
            err,
            ModelLoadError::Shape {
                expected: 3,
                found: 2
            }
        ));
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            LogisticModel::from_json("not json"),
            Err(ModelLoadError::Format(_))
        ));
    }

    #[test]
    fn hot_dry_smoky_air_is_fire() {
        let model = LogisticModel::new([0.3, -0.1, 0.01], -12.0);

        let (label, probs) = model.predict([45.0, 15.0, 850.0]).unwrap();
        assert_eq!(label, 1);
        assert!(probs[1] > 0.5);
        assert!((probs[0] + probs[1] - 1.0).abs() < 1e-12);

        let (label, probs) = model.predict([18.0, 75.0, 80.0]).unwrap();
        assert_eq!(label, 0);
        assert!(probs[0] > 0.5);
    }

    #[test]
    fn non_finite_decision_is_inference_failure() {
        let model = LogisticModel::new([f64::MAX, f64::MAX, 0.0], 0.0);
        assert!(matches!(
            model.predict([f64::MAX, f64::MAX, 0.0]),
            Err(PredictionError::InferenceFailure { .. })
        ));
    }

    #[test]
    fn unloaded_handle_is_not_ready() {
        let handle = ClassifierHandle::unloaded();
        assert!(!handle.is_ready());
        assert!(handle.model().is_none());
        assert!(ClassifierHandle::new(LogisticModel::new([0.0; 3], 0.0)).is_ready());
    }

    #[test]
    fn load_missing_file_is_io_error() {
        assert!(matches!(
            ClassifierHandle::load("/nonexistent/saci-model.json"),
            Err(ModelLoadError::Io(_))
        ));
    }
}
