/// Maps sensor readings onto classifier predictions
use crate::error::PredictionError;
use crate::models::{ClassificationResult, SensorReading};
use crate::prediction::classifier::ClassifierHandle;

const PROBABILITY_TOLERANCE: f64 = 1e-6;

/// Classify one complete sensor reading
///
/// The feature vector is `[temperature_celsius, humidity_percent, smoke_adc]`
/// as `f64`, the order the model was trained with. Callers are expected to
/// pass only complete readings; an incomplete one fails fast instead of being
/// classified with substitute values.
///
/// # Arguments
/// * `model` - Handle to the loaded classifier
/// * `reading` - Parsed reading with all three numeric fields present
///
/// # Returns
/// The label and probabilities, or the reason no prediction was produced
pub fn classify(
    model: &ClassifierHandle,
    reading: &SensorReading,
) -> Result<ClassificationResult, PredictionError> {
    let features = reading.features().ok_or(PredictionError::IncompleteInput)?;
    let classifier = model.model().ok_or(PredictionError::ModelNotReady)?;

    let (predicted_label, probabilities) = classifier.predict(features)?;
    validate(predicted_label, probabilities)?;

    Ok(ClassificationResult {
        predicted_label,
        probabilities,
    })
}

// Reject outputs that cannot be a binary probability distribution
fn validate(label: u8, probabilities: [f64; 2]) -> Result<(), PredictionError> {
    if label > 1 {
        return Err(PredictionError::InferenceFailure {
            reason: format!("label {} is not binary", label),
        });
    }
    if probabilities.iter().any(|p| !p.is_finite() || *p < 0.0) {
        return Err(PredictionError::InferenceFailure {
            reason: format!("invalid probabilities {:?}", probabilities),
        });
    }
    let total = probabilities[0] + probabilities[1];
    if (total - 1.0).abs() > PROBABILITY_TOLERANCE {
        return Err(PredictionError::InferenceFailure {
            reason: format!("probabilities sum to {}", total),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RISK_NOT_AVAILABLE;
    use crate::prediction::classifier::Classifier;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use time::OffsetDateTime;

    struct Fixed {
        output: (u8, [f64; 2]),
        seen: Arc<std::sync::Mutex<Vec<[f64; 3]>>>,
        calls: Arc<AtomicUsize>,
    }

    impl Fixed {
        fn new(output: (u8, [f64; 2])) -> Self {
            Fixed {
                output,
                seen: Arc::default(),
                calls: Arc::default(),
            }
        }
    }

    impl Classifier for Fixed {
        fn predict(&self, features: [f64; 3]) -> Result<(u8, [f64; 2]), PredictionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(features);
            Ok(self.output)
        }
    }

    fn reading(t: Option<f64>, h: Option<f64>, s: Option<u32>) -> SensorReading {
        SensorReading {
            timestamp: OffsetDateTime::now_utc(),
            temperature_celsius: t,
            humidity_percent: h,
            smoke_adc: s,
            risk_level: RISK_NOT_AVAILABLE.to_string(),
            raw_line: String::new(),
        }
    }

    #[test]
    fn passes_features_in_training_order() {
        let stub = Fixed::new((0, [0.7, 0.3]));
        let seen = stub.seen.clone();
        let handle = ClassifierHandle::new(stub);

        let result = classify(&handle, &reading(Some(30.5), Some(55.2), Some(350))).unwrap();
        assert_eq!(
            result,
            ClassificationResult {
                predicted_label: 0,
                probabilities: [0.7, 0.3]
            }
        );
        assert_eq!(seen.lock().unwrap().as_slice(), &[[30.5, 55.2, 350.0]]);
    }

    #[test]
    fn incomplete_reading_never_reaches_model() {
        let stub = Fixed::new((1, [0.1, 0.9]));
        let calls = stub.calls.clone();
        let handle = ClassifierHandle::new(stub);

        let err = classify(&handle, &reading(None, Some(45.0), Some(300))).unwrap_err();
        assert_eq!(err, PredictionError::IncompleteInput);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unloaded_model_is_not_ready() {
        let err = classify(
            &ClassifierHandle::unloaded(),
            &reading(Some(1.0), Some(1.0), Some(1)),
        )
        .unwrap_err();
        assert_eq!(err, PredictionError::ModelNotReady);
    }

    #[test]
    fn malformed_model_output_is_inference_failure() {
        let complete = reading(Some(1.0), Some(1.0), Some(1));
        for output in [(2, [0.5, 0.5]), (1, [0.5, 0.6]), (0, [f64::NAN, 1.0]), (0, [1.5, -0.5])] {
            let handle = ClassifierHandle::new(Fixed::new(output));
            assert!(matches!(
                classify(&handle, &complete),
                Err(PredictionError::InferenceFailure { .. })
            ));
        }
    }
}
