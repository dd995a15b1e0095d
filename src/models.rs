use time::OffsetDateTime;

/// Risk label used when the device did not send one
pub const RISK_NOT_AVAILABLE: &str = "N/A";

/// One telemetry record parsed from a device line.
///
/// `None` in a numeric field means the device sent its error token for it.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub timestamp: OffsetDateTime,
    pub temperature_celsius: Option<f64>,
    pub humidity_percent: Option<f64>,
    pub smoke_adc: Option<u32>,
    pub risk_level: String,
    pub raw_line: String,
}

impl SensorReading {
    /// Feature vector in training order: temperature, humidity, smoke.
    ///
    /// This order is a contract with the training pipeline that produced the
    /// classifier and must not change independently of it.
    pub fn features(&self) -> Option<[f64; 3]> {
        match (self.temperature_celsius, self.humidity_percent, self.smoke_adc) {
            (Some(t), Some(h), Some(s)) => Some([t, h, f64::from(s)]),
            _ => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.features().is_some()
    }

    /// Compare every field except the capture time
    pub fn same_values(&self, other: &SensorReading) -> bool {
        self.temperature_celsius == other.temperature_celsius
            && self.humidity_percent == other.humidity_percent
            && self.smoke_adc == other.smoke_adc
            && self.risk_level == other.risk_level
            && self.raw_line == other.raw_line
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassificationResult {
    /// 0 = no fire, 1 = fire
    pub predicted_label: u8,
    /// `[P(no fire), P(fire)]`
    pub probabilities: [f64; 2],
}

impl ClassificationResult {
    pub fn fire_probability(&self) -> f64 {
        self.probabilities[1]
    }

    pub fn is_fire(&self) -> bool {
        self.predicted_label == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(t: Option<f64>, h: Option<f64>, s: Option<u32>) -> SensorReading {
        SensorReading {
            timestamp: OffsetDateTime::UNIX_EPOCH,
            temperature_celsius: t,
            humidity_percent: h,
            smoke_adc: s,
            risk_level: RISK_NOT_AVAILABLE.to_string(),
            raw_line: String::new(),
        }
    }

    #[test]
    fn features_follow_training_order() {
        let r = reading(Some(30.5), Some(55.2), Some(350));
        assert_eq!(r.features(), Some([30.5, 55.2, 350.0]));
    }

    #[test]
    fn any_missing_field_blocks_features() {
        assert!(!reading(None, Some(1.0), Some(1)).is_complete());
        assert!(!reading(Some(1.0), None, Some(1)).is_complete());
        assert!(!reading(Some(1.0), Some(1.0), None).is_complete());
    }
}
