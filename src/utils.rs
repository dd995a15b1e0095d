/// Utility functions for formatting readings and timestamps
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::OffsetDateTime;

use crate::models::SensorReading;

/// Format a timestamp for human-readable logging
///
/// Converts an OffsetDateTime to DD.MM.YYYY - HH:MM:SS format
/// Falls back to default string representation if formatting fails.
pub fn format_datetime(dt: &OffsetDateTime) -> String {
    let format = format_description!("[day].[month].[year] - [hour]:[minute]:[second]");
    dt.format(&format).unwrap_or_else(|_| dt.to_string())
}

/// RFC 3339 timestamp for machine-readable output
pub fn format_timestamp(dt: &OffsetDateTime) -> String {
    dt.format(&Rfc3339).unwrap_or_else(|_| dt.to_string())
}

/// Render a reading as one fixed-width console line
///
/// Sensor values the device reported as failed are shown as `ERROR`, e.g.
/// `[30.05.2025 - 12:00:00] T:  25.5°C | H:  45.0% | Smoke:   450 | Risk: LOW`
pub fn format_reading(reading: &SensorReading) -> String {
    let temp = reading
        .temperature_celsius
        .map_or_else(|| "ERROR".to_string(), |t| format!("{:.1}°C", t));
    let hum = reading
        .humidity_percent
        .map_or_else(|| "ERROR".to_string(), |h| format!("{:.1}%", h));
    let smoke = reading
        .smoke_adc
        .map_or_else(|| "ERROR".to_string(), |s| s.to_string());

    format!(
        "[{}] T: {:>7} | H: {:>7} | Smoke: {:>5} | Risk: {}",
        format_datetime(&reading.timestamp),
        temp,
        hum,
        smoke,
        reading.risk_level
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn reading() -> SensorReading {
        SensorReading {
            timestamp: datetime!(2025-05-30 12:00:00 UTC),
            temperature_celsius: Some(25.5),
            humidity_percent: None,
            smoke_adc: Some(450),
            risk_level: "LOW".to_string(),
            raw_line: String::new(),
        }
    }

    #[test]
    fn formats_datetime() {
        assert_eq!(
            format_datetime(&datetime!(2025-05-30 08:05:09 UTC)),
            "30.05.2025 - 08:05:09"
        );
    }

    #[test]
    fn formats_reading_with_error_fields() {
        assert_eq!(
            format_reading(&reading()),
            "[30.05.2025 - 12:00:00] T:  25.5°C | H:   ERROR | Smoke:   450 | Risk: LOW"
        );
    }

    #[test]
    fn formats_rfc3339() {
        assert_eq!(
            format_timestamp(&datetime!(2025-05-30 12:00:00 UTC)),
            "2025-05-30T12:00:00Z"
        );
    }
}
