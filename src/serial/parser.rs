/// Line protocol parsing for SACI sensor node output
use time::OffsetDateTime;

use crate::models::{SensorReading, RISK_NOT_AVAILABLE};

/// Textual shape of one telemetry line.
///
/// The default is the sensor node's wire format:
/// `Temp: <float|ERROR> C, Hum: <float|ERROR> %, Smoke: <int|ERROR>[, Risk: <token>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineProtocol {
    pub temperature_marker: String,
    pub humidity_marker: String,
    pub smoke_marker: String,
    pub risk_marker: String,
    pub temperature_unit: String,
    pub humidity_unit: String,
    /// Literal the device prints in place of a failed sensor value
    pub error_token: String,
}

impl Default for LineProtocol {
    fn default() -> Self {
        LineProtocol {
            temperature_marker: "Temp:".to_string(),
            humidity_marker: "Hum:".to_string(),
            smoke_marker: "Smoke:".to_string(),
            risk_marker: "Risk:".to_string(),
            temperature_unit: "C".to_string(),
            humidity_unit: "%".to_string(),
            error_token: "ERROR".to_string(),
        }
    }
}

// Parsed field values before a timestamp is attached
struct Fields {
    temperature: Option<f64>,
    humidity: Option<f64>,
    smoke: Option<u32>,
    risk: String,
}

/// Parser for sensor node lines
#[derive(Debug, Clone, Default)]
pub struct ReadingParser {
    protocol: LineProtocol,
}

impl ReadingParser {
    pub fn new(protocol: LineProtocol) -> Self {
        ReadingParser { protocol }
    }

    /// Parse one line of device output into a sensor reading
    ///
    /// The temperature marker may appear anywhere in the line; humidity and
    /// smoke must follow it in order, each after a comma. A field carrying the
    /// error token resolves to `None`. Any other token that does not parse as
    /// the field's numeric type rejects the whole line.
    ///
    /// # Arguments
    /// * `line` - Text received from the device, with or without surrounding whitespace
    ///
    /// # Returns
    /// Some(SensorReading) stamped with the current time, None if the line is
    /// empty or is not a telemetry line
    pub fn parse(&self, line: &str) -> Option<SensorReading> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        // Try every occurrence of the temperature marker so banner text that
        // mentions it (e.g. a format hint) does not hide a real reading
        let marker = self.protocol.temperature_marker.as_str();
        let fields = line
            .match_indices(marker)
            .find_map(|(start, _)| self.match_fields(&line[start + marker.len()..]))?;

        Some(SensorReading {
            timestamp: OffsetDateTime::now_utc(),
            temperature_celsius: fields.temperature,
            humidity_percent: fields.humidity,
            smoke_adc: fields.smoke,
            risk_level: fields.risk,
            raw_line: line.to_string(),
        })
    }

    // `rest` starts right after the temperature marker
    fn match_fields(&self, rest: &str) -> Option<Fields> {
        let p = &self.protocol;

        let (temperature, rest) = self.float_field(rest, &p.temperature_unit)?;
        let rest = expect(rest, ",")?;
        let rest = expect(rest, &p.humidity_marker)?;
        let (humidity, rest) = self.float_field(rest, &p.humidity_unit)?;
        let rest = expect(rest, ",")?;
        let rest = expect(rest, &p.smoke_marker)?;

        let (token, rest) = split_word(rest.trim_start());
        let smoke = self.field_value(token, |t| t.parse::<u32>().ok())?;

        Some(Fields {
            temperature,
            humidity,
            smoke,
            risk: self.risk_level(rest),
        })
    }

    /// Numeric-or-error token followed by its unit suffix
    fn float_field<'a>(&self, input: &'a str, unit: &str) -> Option<(Option<f64>, &'a str)> {
        let input = input.trim_start();

        let (token, rest) = if input.starts_with(self.protocol.error_token.as_str()) {
            input.split_at(self.protocol.error_token.len())
        } else {
            let end = input
                .char_indices()
                .find(|(_, c)| !(c.is_ascii_digit() || matches!(c, '.' | '-' | '+')))
                .map_or(input.len(), |(i, _)| i);
            input.split_at(end)
        };

        let value = self.field_value(token, |t| t.parse::<f64>().ok().filter(|v| v.is_finite()))?;
        let rest = expect(rest, unit)?;
        Some((value, rest))
    }

    /// Resolve a raw token: error token -> Some(None), number -> Some(Some(v)),
    /// anything else -> None (line rejected)
    fn field_value<T>(
        &self,
        token: &str,
        parse: impl FnOnce(&str) -> Option<T>,
    ) -> Option<Option<T>> {
        if token.is_empty() {
            None
        } else if token == self.protocol.error_token {
            Some(None)
        } else {
            parse(token).map(Some)
        }
    }

    /// Optional `, Risk: <token>` after the smoke field
    fn risk_level(&self, rest: &str) -> String {
        rest.trim_start()
            .strip_prefix(',')
            .map(str::trim_start)
            .and_then(|r| r.strip_prefix(self.protocol.risk_marker.as_str()))
            .map(|r| split_word(r.trim_start()).0)
            .filter(|token| !token.is_empty())
            .unwrap_or(RISK_NOT_AVAILABLE)
            .to_string()
    }
}

/// Skip whitespace, then require `literal`
fn expect<'a>(input: &'a str, literal: &str) -> Option<&'a str> {
    input.trim_start().strip_prefix(literal)
}

/// Split at the first whitespace or comma
fn split_word(input: &str) -> (&str, &str) {
    let end = input
        .find(|c: char| c.is_whitespace() || c == ',')
        .unwrap_or(input.len());
    input.split_at(end)
}
