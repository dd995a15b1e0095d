/// Ingestion events and the sinks that consume them
use log::{debug, error, info};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::UnboundedSender;

use crate::error::{LinkError, PredictionError};
use crate::models::{ClassificationResult, SensorReading};
use crate::utils::{format_reading, format_timestamp};

/// Outcome of processing one line, or one link failure.
///
/// Every non-empty line read from the device produces exactly one event.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestEvent {
    /// Complete reading with a model prediction
    Classified(SensorReading, ClassificationResult),
    /// Reading with at least one sensor error token; not classified
    SkippedIncomplete(SensorReading),
    /// Complete reading the model could not classify
    ClassificationFailed(SensorReading, PredictionError),
    /// Line that is not telemetry (boot banner, firmware message, noise)
    RawUnrecognizedLine(String),
    /// Line that looks like one of our own log messages echoed back
    SuppressedInternalLog(String),
    LinkFault(LinkError),
}

impl IngestEvent {
    pub fn reading(&self) -> Option<&SensorReading> {
        match self {
            IngestEvent::Classified(r, _)
            | IngestEvent::SkippedIncomplete(r)
            | IngestEvent::ClassificationFailed(r, _) => Some(r),
            _ => None,
        }
    }
}

/// Receives every ingestion event
pub trait ReportSink {
    fn report(&mut self, event: &IngestEvent);
}

impl<S: ReportSink + ?Sized> ReportSink for Box<S> {
    fn report(&mut self, event: &IngestEvent) {
        (**self).report(event);
    }
}

impl<S: ReportSink> ReportSink for Option<S> {
    fn report(&mut self, event: &IngestEvent) {
        if let Some(sink) = self {
            sink.report(event);
        }
    }
}

impl<A: ReportSink, B: ReportSink> ReportSink for (A, B) {
    fn report(&mut self, event: &IngestEvent) {
        self.0.report(event);
        self.1.report(event);
    }
}

/// Collects events in memory
impl ReportSink for Vec<IngestEvent> {
    fn report(&mut self, event: &IngestEvent) {
        self.push(event.clone());
    }
}

/// Writes events to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ReportSink for LogSink {
    fn report(&mut self, event: &IngestEvent) {
        match event {
            IngestEvent::Classified(reading, result) => {
                let status = if result.is_fire() {
                    "Fire Detected"
                } else {
                    "No Fire Detected"
                };
                info!(
                    "{} -> Risk: {} (Label: {}), P(Fire): {:.3}",
                    format_reading(reading),
                    status,
                    result.predicted_label,
                    result.fire_probability()
                );
            }
            IngestEvent::SkippedIncomplete(reading) => {
                info!(
                    "{} -> incomplete sensor data, skipping prediction",
                    format_reading(reading)
                );
            }
            IngestEvent::ClassificationFailed(reading, e) => {
                error!(
                    "Prediction failed for '{}': {}",
                    reading.raw_line, e
                );
            }
            IngestEvent::RawUnrecognizedLine(line) => {
                info!("ESP32 Raw: {}", line);
            }
            IngestEvent::SuppressedInternalLog(line) => {
                debug!("Suppressed echoed log line: {}", line);
            }
            IngestEvent::LinkFault(e) => {
                error!("Serial link fault: {}", e);
            }
        }
    }
}

/// One JSON Lines record per parsed reading
#[derive(Debug, Serialize)]
struct ReadingRecord<'a> {
    timestamp: String,
    temperature_celsius: Option<f64>,
    humidity_percent: Option<f64>,
    smoke_adc: Option<u32>,
    risk_level: &'a str,
    raw_line: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    predicted_label: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fire_probability: Option<f64>,
}

impl<'a> ReadingRecord<'a> {
    fn new(reading: &'a SensorReading, result: Option<&ClassificationResult>) -> Self {
        ReadingRecord {
            timestamp: format_timestamp(&reading.timestamp),
            temperature_celsius: reading.temperature_celsius,
            humidity_percent: reading.humidity_percent,
            smoke_adc: reading.smoke_adc,
            risk_level: &reading.risk_level,
            raw_line: &reading.raw_line,
            predicted_label: result.map(|r| r.predicted_label),
            fire_probability: result.map(ClassificationResult::fire_probability),
        }
    }
}

/// Appends parsed readings to a JSON Lines file.
///
/// Writes are synchronous on the ingestion task. The node sends a reading
/// every few seconds, so one buffered append and flush per record stays far
/// below the read timeout. Write failures are logged and the sink keeps going.
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    file: BufWriter<File>,
}

impl JsonLinesSink {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!("Logging sensor data to: {}", path.display());
        Ok(JsonLinesSink {
            path,
            file: BufWriter::new(file),
        })
    }

    fn write_record(&mut self, record: &ReadingRecord<'_>) -> io::Result<()> {
        // Whole record or nothing reaches the file buffer
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        self.file.write_all(&line)?;
        self.file.flush()
    }
}

impl ReportSink for JsonLinesSink {
    fn report(&mut self, event: &IngestEvent) {
        let record = match event {
            IngestEvent::Classified(reading, result) => ReadingRecord::new(reading, Some(result)),
            IngestEvent::SkippedIncomplete(reading)
            | IngestEvent::ClassificationFailed(reading, _) => ReadingRecord::new(reading, None),
            _ => return,
        };
        if let Err(e) = self.write_record(&record) {
            error!("Could not write to log file '{}': {}", self.path.display(), e);
        }
    }
}

/// Forwards events to an async subscriber
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: UnboundedSender<IngestEvent>,
}

impl ChannelSink {
    pub fn new(tx: UnboundedSender<IngestEvent>) -> Self {
        ChannelSink { tx }
    }
}

impl ReportSink for ChannelSink {
    fn report(&mut self, event: &IngestEvent) {
        // A closed receiver only means nobody is listening any more
        let _ = self.tx.send(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RISK_NOT_AVAILABLE;
    use time::macros::datetime;

    fn reading(t: Option<f64>) -> SensorReading {
        SensorReading {
            timestamp: datetime!(2025-05-30 12:00:00 UTC),
            temperature_celsius: t,
            humidity_percent: Some(45.0),
            smoke_adc: Some(300),
            risk_level: RISK_NOT_AVAILABLE.to_string(),
            raw_line: "Temp: 25.5 C, Hum: 45.0 %, Smoke: 300".to_string(),
        }
    }

    #[test]
    fn json_lines_records_parsed_readings_only() {
        let path = std::env::temp_dir().join(format!("saci-jsonl-{}.jsonl", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let mut sink = JsonLinesSink::open(&path).unwrap();
        sink.report(&IngestEvent::Classified(
            reading(Some(25.5)),
            ClassificationResult {
                predicted_label: 0,
                probabilities: [0.7, 0.3],
            },
        ));
        sink.report(&IngestEvent::SkippedIncomplete(reading(None)));
        sink.report(&IngestEvent::RawUnrecognizedLine("boot".to_string()));
        sink.report(&IngestEvent::LinkFault(LinkError::NotConnected));

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);

        assert_eq!(lines[0]["timestamp"], "2025-05-30T12:00:00Z");
        assert_eq!(lines[0]["temperature_celsius"], 25.5);
        assert_eq!(lines[0]["predicted_label"], 0);
        assert_eq!(lines[0]["fire_probability"], 0.3);

        assert!(lines[1]["temperature_celsius"].is_null());
        assert_eq!(lines[1]["risk_level"], "N/A");
        assert!(lines[1].get("predicted_label").is_none());

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn json_lines_reach_disk_per_record_and_append() {
        let path = std::env::temp_dir().join(format!("saci-append-{}.jsonl", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let count = |path: &PathBuf| std::fs::read_to_string(path).unwrap().lines().count();

        let mut sink = JsonLinesSink::open(&path).unwrap();
        sink.report(&IngestEvent::SkippedIncomplete(reading(None)));
        assert_eq!(count(&path), 1);
        drop(sink);

        // A restarted service keeps the earlier records
        let mut sink = JsonLinesSink::open(&path).unwrap();
        sink.report(&IngestEvent::SkippedIncomplete(reading(Some(21.0))));
        assert_eq!(count(&path), 2);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn composed_sinks_all_receive_events() {
        let mut sink: (Vec<IngestEvent>, Option<Vec<IngestEvent>>) = (Vec::new(), Some(Vec::new()));
        sink.report(&IngestEvent::RawUnrecognizedLine("x".to_string()));
        assert_eq!(sink.0.len(), 1);
        assert_eq!(sink.1.as_ref().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn channel_sink_forwards_events() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut sink = ChannelSink::new(tx);
        sink.report(&IngestEvent::LinkFault(LinkError::EndOfStream));
        assert_eq!(
            rx.recv().await,
            Some(IngestEvent::LinkFault(LinkError::EndOfStream))
        );

        drop(rx);
        sink.report(&IngestEvent::LinkFault(LinkError::EndOfStream));
    }

    #[test]
    fn event_exposes_its_reading() {
        let r = reading(None);
        assert_eq!(IngestEvent::SkippedIncomplete(r.clone()).reading(), Some(&r));
        assert_eq!(IngestEvent::RawUnrecognizedLine(String::new()).reading(), None);
    }
}
