/// Read-parse-classify-report loop over one serial link
use log::{error, info, warn};
use tokio::time::{sleep, Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::LinkError;
use crate::models::SensorReading;
use crate::prediction::{classify, ClassifierHandle};
use crate::report::{IngestEvent, ReportSink};
use crate::serial::{Connector, LinkSettings, ReadingParser, SerialLink};

/// Prefixes of our own log output; an echo of these is not device data
pub const DEFAULT_SUPPRESSED_PREFIXES: [&str; 7] = [
    "[INFO]",
    "[ERROR]",
    "[WARN]",
    "[DEBUG]",
    "[FATAL]",
    "ESP32 Raw:",
    "RAW ESP32 Output",
];

/// Loop cadence and line triage settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestSettings {
    /// Yield between polls when the device is quiet
    pub idle_interval: Duration,
    /// Pause after a transport fault before any reconnect attempt
    pub fault_pause: Duration,
    pub suppressed_prefixes: Vec<String>,
}

impl Default for IngestSettings {
    fn default() -> Self {
        IngestSettings {
            idle_interval: Duration::from_millis(100),
            fault_pause: Duration::from_secs(2),
            suppressed_prefixes: DEFAULT_SUPPRESSED_PREFIXES
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    Retry { after: Duration },
    GiveUp,
}

/// Decides whether and when the loop tries to reopen a failed link.
///
/// `attempt` starts at 1 for each fault and grows while reconnects keep
/// failing; `error` is the most recent failure.
pub trait ReconnectHook {
    fn next_attempt(&mut self, attempt: u32, error: &LinkError) -> ReconnectDecision;
}

/// Up to `max_attempts` reconnects per fault, doubling the wait each time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundedBackoff {
    pub max_attempts: u32,
    pub base: Duration,
    pub max: Duration,
}

impl ReconnectHook for BoundedBackoff {
    fn next_attempt(&mut self, attempt: u32, _error: &LinkError) -> ReconnectDecision {
        if attempt == 0 || attempt > self.max_attempts {
            return ReconnectDecision::GiveUp;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        let after = self.base.saturating_mul(factor).min(self.max);
        ReconnectDecision::Retry { after }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Polling,
    Reconnecting,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Stop token was cancelled
    Stopped,
    /// The byte stream ended (replay file exhausted, port closed by peer)
    EndOfStream,
    /// The reconnect hook gave up
    ReconnectExhausted,
}

/// Counters over one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub lines: u64,
    pub classified: u64,
    pub skipped_incomplete: u64,
    pub classification_failures: u64,
    pub unrecognized: u64,
    pub suppressed: u64,
    pub link_faults: u64,
    pub reconnects: u64,
}

impl IngestStats {
    fn record(&mut self, event: &IngestEvent) {
        match event {
            IngestEvent::Classified(..) => self.classified += 1,
            IngestEvent::SkippedIncomplete(_) => self.skipped_incomplete += 1,
            IngestEvent::ClassificationFailed(..) => self.classification_failures += 1,
            IngestEvent::RawUnrecognizedLine(_) => self.unrecognized += 1,
            IngestEvent::SuppressedInternalLog(_) => self.suppressed += 1,
            IngestEvent::LinkFault(_) => self.link_faults += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestSummary {
    pub exit: ExitReason,
    pub stats: IngestStats,
}

/// Turn one line of device output into its reporting event
///
/// Complete readings are classified; readings with a sensor error token are
/// never sent to the model. Unparsed lines starting with one of
/// `suppressed_prefixes` are marked as echoed log output.
///
/// # Returns
/// None for blank lines, otherwise exactly one event
pub fn evaluate_line(
    parser: &ReadingParser,
    model: &ClassifierHandle,
    suppressed_prefixes: &[String],
    line: &str,
) -> Option<IngestEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let event = match parser.parse(line) {
        Some(reading) if reading.is_complete() => match classify(model, &reading) {
            Ok(result) => IngestEvent::Classified(reading, result),
            Err(e) => IngestEvent::ClassificationFailed(reading, e),
        },
        Some(reading) => IngestEvent::SkippedIncomplete(reading),
        None if suppressed_prefixes.iter().any(|p| line.starts_with(p.as_str())) => {
            IngestEvent::SuppressedInternalLog(line.to_string())
        }
        None => IngestEvent::RawUnrecognizedLine(line.to_string()),
    };
    Some(event)
}

/// Sleep unless stopped first. Returns true if the stop token fired.
async fn pause(duration: Duration, stop: &CancellationToken) -> bool {
    tokio::select! {
        _ = sleep(duration) => false,
        _ = stop.cancelled() => true,
    }
}

/// Continuous ingestion over one exclusively owned link
pub struct IngestLoop<C: Connector, S: ReportSink, H: ReconnectHook> {
    link: SerialLink<C>,
    parser: ReadingParser,
    model: ClassifierHandle,
    sink: S,
    hook: H,
    settings: IngestSettings,
    state: LoopState,
    stats: IngestStats,
}

impl<C: Connector, S: ReportSink, H: ReconnectHook> IngestLoop<C, S, H> {
    pub fn new(
        link: SerialLink<C>,
        parser: ReadingParser,
        model: ClassifierHandle,
        sink: S,
        hook: H,
        settings: IngestSettings,
    ) -> Self {
        IngestLoop {
            link,
            parser,
            model,
            sink,
            hook,
            settings,
            state: LoopState::Idle,
            stats: IngestStats::default(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn link(&self) -> &SerialLink<C> {
        &self.link
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Connect, then poll until stopped, the stream ends, or reconnects give up
    ///
    /// The stop token is checked between reads; a read already in progress
    /// finishes (bounded by the read timeout) before the loop notices.
    /// The link is disconnected exactly once on return, whatever the exit path.
    ///
    /// # Arguments
    /// * `link_settings` - Port settings for the initial connect and later reconnects
    /// * `stop` - Cooperative stop signal
    ///
    /// # Returns
    /// Why the loop ended and the counters for the run
    pub async fn run(
        &mut self,
        link_settings: LinkSettings,
        stop: &CancellationToken,
    ) -> IngestSummary {
        info!("Starting SACI ingestion loop");

        let exit = self.drive(link_settings, stop).await;

        self.link.disconnect();
        self.state = LoopState::Stopped;
        self.log_summary(exit);

        IngestSummary {
            exit,
            stats: self.stats.clone(),
        }
    }

    async fn drive(
        &mut self,
        link_settings: LinkSettings,
        stop: &CancellationToken,
    ) -> ExitReason {
        let read_timeout = link_settings.read_timeout;
        self.state = LoopState::Idle;

        let connected = tokio::select! {
            result = self.link.connect(link_settings) => result,
            _ = stop.cancelled() => return ExitReason::Stopped,
        };
        if let Err(e) = connected {
            if let Some(exit) = self.recover(e, stop).await {
                return exit;
            }
        }

        loop {
            if stop.is_cancelled() {
                return ExitReason::Stopped;
            }
            self.state = LoopState::Polling;

            match self.link.read_line(read_timeout).await {
                Ok(Some(line)) => self.process_line(&line),
                Ok(None) => {
                    // Nothing pending; yield before polling again
                    if pause(self.settings.idle_interval, stop).await {
                        return ExitReason::Stopped;
                    }
                }
                Err(LinkError::EndOfStream) => {
                    info!("Serial stream ended");
                    return ExitReason::EndOfStream;
                }
                Err(e) => {
                    if let Some(exit) = self.recover(e, stop).await {
                        return exit;
                    }
                }
            }
        }
    }

    /// Report the failure, pause, then reconnect as the hook allows.
    /// Returns None once the link is connected again.
    async fn recover(
        &mut self,
        error: LinkError,
        stop: &CancellationToken,
    ) -> Option<ExitReason> {
        self.state = LoopState::Reconnecting;
        self.emit(IngestEvent::LinkFault(error.clone()));

        if pause(self.settings.fault_pause, stop).await {
            return Some(ExitReason::Stopped);
        }

        let mut attempt = 1;
        let mut last_error = error;
        loop {
            let after = match self.hook.next_attempt(attempt, &last_error) {
                ReconnectDecision::Retry { after } => after,
                ReconnectDecision::GiveUp => {
                    error!(
                        "Giving up on serial link after {} reconnect attempts",
                        attempt - 1
                    );
                    return Some(ExitReason::ReconnectExhausted);
                }
            };

            if pause(after, stop).await {
                return Some(ExitReason::Stopped);
            }

            info!("Reconnect attempt {}", attempt);
            let result = tokio::select! {
                result = self.link.reconnect() => result,
                _ = stop.cancelled() => return Some(ExitReason::Stopped),
            };
            match result {
                Ok(()) => {
                    self.stats.reconnects += 1;
                    return None;
                }
                Err(e) => {
                    warn!("Reconnect attempt {} failed: {}", attempt, e);
                    self.emit(IngestEvent::LinkFault(e.clone()));
                    last_error = e;
                    attempt += 1;
                }
            }
        }
    }

    fn process_line(&mut self, line: &str) {
        let event = evaluate_line(
            &self.parser,
            &self.model,
            &self.settings.suppressed_prefixes,
            line,
        );
        if let Some(event) = event {
            self.stats.lines += 1;
            self.emit(event);
        }
    }

    fn emit(&mut self, event: IngestEvent) {
        self.stats.record(&event);
        self.sink.report(&event);
    }

    fn log_summary(&self, exit: ExitReason) {
        let s = &self.stats;
        info!("Ingestion stopped: {:?}", exit);
        info!("  Lines processed: {}", s.lines);
        info!("  Classified readings: {}", s.classified);
        info!("  Incomplete readings skipped: {}", s.skipped_incomplete);
        info!("  Classification failures: {}", s.classification_failures);
        info!("  Unrecognized lines: {}", s.unrecognized);
        info!("  Suppressed log echoes: {}", s.suppressed);
        info!("  Link faults: {}", s.link_faults);
        info!("  Reconnects: {}", s.reconnects);
    }
}

/// Result of a connection probe
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    /// A telemetry line arrived and parsed
    Parsed(SensorReading),
    /// Nothing arrived within the window
    NoData,
    /// Lines arrived but none was telemetry
    Unrecognized { lines: usize },
}

/// Check that a connected link carries telemetry
///
/// Reads for at most `window` and stops at the first line that parses.
/// Useful to verify port, baud rate and firmware output format before
/// starting ingestion.
pub async fn probe<C: Connector>(
    link: &mut SerialLink<C>,
    parser: &ReadingParser,
    window: Duration,
) -> Result<ProbeOutcome, LinkError> {
    let read_timeout = link
        .settings()
        .map_or(window, |s| s.read_timeout)
        .min(window);
    let deadline = Instant::now() + window;
    let mut lines = 0;

    info!("Testing connection for up to {:?}", window);
    while Instant::now() < deadline {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let Some(line) = link.read_line(read_timeout.min(remaining)).await? else {
            continue;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        lines += 1;
        info!("Probe received line: \"{}\"", line);
        if let Some(reading) = parser.parse(line) {
            info!("Connection test passed: valid sensor data received");
            return Ok(ProbeOutcome::Parsed(reading));
        }
    }

    if lines == 0 {
        warn!("No data was received from the serial port during the probe window");
        Ok(ProbeOutcome::NoData)
    } else {
        warn!(
            "Received {} lines, but none matched the expected sensor data format",
            lines
        );
        Ok(ProbeOutcome::Unrecognized { lines })
    }
}
