/// Serial link lifecycle: connect, read lines, fault and disconnect
use log::{debug, error, info, warn};
use std::fmt;
use std::io;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::time::{sleep, timeout, Duration};
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, StopBits};

use crate::error::LinkError;

/// Longest run of bytes held while waiting for a line terminator
pub const DEFAULT_MAX_LINE_LEN: usize = 4096;

/// Where and how to open the link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSettings {
    pub port: String,
    pub baud_rate: u32,
    /// Upper bound for a single `read_line` call
    pub read_timeout: Duration,
    /// Wait after opening the port while the device finishes booting
    pub settle_delay: Duration,
    /// Bytes without a terminator beyond this are handed out as a line of their own
    pub max_line_len: usize,
}

impl LinkSettings {
    pub fn new(port: impl Into<String>, baud_rate: u32, read_timeout: Duration) -> Self {
        LinkSettings {
            port: port.into(),
            baud_rate,
            read_timeout,
            settle_delay: Duration::from_secs(2),
            max_line_len: DEFAULT_MAX_LINE_LEN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    /// Hard transport error; only `connect` leaves this state
    Faulted,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// Opens the byte stream behind a link
pub trait Connector: Send {
    type Stream: AsyncRead + Unpin + Send;

    fn open(&mut self, settings: &LinkSettings) -> io::Result<Self::Stream>;
}

/// Opens a real serial port, 8N1
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialConnector;

impl Connector for SerialConnector {
    type Stream = tokio_serial::SerialStream;

    fn open(&mut self, settings: &LinkSettings) -> io::Result<Self::Stream> {
        tokio_serial::new(&settings.port, settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(settings.read_timeout)
            .open_native_async()
            .map_err(io::Error::from)
    }
}

/// Replays captured device output from a text file instead of a port.
///
/// The file path replaces the port name; baud rate is ignored.
#[derive(Debug, Clone)]
pub struct ReplayConnector {
    path: PathBuf,
}

impl ReplayConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ReplayConnector { path: path.into() }
    }
}

impl Connector for ReplayConnector {
    type Stream = tokio::fs::File;

    fn open(&mut self, _settings: &LinkSettings) -> io::Result<Self::Stream> {
        let file = std::fs::File::open(&self.path)?;
        Ok(tokio::fs::File::from_std(file))
    }
}

/// Owns one connection to the sensor node.
///
/// Bytes read before a line terminator arrives stay buffered across calls,
/// so a read timeout never splits or drops a line.
pub struct SerialLink<C: Connector> {
    connector: C,
    settings: Option<LinkSettings>,
    state: LinkState,
    reader: Option<BufReader<C::Stream>>,
    pending: Vec<u8>,
}

impl<C: Connector> SerialLink<C> {
    pub fn new(connector: C) -> Self {
        SerialLink {
            connector,
            settings: None,
            state: LinkState::Disconnected,
            reader: None,
            pending: Vec::new(),
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn settings(&self) -> Option<&LinkSettings> {
        self.settings.as_ref()
    }

    /// Open the link and wait for the device to settle
    ///
    /// Callable from any state; an open stream is released first, which makes
    /// this the explicit way out of `Faulted`.
    ///
    /// # Arguments
    /// * `settings` - Port, baud rate, read timeout and settle delay; kept for `reconnect`
    ///
    /// # Returns
    /// Ok once `Connected`, or `LinkError::ConnectFailed` with the link back in `Disconnected`
    pub async fn connect(&mut self, settings: LinkSettings) -> Result<(), LinkError> {
        self.release();
        self.state = LinkState::Connecting;
        debug!("Opening {} at {} baud", settings.port, settings.baud_rate);

        let stream = match self.connector.open(&settings) {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to connect to {}: {}", settings.port, e);
                self.state = LinkState::Disconnected;
                self.settings = Some(settings);
                return Err(LinkError::ConnectFailed {
                    reason: e.to_string(),
                });
            }
        };

        // Device boot settling
        if !settings.settle_delay.is_zero() {
            sleep(settings.settle_delay).await;
        }

        info!(
            "Successfully connected to {} at {} baud",
            settings.port, settings.baud_rate
        );
        self.reader = Some(BufReader::new(stream));
        self.settings = Some(settings);
        self.state = LinkState::Connected;
        Ok(())
    }

    /// Connect again with the settings of the last `connect` call
    pub async fn reconnect(&mut self) -> Result<(), LinkError> {
        match self.settings.clone() {
            Some(settings) => self.connect(settings).await,
            None => Err(LinkError::ConnectFailed {
                reason: "link was never configured".to_string(),
            }),
        }
    }

    /// Read one line, waiting at most `wait`
    ///
    /// Returns `Ok(None)` when nothing complete arrived in time. Invalid UTF-8
    /// is replaced rather than rejected. A run of `max_line_len` bytes with no
    /// terminator is returned as a line as it stands, so noise at a wrong baud
    /// rate surfaces instead of piling up. A hard I/O error moves the link to
    /// `Faulted`; end of stream moves it to `Disconnected`.
    pub async fn read_line(&mut self, wait: Duration) -> Result<Option<String>, LinkError> {
        if self.state != LinkState::Connected {
            return Err(LinkError::NotConnected);
        }
        let max_line_len = self
            .settings
            .as_ref()
            .map_or(DEFAULT_MAX_LINE_LEN, |s| s.max_line_len)
            .max(1);
        if self.pending.len() >= max_line_len {
            return Ok(Some(self.take_oversized(max_line_len)));
        }
        let Some(reader) = self.reader.as_mut() else {
            return Err(LinkError::NotConnected);
        };

        let limit = (max_line_len - self.pending.len()) as u64;
        let mut bounded = reader.take(limit);
        let result = timeout(wait, bounded.read_until(b'\n', &mut self.pending)).await;
        match result {
            // Quiescent device; partial bytes stay in `pending`
            Err(_elapsed) => Ok(None),
            Ok(Ok(0)) => {
                if self.pending.is_empty() {
                    info!("Serial stream closed by peer");
                    self.release();
                    self.state = LinkState::Disconnected;
                    Err(LinkError::EndOfStream)
                } else {
                    Ok(Some(self.take_line()))
                }
            }
            Ok(Ok(_))
                if self.pending.last() != Some(&b'\n') && self.pending.len() >= max_line_len =>
            {
                Ok(Some(self.take_oversized(max_line_len)))
            }
            // Either a full line, or the last unterminated line before EOF
            Ok(Ok(_)) => Ok(Some(self.take_line())),
            Ok(Err(e)) => {
                error!("Serial communication error: {}", e);
                self.release();
                self.state = LinkState::Faulted;
                Err(LinkError::transport(&e))
            }
        }
    }

    /// Release the port. Safe to call in any state, any number of times.
    pub fn disconnect(&mut self) {
        if self.reader.is_some() {
            info!("Serial connection closed");
        } else {
            debug!("Serial connection was not open or already closed");
        }
        self.release();
        self.state = LinkState::Disconnected;
    }

    fn release(&mut self) {
        self.reader = None;
        self.pending.clear();
    }

    fn take_oversized(&mut self, max_line_len: usize) -> String {
        warn!(
            "No line terminator within {} bytes; passing the data on as one line",
            max_line_len
        );
        self.take_line()
    }

    fn take_line(&mut self) -> String {
        let mut bytes = std::mem::take(&mut self.pending);
        if bytes.last() == Some(&b'\n') {
            bytes.pop();
        }
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
        decode_lossy(bytes)
    }
}

/// Decode device bytes, replacing invalid UTF-8 sequences
pub fn decode_lossy(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            let bytes = e.into_bytes();
            warn!(
                "Unicode decode error for line, raw bytes: {:?}",
                &bytes[..bytes.len().min(100)]
            );
            String::from_utf8_lossy(&bytes).into_owned()
        }
    }
}
