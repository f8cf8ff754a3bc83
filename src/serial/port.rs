use crate::error::{BridgeError, Result};
use log::{debug, info, warn};
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf,
};
use tokio::time::{Duration, timeout};
use tokio_serial::SerialPortBuilderExt;
pub use tokio_serial::{DataBits, FlowControl, Parity, SerialStream, StopBits};

/// serial port baud rate
pub const COMMON_BAUD_RATES: &[u32] = &[
    4800, 9600, 19200, 38400, 57600, 115200, 230400, 460800, 500000, 576000, 921600, 1000000,
    1500000, 2000000,
];

/// unterminated runs longer than this are handed out as a line of their own
pub const MAX_LINE_LEN: usize = 4096;

/// serial port settings
#[derive(Clone, Debug)]
pub struct PortSettings {
    pub port_name: String,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub flow_control: FlowControl,
    /// how long one line read waits before reporting "no line yet"
    pub timeout: Duration,
    /// upper bound for one write to the device
    pub write_timeout: Duration,
}

/// serial port settings implementation
impl PortSettings {
    /// serial port settings initialization
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        PortSettings {
            port_name: port_name.into(),
            baud_rate,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            flow_control: FlowControl::None,
            timeout: Duration::from_millis(100),
            write_timeout: Duration::from_secs(1),
        }
    }

    /// is the baud rate one of [`COMMON_BAUD_RATES`]
    pub fn is_common_baud_rate(&self) -> bool {
        COMMON_BAUD_RATES.contains(&self.baud_rate)
    }

    /// line setup in the usual `9600 8N1` notation
    pub fn line_setup(&self) -> String {
        let data = match self.data_bits {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        };
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
        };
        let stop = match self.stop_bits {
            StopBits::One => 1,
            StopBits::Two => 2,
        };
        format!("{} {}{}{}", self.baud_rate, data, parity, stop)
    }
}

impl Default for PortSettings {
    fn default() -> Self {
        #[cfg(windows)]
        let port_name = "COM3";
        #[cfg(not(windows))]
        let port_name = "/dev/ttyUSB0";
        PortSettings::new(port_name, 9600)
    }
}

/// An open serial device, before it is split between the reading and the
/// writing task.
pub struct SerialChannel<S = SerialStream> {
    stream: S,
    port_name: String,
    poll_interval: Duration,
    write_timeout: Duration,
}

impl SerialChannel<SerialStream> {
    /// open serial port
    pub fn open(settings: &PortSettings) -> Result<Self> {
        let stream = tokio_serial::new(settings.port_name.as_str(), settings.baud_rate)
            .data_bits(settings.data_bits)
            .parity(settings.parity)
            .stop_bits(settings.stop_bits)
            .flow_control(settings.flow_control)
            .timeout(settings.timeout)
            .open_native_async()
            .map_err(|e| BridgeError::port_open(&settings.port_name, e.to_string()))?;
        info!(
            "Opened serial port {} ({})",
            settings.port_name,
            settings.line_setup()
        );
        Ok(Self::from_stream(stream, settings))
    }
}

impl<S> SerialChannel<S>
where
    S: AsyncRead + AsyncWrite,
{
    /// Wraps an already open byte stream, such as a pty or an in-memory pipe.
    pub fn from_stream(stream: S, settings: &PortSettings) -> Self {
        SerialChannel {
            stream,
            port_name: settings.port_name.clone(),
            poll_interval: settings.timeout,
            write_timeout: settings.write_timeout,
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Splits the device into its line reader and its writer. The device is
    /// released once both halves are closed or dropped.
    pub fn into_split(self) -> (SerialLineReader<S>, SerialWriter<S>) {
        let (rx, tx) = tokio::io::split(self.stream);
        let reader = SerialLineReader {
            reader: Some(BufReader::new(rx)),
            pending: Vec::with_capacity(256),
            poll_interval: self.poll_interval,
            port_name: self.port_name.clone(),
        };
        let writer = SerialWriter {
            writer: Some(tx),
            write_timeout: self.write_timeout,
            port_name: self.port_name,
        };
        (reader, writer)
    }
}

/// Reading half of a [`SerialChannel`].
pub struct SerialLineReader<S> {
    reader: Option<BufReader<ReadHalf<S>>>,
    /// bytes of a line that has not been terminated yet
    pending: Vec<u8>,
    poll_interval: Duration,
    port_name: String,
}

impl<S: AsyncRead> SerialLineReader<S> {
    /// Waits up to the poll interval for a complete line.
    ///
    /// Returns the line with its terminator, or `None` if no full line arrived
    /// in time. Partial data is kept for the next call, so the returned future
    /// may be dropped at any point without losing bytes.
    ///
    /// # Errors
    ///
    /// End of stream or an OS error; the device should be considered gone.
    pub async fn read_line(&mut self) -> Result<Option<Vec<u8>>> {
        let SerialLineReader {
            reader,
            pending,
            poll_interval,
            port_name,
        } = self;
        let reader = reader.as_mut().ok_or(BridgeError::PortClosed)?;

        let read = timeout(*poll_interval, async {
            loop {
                let available = reader.fill_buf().await?;
                if available.is_empty() {
                    return Ok::<bool, std::io::Error>(false);
                }
                let (used, terminated) = match available.iter().position(|b| *b == b'\n') {
                    Some(i) => (i + 1, true),
                    None => (available.len(), false),
                };
                pending.extend_from_slice(&available[..used]);
                reader.consume(used);
                if terminated || pending.len() >= MAX_LINE_LEN {
                    return Ok(true);
                }
            }
        })
        .await;

        match read {
            Err(_elapsed) => Ok(None),
            Ok(Ok(true)) => {
                if !pending.ends_with(b"\n") {
                    warn!(
                        "{}: {} bytes without a line ending, passing them on as one line",
                        port_name,
                        pending.len()
                    );
                }
                Ok(Some(std::mem::take(pending)))
            }
            Ok(Ok(false)) => Err(BridgeError::port_read(format!(
                "{} reached end of stream",
                port_name
            ))),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
            Ok(Err(e)) => Err(BridgeError::port_read(format!("{}: {}", port_name, e))),
        }
    }

    /// Releases the reading half. Returns `false` if it was already closed.
    pub fn close(&mut self) -> bool {
        match self.reader.take() {
            Some(_) => {
                debug!("{}: reader closed", self.port_name);
                self.pending.clear();
                true
            }
            None => false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }
}

/// Writing half of a [`SerialChannel`].
pub struct SerialWriter<S> {
    writer: Option<WriteHalf<S>>,
    write_timeout: Duration,
    port_name: String,
}

impl<S: AsyncWrite> SerialWriter<S> {
    /// Best-effort write of `data` to the device. Failures are logged and
    /// otherwise ignored.
    pub async fn write(&mut self, data: &[u8]) {
        if let Err(e) = self.try_write(data).await {
            warn!("{}: dropped {} bytes: {}", self.port_name, data.len(), e);
        }
    }

    /// Writes and flushes `data` within the write timeout.
    pub async fn try_write(&mut self, data: &[u8]) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(BridgeError::PortClosed)?;
        let io = async {
            writer.write_all(data).await?;
            writer.flush().await
        };
        match timeout(self.write_timeout, io).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(BridgeError::port_write(e.to_string())),
            Err(_) => Err(BridgeError::port_write(format!(
                "timed out after {:?}",
                self.write_timeout
            ))),
        }
    }

    /// Flushes and releases the writing half. Returns `false` if it was
    /// already closed.
    pub async fn close(&mut self) -> bool {
        match self.writer.take() {
            Some(mut writer) => {
                if let Ok(Err(e)) = timeout(self.write_timeout, writer.shutdown()).await {
                    debug!("{}: shutdown failed: {}", self.port_name, e);
                }
                debug!("{}: writer closed", self.port_name);
                true
            }
            None => false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }
}
