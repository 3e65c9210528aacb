//! Line transport for low-level controller communication
//!
//! Provides async line-oriented I/O over TCP or a serial port. Framing is
//! one request line out, one response line back, both `\r\n` terminated.
//! Deadlines are applied by the session manager, not here.

use async_trait::async_trait;
use breezart_core::{BreezartError, Result};
use std::io::ErrorKind;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::TcpStream;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, error, warn};

/// Line terminator appended to every request
pub const LINE_SUFFIX: &str = "\r\n";

/// Trait for transport abstraction
///
/// This trait enables testing of the session manager without a real
/// controller by allowing mock implementations.
#[async_trait]
pub trait Transport: Send {
    /// Send a request line and wait for the response line
    async fn transaction(&mut self, request: &str) -> Result<String>;

    /// Close the transport (best-effort)
    async fn shutdown(&mut self);

    /// Human-readable peer description for logs
    fn peer(&self) -> &str;
}

/// Opens transports to one controller
///
/// A session manager owns exactly one connector and asks it for a fresh
/// transport on every connect.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new transport
    async fn connect(&self) -> Result<Box<dyn Transport>>;

    /// Human-readable target description for logs
    fn describe(&self) -> String;
}

/// Line driver over any byte stream
pub struct LineDriver<S> {
    stream: BufReader<S>,
    peer: String,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> LineDriver<S> {
    /// Wrap an open stream
    pub fn new(stream: S, peer: impl Into<String>) -> Self {
        Self {
            stream: BufReader::new(stream),
            peer: peer.into(),
        }
    }

    /// Send a request line
    async fn send(&mut self, request: &str) -> Result<()> {
        let line = format!("{}{}", request, LINE_SUFFIX);
        let writer = self.stream.get_mut();

        writer.write_all(line.as_bytes()).await.map_err(|e| {
            error!("Write to {} failed: {}", self.peer, e);
            io_error("Write failed", e)
        })?;

        // Flush to ensure data is sent
        writer
            .flush()
            .await
            .map_err(|e| io_error("Flush failed", e))?;

        Ok(())
    }

    /// Read lines until a non-empty one arrives
    ///
    /// A line that is not valid UTF-8 is consumed whole and reported as a
    /// protocol error, so the stream stays aligned for the next request.
    async fn read_response(&mut self) -> Result<String> {
        loop {
            let mut raw = Vec::new();
            match self.stream.read_until(b'\n', &mut raw).await {
                Ok(0) => {
                    warn!("{} closed the connection", self.peer);
                    return Err(BreezartError::DeviceDisconnected(format!(
                        "{} closed the connection",
                        self.peer
                    )));
                }
                Ok(_) => {
                    let line = String::from_utf8(raw).map_err(|e| {
                        warn!("Undecodable line from {}: {:?}", self.peer, e.as_bytes());
                        BreezartError::Protocol(format!("Response is not valid UTF-8: {}", e))
                    })?;
                    let line = line.trim();
                    if !line.is_empty() {
                        return Ok(line.to_string());
                    }
                }
                Err(e) => {
                    error!("Read from {} failed: {}", self.peer, e);
                    return Err(io_error("Read failed", e));
                }
            }
        }
    }

    /// Drop bytes left over from an earlier exchange
    fn discard_buffered(&mut self) {
        let pending = self.stream.buffer().len();
        if pending > 0 {
            warn!("Discarding {} stale bytes from {}", pending, self.peer);
            Pin::new(&mut self.stream).consume(pending);
        }
    }
}

#[async_trait]
impl<S: AsyncRead + AsyncWrite + Unpin + Send> Transport for LineDriver<S> {
    async fn transaction(&mut self, request: &str) -> Result<String> {
        self.discard_buffered();
        self.send(request).await?;
        self.read_response().await
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.stream.get_mut().shutdown().await {
            debug!("Shutdown of {} failed: {}", self.peer, e);
        }
    }

    fn peer(&self) -> &str {
        &self.peer
    }
}

/// Map an I/O error, separating peer disconnects from other failures
fn io_error(context: &str, e: std::io::Error) -> BreezartError {
    match e.kind() {
        ErrorKind::BrokenPipe
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::UnexpectedEof => {
            BreezartError::DeviceDisconnected(format!("{}: {}", context, e))
        }
        _ => BreezartError::Io(e),
    }
}

/// Connector for controllers reachable over TCP
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: String,
}

impl TcpConnector {
    /// `address` is a `host:port` string
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>> {
        debug!("Opening TCP connection to {}", self.address);

        let stream = TcpStream::connect(&self.address).await.map_err(|e| {
            warn!("Failed to connect to {}: {}", self.address, e);
            BreezartError::Connection(format!("Failed to connect to {}: {}", self.address, e))
        })?;

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY: {}", e);
        }

        Ok(Box::new(LineDriver::new(stream, self.address.clone())))
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.address)
    }
}

/// Connector for controllers attached to a serial line
#[derive(Debug, Clone)]
pub struct SerialConnector {
    port_path: String,
    baud_rate: u32,
    timeout: Duration,
}

impl SerialConnector {
    /// Create a serial connector
    ///
    /// # Arguments
    /// * `port_path` - Path to the serial device (e.g., "/dev/ttyUSB0")
    /// * `baud_rate` - Line speed
    /// * `timeout` - Driver-level read/write timeout
    pub fn new(port_path: impl Into<String>, baud_rate: u32, timeout: Duration) -> Self {
        Self {
            port_path: port_path.into(),
            baud_rate,
            timeout,
        }
    }
}

#[async_trait]
impl Connector for SerialConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>> {
        debug!("Opening serial port: {}", self.port_path);

        let port: SerialStream = tokio_serial::new(self.port_path.as_str(), self.baud_rate)
            .timeout(self.timeout)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| {
                error!("Failed to open serial port {}: {}", self.port_path, e);
                BreezartError::Connection(format!("Failed to open serial port: {}", e))
            })?;

        debug!("Serial port opened successfully");

        Ok(Box::new(LineDriver::new(port, self.port_path.clone())))
    }

    fn describe(&self) -> String {
        format!("serial://{}@{}", self.port_path, self.baud_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use breezart_core::is_session_fatal;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_transaction_writes_suffix_and_reads_line() {
        let mock = Builder::new()
            .write(b"VSt07\r\n")
            .read(b"VSt07_1_4\r\n")
            .build();

        let mut driver = LineDriver::new(mock, "mock");
        let response = driver.transaction("VSt07").await.unwrap();

        assert_eq!(response, "VSt07_1_4");
    }

    #[tokio::test]
    async fn test_blank_lines_are_skipped() {
        let mock = Builder::new()
            .write(b"VPr07\r\n")
            .read(b"\r\n\r\nVPr07_1_A\r\n")
            .build();

        let mut driver = LineDriver::new(mock, "mock");
        assert_eq!(driver.transaction("VPr07").await.unwrap(), "VPr07_1_A");
    }

    #[tokio::test]
    async fn test_response_split_across_reads() {
        let mock = Builder::new()
            .write(b"VWPwr_1\r\n")
            .read(b"VWPwr")
            .read(b"_OK\r\n")
            .build();

        let mut driver = LineDriver::new(mock, "mock");
        assert_eq!(driver.transaction("VWPwr_1").await.unwrap(), "VWPwr_OK");
    }

    #[tokio::test]
    async fn test_eof_is_disconnect() {
        let mock = Builder::new().write(b"VSt07\r\n").build();

        let mut driver = LineDriver::new(mock, "mock");
        let result = driver.transaction("VSt07").await;

        assert!(matches!(
            result,
            Err(BreezartError::DeviceDisconnected(_))
        ));
    }

    #[tokio::test]
    async fn test_read_error_is_reported() {
        let mock = Builder::new()
            .write(b"VSt07\r\n")
            .read_error(std::io::Error::new(ErrorKind::ConnectionReset, "reset"))
            .build();

        let mut driver = LineDriver::new(mock, "mock");
        let result = driver.transaction("VSt07").await;

        assert!(matches!(
            result,
            Err(BreezartError::DeviceDisconnected(_))
        ));
    }

    #[tokio::test]
    async fn test_stale_lines_are_discarded() {
        // Two lines arrive in one read: the second is left in the buffer
        let mock = Builder::new()
            .write(b"VSt07\r\n")
            .read(b"VSt07_1_4\r\nVSt07_0_1\r\n")
            .write(b"VPr07\r\n")
            .read(b"VPr07_1_6\r\n")
            .build();

        let mut driver = LineDriver::new(mock, "mock");
        assert_eq!(driver.transaction("VSt07").await.unwrap(), "VSt07_1_4");
        assert_eq!(driver.transaction("VPr07").await.unwrap(), "VPr07_1_6");
    }

    #[tokio::test]
    async fn test_non_utf8_line_is_protocol_error() {
        let mock = Builder::new()
            .write(b"VSt07\r\n")
            .read(b"VSt07_\xff_1\r\n")
            .write(b"VSt07\r\n")
            .read(b"VSt07_1_4\r\n")
            .build();

        let mut driver = LineDriver::new(mock, "mock");
        let result = driver.transaction("VSt07").await;

        match result {
            Err(e @ BreezartError::Protocol(_)) => assert!(!is_session_fatal(&e)),
            other => panic!("Expected protocol error, got {:?}", other),
        }
        // The bad line was consumed; the next exchange lines up
        assert_eq!(driver.transaction("VSt07").await.unwrap(), "VSt07_1_4");
    }

    #[test]
    fn test_io_error_mapping() {
        let err = io_error("Write failed", std::io::Error::from(ErrorKind::BrokenPipe));
        assert!(matches!(err, BreezartError::DeviceDisconnected(_)));

        let err = io_error("Write failed", std::io::Error::from(ErrorKind::PermissionDenied));
        assert!(matches!(err, BreezartError::Io(_)));
    }

    #[tokio::test]
    async fn test_tcp_connector_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 7];
            socket.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"VSt07\r\n");
            socket.write_all(b"VSt07_3_2\r\n").await.unwrap();
        });

        let connector = TcpConnector::new(address.clone());
        assert_eq!(connector.describe(), format!("tcp://{}", address));

        let mut transport = connector.connect().await.unwrap();
        assert_eq!(transport.peer(), address);
        assert_eq!(transport.transaction("VSt07").await.unwrap(), "VSt07_3_2");
        transport.shutdown().await;

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_tcp_connector_refused() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = TcpConnector::new(address).connect().await;
        assert!(matches!(result, Err(BreezartError::Connection(_))));
    }

    #[test]
    fn test_serial_connector_describe() {
        let connector = SerialConnector::new("/dev/ttyUSB0", 9600, Duration::from_secs(1));
        assert_eq!(connector.describe(), "serial:///dev/ttyUSB0@9600");
    }
}
