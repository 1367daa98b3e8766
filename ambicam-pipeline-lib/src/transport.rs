//! Connections to LED controllers.
//!
//! A [`Transport`] owns one connection and turns color vectors into wire
//! frames. Byte streams are opened through a [`Connector`] so the protocol
//! logic can be exercised against in-memory buffers.

use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use ambicam_wire_format::{encode_adalight, setcolor_command, EncodeError, HandshakeCommand};
use log::{debug, info, warn};

use crate::color::{quantize_all, Color};
use crate::config::ServerConfig;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Errors from connecting to or writing to an LED controller.
#[derive(Debug, derive_more::Display, derive_more::Error, derive_more::From)]
pub enum TransportError {
    #[display("I/O error: {_0}")]
    Io(std::io::Error),
    #[display("encoding failed: {_0}")]
    Encode(EncodeError),
    #[display("not connected")]
    NotConnected,
}

/// What happened to a color vector handed to [`Transport::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sent {
    Written,
    /// Identical to the previous frame, not re-sent
    Suppressed,
}

pub trait Transport: Send {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    fn connect(&mut self) -> Result<(), TransportError>;

    fn send(&mut self, colors: &[Color]) -> Result<Sent, TransportError>;

    /// Close the connection. Safe to call when not connected.
    fn disconnect(&mut self);
}

/// Opens the byte stream a transport writes to.
pub trait Connector: Send {
    type Stream: Write + Send;

    fn connect(&mut self) -> std::io::Result<Self::Stream>;

    /// Human-readable peer description for logs.
    fn describe(&self) -> String;
}

/// TCP connection to `host:port`.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    host: String,
    port: u16,
}

impl TcpConnector {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Connector for TcpConnector {
    type Stream = TcpStream;

    fn connect(&mut self) -> std::io::Result<TcpStream> {
        let mut last_err = None;
        for addr in (self.host.as_str(), self.port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} did not resolve to any address", self.host),
            )
        }))
    }

    fn describe(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Logs frames instead of sending them.
#[derive(Debug, Default)]
pub struct DummyTransport {
    frames: u64,
}

impl Transport for DummyTransport {
    fn name(&self) -> &'static str {
        "dummy"
    }

    fn connect(&mut self) -> Result<(), TransportError> {
        info!("Dummy transport connected");
        Ok(())
    }

    fn send(&mut self, colors: &[Color]) -> Result<Sent, TransportError> {
        self.frames += 1;
        debug!("Dummy frame {}: {:?}", self.frames, quantize_all(colors));
        Ok(Sent::Written)
    }

    fn disconnect(&mut self) {
        info!("Dummy transport disconnected after {} frames", self.frames);
    }
}

/// Adalight binary frames, typically to a TCP-to-serial bridge.
pub struct BridgeTransport<C: Connector = TcpConnector> {
    connector: C,
    stream: Option<C::Stream>,
}

impl<C: Connector> BridgeTransport<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            stream: None,
        }
    }
}

impl<C: Connector> Transport for BridgeTransport<C> {
    fn name(&self) -> &'static str {
        "bridge"
    }

    fn connect(&mut self) -> Result<(), TransportError> {
        info!("Connecting to Adalight bridge at {}", self.connector.describe());
        self.stream = Some(self.connector.connect()?);
        Ok(())
    }

    fn send(&mut self, colors: &[Color]) -> Result<Sent, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        let frame = encode_adalight(&quantize_all(colors))?;
        stream.write_all(&frame)?;
        Ok(Sent::Written)
    }

    fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.flush() {
                warn!("Bridge flush on disconnect failed: {e}");
            }
            info!("Disconnected from Adalight bridge");
        }
    }
}

/// Prismatik `setcolor:` line protocol, optionally wrapped in a
/// `lock` / `unlock` + `exit` session.
pub struct PrismatikTransport<C: Connector = TcpConnector> {
    connector: C,
    stream: Option<C::Stream>,
    handshake: bool,
    last_command: Option<String>,
}

impl<C: Connector> PrismatikTransport<C> {
    pub fn new(connector: C, handshake: bool) -> Self {
        Self {
            connector,
            stream: None,
            handshake,
            last_command: None,
        }
    }
}

impl<C: Connector> Transport for PrismatikTransport<C> {
    fn name(&self) -> &'static str {
        "prismatik"
    }

    fn connect(&mut self) -> Result<(), TransportError> {
        info!(
            "Connecting to Prismatik at {} (handshake: {})",
            self.connector.describe(),
            self.handshake
        );
        let mut stream = self.connector.connect()?;
        if self.handshake {
            stream.write_all(HandshakeCommand::Lock.as_bytes())?;
        }
        self.stream = Some(stream);
        self.last_command = None;
        Ok(())
    }

    fn send(&mut self, colors: &[Color]) -> Result<Sent, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        let command = setcolor_command(&quantize_all(colors));
        if self.last_command.as_deref() == Some(command.as_str()) {
            return Ok(Sent::Suppressed);
        }
        let mut line = Vec::with_capacity(command.len() + 1);
        line.extend_from_slice(command.as_bytes());
        line.push(b'\n');
        stream.write_all(&line)?;
        self.last_command = Some(command);
        Ok(Sent::Written)
    }

    fn disconnect(&mut self) {
        let Some(mut stream) = self.stream.take() else {
            return;
        };
        if self.handshake {
            for cmd in [HandshakeCommand::Unlock, HandshakeCommand::Exit] {
                if let Err(e) = stream.write_all(cmd.as_bytes()) {
                    warn!("Prismatik: failed to send {cmd:?}: {e}");
                    break;
                }
            }
        }
        if let Err(e) = stream.flush() {
            warn!("Prismatik flush on disconnect failed: {e}");
        }
        self.last_command = None;
        info!("Disconnected from Prismatik");
    }
}

/// Build the transport selected by the `server` config section.
#[must_use]
pub fn transport_from_config(server: &ServerConfig) -> Box<dyn Transport> {
    match server {
        ServerConfig::Dummy => Box::new(DummyTransport::default()),
        ServerConfig::Bridge { host, port } => {
            Box::new(BridgeTransport::new(TcpConnector::new(host.clone(), *port)))
        }
        ServerConfig::Prismatik {
            host,
            port,
            handshake,
        } => Box::new(PrismatikTransport::new(
            TcpConnector::new(host.clone(), *port),
            *handshake,
        )),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    use super::Connector;

    /// In-memory stream recording every `write` call.
    #[derive(Clone, Default)]
    pub(crate) struct MemoryStream {
        pub(crate) writes: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl MemoryStream {
        pub(crate) fn bytes(&self) -> Vec<u8> {
            self.writes.lock().unwrap().concat()
        }

        pub(crate) fn write_count(&self) -> usize {
            self.writes.lock().unwrap().len()
        }
    }

    impl Write for MemoryStream {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.writes.lock().unwrap().push(buf.to_vec());
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    pub(crate) struct MemoryConnector {
        pub(crate) stream: MemoryStream,
        pub(crate) refuse: bool,
    }

    impl Connector for MemoryConnector {
        type Stream = MemoryStream;

        fn connect(&mut self) -> std::io::Result<MemoryStream> {
            if self.refuse {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "refused",
                ));
            }
            Ok(self.stream.clone())
        }

        fn describe(&self) -> String {
            "memory".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MemoryConnector;
    use super::*;
    use crate::color::splat;
    use ambicam_wire_format::{AdalightHeader, FrameIter, RGB8};

    #[test]
    fn test_bridge_writes_adalight_frame() {
        let connector = MemoryConnector::default();
        let stream = connector.stream.clone();
        let mut transport = BridgeTransport::new(connector);
        transport.connect().unwrap();

        let colors = vec![
            Color {
                r: 255.0,
                g: 128.0,
                b: 0.0,
            },
            splat(12.7),
            splat(300.0),
        ];
        assert_eq!(transport.send(&colors).unwrap(), Sent::Written);

        let bytes = stream.bytes();
        assert_eq!(&bytes[..6], &AdalightHeader::new(3).unwrap().to_bytes());
        let frames: Vec<_> = FrameIter::new(bytes.as_slice())
            .map(Result::unwrap)
            .collect();
        assert_eq!(
            frames,
            vec![vec![
                RGB8::new(255, 128, 0),
                RGB8::new(12, 12, 12),
                RGB8::new(255, 255, 255)
            ]]
        );
    }

    #[test]
    fn test_bridge_rejects_empty_frame() {
        let mut transport = BridgeTransport::new(MemoryConnector::default());
        transport.connect().unwrap();
        assert!(matches!(
            transport.send(&[]),
            Err(TransportError::Encode(EncodeError::LedCount { count: 0 }))
        ));
    }

    #[test]
    fn test_send_before_connect() {
        let mut transport = BridgeTransport::new(MemoryConnector::default());
        assert!(matches!(
            transport.send(&[splat(1.0)]),
            Err(TransportError::NotConnected)
        ));
    }

    #[test]
    fn test_connect_refused() {
        let connector = MemoryConnector {
            refuse: true,
            ..MemoryConnector::default()
        };
        let mut transport = PrismatikTransport::new(connector, true);
        assert!(matches!(transport.connect(), Err(TransportError::Io(_))));
    }

    #[test]
    fn test_prismatik_suppresses_duplicates() {
        let connector = MemoryConnector::default();
        let stream = connector.stream.clone();
        let mut transport = PrismatikTransport::new(connector, false);
        transport.connect().unwrap();

        let colors = vec![splat(10.0), splat(20.4)];
        assert_eq!(transport.send(&colors).unwrap(), Sent::Written);
        assert_eq!(transport.send(&colors).unwrap(), Sent::Suppressed);
        // Differs only below integer resolution: same command
        assert_eq!(
            transport.send(&[splat(10.2), splat(20.0)]).unwrap(),
            Sent::Suppressed
        );

        assert_eq!(stream.write_count(), 1);
        assert_eq!(stream.bytes(), b"setcolor:1-10,10,10;2-20,20,20;\n");
    }

    #[test]
    fn test_prismatik_handshake() {
        let connector = MemoryConnector::default();
        let stream = connector.stream.clone();
        let mut transport = PrismatikTransport::new(connector, true);
        transport.connect().unwrap();
        transport.send(&[splat(1.0)]).unwrap();
        transport.disconnect();
        // Second disconnect is a no-op
        transport.disconnect();

        assert_eq!(
            String::from_utf8(stream.bytes()).unwrap(),
            "lock\nsetcolor:1-1,1,1;\nunlock\nexit\n"
        );
    }

    #[test]
    fn test_reconnect_resets_suppression() {
        let connector = MemoryConnector::default();
        let stream = connector.stream.clone();
        let mut transport = PrismatikTransport::new(connector, false);
        transport.connect().unwrap();
        transport.send(&[splat(1.0)]).unwrap();
        transport.disconnect();
        transport.connect().unwrap();
        assert_eq!(transport.send(&[splat(1.0)]).unwrap(), Sent::Written);
        assert_eq!(stream.write_count(), 2);
    }
}
