use std::{
    fmt::Display,
    io::{self, BufReader, ErrorKind, Read, Write},
    net::{TcpListener, TcpStream, ToSocketAddrs},
    time::Duration,
};

use crate::XvcServer;
use xvc_protocol::error::ReadError;
use xvc_protocol::{Message, Version, XvcInfo};

#[derive(Debug, Clone)]
pub struct Config {
    /// Largest shift vector, in bytes, the server is willing to buffer.
    pub max_vector_size: u32,
    /// Vector length announced in the `getinfo` reply.
    pub advertised_vector_len: u32,
    pub read_write_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_vector_size: 10 * 1024 * 1024,
            advertised_vector_len: XvcInfo::DEFAULT_MAX_VECTOR_LEN,
            read_write_timeout: Duration::from_secs(30),
        }
    }
}

/// Reason a connection was closed early.
#[derive(Debug)]
pub enum ConnectionError<E> {
    Read(ReadError),
    Backend(E),
}

impl<E> From<ReadError> for ConnectionError<E> {
    fn from(value: ReadError) -> Self {
        ConnectionError::Read(value)
    }
}

impl<E> From<io::Error> for ConnectionError<E> {
    fn from(value: io::Error) -> Self {
        ConnectionError::Read(ReadError::IoError(value))
    }
}

impl<E: Display> Display for ConnectionError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionError::Read(err) => write!(f, "{}", err),
            ConnectionError::Backend(err) => write!(f, "Backend error: {}", err),
        }
    }
}

impl<E: std::error::Error> std::error::Error for ConnectionError<E> {}

/// Counts the bytes taken from the stream for the message being read.
struct MessageReader<R> {
    inner: R,
    consumed: usize,
}

impl<R: Read> Read for MessageReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.consumed += n;
        Ok(n)
    }
}

#[derive(Debug)]
pub struct Server<T: XvcServer> {
    server: T,
    config: Config,
}

/// Builder to create a [Server] instance and modify configuration options
///
/// # Example
///
/// ```ignore
/// use xvc_server::server::Builder;
/// use std::time::Duration;
///
/// let server = Builder::new()
///     .max_vector_size(1024)
///     .rw_timeout(Duration::from_secs(20))
///     .build(my_server);
/// ```
#[derive(Default)]
pub struct Builder {
    config: Config,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    /// Set the highest vector size that this server is expected to receive.
    pub fn max_vector_size(mut self, size: u32) -> Self {
        self.config.max_vector_size = size;
        self
    }

    /// Set the vector length announced to clients.
    pub fn advertised_vector_len(mut self, len: u32) -> Self {
        self.config.advertised_vector_len = len;
        self
    }

    /// Set the TCP read and write timeout
    pub fn rw_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_write_timeout = timeout;
        self
    }

    pub fn build<T: XvcServer>(self, server: T) -> Server<T> {
        Server::new(server, self.config)
    }
}

impl<T: XvcServer> Server<T> {
    pub fn new(server: T, config: Config) -> Server<T> {
        Server { server, config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn backend(&self) -> &T {
        &self.server
    }

    pub fn into_backend(self) -> T {
        self.server
    }

    pub fn listen(&mut self, addr: impl ToSocketAddrs) -> io::Result<()> {
        let listener = TcpListener::bind(addr)?;
        self.serve(listener)
    }

    /// Accepts connections on `listener` forever, serving one at a time.
    pub fn serve(&mut self, listener: TcpListener) -> io::Result<()> {
        log::info!("Server listening on {}", listener.local_addr()?);

        for stream in listener.incoming() {
            match stream {
                Ok(tcp) => {
                    if let Ok(addr) = tcp.peer_addr() {
                        log::info!("New client connection from {}", addr);
                    }
                    match self.handle_client(tcp) {
                        Ok(()) => log::info!("Client disconnected"),
                        Err(e) => log::error!("Client error: {}", e),
                    }
                }
                Err(e) => log::error!("Connection error: {}", e),
            }
        }
        Ok(())
    }

    fn handle_client(&mut self, tcp: TcpStream) -> Result<(), ConnectionError<T::Error>> {
        tcp.set_read_timeout(Some(self.config.read_write_timeout))?;
        tcp.set_write_timeout(Some(self.config.read_write_timeout))?;
        tcp.set_nodelay(true)?;
        let reader = BufReader::new(tcp.try_clone()?);
        self.serve_connection(reader, tcp)
    }

    /// Runs the protocol on one connection until the peer closes it.
    ///
    /// Returns `Ok` when the peer disconnects between messages.
    pub fn serve_connection(
        &mut self,
        reader: impl Read,
        mut writer: impl Write,
    ) -> Result<(), ConnectionError<T::Error>> {
        let mut reader = MessageReader {
            inner: reader,
            consumed: 0,
        };
        loop {
            reader.consumed = 0;
            match Message::from_reader(&mut reader, self.config.max_vector_size as usize) {
                Ok(message) => self.process_message(message, &mut writer)?,
                Err(ReadError::UnknownCommand(cmd)) => {
                    log::warn!("Ignoring unknown command '{}'", cmd);
                }
                Err(err) if err.is_disconnect() => return Ok(()),
                Err(ReadError::IoError(err))
                    if reader.consumed == 0
                        && matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) =>
                {
                    log::error!("Client read timeout, closing connection");
                    return Ok(());
                }
                Err(other) => return Err(other.into()),
            }
        }
    }

    /// Process each message, forwarding the implementation to the server.
    fn process_message(
        &mut self,
        message: Message,
        writer: &mut impl Write,
    ) -> Result<(), ConnectionError<T::Error>> {
        match message {
            Message::GetInfo => {
                log::debug!("Received GetInfo message");
                XvcInfo::new(Version::V1_0, self.config.advertised_vector_len).write_to(writer)?;
            }
            Message::SetTck { period_ns } => {
                log::debug!("Received SetTck message: period_ns={}", period_ns);
                let ret_period = self
                    .server
                    .set_tck(period_ns)
                    .map_err(ConnectionError::Backend)?;
                log::debug!("Set TCK returned: period_ns={}", ret_period);
                writer.write_all(&ret_period.to_le_bytes())?;
            }
            Message::Shift { num_bits: 0, .. } => {
                log::debug!("Received empty Shift message");
            }
            Message::Shift { num_bits, tms, tdi } => {
                log::debug!("Received Shift message: num_bits={}", num_bits);
                log::trace!("Shift TMS data: {:02x?}", &tms[..]);
                log::trace!("Shift TDI data: {:02x?}", &tdi[..]);
                let tdo = self
                    .server
                    .shift(num_bits, &tms, &tdi)
                    .map_err(ConnectionError::Backend)?;
                log::trace!("Shift result TDO data: {:02x?}", &tdo[..]);
                writer.write_all(&tdo)?;
            }
        }
        writer.flush()?;
        Ok(())
    }
}
