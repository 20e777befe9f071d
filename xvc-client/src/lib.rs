//! # XVC Client
//!
//! A small blocking client for Xilinx Virtual Cable (XVC) servers, used to
//! drive a server from automation and tests.
//!
//! ## Basic Usage
//!
//! ```ignore
//! use xvc_client::XvcClient;
//!
//! let mut client = XvcClient::new("127.0.0.1:2542")?;
//!
//! let info = client.get_info()?;
//! println!("Server version: {}", info.version());
//! println!("Max vector size: {} bytes", info.max_vector_len());
//!
//! // The server echoes the requested period
//! let period = client.set_tck(100)?;
//!
//! // Five clocks in Test-Logic-Reset, then one to Run-Test/Idle
//! let tdo = client.shift(6, &[0x1f], &[0x00])?;
//! ```
use std::{
    io::{self, Read},
    net::{TcpStream, ToSocketAddrs},
    time::Duration,
};

use xvc_protocol::{Message, XvcInfo, error::ReadError, vector_bytes};

/// XVC client for remote JTAG operations.
pub struct XvcClient {
    tcp: TcpStream,
}

impl XvcClient {
    pub fn new(addr: impl ToSocketAddrs) -> io::Result<XvcClient> {
        let tcp = TcpStream::connect(addr)?;
        tcp.set_nodelay(true)?;
        Ok(XvcClient { tcp })
    }

    /// Bounds how long a single reply may take to arrive.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.tcp.set_read_timeout(timeout)
    }

    /// Query server capabilities and version information.
    pub fn get_info(&mut self) -> Result<XvcInfo, ReadError> {
        Message::GetInfo.write_to(&mut self.tcp)?;
        XvcInfo::from_reader(&mut self.tcp)
    }

    /// Request a TCK period and return the period the server answered with.
    pub fn set_tck(&mut self, period_ns: u32) -> Result<u32, ReadError> {
        Message::SetTck { period_ns }.write_to(&mut self.tcp)?;
        let mut buf = [0u8; 4];
        self.tcp.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Perform a JTAG shift operation.
    ///
    /// `tms` and `tdi` must be ⌈num_bits / 8⌉ bytes long. Returns the TDO
    /// vector, which has the same length. A shift of zero bits has an empty
    /// reply.
    pub fn shift(
        &mut self,
        num_bits: u32,
        tms: &[u8],
        tdi: &[u8],
    ) -> Result<Box<[u8]>, ReadError> {
        let num_bytes = vector_bytes(num_bits);
        if tms.len() != num_bytes || tdi.len() != num_bytes {
            return Err(ReadError::InvalidFormat(format!(
                "{} bits need {} byte vectors, got tms={} tdi={}",
                num_bits,
                num_bytes,
                tms.len(),
                tdi.len()
            )));
        }
        Message::Shift {
            num_bits,
            tms: tms.into(),
            tdi: tdi.into(),
        }
        .write_to(&mut self.tcp)?;
        let mut buf = vec![0; num_bytes];
        self.tcp.read_exact(&mut buf)?;
        Ok(buf.into_boxed_slice())
    }

    /// Send a raw message without waiting for any reply.
    pub fn send(&mut self, message: &Message) -> io::Result<()> {
        message.write_to(&mut self.tcp)
    }

    /// Send arbitrary bytes, e.g. a command the server does not know.
    pub fn send_raw(&mut self, data: &[u8]) -> io::Result<()> {
        io::Write::write_all(&mut self.tcp, data)
    }
}
