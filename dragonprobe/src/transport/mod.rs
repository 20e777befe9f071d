//! Byte-stream endpoints that carry the configuration protocol.
//!
//! A [`Transport`] only moves raw packets. Framing, buffering and command
//! semantics live in [`crate::codec`] and [`crate::session`].
pub mod memory;
pub mod usb;

#[cfg(unix)]
pub mod chardev;
#[cfg(not(unix))]
#[path = "chardev_unsupported.rs"]
pub mod chardev;

use std::ops::RangeInclusive;

use crate::codec::Response;
use crate::error::{Error, Result, TransportError};

/// Size of a single packet on the configuration interface.
pub const PACKET_SIZE: usize = 64;

/// Range of protocol versions this host implementation understands.
pub const SUPPORTED_VERSIONS: RangeInclusive<u16> = 0x0010..=0x00ff;

/// Abstraction over the physical link to the device.
///
/// A transport is owned by exactly one [`crate::Session`]. Implementations are
/// expected to bound each physical read by a timeout and report an expired
/// timeout as a read of zero bytes; the codec decides when a run of empty
/// reads means the device is gone.
pub trait Transport: Send {
    /// Read whatever the device has available into `buf`, at most `buf.len()` bytes.
    fn read_raw(&mut self, buf: &mut [u8]) -> std::result::Result<usize, TransportError>;

    /// Write `data` to the device, returning the number of bytes accepted.
    fn write_raw(&mut self, data: &[u8]) -> std::result::Result<usize, TransportError>;

    /// Release the underlying OS or USB handle. Further reads and writes fail
    /// with [`TransportError::Disconnected`]. Closing twice is a no-op.
    fn close(&mut self);

    /// Human readable description of the endpoint, for logs.
    fn describe(&self) -> String;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn read_raw(&mut self, buf: &mut [u8]) -> std::result::Result<usize, TransportError> {
        (**self).read_raw(buf)
    }

    fn write_raw(&mut self, data: &[u8]) -> std::result::Result<usize, TransportError> {
        (**self).write_raw(data)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Checks that a freshly opened endpoint talks the configuration protocol.
///
/// Sends "get protocol version" and expects a single 4 byte packet
/// `[OK, 2, ver_lo, ver_hi]`. A failing transfer is reported as
/// [`TransportError::Busy`], since the usual cause is another program (or
/// the kernel module) holding the interface.
pub fn probe_version(transport: &mut dyn Transport) -> Result<u16> {
    let busy = |err: TransportError| {
        Error::Transport(TransportError::Busy(format!(
            "{} ({}). If the kernel module is loaded, use its character device instead",
            transport_name_hint(&err),
            err
        )))
    };
    transport.write_raw(&[0x00]).map_err(busy)?;

    let mut buf = [0u8; PACKET_SIZE];
    let mut read = 0;
    // The reply is tiny, but a transport may still split it.
    for _ in 0..4 {
        read += transport.read_raw(&mut buf[read..]).map_err(busy)?;
        if read >= 4 {
            break;
        }
    }
    if read < 4 || buf[0] != Response::STATUS_OK || buf[1] != 2 {
        return Err(Error::Transport(TransportError::Busy(
            "device does not recognise the 'get protocol version' command".to_string(),
        )));
    }

    let version = u16::from_le_bytes([buf[2], buf[3]]);
    log::debug!("Probed protocol version 0x{:04x}", version);
    check_version(version)?;
    Ok(version)
}

/// Rejects protocol versions outside [`SUPPORTED_VERSIONS`].
pub fn check_version(version: u16) -> Result<()> {
    if version < *SUPPORTED_VERSIONS.start() {
        return Err(Error::Unsupported(format!(
            "version of device ({:04x}) too old, must be at least {:04x}",
            version,
            SUPPORTED_VERSIONS.start()
        )));
    }
    if version > *SUPPORTED_VERSIONS.end() {
        return Err(Error::Unsupported(format!(
            "version of device ({:04x}) too new, must be at most {:04x}",
            version,
            SUPPORTED_VERSIONS.end()
        )));
    }
    Ok(())
}

fn transport_name_hint(err: &TransportError) -> &'static str {
    match err {
        TransportError::Timeout(_) => "device did not answer",
        _ => "device is busy, already used by something else?",
    }
}
