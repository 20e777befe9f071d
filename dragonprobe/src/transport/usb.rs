//! Direct USB access to the vendor configuration interface through `nusb`.
use std::time::Duration;

use nusb::transfer::{Direction, EndpointType, Queue, RequestBuffer, TransferError};
use nusb::{DeviceInfo, Interface};

use crate::connection::Backend;
use crate::error::{Error, Result, TransportError};
use crate::transport::{Transport, probe_version};

pub const DEFAULT_VID: u16 = 0xcafe;
pub const DEFAULT_PID: u16 = 0x1312;
pub const VENDOR_SUBCLASS: u8 = 42;
pub const VENDOR_PROTOCOL: u8 = 69;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

const CLASS_VENDOR_SPECIFIC: u8 = 0xff;

fn usb_error(err: impl std::fmt::Display) -> TransportError {
    TransportError::Usb(err.to_string())
}

fn transfer_error(err: TransferError) -> TransportError {
    match err {
        TransferError::Disconnected => TransportError::Disconnected,
        other => usb_error(other),
    }
}

/// A claimed interface with one bulk IN and one bulk OUT endpoint.
///
/// Transfers are asynchronous in `nusb`; this drives each one to completion
/// on a private current-thread runtime and bounds it by a timeout. IN
/// transfers go through a queue, so one still pending when a read times out
/// completes into the next read.
pub struct BulkInterface {
    interface: Interface,
    in_queue: Queue<RequestBuffer>,
    staged: Vec<u8>,
    ep_out: u8,
    max_packet_size: usize,
    runtime: tokio::runtime::Runtime,
    timeout: Duration,
}

impl BulkInterface {
    /// Opens `info` and claims the first interface accepted by `select`
    /// that has bulk endpoints in both directions.
    pub fn open(
        info: &DeviceInfo,
        select: impl Fn(u8, u8, u8) -> bool,
        timeout: Duration,
    ) -> std::result::Result<BulkInterface, TransportError> {
        let device = info.open().map_err(|err| {
            TransportError::Busy(format!("cannot open {}: {}", describe_device(info), err))
        })?;
        let config = device.active_configuration().map_err(usb_error)?;

        let mut found = None;
        for alt in config.interface_alt_settings() {
            if !select(alt.class(), alt.subclass(), alt.protocol()) {
                continue;
            }
            let mut ep_in = None;
            let mut ep_out = None;
            for endpoint in alt.endpoints() {
                if endpoint.transfer_type() != EndpointType::Bulk {
                    continue;
                }
                match endpoint.direction() {
                    Direction::In => ep_in = Some((endpoint.address(), endpoint.max_packet_size())),
                    Direction::Out => ep_out = Some(endpoint.address()),
                }
            }
            if let (Some((ep_in, max_packet_size)), Some(ep_out)) = (ep_in, ep_out) {
                found = Some((alt.interface_number(), ep_in, ep_out, max_packet_size));
                break;
            }
        }
        let (number, ep_in, ep_out, max_packet_size) = found.ok_or_else(|| {
            TransportError::NotFound(format!(
                "no matching bulk interface on {}",
                describe_device(info)
            ))
        })?;

        let interface = device.claim_interface(number).map_err(|err| {
            TransportError::Busy(format!("cannot claim interface {}: {}", number, err))
        })?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;
        log::debug!(
            "Claimed interface {} of {} (in 0x{:02x}, out 0x{:02x})",
            number,
            describe_device(info),
            ep_in,
            ep_out
        );
        let in_queue = interface.bulk_in_queue(ep_in);
        Ok(BulkInterface {
            interface,
            in_queue,
            staged: Vec::new(),
            ep_out,
            max_packet_size,
            runtime,
            timeout,
        })
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    /// Reads up to `buf.len()` bytes of the next transfer. An expired
    /// timeout reads zero bytes and leaves the transfer queued.
    pub fn read(&mut self, buf: &mut [u8]) -> std::result::Result<usize, TransportError> {
        if self.staged.is_empty() {
            if self.in_queue.pending() == 0 {
                self.in_queue
                    .submit(RequestBuffer::new(self.max_packet_size));
            }
            let completion = match self.runtime.block_on(tokio::time::timeout(
                self.timeout,
                self.in_queue.next_complete(),
            )) {
                Ok(completion) => completion,
                Err(_) => return Ok(0),
            };
            self.staged = completion.into_result().map_err(transfer_error)?;
        }
        Ok(take_staged(&mut self.staged, buf))
    }

    pub fn write(&self, data: &[u8]) -> std::result::Result<usize, TransportError> {
        let transfer = self.interface.bulk_out(self.ep_out, data.to_vec());
        let completion = self
            .runtime
            .block_on(tokio::time::timeout(self.timeout, transfer))
            .map_err(|_| TransportError::Timeout(self.timeout))?;
        let response = completion.into_result().map_err(transfer_error)?;
        Ok(response.actual_length())
    }
}

/// Moves the front of `staged` into `buf`.
fn take_staged(staged: &mut Vec<u8>, buf: &mut [u8]) -> usize {
    let n = staged.len().min(buf.len());
    buf[..n].copy_from_slice(&staged[..n]);
    staged.drain(..n);
    n
}

fn describe_device(info: &DeviceInfo) -> String {
    format!(
        "{:04x}:{:04x} at bus {} address {}",
        info.vendor_id(),
        info.product_id(),
        info.bus_number(),
        info.device_address()
    )
}

/// The configuration interface of a device, accessed directly over USB.
pub struct UsbTransport {
    bulk: Option<BulkInterface>,
    description: String,
}

impl UsbTransport {
    pub fn open(
        info: &DeviceInfo,
        timeout: Duration,
    ) -> std::result::Result<UsbTransport, TransportError> {
        let bulk = BulkInterface::open(
            info,
            |class, subclass, protocol| {
                class == CLASS_VENDOR_SPECIFIC
                    && subclass == VENDOR_SUBCLASS
                    && protocol == VENDOR_PROTOCOL
            },
            timeout,
        )?;
        Ok(UsbTransport {
            bulk: Some(bulk),
            description: format!("usb {}", describe_device(info)),
        })
    }
}

impl Transport for UsbTransport {
    fn read_raw(&mut self, buf: &mut [u8]) -> std::result::Result<usize, TransportError> {
        let bulk = self.bulk.as_mut().ok_or(TransportError::Disconnected)?;
        let n = bulk.read(buf)?;
        log::trace!("Read raw: {:02x?}", &buf[..n]);
        Ok(n)
    }

    fn write_raw(&mut self, data: &[u8]) -> std::result::Result<usize, TransportError> {
        self.bulk
            .as_ref()
            .ok_or(TransportError::Disconnected)?
            .write(data)
    }

    fn close(&mut self) {
        if self.bulk.take().is_some() {
            log::debug!("Released {}", self.description);
        }
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

/// Connection string understood by [`UsbBackend`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum UsbAddress {
    /// `XXXX:YYYY`, hexadecimal vendor and product id.
    VidPid { vid: u16, pid: u16 },
    /// `B.D` or `B.D.P`, decimal bus, device address and optional port.
    BusDevice { bus: u8, address: u8, port: Option<u8> },
}

impl UsbAddress {
    pub fn parse(conn: &str) -> Option<UsbAddress> {
        if let Some((vid, pid)) = conn.split_once(':') {
            let hex4 = |s: &str| {
                (s.len() == 4 && s.chars().all(|c| c.is_ascii_hexdigit()))
                    .then(|| u16::from_str_radix(s, 16).ok())
                    .flatten()
            };
            return Some(UsbAddress::VidPid {
                vid: hex4(vid)?,
                pid: hex4(pid)?,
            });
        }

        let parts: Vec<&str> = conn.split('.').collect();
        let dec = |s: &str| {
            (!s.is_empty() && s.len() <= 3 && s.chars().all(|c| c.is_ascii_digit()))
                .then(|| s.parse::<u8>().ok())
                .flatten()
        };
        match parts.as_slice() {
            [bus, address] => Some(UsbAddress::BusDevice {
                bus: dec(bus)?,
                address: dec(address)?,
                port: None,
            }),
            [bus, address, port] => Some(UsbAddress::BusDevice {
                bus: dec(bus)?,
                address: dec(address)?,
                port: Some(dec(port)?),
            }),
            _ => None,
        }
    }

    fn matches(&self, info: &DeviceInfo) -> Result<bool> {
        match *self {
            UsbAddress::VidPid { vid, pid } => {
                Ok(info.vendor_id() == vid && info.product_id() == pid)
            }
            UsbAddress::BusDevice { bus, address, port } => {
                if info.bus_number() != bus || info.device_address() != address {
                    return Ok(false);
                }
                match port {
                    Some(port) => Ok(device_port(info)? == port),
                    None => Ok(true),
                }
            }
        }
    }
}

/// Port on the parent hub, from a sysfs device name such as `1-2.4`.
#[cfg_attr(
    not(any(target_os = "linux", target_os = "android")),
    allow(dead_code)
)]
fn port_from_sysfs_name(name: &str) -> Option<u8> {
    let (_bus, chain) = name.split_once('-')?;
    chain.rsplit('.').next()?.parse().ok()
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn device_port(info: &DeviceInfo) -> Result<u8> {
    info.sysfs_path()
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(port_from_sysfs_name)
        .ok_or_else(|| {
            Error::Transport(TransportError::Usb(format!(
                "cannot determine the port of {}",
                describe_device(info)
            )))
        })
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn device_port(_info: &DeviceInfo) -> Result<u8> {
    Err(Error::Unsupported(
        "selecting USB devices by port needs sysfs".to_string(),
    ))
}

/// Finds devices on the USB bus and opens their configuration interface.
#[derive(Clone, Debug)]
pub struct UsbBackend {
    pub vid: u16,
    pub pid: u16,
    pub timeout: Duration,
}

impl Default for UsbBackend {
    fn default() -> Self {
        UsbBackend {
            vid: DEFAULT_VID,
            pid: DEFAULT_PID,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl UsbBackend {
    fn devices(&self, address: &UsbAddress) -> Result<Vec<DeviceInfo>> {
        let mut found = Vec::new();
        for info in nusb::list_devices().map_err(TransportError::Io)? {
            if address.matches(&info)? {
                found.push(info);
            }
        }
        Ok(found)
    }

    fn open_device(&self, info: &DeviceInfo) -> Result<Box<dyn Transport>> {
        let mut transport = UsbTransport::open(info, self.timeout)?;
        if let Err(err) = probe_version(&mut transport) {
            transport.close();
            return Err(err);
        }
        Ok(Box::new(transport))
    }
}

impl Backend for UsbBackend {
    fn name(&self) -> &'static str {
        "usb"
    }

    fn is_path(&self, conn: &str) -> bool {
        UsbAddress::parse(conn).is_some()
    }

    fn try_open(&self, conn: &str) -> Result<Box<dyn Transport>> {
        let address = UsbAddress::parse(conn).ok_or_else(|| {
            TransportError::NotFound(format!("could not open USB device '{}': not recognised", conn))
        })?;
        let kind = match address {
            UsbAddress::VidPid { .. } => "VID:PID",
            UsbAddress::BusDevice { .. } => "bus.address(.port)",
        };
        match self.devices(&address)?.as_slice() {
            [] => Err(Error::Transport(TransportError::NotFound(format!(
                "connect to '{}' ({}): no such device found",
                conn, kind
            )))),
            [info] => self.open_device(info),
            many => Err(Error::Transport(TransportError::Ambiguous(format!(
                "connection string '{}' ambiguous, found more than one device: {}",
                conn,
                many.iter().map(describe_device).collect::<Vec<_>>().join(", ")
            )))),
        }
    }

    fn try_find(&self) -> Result<Option<Box<dyn Transport>>> {
        let address = UsbAddress::VidPid {
            vid: self.vid,
            pid: self.pid,
        };
        match self.devices(&address)?.as_slice() {
            [info] => self.open_device(info).map(Some),
            [] => Ok(None),
            many => Err(Error::Transport(TransportError::Ambiguous(format!(
                "found {} devices with id {:04x}:{:04x}, select one with a connection string: {}",
                many.len(),
                self.vid,
                self.pid,
                many.iter().map(describe_device).collect::<Vec<_>>().join(", ")
            )))),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_vid_pid() {
        assert_eq!(
            UsbAddress::parse("cafe:1312"),
            Some(UsbAddress::VidPid {
                vid: 0xcafe,
                pid: 0x1312
            })
        );
        assert_eq!(
            UsbAddress::parse("CAFE:0001"),
            Some(UsbAddress::VidPid { vid: 0xcafe, pid: 1 })
        );
        assert_eq!(UsbAddress::parse("cafe:131"), None);
        assert_eq!(UsbAddress::parse("cafe:13122"), None);
        assert_eq!(UsbAddress::parse("caf+:1312"), None);
    }

    #[test]
    fn parses_bus_device() {
        assert_eq!(
            UsbAddress::parse("1.12"),
            Some(UsbAddress::BusDevice {
                bus: 1,
                address: 12,
                port: None
            })
        );
        assert_eq!(
            UsbAddress::parse("3.123.4"),
            Some(UsbAddress::BusDevice {
                bus: 3,
                address: 123,
                port: Some(4)
            })
        );
        assert_eq!(UsbAddress::parse("1"), None);
        assert_eq!(UsbAddress::parse("1.2.3.4"), None);
        assert_eq!(UsbAddress::parse("1.1000"), None);
        assert_eq!(UsbAddress::parse("1.300"), None);
        assert_eq!(UsbAddress::parse("/dev/dragonprobe-0"), None);
    }

    #[test]
    fn port_from_sysfs_names() {
        assert_eq!(port_from_sysfs_name("1-2"), Some(2));
        assert_eq!(port_from_sysfs_name("3-1.4.2"), Some(2));
        assert_eq!(port_from_sysfs_name("2-10"), Some(10));
        assert_eq!(port_from_sysfs_name("usb1"), None);
        assert_eq!(port_from_sysfs_name("1-2.x"), None);
        assert_eq!(port_from_sysfs_name("1-300"), None);
    }

    #[test]
    fn staged_transfer_is_handed_out_in_pieces() {
        let mut staged: Vec<u8> = (0..100).collect();
        let mut buf = [0u8; 64];
        assert_eq!(take_staged(&mut staged, &mut buf), 64);
        assert_eq!(buf[63], 63);
        assert_eq!(take_staged(&mut staged, &mut buf), 36);
        assert_eq!(&buf[..36], &(64..100).collect::<Vec<u8>>()[..]);
        assert!(staged.is_empty());
        assert_eq!(take_staged(&mut staged, &mut buf), 0);
    }

    #[test]
    fn backend_recognises_its_paths() {
        let backend = UsbBackend::default();
        assert!(backend.is_path("cafe:1312"));
        assert!(backend.is_path("1.5"));
        assert!(!backend.is_path("/dev/ttyACM0"));
    }
}
