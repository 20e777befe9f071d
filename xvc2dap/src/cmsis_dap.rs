//! CMSIS-DAP v2 probes driven over their vendor bulk interface.
//!
//! Only the handful of commands needed for raw JTAG are implemented:
//!
//! | command            | id   | request                          | response                |
//! |--------------------|------|----------------------------------|-------------------------|
//! | DAP_Connect        | 0x02 | port                             | port (0 = failed)       |
//! | DAP_Disconnect     | 0x03 |                                  | status                  |
//! | DAP_SWJ_Clock      | 0x11 | clock: u32 le                    | status                  |
//! | DAP_JTAG_Sequence  | 0x14 | count, (info, tdi...) per seq    | status, tdo...          |
//! | DAP_JTAG_Configure | 0x15 | count, irlen per device          | status                  |
use std::time::Duration;

use dragonprobe::transport::usb::{BulkInterface, VENDOR_PROTOCOL, VENDOR_SUBCLASS};
use nusb::DeviceInfo;

use crate::adapter::JtagAdapter;
use crate::error::BridgeError;

pub const DAP_CONNECT: u8 = 0x02;
pub const DAP_DISCONNECT: u8 = 0x03;
pub const DAP_SWJ_CLOCK: u8 = 0x11;
pub const DAP_JTAG_SEQUENCE: u8 = 0x14;
pub const DAP_JTAG_CONFIGURE: u8 = 0x15;

const DAP_OK: u8 = 0x00;
const PORT_JTAG: u8 = 2;
const CLASS_VENDOR_SPECIFIC: u8 = 0xff;
const PRODUCT_MARKER: &str = "CMSIS-DAP";

const SEQ_TMS: u8 = 1 << 6;
const SEQ_TDO_CAPTURE: u8 = 1 << 7;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

fn failed(command: u8, reason: impl Into<String>) -> BridgeError {
    BridgeError::Dap {
        command,
        reason: reason.into(),
    }
}

/// Builds a DAP_JTAG_Sequence request holding a single sequence.
pub fn encode_sequence(cycles: u8, tms: bool, tdi: u64, read_tdo: bool) -> Vec<u8> {
    // A cycle count of 64 is encoded as 0.
    let mut info = cycles & 0x3f;
    if tms {
        info |= SEQ_TMS;
    }
    if read_tdo {
        info |= SEQ_TDO_CAPTURE;
    }
    let mut request = vec![DAP_JTAG_SEQUENCE, 1, info];
    request.extend_from_slice(&tdi.to_le_bytes()[..usize::from(cycles).div_ceil(8)]);
    request
}

/// Extracts the TDO bits from a DAP_JTAG_Sequence response.
pub fn decode_sequence_response(response: &[u8], cycles: u8) -> Result<u64, BridgeError> {
    let nbytes = usize::from(cycles).div_ceil(8);
    check_status(DAP_JTAG_SEQUENCE, response)?;
    let tdo = response.get(2..2 + nbytes).ok_or_else(|| {
        failed(
            DAP_JTAG_SEQUENCE,
            format!("expected {} TDO bytes, got {:02x?}", nbytes, response),
        )
    })?;
    let mut bytes = [0u8; 8];
    bytes[..nbytes].copy_from_slice(tdo);
    let value = u64::from_le_bytes(bytes);
    Ok(if cycles >= 64 {
        value
    } else {
        value & ((1u64 << cycles) - 1)
    })
}

/// Checks the echoed command id and the status byte that follows it.
fn check_status(command: u8, response: &[u8]) -> Result<(), BridgeError> {
    match response {
        [id, DAP_OK, ..] if *id == command => Ok(()),
        [id, status, ..] if *id == command => {
            Err(failed(command, format!("status 0x{:02x}", status)))
        }
        _ => Err(failed(command, format!("unexpected response {:02x?}", response))),
    }
}

/// Description of a probe found on the bus.
#[derive(Clone, Debug)]
pub struct ProbeInfo {
    pub product: String,
    pub serial: Option<String>,
    info: DeviceInfo,
}

impl ProbeInfo {
    fn label(&self) -> String {
        match &self.serial {
            Some(serial) => format!("{} ({})", serial, self.product),
            None => format!("<no serial> ({})", self.product),
        }
    }
}

/// Lists CMSIS-DAP v2 probes: devices whose product string names CMSIS-DAP
/// and that have a vendor specific interface.
pub fn list_probes() -> Result<Vec<ProbeInfo>, BridgeError> {
    let devices = nusb::list_devices().map_err(dragonprobe::TransportError::Io)?;
    Ok(devices
        .filter(|info| {
            info.product_string()
                .is_some_and(|product| product.contains(PRODUCT_MARKER))
                && info
                    .interfaces()
                    .any(|interface| interface.class() == CLASS_VENDOR_SPECIFIC)
        })
        .map(|info| ProbeInfo {
            product: info.product_string().unwrap_or_default().to_string(),
            serial: info.serial_number().map(str::to_string),
            info,
        })
        .collect())
}

/// Picks a probe, by serial number if given, otherwise the only one present.
pub fn select_probe(
    probes: Vec<ProbeInfo>,
    serial: Option<&str>,
) -> Result<ProbeInfo, BridgeError> {
    match serial {
        Some(serial) => probes
            .into_iter()
            .find(|probe| probe.serial.as_deref() == Some(serial))
            .ok_or_else(|| BridgeError::ProbeNotFound(format!(" with serial {}", serial))),
        None => {
            let mut probes = probes;
            match probes.len() {
                0 => Err(BridgeError::ProbeNotFound(String::new())),
                1 => Ok(probes.remove(0)),
                _ => Err(BridgeError::AmbiguousProbe(
                    probes.iter().map(ProbeInfo::label).collect(),
                )),
            }
        }
    }
}

/// An opened CMSIS-DAP probe.
pub struct CmsisDap {
    bulk: BulkInterface,
    label: String,
    connected: bool,
}

impl CmsisDap {
    pub fn find(serial: Option<&str>, timeout: Duration) -> Result<CmsisDap, BridgeError> {
        let probe = select_probe(list_probes()?, serial)?;
        CmsisDap::open(&probe, timeout)
    }

    pub fn open(probe: &ProbeInfo, timeout: Duration) -> Result<CmsisDap, BridgeError> {
        // A Dragon Probe also carries its configuration interface, which is
        // vendor specific as well.
        let bulk = BulkInterface::open(
            &probe.info,
            |class, subclass, protocol| {
                class == CLASS_VENDOR_SPECIFIC
                    && !(subclass == VENDOR_SUBCLASS && protocol == VENDOR_PROTOCOL)
            },
            timeout,
        )?;
        log::info!("Opened CMSIS-DAP probe {}", probe.label());
        Ok(CmsisDap {
            bulk,
            label: probe.label(),
            connected: false,
        })
    }

    fn command(&mut self, request: &[u8]) -> Result<Vec<u8>, BridgeError> {
        log::trace!("DAP request: {:02x?}", request);
        let written = self.bulk.write(request)?;
        if written != request.len() {
            return Err(failed(
                request[0],
                format!("short write of {} bytes", written),
            ));
        }
        let mut response = vec![0u8; self.bulk.max_packet_size().max(64)];
        let n = self.bulk.read(&mut response)?;
        if n == 0 {
            return Err(failed(request[0], "no response"));
        }
        response.truncate(n);
        log::trace!("DAP response: {:02x?}", response);
        Ok(response)
    }

    /// Switches the probe to JTAG.
    pub fn connect_jtag(&mut self) -> Result<(), BridgeError> {
        let response = self.command(&[DAP_CONNECT, PORT_JTAG])?;
        match response.as_slice() {
            [DAP_CONNECT, PORT_JTAG, ..] => {
                self.connected = true;
                Ok(())
            }
            [DAP_CONNECT, 0, ..] => Err(failed(DAP_CONNECT, "probe does not support JTAG")),
            _ => Err(failed(
                DAP_CONNECT,
                format!("unexpected response {:02x?}", response),
            )),
        }
    }

    /// Describes the scan chain, one IR length per device.
    pub fn configure_jtag(&mut self, irlens: &[u8]) -> Result<(), BridgeError> {
        let count = u8::try_from(irlens.len())
            .map_err(|_| failed(DAP_JTAG_CONFIGURE, "too many devices in chain"))?;
        let mut request = vec![DAP_JTAG_CONFIGURE, count];
        request.extend_from_slice(irlens);
        let response = self.command(&request)?;
        check_status(DAP_JTAG_CONFIGURE, &response)
    }

    pub fn disconnect(&mut self) -> Result<(), BridgeError> {
        self.connected = false;
        let response = self.command(&[DAP_DISCONNECT])?;
        check_status(DAP_DISCONNECT, &response)
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl JtagAdapter for CmsisDap {
    fn set_clock(&mut self, hz: u32) -> Result<(), BridgeError> {
        let mut request = vec![DAP_SWJ_CLOCK];
        request.extend_from_slice(&hz.to_le_bytes());
        let response = self.command(&request)?;
        check_status(DAP_SWJ_CLOCK, &response)
    }

    fn jtag_sequence(
        &mut self,
        cycles: u8,
        tms: bool,
        tdi: u64,
        read_tdo: bool,
    ) -> Result<u64, BridgeError> {
        if cycles == 0 || cycles > 64 {
            return Err(failed(
                DAP_JTAG_SEQUENCE,
                format!("{} cycles out of range", cycles),
            ));
        }
        let response = self.command(&encode_sequence(cycles, tms, tdi, read_tdo))?;
        if read_tdo {
            decode_sequence_response(&response, cycles)
        } else {
            check_status(DAP_JTAG_SEQUENCE, &response).map(|_| 0)
        }
    }
}

impl Drop for CmsisDap {
    fn drop(&mut self) {
        if self.connected
            && let Err(err) = self.disconnect()
        {
            log::warn!("Disconnecting {} failed: {}", self.label, err);
        }
    }
}
