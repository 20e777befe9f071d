//! Negotiated connection to a device and typed access to its modes.
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::time::Duration;

use crate::codec::{self, Codec, trim_nul};
use crate::error::{Error, Result};
use crate::scan::{JtagMatch, ScanResult, ScanStatus, ScanType, SwdMatch, decode_records};
use crate::storage::StorageInfo;
use crate::transport::{Transport, check_version};

/// Command bytes understood by the device.
pub mod opcode {
    pub const GET_VERSION: u8 = 0x00;
    pub const GET_MODES: u8 = 0x01;
    pub const GET_CUR_MODE: u8 = 0x02;
    pub const SET_CUR_MODE: u8 = 0x03;
    pub const GET_INFO_STRING: u8 = 0x04;

    pub const STORAGE_GET_HEADER: u8 = 0x0c;
    pub const STORAGE_GET_MODE_DATA: u8 = 0x0d;
    pub const STORAGE_FLUSH: u8 = 0x0e;

    /// Sub-operations every mode answers, combined with the mode number
    /// in the high nibble by [`mode_command`].
    pub const MODE_GET_NAME: u8 = 0x0;
    pub const MODE_GET_VERSION: u8 = 0x1;
    pub const MODE_GET_FEATURES: u8 = 0x2;

    pub const M1_TEMPSENSOR: u8 = 0x15;
    pub const M1_UART_FLOWCTL: u8 = 0x16;
    pub const M1_TEMPSENSOR_GET: u8 = 0x00;
    pub const M1_TEMPSENSOR_SET: u8 = 0x01;
    pub const M1_UART_FLOWCTL_GET: u8 = 0xc3;

    pub const M3_SCAN_STATUS: u8 = 0x33;
    pub const M3_SCAN_RESULT: u8 = 0x34;
    pub const M3_SCAN_START: u8 = 0x35;
    pub const M3_SCAN_PINS: u8 = 0x36;
    pub const M3_SCAN_STOP: u8 = 0x37;

    pub const M4_OVERCLOCK_GET: u8 = 0x43;
    pub const M4_OVERCLOCK_SET: u8 = 0x44;

    pub const fn mode_command(mode: u8, op: u8) -> u8 {
        (mode << 4) | (op & 0x0f)
    }
}

/// Address byte meaning "temperature sensor emulation disabled".
const I2C_ADDRESS_DISABLED: u8 = 0xff;

/// Static description of one device mode.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ModeInfo {
    pub name: String,
    pub version: u16,
    pub features: BTreeSet<u8>,
}

impl ModeInfo {
    pub fn has_feature(&self, feature: u8) -> bool {
        self.features.contains(&feature)
    }
}

impl Display for ModeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} version {:04x}, features: {:?}", self.name, self.version, self.features)
    }
}

/// Previous and new address returned when reconfiguring the emulated I2C
/// temperature sensor. `None` means disabled.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AddressChange {
    pub previous: Option<u8>,
    pub current: Option<u8>,
}

fn decode_address(byte: u8) -> Option<u8> {
    (byte != I2C_ADDRESS_DISABLED).then_some(byte)
}

/// An initialized connection to a device.
///
/// Construction runs the full negotiation (protocol version, available
/// modes, current mode, info text, per-mode metadata). There is no way to
/// obtain a partially initialized session.
pub struct Session {
    codec: Codec<Box<dyn Transport>>,
    protocol_version: u16,
    current_mode: u8,
    info_text: String,
    modes: BTreeMap<u8, ModeInfo>,
}

impl Session {
    pub fn open(transport: Box<dyn Transport>) -> Result<Session> {
        Session::with_config(transport, codec::Config::default())
    }

    pub fn with_config(transport: Box<dyn Transport>, config: codec::Config) -> Result<Session> {
        let description = transport.describe();
        let mut codec = Codec::with_config(transport, config);
        match Session::negotiate(&mut codec) {
            Ok((protocol_version, current_mode, info_text, modes)) => {
                log::info!(
                    "Connected to {} ({}), protocol {:04x}, mode {}",
                    description,
                    info_text,
                    protocol_version,
                    current_mode
                );
                Ok(Session {
                    codec,
                    protocol_version,
                    current_mode,
                    info_text,
                    modes,
                })
            }
            Err(err) => {
                log::debug!("Negotiation with {} failed: {}", description, err);
                codec.close();
                Err(err)
            }
        }
    }

    #[allow(clippy::type_complexity)]
    fn negotiate(
        codec: &mut Codec<Box<dyn Transport>>,
    ) -> Result<(u16, u8, String, BTreeMap<u8, ModeInfo>)> {
        let payload = codec.transact(
            &[opcode::GET_VERSION],
            "get protocol version",
            Some(2),
            Some(2),
        )?;
        let protocol_version = u16::from_le_bytes([payload[0], payload[1]]);
        check_version(protocol_version)?;

        let payload = codec.transact(&[opcode::GET_MODES], "get modes", Some(2), Some(2))?;
        let bitmap = u16::from_le_bytes([payload[0], payload[1]]);
        let available: Vec<u8> = (1..16).filter(|m| bitmap & (1 << m) != 0).collect();

        let payload = codec.transact(&[opcode::GET_CUR_MODE], "get mode", Some(1), Some(1))?;
        let current_mode = payload[0];

        let payload = codec.transact(
            &[opcode::GET_INFO_STRING],
            "get info string",
            Some(1),
            None,
        )?;
        let info_text = trim_nul(&payload);

        let mut modes = BTreeMap::new();
        for mode in available {
            let info = Session::fetch_mode_info(codec, mode)?;
            log::debug!("Mode {}: {}", mode, info);
            modes.insert(mode, info);
        }
        Ok((protocol_version, current_mode, info_text, modes))
    }

    fn fetch_mode_info(codec: &mut Codec<Box<dyn Transport>>, mode: u8) -> Result<ModeInfo> {
        let name = codec.transact(
            &[opcode::mode_command(mode, opcode::MODE_GET_NAME)],
            "get mode name",
            Some(1),
            None,
        )?;
        let version = codec.transact(
            &[opcode::mode_command(mode, opcode::MODE_GET_VERSION)],
            "get mode version",
            Some(2),
            Some(2),
        )?;
        let features = codec.transact(
            &[opcode::mode_command(mode, opcode::MODE_GET_FEATURES)],
            "get mode features",
            Some(1),
            Some(1),
        )?;
        Ok(ModeInfo {
            name: trim_nul(&name),
            version: u16::from_le_bytes([version[0], version[1]]),
            features: (0..8).filter(|bit| features[0] & (1 << bit) != 0).collect(),
        })
    }

    pub fn protocol_version(&self) -> u16 {
        self.protocol_version
    }

    pub fn current_mode(&self) -> u8 {
        self.current_mode
    }

    pub fn info_text(&self) -> &str {
        &self.info_text
    }

    /// Metadata of all modes the device reported as available.
    pub fn modes(&self) -> &BTreeMap<u8, ModeInfo> {
        &self.modes
    }

    pub fn mode_info(&self, mode: u8) -> Option<&ModeInfo> {
        self.modes.get(&mode)
    }

    /// Switches the device to another mode.
    ///
    /// The device re-enumerates after a mode switch, so the session is
    /// consumed and its transport closed. Connect again to talk to the new mode.
    pub fn set_mode(mut self, mode: u8) -> Result<()> {
        log::info!("Switching from mode {} to mode {}", self.current_mode, mode);
        let result = self
            .codec
            .transact(&[opcode::SET_CUR_MODE, mode], "set mode", Some(0), Some(0));
        self.codec.close();
        result.map(|_| ())
    }

    pub fn close(mut self) {
        self.codec.close();
    }

    // mode 1

    pub fn uart_flow_control(&mut self) -> Result<bool> {
        let payload = self.codec.transact(
            &[opcode::M1_UART_FLOWCTL, opcode::M1_UART_FLOWCTL_GET],
            "m1: get usb hw flowctl",
            Some(1),
            Some(1),
        )?;
        Ok(payload[0] != 0)
    }

    pub fn set_uart_flow_control(&mut self, enabled: bool) -> Result<()> {
        self.codec.transact(
            &[opcode::M1_UART_FLOWCTL, u8::from(enabled)],
            "m1: set usb hw flowctl",
            Some(0),
            Some(0),
        )?;
        Ok(())
    }

    /// I2C address of the emulated temperature sensor, `None` if disabled.
    pub fn tempsensor_address(&mut self) -> Result<Option<u8>> {
        let payload = self.codec.transact(
            &[opcode::M1_TEMPSENSOR, opcode::M1_TEMPSENSOR_GET],
            "m1: get tempsensor i2c emul",
            Some(1),
            Some(1),
        )?;
        Ok(decode_address(payload[0]))
    }

    pub fn set_tempsensor_address(&mut self, address: Option<u8>) -> Result<AddressChange> {
        let payload = self.codec.transact(
            &[
                opcode::M1_TEMPSENSOR,
                opcode::M1_TEMPSENSOR_SET,
                address.unwrap_or(I2C_ADDRESS_DISABLED),
            ],
            "m1: set tempsensor i2c emul",
            Some(2),
            Some(2),
        )?;
        Ok(AddressChange {
            previous: decode_address(payload[0]),
            current: decode_address(payload[1]),
        })
    }

    // mode 3

    pub fn scan_status(&mut self) -> Result<ScanStatus> {
        let payload = self.codec.transact(
            &[opcode::M3_SCAN_STATUS],
            "m3: jtag scan status",
            Some(1),
            Some(1),
        )?;
        Ok(ScanStatus::from_byte(payload[0]))
    }

    pub fn scan_start(&mut self, scan_type: ScanType, min_pin: u8, max_pin: u8) -> Result<()> {
        self.codec.transact(
            &[opcode::M3_SCAN_START, scan_type as u8, min_pin, max_pin],
            "m3: jtag scan start",
            Some(0),
            Some(0),
        )?;
        Ok(())
    }

    /// Lowest and highest pin number the scanner can use.
    pub fn scan_pin_range(&mut self) -> Result<(u8, u8)> {
        let payload = self.codec.transact(
            &[opcode::M3_SCAN_PINS],
            "m3: jtag scan get pin range",
            Some(2),
            Some(2),
        )?;
        Ok((payload[0], payload[1]))
    }

    pub fn scan_result_jtag(&mut self, matches: u8) -> Result<Vec<JtagMatch>> {
        let len = usize::from(matches) * JtagMatch::SIZE;
        let payload = self.codec.transact(
            &[opcode::M3_SCAN_RESULT],
            "m3: jtag scan result",
            Some(len),
            Some(len),
        )?;
        decode_records(&payload, JtagMatch::from_bytes)
    }

    pub fn scan_result_swd(&mut self, matches: u8) -> Result<Vec<SwdMatch>> {
        let len = usize::from(matches) * SwdMatch::SIZE;
        let payload = self.codec.transact(
            &[opcode::M3_SCAN_RESULT],
            "m3: swd scan result",
            Some(len),
            Some(len),
        )?;
        decode_records(&payload, SwdMatch::from_bytes)
    }

    pub fn scan_force_stop(&mut self) -> Result<()> {
        self.codec.transact(
            &[opcode::M3_SCAN_STOP],
            "m3: jtag scan force stop",
            Some(0),
            Some(0),
        )?;
        Ok(())
    }

    /// Runs a complete pinout scan and fetches its matches.
    ///
    /// Polls the status every `poll_interval` until the scan leaves the
    /// in-progress state. A status naming a different scan type than the
    /// one started is reported as [`Error::ScanAnomaly`].
    pub fn run_scan(
        &mut self,
        scan_type: ScanType,
        min_pin: u8,
        max_pin: u8,
        poll_interval: Duration,
    ) -> Result<ScanResult> {
        if scan_type.record_size().is_none() {
            return Err(Error::Unsupported(format!(
                "decoding {} scan results is not supported",
                scan_type
            )));
        }
        self.scan_start(scan_type, min_pin, max_pin)?;
        log::info!("Started {} scan on pins {}..={}", scan_type, min_pin, max_pin);

        let matches = loop {
            match self.scan_status()? {
                ScanStatus::InProgress(kind) if kind == scan_type as u8 => {
                    std::thread::sleep(poll_interval);
                }
                ScanStatus::InProgress(kind) => {
                    match ScanType::from_u8(kind) {
                        Some(other) => log::warn!("{} scan running instead of {}", other, scan_type),
                        None => log::warn!("Unknown scan type {} in progress", kind),
                    }
                    return Err(Error::ScanAnomaly {
                        expected: scan_type as u8,
                        got: kind,
                    });
                }
                ScanStatus::Idle => return Ok(ScanResult::Stopped),
                ScanStatus::Done { matches } => break matches,
            }
        };
        log::info!("{} scan done with {} matches", scan_type, matches);

        match scan_type {
            ScanType::Jtag => Ok(ScanResult::Jtag(self.scan_result_jtag(matches)?)),
            ScanType::Swd => Ok(ScanResult::Swd(self.scan_result_swd(matches)?)),
            ScanType::Sbw => Err(Error::Unsupported(format!("decoding {} scan results", scan_type))),
        }
    }

    // mode 4

    pub fn sump_overclock(&mut self) -> Result<u8> {
        let payload = self.codec.transact(
            &[opcode::M4_OVERCLOCK_GET],
            "m4: sump overclock get",
            Some(1),
            Some(1),
        )?;
        Ok(payload[0])
    }

    pub fn set_sump_overclock(&mut self, level: u8) -> Result<()> {
        self.codec.transact(
            &[opcode::M4_OVERCLOCK_SET, level],
            "m4: sump overclock set",
            Some(0),
            Some(0),
        )?;
        Ok(())
    }

    // persistent storage

    pub fn storage_info(&mut self) -> Result<StorageInfo> {
        let payload = self.codec.transact(
            &[opcode::STORAGE_GET_HEADER],
            "get storage info",
            Some(crate::storage::HEADER_SIZE),
            Some(crate::storage::HEADER_SIZE),
        )?;
        StorageInfo::from_bytes(&payload)
    }

    /// Raw stored data blob of `mode`.
    pub fn storage_data(&mut self, mode: u8) -> Result<Vec<u8>> {
        self.codec.transact(
            &[opcode::STORAGE_GET_MODE_DATA, mode],
            "get storage data",
            None,
            None,
        )
    }

    /// Fetches the data blob of `mode` and checks it against the mode table.
    pub fn storage_data_verified(&mut self, mode: u8) -> Result<Vec<u8>> {
        let info = self.storage_info()?;
        let entry = *info.entry_for_mode(mode).ok_or_else(|| {
            Error::Framing(format!("mode {} has no entry in the storage table", mode))
        })?;
        let data = self.storage_data(mode)?;
        if !entry.matches(&data) {
            return Err(Error::Framing(format!(
                "stored data of mode {} does not match its table entry ({} bytes, checksum {:08x})",
                mode, entry.data_size, entry.data_djb2
            )));
        }
        Ok(data)
    }

    /// Writes pending settings to flash. Returns whether anything was written.
    pub fn storage_flush(&mut self) -> Result<bool> {
        let payload =
            self.codec
                .transact(&[opcode::STORAGE_FLUSH], "flush storage", Some(1), Some(1))?;
        Ok(payload[0] != 0)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::codec::Response;
    use crate::error::{ProtocolError, StatusKind, TransportError};
    use crate::storage::djb2;
    use crate::storage::test::{entry_bytes, header};
    use crate::transport::memory::{MemoryTransport, WriteLog};

    fn init_responses() -> Vec<Response> {
        vec![
            Response::ok(vec![0x10, 0x00]),
            // modes 1 and 3
            Response::ok(vec![0x0a, 0x00]),
            Response::ok(vec![1]),
            Response::ok(b"Dragon Probe v1.0\0".to_vec()),
            Response::ok(b"default\0".to_vec()),
            Response::ok(vec![0x10, 0x00]),
            Response::ok(vec![0b0000_0110]),
            Response::ok(b"jscan\0".to_vec()),
            Response::ok(vec![0x01, 0x00]),
            Response::ok(vec![0b0000_0011]),
        ]
    }

    fn device(extra: Vec<Response>) -> (MemoryTransport, WriteLog) {
        let mut stream = Vec::new();
        for response in init_responses().into_iter().chain(extra) {
            stream.extend(response.encode().unwrap());
        }
        let transport = MemoryTransport::chunked(&stream, 64);
        let log = transport.write_log();
        (transport, log)
    }

    fn session(extra: Vec<Response>) -> (Session, WriteLog) {
        let (transport, log) = device(extra);
        (Session::open(Box::new(transport)).unwrap(), log)
    }

    /// Commands sent after the negotiation.
    fn commands_after_init(log: &WriteLog) -> Vec<Vec<u8>> {
        log.commands()[init_responses().len()..].to_vec()
    }

    #[test]
    fn negotiation_populates_session() {
        let (session, log) = session(vec![]);
        assert_eq!(session.protocol_version(), 0x0010);
        assert_eq!(session.current_mode(), 1);
        assert_eq!(session.info_text(), "Dragon Probe v1.0");
        assert_eq!(session.modes().keys().copied().collect::<Vec<_>>(), vec![1, 3]);
        let default = session.mode_info(1).unwrap();
        assert_eq!(default.name, "default");
        assert_eq!(default.version, 0x0010);
        assert_eq!(default.features, BTreeSet::from([1, 2]));
        assert!(session.mode_info(3).unwrap().has_feature(0));
        assert_eq!(session.mode_info(2), None);

        assert_eq!(
            log.commands(),
            vec![
                vec![0x00],
                vec![0x01],
                vec![0x02],
                vec![0x04],
                vec![0x10],
                vec![0x11],
                vec![0x12],
                vec![0x30],
                vec![0x31],
                vec![0x32],
            ]
        );
    }

    #[test]
    fn negotiation_rejects_unsupported_version() {
        let transport = MemoryTransport::chunked(&Response::ok(vec![0x00, 0x02]).encode().unwrap(), 64);
        assert!(matches!(
            Session::open(Box::new(transport)),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn negotiation_failure_surfaces_error() {
        let mut stream = Response::ok(vec![0x10, 0x00]).encode().unwrap();
        stream.extend(Response::new(1, vec![]).encode().unwrap());
        let transport = MemoryTransport::chunked(&stream, 64);
        let err = Session::open(Box::new(transport)).err().unwrap();
        assert_eq!(err.status_kind(), Some(StatusKind::IllegalCommand));
    }

    #[test]
    fn negotiation_with_silent_device_is_a_transport_error() {
        let transport = MemoryTransport::new(vec![]);
        assert!(matches!(
            Session::open(Box::new(transport)),
            Err(Error::Transport(TransportError::Disconnected))
        ));
    }

    #[test]
    fn uart_flow_control_commands() {
        let (mut session, log) = session(vec![Response::ok(vec![1]), Response::ok(vec![])]);
        assert!(session.uart_flow_control().unwrap());
        session.set_uart_flow_control(false).unwrap();
        assert_eq!(
            commands_after_init(&log),
            vec![vec![0x16, 0xc3], vec![0x16, 0x00]]
        );
    }

    #[test]
    fn tempsensor_address_round_trip() {
        let (mut session, log) = session(vec![
            Response::ok(vec![0xff]),
            Response::ok(vec![0xff, 0x48]),
            Response::ok(vec![0x48, 0xff]),
        ]);
        assert_eq!(session.tempsensor_address().unwrap(), None);
        assert_eq!(
            session.set_tempsensor_address(Some(0x48)).unwrap(),
            AddressChange {
                previous: None,
                current: Some(0x48)
            }
        );
        assert_eq!(
            session.set_tempsensor_address(None).unwrap(),
            AddressChange {
                previous: Some(0x48),
                current: None
            }
        );
        assert_eq!(
            commands_after_init(&log),
            vec![
                vec![0x15, 0x00],
                vec![0x15, 0x01, 0x48],
                vec![0x15, 0x01, 0xff]
            ]
        );
    }

    #[test]
    fn bad_argument_on_set_address() {
        let (mut session, _) = session(vec![Response::new(0x04, vec![])]);
        match session.set_tempsensor_address(Some(0x01)) {
            Err(Error::Protocol(ProtocolError { kind, context, .. })) => {
                assert_eq!(kind, StatusKind::BadArgument);
                assert_eq!(context, "m1: set tempsensor i2c emul");
            }
            other => panic!("expected BadArgument, got {:?}", other),
        }
    }

    #[test]
    fn wrong_payload_length_is_a_framing_error() {
        let (mut session, _) = session(vec![Response::ok(vec![1, 2])]);
        assert!(matches!(session.sump_overclock(), Err(Error::Framing(_))));
    }

    #[test]
    fn set_mode_consumes_session() {
        let (session, log) = session(vec![Response::ok(vec![])]);
        session.set_mode(3).unwrap();
        assert_eq!(commands_after_init(&log), vec![vec![0x03, 0x03]]);
    }

    #[test]
    fn sump_overclock_commands() {
        let (mut session, log) = session(vec![Response::ok(vec![2]), Response::ok(vec![])]);
        assert_eq!(session.sump_overclock().unwrap(), 2);
        session.set_sump_overclock(0).unwrap();
        assert_eq!(commands_after_init(&log), vec![vec![0x43], vec![0x44, 0x00]]);
    }

    #[test]
    fn scan_primitives() {
        let (mut session, log) = session(vec![
            Response::ok(vec![0x7f]),
            Response::ok(vec![2, 17]),
            Response::ok(vec![]),
        ]);
        assert_eq!(session.scan_status().unwrap(), ScanStatus::Idle);
        assert_eq!(session.scan_pin_range().unwrap(), (2, 17));
        session.scan_force_stop().unwrap();
        assert_eq!(
            commands_after_init(&log),
            vec![vec![0x33], vec![0x36], vec![0x37]]
        );
    }

    #[test]
    fn full_jtag_scan() {
        let (mut session, log) = session(vec![
            Response::ok(vec![]),
            Response::ok(vec![0x00]),
            Response::ok(vec![0x00]),
            Response::ok(vec![0x81]),
            Response::ok(vec![2, 3, 4, 5, 6, 4, 0, 0]),
        ]);
        let result = session
            .run_scan(ScanType::Jtag, 2, 6, Duration::ZERO)
            .unwrap();
        match result {
            ScanResult::Jtag(matches) => {
                assert_eq!(matches.len(), 1);
                assert_eq!(matches[0].tck, 2);
                assert_eq!(matches[0].irlen, 4);
            }
            other => panic!("expected JTAG matches, got {:?}", other),
        }
        assert_eq!(
            commands_after_init(&log),
            vec![
                vec![0x35, 0x00, 2, 6],
                vec![0x33],
                vec![0x33],
                vec![0x33],
                vec![0x34]
            ]
        );
    }

    #[test]
    fn full_swd_scan() {
        let (mut session, _) = session(vec![
            Response::ok(vec![]),
            Response::ok(vec![0x82]),
            Response::ok(vec![1, 2, 0x77, 0x14, 0xa0, 0x2b, 3, 4, 0x77, 0x14, 0xa0, 0x2b]),
        ]);
        let result = session
            .run_scan(ScanType::Swd, 1, 4, Duration::ZERO)
            .unwrap();
        match result {
            ScanResult::Swd(matches) => {
                assert_eq!(matches.len(), 2);
                assert_eq!(matches[1].swclk, 3);
                assert_eq!(matches[1].idcode, 0x2ba0_1477);
            }
            other => panic!("expected SWD matches, got {:?}", other),
        }
    }

    #[test]
    fn scan_status_anomaly_is_reported() {
        let (mut session, _) = session(vec![Response::ok(vec![]), Response::ok(vec![0x01])]);
        match session.run_scan(ScanType::Jtag, 0, 4, Duration::ZERO) {
            Err(Error::ScanAnomaly { expected, got }) => {
                assert_eq!(expected, 0);
                assert_eq!(got, 1);
            }
            other => panic!("expected ScanAnomaly, got {:?}", other),
        }
    }

    #[test]
    fn stopped_scan() {
        let (mut session, _) = session(vec![Response::ok(vec![]), Response::ok(vec![0x7f])]);
        assert_eq!(
            session
                .run_scan(ScanType::Jtag, 0, 4, Duration::ZERO)
                .unwrap(),
            ScanResult::Stopped
        );
    }

    #[test]
    fn sbw_scan_is_rejected_before_starting() {
        let (mut session, log) = session(vec![]);
        assert!(matches!(
            session.run_scan(ScanType::Sbw, 0, 4, Duration::ZERO),
            Err(Error::Unsupported(_))
        ));
        assert!(commands_after_init(&log).is_empty());
    }

    #[test]
    fn storage_commands() {
        let data = b"settings".to_vec();
        let blob = header(
            2,
            &[
                entry_bytes(0xffff, 0xffff, 0, 1, 0),
                entry_bytes(0x0001, data.len() as u16, 0x100, 1, djb2(&data)),
                entry_bytes(0x0001, 4, 0x200, 4, 0),
            ],
        );
        let (mut session, log) = session(vec![
            Response::ok(blob.clone()),
            Response::ok(blob.clone()),
            Response::ok(data.clone()),
            Response::ok(vec![1]),
        ]);
        let info = session.storage_info().unwrap();
        assert_eq!(info.nmodes, 2);
        assert_eq!(info.modes.len(), 2);
        assert_eq!(session.storage_data_verified(1).unwrap(), data);
        assert!(session.storage_flush().unwrap());
        assert_eq!(
            commands_after_init(&log),
            vec![vec![0x0c], vec![0x0c], vec![0x0d, 0x01], vec![0x0e]]
        );
    }

    #[test]
    fn storage_data_mismatch_is_detected() {
        let blob = header(1, &[entry_bytes(0x0001, 3, 0x100, 1, 0)]);
        let (mut session, _) = session(vec![Response::ok(blob), Response::ok(vec![1, 2, 3])]);
        assert!(matches!(
            session.storage_data_verified(1),
            Err(Error::Framing(_))
        ));
    }
}
