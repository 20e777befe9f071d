//! Response framing and buffered reads on top of a [`Transport`].
//!
//! Every reply from the device has the form
//! `[status: u8][len: 1..=3 bytes][payload: len bytes]`. The length is a
//! little-endian base-128 integer where bit 7 of a byte means "another
//! length byte follows", capped at three bytes (22 bits).
use crate::error::{Error, ProtocolError, Result, StatusKind, TransportError};
use crate::transport::{PACKET_SIZE, Transport};

/// Largest payload length the three byte header can express.
pub const MAX_PAYLOAD_LEN: u32 = (1 << 22) - 1;

const CONTINUATION: u8 = 0x80;

/// Encodes a payload length as a 1 to 3 byte header.
pub fn encode_length(len: u32) -> Result<Vec<u8>> {
    if len > MAX_PAYLOAD_LEN {
        return Err(Error::Framing(format!(
            "payload length {} does not fit into the length header (max {})",
            len, MAX_PAYLOAD_LEN
        )));
    }
    let header = if len < (1 << 7) {
        vec![len as u8]
    } else if len < (1 << 14) {
        vec![(len & 0x7f) as u8 | CONTINUATION, (len >> 7) as u8]
    } else {
        vec![
            (len & 0x7f) as u8 | CONTINUATION,
            ((len >> 7) & 0x7f) as u8 | CONTINUATION,
            (len >> 14) as u8,
        ]
    };
    Ok(header)
}

/// Decodes a length header from the start of `bytes`.
///
/// Returns the length and the number of header bytes consumed, or `None`
/// when `bytes` ends before the header does.
pub fn decode_length(bytes: &[u8]) -> Option<(u32, usize)> {
    let mut len = 0u32;
    for (index, byte) in bytes.iter().copied().enumerate() {
        // The third byte carries the top eight bits, it has no continuation flag.
        if index == 2 {
            return Some((len | u32::from(byte) << 14, 3));
        }
        len |= u32::from(byte & 0x7f) << (7 * index);
        if byte & CONTINUATION == 0 {
            return Some((len, index + 1));
        }
    }
    None
}

/// A single reply from the device.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Response {
    pub status: u8,
    pub payload: Vec<u8>,
}

impl Response {
    pub const STATUS_OK: u8 = 0x00;

    pub fn new(status: u8, payload: impl Into<Vec<u8>>) -> Response {
        Response {
            status,
            payload: payload.into(),
        }
    }

    pub fn ok(payload: impl Into<Vec<u8>>) -> Response {
        Response::new(Self::STATUS_OK, payload)
    }

    pub fn is_ok(&self) -> bool {
        self.status == Self::STATUS_OK
    }

    /// Serializes the response the way the device puts it on the wire.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.payload.len() + 4);
        out.push(self.status);
        out.extend(encode_length(self.payload.len() as u32)?);
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    /// Validates status and payload length, returning the payload.
    pub fn check(
        self,
        context: &str,
        min_len: Option<usize>,
        max_len: Option<usize>,
    ) -> Result<Vec<u8>> {
        check_status(self.status, &self.payload, context, min_len, max_len)?;
        Ok(self.payload)
    }
}

/// Turns a non-OK status into a [`ProtocolError`] and checks payload bounds.
///
/// When the device attached a payload to an error status, the payload is its
/// NUL-terminated reason string.
pub fn check_status(
    status: u8,
    payload: &[u8],
    context: &str,
    min_len: Option<usize>,
    max_len: Option<usize>,
) -> Result<()> {
    if status != Response::STATUS_OK {
        let kind = StatusKind::from_status(status);
        let message = if payload.is_empty() {
            kind.description()
        } else {
            trim_nul(payload)
        };
        return Err(Error::Protocol(ProtocolError {
            kind,
            context: context.to_string(),
            message,
        }));
    }
    if let Some(min) = min_len
        && payload.len() < min
    {
        return Err(Error::Framing(format!(
            "{}: response has length {}, but should be at least {}",
            context,
            payload.len(),
            min
        )));
    }
    if let Some(max) = max_len
        && payload.len() > max
    {
        return Err(Error::Framing(format!(
            "{}: response has length {}, but should be at most {}",
            context,
            payload.len(),
            max
        )));
    }
    Ok(())
}

/// Decodes a NUL padded UTF-8 string, replacing invalid sequences.
pub fn trim_nul(bytes: &[u8]) -> String {
    let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |p| p + 1);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Staging buffer holding the unread tail of the last transport packet.
///
/// Invariant: `cursor <= fill <= PACKET_SIZE`.
#[derive(Debug)]
pub struct ReadBuffer {
    data: [u8; PACKET_SIZE],
    fill: usize,
    cursor: usize,
}

impl Default for ReadBuffer {
    fn default() -> Self {
        ReadBuffer {
            data: [0; PACKET_SIZE],
            fill: 0,
            cursor: 0,
        }
    }
}

impl ReadBuffer {
    pub fn available(&self) -> usize {
        self.fill - self.cursor
    }

    /// Moves up to `max` buffered bytes into `out`, returning how many were moved.
    pub fn drain_into(&mut self, out: &mut Vec<u8>, max: usize) -> usize {
        let n = self.available().min(max);
        out.extend_from_slice(&self.data[self.cursor..self.cursor + n]);
        self.cursor += n;
        n
    }

    /// Replaces the (fully drained) buffer contents with one transport read.
    pub fn refill(&mut self, transport: &mut impl Transport) -> Result<usize> {
        debug_assert_eq!(self.available(), 0);
        let n = transport.read_raw(&mut self.data)?;
        if n > PACKET_SIZE {
            return Err(Error::InternalConsistency(format!(
                "transport reported {} bytes read into a {} byte buffer",
                n, PACKET_SIZE
            )));
        }
        log::trace!("Read raw: {:02x?}", &self.data[..n]);
        self.fill = n;
        self.cursor = 0;
        Ok(n)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    NeedMoreBytes(usize),
    Done,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Number of consecutive empty transport reads tolerated by
    /// [`Codec::read_exact`] before the device is considered gone.
    pub max_empty_reads: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self { max_empty_reads: 8 }
    }
}

/// Sends commands and reads framed responses over a transport.
///
/// Exactly one command may be in flight: callers write a command, then read
/// its complete response before writing the next one.
#[derive(Debug)]
pub struct Codec<T: Transport> {
    transport: T,
    buffer: ReadBuffer,
    config: Config,
}

impl<T: Transport> Codec<T> {
    pub fn new(transport: T) -> Codec<T> {
        Codec::with_config(transport, Config::default())
    }

    pub fn with_config(transport: T, config: Config) -> Codec<T> {
        Codec {
            transport,
            buffer: ReadBuffer::default(),
            config,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    pub fn close(&mut self) {
        self.transport.close();
    }

    /// Sends a command verbatim. A short or failed write is fatal.
    pub fn write_command(&mut self, command: &[u8]) -> Result<()> {
        log::trace!("Write raw: {:02x?}", command);
        let written = self.transport.write_raw(command)?;
        if written != command.len() {
            return Err(Error::Transport(TransportError::Usb(format!(
                "short write: {} of {} bytes",
                written,
                command.len()
            ))));
        }
        Ok(())
    }

    /// Reads exactly `n` bytes, draining buffered data before touching the transport.
    pub fn read_exact(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(n);
        let mut state = ReadState::NeedMoreBytes(n);
        let mut empty_reads = 0;

        while let ReadState::NeedMoreBytes(remaining) = state {
            if self.buffer.available() == 0 && remaining > 0 {
                if self.buffer.refill(&mut self.transport)? == 0 {
                    empty_reads += 1;
                    if empty_reads >= self.config.max_empty_reads {
                        log::debug!(
                            "Giving up after {} empty reads with {} of {} bytes missing",
                            empty_reads,
                            remaining,
                            n
                        );
                        return Err(Error::Transport(TransportError::Disconnected));
                    }
                    continue;
                }
                empty_reads = 0;
            }
            let remaining = remaining - self.buffer.drain_into(&mut out, remaining);
            state = if remaining == 0 {
                ReadState::Done
            } else {
                ReadState::NeedMoreBytes(remaining)
            };
        }
        Ok(out)
    }

    /// Reads one framed response.
    pub fn read_response(&mut self) -> Result<Response> {
        let head = self.read_exact(2)?;
        let status = head[0];
        let mut header = vec![head[1]];
        let (len, _) = loop {
            if let Some(decoded) = decode_length(&header) {
                break decoded;
            }
            header.extend(self.read_exact(1)?);
        };
        let payload = self.read_exact(len as usize)?;
        log::trace!("Response status={} payload={:02x?}", status, payload);
        Ok(Response { status, payload })
    }

    /// Writes `command`, reads the response and validates it.
    pub fn transact(
        &mut self,
        command: &[u8],
        context: &str,
        min_len: Option<usize>,
        max_len: Option<usize>,
    ) -> Result<Vec<u8>> {
        log::debug!("{}: sending {:02x?}", context, command);
        self.write_command(command)?;
        self.read_response()?.check(context, min_len, max_len)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::transport::memory::MemoryTransport;

    #[test]
    fn length_header_sizes() {
        assert_eq!(encode_length(0).unwrap(), vec![0x00]);
        assert_eq!(encode_length(0x7f).unwrap(), vec![0x7f]);
        assert_eq!(encode_length(0x80).unwrap(), vec![0x80, 0x01]);
        assert_eq!(encode_length(0x3fff).unwrap(), vec![0xff, 0x7f]);
        assert_eq!(encode_length(0x4000).unwrap(), vec![0x80, 0x80, 0x01]);
        assert_eq!(encode_length(MAX_PAYLOAD_LEN).unwrap(), vec![0xff, 0xff, 0xff]);
        assert!(encode_length(MAX_PAYLOAD_LEN + 1).is_err());
    }

    #[test]
    fn length_header_decodes_what_it_encodes() {
        for len in 0..=MAX_PAYLOAD_LEN {
            let header = encode_length(len).unwrap();
            assert_eq!(decode_length(&header), Some((len, header.len())));
        }
    }

    #[test]
    fn length_header_incomplete() {
        assert_eq!(decode_length(&[]), None);
        assert_eq!(decode_length(&[0x80]), None);
        assert_eq!(decode_length(&[0x80, 0x80]), None);
        assert_eq!(decode_length(&[0xff, 0xff, 0xff]), Some((MAX_PAYLOAD_LEN, 3)));
    }

    fn stream(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    #[test]
    fn read_exact_independent_of_chunking() {
        let data = stream(300);
        let requests = [1, 2, 63, 64, 65, 100, 5];
        let mut results = Vec::new();
        for chunk_size in [1, 3, 64] {
            let mut codec = Codec::new(MemoryTransport::chunked(&data, chunk_size));
            let parts: Vec<Vec<u8>> = requests
                .iter()
                .map(|n| codec.read_exact(*n).unwrap())
                .collect();
            for (part, n) in parts.iter().zip(requests) {
                assert_eq!(part.len(), n);
            }
            results.push(parts.concat());
        }
        assert_eq!(results[0], data);
        assert_eq!(results[1], data);
        assert_eq!(results[2], data);
    }

    #[test]
    fn read_exact_tolerates_sporadic_empty_reads() {
        let mut codec = Codec::new(MemoryTransport::new(vec![
            vec![1, 2],
            vec![],
            vec![],
            vec![3],
        ]));
        assert_eq!(codec.read_exact(3).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn read_exact_gives_up_on_silent_device() {
        let mut codec = Codec::with_config(
            MemoryTransport::new(vec![vec![1, 2]]),
            Config { max_empty_reads: 3 },
        );
        match codec.read_exact(4) {
            Err(Error::Transport(TransportError::Disconnected)) => {}
            other => panic!("expected Disconnected, got {:?}", other),
        }
    }

    #[test]
    fn read_exact_zero_bytes_does_not_touch_transport() {
        let mut codec = Codec::new(MemoryTransport::new(vec![]));
        assert_eq!(codec.read_exact(0).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn read_response_with_long_payload() {
        let payload = stream(0x4123);
        let encoded = Response::ok(payload.clone()).encode().unwrap();
        assert_eq!(&encoded[..4], &[0x00, 0xa3, 0x82, 0x01]);
        let mut codec = Codec::new(MemoryTransport::chunked(&encoded, 64));
        let response = codec.read_response().unwrap();
        assert!(response.is_ok());
        assert_eq!(response.payload, payload);
    }

    #[test]
    fn consecutive_responses_share_a_packet() {
        let mut packet = Response::ok(vec![0x10, 0x00]).encode().unwrap();
        packet.extend(Response::ok(vec![0x03]).encode().unwrap());
        let mut codec = Codec::new(MemoryTransport::new(vec![packet]));
        assert_eq!(codec.read_response().unwrap().payload, vec![0x10, 0x00]);
        assert_eq!(codec.read_response().unwrap().payload, vec![0x03]);
    }

    #[test]
    fn error_status_without_payload_maps_to_kind() {
        let err = check_status(4, &[], "set address", None, None).unwrap_err();
        match err {
            Error::Protocol(ProtocolError { kind, message, .. }) => {
                assert_eq!(kind, StatusKind::BadArgument);
                assert_eq!(message, "Bad argument");
            }
            other => panic!("expected protocol error, got {:?}", other),
        }
    }

    #[test]
    fn error_status_with_payload_uses_device_message() {
        let err = check_status(1, b"unknown mode1 command 17\0", "cmd", None, None).unwrap_err();
        assert_eq!(err.status_kind(), Some(StatusKind::IllegalCommand));
        assert_eq!(err.to_string(), "cmd: unknown mode1 command 17");
    }

    #[test]
    fn length_bounds_are_enforced() {
        assert!(check_status(0, &[1, 2], "x", Some(2), Some(2)).is_ok());
        assert!(matches!(
            check_status(0, &[1], "x", Some(2), None),
            Err(Error::Framing(_))
        ));
        assert!(matches!(
            check_status(0, &[1, 2, 3], "x", None, Some(2)),
            Err(Error::Framing(_))
        ));
        assert!(check_status(0, &[0; 1000], "x", None, None).is_ok());
    }

    #[test]
    fn trims_trailing_nuls() {
        assert_eq!(trim_nul(b"hello\0\0"), "hello");
        assert_eq!(trim_nul(b"\0"), "");
        assert_eq!(trim_nul(b"plain"), "plain");
    }
}
