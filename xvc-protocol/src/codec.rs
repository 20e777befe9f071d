/// Read and write implementations for the protocol messages
use std::io::{self, ErrorKind, Read, Write};

use crate::{
    error::ReadError,
    protocol::{Message, Version, XvcInfo, vector_bytes},
};

const XVC_INFO_PREFIX: &str = "xvcServer_v";
const CMD_DELIMITER: u8 = b':';
/// Longest command token accepted before the stream is considered garbage.
const MAX_TOKEN_LEN: usize = 16;
const MAX_INFO_LEN: usize = 64;

/// Reads bytes up to `delimiter`, which is consumed but not returned.
///
/// Reads one byte at a time so nothing after the delimiter is taken from the
/// stream; wrap sockets in a `BufReader`.
fn read_delimited(
    reader: &mut impl Read,
    delimiter: u8,
    max_len: usize,
) -> Result<Vec<u8>, ReadError> {
    let mut out = Vec::with_capacity(max_len);
    let mut byte = [0u8; 1];
    loop {
        let n = match reader.read(&mut byte) {
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if n == 0 {
            if out.is_empty() {
                return Err(ReadError::Closed);
            }
            return Err(io::Error::from(ErrorKind::UnexpectedEof).into());
        }
        if byte[0] == delimiter {
            return Ok(out);
        }
        out.push(byte[0]);
        if out.len() > max_len {
            return Err(ReadError::InvalidCommand(
                String::from_utf8_lossy(&out).to_string(),
            ));
        }
    }
}

fn read_u32(reader: &mut impl Read) -> Result<u32, ReadError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

impl XvcInfo {
    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        writeln!(
            writer,
            "{}{}:{}",
            XVC_INFO_PREFIX,
            self.version(),
            self.max_vector_len()
        )
    }

    /// Parses `xvcServer_v{version}:{max_vector_len}\n`.
    pub fn from_reader(reader: &mut impl Read) -> Result<XvcInfo, ReadError> {
        let line = read_delimited(reader, b'\n', MAX_INFO_LEN)?;
        let line = str::from_utf8(line.trim_ascii_end())?;
        let rest = line.strip_prefix(XVC_INFO_PREFIX).ok_or_else(|| {
            ReadError::InvalidFormat(format!("Invalid prefix in info message '{}'", line))
        })?;
        let (version, max_vector_len) = rest.split_once(':').ok_or_else(|| {
            ReadError::InvalidFormat("Missing ':' separator in info message".to_string())
        })?;
        Ok(XvcInfo::new(
            version.parse::<Version>()?,
            max_vector_len.parse::<u32>()?,
        ))
    }
}

impl Message {
    /// Reads the next message.
    ///
    /// Returns [`ReadError::Closed`] if the stream ends cleanly before a
    /// message starts and [`ReadError::UnknownCommand`] for a token this
    /// crate does not know; in both cases nothing beyond the token has been
    /// consumed. A stream ending within a message is an
    /// [`ReadError::IoError`] of kind `UnexpectedEof`.
    pub fn from_reader(
        reader: &mut impl Read,
        max_shift_bytes: usize,
    ) -> Result<Message, ReadError> {
        let token = read_delimited(reader, CMD_DELIMITER, MAX_TOKEN_LEN)?;
        match token.as_slice() {
            b"getinfo" => Ok(Message::GetInfo),
            b"settck" => Ok(Message::SetTck {
                period_ns: read_u32(reader)?,
            }),
            b"shift" => {
                let num_bits = read_u32(reader)?;
                let num_bytes = vector_bytes(num_bits);
                if num_bytes > max_shift_bytes {
                    return Err(ReadError::TooManyBytes {
                        max: max_shift_bytes,
                        got: num_bytes,
                    });
                }
                let mut tms = vec![0_u8; num_bytes].into_boxed_slice();
                reader.read_exact(&mut tms)?;
                let mut tdi = vec![0_u8; num_bytes].into_boxed_slice();
                reader.read_exact(&mut tdi)?;
                Ok(Message::Shift { num_bits, tms, tdi })
            }
            other => Err(ReadError::UnknownCommand(
                String::from_utf8_lossy(other).to_string(),
            )),
        }
    }

    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        writer.write_all(self.name().as_bytes())?;
        writer.write_all(&[CMD_DELIMITER])?;
        match self {
            Message::GetInfo => Ok(()),
            Message::SetTck { period_ns } => writer.write_all(&period_ns.to_le_bytes()),
            Message::Shift { num_bits, tms, tdi } => {
                writer.write_all(&num_bits.to_le_bytes())?;
                writer.write_all(tms)?;
                writer.write_all(tdi)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use crate::error::ReadError;
    use crate::protocol::{Message, Version, XvcInfo};
    use std::io::{Cursor, ErrorKind};

    const DEFAULT_MAX_SHIFT_BYTES: usize = 1024;

    fn read(data: &[u8]) -> Result<Message, ReadError> {
        Message::from_reader(&mut Cursor::new(data.to_vec()), DEFAULT_MAX_SHIFT_BYTES)
    }

    #[test]
    fn write_server_info() {
        let mut out = Vec::new();
        XvcInfo::default().write_to(&mut out).unwrap();
        assert_eq!(out, b"xvcServer_v1.0:16384\n".to_vec());
    }

    #[test]
    fn read_server_info() {
        let mut cursor = Cursor::new(b"xvcServer_v1.0:32\nrest".to_vec());
        let info = XvcInfo::from_reader(&mut cursor).unwrap();
        assert_eq!(info.version(), Version::V1_0);
        assert_eq!(info.max_vector_len(), 32);
        // nothing past the newline is consumed
        assert_eq!(cursor.position(), 18);
    }

    #[test]
    fn reject_foreign_server_info() {
        let mut cursor = Cursor::new(b"otherServer_v1.0:32\n".to_vec());
        assert!(matches!(
            XvcInfo::from_reader(&mut cursor),
            Err(ReadError::InvalidFormat(_))
        ));
        let mut cursor = Cursor::new(b"xvcServer_v2.0:32\n".to_vec());
        assert!(matches!(
            XvcInfo::from_reader(&mut cursor),
            Err(ReadError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn read_getinfo() {
        assert_eq!(read(b"getinfo:").unwrap(), Message::GetInfo);
    }

    #[test]
    fn write_getinfo() {
        let mut out = Vec::new();
        Message::GetInfo.write_to(&mut out).unwrap();
        assert_eq!(out, b"getinfo:".to_vec());
    }

    #[test]
    fn read_settck() {
        let period: u32 = 0x1234_5678;
        let mut data = b"settck:".to_vec();
        data.extend_from_slice(&period.to_le_bytes());
        assert_eq!(
            read(&data).unwrap(),
            Message::SetTck { period_ns: period }
        );
    }

    #[test]
    fn write_settck() {
        let mut out = Vec::new();
        Message::SetTck { period_ns: 100 }.write_to(&mut out).unwrap();
        assert_eq!(out, b"settck:\x64\x00\x00\x00".to_vec());
    }

    #[test]
    fn read_shift() {
        let mut data = b"shift:".to_vec();
        data.extend_from_slice(&13u32.to_le_bytes());
        data.extend_from_slice(&[0xaa, 0x0a, 0x55, 0x15]);
        assert_eq!(
            read(&data).unwrap(),
            Message::Shift {
                num_bits: 13,
                tms: vec![0xaa, 0x0a].into_boxed_slice(),
                tdi: vec![0x55, 0x15].into_boxed_slice(),
            }
        );
    }

    #[test]
    fn write_shift() {
        let cmd = Message::Shift {
            num_bits: 4,
            tms: vec![0x03].into_boxed_slice(),
            tdi: vec![0x0c].into_boxed_slice(),
        };
        let mut out = Vec::new();
        cmd.write_to(&mut out).unwrap();
        assert_eq!(out, b"shift:\x04\x00\x00\x00\x03\x0c".to_vec());
    }

    #[test]
    fn empty_shift() {
        let mut data = b"shift:".to_vec();
        data.extend_from_slice(&0u32.to_le_bytes());
        assert_eq!(
            read(&data).unwrap(),
            Message::Shift {
                num_bits: 0,
                tms: Box::default(),
                tdi: Box::default(),
            }
        );
    }

    #[test]
    fn consecutive_messages() {
        let mut cursor = Cursor::new(b"getinfo:settck:\x0a\x00\x00\x00getinfo:".to_vec());
        let mut messages = Vec::new();
        loop {
            match Message::from_reader(&mut cursor, DEFAULT_MAX_SHIFT_BYTES) {
                Ok(message) => messages.push(message),
                Err(ReadError::Closed) => break,
                Err(other) => panic!("unexpected error {:?}", other),
            }
        }
        assert_eq!(
            messages,
            vec![
                Message::GetInfo,
                Message::SetTck { period_ns: 10 },
                Message::GetInfo
            ]
        );
    }

    #[test]
    fn unknown_command_keeps_stream_usable() {
        let mut cursor = Cursor::new(b"mrd:getinfo:".to_vec());
        match Message::from_reader(&mut cursor, DEFAULT_MAX_SHIFT_BYTES) {
            Err(ReadError::UnknownCommand(cmd)) => assert_eq!(cmd, "mrd"),
            other => panic!("expected UnknownCommand, got {:?}", other),
        }
        assert_eq!(
            Message::from_reader(&mut cursor, DEFAULT_MAX_SHIFT_BYTES).unwrap(),
            Message::GetInfo
        );
    }

    #[test]
    fn overlong_token_is_invalid() {
        assert!(matches!(
            read(b"xxxxxxxxxxxxxxxxxxxxxxxx:"),
            Err(ReadError::InvalidCommand(_))
        ));
    }

    #[test]
    fn clean_and_truncated_eof() {
        assert!(matches!(read(b""), Err(ReadError::Closed)));
        match read(b"sett") {
            Err(ReadError::IoError(err)) => assert_eq!(err.kind(), ErrorKind::UnexpectedEof),
            other => panic!("expected UnexpectedEof, got {:?}", other),
        }
        match read(b"settck:\x01\x02") {
            Err(ReadError::IoError(err)) => assert_eq!(err.kind(), ErrorKind::UnexpectedEof),
            other => panic!("expected UnexpectedEof, got {:?}", other),
        }
    }

    #[test]
    fn too_many_bytes_shift() {
        let num_bytes_exceed = DEFAULT_MAX_SHIFT_BYTES + 1;
        let mut data = b"shift:".to_vec();
        data.extend_from_slice(&((num_bytes_exceed * 8) as u32).to_le_bytes());
        match read(&data) {
            Err(ReadError::TooManyBytes { max, got }) => {
                assert_eq!(max, DEFAULT_MAX_SHIFT_BYTES);
                assert_eq!(got, num_bytes_exceed);
            }
            other => panic!("expected TooManyBytes, got {:?}", other),
        }
    }
}
