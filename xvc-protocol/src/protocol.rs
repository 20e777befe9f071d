use std::{fmt::Display, str::FromStr};

use crate::error::ReadError;

/// The version of the protocol.
/// A version always consists of a major and a minor part.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct Version {
    major: usize,
    minor: usize,
}

impl Version {
    /// Version 1.0 of the protocol
    pub const V1_0: Version = Version { major: 1, minor: 0 };

    /// The major part of the version
    pub fn major(&self) -> usize {
        self.major
    }

    /// The minor part of the version
    pub fn minor(&self) -> usize {
        self.minor
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::V1_0
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for Version {
    type Err = ReadError;

    /// Parses `<major>.<minor>`. Only versions this crate speaks are accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = s
            .split_once('.')
            .ok_or_else(|| ReadError::InvalidFormat(format!("Malformed version '{}'", s)))?;
        let version = Version {
            major: major.parse()?,
            minor: minor.parse()?,
        };
        if version != Version::V1_0 {
            return Err(ReadError::UnsupportedVersion(s.to_string()));
        }
        Ok(version)
    }
}

/// Number of bytes holding `num_bits` bits of a shift vector.
pub fn vector_bytes(num_bits: u32) -> usize {
    num_bits.div_ceil(8) as usize
}

/// A request sent from the client to the server.
///
/// Requests are answered strictly in order, one at a time.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Message {
    /// Asks for the server capabilities, answered with an [`XvcInfo`] line.
    GetInfo,
    /// Requests a TCK period. The server answers with a period as `u32`.
    SetTck { period_ns: u32 },
    /// Clocks `num_bits` cycles of TMS and TDI into the chain and asks for
    /// the sampled TDO bits. Bit `i` is bit `i % 8` of byte `i / 8`.
    Shift {
        num_bits: u32,
        /// [`vector_bytes`]`(num_bits)` bytes
        tms: Box<[u8]>,
        /// [`vector_bytes`]`(num_bits)` bytes
        tdi: Box<[u8]>,
    },
}

impl Message {
    /// The command token of this message on the wire, without the delimiter.
    pub fn name(&self) -> &'static str {
        match self {
            Message::GetInfo => "getinfo",
            Message::SetTck { .. } => "settck",
            Message::Shift { .. } => "shift",
        }
    }
}

/// Capabilities line the server sends in response to `getinfo:`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct XvcInfo {
    version: Version,
    max_vector_len: u32,
}

impl XvcInfo {
    /// Vector length advertised when nothing else is configured.
    pub const DEFAULT_MAX_VECTOR_LEN: u32 = 16384;

    pub fn new(version: Version, max_vector_len: u32) -> XvcInfo {
        XvcInfo {
            version,
            max_vector_len,
        }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Largest shift vector, in bytes, the client may send in one message.
    pub fn max_vector_len(&self) -> u32 {
        self.max_vector_len
    }
}

impl Default for XvcInfo {
    fn default() -> XvcInfo {
        XvcInfo::new(Version::default(), XvcInfo::DEFAULT_MAX_VECTOR_LEN)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn version_ordering() {
        assert!(Version { major: 1, minor: 0 } < Version { major: 1, minor: 1 });
        assert!(Version { major: 2, minor: 0 } > Version { major: 1, minor: 0 });
    }

    #[test]
    fn version_parsing() {
        assert_eq!("1.0".parse::<Version>().unwrap(), Version::V1_0);
        assert!(matches!(
            "1.1".parse::<Version>(),
            Err(ReadError::UnsupportedVersion(v)) if v == "1.1"
        ));
        assert!(matches!(
            "10".parse::<Version>(),
            Err(ReadError::InvalidFormat(_))
        ));
    }

    #[test]
    fn vector_sizes() {
        assert_eq!(vector_bytes(0), 0);
        assert_eq!(vector_bytes(1), 1);
        assert_eq!(vector_bytes(8), 1);
        assert_eq!(vector_bytes(13), 2);
    }
}
