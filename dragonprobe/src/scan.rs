//! Types of the JTAG/SWD/SBW pinout scanner (mode 3).
use std::fmt::Display;

use crate::error::{Error, Result};

/// Which kind of debug port to look for.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum ScanType {
    Jtag = 0,
    Swd = 1,
    Sbw = 2,
}

impl ScanType {
    pub fn from_u8(value: u8) -> Option<ScanType> {
        match value {
            0 => Some(ScanType::Jtag),
            1 => Some(ScanType::Swd),
            2 => Some(ScanType::Sbw),
            _ => None,
        }
    }

    /// Size of one match record in a scan result.
    pub fn record_size(&self) -> Option<usize> {
        match self {
            ScanType::Jtag => Some(JtagMatch::SIZE),
            ScanType::Swd => Some(SwdMatch::SIZE),
            ScanType::Sbw => None,
        }
    }
}

impl Display for ScanType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanType::Jtag => write!(f, "JTAG"),
            ScanType::Swd => write!(f, "SWD"),
            ScanType::Sbw => write!(f, "SBW"),
        }
    }
}

/// Scanner state as reported by the status byte.
///
/// `< 0x7f` is the type of the scan in progress, `0x7f` is idle and
/// `0x80 | n` is a finished scan with `n` matches.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ScanStatus {
    InProgress(u8),
    Idle,
    Done { matches: u8 },
}

impl ScanStatus {
    pub const IDLE: u8 = 0x7f;
    pub const DONE_FLAG: u8 = 0x80;

    pub fn from_byte(status: u8) -> ScanStatus {
        if status & Self::DONE_FLAG != 0 {
            ScanStatus::Done {
                matches: status & !Self::DONE_FLAG,
            }
        } else if status == Self::IDLE {
            ScanStatus::Idle
        } else {
            ScanStatus::InProgress(status)
        }
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self, ScanStatus::InProgress(_))
    }
}

/// Pin assignment of a JTAG port found by the scanner.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct JtagMatch {
    pub tck: u8,
    pub tms: u8,
    pub tdi: u8,
    pub tdo: u8,
    pub ntrst: u8,
    pub irlen: u8,
    pub ntoggle: u8,
    /// Nonzero if the pins may be shorted together.
    pub short_warn: u8,
}

impl JtagMatch {
    pub const SIZE: usize = 8;

    pub fn from_bytes(b: &[u8; 8]) -> JtagMatch {
        JtagMatch {
            tck: b[0],
            tms: b[1],
            tdi: b[2],
            tdo: b[3],
            ntrst: b[4],
            irlen: b[5],
            ntoggle: b[6],
            short_warn: b[7],
        }
    }
}

impl Display for JtagMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TCK={} TMS={} TDI={} TDO={} nTRST={} ",
            self.tck, self.tms, self.tdi, self.tdo, self.ntrst
        )?;
        if self.irlen > 0 {
            write!(f, "IRLEN={}", self.irlen)?;
        } else {
            write!(f, "#toggle={}", self.ntoggle)?;
        }
        if self.short_warn != 0 {
            write!(f, " (W: may be short-circuit: {})", self.short_warn)?;
        }
        Ok(())
    }
}

/// Pin assignment and IDCODE of an SWD port found by the scanner.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SwdMatch {
    pub swclk: u8,
    pub swdio: u8,
    pub idcode: u32,
}

impl SwdMatch {
    pub const SIZE: usize = 6;

    pub fn from_bytes(b: &[u8; 6]) -> SwdMatch {
        SwdMatch {
            swclk: b[0],
            swdio: b[1],
            idcode: u32::from_le_bytes([b[2], b[3], b[4], b[5]]),
        }
    }
}

impl Display for SwdMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SWCLK={} SWDIO={} idcode={:08x}",
            self.swclk, self.swdio, self.idcode
        )
    }
}

/// Decodes a payload of back-to-back fixed size records.
pub(crate) fn decode_records<const N: usize, R>(
    payload: &[u8],
    decode: impl Fn(&[u8; N]) -> R,
) -> Result<Vec<R>> {
    let chunks = payload.chunks_exact(N);
    if !chunks.remainder().is_empty() {
        return Err(Error::Framing(format!(
            "scan result of {} bytes is not a multiple of the {} byte record size",
            payload.len(),
            N
        )));
    }
    Ok(chunks
        .map(|chunk| {
            let mut record = [0u8; N];
            record.copy_from_slice(chunk);
            decode(&record)
        })
        .collect())
}

/// Matches of a finished scan.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ScanResult {
    Jtag(Vec<JtagMatch>),
    Swd(Vec<SwdMatch>),
    /// The scan was stopped before it finished.
    Stopped,
}
