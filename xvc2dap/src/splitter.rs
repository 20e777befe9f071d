//! Splitting of XVC shift vectors into adapter-sized JTAG sequences.
//!
//! A CMSIS-DAP JTAG sequence clocks at most 64 cycles with a constant TMS
//! level. An XVC `shift` has arbitrary length and TMS may change on every
//! bit, so it is cut into runs of equal TMS, each at most 64 bits long.
use xvc_protocol::vector_bytes;

use crate::error::BridgeError;

/// Most cycles a single adapter sequence can clock.
pub const MAX_SEQ_BITS: u8 = 64;

/// One run of cycles with constant TMS.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct JtagSeq {
    /// Number of cycles, `1..=64`.
    pub nbits: u8,
    pub tms: bool,
    /// TDI bits, first cycle in bit 0.
    pub tdi: u64,
}

/// Bit `i` of a vector stored LSB-first within each byte.
pub fn bit_at(vector: &[u8], i: usize) -> bool {
    (vector[i / 8] >> (i % 8)) & 1 != 0
}

/// Splits `nbits` cycles of `tms` and `tdi` into sequences.
///
/// A new sequence starts whenever TMS changes or the current one is full.
pub fn split_sequence(nbits: u32, tms: &[u8], tdi: &[u8]) -> Result<Vec<JtagSeq>, BridgeError> {
    let expected = vector_bytes(nbits);
    if tms.len() != expected || tdi.len() != expected {
        return Err(BridgeError::VectorLength {
            nbits,
            expected,
            tms: tms.len(),
            tdi: tdi.len(),
        });
    }

    let mut blocks: Vec<JtagSeq> =
        Vec::with_capacity(nbits.div_ceil(u32::from(MAX_SEQ_BITS)) as usize);
    for i in 0..nbits as usize {
        let tms_bit = bit_at(tms, i);
        let tdi_bit = u64::from(bit_at(tdi, i));
        match blocks.last_mut() {
            Some(block) if block.tms == tms_bit && block.nbits < MAX_SEQ_BITS => {
                block.tdi |= tdi_bit << block.nbits;
                block.nbits += 1;
            }
            _ => blocks.push(JtagSeq {
                nbits: 1,
                tms: tms_bit,
                tdi: tdi_bit,
            }),
        }
    }

    let total: u32 = blocks.iter().map(|block| u32::from(block.nbits)).sum();
    if total != nbits {
        return Err(BridgeError::InternalConsistency {
            expected: nbits,
            got: total,
        });
    }
    Ok(blocks)
}

/// Concatenates TDO bits of consecutive sequences into a byte vector.
#[derive(Debug, Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    len: usize,
}

impl BitWriter {
    pub fn with_capacity(nbits: u32) -> BitWriter {
        BitWriter {
            bytes: Vec::with_capacity(vector_bytes(nbits)),
            len: 0,
        }
    }

    /// Number of bits written so far.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends the low `count` bits of `value`, bit 0 first.
    pub fn push_bits(&mut self, value: u64, count: u8) {
        for bit in 0..count {
            if self.len % 8 == 0 {
                self.bytes.push(0);
            }
            let level = ((value >> bit) & 1) as u8;
            if let Some(last) = self.bytes.last_mut() {
                *last |= level << (self.len % 8);
            }
            self.len += 1;
        }
    }

    pub fn into_bytes(self) -> Box<[u8]> {
        self.bytes.into_boxed_slice()
    }
}
