//! XVC backend that executes shifts on a [`JtagAdapter`].
use xvc_server::XvcServer;

use crate::adapter::JtagAdapter;
use crate::error::BridgeError;
use crate::splitter::{BitWriter, split_sequence};

pub const MIN_CLOCK_HZ: u32 = 1_000;
pub const MAX_CLOCK_HZ: u32 = 10_000_000;

/// Nearest supported TCK frequency for a requested period.
pub fn clock_for_period(period_ns: u32) -> u32 {
    if period_ns == 0 {
        return MAX_CLOCK_HZ;
    }
    let period = u64::from(period_ns);
    let hz = (1_000_000_000 + period / 2) / period;
    hz.clamp(u64::from(MIN_CLOCK_HZ), u64::from(MAX_CLOCK_HZ)) as u32
}

pub struct DapBridge<A: JtagAdapter> {
    adapter: A,
    clock_hz: Option<u32>,
}

impl<A: JtagAdapter> DapBridge<A> {
    pub fn new(adapter: A) -> DapBridge<A> {
        DapBridge {
            adapter,
            clock_hz: None,
        }
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn into_adapter(self) -> A {
        self.adapter
    }

    /// The clock last sent to the adapter.
    pub fn clock_hz(&self) -> Option<u32> {
        self.clock_hz
    }
}

impl<A: JtagAdapter> XvcServer for DapBridge<A> {
    type Error = BridgeError;

    /// Moves the adapter to the nearest supported clock. The client gets its
    /// own period back.
    fn set_tck(&mut self, period_ns: u32) -> Result<u32, BridgeError> {
        let hz = clock_for_period(period_ns);
        if self.clock_hz != Some(hz) {
            log::info!("TCK period {} ns, setting adapter clock to {} Hz", period_ns, hz);
            self.adapter.set_clock(hz)?;
            self.clock_hz = Some(hz);
        }
        Ok(period_ns)
    }

    fn shift(&mut self, num_bits: u32, tms: &[u8], tdi: &[u8]) -> Result<Box<[u8]>, BridgeError> {
        let sequences = split_sequence(num_bits, tms, tdi)?;
        log::debug!(
            "Shifting {} bits in {} sequences",
            num_bits,
            sequences.len()
        );

        let mut tdo = BitWriter::with_capacity(num_bits);
        for seq in &sequences {
            let bits = self
                .adapter
                .jtag_sequence(seq.nbits, seq.tms, seq.tdi, true)?;
            tdo.push_bits(bits, seq.nbits);
        }

        if tdo.len() != num_bits as usize {
            return Err(BridgeError::InternalConsistency {
                expected: num_bits,
                got: tdo.len() as u32,
            });
        }
        Ok(tdo.into_bytes())
    }
}
