use crate::error::BridgeError;

/// A debug adapter that can clock raw JTAG sequences.
///
/// Calls must not overlap. Each sequence continues from the TAP state the
/// previous one left behind.
pub trait JtagAdapter {
    /// Sets the TCK frequency in Hz.
    fn set_clock(&mut self, hz: u32) -> Result<(), BridgeError>;

    /// Clocks `cycles` (1..=64) cycles with constant `tms`, shifting out the
    /// bits of `tdi` starting at bit 0. Returns the sampled TDO bits in the
    /// same order if `read_tdo` is set, otherwise 0.
    fn jtag_sequence(
        &mut self,
        cycles: u8,
        tms: bool,
        tdi: u64,
        read_tdo: bool,
    ) -> Result<u64, BridgeError>;
}

impl<A: JtagAdapter + ?Sized> JtagAdapter for Box<A> {
    fn set_clock(&mut self, hz: u32) -> Result<(), BridgeError> {
        (**self).set_clock(hz)
    }

    fn jtag_sequence(
        &mut self,
        cycles: u8,
        tms: bool,
        tdi: u64,
        read_tdo: bool,
    ) -> Result<u64, BridgeError> {
        (**self).jtag_sequence(cycles, tms, tdi, read_tdo)
    }
}

/// One call to [`JtagAdapter::jtag_sequence`] as seen by [`Loopback`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SequenceCall {
    pub cycles: u8,
    pub tms: bool,
    pub tdi: u64,
}

/// Adapter without hardware that answers every sequence with its own TDI.
///
/// Records what it was asked to do, which makes it useful to exercise XVC
/// clients and the bridge without a probe attached.
#[derive(Debug, Default)]
pub struct Loopback {
    pub clock_hz: Option<u32>,
    pub calls: Vec<SequenceCall>,
}

impl JtagAdapter for Loopback {
    fn set_clock(&mut self, hz: u32) -> Result<(), BridgeError> {
        self.clock_hz = Some(hz);
        Ok(())
    }

    fn jtag_sequence(
        &mut self,
        cycles: u8,
        tms: bool,
        tdi: u64,
        read_tdo: bool,
    ) -> Result<u64, BridgeError> {
        self.calls.push(SequenceCall { cycles, tms, tdi });
        Ok(if read_tdo { tdi } else { 0 })
    }
}
