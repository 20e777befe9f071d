use dragonprobe::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("no CMSIS-DAP probe found{0}")]
    ProbeNotFound(String),

    #[error(
        "multiple CMSIS-DAP probes found, select one with --serial. Probes found: {}",
        .0.join(", ")
    )]
    AmbiguousProbe(Vec<String>),

    /// The probe answered a command with a failure status or a malformed reply.
    #[error("CMSIS-DAP command 0x{command:02x} failed: {reason}")]
    Dap { command: u8, reason: String },

    #[error("shift of {nbits} bits needs {expected} byte vectors, got tms={tms} tdi={tdi}")]
    VectorLength {
        nbits: u32,
        expected: usize,
        tms: usize,
        tdi: usize,
    },

    /// The splitter or the TDO reassembly lost track of bits.
    #[error("internal consistency error: expected {expected} bits, got {got}")]
    InternalConsistency { expected: u32, got: u32 },
}
