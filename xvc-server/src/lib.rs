//! # XVC Server Library
//!
//! Foundation for Xilinx Virtual Cable (XVC) servers: the accept loop and the
//! per-connection protocol handling, independent of the hardware that
//! actually clocks the JTAG chain.
//!
//! ## Architecture
//!
//! - **[`XvcServer`] Trait**: implemented by a backend that can set a TCK
//!   period and shift TMS/TDI vectors.
//! - **[`server::Server`]**: accepts TCP connections and runs each one as
//!   `await command -> dispatch -> await command` until the peer closes.
//!
//! Connections are served one at a time. Within a connection, messages are
//! processed strictly in arrival order.
//!
//! ## Basic Usage
//!
//! ```ignore
//! use xvc_server::server::Builder;
//!
//! let mut server = Builder::new()
//!     .advertised_vector_len(16384)
//!     .build(my_backend);
//! server.listen("127.0.0.1:2542")?;
//! ```
//!
//! ## Error Handling
//!
//! XVC 1.0 has no way to report errors to the client. A failing backend call
//! or a malformed message ends the connection it occurred on, and the server
//! goes back to accepting connections. A client that closes the connection
//! between two messages is not an error. Unknown command tokens are logged
//! and skipped.
//!
//! ## Logging
//!
//! Diagnostics go through the `log` crate: connections at `info`, every
//! message at `debug`, vector contents at `trace`.
pub mod server;

/// Backend that performs the JTAG operations requested by XVC clients.
pub trait XvcServer {
    type Error: std::error::Error;

    /// Set the TCK (Test Clock) period.
    ///
    /// Returns the period reported back to the client.
    fn set_tck(&mut self, period_ns: u32) -> Result<u32, Self::Error>;

    /// Clock `num_bits` cycles of `tms` and `tdi` through the chain and
    /// return the sampled TDO bits.
    ///
    /// `tms`, `tdi` and the returned vector are ⌈num_bits / 8⌉ bytes long.
    /// The server never calls this with `num_bits == 0`.
    fn shift(&mut self, num_bits: u32, tms: &[u8], tdi: &[u8])
    -> Result<Box<[u8]>, Self::Error>;
}
