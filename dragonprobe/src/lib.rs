//! # Dragon Probe host library
//!
//! Host side of the configuration protocol spoken by the Dragon Probe, a
//! multi-mode debug probe (CMSIS-DAP, UART bridge, I2C temperature sensor
//! emulation, JTAG/SWD pinout scanner, logic analyzer).
//!
//! ## Overview
//!
//! The device exposes a vendor interface carrying a simple request/response
//! protocol. Every command is a short byte string; every response is
//!
//! ```text
//! [status: u8][length: varint, 1..=3 bytes][payload: length bytes]
//! ```
//!
//! The crate is layered the same way:
//!
//! - [`transport`]: raw packet endpoints (direct USB via `nusb`, the kernel
//!   driver's character device, and an in-memory script for tests)
//! - [`codec`]: buffering, response framing and status checks
//! - [`session`]: negotiation on connect and typed per-mode operations
//! - [`connection`]: mapping of connection strings to backends
//!
//! ## Basic Usage
//!
//! ```no_run
//! use dragonprobe::Registry;
//!
//! let registry = Registry::with_defaults();
//! let mut session = registry.connect(Some("cafe:1312"))?;
//! println!("{} (protocol {:04x})", session.info_text(), session.protocol_version());
//! for (mode, info) in session.modes() {
//!     println!("mode {}: {}", mode, info);
//! }
//! if session.current_mode() == 1 {
//!     println!("hw flow control: {}", session.uart_flow_control()?);
//! }
//! # Ok::<(), dragonprobe::Error>(())
//! ```
//!
//! Switching modes makes the device re-enumerate, so
//! [`Session::set_mode`] consumes the session.

pub mod codec;
pub mod connection;
pub mod error;
pub mod scan;
pub mod session;
pub mod storage;
pub mod transport;

pub use connection::{Backend, Registry};
pub use error::{Error, ProtocolError, Result, StatusKind, TransportError};
pub use scan::{JtagMatch, ScanResult, ScanStatus, ScanType, SwdMatch};
pub use session::{AddressChange, ModeInfo, Session};
pub use storage::StorageInfo;
pub use transport::Transport;
