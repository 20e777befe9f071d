//! # XVC Protocol Library
//!
//! Messages of the [Xilinx Virtual Cable (XVC)](https://github.com/Xilinx/XilinxVirtualCable)
//! 1.0 protocol, used by Xilinx tools to shift JTAG vectors through a cable
//! reachable over TCP.
//!
//! ## Message Format
//!
//! Every request starts with an ASCII command token terminated by `:`.
//! Binary arguments follow without any further delimiter:
//!
//! - **GetInfo**: `getinfo:`
//! - **SetTck**: `settck:<period in ns: u32 le>`
//! - **Shift**: `shift:<num_bits: u32 le><TMS vector><TDI vector>`
//!
//! The server answers `getinfo:` with a line `xvcServer_v{version}:<max_vector_len>\n`,
//! `settck:` with a period (`u32 le`) and `shift:` with the TDO vector.
//! Vectors are `ceil(num_bits / 8)` bytes long, bit `i` is bit `i % 8` of byte `i / 8`.
//!
//! ## Basic Usage
//!
//! ```
//! use xvc_protocol::{Message, XvcInfo, Version};
//! use std::io::Cursor;
//!
//! let mut buffer = Vec::new();
//! Message::Shift { num_bits: 4, tms: Box::new([0x03]), tdi: Box::new([0x0c]) }
//!     .write_to(&mut buffer)
//!     .expect("Writing to vector shouldn't fail");
//! assert_eq!(buffer, b"shift:\x04\x00\x00\x00\x03\x0c");
//!
//! let mut reader = Cursor::new(b"xvcServer_v1.0:16384\n");
//! let info = XvcInfo::from_reader(&mut reader).expect("Info should parse");
//! assert_eq!(info.version(), Version::V1_0);
//! assert_eq!(info.max_vector_len(), 16384);
//! ```
//!
//! ## Error Handling
//!
//! Reading returns [`error::ReadError`]. Servers should treat
//! [`error::ReadError::Closed`] as the normal end of a session and may skip
//! [`error::ReadError::UnknownCommand`]; everything else leaves the stream
//! in an unknown position.

pub mod protocol;
pub use protocol::*;
pub mod codec;
pub mod error;
