//! # XVC to CMSIS-DAP bridge
//!
//! Serves the Xilinx Virtual Cable protocol and executes the requested JTAG
//! shifts on a CMSIS-DAP probe, so Xilinx tools can use any CMSIS-DAP v2
//! adapter (including the Dragon Probe) as a cable.
//!
//! CMSIS-DAP only clocks up to 64 cycles per sequence with constant TMS.
//! [`splitter`] cuts each XVC shift into such sequences, [`bridge::DapBridge`]
//! runs them on a [`adapter::JtagAdapter`] and reassembles TDO, and
//! [`cmsis_dap::CmsisDap`] talks to the probe over USB.
pub mod adapter;
pub mod bridge;
pub mod cmsis_dap;
pub mod error;
pub mod splitter;

pub use adapter::JtagAdapter;
pub use bridge::DapBridge;
pub use error::BridgeError;
