//! Stand-in for the character device backend on platforms without the
//! kernel driver. Device paths are still recognised so they fail with
//! [`Error::Unsupported`] instead of "not recognised".
use std::path::Path;

use crate::connection::Backend;
use crate::error::{Error, Result};
use crate::transport::Transport;

pub const DEVICE_PREFIX: &str = "dragonprobe-";

#[derive(Clone, Debug, Default)]
pub struct CharDeviceBackend;

impl Backend for CharDeviceBackend {
    fn name(&self) -> &'static str {
        "chardev"
    }

    fn is_path(&self, conn: &str) -> bool {
        Path::new(conn)
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(DEVICE_PREFIX))
    }

    fn try_open(&self, conn: &str) -> Result<Box<dyn Transport>> {
        Err(Error::Unsupported(format!(
            "character device '{}' needs the Linux kernel driver",
            conn
        )))
    }

    fn try_find(&self) -> Result<Option<Box<dyn Transport>>> {
        Ok(None)
    }
}
