//! Access through the character device created by the kernel driver.
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::AsFd;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

use crate::connection::Backend;
use crate::error::{Error, Result, TransportError};
use crate::transport::{Transport, probe_version};

pub const DEVICE_DIR: &str = "/dev";
pub const DEVICE_PREFIX: &str = "dragonprobe-";

pub struct CharDeviceTransport {
    file: Option<File>,
    path: PathBuf,
    timeout: Duration,
}

impl CharDeviceTransport {
    pub fn open(path: &Path, timeout: Duration) -> std::result::Result<Self, TransportError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::NotFound => {
                    TransportError::NotFound(format!("{}", path.display()))
                }
                _ => TransportError::Busy(format!("cannot open {}: {}", path.display(), err)),
            })?;
        Ok(CharDeviceTransport {
            file: Some(file),
            path: path.to_path_buf(),
            timeout,
        })
    }

    fn poll_timeout(&self) -> PollTimeout {
        let millis = self.timeout.as_millis().min(u128::from(u16::MAX)) as u16;
        PollTimeout::from(millis)
    }
}

impl Transport for CharDeviceTransport {
    fn read_raw(&mut self, buf: &mut [u8]) -> std::result::Result<usize, TransportError> {
        let timeout = self.poll_timeout();
        let file = self.file.as_mut().ok_or(TransportError::Disconnected)?;
        let ready = {
            let mut fds = [PollFd::new(file.as_fd(), PollFlags::POLLIN)];
            poll(&mut fds, timeout).map_err(std::io::Error::from)?
        };
        if ready == 0 {
            return Ok(0);
        }
        let n = file.read(buf)?;
        log::trace!("Read raw: {:02x?}", &buf[..n]);
        Ok(n)
    }

    fn write_raw(&mut self, data: &[u8]) -> std::result::Result<usize, TransportError> {
        let file = self.file.as_mut().ok_or(TransportError::Disconnected)?;
        Ok(file.write(data)?)
    }

    fn close(&mut self) {
        if self.file.take().is_some() {
            log::debug!("Closed {}", self.path.display());
        }
    }

    fn describe(&self) -> String {
        format!("chardev {}", self.path.display())
    }
}

fn is_device_name(name: &str) -> bool {
    name.strip_prefix(DEVICE_PREFIX)
        .is_some_and(|index| !index.is_empty() && index.chars().all(|c| c.is_ascii_digit()))
}

/// Talks to devices bound to the kernel driver via `/dev/dragonprobe-N`.
#[derive(Clone, Debug)]
pub struct CharDeviceBackend {
    pub dir: PathBuf,
    pub timeout: Duration,
}

impl Default for CharDeviceBackend {
    fn default() -> Self {
        CharDeviceBackend {
            dir: PathBuf::from(DEVICE_DIR),
            timeout: crate::transport::usb::DEFAULT_TIMEOUT,
        }
    }
}

impl CharDeviceBackend {
    /// Device nodes present in [`Self::dir`], sorted by name.
    pub fn candidates(&self) -> Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(found),
            Err(err) => return Err(err.into()),
        };
        for entry in entries {
            let entry = entry?;
            if entry.file_name().to_str().is_some_and(is_device_name) {
                found.push(entry.path());
            }
        }
        found.sort();
        Ok(found)
    }

    fn open_path(&self, path: &Path) -> Result<Box<dyn Transport>> {
        let mut transport = CharDeviceTransport::open(path, self.timeout)?;
        if let Err(err) = probe_version(&mut transport) {
            transport.close();
            return Err(err);
        }
        Ok(Box::new(transport))
    }
}

impl Backend for CharDeviceBackend {
    fn name(&self) -> &'static str {
        "chardev"
    }

    fn is_path(&self, conn: &str) -> bool {
        let path = Path::new(conn);
        if path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(is_device_name)
        {
            return true;
        }
        std::fs::metadata(path).is_ok_and(|meta| meta.file_type().is_char_device())
    }

    fn try_open(&self, conn: &str) -> Result<Box<dyn Transport>> {
        self.open_path(Path::new(conn)).map_err(|err| match err {
            Error::Transport(TransportError::NotFound(_)) => Error::Transport(
                TransportError::NotFound(format!("could not open character device '{}'", conn)),
            ),
            other => other,
        })
    }

    fn try_find(&self) -> Result<Option<Box<dyn Transport>>> {
        match self.candidates()?.as_slice() {
            [path] => self.open_path(path).map(Some),
            [] => Ok(None),
            many => Err(Error::Transport(TransportError::Ambiguous(format!(
                "found {} character devices, select one with a connection string: {}",
                many.len(),
                many.iter()
                    .map(|path| path.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )))),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn device_names() {
        assert!(is_device_name("dragonprobe-0"));
        assert!(is_device_name("dragonprobe-12"));
        assert!(!is_device_name("dragonprobe-"));
        assert!(!is_device_name("dragonprobe-a"));
        assert!(!is_device_name("ttyACM0"));
    }

    #[test]
    fn recognises_device_paths() {
        let backend = CharDeviceBackend::default();
        assert!(backend.is_path("/dev/dragonprobe-3"));
        assert!(!backend.is_path("cafe:1312"));
        assert!(!backend.is_path("/nonexistent/file"));
    }

    #[test]
    fn missing_directory_has_no_candidates() {
        let backend = CharDeviceBackend {
            dir: PathBuf::from("/nonexistent/dragonprobe/dir"),
            timeout: Duration::from_millis(10),
        };
        assert!(backend.candidates().unwrap().is_empty());
        assert!(backend.try_find().unwrap().is_none());
    }

    #[test]
    fn several_devices_are_ambiguous() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("dragonprobe-0")).unwrap();
        std::fs::File::create(dir.path().join("dragonprobe-1")).unwrap();
        std::fs::File::create(dir.path().join("ttyACM0")).unwrap();
        let backend = CharDeviceBackend {
            dir: dir.path().to_path_buf(),
            timeout: Duration::from_millis(10),
        };
        assert_eq!(backend.candidates().unwrap().len(), 2);
        match backend.try_find() {
            Err(Error::Transport(TransportError::Ambiguous(message))) => {
                assert!(message.contains("dragonprobe-0"));
                assert!(message.contains("dragonprobe-1"));
            }
            Err(other) => panic!("expected Ambiguous, got {:?}", other),
            Ok(found) => panic!("expected Ambiguous, got {:?}", found.map(|t| t.describe())),
        }
    }

    #[test]
    fn missing_device_is_not_found() {
        let backend = CharDeviceBackend::default();
        match backend.try_open("/nonexistent/dragonprobe-99") {
            Err(Error::Transport(TransportError::NotFound(_))) => {}
            Err(other) => panic!("expected NotFound, got {:?}", other),
            Ok(_) => panic!("expected NotFound"),
        }
    }
}
