//! Resolution of connection strings to transports.
use crate::error::{Result, TransportError};
use crate::session::Session;
use crate::transport::Transport;
use crate::transport::usb::UsbBackend;

/// A way of reaching devices, e.g. direct USB access or a kernel character device.
pub trait Backend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Whether `conn` is a connection string this backend understands.
    fn is_path(&self, conn: &str) -> bool;

    /// Opens the device named by `conn`. Only called when [`Backend::is_path`]
    /// returned true.
    fn try_open(&self, conn: &str) -> Result<Box<dyn Transport>>;

    /// Opens the single device this backend can see, if there is exactly one.
    fn try_find(&self) -> Result<Option<Box<dyn Transport>>>;
}

/// Ordered list of backends consulted by [`Registry::connect`].
pub struct Registry {
    backends: Vec<Box<dyn Backend>>,
}

impl Default for Registry {
    fn default() -> Self {
        Registry::with_defaults()
    }
}

impl Registry {
    /// A registry without any backends.
    pub fn new() -> Registry {
        Registry {
            backends: Vec::new(),
        }
    }

    /// The character device backend followed by direct USB access.
    pub fn with_defaults() -> Registry {
        let mut registry = Registry::new();
        registry.register(crate::transport::chardev::CharDeviceBackend::default());
        registry.register(UsbBackend::default());
        registry
    }

    pub fn register(&mut self, backend: impl Backend + 'static) -> &mut Registry {
        self.backends.push(Box::new(backend));
        self
    }

    pub fn backends(&self) -> impl Iterator<Item = &dyn Backend> {
        self.backends.iter().map(|backend| backend.as_ref())
    }

    /// Opens a transport.
    ///
    /// With a connection string, the first backend that recognises it opens
    /// it. Without one, each backend in order gets to look for a single
    /// device and the first hit wins. A backend seeing several devices stops
    /// the search with [`TransportError::Ambiguous`].
    pub fn open(&self, conn: Option<&str>) -> Result<Box<dyn Transport>> {
        let Some(conn) = conn else {
            for backend in &self.backends {
                if let Some(transport) = backend.try_find()? {
                    log::debug!("Backend {} found {}", backend.name(), transport.describe());
                    return Ok(transport);
                }
            }
            return Err(TransportError::NotFound(
                "no device specified, and none could be found".to_string(),
            )
            .into());
        };

        match self.backends.iter().find(|backend| backend.is_path(conn)) {
            Some(backend) => {
                log::debug!("Opening '{}' with backend {}", conn, backend.name());
                backend.try_open(conn)
            }
            None => Err(TransportError::NotFound(format!(
                "connection string '{}' not recognised",
                conn
            ))
            .into()),
        }
    }

    /// Opens a transport and negotiates a session over it.
    pub fn connect(&self, conn: Option<&str>) -> Result<Session> {
        Session::open(self.open(conn)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::codec::Response;
    use crate::error::Error;
    use crate::transport::memory::MemoryTransport;
    use std::sync::Mutex;

    /// Backend answering to a fixed prefix and serving scripted transports.
    struct MockBackend {
        name: &'static str,
        prefix: &'static str,
        found: Mutex<Option<Vec<u8>>>,
    }

    impl MockBackend {
        fn new(name: &'static str, prefix: &'static str, found: Option<Vec<u8>>) -> MockBackend {
            MockBackend {
                name,
                prefix,
                found: Mutex::new(found),
            }
        }
    }

    impl Backend for MockBackend {
        fn name(&self) -> &'static str {
            self.name
        }

        fn is_path(&self, conn: &str) -> bool {
            conn.starts_with(self.prefix)
        }

        fn try_open(&self, conn: &str) -> Result<Box<dyn Transport>> {
            if conn.ends_with("busy") {
                return Err(TransportError::Busy(conn.to_string()).into());
            }
            Ok(Box::new(MemoryTransport::new(vec![])))
        }

        fn try_find(&self) -> Result<Option<Box<dyn Transport>>> {
            let stream = self.found.lock().unwrap().take();
            Ok(stream.map(|stream| Box::new(MemoryTransport::chunked(&stream, 64)) as Box<dyn Transport>))
        }
    }

    fn describe(result: Result<Box<dyn Transport>>) -> String {
        match result {
            Ok(transport) => transport.describe(),
            Err(err) => format!("error: {}", err),
        }
    }

    #[test]
    fn explicit_connection_uses_first_matching_backend() {
        let mut registry = Registry::new();
        registry
            .register(MockBackend::new("a", "a:", None))
            .register(MockBackend::new("b", "b:", None));

        assert_eq!(describe(registry.open(Some("b:dev"))), "memory");
        assert!(matches!(
            registry.open(Some("b:busy")),
            Err(Error::Transport(TransportError::Busy(_)))
        ));
        assert!(matches!(
            registry.open(Some("c:dev")),
            Err(Error::Transport(TransportError::NotFound(_)))
        ));
    }

    #[test]
    fn discovery_tries_backends_in_order() {
        let empty = Registry::new();
        assert!(matches!(
            empty.open(None),
            Err(Error::Transport(TransportError::NotFound(_)))
        ));

        let mut registry = Registry::new();
        registry
            .register(MockBackend::new("a", "a:", None))
            .register(MockBackend::new("b", "b:", Some(vec![1, 2, 3])));
        assert_eq!(describe(registry.open(None)), "memory");
        assert_eq!(
            registry.backends().map(|b| b.name()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn ambiguous_backend_stops_discovery() {
        use crate::transport::chardev::CharDeviceBackend;
        use std::time::Duration;

        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("dragonprobe-0")).unwrap();
        std::fs::File::create(dir.path().join("dragonprobe-1")).unwrap();
        let mut registry = Registry::new();
        registry
            .register(CharDeviceBackend {
                dir: dir.path().to_path_buf(),
                timeout: Duration::from_millis(10),
            })
            .register(MockBackend::new("other", "other:", Some(vec![1, 2, 3])));

        assert!(matches!(
            registry.open(None),
            Err(Error::Transport(TransportError::Ambiguous(_)))
        ));
    }

    #[test]
    fn connect_negotiates_session() {
        let mut stream = Vec::new();
        for response in [
            Response::ok(vec![0x10, 0x00]),
            Response::ok(vec![0x00, 0x00]),
            Response::ok(vec![0]),
            Response::ok(b"probe\0".to_vec()),
        ] {
            stream.extend(response.encode().unwrap());
        }
        let mut registry = Registry::new();
        registry.register(MockBackend::new("mock", "mock:", Some(stream)));
        let session = registry.connect(None).unwrap();
        assert_eq!(session.info_text(), "probe");
        assert!(session.modes().is_empty());
    }
}
