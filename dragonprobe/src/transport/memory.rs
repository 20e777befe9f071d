//! In-memory transport that replays scripted device output.
//!
//! Used to exercise the codec and session without hardware. Every call to
//! `read_raw` hands out the next scripted chunk, which makes it easy to
//! reproduce how a real device splits its replies over USB packets.
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::error::TransportError;
use crate::transport::Transport;

/// Shared record of every write issued to a [`MemoryTransport`].
#[derive(Clone, Debug, Default)]
pub struct WriteLog(Arc<Mutex<Vec<Vec<u8>>>>);

impl WriteLog {
    /// All writes seen so far, in order.
    pub fn commands(&self) -> Vec<Vec<u8>> {
        match self.0.lock() {
            Ok(log) => log.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn push(&self, data: &[u8]) {
        match self.0.lock() {
            Ok(mut log) => log.push(data.to_vec()),
            Err(poisoned) => poisoned.into_inner().push(data.to_vec()),
        }
    }
}

#[derive(Debug)]
pub struct MemoryTransport {
    chunks: VecDeque<Vec<u8>>,
    log: WriteLog,
    closed: bool,
}

impl MemoryTransport {
    /// Each element of `chunks` is returned by one read. An empty chunk
    /// models a read that timed out. Once the script is exhausted every
    /// read returns zero bytes.
    pub fn new(chunks: Vec<Vec<u8>>) -> MemoryTransport {
        MemoryTransport {
            chunks: chunks.into(),
            log: WriteLog::default(),
            closed: false,
        }
    }

    /// Splits `stream` into reads of at most `chunk_size` bytes.
    pub fn chunked(stream: &[u8], chunk_size: usize) -> MemoryTransport {
        MemoryTransport::new(
            stream
                .chunks(chunk_size.max(1))
                .map(|chunk| chunk.to_vec())
                .collect(),
        )
    }

    pub fn write_log(&self) -> WriteLog {
        self.log.clone()
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.log.commands()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Transport for MemoryTransport {
    fn read_raw(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.closed {
            return Err(TransportError::Disconnected);
        }
        let Some(mut chunk) = self.chunks.pop_front() else {
            return Ok(0);
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            chunk.drain(..n);
            self.chunks.push_front(chunk);
        }
        Ok(n)
    }

    fn write_raw(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        if self.closed {
            return Err(TransportError::Disconnected);
        }
        self.log.push(data);
        Ok(data.len())
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
