//! Line transport
//!
//! Wraps a [`CommunicationChannel`] with newline framing. The write half and the
//! read half are separate handles behind separate locks, so the reader loop can
//! sit in a blocking read while the caller keeps writing commands.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::serial::open_port;
use super::stream::{CommunicationChannel, SerialChannel};
use super::{lock, ProtocolError};
use crate::settings::SerialSettings;

/// Read half plus bytes received after the last newline
struct LineReader {
    channel: Box<dyn CommunicationChannel>,
    buffer: Vec<u8>,
}

impl LineReader {
    /// Pop one complete line off the buffer, without its terminator
    fn take_line(&mut self) -> Option<String> {
        let pos = self.buffer.iter().position(|&b| b == b'\n')?;
        let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
        let text = String::from_utf8_lossy(&raw);
        Some(text.trim_end_matches(['\r', '\n']).to_string())
    }
}

/// An open byte stream to the device
pub struct Transport {
    port_name: String,
    writer: Mutex<Option<Box<dyn CommunicationChannel>>>,
    reader: Mutex<Option<LineReader>>,
    open: AtomicBool,
    bytes_written: AtomicU64,
    lines_read: AtomicU64,
}

impl Transport {
    /// Open the serial port described by `settings`
    pub fn open(settings: &SerialSettings) -> Result<Self, ProtocolError> {
        let port = open_port(settings)?;
        Self::from_channel(settings.port_name.clone(), Box::new(SerialChannel::new(port)))
    }

    /// Build a transport over an already open channel
    pub fn from_channel(
        port_name: impl Into<String>,
        channel: Box<dyn CommunicationChannel>,
    ) -> Result<Self, ProtocolError> {
        let port_name = port_name.into();
        let read_half = channel
            .try_clone()
            .map_err(|e| ProtocolError::DeviceUnavailable(format!("{}: {}", port_name, e)))?;
        info!(port = %port_name, "transport open");

        Ok(Self {
            port_name,
            writer: Mutex::new(Some(channel)),
            reader: Mutex::new(Some(LineReader {
                channel: read_half,
                buffer: Vec::new(),
            })),
            open: AtomicBool::new(true),
            bytes_written: AtomicU64::new(0),
            lines_read: AtomicU64::new(0),
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Never blocks
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    pub fn lines_read(&self) -> u64 {
        self.lines_read.load(Ordering::Relaxed)
    }

    /// Write `data` in full. A failed write closes the transport.
    pub fn write(&self, data: &[u8]) -> Result<(), ProtocolError> {
        let mut guard = lock(&self.writer);
        let channel = guard.as_mut().ok_or(ProtocolError::NotConnected)?;

        let result = channel.write_all(data).and_then(|_| channel.flush());
        match result {
            Ok(()) => {
                self.bytes_written
                    .fetch_add(data.len() as u64, Ordering::Relaxed);
                debug!(port = %self.port_name, data = %String::from_utf8_lossy(data).trim_end(), "wrote");
                Ok(())
            }
            Err(e) => {
                warn!(port = %self.port_name, error = %e, "write failed, closing transport");
                *guard = None;
                self.open.store(false, Ordering::SeqCst);
                Err(ProtocolError::IoFailure(e.to_string()))
            }
        }
    }

    /// Block for up to `timeout` waiting for the next complete line.
    ///
    /// Returns `Ok(None)` when the timeout elapses; a partial line stays
    /// buffered for the next call. A read error closes the transport.
    pub fn read_line(&self, timeout: Duration) -> Result<Option<String>, ProtocolError> {
        let mut guard = lock(&self.reader);
        if !self.is_open() {
            // The write side already failed; drop our half too
            *guard = None;
            return Err(ProtocolError::NotConnected);
        }
        let reader = guard.as_mut().ok_or(ProtocolError::NotConnected)?;

        if let Some(line) = reader.take_line() {
            self.lines_read.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(line));
        }

        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 256];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            let result = reader
                .channel
                .set_timeout(remaining)
                .and_then(|_| reader.channel.read(&mut chunk));
            match result {
                Ok(0) => {
                    let e = io::Error::new(io::ErrorKind::UnexpectedEof, "stream closed by device");
                    return Err(self.fail_read(&mut guard, e));
                }
                Ok(n) => {
                    reader.buffer.extend_from_slice(&chunk[..n]);
                    if let Some(line) = reader.take_line() {
                        self.lines_read.fetch_add(1, Ordering::Relaxed);
                        return Ok(Some(line));
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                    ) => {}
                Err(e) => return Err(self.fail_read(&mut guard, e)),
            }
        }
    }

    fn fail_read(&self, reader: &mut Option<LineReader>, e: io::Error) -> ProtocolError {
        warn!(port = %self.port_name, error = %e, "read failed, closing transport");
        *reader = None;
        self.open.store(false, Ordering::SeqCst);
        *lock(&self.writer) = None;
        ProtocolError::IoFailure(e.to_string())
    }

    /// Drop any received bytes that have not been read as lines yet
    pub fn clear_input(&self) -> Result<(), ProtocolError> {
        let mut guard = lock(&self.reader);
        let reader = guard.as_mut().ok_or(ProtocolError::NotConnected)?;
        reader.buffer.clear();
        reader
            .channel
            .clear_input_buffer()
            .map_err(|e| ProtocolError::IoFailure(e.to_string()))
    }

    /// Release the device. Waits for an in-flight read to return first.
    ///
    /// Closing an already closed transport is a no-op.
    pub fn close(&self) -> Result<(), ProtocolError> {
        let mut reader = lock(&self.reader);
        let mut writer = lock(&self.writer);

        if let Some(channel) = writer.as_mut() {
            if let Err(e) = channel.close() {
                warn!(port = %self.port_name, error = %e, "device refused to close");
                return Err(ProtocolError::CloseFailure(e.to_string()));
            }
        }

        let was_open = writer.is_some() || reader.is_some();
        *writer = None;
        *reader = None;
        self.open.store(false, Ordering::SeqCst);
        if was_open {
            info!(port = %self.port_name, "transport closed");
        }
        Ok(())
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
