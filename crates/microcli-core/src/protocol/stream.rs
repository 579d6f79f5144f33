//! Byte channels the transport can run over

use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::time::Duration;

/// Abstraction for a bidirectional byte stream to the device
///
/// Reads must honour the timeout set with [`set_timeout`](Self::set_timeout) and
/// report its expiry as `TimedOut` or `WouldBlock`.
pub trait CommunicationChannel: Read + Write + Send {
    /// Set timeout for read operations
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Discard anything received but not yet read
    fn clear_input_buffer(&mut self) -> io::Result<()>;

    /// Open a second handle onto the same stream (used for the read side)
    fn try_clone(&self) -> io::Result<Box<dyn CommunicationChannel>>;

    /// Release the device. Errors mean the device is still held open.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Serial port wrapper implementing CommunicationChannel
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
}

impl SerialChannel {
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Read for SerialChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl CommunicationChannel for SerialChannel {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port.set_timeout(timeout).map_err(io::Error::other)
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::other)
    }

    fn try_clone(&self) -> io::Result<Box<dyn CommunicationChannel>> {
        let port_clone = self.port.try_clone().map_err(io::Error::other)?;
        Ok(Box::new(SerialChannel::new(port_clone)))
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-memory channel scripted by unit tests

    use super::CommunicationChannel;
    use std::collections::VecDeque;
    use std::io::{self, Read, Write};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct Inner {
        incoming: VecDeque<u8>,
        written: Vec<u8>,
        responses: Vec<(Vec<u8>, Vec<u8>)>,
        fail_writes: bool,
        fail_reads: bool,
        fail_close: bool,
        closed: bool,
    }

    /// Clones share one device; each clone keeps its own read timeout
    #[derive(Clone)]
    pub(crate) struct MockChannel {
        inner: Arc<Mutex<Inner>>,
        timeout: Duration,
    }

    impl MockChannel {
        pub(crate) fn new() -> Self {
            Self {
                inner: Arc::new(Mutex::new(Inner::default())),
                timeout: Duration::from_millis(10),
            }
        }

        /// Queue bytes as if the device had sent them
        pub(crate) fn feed(&self, data: &[u8]) {
            self.inner.lock().unwrap().incoming.extend(data);
        }

        /// Answer `reply` whenever exactly `command` is written
        pub(crate) fn respond(&self, command: &[u8], reply: &[u8]) {
            self.inner
                .lock()
                .unwrap()
                .responses
                .push((command.to_vec(), reply.to_vec()));
        }

        pub(crate) fn written(&self) -> Vec<u8> {
            self.inner.lock().unwrap().written.clone()
        }

        pub(crate) fn fail_writes(&self, fail: bool) {
            self.inner.lock().unwrap().fail_writes = fail;
        }

        pub(crate) fn fail_reads(&self, fail: bool) {
            self.inner.lock().unwrap().fail_reads = fail;
        }

        pub(crate) fn fail_close(&self, fail: bool) {
            self.inner.lock().unwrap().fail_close = fail;
        }

        pub(crate) fn is_closed(&self) -> bool {
            self.inner.lock().unwrap().closed
        }
    }

    impl Read for MockChannel {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let deadline = Instant::now() + self.timeout;
            loop {
                {
                    let mut inner = self.inner.lock().unwrap();
                    if inner.fail_reads {
                        return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
                    }
                    if !inner.incoming.is_empty() {
                        let n = buf.len().min(inner.incoming.len());
                        for (slot, byte) in buf.iter_mut().zip(inner.incoming.drain(..n)) {
                            *slot = byte;
                        }
                        return Ok(n);
                    }
                }
                if Instant::now() >= deadline {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out"));
                }
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }

    impl Write for MockChannel {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut inner = self.inner.lock().unwrap();
            if inner.fail_writes {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write failed"));
            }
            inner.written.extend_from_slice(buf);
            let reply = inner
                .responses
                .iter()
                .find(|(cmd, _)| cmd.as_slice() == buf)
                .map(|(_, reply)| reply.clone());
            if let Some(reply) = reply {
                inner.incoming.extend(reply);
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl CommunicationChannel for MockChannel {
        fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
            self.timeout = timeout;
            Ok(())
        }

        fn clear_input_buffer(&mut self) -> io::Result<()> {
            self.inner.lock().unwrap().incoming.clear();
            Ok(())
        }

        fn try_clone(&self) -> io::Result<Box<dyn CommunicationChannel>> {
            Ok(Box::new(self.clone()))
        }

        fn close(&mut self) -> io::Result<()> {
            let mut inner = self.inner.lock().unwrap();
            if inner.fail_close {
                return Err(io::Error::other("device still open"));
            }
            inner.closed = true;
            Ok(())
        }
    }
}
