//! Background reader loop
//!
//! One thread per open transport pulls lines and hands them to the
//! [`Dispatcher`]. Cancellation is cooperative: the stop flag is checked
//! between reads, so stopping takes at most one read timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::dispatcher::Dispatcher;
use super::session::SharedSession;
use super::transport::Transport;
use super::{lock, ProtocolError};

pub(crate) struct ReaderLoop {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ReaderLoop {
    pub(crate) fn new() -> Self {
        Self {
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Start a reader thread.
    ///
    /// The caller must already have marked the session's reader as active,
    /// under the same lock it used to decide a reader was needed.
    pub(crate) fn spawn(
        &mut self,
        transport: Arc<Transport>,
        dispatcher: Dispatcher,
        read_timeout: Duration,
    ) -> Result<(), ProtocolError> {
        // A previous one-shot reader may have exited on its own
        self.join();

        let stop = Arc::new(AtomicBool::new(false));
        self.stop = stop.clone();

        let session = dispatcher.session().clone();
        let spawned = thread::Builder::new()
            .name("microcli-reader".to_string())
            .spawn(move || run(transport, dispatcher, stop, read_timeout));

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                lock(&session).reader_active = false;
                Err(ProtocolError::IoFailure(format!("failed to spawn reader: {}", e)))
            }
        }
    }

    /// Signal the reader to stop and wait for it to exit
    pub(crate) fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.join();
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("reader thread panicked");
            }
        }
    }
}

impl Drop for ReaderLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Clears the session's reader flag when the loop exits, unwinding included
struct ActiveFlag<'a> {
    session: &'a SharedSession,
    armed: bool,
}

impl Drop for ActiveFlag<'_> {
    fn drop(&mut self) {
        if self.armed {
            lock(self.session).reader_active = false;
        }
    }
}

fn run(transport: Arc<Transport>, dispatcher: Dispatcher, stop: Arc<AtomicBool>, read_timeout: Duration) {
    info!(port = %transport.port_name(), "reader started");
    let mut active = ActiveFlag {
        session: dispatcher.session(),
        armed: true,
    };

    loop {
        if stop.load(Ordering::SeqCst) {
            debug!("reader stop requested");
            break;
        }

        {
            // Decide to exit under the same lock callers use to extend the window
            let mut session = lock(dispatcher.session());
            if !session.keep_reading(Instant::now()) {
                session.reader_active = false;
                active.armed = false;
                info!("reader idle, exiting");
                return;
            }
        }

        match transport.read_line(read_timeout) {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                let route = dispatcher.dispatch(&line);
                debug!(line = %line, ?route, "dispatched");
            }
            Ok(None) => {}
            Err(ProtocolError::NotConnected) => {
                debug!("transport closed under reader");
                break;
            }
            Err(e) => {
                warn!(error = %e, "reader failed");
                dispatcher.connection_lost();
                break;
            }
        }
    }

    info!("reader stopped");
}
