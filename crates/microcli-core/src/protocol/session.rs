//! Session state shared by the caller and the reader loop
//!
//! Both the pending reply slot and the monitoring session live behind one
//! mutex. The caller arms and starts things, the dispatcher resolves and
//! feeds them; nothing else touches them.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::debug;

use super::commands::PwmChannel;
use super::ProtocolError;
use crate::frequency::FrequencyDetector;

/// Where the connection sits in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Closed,
    Idle,
    AwaitingReply,
    Monitoring,
}

/// The one outstanding reply expectation
pub(crate) struct PendingReply {
    command: String,
    tx: oneshot::Sender<String>,
    deadline: Instant,
}

/// Active telemetry session and the detector it owns
pub(crate) struct MonitoringSession {
    pub(crate) channel: PwmChannel,
    pub(crate) detector: FrequencyDetector,
    started: Instant,
}

impl MonitoringSession {
    pub(crate) fn new(channel: PwmChannel) -> Self {
        Self {
            channel,
            detector: FrequencyDetector::new(),
            started: Instant::now(),
        }
    }

    /// Timestamp a sample relative to the session start
    pub(crate) fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[derive(Default)]
pub(crate) struct Session {
    pending: Option<PendingReply>,
    pub(crate) monitoring: Option<MonitoringSession>,
    /// One-shot listening window for the reader loop
    listen_until: Option<Instant>,
    /// After monitoring stops, late telemetry is still drained until then
    drain_until: Option<Instant>,
    /// Set by whoever spawns the reader, cleared by the reader as it exits
    pub(crate) reader_active: bool,
}

pub(crate) type SharedSession = Arc<Mutex<Session>>;

impl Session {
    /// Whether a reply is still expected; an expired one is dropped here
    pub(crate) fn pending_live(&mut self, now: Instant) -> bool {
        match &self.pending {
            Some(p) if now >= p.deadline => {
                debug!(command = %p.command, "reply timed out");
                self.pending = None;
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Arm the pending slot for `command`, refusing if one is still live
    pub(crate) fn arm(
        &mut self,
        command: String,
        timeout: Duration,
    ) -> Result<ReplyHandle, ProtocolError> {
        let now = Instant::now();
        if self.pending_live(now) {
            return Err(ProtocolError::ReplyPending);
        }
        let (tx, rx) = oneshot::channel();
        debug!(command = %command, "reply armed");
        self.pending = Some(PendingReply {
            command,
            tx,
            deadline: now + timeout,
        });
        self.listen(now + timeout);
        Ok(ReplyHandle { rx })
    }

    /// Drop the pending slot without answering it
    pub(crate) fn disarm(&mut self) {
        self.pending = None;
    }

    /// Hand `line` to the pending reply, if there is one
    pub(crate) fn resolve(&mut self, line: &str) -> bool {
        if !self.pending_live(Instant::now()) {
            return false;
        }
        match self.pending.take() {
            Some(p) => {
                debug!(command = %p.command, reply = %line, "reply resolved");
                // The caller may have dropped its handle; the line is still consumed
                let _ = p.tx.send(line.to_string());
                true
            }
            None => false,
        }
    }

    /// Keep the reader listening until at least `until`
    pub(crate) fn listen(&mut self, until: Instant) {
        self.listen_until = Some(self.listen_until.map_or(until, |t| t.max(until)));
    }

    /// Keep reading until `until` so samples sent before the device saw the
    /// stop still reach the collaborator instead of a later reply
    pub(crate) fn drain(&mut self, until: Instant) {
        self.drain_until = Some(until);
        self.listen(until);
    }

    /// Whether telemetry lines are still leftovers of a stopped monitor
    pub(crate) fn draining(&self, now: Instant) -> bool {
        self.monitoring.is_none() && self.drain_until.is_some_and(|t| now < t)
    }

    /// A sentinel closed the current one-shot read sequence
    pub(crate) fn end_of_response(&mut self) {
        self.pending = None;
        self.listen_until = None;
    }

    /// Whether the reader loop has a reason to do another read
    pub(crate) fn keep_reading(&mut self, now: Instant) -> bool {
        if self.monitoring.is_some() || self.pending_live(now) {
            return true;
        }
        self.listen_until.is_some_and(|t| now < t)
    }

    /// Forget everything; used when the transport goes away
    pub(crate) fn clear(&mut self) {
        self.pending = None;
        self.monitoring = None;
        self.listen_until = None;
        self.drain_until = None;
    }
}

/// Receives the reply to one command
///
/// Yields `None` when no reply arrived in time, the transport closed, or the
/// device ended the response without one.
#[derive(Debug)]
pub struct ReplyHandle {
    rx: oneshot::Receiver<String>,
}

impl ReplyHandle {
    /// Block the current thread until the reply arrives or is abandoned.
    ///
    /// Must not be called from inside an async runtime; use [`recv`](Self::recv).
    pub fn wait(self) -> Option<String> {
        self.rx.blocking_recv().ok()
    }

    pub async fn recv(self) -> Option<String> {
        self.rx.await.ok()
    }

    /// Take the reply if it has already arrived
    pub fn try_take(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }
}
