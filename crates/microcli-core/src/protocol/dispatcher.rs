//! Line routing
//!
//! Every line the reader loop receives goes through [`Dispatcher::dispatch`]:
//!
//! | line            | monitoring | pending | goes to                         |
//! |-----------------|------------|---------|---------------------------------|
//! | `pwm:<n>`       | yes        | any     | detector + `on_telemetry_sample` |
//! | `pwm:<n>`       | just ended | any     | `on_line`                        |
//! | `OK`            | yes        | no      | dropped                          |
//! | `...EOT...`     | no         | any     | text before marker, then ends    |
//! | anything else   | any        | yes     | pending reply                    |
//! | anything else   | any        | no      | `on_line`                        |

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use super::classify::{classify, LineKind};
use super::session::SharedSession;
use super::lock;
use crate::events::{EventSink, LinkState};

/// Where a line ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Telemetry,
    Suppressed,
    Reply,
    Unsolicited,
    /// Sentinel seen; the one-shot read sequence is over
    EndOfResponse,
}

#[derive(Clone)]
pub struct Dispatcher {
    session: SharedSession,
    sink: Arc<dyn EventSink>,
}

impl Dispatcher {
    pub(crate) fn new(session: SharedSession, sink: Arc<dyn EventSink>) -> Self {
        Self { session, sink }
    }

    pub fn dispatch(&self, line: &str) -> Route {
        let mut session = lock(&self.session);
        let monitoring = session.monitoring.is_some();

        match classify(line) {
            LineKind::TelemetrySample(high) if monitoring => {
                let hz = session.monitoring.as_mut().and_then(|m| {
                    let at = m.elapsed();
                    m.detector.push(high, at)
                });
                drop(session);

                self.sink.on_telemetry_sample(high);
                if let Some(hz) = hz {
                    self.sink.on_frequency_measured(hz);
                }
                Route::Telemetry
            }
            LineKind::TelemetrySample(_) if session.draining(Instant::now()) => {
                drop(session);
                debug!(line = %line, "late telemetry after stop");
                self.sink.on_line(line);
                Route::Unsolicited
            }
            LineKind::StatusLine if monitoring => {
                if session.resolve(line) {
                    drop(session);
                    self.sink.on_reply(line);
                    Route::Reply
                } else {
                    Route::Suppressed
                }
            }
            LineKind::Sentinel(text) if !monitoring => {
                let resolved = !text.is_empty() && session.resolve(text);
                session.end_of_response();
                drop(session);

                if !text.is_empty() {
                    self.emit(resolved, text);
                }
                debug!("end of response");
                Route::EndOfResponse
            }
            _ => {
                let resolved = session.resolve(line);
                drop(session);
                self.emit(resolved, line)
            }
        }
    }

    /// Report a line as a reply or as unsolicited, outside the session lock
    fn emit(&self, resolved: bool, line: &str) -> Route {
        if resolved {
            self.sink.on_reply(line);
            Route::Reply
        } else {
            self.sink.on_line(line);
            Route::Unsolicited
        }
    }

    /// The transport died underneath the reader loop
    pub(crate) fn connection_lost(&self) {
        warn!("connection lost");
        lock(&self.session).clear();
        self.sink.on_connection_state_changed(LinkState::Disconnected);
    }

    pub(crate) fn session(&self) -> &SharedSession {
        &self.session
    }
}
