//! PWM Frequency Detector
//!
//! Measures the period between two rising edges of a sampled logic signal.
//! Repeated samples at the same level are ignored, so a slow sampler that sees
//! each level several times still measures one cycle per rise-fall-rise.
//!
//! There is no averaging: each emitted value is one full cycle.

use std::time::Duration;
use tracing::debug;

/// Detector progress through one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    Idle,
    FirstEdgeSeen,
    FallingEdgeSeen,
    SecondRisingEdgeSeen,
}

#[derive(Debug, Clone)]
pub struct FrequencyDetector {
    state: DetectorState,
    /// Timestamp of the first rising edge of the cycle in progress
    t1: Option<Duration>,
    /// Timestamp of the second rising edge, once seen
    t2: Option<Duration>,
}

impl Default for FrequencyDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl FrequencyDetector {
    pub fn new() -> Self {
        Self {
            state: DetectorState::Idle,
            t1: None,
            t2: None,
        }
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    /// The last two rising edge timestamps, when known
    pub fn edges(&self) -> (Option<Duration>, Option<Duration>) {
        (self.t1, self.t2)
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Feed one sample taken at `at` (any monotonic origin).
    ///
    /// Returns the frequency in Hz when this sample completes a cycle.
    pub fn push(&mut self, high: bool, at: Duration) -> Option<f64> {
        match (self.state, high) {
            (DetectorState::Idle, true) => {
                self.t1 = Some(at);
                self.t2 = None;
                self.state = DetectorState::FirstEdgeSeen;
                None
            }
            (DetectorState::FirstEdgeSeen, false) => {
                self.state = DetectorState::FallingEdgeSeen;
                None
            }
            (DetectorState::FallingEdgeSeen, true) => {
                self.t2 = Some(at);
                self.state = DetectorState::SecondRisingEdgeSeen;
                let t1 = self.t1?;
                if at <= t1 {
                    debug!(?t1, t2 = ?at, "non-increasing edge timestamps, skipping");
                    return None;
                }
                let hz = 1.0 / (at - t1).as_secs_f64();
                debug!(hz, "cycle measured");
                Some(hz)
            }
            (DetectorState::SecondRisingEdgeSeen, false) => {
                self.state = DetectorState::Idle;
                None
            }
            _ => None,
        }
    }
}
