//! Serial Protocol Communication
//!
//! Implements the line-oriented console protocol spoken by MicroCLI firmware:
//! newline-terminated ASCII commands out, newline-terminated replies and
//! `pwm:<level>` telemetry back.

mod classify;
pub mod commands;
mod connection;
mod dispatcher;
mod error;
mod reader;
pub mod serial;
mod session;
mod stream;
mod transport;

pub use classify::{classify, LineKind};
pub use commands::{Command, GpioBank, Level, PwmChannel, ResponseKind};
pub use connection::{Connection, PingStatus};
pub use dispatcher::{Dispatcher, Route};
pub use error::ProtocolError;
pub use serial::{find_port_by_description, list_ports, open_port, PortInfo};
pub use session::{ReplyHandle, SessionState};
pub use stream::{CommunicationChannel, SerialChannel};
pub use transport::Transport;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Highest PWM frequency the firmware accepts, in Hz
pub const MAX_FREQ_HZ: u32 = 10_000;

/// Highest PWM duty cycle, in percent
pub const MAX_DUTY_PERCENT: u8 = 100;

/// Highest pin number within a GPIO bank
pub const MAX_PIN: u8 = 15;

/// Status line the device sends to acknowledge a command
pub const ACK: &str = "OK";

/// Marks the end of a multi-line response
pub const SENTINEL: &str = "EOT";

/// Prefix of a telemetry sample line
pub const TELEMETRY_PREFIX: &str = "pwm:";

/// Lock a mutex, recovering the data if a holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
