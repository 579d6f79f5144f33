//! # MicroCLI Core Library
//!
//! Host-side engine for talking to MicroCLI firmware over a serial console.
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Serial transport with a background line reader
//! - Typed device commands (GPIO, RTC, PWM, system info)
//! - Reply correlation and unsolicited line routing
//! - PWM frequency measurement from level telemetry
//! - Persisted serial settings
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use microcli_core::prelude::*;
//!
//! # fn main() -> Result<(), ProtocolError> {
//! let mut conn = Connection::new(Arc::new(NullSink));
//! conn.open(&SerialSettings::new("/dev/ttyACM0"))?;
//!
//! let version = conn.get_version()?.wait();
//! println!("firmware: {:?}", version);
//!
//! conn.write_pin(GpioBank::A, 5, true)?.wait();
//! conn.close()?;
//! # Ok(())
//! # }
//! ```

pub mod events;
pub mod frequency;
pub mod protocol;
pub mod settings;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::events::{ChannelSink, EngineEvent, EventRecord, EventSink, LinkState, NullSink};
    pub use crate::frequency::{DetectorState, FrequencyDetector};
    pub use crate::protocol::{
        Command, Connection, GpioBank, Level, PingStatus, ProtocolError, PwmChannel, ReplyHandle,
        SessionState,
    };
    pub use crate::settings::{BaudRate, DataBits, Parity, SerialSettings, StopBits};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
