//! Protocol commands
//!
//! Typed commands understood by the device console. Every command is a single
//! line: a verb followed by space separated arguments and a trailing `\n`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{ProtocolError, MAX_DUTY_PERCENT, MAX_FREQ_HZ, MAX_PIN};

/// GPIO port letter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpioBank {
    A,
    B,
    C,
    D,
    E,
    H,
}

impl GpioBank {
    pub const ALL: [GpioBank; 6] = [
        GpioBank::A,
        GpioBank::B,
        GpioBank::C,
        GpioBank::D,
        GpioBank::E,
        GpioBank::H,
    ];

    /// Lowercase letter as sent on the wire
    pub fn as_char(self) -> char {
        match self {
            GpioBank::A => 'a',
            GpioBank::B => 'b',
            GpioBank::C => 'c',
            GpioBank::D => 'd',
            GpioBank::E => 'e',
            GpioBank::H => 'h',
        }
    }
}

impl TryFrom<char> for GpioBank {
    type Error = ProtocolError;

    fn try_from(c: char) -> Result<Self, Self::Error> {
        let lower = c.to_ascii_lowercase();
        GpioBank::ALL
            .into_iter()
            .find(|b| b.as_char() == lower)
            .ok_or_else(|| ProtocolError::invalid(format!("unknown GPIO bank '{}'", c)))
    }
}

impl FromStr for GpioBank {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.trim().chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => GpioBank::try_from(c),
            _ => Err(ProtocolError::invalid(format!("unknown GPIO bank '{}'", s))),
        }
    }
}

impl fmt::Display for GpioBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Logic level of a pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Level {
    Low,
    High,
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high {
            Level::High
        } else {
            Level::Low
        }
    }
}

impl Level {
    fn as_digit(self) -> u8 {
        match self {
            Level::Low => 0,
            Level::High => 1,
        }
    }
}

/// PWM channel, 1 through 4
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct PwmChannel(u8);

impl PwmChannel {
    pub fn number(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for PwmChannel {
    type Error = ProtocolError;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        if (1..=4).contains(&n) {
            Ok(PwmChannel(n))
        } else {
            Err(ProtocolError::invalid(format!(
                "invalid channel {}, valid range (1-4)",
                n
            )))
        }
    }
}

impl From<PwmChannel> for u8 {
    fn from(c: PwmChannel) -> Self {
        c.0
    }
}

/// What the engine does after sending a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// Arm a pending reply; the first routed line resolves it
    Reply,
    /// Listen for free-form output without arming a reply
    Output,
    /// Nothing is read on behalf of this command
    None,
    /// Caller reads the answer directly, bypassing the reader loop
    Sync,
}

/// A fully validated command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    GpioWrite { bank: GpioBank, pin: u8, level: Level },
    GpioRead { bank: GpioBank, pin: u8 },
    RtcSet { hour: u8, minute: u8, second: u8 },
    RtcGet,
    PwmSetFrequency(u32),
    PwmSetDuty(u8),
    PwmMonitor(PwmChannel),
    StopMonitor,
    Ping,
    Version,
    Help,
    Heap,
    Ticks,
    Clk,
    Stats,
    /// Free-form console input, sent as typed
    Console(String),
}

fn check_pin(pin: u8) -> Result<(), ProtocolError> {
    if pin > MAX_PIN {
        return Err(ProtocolError::invalid(format!(
            "pin {} out of range (0-{})",
            pin, MAX_PIN
        )));
    }
    Ok(())
}

impl Command {
    pub fn gpio_write(bank: GpioBank, pin: u8, level: impl Into<Level>) -> Result<Self, ProtocolError> {
        check_pin(pin)?;
        Ok(Command::GpioWrite {
            bank,
            pin,
            level: level.into(),
        })
    }

    pub fn gpio_read(bank: GpioBank, pin: u8) -> Result<Self, ProtocolError> {
        check_pin(pin)?;
        Ok(Command::GpioRead { bank, pin })
    }

    pub fn rtc_set(hour: u8, minute: u8, second: u8) -> Result<Self, ProtocolError> {
        if hour > 23 || minute > 59 || second > 59 {
            return Err(ProtocolError::invalid(format!(
                "invalid time {:02}:{:02}:{:02}",
                hour, minute, second
            )));
        }
        Ok(Command::RtcSet {
            hour,
            minute,
            second,
        })
    }

    pub fn pwm_frequency(hz: u32) -> Result<Self, ProtocolError> {
        if hz > MAX_FREQ_HZ {
            return Err(ProtocolError::invalid(format!(
                "invalid frequency {} Hz (0-{})",
                hz, MAX_FREQ_HZ
            )));
        }
        Ok(Command::PwmSetFrequency(hz))
    }

    pub fn pwm_duty(percent: u8) -> Result<Self, ProtocolError> {
        if percent > MAX_DUTY_PERCENT {
            return Err(ProtocolError::invalid(format!(
                "invalid duty {}%, it should be between 0-{}",
                percent, MAX_DUTY_PERCENT
            )));
        }
        Ok(Command::PwmSetDuty(percent))
    }

    /// Free-form line; a trailing newline is stripped and re-added on send
    pub fn console(text: impl Into<String>) -> Result<Self, ProtocolError> {
        let text = text.into();
        let line = text.trim_end_matches(['\r', '\n']);
        if line.contains('\n') {
            return Err(ProtocolError::invalid("console input must be a single line"));
        }
        Ok(Command::Console(line.to_string()))
    }

    /// The leading word on the wire
    pub fn verb(&self) -> &str {
        match self {
            Command::GpioWrite { .. } => "gpio-w",
            Command::GpioRead { .. } => "gpio-r",
            Command::RtcSet { .. } => "rtc-s",
            Command::RtcGet => "rtc-g",
            Command::PwmSetFrequency(_) => "pwm-f",
            Command::PwmSetDuty(_) => "pwm-d",
            Command::PwmMonitor(_) => "pwmMonitor",
            Command::StopMonitor => "stopMonitor",
            Command::Ping => "ping",
            Command::Version => "version",
            Command::Help => "help",
            Command::Heap => "heap",
            Command::Ticks => "ticks",
            Command::Clk => "clk",
            Command::Stats => "stats",
            Command::Console(text) => text.split_whitespace().next().unwrap_or(""),
        }
    }

    pub fn response_kind(&self) -> ResponseKind {
        match self {
            Command::PwmMonitor(_) | Command::StopMonitor => ResponseKind::None,
            Command::Ping => ResponseKind::Sync,
            Command::Console(_) => ResponseKind::Output,
            _ => ResponseKind::Reply,
        }
    }

    /// Check if this command arms a pending reply
    pub fn expects_reply(&self) -> bool {
        self.response_kind() == ResponseKind::Reply
    }

    /// Full command line including the trailing newline
    pub fn to_line(&self) -> String {
        format!("{}\n", self)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_line().into_bytes()
    }
}

impl fmt::Display for Command {
    /// The command line without its terminator
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::GpioWrite { bank, pin, level } => {
                write!(f, "gpio-w {} {} {}", bank, pin, level.as_digit())
            }
            Command::GpioRead { bank, pin } => write!(f, "gpio-r {} {}", bank, pin),
            Command::RtcSet {
                hour,
                minute,
                second,
            } => write!(f, "rtc-s {} {} {}", hour, minute, second),
            Command::PwmSetFrequency(hz) => write!(f, "pwm-f {}", hz),
            Command::PwmSetDuty(percent) => write!(f, "pwm-d {}", percent),
            Command::PwmMonitor(channel) => write!(f, "pwmMonitor {}", channel.number()),
            Command::Console(text) => f.write_str(text),
            other => f.write_str(other.verb()),
        }
    }
}
