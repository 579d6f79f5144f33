//! Serial Settings
//!
//! Line parameters accepted by [`Connection::open`](crate::protocol::Connection::open),
//! plus JSON persistence so a presentation layer can remember the last used port.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::protocol::ProtocolError;

/// Supported line speeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum BaudRate {
    B1200,
    B2400,
    B4800,
    #[default]
    B9600,
    B38400,
    B115200,
    B230400,
}

impl BaudRate {
    /// Every supported rate, slowest first
    pub const ALL: [BaudRate; 7] = [
        BaudRate::B1200,
        BaudRate::B2400,
        BaudRate::B4800,
        BaudRate::B9600,
        BaudRate::B38400,
        BaudRate::B115200,
        BaudRate::B230400,
    ];

    /// Bits per second
    pub fn as_u32(self) -> u32 {
        match self {
            BaudRate::B1200 => 1200,
            BaudRate::B2400 => 2400,
            BaudRate::B4800 => 4800,
            BaudRate::B9600 => 9600,
            BaudRate::B38400 => 38400,
            BaudRate::B115200 => 115200,
            BaudRate::B230400 => 230400,
        }
    }
}

impl TryFrom<u32> for BaudRate {
    type Error = ProtocolError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        BaudRate::ALL
            .into_iter()
            .find(|b| b.as_u32() == value)
            .ok_or_else(|| ProtocolError::invalid(format!("unsupported baud rate {}", value)))
    }
}

impl From<BaudRate> for u32 {
    fn from(b: BaudRate) -> Self {
        b.as_u32()
    }
}

impl fmt::Display for BaudRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

/// Character size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DataBits {
    Seven,
    #[default]
    Eight,
}

impl TryFrom<u8> for DataBits {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            other => Err(ProtocolError::invalid(format!(
                "data bits must be 7 or 8, got {}",
                other
            ))),
        }
    }
}

impl From<DataBits> for u8 {
    fn from(d: DataBits) -> Self {
        match d {
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }
}

/// Parity checking mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

impl TryFrom<char> for Parity {
    type Error = ProtocolError;

    /// Parses the single-letter form used by serial tools (`N`, `O`, `E`)
    fn try_from(value: char) -> Result<Self, Self::Error> {
        match value.to_ascii_uppercase() {
            'N' => Ok(Parity::None),
            'O' => Ok(Parity::Odd),
            'E' => Ok(Parity::Even),
            other => Err(ProtocolError::invalid(format!(
                "parity must be N, O or E, got '{}'",
                other
            ))),
        }
    }
}

/// Number of stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum StopBits {
    #[default]
    One,
    Two,
}

impl TryFrom<u8> for StopBits {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            other => Err(ProtocolError::invalid(format!(
                "stop bits must be 1 or 2, got {}",
                other
            ))),
        }
    }
}

impl From<StopBits> for u8 {
    fn from(s: StopBits) -> Self {
        match s {
            StopBits::One => 1,
            StopBits::Two => 2,
        }
    }
}

/// Serial line settings, stored as `serial.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialSettings {
    /// Port name (e.g., "/dev/ttyACM0" or "COM7")
    pub port_name: String,

    /// Line speed
    #[serde(default)]
    pub baud_rate: BaudRate,

    #[serde(default)]
    pub data_bits: DataBits,

    #[serde(default)]
    pub parity: Parity,

    #[serde(default)]
    pub stop_bits: StopBits,

    /// Per-read timeout; also bounds how long stopping the reader loop takes
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// How long a reply-expecting command keeps the reader listening
    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,

    /// Timeout for the synchronous ping round-trip
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,
}

fn default_read_timeout_ms() -> u64 {
    1000
}

fn default_reply_timeout_ms() -> u64 {
    3000
}

fn default_ping_timeout_ms() -> u64 {
    1000
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: BaudRate::default(),
            data_bits: DataBits::default(),
            parity: Parity::default(),
            stop_bits: StopBits::default(),
            read_timeout_ms: default_read_timeout_ms(),
            reply_timeout_ms: default_reply_timeout_ms(),
            ping_timeout_ms: default_ping_timeout_ms(),
        }
    }
}

impl SerialSettings {
    /// Settings for `port_name` with everything else at defaults (9600 8N1)
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Self::default()
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: BaudRate) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Override all three timeouts at once (handy for tests and fast links)
    pub fn with_timeouts(mut self, read: Duration, reply: Duration, ping: Duration) -> Self {
        self.read_timeout_ms = read.as_millis() as u64;
        self.reply_timeout_ms = reply.as_millis() as u64;
        self.ping_timeout_ms = ping.as_millis() as u64;
        self
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    /// Check the settings before touching any device
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.port_name.trim().is_empty() {
            return Err(ProtocolError::invalid("port name is empty"));
        }
        if self.read_timeout_ms == 0 || self.reply_timeout_ms == 0 || self.ping_timeout_ms == 0 {
            return Err(ProtocolError::invalid("timeouts must be non-zero"));
        }
        Ok(())
    }

    /// Default location: `<config dir>/microcli/serial.json`
    pub fn default_path() -> io::Result<PathBuf> {
        let base = dirs::config_dir().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "could not determine config directory")
        })?;
        Ok(base.join("microcli").join("serial.json"))
    }

    /// Load settings from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ProtocolError> {
        let content = fs::read_to_string(path.as_ref())?;
        let settings: SerialSettings = serde_json::from_str(&content)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(settings)
    }

    /// Load settings, falling back to defaults when the file does not exist
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ProtocolError> {
        match Self::load(path) {
            Err(ProtocolError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            other => other,
        }
    }

    /// Save settings as pretty-printed JSON, creating parent directories
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ProtocolError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_are_9600_8n1() {
        let s = SerialSettings::new("/dev/ttyACM0");
        assert_eq!(s.baud_rate, BaudRate::B9600);
        assert_eq!(s.data_bits, DataBits::Eight);
        assert_eq!(s.parity, Parity::None);
        assert_eq!(s.stop_bits, StopBits::One);
        assert_eq!(s.read_timeout(), Duration::from_secs(1));
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_baud_rate_parsing() {
        assert_eq!(BaudRate::try_from(115200).unwrap(), BaudRate::B115200);
        assert!(matches!(
            BaudRate::try_from(57600),
            Err(ProtocolError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_line_parameter_parsing() {
        assert_eq!(DataBits::try_from(7).unwrap(), DataBits::Seven);
        assert!(DataBits::try_from(6).is_err());
        assert_eq!(Parity::try_from('e').unwrap(), Parity::Even);
        assert!(Parity::try_from('M').is_err());
        assert_eq!(StopBits::try_from(2).unwrap(), StopBits::Two);
        assert!(StopBits::try_from(3).is_err());
    }

    #[test]
    fn test_validate_rejects_empty_port() {
        let s = SerialSettings::default();
        assert!(matches!(s.validate(), Err(ProtocolError::InvalidParameter(_))));
    }

    #[test]
    fn test_json_shape() {
        let s = SerialSettings::new("COM7").with_baud_rate(BaudRate::B38400);
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["baud_rate"], 38400);
        assert_eq!(json["data_bits"], 8);
        assert_eq!(json["parity"], "none");

        let bad = r#"{"port_name":"COM7","baud_rate":57600}"#;
        assert!(serde_json::from_str::<SerialSettings>(bad).is_err());
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let s: SerialSettings = serde_json::from_str(r#"{"port_name":"COM3"}"#).unwrap();
        assert_eq!(s, SerialSettings::new("COM3"));
    }
}
