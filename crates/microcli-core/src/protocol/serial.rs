//! Serial port handling
//!
//! Port discovery and opening for the device console.

use serde::{Deserialize, Serialize};
use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::BTreeMap;
#[cfg(target_os = "linux")]
use std::fs;
use tracing::debug;

use super::ProtocolError;
use crate::settings::{self, SerialSettings};

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyACM0" or "COM7")
    pub name: String,

    /// Human readable description, as shown in port pickers
    pub description: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Manufacturer name (if available)
    pub manufacturer: Option<String>,

    /// Serial number (if available)
    pub serial_number: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            description: name.clone(),
            name,
            vid: None,
            pid: None,
            manufacturer: None,
            serial_number: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => {
                let description = usb
                    .product
                    .clone()
                    .map(|p| format!("{} ({})", p, info.port_name))
                    .unwrap_or_else(|| info.port_name.clone());
                Self {
                    name: info.port_name,
                    description,
                    vid: Some(usb.vid),
                    pid: Some(usb.pid),
                    manufacturer: usb.manufacturer,
                    serial_number: usb.serial_number,
                }
            }
            _ => Self::bare(info.port_name),
        }
    }
}

/// Device node families that show up for USB CDC and USB-serial adapters
const USB_SERIAL_PREFIXES: [&str; 2] = ["ttyACM", "ttyUSB"];

/// Ordering rank: CDC ports, then USB-serial adapters, then the rest by name
fn port_rank(name: &str) -> (usize, u32, &str) {
    let base = name.rsplit('/').next().unwrap_or(name);
    USB_SERIAL_PREFIXES
        .iter()
        .enumerate()
        .find_map(|(rank, prefix)| {
            base.strip_prefix(*prefix)
                .map(|suffix| (rank, suffix.parse().unwrap_or(u32::MAX), base))
        })
        .unwrap_or((USB_SERIAL_PREFIXES.len(), 0, base))
}

/// Enumerate serial ports in a stable order
pub fn list_ports() -> Vec<PortInfo> {
    let mut found: BTreeMap<String, PortInfo> = serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(PortInfo::from)
        .map(|p| (p.name.clone(), p))
        .collect();

    // USB CDC devices sometimes go missing from the enumeration API on Linux
    #[cfg(target_os = "linux")]
    for node in dev_nodes() {
        found.entry(node.clone()).or_insert_with(|| PortInfo::bare(node));
    }

    let mut ports: Vec<PortInfo> = found.into_values().collect();
    ports.sort_by(|a, b| port_rank(&a.name).cmp(&port_rank(&b.name)));
    ports
}

#[cfg(target_os = "linux")]
fn dev_nodes() -> Vec<String> {
    let Ok(entries) = fs::read_dir("/dev") else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|n| USB_SERIAL_PREFIXES.iter().any(|p| n.starts_with(*p)))
        .map(|n| format!("/dev/{}", n))
        .collect()
}

/// Resolve a port name from the description shown to the user
pub fn find_port_by_description<'a>(ports: &'a [PortInfo], description: &str) -> Option<&'a PortInfo> {
    ports.iter().find(|p| p.description == description)
}

impl From<settings::DataBits> for serialport::DataBits {
    fn from(d: settings::DataBits) -> Self {
        match d {
            settings::DataBits::Seven => serialport::DataBits::Seven,
            settings::DataBits::Eight => serialport::DataBits::Eight,
        }
    }
}

impl From<settings::Parity> for serialport::Parity {
    fn from(p: settings::Parity) -> Self {
        match p {
            settings::Parity::None => serialport::Parity::None,
            settings::Parity::Odd => serialport::Parity::Odd,
            settings::Parity::Even => serialport::Parity::Even,
        }
    }
}

impl From<settings::StopBits> for serialport::StopBits {
    fn from(s: settings::StopBits) -> Self {
        match s {
            settings::StopBits::One => serialport::StopBits::One,
            settings::StopBits::Two => serialport::StopBits::Two,
        }
    }
}

/// Open a serial port with the given line settings
pub fn open_port(settings: &SerialSettings) -> Result<Box<dyn SerialPort>, ProtocolError> {
    settings.validate()?;
    debug!(
        port = %settings.port_name,
        baud = settings.baud_rate.as_u32(),
        "opening serial port"
    );

    serialport::new(&settings.port_name, settings.baud_rate.as_u32())
        .data_bits(settings.data_bits.into())
        .parity(settings.parity.into())
        .stop_bits(settings.stop_bits.into())
        .flow_control(serialport::FlowControl::None)
        .timeout(settings.read_timeout())
        .open()
        .map_err(|e| ProtocolError::DeviceUnavailable(format!("{}: {}", settings.port_name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_ports() {
        // Only checks that enumeration does not panic on this host
        let ports = list_ports();
        for port in &ports {
            println!("Found port: {} - {}", port.name, port.description);
        }
    }

    #[test]
    fn test_port_ranking() {
        let mut names = vec![
            "/dev/ttyUSB1",
            "/dev/ttyACM1",
            "COM3",
            "/dev/ttyUSB0",
            "/dev/ttyACM0",
            "/dev/ttyS0",
            "/dev/ttyACM10",
        ];
        names.sort_by(|a, b| port_rank(a).cmp(&port_rank(b)));

        assert_eq!(
            names,
            vec![
                "/dev/ttyACM0",
                "/dev/ttyACM1",
                "/dev/ttyACM10",
                "/dev/ttyUSB0",
                "/dev/ttyUSB1",
                "COM3",
                "/dev/ttyS0",
            ]
        );
    }

    #[test]
    fn test_port_info_json() {
        let mut port = PortInfo::bare("/dev/ttyACM0".to_string());
        port.vid = Some(0x0483);
        let json = serde_json::to_value(&port).unwrap();
        assert_eq!(json["name"], "/dev/ttyACM0");
        assert_eq!(json["vid"], 0x0483);
        assert!(json["pid"].is_null());

        let back: PortInfo = serde_json::from_value(json).unwrap();
        assert_eq!(back, port);
    }

    #[test]
    fn test_find_port_by_description() {
        let mut nucleo = PortInfo::bare("/dev/ttyACM0".to_string());
        nucleo.description = "STM32 STLink (/dev/ttyACM0)".to_string();
        let ports = vec![PortInfo::bare("/dev/ttyS0".to_string()), nucleo];

        let found = find_port_by_description(&ports, "STM32 STLink (/dev/ttyACM0)");
        assert_eq!(found.map(|p| p.name.as_str()), Some("/dev/ttyACM0"));
        assert!(find_port_by_description(&ports, "missing").is_none());
    }

    #[test]
    fn test_open_missing_port_is_unavailable() {
        let settings = SerialSettings::new("/dev/definitely-not-a-port-42");
        assert!(matches!(
            open_port(&settings),
            Err(ProtocolError::DeviceUnavailable(_))
        ));
    }

    #[test]
    fn test_open_rejects_invalid_settings() {
        let settings = SerialSettings::default();
        assert!(matches!(
            open_port(&settings),
            Err(ProtocolError::InvalidParameter(_))
        ));
    }
}
