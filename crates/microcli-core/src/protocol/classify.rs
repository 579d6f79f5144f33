//! Incoming line classification
//!
//! Tags a received line by its shape alone. Routing decisions that depend on
//! session state (monitoring, pending reply) are made by the dispatcher.

use super::{ACK, SENTINEL, TELEMETRY_PREFIX};

/// What a device line looks like
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind<'a> {
    /// Anything that could answer a command
    CommandReply(&'a str),
    /// `pwm:<n>`, nonzero `n` meaning logic high
    TelemetrySample(bool),
    /// The bare `OK` acknowledgement
    StatusLine,
    /// Contains `EOT`; carries the text preceding the marker
    Sentinel(&'a str),
}

/// Classify one line (terminators already stripped)
pub fn classify(line: &str) -> LineKind<'_> {
    if let Some(pos) = line.find(SENTINEL) {
        return LineKind::Sentinel(line[..pos].trim_end());
    }

    let trimmed = line.trim();
    if trimmed == ACK {
        return LineKind::StatusLine;
    }

    if let Some(payload) = trimmed.strip_prefix(TELEMETRY_PREFIX) {
        if let Ok(level) = payload.trim().parse::<i64>() {
            return LineKind::TelemetrySample(level != 0);
        }
    }

    LineKind::CommandReply(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack() {
        assert_eq!(classify("OK"), LineKind::StatusLine);
        assert_eq!(classify(" OK "), LineKind::StatusLine);
        assert_eq!(classify("OK then"), LineKind::CommandReply("OK then"));
    }

    #[test]
    fn test_telemetry() {
        assert_eq!(classify("pwm:1"), LineKind::TelemetrySample(true));
        assert_eq!(classify("pwm:0"), LineKind::TelemetrySample(false));
        assert_eq!(classify("pwm: 7"), LineKind::TelemetrySample(true));
        // Unparsable payloads are ordinary lines
        assert_eq!(classify("pwm:x"), LineKind::CommandReply("pwm:x"));
    }

    #[test]
    fn test_sentinel() {
        assert_eq!(classify("EOT"), LineKind::Sentinel(""));
        assert_eq!(classify("v1.2.0 EOT"), LineKind::Sentinel("v1.2.0"));
        assert_eq!(classify("doneEOTjunk"), LineKind::Sentinel("done"));
    }

    #[test]
    fn test_plain_reply() {
        assert_eq!(classify("42"), LineKind::CommandReply("42"));
        assert_eq!(classify("10:30:00"), LineKind::CommandReply("10:30:00"));
    }
}
