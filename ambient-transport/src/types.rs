//! Common types for transport layer

use serde::{Deserialize, Serialize};

/// Controller class, as named in configuration files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    /// Raspberry Pi controller reached over TCP
    #[serde(rename = "pi")]
    Tcp,
    /// Arduino controller on a serial port
    #[serde(rename = "arduino")]
    Serial,
}

impl TransportKind {
    /// Check if this transport is a serial port
    pub fn is_serial(&self) -> bool {
        matches!(self, Self::Serial)
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp => write!(f, "pi"),
            Self::Serial => write!(f, "arduino"),
        }
    }
}

/// Startup handshake performed right after a serial port opens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Handshake {
    /// Start streaming frames immediately
    None,
    /// Repeat the reset marker until the controller answers with any byte
    #[default]
    Reset,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        let pi: TransportKind = serde_json::from_str("\"pi\"").unwrap();
        let arduino: TransportKind = serde_json::from_str("\"arduino\"").unwrap();
        assert_eq!(pi, TransportKind::Tcp);
        assert_eq!(arduino, TransportKind::Serial);
        assert!(arduino.is_serial());
        assert_eq!(pi.to_string(), "pi");
    }

    #[test]
    fn test_unknown_kind_rejected() {
        assert!(serde_json::from_str::<TransportKind>("\"esp32\"").is_err());
    }
}
