//! Wire error taxonomy shared by the packet layer and the dispatchers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol error codes carried inside reject packets.
///
/// These codes are part of the wire contract and must not be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireCode {
    /// Malformed payload or filter
    F01,
    /// No route to destination
    F02,
    /// Unhandled kind or refused by the agent
    F99,
    /// Prepare expired before a response was produced
    R02,
    /// Storage limit exceeded
    T00,
    /// AI budget exhausted
    T03,
    /// Insufficient payment for the requested skill
    T04,
}

impl WireCode {
    /// Wire representation of the code
    pub fn as_str(&self) -> &'static str {
        match self {
            WireCode::F01 => "F01",
            WireCode::F02 => "F02",
            WireCode::F99 => "F99",
            WireCode::R02 => "R02",
            WireCode::T00 => "T00",
            WireCode::T03 => "T03",
            WireCode::T04 => "T04",
        }
    }

    /// Parse a wire code string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "F01" => Some(WireCode::F01),
            "F02" => Some(WireCode::F02),
            "F99" => Some(WireCode::F99),
            "R02" => Some(WireCode::R02),
            "T00" => Some(WireCode::T00),
            "T03" => Some(WireCode::T03),
            "T04" => Some(WireCode::T04),
            _ => None,
        }
    }

    /// Default human-readable message for the code
    pub fn default_message(&self) -> &'static str {
        match self {
            WireCode::F01 => "malformed payload",
            WireCode::F02 => "no route to destination",
            WireCode::F99 => "unhandled kind",
            WireCode::R02 => "prepare expired",
            WireCode::T00 => "storage limit exceeded",
            WireCode::T03 => "AI agent budget exhausted",
            WireCode::T04 => "insufficient payment",
        }
    }
}

impl fmt::Display for WireCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for WireCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for WireCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        WireCode::parse(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown wire code: {s}")))
    }
}

/// A protocol-level failure: code plus human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub code: WireCode,
    pub message: String,
}

impl WireError {
    /// Build an error with an explicit message
    pub fn new(code: WireCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Build an error carrying the code's default message
    pub fn from_code(code: WireCode) -> Self {
        Self {
            code,
            message: code.default_message().to_string(),
        }
    }
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for WireError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_round_trip() {
        for code in [
            WireCode::F01,
            WireCode::F02,
            WireCode::F99,
            WireCode::R02,
            WireCode::T00,
            WireCode::T03,
            WireCode::T04,
        ] {
            assert_eq!(WireCode::parse(code.as_str()), Some(code));
        }
        assert_eq!(WireCode::parse("F42"), None);
    }

    #[test]
    fn test_wire_error_serializes_code_as_string() {
        let err = WireError::from_code(WireCode::T03);
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "T03");
        assert_eq!(json["message"], "AI agent budget exhausted");
    }
}
