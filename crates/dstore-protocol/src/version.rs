use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Dot-separated `protocol.major.minor` version exchanged during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionTriple {
    pub protocol: u32,
    pub major: u32,
    pub minor: u32,
}

impl VersionTriple {
    /// Version spoken by this build of the client.
    pub const CURRENT: VersionTriple = VersionTriple::new(1, 8, 0);

    pub const fn new(protocol: u32, major: u32, minor: u32) -> Self {
        Self {
            protocol,
            major,
            minor,
        }
    }
}

impl Default for VersionTriple {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl fmt::Display for VersionTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.protocol, self.major, self.minor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionParseError {
    #[error("expected protocol.major.minor, got {0} component(s)")]
    ComponentCount(usize),

    #[error("version component {index} is not a number: {value:?}")]
    NotANumber { index: usize, value: String },
}

impl FromStr for VersionTriple {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != 3 {
            return Err(VersionParseError::ComponentCount(parts.len()));
        }

        let mut numbers = [0u32; 3];
        for (index, part) in parts.iter().enumerate() {
            numbers[index] = part
                .parse()
                .map_err(|_| VersionParseError::NotANumber {
                    index,
                    value: (*part).to_string(),
                })?;
        }

        Ok(Self::new(numbers[0], numbers[1], numbers[2]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_round_trips_through_parse() {
        let v = VersionTriple::new(1, 5, 2);
        assert_eq!(v.to_string(), "1.5.2");
        assert_eq!("1.5.2".parse::<VersionTriple>().unwrap(), v);
    }

    #[test]
    fn test_parse_rejects_wrong_component_count() {
        assert_eq!(
            "1.5".parse::<VersionTriple>(),
            Err(VersionParseError::ComponentCount(2))
        );
        assert_eq!(
            "1.5.2.0".parse::<VersionTriple>(),
            Err(VersionParseError::ComponentCount(4))
        );
    }

    #[test]
    fn test_parse_rejects_non_numeric_component() {
        let err = "DataStore.8.0".parse::<VersionTriple>().unwrap_err();
        assert_eq!(
            err,
            VersionParseError::NotANumber {
                index: 0,
                value: "DataStore".into()
            }
        );
        assert!("1.-2.0".parse::<VersionTriple>().is_err());
        assert!("".parse::<VersionTriple>().is_err());
    }
}
