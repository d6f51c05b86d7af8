//! Line-protocol commands and the power supply's command vocabulary

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{GatewayError, Result};

/// Number of output channels on the device
pub const CHANNEL_COUNT: u8 = 4;

/// A device output channel, 1-based
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Channel(u8);

impl Channel {
    pub fn new(id: i64) -> Result<Self> {
        if (1..=i64::from(CHANNEL_COUNT)).contains(&id) {
            Ok(Self(id as u8))
        } else {
            Err(GatewayError::validation(format!(
                "channel {} out of range 1..={}",
                id, CHANNEL_COUNT
            )))
        }
    }

    pub fn id(self) -> u8 {
        self.0
    }

    /// All channels in polling order
    pub fn all() -> impl Iterator<Item = Channel> {
        (1..=CHANNEL_COUNT).map(Channel)
    }
}

impl TryFrom<u8> for Channel {
    type Error = GatewayError;

    fn try_from(id: u8) -> Result<Self> {
        Self::new(i64::from(id))
    }
}

impl From<Channel> for u8 {
    fn from(channel: Channel) -> u8 {
        channel.0
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One outbound request line (without its terminator)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    text: String,
}

impl Command {
    /// Build a command from raw text
    ///
    /// Rejects empty text and embedded line terminators, which would split
    /// one command into several on the wire.
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(GatewayError::validation("empty device command"));
        }
        if text.contains(['\n', '\r']) {
            return Err(GatewayError::validation(format!(
                "device command contains a line terminator: {:?}",
                text
            )));
        }
        Ok(Self { text })
    }

    /// `:SOURce{ch}:CURRent {amps}`
    pub fn set_current(channel: Channel, amps: f64) -> Self {
        Self {
            text: format!(":SOURce{}:CURRent {}", channel, format_value(amps)),
        }
    }

    /// `:SOURce{ch}:VOLTage {volts}`
    pub fn set_voltage(channel: Channel, volts: f64) -> Self {
        Self {
            text: format!(":SOURce{}:VOLTage {}", channel, format_value(volts)),
        }
    }

    /// `:OUTPut{ch}:STATe ON|OFF`
    pub fn set_output(channel: Channel, on: bool) -> Self {
        let state = if on { "ON" } else { "OFF" };
        Self {
            text: format!(":OUTPut{}:STATe {}", channel, state),
        }
    }

    /// `:MEASure{ch}:ALL?`, answered with `voltage, current, power`
    pub fn measure_all(channel: Channel) -> Self {
        Self {
            text: format!(":MEASure{}:ALL?", channel),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Queries end in `?` and draw exactly one reply line
    pub fn is_query(&self) -> bool {
        self.text.ends_with('?')
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Shortest round-trip form, always with a fractional part (`12.0`, `1.5`)
fn format_value(value: f64) -> String {
    format!("{:?}", value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ch(id: i64) -> Channel {
        Channel::new(id).unwrap()
    }

    #[test]
    fn test_channel_range() {
        assert!(Channel::new(0).is_err());
        assert!(Channel::new(5).is_err());
        assert!(Channel::new(-1).is_err());
        assert_eq!(Channel::new(4).unwrap().id(), 4);
        assert_eq!(Channel::all().map(Channel::id).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_channel_serializes_as_number() {
        assert_eq!(serde_json::to_string(&ch(3)).unwrap(), "3");
        assert_eq!(serde_json::from_str::<Channel>("2").unwrap(), ch(2));
        assert!(serde_json::from_str::<Channel>("9").is_err());
    }

    #[test]
    fn test_vocabulary_wire_forms() {
        assert_eq!(Command::set_current(ch(2), 1.5).text(), ":SOURce2:CURRent 1.5");
        assert_eq!(Command::set_voltage(ch(2), 12.0).text(), ":SOURce2:VOLTage 12.0");
        assert_eq!(Command::set_output(ch(1), true).text(), ":OUTPut1:STATe ON");
        assert_eq!(Command::set_output(ch(4), false).text(), ":OUTPut4:STATe OFF");
        assert_eq!(Command::measure_all(ch(3)).text(), ":MEASure3:ALL?");
    }

    #[test]
    fn test_query_flag() {
        assert!(Command::measure_all(ch(1)).is_query());
        assert!(!Command::set_output(ch(1), true).is_query());
        assert!(Command::new("*IDN?").unwrap().is_query());
    }

    #[test]
    fn test_rejects_framing_breakers() {
        assert!(Command::new("").is_err());
        assert!(Command::new("   ").is_err());
        assert!(Command::new(":OUTPut1:STATe ON\n:OUTPut2:STATe ON").is_err());
        assert!(Command::new(":MEASure1:ALL?\r").is_err());
    }

    proptest! {
        #[test]
        fn setpoints_round_trip_through_wire_text(id in 1i64..=4, value in 0.0f64..1000.0) {
            let current = Command::set_current(ch(id), value);
            let text = current.text();
            let prefix = format!(":SOURce{}:CURRent ", id);
            prop_assert!(text.starts_with(&prefix));
            let written: f64 = text[prefix.len()..].parse().unwrap();
            prop_assert_eq!(written, value);
            prop_assert!(!current.is_query());
        }
    }
}
