//! Line protocol spoken by the sensor device.
//!
//! Inbound messages are either a configuration report
//! (`CH=<n>,D<id>=<d>,D<id>=<d>,...`) or a reading report
//! (`VALUES: v0,v1,v2,...`). Decoding is total: malformed tokens are
//! logged and skipped, never surfaced to the caller.

use crate::domain::channel::ChannelId;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

const CONFIG_PREFIX: &str = "CH=";
const VALUES_TAG: &str = "VALUES";
const VALUES_PREFIX: &str = "VALUES: ";

/// Decoded inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Per-channel `d` parameters reported by the device
    Config { entries: BTreeMap<ChannelId, i32> },
    /// Raw readings, one per channel index
    Values { values: Vec<String> },
    /// Anything else
    Unrecognized { raw: String },
}

/// Outbound command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Ask the device to report its configuration
    GetConfig,
    /// Change the `d` parameter of one channel
    SetConfig { channel: ChannelId, d: i32 },
    /// Change the device's serial baud rate
    SetBaud(u32),
}

impl Command {
    /// Wire form of the command
    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::GetConfig => write!(f, "GET_CFG"),
            Command::SetConfig { channel, d } => write!(f, "SET_CFG D{}={}", channel, d),
            Command::SetBaud(rate) => write!(f, "AT+BAUD{}", rate),
        }
    }
}

/// Classify and decode one inbound message
pub fn decode(text: &str) -> Message {
    let trimmed = text.trim_start();
    if trimmed.starts_with(CONFIG_PREFIX) {
        Message::Config {
            entries: decode_config(trimmed),
        }
    } else if trimmed.starts_with(VALUES_TAG) {
        Message::Values {
            values: decode_values(trimmed),
        }
    } else {
        Message::Unrecognized {
            raw: text.to_string(),
        }
    }
}

/// Decode a configuration report into `channel id -> d`.
///
/// Header fields (`CH=...`) are ignored. Every other token has its
/// whitespace removed and is split on `=`; the first character of the key
/// is dropped and the remainder is the channel id.
pub fn decode_config(text: &str) -> BTreeMap<ChannelId, i32> {
    let mut entries = BTreeMap::new();

    for field in text.split(',') {
        let token: String = field.chars().filter(|c| !c.is_whitespace()).collect();
        if token.is_empty() || token.starts_with(CONFIG_PREFIX) {
            continue;
        }

        match parse_config_token(&token) {
            Some((id, d)) => {
                entries.insert(id, d);
            }
            None => warn!("Skipping malformed config token '{}'", token),
        }
    }

    debug!("Decoded {} config entries", entries.len());
    entries
}

fn parse_config_token(token: &str) -> Option<(ChannelId, i32)> {
    let mut parts = token.split('=');
    let (key, value) = match (parts.next(), parts.next(), parts.next()) {
        (Some(key), Some(value), None) => (key, value),
        _ => return None,
    };

    let mut key_chars = key.chars();
    key_chars.next()?;
    let id = key_chars.as_str().parse::<ChannelId>().ok()?;
    let d = value.parse::<i32>().ok()?;
    Some((id, d))
}

/// Decode a reading report into its raw value strings, order preserved.
///
/// Text without the exact `VALUES: ` prefix yields no values.
pub fn decode_values(text: &str) -> Vec<String> {
    let Some(body) = text.strip_prefix(VALUES_PREFIX) else {
        debug!("Not a values message: {:?}", text);
        return Vec::new();
    };

    if body.trim().is_empty() {
        return Vec::new();
    }

    body.split(',').map(|value| value.trim().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_config() {
        let entries = decode_config("CH=x,D3=150,D7=220");
        assert_eq!(entries, BTreeMap::from([(3, 150), (7, 220)]));
    }

    #[test]
    fn test_decode_config_strips_whitespace() {
        let entries = decode_config("CH=2, D0 = 12 ,D1=-4\r\n");
        assert_eq!(entries, BTreeMap::from([(0, 12), (1, -4)]));
    }

    #[test]
    fn test_decode_config_skips_bad_tokens() {
        let entries = decode_config("CH=4,D1=10,Dx=5,D2=abc,D3,D4=1=2,D5=50");
        assert_eq!(entries, BTreeMap::from([(1, 10), (5, 50)]));
    }

    #[test]
    fn test_decode_config_rejects_negative_ids() {
        let entries = decode_config("CH=1,D-1=5");
        assert!(entries.is_empty());
    }

    #[test]
    fn test_decode_values() {
        assert_eq!(decode_values("VALUES: 10, 20,30"), vec!["10", "20", "30"]);
    }

    #[test]
    fn test_decode_values_requires_exact_prefix() {
        assert!(decode_values("values: 1,2").is_empty());
        assert!(decode_values("VALUES:1,2").is_empty());
        assert!(decode_values("VALUES  1,2").is_empty());
        assert!(decode_values("CH=1,D0=1").is_empty());
        assert!(decode_values("VALUES: ").is_empty());
    }

    #[test]
    fn test_decode_values_trims_line_ending() {
        assert_eq!(decode_values("VALUES: 5,6\r\n"), vec!["5", "6"]);
    }

    #[test]
    fn test_decode_classifies() {
        assert!(matches!(decode("CH=2,D0=1"), Message::Config { .. }));
        assert!(matches!(decode("VALUES: 1"), Message::Values { .. }));
        assert_eq!(
            decode("OK"),
            Message::Unrecognized {
                raw: "OK".to_string()
            }
        );
    }

    #[test]
    fn test_malformed_values_message_decodes_empty() {
        assert_eq!(decode("VALUES 1,2"), Message::Values { values: Vec::new() });
    }

    #[test]
    fn test_command_encoding() {
        assert_eq!(Command::GetConfig.encode(), "GET_CFG");
        assert_eq!(Command::SetConfig { channel: 3, d: 250 }.encode(), "SET_CFG D3=250");
        assert_eq!(Command::SetBaud(115200).encode(), "AT+BAUD115200");
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn decode_never_panics(text in "\\PC*") {
                let _ = decode(&text);
                let _ = decode_config(&text);
                let _ = decode_values(&text);
            }

            #[test]
            fn unprefixed_text_has_no_values(text in "[^V].*") {
                prop_assert!(decode_values(&text).is_empty());
            }

            #[test]
            fn well_formed_config_is_decoded_exactly(
                entries in proptest::collection::btree_map(0u32..64, -10_000i32..10_000, 0..8)
            ) {
                let mut text = String::from("CH=x");
                for (id, d) in &entries {
                    text.push_str(&format!(",D{}={}", id, d));
                }
                prop_assert_eq!(decode_config(&text), entries);
            }
        }
    }
}
