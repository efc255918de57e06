//! Wire form of channel messages.
//!
//! Messages are small maps with single-letter keys so they stay cheap on
//! a narrow bus:
//!
//! ```text
//! { "s": seq, "r": ack, "x": [selective acks], "d": payload,
//!   "a": "r", "n": level, "c": {"t": ms, "m": window, "i": session},
//!   "e": "reason" }
//! ```
//!
//! Absent keys are omitted. Unknown keys are ignored.

use serde::{Deserialize, Serialize};

/// Handshake action carried in `a`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "r")]
    Reset,
}

/// Channel parameters proposed with a reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetParams {
    #[serde(rename = "t")]
    pub timeout_ms: u32,
    #[serde(rename = "m")]
    pub window: u16,
    /// Identifies one handshake attempt of the sender.
    #[serde(rename = "i", default, skip_serializing_if = "Option::is_none")]
    pub session: Option<u32>,
}

/// One message between the two ends of a reliable channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Sequence number of the payload, or the sender's send head.
    #[serde(rename = "s", default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u16>,
    /// Cumulative acknowledgement: everything before this was received.
    #[serde(rename = "r", default, skip_serializing_if = "Option::is_none")]
    pub ack: Option<u16>,
    /// Out-of-order sequence numbers held by the sender.
    #[serde(rename = "x", default, skip_serializing_if = "Vec::is_empty")]
    pub selective: Vec<u16>,
    #[serde(rename = "d", default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<u8>>,
    #[serde(rename = "a", default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    /// Reset level; 0 closes the channel.
    #[serde(rename = "n", default, skip_serializing_if = "Option::is_none")]
    pub level: Option<u8>,
    #[serde(rename = "c", default, skip_serializing_if = "Option::is_none")]
    pub params: Option<ResetParams>,
    #[serde(rename = "e", default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WireMessage {
    pub fn data(seq: u16, ack: u16, selective: Vec<u16>, payload: Vec<u8>) -> Self {
        Self {
            seq: Some(seq),
            ack: Some(ack),
            selective,
            data: Some(payload),
            ..Self::default()
        }
    }

    pub fn ack(seq: u16, ack: u16, selective: Vec<u16>) -> Self {
        Self {
            seq: Some(seq),
            ack: Some(ack),
            selective,
            ..Self::default()
        }
    }

    pub fn reset(level: u8, params: Option<ResetParams>, error: Option<String>) -> Self {
        Self {
            action: Some(Action::Reset),
            level: Some(level),
            params,
            error,
            ..Self::default()
        }
    }

    pub fn is_reset(&self) -> bool {
        self.action == Some(Action::Reset)
    }

    /// Reset level; a reset without `n` counts as terminal.
    pub fn reset_level(&self) -> u8 {
        self.level.unwrap_or(0)
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_message_uses_short_keys() {
        let msg = WireMessage::data(3, 1, vec![], b"hi".to_vec());
        let json = String::from_utf8(msg.to_json().unwrap()).unwrap();
        assert_eq!(json, r#"{"s":3,"r":1,"d":[104,105]}"#);
    }

    #[test]
    fn reset_message_round_trips() {
        let msg = WireMessage::reset(
            1,
            Some(ResetParams {
                timeout_ms: 60,
                window: 8,
                session: Some(7),
            }),
            None,
        );
        let json = String::from_utf8(msg.to_json().unwrap()).unwrap();
        assert_eq!(json, r#"{"a":"r","n":1,"c":{"t":60,"m":8,"i":7}}"#);
        let back = WireMessage::from_json(json.as_bytes()).unwrap();
        assert_eq!(back, msg);
        assert!(back.is_reset());
        assert_eq!(back.reset_level(), 1);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let msg = WireMessage::from_json(br#"{"s":1,"r":0,"zz":true,"x":[2,3]}"#).unwrap();
        assert_eq!(msg.seq, Some(1));
        assert_eq!(msg.selective, vec![2, 3]);
        assert!(!msg.is_reset());
    }

    #[test]
    fn params_without_session_id_parse() {
        let msg = WireMessage::from_json(br#"{"a":"r","n":2,"c":{"t":1000,"m":16}}"#).unwrap();
        let params = msg.params.unwrap();
        assert_eq!(params.session, None);
        assert_eq!(params.window, 16);
    }
}
