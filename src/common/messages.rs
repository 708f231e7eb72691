//! # Message Protocol
//!
//! Defines the JSON messages exchanged between browser clients and the relay
//! over the `/socket` WebSocket. Every frame carries exactly one message,
//! discriminated by its `type` field:
//!
//! ```text
//! client -> server   {"type":"getPosition","locationID":"231b158","silent":false,"solo":false}
//! client -> server   {"type":"reveal"}
//! server -> client   {"type":"position","startRoundAt":1700000010000,"panoramaID":"...","allowMovement":false}
//! server -> client   {"type":"reveal","name":"London","flag":"🇬🇧","clues":["..."],"bonus":"01.mp4"}
//! ```

use serde::{Deserialize, Serialize};

// ============================================================================
// CLIENT -> SERVER
// ============================================================================

/// Requests a browser client can send to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// **Position Request**
    ///
    /// Asks for the map position of a location.
    ///
    /// # Fields
    /// - `location_id`: id of the requested location (missing or empty is ignored)
    /// - `silent`: skip the shared round countdown
    /// - `solo`: keep this connection out of the shared reveal group
    #[serde(rename = "getPosition")]
    GetPosition {
        #[serde(rename = "locationID", default)]
        location_id: Option<String>,
        #[serde(default)]
        silent: Option<bool>,
        #[serde(default)]
        solo: Option<bool>,
    },

    /// **Reveal Request**
    ///
    /// Asks the relay to reveal the answer to this connection's reveal group.
    #[serde(rename = "reveal")]
    Reveal,

    /// Any `type` value the relay does not understand.
    #[serde(other)]
    Unknown,
}

// ============================================================================
// SERVER -> CLIENT
// ============================================================================

/// Where the client should point its street view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MapPosition {
    Panorama {
        #[serde(rename = "panoramaID")]
        panorama_id: String,
    },
    Coordinates { latitude: f64, longitude: f64 },
}

/// Messages the relay sends to browser clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// **Position Response**
    ///
    /// # Fields
    /// - `start_round_at`: shared countdown deadline (epoch ms), absent for silent requests
    /// - `position`: panorama id or coordinate pair, flattened into the message
    /// - `allow_movement`: whether the client may walk around
    #[serde(rename_all = "camelCase")]
    Position {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start_round_at: Option<i64>,
        #[serde(flatten)]
        position: MapPosition,
        allow_movement: bool,
    },

    /// **Reveal Broadcast**
    ///
    /// The answer for the receiving connection's own location.
    Reveal {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        flag: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        clues: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bonus: Option<String>,
    },
}

impl ClientMessage {
    /// Parse a message from the text of a WebSocket frame.
    ///
    /// Unknown `type` values parse successfully as [`ClientMessage::Unknown`];
    /// text that is not a JSON object with a string `type` is an error.
    pub fn from_text(text: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_text(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl ServerMessage {
    /// Serialize a message into the text of a WebSocket frame.
    pub fn to_text(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_text(text: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// Round deadlines are sent to browsers as absolute epoch milliseconds, so
/// the relay works in the same unit.
pub fn current_timestamp_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_get_position() {
        let msg = ClientMessage::from_text(
            r#"{"type":"getPosition","locationID":"231b158","silent":true}"#,
        )
        .unwrap();

        assert_eq!(
            msg,
            ClientMessage::GetPosition {
                location_id: Some("231b158".to_string()),
                silent: Some(true),
                solo: None,
            }
        );
    }

    #[test]
    fn test_parse_get_position_without_location() {
        let msg = ClientMessage::from_text(r#"{"type":"getPosition"}"#).unwrap();

        assert_eq!(
            msg,
            ClientMessage::GetPosition {
                location_id: None,
                silent: None,
                solo: None,
            }
        );
    }

    #[test]
    fn test_parse_reveal_ignores_extra_fields() {
        let msg = ClientMessage::from_text(r#"{"type":"reveal","solo":true}"#).unwrap();
        assert_eq!(msg, ClientMessage::Reveal);
    }

    #[test]
    fn test_parse_unknown_type() {
        let msg = ClientMessage::from_text(r#"{"type":"frobnicate"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Unknown);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(ClientMessage::from_text("not json").is_err());
        assert!(ClientMessage::from_text(r#"{"locationID":"abc"}"#).is_err());
    }

    #[test]
    fn test_position_wire_shape() {
        let msg = ServerMessage::Position {
            start_round_at: Some(10_000),
            position: MapPosition::Panorama {
                panorama_id: "AuEPJltHzwIzwxBBEDekQA".to_string(),
            },
            allow_movement: false,
        };

        let value: serde_json::Value = serde_json::from_str(&msg.to_text().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "position",
                "startRoundAt": 10000,
                "panoramaID": "AuEPJltHzwIzwxBBEDekQA",
                "allowMovement": false,
            })
        );
    }

    #[test]
    fn test_silent_position_omits_deadline() {
        let msg = ServerMessage::Position {
            start_round_at: None,
            position: MapPosition::Coordinates {
                latitude: 51.5,
                longitude: -0.25,
            },
            allow_movement: true,
        };

        let value: serde_json::Value = serde_json::from_str(&msg.to_text().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "position",
                "latitude": 51.5,
                "longitude": -0.25,
                "allowMovement": true,
            })
        );
    }

    #[test]
    fn test_reveal_omits_absent_fields() {
        let msg = ServerMessage::Reveal {
            name: "Rome".to_string(),
            flag: None,
            clues: Some(vec!["Colosseum to the east".to_string()]),
            bonus: None,
        };

        let value: serde_json::Value = serde_json::from_str(&msg.to_text().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "reveal",
                "name": "Rome",
                "clues": ["Colosseum to the east"],
            })
        );
    }
}
