//! Wire records for the parlor conversation protocol.
//! The server streams `\r\n`-terminated JSON records over a long-poll
//! response body; this crate owns the record scanner and the strict
//! parser so the client never has to touch raw response bytes.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// Two-byte sequence marking the end of one wire record.
pub const RECORD_TERMINATOR: &[u8] = b"\r\n";

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed record: {0}")]
    Decode(String),
    #[error("bad payload for \"{discriminator}\" record: {reason}")]
    Shape {
        discriminator: &'static str,
        reason: String,
    },
}

/// One decoded record from the watch stream. Constructed by
/// [`next_record`], applied to the session once, then discarded.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Credential assignment, first record of a fresh conversation.
    Header { num: u32, id: String },
    /// Conversation phase announcement (chat variant).
    StateChanged(RemotePhase),
    /// Conversation over (game variant).
    End,
    PlayerName { num: u32, name: String },
    Player {
        num: u32,
        typing: bool,
        connected: bool,
    },
    Chat { person: u32, text: String },
    Tile(TileUpdate),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemotePhase {
    InProgress,
    Done,
}

/// Payload of a `tile` record. Coordinates are tenths of a unit; the
/// letter travels only once the tile is facing up.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TileUpdate {
    pub num: u32,
    pub x: i32,
    pub y: i32,
    #[serde(rename = "facing-up")]
    pub facing_up: bool,
    #[serde(default)]
    pub letter: Option<char>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRecord {
    pub message: InboundMessage,
    /// Buffer offset just past the record's terminator.
    pub cursor: usize,
}

/// Scans `buffer` from `cursor` for the next complete record and parses
/// it. Returns `Ok(None)` when no terminator follows the cursor, so a
/// partial record is never emitted. Records with unrecognized
/// discriminators (the server pads the stream with `["padding", …]`) are
/// consumed silently. Purely a function of `(buffer, cursor)`: callers
/// advance the cursor themselves and may re-invoke at any time.
pub fn next_record(
    buffer: &[u8],
    cursor: usize,
) -> Result<Option<DecodedRecord>, ProtocolError> {
    let mut pos = cursor.min(buffer.len());
    while let Some(end) = find_terminator(buffer, pos) {
        let raw = &buffer[pos..end];
        pos = end + RECORD_TERMINATOR.len();
        if let Some(message) = parse_record(raw)? {
            return Ok(Some(DecodedRecord {
                message,
                cursor: pos,
            }));
        }
    }
    Ok(None)
}

fn find_terminator(buffer: &[u8], from: usize) -> Option<usize> {
    buffer[from..]
        .windows(RECORD_TERMINATOR.len())
        .position(|window| window == RECORD_TERMINATOR)
        .map(|offset| from + offset)
}

#[derive(Debug, Deserialize)]
struct HeaderPayload {
    num: u32,
    id: String,
}

#[derive(Debug, Deserialize)]
struct PlayerNamePayload {
    num: u32,
    name: String,
}

#[derive(Debug, Deserialize)]
struct PlayerPayload {
    num: u32,
    typing: bool,
    connected: bool,
}

#[derive(Debug, Deserialize)]
struct ChatPayload {
    person: u32,
    text: String,
}

/// Parses one terminator-stripped record body. `Ok(None)` means the
/// record is well formed but carries nothing the client acts on.
fn parse_record(raw: &[u8]) -> Result<Option<InboundMessage>, ProtocolError> {
    let value: Value =
        serde_json::from_slice(raw).map_err(|err| ProtocolError::Decode(err.to_string()))?;
    let Value::Array(mut elements) = value else {
        return Err(ProtocolError::Decode("record is not an array".into()));
    };
    if elements.is_empty() {
        return Err(ProtocolError::Decode("record array is empty".into()));
    }
    let payload = if elements.len() > 1 {
        elements.swap_remove(1)
    } else {
        Value::Null
    };
    let Value::String(tag) = elements.swap_remove(0) else {
        return Err(ProtocolError::Decode(
            "record discriminator is not a string".into(),
        ));
    };

    match tag.as_str() {
        "header" => {
            let HeaderPayload { num, id } = shape("header", payload)?;
            Ok(Some(InboundMessage::Header { num, id }))
        }
        "state" => match payload {
            Value::String(state) => match state.as_str() {
                "in-progress" => Ok(Some(InboundMessage::StateChanged(RemotePhase::InProgress))),
                "done" => Ok(Some(InboundMessage::StateChanged(RemotePhase::Done))),
                // Unrecognized phases may be announced by newer servers.
                _ => Ok(None),
            },
            _ => Err(ProtocolError::Shape {
                discriminator: "state",
                reason: "payload is not a string".into(),
            }),
        },
        "end" => Ok(Some(InboundMessage::End)),
        "player-name" => {
            let PlayerNamePayload { num, name } = shape("player-name", payload)?;
            Ok(Some(InboundMessage::PlayerName { num, name }))
        }
        "player" => {
            let PlayerPayload {
                num,
                typing,
                connected,
            } = shape("player", payload)?;
            Ok(Some(InboundMessage::Player {
                num,
                typing,
                connected,
            }))
        }
        "message" => {
            let ChatPayload { person, text } = shape("message", payload)?;
            Ok(Some(InboundMessage::Chat { person, text }))
        }
        "tile" => Ok(Some(InboundMessage::Tile(shape("tile", payload)?))),
        _ => Ok(None),
    }
}

fn shape<T: DeserializeOwned>(
    discriminator: &'static str,
    payload: Value,
) -> Result<T, ProtocolError> {
    serde_json::from_value(payload).map_err(|err| ProtocolError::Shape {
        discriminator,
        reason: err.to_string(),
    })
}
