//! The channel-multiplexed exec wire format.
//!
//! Five logical streams share one WebSocket connection. Under the binary
//! subprotocols every binary frame starts with a single channel-id byte;
//! under the base64 subprotocol every text frame starts with an ASCII digit
//! naming the channel, followed by the base64 encoding of the payload.
//!
//! The status channel (3) carries a JSON Status object at session end;
//! [`parse_status`] turns it into an exit outcome.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_tungstenite::tungstenite::Message;
use tracing::warn;

/// Channel ids multiplexed over the exec connection
pub mod channel {
    /// Channel 0: stdin (client to server)
    pub const STDIN: u8 = 0;
    /// Channel 1: stdout (server to client)
    pub const STDOUT: u8 = 1;
    /// Channel 2: stderr (server to client)
    pub const STDERR: u8 = 2;
    /// Channel 3: status payload (server to client, at session end)
    pub const ERROR: u8 = 3;
    /// Channel 4: terminal resize (client to server)
    pub const RESIZE: u8 = 4;
}

/// Exit code used when a NonZeroExitCode status carries no parseable code
pub const UNKNOWN_EXIT_CODE: i32 = 1;

/// A negotiated exec subprotocol.
///
/// The server's selection during the upgrade is authoritative; it fixes the
/// frame encoding for the whole session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subprotocol {
    V4Channel,
    V3Channel,
    V2Channel,
    Channel,
    Base64Channel,
}

impl Subprotocol {
    /// The WebSocket-level subprotocol label.
    pub fn name(&self) -> &'static str {
        match self {
            Subprotocol::V4Channel => "v4.channel.k8s.io",
            Subprotocol::V3Channel => "v3.channel.k8s.io",
            Subprotocol::V2Channel => "v2.channel.k8s.io",
            Subprotocol::Channel => "channel.k8s.io",
            Subprotocol::Base64Channel => "base64.channel.k8s.io",
        }
    }

    /// Map the server's selection back to a subprotocol.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "v4.channel.k8s.io" => Some(Subprotocol::V4Channel),
            "v3.channel.k8s.io" => Some(Subprotocol::V3Channel),
            "v2.channel.k8s.io" => Some(Subprotocol::V2Channel),
            "channel.k8s.io" => Some(Subprotocol::Channel),
            "base64.channel.k8s.io" => Some(Subprotocol::Base64Channel),
            _ => None,
        }
    }

    /// The ordered offer for the upgrade request.
    pub fn offered(prefer_base64: bool) -> &'static [Subprotocol] {
        if prefer_base64 {
            &[Subprotocol::Base64Channel]
        } else {
            &[
                Subprotocol::V4Channel,
                Subprotocol::V3Channel,
                Subprotocol::V2Channel,
                Subprotocol::Channel,
            ]
        }
    }

    /// Whether frames are base64-encoded text rather than prefixed binary.
    pub fn is_base64(&self) -> bool {
        matches!(self, Subprotocol::Base64Channel)
    }
}

/// A frame that could not be decoded
#[derive(Debug, Error)]
pub enum FrameError {
    /// Frame carried no channel id at all
    #[error("empty frame")]
    Empty,
    /// Frame type does not match the negotiated subprotocol
    #[error("unexpected {got} frame for subprotocol {expected}")]
    WrongType {
        got: &'static str,
        expected: &'static str,
    },
    /// Text frame whose first character is not a channel digit
    #[error("invalid channel character {0:?}")]
    BadChannel(char),
    /// Text frame whose body is not valid base64
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Encode one payload as a single wire frame for the given subprotocol.
pub fn encode(channel: u8, payload: &[u8], mode: Subprotocol) -> Message {
    if mode.is_base64() {
        let mut text = String::with_capacity(1 + payload.len() * 4 / 3 + 4);
        text.push(char::from(b'0' + channel));
        BASE64.encode_string(payload, &mut text);
        Message::text(text)
    } else {
        let mut frame = Vec::with_capacity(1 + payload.len());
        frame.push(channel);
        frame.extend_from_slice(payload);
        Message::binary(frame)
    }
}

/// Decode one wire frame into its channel id and payload bytes.
///
/// Unknown-but-well-formed channel ids decode successfully; dropping them is
/// the session's call, not the codec's.
pub fn decode(msg: &Message, mode: Subprotocol) -> Result<(u8, Vec<u8>), FrameError> {
    match msg {
        Message::Binary(data) => {
            if mode.is_base64() {
                return Err(FrameError::WrongType {
                    got: "binary",
                    expected: mode.name(),
                });
            }
            let data: &[u8] = data.as_ref();
            let (&channel, payload) = data.split_first().ok_or(FrameError::Empty)?;
            Ok((channel, payload.to_vec()))
        }
        Message::Text(text) => {
            if !mode.is_base64() {
                return Err(FrameError::WrongType {
                    got: "text",
                    expected: mode.name(),
                });
            }
            let text: &str = text.as_ref();
            let mut chars = text.chars();
            let digit = chars.next().ok_or(FrameError::Empty)?;
            if !digit.is_ascii_digit() {
                return Err(FrameError::BadChannel(digit));
            }
            let payload = BASE64.decode(chars.as_str())?;
            Ok((digit as u8 - b'0', payload))
        }
        _ => Err(FrameError::WrongType {
            got: "control",
            expected: mode.name(),
        }),
    }
}

/// Terminal dimensions in character cells, as the resize channel expects
/// them on the wire: `{"Width":W,"Height":H}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TermSize {
    pub width: u16,
    pub height: u16,
}

/// Encode a resize event as a channel-4 frame.
pub fn encode_resize(size: TermSize, mode: Subprotocol) -> Message {
    // The payload is JSON either way; only the channel prefix differs.
    let json = serde_json::to_vec(&size).unwrap_or_default();
    encode(channel::RESIZE, &json, mode)
}

/// How the remote session ended, per the channel-3 status payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusOutcome {
    /// `status == "Success"`: clean exit, code 0
    Success,
    /// `NonZeroExitCode`: the remote process exited with this code
    ExitCode(i32),
    /// Any other failure; the message is surfaced verbatim
    Failed(String),
}

#[derive(Debug, Default, Deserialize)]
struct Status {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    details: StatusDetails,
}

#[derive(Debug, Default, Deserialize)]
struct StatusDetails {
    #[serde(default)]
    causes: Vec<StatusCause>,
}

#[derive(Debug, Default, Deserialize)]
struct StatusCause {
    #[serde(default)]
    message: String,
}

/// Parse the channel-3 status payload.
///
/// Returns an error only when the payload is not a Status object at all.
pub fn parse_status(payload: &[u8]) -> Result<StatusOutcome, serde_json::Error> {
    let status: Status = serde_json::from_slice(payload)?;

    if status.status == "Success" {
        return Ok(StatusOutcome::Success);
    }

    if status.status == "Failure" && status.reason == "NonZeroExitCode" {
        let code = status
            .details
            .causes
            .first()
            .and_then(|c| c.message.parse::<i32>().ok());
        return Ok(match code {
            Some(code) => StatusOutcome::ExitCode(code),
            None => {
                warn!("NonZeroExitCode status without a parseable exit code");
                StatusOutcome::ExitCode(UNKNOWN_EXIT_CODE)
            }
        });
    }

    Ok(StatusOutcome::Failed(status.message))
}
