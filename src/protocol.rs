//! Channel messages exchanged with the editor over the WebSocket
//!
//! Every frame is a JSON object tagged by `type`. Incoming frames may use
//! `kind` as the tag instead.

use serde::{Deserialize, Serialize};

use crate::error::PlaygroundError;

/// Message sent by the client
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Submit (or resubmit) source code
    Code { code: String },
    /// One line of standard input for the running program
    Input { input: String },
}

#[derive(Debug, Deserialize)]
struct RawClientMessage {
    #[serde(rename = "type", alias = "kind")]
    kind: String,
    code: Option<String>,
    input: Option<String>,
}

impl ClientMessage {
    /// Parse a text frame
    pub fn parse(text: &str) -> Result<Self, PlaygroundError> {
        let raw: RawClientMessage = serde_json::from_str(text)?;
        match (raw.kind.as_str(), raw.code, raw.input) {
            ("code", Some(code), _) => Ok(ClientMessage::Code { code }),
            ("input", _, Some(input)) => Ok(ClientMessage::Input { input }),
            ("code", None, _) => Err(PlaygroundError::Protocol(
                "code message without `code`".into(),
            )),
            ("input", _, None) => Err(PlaygroundError::Protocol(
                "input message without `input`".into(),
            )),
            (other, _, _) => Err(PlaygroundError::Protocol(format!(
                "unknown message type {:?}",
                other
            ))),
        }
    }
}

/// Message sent to the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    Error { message: String },
    Compiled { message: String },
    Running { message: String },
    Output { message: String },
    InputRequest,
    Finished { timer: String, message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    pub fn compiled() -> Self {
        ServerMessage::Compiled {
            message: "Compiled Successfully!".into(),
        }
    }

    pub fn running() -> Self {
        ServerMessage::Running {
            message: "Running...".into(),
        }
    }

    pub fn finished(timer: impl Into<String>) -> Self {
        ServerMessage::Finished {
            timer: timer.into(),
            message: "Execution Finished.".into(),
        }
    }

    /// Generic reply for frames that could not be handled
    pub fn internal_error() -> Self {
        ServerMessage::error("Internal Server Error")
    }

    pub fn to_json(&self) -> String {
        // Serializing these plain enums cannot fail
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","message":"Internal Server Error"}"#.to_string()
        })
    }
}
