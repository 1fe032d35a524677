//! Defines the WebSocket message protocol between the browser client and the API server.

use serde::{Deserialize, Serialize};

/// Messages sent from the client (browser) to the server.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Starts or resumes a session. This must be the first message; passing
    /// an existing `session_id` re-attaches to that session (reconnect).
    Register {
        #[serde(default)]
        session_id: Option<String>,
    },
    /// A line of input from the human.
    Input { text: String },
}

/// Messages sent from the server to the client (browser).
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms registration and echoes the session id to reuse on reconnect.
    Registered { session_id: String },
    /// A line of output from the session worker.
    Output { text: String },
    /// Updates the page title.
    SetTitle { title: String },
    /// Clears a display panel.
    ClearPanel { panel: String },
    /// Progress-indicator update for the sidebar.
    Progress { chapter: usize, challenge: usize },
    /// The session is over; no further output will follow.
    SessionEnded,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_register_round_trips() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"register","session_id":"abc"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Register { session_id: Some(id) } if id == "abc"));

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"register","session_id":null}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Register { session_id: None }));

        // A fresh client may omit the field entirely.
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"register"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Register { session_id: None }));
    }

    #[test]
    fn client_input_carries_text() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"input","text":"hello"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Input { text } if text == "hello"));
    }

    #[test]
    fn server_messages_serialize_with_snake_case_tags() {
        let json = serde_json::to_string(&ServerMessage::Output {
            text: "hi".to_string(),
        })
        .unwrap();
        assert!(json.contains(r#""type":"output""#));

        let json = serde_json::to_string(&ServerMessage::Progress {
            chapter: 1,
            challenge: 2,
        })
        .unwrap();
        assert!(json.contains(r#""type":"progress""#));
        assert!(json.contains(r#""chapter":1"#));

        let json = serde_json::to_string(&ServerMessage::SessionEnded).unwrap();
        assert!(json.contains(r#""type":"session_ended""#));
    }
}
