//! Terminal WebSocket control frames.
//!
//! PTY bytes travel as binary frames; everything else is JSON tagged by
//! `type`. Frame names are part of the client protocol and must not change.

use serde::{Deserialize, Serialize};

/// Frames the client sends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Keystrokes (or pasted text) for the backend.
    TermInput { data: String },
    /// Window size change.
    TermResize { rows: u16, cols: u16 },
    /// Migrate this session to a stable, client-chosen id.
    TermSetSessionId { session_id: String },
    /// Pause or resume output forwarding.
    TermPause { pause: bool },
    /// Reply to a server-side output request.
    TermOutputResponse {
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// JSON frames the server sends (PTY bytes go as binary frames instead).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// Connection/session status updates.
    #[serde(rename = "status")]
    Status { message: String },
    /// Ask the client to re-render with a different theme.
    #[serde(rename = "change-theme")]
    ChangeTheme { theme: String },
    /// Ask the client for its authoritative xterm scrollback window.
    TermOutputRequest { request_id: String, lines: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frames_round_trip() {
        let json = r#"{"type":"TermInput","data":"ls\n"}"#;
        let frame: ClientFrame = serde_json::from_str(json).unwrap();
        assert!(matches!(frame, ClientFrame::TermInput { ref data } if data == "ls\n"));

        let json = r#"{"type":"TermSetSessionId","session_id":"stable-1"}"#;
        let frame: ClientFrame = serde_json::from_str(json).unwrap();
        assert!(
            matches!(frame, ClientFrame::TermSetSessionId { ref session_id } if session_id == "stable-1")
        );

        let json = r#"{"type":"TermOutputResponse","request_id":"r1","output":["a","b"]}"#;
        let frame: ClientFrame = serde_json::from_str(json).unwrap();
        match frame {
            ClientFrame::TermOutputResponse {
                request_id,
                output,
                error,
            } => {
                assert_eq!(request_id, "r1");
                assert_eq!(output.unwrap(), vec!["a", "b"]);
                assert!(error.is_none());
            }
            other => panic!("wrong frame: {other:?}"),
        }
    }

    #[test]
    fn server_frames_serialize_with_expected_tags() {
        let json =
            serde_json::to_string(&ServerFrame::TermOutputRequest {
                request_id: "r2".into(),
                lines: 50,
            })
            .unwrap();
        assert!(json.contains(r#""type":"TermOutputRequest""#));
        assert!(json.contains(r#""lines":50"#));

        let json = serde_json::to_string(&ServerFrame::ChangeTheme {
            theme: "dark".into(),
        })
        .unwrap();
        assert!(json.contains(r#""type":"change-theme""#));
    }
}
