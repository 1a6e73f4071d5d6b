use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ErrorKind;

/// cheap peek at the `type` discriminator of an inbound frame, without
/// committing to a fully typed shape.
///
/// mirrors the reference server's `Payload::get_to` peek (it looked only at
/// `to`; here we look only at `type`) so that negotiation/broadcast payloads
/// never need to round-trip through a strict struct.
#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
}

pub fn peek_type(text: &str) -> Option<String> {
    serde_json::from_str::<Envelope>(text).ok().map(|e| e.kind)
}

/// structured inbound commands.
///
/// `offer`, `answer`, `ice_candidate`, `broadcast` and `client-info` are
/// deliberately not modeled here — their payload is an opaque blob the core
/// never interprets (see `NegotiationFrame`); only the commands the router
/// actually branches on get a typed shape.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    CreateSession {
        #[serde(rename = "sessionId")]
        session_id: Option<String>,
        password: Option<String>,
        settings: Option<Value>,
    },
    Host {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    Join {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "isHost", default)]
        is_host: bool,
    },
    Leave,
    QuerySession {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    UpdatePassword {
        #[serde(rename = "sessionId")]
        session_id: String,
        password: String,
    },
    UpdateDeviceInfo {
        #[serde(rename = "sessionId")]
        session_id: String,
        nickname: String,
    },
}

/// a raw `offer` / `answer` / `ice_candidate` / `broadcast` / `client-info`
/// frame, kept as an opaque JSON object.
///
/// the router only needs `sessionId` and an optional `targetId` out of it;
/// every other field (sdp, candidate, data, ...) is forwarded byte-for-byte
/// to the recipient with `fromId` stamped in.
pub struct NegotiationFrame {
    pub kind: String,
    pub session_id: Option<String>,
    pub target_id: Option<String>,
    body: Map<String, Value>,
}

impl NegotiationFrame {
    pub fn parse(kind: String, text: &str) -> Option<Self> {
        let body = serde_json::from_str::<Value>(text).ok()?.as_object()?.clone();
        let session_id = body
            .get("sessionId")
            .and_then(Value::as_str)
            .map(str::to_string);
        let target_id = body
            .get("targetId")
            .and_then(Value::as_str)
            .map(str::to_string);

        Some(Self {
            kind,
            session_id,
            target_id,
            body,
        })
    }

    /// serialize the frame with `fromId` stamped, ready to forward.
    pub fn stamped(mut self, from_id: &str) -> String {
        self.body
            .insert("fromId".to_string(), Value::String(from_id.to_string()));
        Value::Object(self.body).to_string()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub found: bool,
    pub has_host: bool,
    pub client_count: usize,
    pub nickname: Option<String>,
    pub password_protected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
}

/// outbound messages the server emits on its own initiative (not a raw
/// forwarded negotiation/broadcast frame, see `NegotiationFrame::stamped`).
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    Welcome {
        #[serde(rename = "clientId")]
        client_id: String,
        #[serde(rename = "subdomainSession", skip_serializing_if = "Option::is_none")]
        subdomain_session: Option<String>,
    },
    SessionCreated {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    Joined {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "isHost")]
        is_host: bool,
    },
    PeerJoined {
        #[serde(rename = "peerId")]
        peer_id: String,
        #[serde(rename = "isHost")]
        is_host: bool,
    },
    PeerDisconnected {
        #[serde(rename = "peerId")]
        peer_id: String,
    },
    HostDisconnected,
    SessionResponse {
        found: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        session: Option<SessionSummary>,
    },
    PasswordUpdated {
        #[serde(rename = "sessionId")]
        session_id: String,
        password: String,
    },
    PasswordUpdateConfirmed {
        #[serde(rename = "sessionId")]
        session_id: String,
        password: String,
    },
    SettingsUpdated {
        #[serde(rename = "sessionId")]
        session_id: String,
        nickname: String,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        kind: Option<ErrorKind>,
    },
}

impl Outbound {
    pub fn error(kind: ErrorKind) -> Self {
        Self::Error {
            message: kind.message().to_string(),
            kind: Some(kind),
        }
    }

    pub fn to_text(&self) -> String {
        serde_json::to_string(self).expect("Outbound always serializes")
    }
}
