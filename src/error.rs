use serde::Serialize;

/// wire-level error kinds.
///
/// these are the only error identities the protocol promises a caller;
/// everything else stays inside an `anyhow::Error` and is logged, never
/// serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidMessage,
    NotFound,
    AlreadyExists,
    HostConflict,
    NotInSession,
    NotHost,
    HostAbsent,
    SlowConsumer,
}

impl ErrorKind {
    pub fn message(self) -> &'static str {
        match self {
            Self::InvalidMessage => "message body failed to decode or required field absent",
            Self::NotFound => "no live session with this id",
            Self::AlreadyExists => "a live session with this id already exists",
            Self::HostConflict => "a host is already attached to this session",
            Self::NotInSession => "endpoint is not attached to a session",
            Self::NotHost => "only the host may perform this operation",
            Self::HostAbsent => "no host is currently attached to this session",
            Self::SlowConsumer => "outbound queue exceeded its high-water mark",
        }
    }
}
