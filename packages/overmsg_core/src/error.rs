//! Error taxonomy shared by every component of the client core.

use std::time::Duration;

use reqwest::StatusCode;

/// Errors surfaced by selection, auth, control operations and the session.
///
/// Payloads are plain strings so the error can be cloned into broadcast
/// notifications.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Dial, read, write or request failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed response, or a success response with no usable content.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The server rejected the token.
    #[error("unauthorized")]
    Unauthorized,

    /// Every candidate failed its probe, or the selection deadline elapsed.
    #[error("no server available")]
    NoServerAvailable,

    #[error("name is already taken")]
    NameTaken,

    #[error("invalid name or password")]
    InvalidCredential,

    #[error("peer not found")]
    PeerNotFound,

    /// The server refused the request with a reason that fits no other variant.
    #[error("server rejected request: {0}")]
    Rejected(String),

    #[error("a session is already active")]
    SessionActive,

    #[error("no active session")]
    NoSession,
}

impl ClientError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::Transport(_) => "transport_error",
            Self::ProtocolViolation(_) => "protocol_violation",
            Self::Unauthorized => "unauthorized",
            Self::NoServerAvailable => "no_server_available",
            Self::NameTaken => "name_taken",
            Self::InvalidCredential => "invalid_credential",
            Self::PeerNotFound => "peer_not_found",
            Self::Rejected(_) => "rejected",
            Self::SessionActive => "session_active",
            Self::NoSession => "no_session",
        }
    }

    /// Whether retrying the same call later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::NoServerAvailable)
    }

    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Transport(format!("request timed out: {err}"))
        } else if err.is_connect() {
            Self::Transport(format!("connection failed: {err}"))
        } else if err.is_decode() {
            Self::ProtocolViolation(format!("undecodable response: {err}"))
        } else {
            Self::Transport(err.to_string())
        }
    }

    pub fn from_io(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }

    pub(crate) fn timed_out(what: &str, after: Duration) -> Self {
        Self::Transport(format!("{what} timed out after {}ms", after.as_millis()))
    }

    /// Map the `error` string of a failed response envelope onto the taxonomy.
    ///
    /// The server reports failures as free text; known phrasings are
    /// recognised and everything else becomes [`ClientError::Rejected`].
    /// Auth calls carry no token and name no peer, so a missing account is a
    /// bad credential there and token wording is not an auth rejection.
    pub fn from_server_message(kind: CallKind, message: &str) -> Self {
        let lower = message.to_ascii_lowercase();

        if lower.contains("taken") || lower.contains("already exists") || lower.contains("busy") {
            return Self::NameTaken;
        }
        let bad_credential = lower.contains("password")
            || lower.contains("credential")
            || lower.contains("wrong pass")
            || lower.contains("invalid name");
        let missing = lower.contains("not found")
            || lower.contains("no such")
            || lower.contains("doesn't exist")
            || lower.contains("does not exist");

        match kind {
            CallKind::Auth => {
                if bad_credential || missing {
                    return Self::InvalidCredential;
                }
            }
            CallKind::Operation => {
                if lower.contains("token")
                    || lower.contains("unauthori")
                    || lower.contains("not auth")
                {
                    return Self::Unauthorized;
                }
                if bad_credential {
                    return Self::InvalidCredential;
                }
                if missing {
                    return Self::PeerNotFound;
                }
            }
        }

        Self::Rejected(message.to_string())
    }

    /// Fallback classification when the response body could not be read as
    /// an envelope.
    pub fn from_status(kind: CallKind, status: StatusCode) -> Self {
        match (kind, status) {
            (_, StatusCode::CONFLICT) => Self::NameTaken,
            (
                CallKind::Auth,
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND,
            ) => Self::InvalidCredential,
            (CallKind::Operation, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => {
                Self::Unauthorized
            }
            (CallKind::Operation, StatusCode::NOT_FOUND) => Self::PeerNotFound,
            (_, other) => Self::ProtocolViolation(format!("unparseable response (HTTP {other})")),
        }
    }
}

/// Which family of control call a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// `/reg`, `/get_token`: credential in, token out.
    Auth,
    /// Everything after sign-in, plus presence queries.
    Operation,
}

pub type Result<T> = std::result::Result<T, ClientError>;
