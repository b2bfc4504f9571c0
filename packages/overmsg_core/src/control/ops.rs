use serde::Serialize;
use tracing::{debug, info};

use super::ControlClient;
use crate::error::{CallKind, ClientError, Result};
use crate::protocol::{IsOnlineRequest, PresenceResult, SendMessageRequest};
use crate::token::Token;

/// Answer to a presence query.
///
/// `exists = false` means the peer never registered; `exists = true,
/// online = false` means registered but not connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Presence {
    pub online: bool,
    pub exists: bool,
}

impl ControlClient {
    pub async fn send_message(&self, token: &Token, body: &str, peer_name: &str) -> Result<()> {
        let req = SendMessageRequest {
            peer_name,
            message: body,
        };
        self.post_json("/send_message", &req, Some(token), CallKind::Operation)
            .await?
            .check(CallKind::Operation)?;
        debug!(peer = %peer_name, len = body.len(), "message sent");
        Ok(())
    }

    pub async fn is_online(&self, peer_name: &str) -> Result<Presence> {
        let req = IsOnlineRequest { name: peer_name };
        let result: PresenceResult = self
            .post_json("/is_online", &req, None, CallKind::Operation)
            .await?
            .into_result(CallKind::Operation)?;
        Ok(Presence {
            online: result.is,
            exists: result.exists,
        })
    }

    pub async fn sign_out(&self, token: &Token) -> Result<()> {
        self.post_empty("/go_offline", token)
            .await?
            .check(CallKind::Operation)?;
        info!("signed out");
        Ok(())
    }

    /// POST the raw token; any 2xx means alive.
    pub async fn heartbeat(&self, token: &Token) -> Result<()> {
        let resp = self
            .http
            .post(self.url("/heartbeat"))
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(token.expose().to_string())
            .send()
            .await
            .map_err(ClientError::from_reqwest)?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ClientError::Unauthorized);
        }
        Err(ClientError::Transport(format!("heartbeat rejected: HTTP {status}")))
    }
}
