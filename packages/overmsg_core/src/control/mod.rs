//! Control channel: one-shot request/response calls over HTTP.
//!
//! - `auth`: register / authenticate, exchanging a credential for a token
//! - `ops`: send message, presence query, sign-out, heartbeat
//!
//! No call retries internally; retry policy belongs to the caller.

mod auth;
mod ops;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::error::{CallKind, ClientError, Result};
use crate::protocol::Envelope;
use crate::selector::SelectedEndpoint;
use crate::token::Token;

pub use ops::Presence;

/// Header carrying the token on authenticated calls.
pub const AUTH_HEADER: &str = "Auth-Token";

/// The control-channel calls the session supervisor depends on.
///
/// [`ControlClient`] is the production implementation; tests inject fakes.
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Liveness beacon carrying the token.
    async fn heartbeat(&self, token: &Token) -> Result<()>;

    /// Unauthenticated reachability check. Returns the round-trip time.
    async fn ping(&self) -> Result<Duration>;

    /// Mark the user offline and invalidate the token server-side.
    async fn sign_out(&self, token: &Token) -> Result<()>;
}

/// HTTP client for the control channel of one selected server.
#[derive(Clone)]
pub struct ControlClient {
    http: reqwest::Client,
    base_url: String,
}

impl ControlClient {
    pub fn new(endpoint: &SelectedEndpoint, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ClientError::from_reqwest)?;
        Ok(Self {
            http,
            base_url: endpoint.control_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// POST a JSON body and read the response envelope.
    async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        token: Option<&Token>,
        kind: CallKind,
    ) -> Result<Envelope> {
        let mut req = self.http.post(self.url(path)).json(body);
        if let Some(token) = token {
            req = req.header(AUTH_HEADER, token.expose());
        }
        self.read_envelope(path, req, kind).await
    }

    /// POST with no body (token header only) and read the response envelope.
    async fn post_empty(&self, path: &str, token: &Token) -> Result<Envelope> {
        let req = self
            .http
            .post(self.url(path))
            .header(AUTH_HEADER, token.expose());
        self.read_envelope(path, req, CallKind::Operation).await
    }

    async fn read_envelope(
        &self,
        path: &str,
        req: reqwest::RequestBuilder,
        kind: CallKind,
    ) -> Result<Envelope> {
        let resp = req.send().await.map_err(ClientError::from_reqwest)?;
        let status = resp.status();
        let bytes = resp.bytes().await.map_err(ClientError::from_reqwest)?;
        debug!(path, status = status.as_u16(), len = bytes.len(), "control response");

        match serde_json::from_slice::<Envelope>(&bytes) {
            Ok(envelope) => Ok(envelope),
            Err(_) => Err(ClientError::from_status(kind, status)),
        }
    }
}

#[async_trait]
impl ControlChannel for ControlClient {
    async fn heartbeat(&self, token: &Token) -> Result<()> {
        ControlClient::heartbeat(self, token).await
    }

    async fn ping(&self) -> Result<Duration> {
        let start = Instant::now();
        self.http
            .get(&self.base_url)
            .send()
            .await
            .map_err(ClientError::from_reqwest)?;
        Ok(start.elapsed())
    }

    async fn sign_out(&self, token: &Token) -> Result<()> {
        ControlClient::sign_out(self, token).await
    }
}
