use tracing::info;

use super::ControlClient;
use crate::error::{CallKind, ClientError, Result};
use crate::protocol::{CredentialRequest, TokenResult};
use crate::token::{Credential, Token};

impl ControlClient {
    /// Create an account and obtain its first token.
    pub async fn register(&self, credential: Credential) -> Result<Token> {
        self.exchange("/reg", credential).await
    }

    /// Obtain a token for an existing account.
    pub async fn authenticate(&self, credential: Credential) -> Result<Token> {
        self.exchange("/get_token", credential).await
    }

    async fn exchange(&self, path: &str, credential: Credential) -> Result<Token> {
        let body = CredentialRequest {
            name: &credential.name,
            pass: &credential.secret,
        };
        let envelope = self.post_json(path, &body, None, CallKind::Auth).await?;
        let result: TokenResult = envelope.into_result(CallKind::Auth)?;

        let token = Token::parse(&result.token).ok_or_else(|| {
            ClientError::ProtocolViolation("server returned an empty token".into())
        })?;
        info!(name = %credential.name, path, "token obtained");
        Ok(token)
    }
}
