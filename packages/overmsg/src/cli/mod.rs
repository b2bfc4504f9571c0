pub mod account;
pub mod listen;
pub mod messaging;
pub mod settings;

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::debug;

use overmsg_core::{
    ClientConfig, ConfigStore, ControlClient, SelectedEndpoint, SelectorConfig, ServerSelector,
    SessionConfig, Token,
};

/// Loaded config record plus the store it came from.
pub struct App {
    pub store: ConfigStore,
    pub config: ClientConfig,
}

impl App {
    pub fn load(path: PathBuf) -> Result<Self> {
        let store = ConfigStore::new(path);
        let config = store
            .load()
            .with_context(|| format!("Failed to load config from {}", store.path().display()))?;
        debug!(path = %store.path().display(), servers = config.server_urls.len(), "config loaded");
        Ok(Self { store, config })
    }

    pub fn save(&self) -> Result<()> {
        self.store
            .save(&self.config)
            .with_context(|| format!("Failed to save config to {}", self.store.path().display()))
    }

    pub fn selector_config(&self) -> SelectorConfig {
        SelectorConfig::from_file(&self.config.session)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::from_file(&self.config.session)
    }

    /// Pick the fastest reachable candidate.
    pub async fn select_server(&self) -> Result<SelectedEndpoint> {
        let selector = ServerSelector::http(self.selector_config())?;
        let endpoint = selector
            .select(&self.config.server_urls)
            .await
            .with_context(|| {
                format!(
                    "None of the configured servers answered ({})",
                    self.config.server_urls.join(", ")
                )
            })?;
        Ok(endpoint)
    }

    pub async fn control(&self) -> Result<ControlClient> {
        let endpoint = self.select_server().await?;
        let client = ControlClient::new(&endpoint, self.session_config().request_timeout)?;
        Ok(client)
    }

    /// Stored name and token, or an error telling the user to sign in.
    pub fn signed_in(&self) -> Result<(String, Token)> {
        let (name, token) = self
            .config
            .signed_in()
            .context("Not signed in; run `overmsg login <name>` first")?;
        Ok((name.to_string(), token.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_creates_config_and_requires_sign_in() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let app = App::load(path.clone()).unwrap();
        assert!(path.exists());
        assert_eq!(app.config.server_urls, ["localhost"]);

        let err = app.signed_in().unwrap_err();
        assert!(err.to_string().contains("overmsg login"));
    }

    #[test]
    fn test_sign_in_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut app = App::load(path.clone()).unwrap();
        app.config
            .set_signed_in("alice", Token::parse("tok-abc").unwrap());
        app.save().unwrap();

        let reloaded = App::load(path).unwrap();
        let (name, token) = reloaded.signed_in().unwrap();
        assert_eq!(name, "alice");
        assert_eq!(token.expose(), "tok-abc");
    }
}
