use anyhow::{Context, Result, bail};
use clap::Parser;
use std::io::{self, BufRead, Write};
use tracing::warn;

use overmsg_core::{ClientError, Credential, SelectedEndpoint, SessionManager, Token};

use super::App;

#[derive(Parser)]
pub struct CredentialArgs {
    /// Account name
    pub name: String,

    /// Password (prompted on stdin when omitted)
    #[arg(long, env = "OVERMSG_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

pub async fn register_command(app: &mut App, args: CredentialArgs) -> Result<()> {
    let secret = resolve_password(args.password).await?;
    let control = app.control().await?;

    let token = control
        .register(Credential::new(&args.name, secret))
        .await
        .with_context(|| format!("Failed to register {}", args.name))?;

    app.config.set_signed_in(&args.name, token);
    app.save()?;
    println!("Registered and signed in as {}", args.name);
    Ok(())
}

pub async fn login_command(app: &mut App, args: CredentialArgs) -> Result<()> {
    let secret = resolve_password(args.password).await?;
    let control = app.control().await?;

    let token = control
        .authenticate(Credential::new(&args.name, secret))
        .await
        .with_context(|| format!("Failed to sign in as {}", args.name))?;

    app.config.set_signed_in(&args.name, token);
    app.save()?;
    println!("Signed in as {}", args.name);
    Ok(())
}

/// Sign out server-side, then forget the token whatever the server said.
pub async fn logout_command(app: &mut App) -> Result<()> {
    let (name, token) = app.signed_in()?;

    match app.select_server().await {
        Ok(endpoint) => match sign_out_stored(app, &endpoint, token).await {
            Ok(()) => {}
            // Already invalid server-side
            Err(ClientError::Unauthorized) => {}
            Err(e) => warn!(error = %e, "sign-out request failed, clearing local token anyway"),
        },
        Err(e) => warn!(error = %e, "no server reachable, clearing local token anyway"),
    }

    app.config.clear_signed_in();
    app.save()?;
    println!("Signed out {name}");
    Ok(())
}

/// Sign out a stored token through an idle session.
async fn sign_out_stored(
    app: &App,
    endpoint: &SelectedEndpoint,
    token: Token,
) -> overmsg_core::Result<()> {
    SessionManager::for_endpoint(endpoint, app.session_config())?
        .with_token(token)
        .sign_out()
        .await
}

async fn resolve_password(password: Option<String>) -> Result<String> {
    let secret = match password {
        Some(p) => p,
        None => tokio::task::spawn_blocking(prompt_password)
            .await
            .context("Password prompt task failed")??,
    };
    if secret.is_empty() {
        bail!("Password must not be empty");
    }
    Ok(secret)
}

fn prompt_password() -> Result<String> {
    eprint!("Password: ");
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read password")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
