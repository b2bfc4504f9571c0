use anyhow::{Context, Result, bail};
use clap::Parser;

use overmsg_core::{ClientError, Presence};

use super::App;

#[derive(Parser)]
pub struct ServersArgs {
    /// Replace the candidate list before probing
    #[arg(long = "set", num_args = 1..)]
    pub set: Vec<String>,
}

#[derive(Parser)]
pub struct SendArgs {
    /// Recipient name
    pub peer: String,

    /// Message text (words are joined with spaces)
    #[arg(required = true, num_args = 1..)]
    pub message: Vec<String>,
}

#[derive(Parser)]
pub struct OnlineArgs {
    /// Peer name
    pub peer: String,
}

pub async fn servers_command(app: &mut App, args: ServersArgs) -> Result<()> {
    if !args.set.is_empty() && args.set != app.config.server_urls {
        app.config.server_urls = args.set;
        app.config.normalize();
        app.save()?;
    }

    for host in &app.config.server_urls {
        println!("  {host}");
    }
    let endpoint = app.select_server().await?;
    println!("Using {} ({})", endpoint.host, endpoint.control_url);
    Ok(())
}

pub async fn send_command(app: &App, args: SendArgs) -> Result<()> {
    let (_, token) = app.signed_in()?;
    let body = args.message.join(" ");
    if body.trim().is_empty() {
        bail!("Message is empty");
    }

    let control = app.control().await?;
    match control.send_message(&token, &body, &args.peer).await {
        Ok(()) => Ok(()),
        Err(ClientError::Unauthorized) => {
            bail!("The stored token was rejected; run `overmsg login` again")
        }
        Err(ClientError::PeerNotFound) => bail!("{} is not registered", args.peer),
        Err(e) => Err(e).with_context(|| format!("Failed to send to {}", args.peer)),
    }
}

pub async fn online_command(app: &App, args: OnlineArgs) -> Result<()> {
    let control = app.control().await?;
    let presence = control
        .is_online(&args.peer)
        .await
        .with_context(|| format!("Failed to query {}", args.peer))?;
    println!("{}: {}", args.peer, describe(presence));
    Ok(())
}

fn describe(presence: Presence) -> &'static str {
    match presence {
        Presence { exists: false, .. } => "never registered",
        Presence { online: false, .. } => "offline",
        Presence { online: true, .. } => "online",
    }
}
