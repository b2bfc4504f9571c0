use anyhow::{Context, Result, bail};
use chrono::Local;
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use overmsg_core::{ClientError, InboundMessage, Notice, SessionManager, SessionState};

use super::App;
use crate::chats::ChatList;

#[derive(Parser)]
pub struct ListenArgs {
    /// Print a per-peer summary when the stream ends
    #[arg(long)]
    pub summary: bool,
}

pub async fn listen_command(app: &mut App, args: ListenArgs) -> Result<()> {
    let (name, token) = app.signed_in()?;
    let endpoint = app.select_server().await?;

    let session = SessionManager::for_endpoint(&endpoint, app.session_config())?;
    let mut notices = session.subscribe();
    let mut queue = session
        .start(token)
        .await
        .with_context(|| format!("Failed to open the message stream on {}", endpoint.host))?;
    eprintln!("[overmsg: listening as {name} on {}, Ctrl-C to stop]", endpoint.host);

    let mut chats = ChatList::default();
    let mut ended: Option<ClientError> = None;

    loop {
        tokio::select! {
            msg = queue.recv() => match msg {
                Some(msg) => {
                    print_message(&msg);
                    chats.push(msg);
                }
                None => break,
            },
            notice = notices.recv() => match notice {
                Ok(Notice::SessionEnded(e)) => ended = Some(e),
                Ok(notice) => report(&notice),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "notices lagged"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    // The queue can close before the final notice is read
    while let Ok(notice) = notices.try_recv() {
        if let Notice::SessionEnded(e) = notice {
            ended = Some(e);
        }
    }

    if args.summary && !chats.is_empty() {
        eprintln!();
        for chat in chats.iter() {
            eprintln!("{:>12} ({}): {}", chat.peer, chat.messages.len(), chat.preview());
        }
    }

    match ended {
        None => Ok(()),
        Some(ClientError::Unauthorized) => {
            app.config.clear_signed_in();
            app.save()?;
            bail!("The server rejected the stored token; run `overmsg login` again")
        }
        Some(e) => Err(e).context("Connection to the server was lost"),
    }
}

fn print_message(msg: &InboundMessage) {
    let at = msg.received_at.with_timezone(&Local).format("%H:%M:%S");
    println!("[{at}] {}: {}", msg.from, msg.body);
}

fn report(notice: &Notice) {
    match notice {
        Notice::StateChanged { to, .. } => match to {
            SessionState::Degraded => eprintln!("[overmsg: connection unstable]"),
            SessionState::Authenticated => eprintln!("[overmsg: connected]"),
            _ => {}
        },
        Notice::Reconnecting { attempt, delay } => {
            eprintln!(
                "[overmsg: reconnecting in {:.1}s (attempt {attempt})]",
                delay.as_secs_f32()
            );
        }
        Notice::Reconnected { .. } => {}
        Notice::IngestError { reason, .. } => eprintln!("[overmsg: unreadable frame: {reason}]"),
        Notice::RemoteError { from, error } => eprintln!("[{from}: {error}]"),
        Notice::SessionEnded(_) => {}
    }
}
