use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use clap::Parser;
use client_core::{
    config::{load_settings, load_settings_from},
    Attachment, ChatClient, ChatHandle, ClientEvent, HttpChatBackend, Identity, IdentityStore,
    Session, WsStompConnector,
};
use shared::{
    domain::{MessageType, UserId},
    protocol::ChatMessage,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast,
};
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tracing::warn;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::Command;

#[derive(Parser, Debug)]
#[command(about = "Headless one-to-one chat client")]
struct Args {
    /// Settings file; defaults to ./client.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    server_url: Option<String>,
    /// Stored as the local identity together with --username.
    #[arg(long, requires = "username")]
    user_id: Option<i64>,
    #[arg(long, requires = "user_id")]
    username: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => load_settings_from(path)?,
        None => load_settings()?,
    };
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url;
    }

    let store = IdentityStore::new(&settings.identity_path);
    let identity = match (args.user_id, args.username) {
        (Some(user_id), Some(username)) => {
            let identity = Identity {
                user_id: UserId(user_id),
                username,
            };
            store.save(&identity)?;
            identity
        }
        (None, None) => store.load()?.with_context(|| {
            format!(
                "no identity at '{}'; pass --user-id and --username",
                store.path().display()
            )
        })?,
        _ => bail!("--user-id and --username must be given together"),
    };

    let backend = Arc::new(HttpChatBackend::new(settings.base_url()));
    let connector = Arc::new(WsStompConnector::new(settings.ws_url()?)?);
    let client = ChatClient::new(
        Session {
            user_id: identity.user_id,
            username: identity.username.clone(),
        },
        backend,
        connector,
    );

    let printer = tokio::spawn(print_events(client.subscribe_events(), identity.user_id));
    client.start().await?;
    println!(
        "signed in as {} (#{}); /peer <id>, /image <path>, /users, /logout, /quit",
        identity.username, identity.user_id
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let Some(command) = Command::parse(&line) else {
            continue;
        };
        match command {
            Command::Peer(peer_id) => {
                if let Err(err) = client.select_peer(peer_id).await {
                    println!("! {err}");
                }
            }
            Command::Image(path) => {
                let attachment = match read_attachment(&path).await {
                    Ok(attachment) => attachment,
                    Err(err) => {
                        println!("! {err:#}");
                        continue;
                    }
                };
                if let Err(err) = client.send_attachment(attachment).await {
                    println!("! {err}");
                }
            }
            Command::Users => print_users(&client).await,
            Command::Logout => {
                client.logout().await;
                store.clear()?;
                break;
            }
            Command::Quit => break,
            Command::Text(text) => {
                client.note_input_activity().await;
                if let Err(err) = client.send_text(&text).await {
                    println!("! {err}");
                }
            }
            Command::Unknown(line) => println!("! unknown command: {line}"),
        }
    }

    printer.abort();
    Ok(())
}

async fn read_attachment(path: &Path) -> Result<Attachment> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read '{}'", path.display()))?;
    let media_type = mime_guess::from_path(path)
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_string();
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "attachment".to_string());
    Ok(Attachment {
        filename,
        media_type,
        bytes,
    })
}

async fn print_users(client: &dyn ChatHandle) {
    let snapshot = client.snapshot().await;
    for peer in client.peers().await {
        let presence = client
            .presence_label(peer.id)
            .await
            .unwrap_or_else(|| "Offline".to_string());
        let unread = snapshot.unread.get(&peer.id).copied().unwrap_or(0);
        let marker = if snapshot.active_peer == Some(peer.id) {
            "*"
        } else {
            " "
        };
        println!(
            "{marker} #{:<4} {:<16} {:<24} unread: {unread}",
            peer.id, peer.username, presence
        );
    }
}

fn render_message(message: &ChatMessage, me: UserId) -> String {
    let time = message
        .sent_at
        .map(|at| at.format("%H:%M").to_string())
        .unwrap_or_else(|| "now".to_string());
    let body = match message.attachment.as_deref() {
        Some(data_url) if message.kind() == MessageType::Image => {
            format!("[image, {} bytes encoded]", data_url.len())
        }
        _ => message.body().to_string(),
    };
    if message.sender_id == me {
        let tick = if message.is_seen() { "✓✓" } else { "✓" };
        format!("[{time}] me: {body} {tick}")
    } else {
        format!("[{time}] #{}: {body}", message.sender_id)
    }
}

async fn print_events(events: broadcast::Receiver<ClientEvent>, me: UserId) {
    let mut events = BroadcastStream::new(events);
    while let Some(event) = events.next().await {
        let event = match event {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "cli: event stream lagged");
                continue;
            }
        };
        match event {
            ClientEvent::ConnectionStateChanged(state) => println!("-- connection: {state:?}"),
            ClientEvent::Subscribed { epoch } => println!("-- subscribed (connection #{epoch})"),
            ClientEvent::DirectoryLoaded(peers) => {
                println!("-- directory loaded: {} users", peers.len())
            }
            ClientEvent::ActivePeerChanged(peer_id) => println!("-- chatting with #{peer_id}"),
            ClientEvent::HistoryLoaded { messages, .. } => {
                if messages.is_empty() {
                    println!("-- no messages yet");
                }
                for message in &messages {
                    println!("{}", render_message(message, me));
                }
            }
            ClientEvent::MessageReceived(message) => {
                println!("{}", render_message(&message, me))
            }
            ClientEvent::UnreadCountChanged { peer_id, count } if count > 0 => {
                println!("-- #{peer_id}: {count} unread")
            }
            ClientEvent::UnreadCountChanged { .. } => {}
            ClientEvent::PeerTypingChanged { peer_id, is_typing } => {
                if is_typing {
                    println!("-- #{peer_id} is typing...");
                }
            }
            ClientEvent::NotificationRequested { from, body } => println!("** {from}: {body}"),
            ClientEvent::Failure(err) => println!("! {err}"),
            ClientEvent::LoggedOut => println!("-- logged out"),
        }
    }
}
