use std::error::Error;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use direct_chat::connection::ConnectionManager;
use direct_chat::events::{EventKind, ServerEvent};
use direct_chat::models::{Credentials, Message, Session};
use direct_chat::notifications::NotificationDeduplicator;
use direct_chat::presence::PresenceTracker;
use direct_chat::services::{
    HistoryService, HttpHistoryService, HttpIdentityService, IdentityService,
};
use direct_chat::stream::MessageStream;
use direct_chat::typing::TypingIndicatorController;

#[tokio::main]
async fn main() {
    env_logger::init();
    if let Err(err) = run().await {
        log::error!("fatal: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error>> {
    let http_url = env_or("CHAT_HTTP_URL", "http://localhost:8080");
    let ws_url = env_or("CHAT_WS_URL", "ws://localhost:8080/chat");
    let credentials = Credentials {
        username: std::env::var("CHAT_USERNAME")?,
        password: std::env::var("CHAT_PASSWORD")?,
    };

    let identity = HttpIdentityService::new(&http_url);
    let token = identity.login(&credentials).await?;
    let profile = identity.get_profile(&token).await?;
    log::info!("logged in as {} ({})", profile.username, profile.user_id);

    let session = Session {
        token: token.clone(),
        self_id: profile.user_id,
        self_username: profile.username,
    };
    let history: Arc<dyn HistoryService> = Arc::new(HttpHistoryService::new(&http_url, &token));

    let connection = ConnectionManager::new(ws_url);
    connection.connect(&session).await?;

    let (changes_tx, changes_rx) = mpsc::unbounded_channel();
    let presence = PresenceTracker::new(connection.clone(), &session.self_id, changes_tx);
    let notifications = NotificationDeduplicator::new();
    let typing = TypingIndicatorController::new(connection.clone());
    let stream = MessageStream::new(connection.clone(), Arc::clone(&history), session.clone());

    presence.attach().await;
    typing.attach().await;
    stream.attach().await;
    notifications.watch_presence(changes_rx).await;

    spawn_message_printer(&connection, stream.clone()).await;

    println!("commands: /online, /recent, /select <id>, /quit, anything else sends");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        if line == "/online" {
            for user in presence.online_users().await {
                println!("  {} ({})", user.username, user.id);
            }
            continue;
        }
        if line == "/recent" {
            match history.recent_conversations().await {
                Ok(conversations) => {
                    for convo in conversations {
                        println!(
                            "  {} [{} unread]: {}",
                            convo.partner_username, convo.unread_count, convo.last_message
                        );
                    }
                }
                Err(err) => log::warn!("recent conversations unavailable: {err}"),
            }
            continue;
        }
        if let Some(peer_id) = line.strip_prefix("/select ") {
            let peer = presence
                .online_users()
                .await
                .into_iter()
                .find(|user| user.id == peer_id);
            let Some(peer) = peer else {
                println!("no online user with id {peer_id}");
                continue;
            };
            typing.set_active_peer(Some(peer.id.clone())).await;
            match stream.select_peer(peer.clone()).await {
                Ok(()) => {
                    println!("--- conversation with {} ---", peer.username);
                    for message in stream.view().await {
                        print_message(&message);
                    }
                }
                Err(err) => log::warn!("could not load history for {}: {err}", peer.username),
            }
            continue;
        }

        typing.input_changed(&line).await;
        match stream.send_message(&line).await {
            Ok(()) => typing.message_sent().await,
            Err(err) => println!("not sent: {err}"),
        }
    }

    presence.shutdown().await;
    typing.shutdown().await;
    stream.shutdown().await;
    notifications.shutdown().await;
    connection.logout().await;
    Ok(())
}

async fn spawn_message_printer(connection: &ConnectionManager, stream: MessageStream) {
    let mut received = connection.subscribe(EventKind::MessageReceived).await;
    let mut acked = connection.subscribe(EventKind::MessageSentAck).await;
    tokio::spawn(async move {
        loop {
            // Labels come from the stream so live messages for the
            // selected peer print with the same names the view holds.
            tokio::select! {
                Some(event) = received.receiver.recv() => {
                    if let ServerEvent::MessageReceived(message) = event {
                        print_message(&stream.with_labels(message).await);
                    }
                }
                Some(event) = acked.receiver.recv() => {
                    if let ServerEvent::MessageSentAck(message) = event {
                        print_message(&stream.with_labels(message).await);
                    }
                }
                else => break,
            }
        }
    });
}

fn print_message(message: &Message) {
    let time = chrono::DateTime::parse_from_rfc3339(&message.created_at)
        .map(|t| t.format("%H:%M").to_string())
        .unwrap_or_else(|_| message.created_at.clone());
    let sender = if message.sender_username.is_empty() {
        &message.sender_id
    } else {
        &message.sender_username
    };
    println!("[{time}] {sender}: {}", message.content);
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}
