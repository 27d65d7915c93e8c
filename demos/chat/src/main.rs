use futures_util::stream::{Stream, StreamExt, iter};
use hubforge::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone)]
struct ChatMessage {
    username: String,
    message: String,
    timestamp: u64,
}

#[derive(Debug, Default)]
struct ChatStats {
    messages: AtomicU64,
}

fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn username(ctx: &HubCallContext) -> String {
    ctx.user_id().unwrap_or("anonymous").to_string()
}

async fn send(
    ctx: HubCallContext,
    Arg(message): Arg<String>,
    State(stats): State<ChatStats>,
) -> Result<()> {
    stats.messages.fetch_add(1, Ordering::Relaxed);
    let msg = ChatMessage {
        username: username(&ctx),
        message,
        timestamp: now(),
    };
    println!("💬 {} says: {}", msg.username, msg.message);
    ctx.clients()
        .all()
        .invoke("ReceiveMessage", vec![serde_json::to_value(&msg)?])
        .await
}

async fn send_to_room(
    ctx: HubCallContext,
    Arg(room): Arg<String>,
    Arg(message): Arg<String>,
) -> Result<()> {
    let msg = ChatMessage {
        username: username(&ctx),
        message,
        timestamp: now(),
    };
    ctx.clients()
        .others_in_group(room.clone())
        .invoke("ReceiveMessage", vec![room.into(), serde_json::to_value(&msg)?])
        .await
}

async fn whisper(
    ctx: HubCallContext,
    Arg(user): Arg<String>,
    Arg(message): Arg<String>,
) -> Result<()> {
    if ctx.user_id() == Some(user.as_str()) {
        return Err(Error::hub("You cannot whisper to yourself"));
    }
    let msg = ChatMessage {
        username: username(&ctx),
        message,
        timestamp: now(),
    };
    ctx.clients()
        .user(user)
        .invoke("ReceiveWhisper", vec![serde_json::to_value(&msg)?])
        .await
}

async fn join_room(ctx: HubCallContext, Arg(room): Arg<String>) -> Result<String> {
    ctx.groups().add_to_group(ctx.connection_id(), &room).await?;
    ctx.clients()
        .group(room.clone())
        .invoke("UserJoined", vec![room.clone().into(), username(&ctx).into()])
        .await?;
    Ok(format!("Joined {}", room))
}

async fn leave_room(ctx: HubCallContext, Arg(room): Arg<String>) -> Result<()> {
    ctx.groups()
        .remove_from_group(ctx.connection_id(), &room)
        .await?;
    ctx.clients()
        .group(room.clone())
        .invoke("UserLeft", vec![room.into(), username(&ctx).into()])
        .await
}

async fn stats(State(stats): State<ChatStats>) -> u64 {
    stats.messages.load(Ordering::Relaxed)
}

fn countdown(Arg(from): Arg<u32>) -> impl Stream<Item = Result<u32>> + Send {
    iter((0..=from).rev()).then(|n| async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        Ok(n)
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let state = AppState::new();
    state.insert(Arc::new(ChatStats::default()));

    let hub = Hub::builder()
        .method("Send", method(send))
        .method("SendToRoom", method(send_to_room))
        .method("Whisper", method(whisper).authorize("authenticated"))
        .method("JoinRoom", method(join_room))
        .method("LeaveRoom", method(leave_room))
        .method("Stats", method(stats))
        .method("Countdown", stream(countdown))
        .on_connected(|ctx: HubCallContext| async move {
            println!("✅ {} joined the chat ({})", username(&ctx), ctx.connection_id());
            ctx.clients()
                .others()
                .invoke("UserConnected", vec![username(&ctx).into()])
                .await
        })
        .on_disconnected(|ctx: HubCallContext, error: Option<String>| async move {
            match error {
                Some(error) => println!("❌ {} dropped: {}", ctx.connection_id(), error),
                None => println!("👋 {} left the chat", ctx.connection_id()),
            }
            ctx.clients()
                .others()
                .invoke("UserDisconnected", vec![username(&ctx).into()])
                .await
        })
        .build()?;

    let handler = HubConnectionHandler::builder(hub)
        .options(HubOptions::new().with_detailed_errors(true))
        .state(state)
        .build();

    let server = HubServer::new(handler).identify(|req| match query_param(req, "user") {
        Some(name) => Identity::named(name),
        None => Identity::anonymous(),
    });

    println!("💬 Chat hub running on ws://127.0.0.1:9000/?user=alice");
    println!("📊 Handshake: {{\"protocol\":\"json\",\"version\":1}}\\x1e");

    server.listen("127.0.0.1:9000").await?;

    Ok(())
}
