mod common;

use common::{TestServer, quiet_options, wait_until};
use hubforge_core::message::{CloseMessage, CompletionMessage, InvocationMessage, StreamItemMessage};
use hubforge_core::protocol::handshake::HandshakeResponse;
use hubforge_core::{Error, Hub, HubCallContext, HubMessage, Identity, method};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::time::Duration;

const QUIET: Duration = Duration::from_millis(100);

fn receive(text: &str) -> Option<HubMessage> {
    Some(HubMessage::Invocation(InvocationMessage::fire_and_forget(
        "Receive",
        vec![json!(text)],
    )))
}

#[tokio::test]
async fn test_group_send_reaches_members_only() {
    let server = TestServer::new(quiet_options());
    let (mut a, _) = server.connect(Identity::anonymous()).await;
    let (mut b, _) = server.connect(Identity::anonymous()).await;
    let (mut c, _) = server.connect(Identity::anonymous()).await;

    assert_eq!(a.call("1", "JoinGroup", vec![json!("g1")]).await, CompletionMessage::empty("1"));
    assert_eq!(b.call("1", "JoinGroup", vec![json!("g1")]).await, CompletionMessage::empty("1"));

    let done = c
        .call("1", "SendToGroup", vec![json!("g1"), json!("hello")])
        .await;
    assert_eq!(done, CompletionMessage::empty("1"));

    assert_eq!(a.recv().await, receive("hello"));
    assert_eq!(b.recv().await, receive("hello"));
    a.assert_silent(QUIET).await;
    b.assert_silent(QUIET).await;
    c.assert_silent(QUIET).await;
}

#[tokio::test]
async fn test_echo_completes_once() {
    let server = TestServer::new(quiet_options());
    let (mut x, _) = server.connect(Identity::anonymous()).await;

    x.invoke("1", "Echo", vec![json!("hi")]).await;
    assert_eq!(
        x.recv().await,
        Some(HubMessage::Completion(CompletionMessage::with_result(
            "1",
            json!("hi")
        )))
    );
    x.assert_silent(QUIET).await;
}

#[tokio::test]
async fn test_method_names_ignore_case() {
    let server = TestServer::new(quiet_options());
    let (mut x, _) = server.connect(Identity::anonymous()).await;

    let done = x.call("1", "add", vec![json!(2), json!(40)]).await;
    assert_eq!(done.result, Some(json!(42)));
}

#[tokio::test]
async fn test_cancel_stops_stream_without_error() {
    let server = TestServer::new(quiet_options());
    let (mut y, _) = server.connect(Identity::anonymous()).await;

    y.stream("2", "Gated", vec![]).await;
    assert_eq!(
        y.recv().await,
        Some(HubMessage::StreamItem(StreamItemMessage {
            invocation_id: "2".to_string(),
            item: json!(1),
        }))
    );

    y.cancel("2").await;
    assert_eq!(
        y.recv().await,
        Some(HubMessage::Completion(CompletionMessage::empty("2")))
    );
    y.assert_silent(QUIET).await;
}

#[tokio::test]
async fn test_unknown_method_keeps_connection_active() {
    let server = TestServer::new(quiet_options());
    let (mut x, _) = server.connect(Identity::anonymous()).await;

    let done = x.call("1", "DoesNotExist", vec![]).await;
    assert_eq!(done.error.as_deref(), Some("Unknown hub method 'DoesNotExist'"));
    assert!(done.result.is_none());

    let done = x.call("2", "Echo", vec![json!("still here")]).await;
    assert_eq!(done.result, Some(json!("still here")));
}

#[tokio::test]
async fn test_stream_items_then_completion() {
    let server = TestServer::new(quiet_options());
    let (mut y, _) = server.connect(Identity::anonymous()).await;

    y.stream("s", "Counter", vec![json!(3)]).await;
    for expected in 1..=3 {
        assert_eq!(
            y.recv().await,
            Some(HubMessage::StreamItem(StreamItemMessage {
                invocation_id: "s".to_string(),
                item: json!(expected),
            }))
        );
    }
    assert_eq!(y.completion().await, CompletionMessage::empty("s"));
}

#[tokio::test]
async fn test_stream_error_ends_with_error_completion() {
    let server = TestServer::new(quiet_options());
    let (mut y, _) = server.connect(Identity::anonymous()).await;

    y.stream("s", "Broken", vec![json!(1)]).await;
    assert!(matches!(y.recv().await, Some(HubMessage::StreamItem(_))));
    assert_eq!(
        y.completion().await.error.as_deref(),
        Some("An unexpected error occurred invoking 'Broken' on the server. sensor offline")
    );
}

#[tokio::test]
async fn test_duplicate_stream_id_rejected() {
    let server = TestServer::new(quiet_options());
    let (mut y, _) = server.connect(Identity::anonymous()).await;

    y.stream("dup", "Gated", vec![]).await;
    assert!(matches!(y.recv().await, Some(HubMessage::StreamItem(_))));

    y.stream("dup", "Gated", vec![]).await;
    assert_eq!(
        y.completion().await.error.as_deref(),
        Some("Invocation ID 'dup' is already in use.")
    );

    y.cancel("dup").await;
    assert_eq!(y.completion().await, CompletionMessage::empty("dup"));
}

#[tokio::test]
async fn test_stream_id_reusable_after_cancel() {
    let server = TestServer::new(quiet_options());
    let (mut y, _) = server.connect(Identity::anonymous()).await;

    y.stream("s", "Gated", vec![]).await;
    assert!(matches!(y.recv().await, Some(HubMessage::StreamItem(_))));
    y.cancel("s").await;
    assert_eq!(y.completion().await, CompletionMessage::empty("s"));

    y.stream("s", "Gated", vec![]).await;
    assert_eq!(
        y.recv().await,
        Some(HubMessage::StreamItem(StreamItemMessage {
            invocation_id: "s".to_string(),
            item: json!(1),
        }))
    );
    y.cancel("s").await;
    assert_eq!(y.completion().await, CompletionMessage::empty("s"));
    y.assert_silent(QUIET).await;
}

#[tokio::test]
async fn test_invocation_kind_mismatch() {
    let server = TestServer::new(quiet_options());
    let (mut x, _) = server.connect(Identity::anonymous()).await;

    let done = x.call("1", "Counter", vec![json!(3)]).await;
    assert_eq!(
        done.error.as_deref(),
        Some("The client attempted to invoke the streaming 'Counter' method with a non-streaming invocation.")
    );

    x.stream("2", "Echo", vec![json!("x")]).await;
    assert_eq!(
        x.completion().await.error.as_deref(),
        Some("The client attempted to invoke the non-streaming 'Echo' method with a streaming invocation.")
    );
}

#[tokio::test]
async fn test_fire_and_forget_gets_no_completion() {
    let server = TestServer::new(quiet_options());
    let (mut x, _) = server.connect(Identity::anonymous()).await;

    x.send(HubMessage::Invocation(InvocationMessage::fire_and_forget(
        "Echo",
        vec![json!("quiet")],
    )))
    .await;
    x.assert_silent(QUIET).await;
}

#[tokio::test]
async fn test_errors_hide_details_by_default() {
    let server = TestServer::new(quiet_options());
    let (mut x, _) = server.connect(Identity::anonymous()).await;

    let done = x.call("1", "Fail", vec![]).await;
    assert_eq!(
        done.error.as_deref(),
        Some("An unexpected error occurred invoking 'Fail' on the server.")
    );

    let done = x.call("2", "Reject", vec![]).await;
    assert_eq!(
        done.error.as_deref(),
        Some("An unexpected error occurred invoking 'Reject' on the server. Room is full")
    );

    let done = x.call("3", "Add", vec![json!(1)]).await;
    assert_eq!(
        done.error.as_deref(),
        Some("Failed to invoke 'Add' due to an error on the server.")
    );
}

#[tokio::test]
async fn test_detailed_errors_include_cause() {
    let server = TestServer::new(quiet_options().with_detailed_errors(true));
    let (mut x, _) = server.connect(Identity::anonymous()).await;

    let done = x.call("1", "Fail", vec![]).await;
    assert_eq!(
        done.error.as_deref(),
        Some("An unexpected error occurred invoking 'Fail' on the server. Custom error: database is down")
    );

    let done = x.call("2", "Add", vec![json!(1)]).await;
    let error = done.error.unwrap();
    assert!(error.starts_with("Failed to invoke 'Add' due to an error on the server. "));
    assert!(error.contains("expects 2"));
}

#[tokio::test]
async fn test_method_policy_requires_role() {
    let server = TestServer::new(quiet_options());
    let (mut guest, _) = server.connect(Identity::named("guest")).await;
    let (mut admin, _) = server
        .connect(Identity::named("root").with_role("admin"))
        .await;

    let denied = guest.call("1", "Admin", vec![]).await;
    assert_eq!(
        denied.error.as_deref(),
        Some("Failed to invoke 'Admin' because user is unauthorized")
    );

    assert_eq!(admin.call("1", "Admin", vec![]).await, CompletionMessage::empty("1"));
}

#[tokio::test]
async fn test_send_to_others_skips_caller() {
    let server = TestServer::new(quiet_options());
    let (mut a, _) = server.connect(Identity::anonymous()).await;
    let (mut b, _) = server.connect(Identity::anonymous()).await;

    a.invoke("1", "SendToOthers", vec![json!("psst")]).await;
    assert_eq!(a.completion().await, CompletionMessage::empty("1"));
    assert_eq!(b.recv().await, receive("psst"));
    a.assert_silent(QUIET).await;
}

#[tokio::test]
async fn test_send_to_user_reaches_every_connection() {
    let server = TestServer::new(quiet_options());
    let (mut phone, _) = server.connect(Identity::named("alice")).await;
    let (mut laptop, _) = server.connect(Identity::named("alice")).await;
    let (mut bob, _) = server.connect(Identity::named("bob")).await;

    bob.call("1", "SendToUser", vec![json!("alice"), json!("hey")])
        .await;
    assert_eq!(phone.recv().await, receive("hey"));
    assert_eq!(laptop.recv().await, receive("hey"));
    bob.assert_silent(QUIET).await;
}

#[tokio::test]
async fn test_state_is_shared_with_methods() {
    let server = TestServer::new(quiet_options());
    let (mut x, _) = server.connect(Identity::anonymous()).await;
    let (_y, _) = server.connect(Identity::anonymous()).await;

    let done = x.call("1", "ConnectedCount", vec![]).await;
    assert_eq!(done.result, Some(json!(2)));
}

#[tokio::test]
async fn test_unknown_cancel_is_ignored() {
    let server = TestServer::new(quiet_options());
    let (mut x, _) = server.connect(Identity::anonymous()).await;

    x.cancel("nothing").await;
    let done = x.call("1", "Echo", vec![json!("ok")]).await;
    assert_eq!(done.result, Some(json!("ok")));
}

#[tokio::test]
async fn test_disconnect_unregisters_once() {
    let server = TestServer::new(quiet_options());
    let (mut a, pump) = server.connect(Identity::anonymous()).await;
    let id = a.call("1", "WhoAmI", vec![]).await.result.unwrap();
    let id = id.as_str().unwrap().to_string();
    a.call("2", "JoinGroup", vec![json!("room")]).await;

    assert_eq!(server.connection_count(), 1);
    assert_eq!(server.lifetime.groups().groups_of(&id), vec!["room".to_string()]);

    drop(a);
    pump.await.unwrap();

    assert_eq!(server.connection_count(), 0);
    assert!(server.lifetime.groups().get("room").is_empty());
    assert!(server.lifetime.groups().groups_of(&id).is_empty());
    assert_eq!(server.hooks.disconnected.load(Ordering::SeqCst), 1);
    assert_eq!(*server.hooks.last_error.lock().unwrap(), None);
}

#[tokio::test]
async fn test_client_close_message_is_orderly() {
    let server = TestServer::new(quiet_options());
    let (mut x, pump) = server.connect(Identity::anonymous()).await;

    x.send(HubMessage::Close(CloseMessage::default())).await;
    assert_eq!(x.recv().await, Some(HubMessage::Close(CloseMessage::default())));
    assert!(x.closed().await);
    pump.await.unwrap();
    assert_eq!(server.connection_count(), 0);
}

#[tokio::test]
async fn test_keep_alive_pings_idle_client() {
    let server = TestServer::new(
        quiet_options().with_keep_alive_interval(Some(Duration::from_millis(30))),
    );
    let (mut x, _) = server.connect(Identity::anonymous()).await;

    assert_eq!(x.recv_any().await, Some(HubMessage::Ping));
}

#[tokio::test]
async fn test_silent_client_times_out() {
    let server = TestServer::new(
        quiet_options().with_client_timeout_interval(Some(Duration::from_millis(100))),
    );
    let (mut x, pump) = server.connect(Identity::anonymous()).await;

    assert_eq!(
        x.recv().await,
        Some(HubMessage::Close(CloseMessage {
            error: Some("Connection closed with an error.".to_string()),
            allow_reconnect: false,
        }))
    );
    assert!(x.closed().await);
    pump.await.unwrap();
    assert_eq!(server.connection_count(), 0);
    assert_eq!(
        server.hooks.last_error.lock().unwrap().as_deref(),
        Some("Connection closed with an error.")
    );
}

#[tokio::test]
async fn test_oversized_message_closes_connection() {
    let server = TestServer::new(
        quiet_options()
            .with_maximum_receive_message_size(Some(64))
            .with_detailed_errors(true),
    );
    let (mut x, pump) = server.connect(Identity::anonymous()).await;

    x.invoke("1", "Echo", vec![json!("x".repeat(200))]).await;
    assert_eq!(
        x.recv().await,
        Some(HubMessage::Close(CloseMessage {
            error: Some(
                "Connection closed with an error. The maximum message size of 64B was exceeded."
                    .to_string()
            ),
            allow_reconnect: false,
        }))
    );
    pump.await.unwrap();
}

#[tokio::test]
async fn test_undecodable_message_closes_connection() {
    let server = TestServer::new(quiet_options());
    let (mut x, pump) = server.connect(Identity::anonymous()).await;

    x.send_text("{\"type\":99}\u{1e}").await;
    match x.recv().await {
        Some(HubMessage::Close(close)) => {
            assert_eq!(close.error.as_deref(), Some("Connection closed with an error."))
        }
        other => panic!("expected close, got {:?}", other),
    }
    pump.await.unwrap();
    assert_eq!(server.hooks.disconnected.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_handshake_rejects_unknown_protocol() {
    let server = TestServer::new(quiet_options());
    let (mut x, pump) = server.open(Identity::anonymous());

    assert_eq!(
        x.handshake("messagepack", 1).await,
        Some(HandshakeResponse::error(
            "The protocol 'messagepack' is not supported."
        ))
    );
    assert!(x.closed().await);
    pump.await.unwrap();
    assert_eq!(server.hooks.connected.load(Ordering::SeqCst), 0);
    assert_eq!(server.hooks.disconnected.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_handshake_rejects_newer_version() {
    let server = TestServer::new(quiet_options());
    let (mut x, _) = server.open(Identity::anonymous());

    assert_eq!(
        x.handshake("json", 2).await,
        Some(HandshakeResponse::error(
            "The server does not support version 2 of the 'json' protocol."
        ))
    );
}

#[tokio::test]
async fn test_handshake_times_out() {
    let server = TestServer::new(
        quiet_options().with_handshake_timeout(Duration::from_millis(50)),
    );
    let (mut x, pump) = server.open(Identity::anonymous());

    assert_eq!(
        x.read_handshake().await,
        Some(HandshakeResponse::error("Handshake was canceled."))
    );
    pump.await.unwrap();
    assert_eq!(server.connection_count(), 0);
}

#[tokio::test]
async fn test_malformed_handshake_closes_without_response() {
    let server = TestServer::new(quiet_options());
    let (mut x, pump) = server.open(Identity::anonymous());

    x.send_text("definitely not json\u{1e}").await;
    assert_eq!(x.read_handshake().await, None);
    pump.await.unwrap();
    assert_eq!(server.hooks.connected.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_messages_after_handshake_in_same_frame() {
    let server = TestServer::new(quiet_options());
    let (mut x, _) = server.open(Identity::anonymous());

    x.send_text(concat!(
        "{\"protocol\":\"json\",\"version\":1}\u{1e}",
        "{\"type\":1,\"invocationId\":\"1\",\"target\":\"Echo\",\"arguments\":[\"early\"]}\u{1e}"
    ))
    .await;
    assert_eq!(x.read_handshake().await, Some(HandshakeResponse::ok()));
    assert_eq!(x.completion().await.result, Some(json!("early")));
}

#[tokio::test]
async fn test_connected_hook_failure_closes_connection() {
    let hub = Hub::builder()
        .method("Echo", method(|| async { "unreachable" }))
        .on_connected(|_ctx: HubCallContext| async { Err(Error::hub("not today")) })
        .build()
        .unwrap();
    let server = TestServer::with_hub(hub, quiet_options());
    let (mut x, pump) = server.open(Identity::anonymous());

    assert_eq!(x.handshake("json", 1).await, Some(HandshakeResponse::ok()));
    assert_eq!(
        x.recv().await,
        Some(HubMessage::Close(CloseMessage {
            error: Some("Connection closed with an error.".to_string()),
            allow_reconnect: false,
        }))
    );
    pump.await.unwrap();
    assert_eq!(server.connection_count(), 0);
}

#[tokio::test]
async fn test_one_failing_connection_does_not_affect_another() {
    let server = TestServer::new(quiet_options());
    let (mut healthy, _) = server.connect(Identity::anonymous()).await;
    let (mut broken, pump) = server.connect(Identity::anonymous()).await;

    broken.send_text("garbage\u{1e}").await;
    pump.await.unwrap();
    wait_until(|| server.connection_count() == 1).await;

    let done = healthy.call("1", "Echo", vec![json!("fine")]).await;
    assert_eq!(done.result, Some(json!("fine")));
}
