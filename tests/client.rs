mod common;

use std::time::Duration;

use accord_chat::client::{AuthClient, ChatClient, ClientConfig};
use accord_chat::error::Code;
use accord_chat::models::{ChannelEvent, StreamFrame};
use accord_chat::ws;
use rocket::fairing::AdHoc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

struct Servers {
    base_url: String,
    stream_url: String,
    shutdown: CancellationToken,
}

async fn launch() -> Servers {
    let state = common::state();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let stream_url = format!("ws://{}", listener.local_addr().unwrap());
    let shutdown = CancellationToken::new();
    tokio::spawn(ws::serve(listener, state.clone(), shutdown.clone()));

    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let figment = rocket::Config::figment()
        .merge(("address", "127.0.0.1"))
        .merge(("port", port))
        .merge(("log_level", "off"));

    let (ready_tx, ready_rx) = oneshot::channel();
    let rocket = accord_chat::rocket(state)
        .configure(figment)
        .attach(AdHoc::on_liftoff("ready", move |_| {
            Box::pin(async move {
                let _ = ready_tx.send(());
            })
        }));
    tokio::spawn(rocket.launch());
    timeout(Duration::from_secs(5), ready_rx)
        .await
        .unwrap()
        .unwrap();

    Servers {
        base_url: format!("http://127.0.0.1:{port}"),
        stream_url,
        shutdown,
    }
}

#[tokio::test]
async fn client_round_trip() {
    let servers = launch().await;

    AuthClient::new(servers.base_url.clone())
        .create_user("alice", "pw1")
        .await
        .unwrap();
    let config = ClientConfig::new(
        servers.base_url.clone(),
        servers.stream_url.clone(),
        "alice",
        "pw1",
    );
    let client = ChatClient::connect(config).await.unwrap();

    assert_eq!(client.add_channel("general", true).await.unwrap(), 0);
    assert_eq!(client.add_channel("random", false).await.unwrap(), 1);
    let names: Vec<String> = client
        .list_channels()
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, ["general", "random"]);

    let mut stream = client.open_stream().await.unwrap();
    stream.say(0, "hello").await.unwrap();
    match stream.next_frame().await.unwrap() {
        Some(StreamFrame::Event(ChannelEvent::User { username, .. })) => {
            assert_eq!(username, "alice")
        }
        other => panic!("unexpected frame {other:?}"),
    }

    client.remove_channel(0).await.unwrap();
    match stream.next_frame().await.unwrap() {
        Some(StreamFrame::Status(status)) => assert_eq!(status.code, Code::NotFound),
        other => panic!("unexpected frame {other:?}"),
    }

    let err = client.remove_channel(0).await.unwrap_err();
    assert_eq!(err.code(), Some(Code::InvalidArgument));

    client.shutdown().await;
    servers.shutdown.cancel();
}

#[tokio::test]
async fn bad_credentials_fail_to_connect() {
    let servers = launch().await;
    let auth = AuthClient::new(servers.base_url.clone());
    auth.create_user("bob", "pw").await.unwrap();

    let err = auth.create_user("bob", "pw").await.unwrap_err();
    assert_eq!(err.code(), Some(Code::AlreadyExists));

    let config = ClientConfig::new(servers.base_url.clone(), servers.stream_url.clone(), "bob", "wrong");
    let err = ChatClient::connect(config).await.err().unwrap();
    assert_eq!(err.code(), Some(Code::InvalidArgument));

    let err = auth.logout().await.unwrap_err();
    assert_eq!(err.code(), Some(Code::Unimplemented));
    servers.shutdown.cancel();
}
