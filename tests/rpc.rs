mod common;

use accord_chat::auth::LoginResponse;
use accord_chat::bridge::StreamBridge;
use accord_chat::channels::{AddChannelResponse, ListChannelsResponse};
use accord_chat::error::Code;
use accord_chat::gate::AuthGate;
use accord_chat::models::{ChannelStreamRequest, ChannelSummary, Role, StreamStatus};
use accord_chat::AppState;
use futures_util::{sink, stream};
use rocket::http::{ContentType, Header, Status};
use rocket::local::asynchronous::Client;
use serde_json::json;
use tokio_util::sync::CancellationToken;

async fn client() -> Client {
    Client::tracked(accord_chat::rocket(common::state()))
        .await
        .unwrap()
}

fn bearer(token: &str) -> Header<'static> {
    Header::new("Authorization", format!("Bearer {token}"))
}

async fn register(client: &Client, username: &str, password: &str) -> Status {
    client
        .post("/auth/users")
        .header(ContentType::JSON)
        .body(json!({ "username": username, "password": password }).to_string())
        .dispatch()
        .await
        .status()
}

async fn login(client: &Client, username: &str, password: &str) -> Result<String, StreamStatus> {
    let response = client
        .post("/auth/login")
        .header(ContentType::JSON)
        .body(json!({ "username": username, "password": password }).to_string())
        .dispatch()
        .await;
    if response.status() == Status::Ok {
        Ok(response.into_json::<LoginResponse>().await.unwrap().access_token)
    } else {
        Err(response.into_json::<StreamStatus>().await.unwrap())
    }
}

async fn signed_in(client: &Client, username: &str) -> String {
    assert_eq!(register(client, username, "pw").await, Status::Created);
    login(client, username, "pw").await.unwrap()
}

async fn add_channel(client: &Client, token: &str, name: &str, is_public: bool) -> u64 {
    let response = client
        .post("/chat/channels")
        .header(ContentType::JSON)
        .header(bearer(token))
        .body(json!({ "name": name, "is_public": is_public }).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    response.into_json::<AddChannelResponse>().await.unwrap().channel_id
}

async fn list_channels(client: &Client, token: &str) -> Vec<ChannelSummary> {
    client
        .get("/chat/channels")
        .header(bearer(token))
        .dispatch()
        .await
        .into_json::<ListChannelsResponse>()
        .await
        .unwrap()
        .channels
}

#[rocket::async_test]
async fn end_to_end_scenario() {
    let client = client().await;

    assert_eq!(register(&client, "alice", "pw1").await, Status::Created);
    let token = login(&client, "alice", "pw1").await.unwrap();

    let state = client.rocket().state::<AppState>().unwrap();
    assert_eq!(state.tokens.verify(&token).unwrap().sub, "alice");

    assert_eq!(add_channel(&client, &token, "general", true).await, 0);
    assert_eq!(add_channel(&client, &token, "random", false).await, 1);

    let response = client
        .delete("/chat/channels/0")
        .header(bearer(&token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::NoContent);

    let status = StreamBridge::new(state.registry.clone(), "alice", 8)
        .run(
            stream::iter([Ok(ChannelStreamRequest::new_message(0, "anyone?"))]),
            sink::drain(),
            CancellationToken::new(),
        )
        .await;
    assert_eq!(status.code, Code::InvalidArgument);
}

#[rocket::async_test]
async fn login_failures() {
    let client = client().await;
    assert_eq!(register(&client, "alice", "pw1").await, Status::Created);

    let wrong = login(&client, "alice", "nope").await.unwrap_err();
    assert_eq!(wrong.code, Code::InvalidArgument);

    let unknown = login(&client, "bob", "pw1").await.unwrap_err();
    assert_eq!(unknown.code, Code::NotFound);
}

#[rocket::async_test]
async fn registration_rules() {
    let client = client().await;
    assert_eq!(register(&client, "alice", "pw1").await, Status::Created);
    assert_eq!(register(&client, "alice", "pw2").await, Status::Conflict);
    assert_eq!(register(&client, "", "pw").await, Status::BadRequest);
    assert_eq!(register(&client, "bob", "").await, Status::BadRequest);
}

#[rocket::async_test]
async fn channel_routes_need_a_valid_token() {
    let client = client().await;

    let response = client
        .post("/chat/channels")
        .header(ContentType::JSON)
        .body(json!({ "name": "general", "is_public": true }).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Unauthorized);
    let body = response.into_json::<StreamStatus>().await.unwrap();
    assert_eq!(body.code, Code::Unauthenticated);

    let response = client
        .get("/chat/channels")
        .header(bearer("not-a-token"))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Unauthorized);
}

#[rocket::async_test]
async fn channel_name_is_required() {
    let client = client().await;
    let token = signed_in(&client, "alice").await;

    let response = client
        .post("/chat/channels")
        .header(ContentType::JSON)
        .header(bearer(&token))
        .body(json!({ "name": "   ", "is_public": true }).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::BadRequest);
}

#[rocket::async_test]
async fn only_superadmins_remove_channels() {
    let client = client().await;
    let alice = signed_in(&client, "alice").await;
    let bob = signed_in(&client, "bob").await;
    let id = add_channel(&client, &alice, "general", true).await;

    let response = client
        .delete(format!("/chat/channels/{id}"))
        .header(bearer(&bob))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Forbidden);

    let response = client
        .delete("/chat/channels/42")
        .header(bearer(&alice))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::BadRequest);
    let body = response.into_json::<StreamStatus>().await.unwrap();
    assert_eq!(body.message, "invalid channel ID: 42");

    let response = client
        .delete(format!("/chat/channels/{id}"))
        .header(bearer(&alice))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::NoContent);
}

#[rocket::async_test]
async fn private_channels_are_hidden_from_non_members() {
    let client = client().await;
    let alice = signed_in(&client, "alice").await;
    let bob = signed_in(&client, "bob").await;
    add_channel(&client, &alice, "general", true).await;
    add_channel(&client, &alice, "staff", false).await;

    let for_alice = list_channels(&client, &alice).await;
    assert_eq!(for_alice.len(), 2);
    assert_eq!(for_alice[1].name, "staff");
    assert!(!for_alice[1].is_public);

    let for_bob = list_channels(&client, &bob).await;
    assert_eq!(for_bob.len(), 1);
    assert_eq!(for_bob[0].name, "general");
}

#[rocket::async_test]
async fn logout_is_unimplemented() {
    let client = client().await;
    let response = client.post("/auth/logout").dispatch().await;
    assert_eq!(response.status(), Status::NotImplemented);
    let body = response.into_json::<StreamStatus>().await.unwrap();
    assert_eq!(body.code, Code::Unimplemented);
}

#[rocket::async_test]
async fn malformed_bodies_get_json_errors() {
    let client = client().await;
    let response = client
        .post("/auth/login")
        .header(ContentType::JSON)
        .body("{\"username\":")
        .dispatch()
        .await;
    assert!(matches!(response.status().code, 400 | 422));
    let body = response.into_json::<StreamStatus>().await.unwrap();
    assert_eq!(body.code, Code::InvalidArgument);
}

#[rocket::async_test]
async fn open_gate_takes_identity_from_username_header() {
    let state = common::state();
    let open = AuthGate::new(state.tokens.clone());
    let client = Client::tracked(accord_chat::rocket(state.with_gate(open)))
        .await
        .unwrap();

    let response = client
        .post("/chat/channels")
        .header(ContentType::JSON)
        .header(Header::new("username", "bob"))
        .body(json!({ "name": "general", "is_public": true }).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    let state = client.rocket().state::<AppState>().unwrap();
    let snapshot = state.registry.lookup(0).await.unwrap().snapshot().await.unwrap();
    assert_eq!(snapshot.role_of("bob"), Some(Role::Superadmin));

    let response = client
        .post("/chat/channels")
        .header(ContentType::JSON)
        .body(json!({ "name": "nameless", "is_public": true }).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::BadRequest);
}
