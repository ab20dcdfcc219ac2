//! Client side: the HTTP calls, the channel stream, and a background task
//! that keeps an access token fresh.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tungstenite::client::IntoClientRequest;
use tungstenite::http::HeaderValue;
use tungstenite::protocol::Message as WsMessage;

use crate::auth::{Credentials, LoginResponse};
use crate::channels::{AddChannelRequest, AddChannelResponse, ListChannelsResponse};
use crate::error::{Code, RpcError};
use crate::gate::AUTHORIZATION;
use crate::models::{ChannelStreamRequest, ChannelSummary, StreamFrame, StreamStatus};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("malformed frame: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("access token cannot be sent as a header")]
    InvalidToken,
}

impl ClientError {
    /// The server's status code, when the server answered with one.
    pub fn code(&self) -> Option<Code> {
        match self {
            ClientError::Rpc(e) => Some(e.code),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Where the Rocket routes live, e.g. `http://127.0.0.1:8000`.
    pub base_url: String,
    /// The channel stream endpoint, e.g. `ws://127.0.0.1:34093`.
    pub stream_url: String,
    pub username: String,
    pub password: String,
    pub refresh_interval: Duration,
    pub retry_backoff: Duration,
}

impl ClientConfig {
    pub fn new(
        base_url: impl Into<String>,
        stream_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            stream_url: stream_url.into(),
            username: username.into(),
            password: password.into(),
            refresh_interval: Duration::from_secs(30),
            retry_backoff: Duration::from_secs(1),
        }
    }
}

/// Anything that can trade credentials for an access token.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> Result<String, ClientError>;
}

/// Turns non-2xx answers into the server's `{code, message}` error.
async fn check(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match response.json::<StreamStatus>().await {
        Ok(body) => Err(RpcError::new(body.code, body.message).into()),
        Err(_) => Err(RpcError::new(Code::Internal, format!("unexpected HTTP status {status}")).into()),
    }
}

#[derive(Clone)]
pub struct AuthClient {
    http: reqwest::Client,
    base_url: String,
}

impl AuthClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<reqwest::Response, ClientError> {
        let response = self.http.post(self.url(path)).json(body).send().await?;
        check(response).await
    }

    pub async fn create_user(&self, username: &str, password: &str) -> Result<(), ClientError> {
        let credentials = Credentials {
            username: username.to_owned(),
            password: password.to_owned(),
        };
        self.post("/auth/users", &credentials).await?;
        Ok(())
    }

    pub async fn logout(&self) -> Result<(), ClientError> {
        let response = self.http.post(self.url("/auth/logout")).send().await?;
        check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl Authenticator for AuthClient {
    async fn login(&self, username: &str, password: &str) -> Result<String, ClientError> {
        let credentials = Credentials {
            username: username.to_owned(),
            password: password.to_owned(),
        };
        let response: LoginResponse = self.post("/auth/login", &credentials).await?.json().await?;
        Ok(response.access_token)
    }
}

/// Logs in once up front, then keeps re-logging in on a timer.
///
/// A failed refresh is retried after `retry_backoff` instead of the full
/// interval; the interval is back in force after the next success.
pub struct TokenRefresher {
    token: watch::Receiver<String>,
    stop: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl TokenRefresher {
    pub async fn start(
        auth: Arc<dyn Authenticator>,
        username: impl Into<String>,
        password: impl Into<String>,
        interval: Duration,
        retry_backoff: Duration,
    ) -> Result<Self, ClientError> {
        let username = username.into();
        let password = password.into();

        let initial = auth.login(&username, &password).await?;
        info!("{} logged in", username);

        let (tx, token) = watch::channel(initial);
        let stop = CancellationToken::new();
        let task = tokio::spawn(refresh_loop(
            auth,
            username,
            password,
            interval,
            retry_backoff,
            tx,
            stop.clone(),
        ));

        Ok(Self {
            token,
            stop,
            task: Some(task),
        })
    }

    /// The most recent token.
    pub fn token(&self) -> String {
        self.token.borrow().clone()
    }

    /// Watches token replacements.
    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.token.clone()
    }

    /// Stops the background task and waits for it to finish.
    pub async fn stop(mut self) {
        self.stop.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TokenRefresher {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn refresh_loop(
    auth: Arc<dyn Authenticator>,
    username: String,
    password: String,
    interval: Duration,
    retry_backoff: Duration,
    tx: watch::Sender<String>,
    stop: CancellationToken,
) {
    let mut wait = interval;
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        let result = tokio::select! {
            _ = stop.cancelled() => break,
            result = auth.login(&username, &password) => result,
        };
        match result {
            Ok(token) => {
                tx.send_replace(token);
                debug!("access token for {} refreshed", username);
                wait = interval;
            }
            Err(e) => {
                warn!(
                    "Could not refresh token for {}, retrying in {:?}: {}",
                    username, retry_backoff, e
                );
                wait = retry_backoff;
            }
        }
    }
    debug!("token refresher for {} stopped", username);
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One open channel stream.
pub struct ChannelSubscription {
    sender: SplitSink<WsStream, WsMessage>,
    receiver: SplitStream<WsStream>,
}

impl ChannelSubscription {
    /// Opens a stream authenticated with `token`.
    pub async fn open(stream_url: &str, token: &str) -> Result<Self, ClientError> {
        let mut request = stream_url.into_client_request()?;
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| ClientError::InvalidToken)?;
        request.headers_mut().insert(AUTHORIZATION, value);

        let ws_stream = match connect_async(request).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(tungstenite::Error::Http(response)) => {
                let refused = response
                    .body()
                    .as_deref()
                    .and_then(|body| serde_json::from_slice::<StreamStatus>(body).ok());
                return Err(match refused {
                    Some(status) => RpcError::new(status.code, status.message).into(),
                    None => RpcError::new(
                        Code::Unavailable,
                        format!("stream refused with HTTP {}", response.status()),
                    )
                    .into(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let (sender, receiver) = ws_stream.split();
        Ok(Self { sender, receiver })
    }

    pub async fn send(&mut self, request: &ChannelStreamRequest) -> Result<(), ClientError> {
        let text = serde_json::to_string(request)?;
        self.sender.send(WsMessage::text(text)).await?;
        Ok(())
    }

    pub async fn say(&mut self, channel_id: u64, content: &str) -> Result<(), ClientError> {
        self.send(&ChannelStreamRequest::new_message(channel_id, content))
            .await
    }

    /// The next frame, or `None` once the server has closed the stream.
    pub async fn next_frame(&mut self) -> Result<Option<StreamFrame>, ClientError> {
        while let Some(msg) = self.receiver.next().await {
            match msg? {
                WsMessage::Text(text) => return Ok(Some(serde_json::from_str(text.as_str())?)),
                WsMessage::Binary(bytes) => return Ok(Some(serde_json::from_slice(&bytes)?)),
                WsMessage::Close(_) => return Ok(None),
                _ => continue,
            }
        }
        Ok(None)
    }

    pub async fn close(mut self) -> Result<(), ClientError> {
        self.sender.close().await?;
        Ok(())
    }
}

/// Authenticated access to the chat routes and channel streams.
pub struct ChatClient {
    auth: AuthClient,
    config: ClientConfig,
    tokens: TokenRefresher,
}

impl ChatClient {
    /// Logs in with `config`'s credentials and starts refreshing the token.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let auth = AuthClient::new(config.base_url.clone());
        let tokens = TokenRefresher::start(
            Arc::new(auth.clone()),
            config.username.clone(),
            config.password.clone(),
            config.refresh_interval,
            config.retry_backoff,
        )
        .await?;
        Ok(Self {
            auth,
            config,
            tokens,
        })
    }

    pub fn token(&self) -> String {
        self.tokens.token()
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.bearer_auth(self.tokens.token())
    }

    pub async fn add_channel(&self, name: &str, is_public: bool) -> Result<u64, ClientError> {
        let body = AddChannelRequest {
            name: name.to_owned(),
            is_public,
        };
        let request = self.auth.http.post(self.auth.url("/chat/channels")).json(&body);
        let response: AddChannelResponse = check(self.authorized(request).send().await?)
            .await?
            .json()
            .await?;
        Ok(response.channel_id)
    }

    pub async fn remove_channel(&self, channel_id: u64) -> Result<(), ClientError> {
        let request = self
            .auth
            .http
            .delete(self.auth.url(&format!("/chat/channels/{channel_id}")));
        check(self.authorized(request).send().await?).await?;
        Ok(())
    }

    pub async fn list_channels(&self) -> Result<Vec<ChannelSummary>, ClientError> {
        let request = self.auth.http.get(self.auth.url("/chat/channels"));
        let response: ListChannelsResponse = check(self.authorized(request).send().await?)
            .await?
            .json()
            .await?;
        Ok(response.channels)
    }

    /// Opens a channel stream. It binds to a channel with the first request sent.
    pub async fn open_stream(&self) -> Result<ChannelSubscription, ClientError> {
        ChannelSubscription::open(&self.config.stream_url, &self.tokens.token()).await
    }

    pub async fn shutdown(self) {
        self.tokens.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Hands out scripted login results, then repeats the last success.
    struct Scripted {
        calls: AtomicUsize,
        script: Mutex<VecDeque<Result<String, Code>>>,
    }

    impl Scripted {
        fn new(script: impl IntoIterator<Item = Result<&'static str, Code>>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                script: Mutex::new(
                    script
                        .into_iter()
                        .map(|r| r.map(str::to_owned))
                        .collect(),
                ),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Authenticator for Scripted {
        async fn login(&self, _username: &str, _password: &str) -> Result<String, ClientError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Ok(token)) => Ok(token),
                Some(Err(code)) => Err(RpcError::new(code, "login failed").into()),
                None => Ok(format!("token-{n}")),
            }
        }
    }

    async fn start(auth: Arc<Scripted>) -> Result<TokenRefresher, ClientError> {
        TokenRefresher::start(
            auth,
            "alice",
            "pw1",
            Duration::from_secs(30),
            Duration::from_secs(1),
        )
        .await
    }

    #[tokio::test(start_paused = true)]
    async fn failed_initial_login_fails_construction() {
        let auth = Scripted::new([Err(Code::NotFound)]);
        let err = start(auth.clone()).await.err().unwrap();
        assert_eq!(err.code(), Some(Code::NotFound));
        assert_eq!(auth.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn token_is_replaced_every_interval() {
        let auth = Scripted::new([Ok("first"), Ok("second")]);
        let refresher = start(auth.clone()).await.unwrap();
        assert_eq!(refresher.token(), "first");

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(refresher.token(), "first");

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(refresher.token(), "second");
        assert_eq!(auth.calls(), 2);
        refresher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failure_retries_after_short_backoff() {
        let auth = Scripted::new([Ok("first"), Err(Code::Unavailable), Ok("third")]);
        let refresher = start(auth.clone()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30_500)).await;
        assert_eq!(refresher.token(), "first");
        assert_eq!(auth.calls(), 2);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(refresher.token(), "third");
        assert_eq!(auth.calls(), 3);

        // Back on the full interval after a success.
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(auth.calls(), 3);
        refresher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_the_loop() {
        let auth = Scripted::new([Ok("first")]);
        let refresher = start(auth.clone()).await.unwrap();
        let mut updates = refresher.subscribe();

        refresher.stop().await;
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(auth.calls(), 1);
        assert!(updates.changed().await.is_err());
    }
}
