//! The per-channel actor.
//!
//! Each live channel is owned by exactly one task. Stream bridges talk to it
//! only through a bounded FIFO queue, so channel state needs no lock: every
//! mutation happens inside [`ChannelActor::run`], one command at a time.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::Code;
use crate::models::{
    ChannelEvent, ChannelStreamRequest, ConfigMessage, Permission, RequestMessage, Role,
    UserMessage, UserResponse,
};
use crate::permissions::PermissionTable;
use crate::registry::RegistryError;
use crate::user::UserStore;
use crate::utils::{new_message_id, now_millis};

pub(crate) enum Command {
    Subscribe {
        username: String,
        conn_id: Uuid,
        tx: mpsc::Sender<ChannelEvent>,
        reply: oneshot::Sender<Role>,
    },
    Unsubscribe {
        username: String,
        conn_id: Uuid,
    },
    Message(ChannelStreamRequest),
    Snapshot(oneshot::Sender<ChannelSnapshot>),
}

/// Owned copy of a channel's state, taken through the actor's own queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSnapshot {
    pub id: u64,
    pub name: String,
    pub is_public: bool,
    pub pinned_message_id: u64,
    pub members: HashMap<String, Role>,
    pub live_subscribers: Vec<String>,
    pub permissions: PermissionTable,
}

impl ChannelSnapshot {
    pub fn role_of(&self, username: &str) -> Option<Role> {
        self.members.get(username).copied()
    }
}

/// Cheap, cloneable address of a running channel actor.
#[derive(Clone)]
pub struct ChannelHandle {
    id: u64,
    tx: mpsc::Sender<Command>,
    stop: CancellationToken,
}

impl ChannelHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Registers `username` as a live subscriber, joining it as a member
    /// first if needed. Returns the caller's role and its event receiver.
    pub async fn subscribe(
        &self,
        username: &str,
        conn_id: Uuid,
        buffer: usize,
    ) -> Result<(Role, mpsc::Receiver<ChannelEvent>), RegistryError> {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let (reply, role) = oneshot::channel();
        self.command(Command::Subscribe {
            username: username.to_owned(),
            conn_id,
            tx,
            reply,
        })
        .await?;
        let role = role.await.map_err(|_| RegistryError::Stopped(self.id))?;
        Ok((role, rx))
    }

    /// Drops the live registration made by `conn_id`. Membership is kept.
    pub async fn unsubscribe(&self, username: &str, conn_id: Uuid) {
        let _ = self
            .command(Command::Unsubscribe {
                username: username.to_owned(),
                conn_id,
            })
            .await;
    }

    /// Queues one request. Waits while the queue is full.
    pub async fn send(&self, request: ChannelStreamRequest) -> Result<(), RegistryError> {
        self.command(Command::Message(request)).await
    }

    pub async fn snapshot(&self) -> Result<ChannelSnapshot, RegistryError> {
        let (reply, snapshot) = oneshot::channel();
        self.command(Command::Snapshot(reply)).await?;
        snapshot.await.map_err(|_| RegistryError::Stopped(self.id))
    }

    /// Stops the actor. Whatever is still queued is discarded.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Resolves once the actor has finished and released its queue.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled() || self.tx.is_closed()
    }

    async fn command(&self, command: Command) -> Result<(), RegistryError> {
        if self.stop.is_cancelled() {
            return Err(RegistryError::Stopped(self.id));
        }
        self.tx
            .send(command)
            .await
            .map_err(|_| RegistryError::Stopped(self.id))
    }
}

struct Subscriber {
    conn_id: Uuid,
    tx: mpsc::Sender<ChannelEvent>,
}

/// What processing one request produced.
enum Outcome {
    Broadcast(ChannelEvent),
    Reply(ChannelEvent),
}

fn rejected(code: Code, message: String) -> Outcome {
    Outcome::Reply(ChannelEvent::Rejected { code, message })
}

pub struct ChannelActor {
    id: u64,
    name: String,
    is_public: bool,
    pinned_message_id: u64,
    members: HashMap<String, Role>,
    live: HashMap<String, Subscriber>,
    permissions: PermissionTable,
    users: Arc<UserStore>,
    rx: mpsc::Receiver<Command>,
    stop: CancellationToken,
}

impl ChannelActor {
    /// Starts a channel with `creator` as its superadmin.
    pub fn spawn(
        id: u64,
        name: &str,
        is_public: bool,
        creator: &str,
        users: Arc<UserStore>,
        queue: usize,
    ) -> ChannelHandle {
        let (tx, rx) = mpsc::channel(queue.max(1));
        let stop = CancellationToken::new();

        let actor = ChannelActor {
            id,
            name: name.to_owned(),
            is_public,
            pinned_message_id: 0,
            members: HashMap::from([(creator.to_owned(), Role::Superadmin)]),
            live: HashMap::new(),
            permissions: PermissionTable::default(),
            users,
            rx,
            stop: stop.clone(),
        };
        tokio::spawn(actor.run());

        ChannelHandle { id, tx, stop }
    }

    /// Owns this channel's entries in the user store's role mirror: they are
    /// written here and cleared before the actor finishes.
    async fn run(mut self) {
        for (username, role) in &self.members {
            self.users.set_channel_role(username, self.id, *role).await;
        }
        debug!("channel {} ({}) listening", self.id, self.name);
        loop {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                command = self.rx.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
            }
        }

        self.users.forget_channel(self.id).await;
        self.rx.close();
        let discarded = std::iter::from_fn(|| self.rx.try_recv().ok()).count();
        info!(
            "channel {} ({}) stopped, {} queued command(s) discarded",
            self.id, self.name, discarded
        );
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Subscribe {
                username,
                conn_id,
                tx,
                reply,
            } => {
                let role = self.join(&username).await;
                if self
                    .live
                    .insert(username.clone(), Subscriber { conn_id, tx })
                    .is_some()
                {
                    debug!("channel {}: {} replaced an older stream", self.id, username);
                }
                info!("channel {}: {} subscribed as {}", self.id, username, role);
                let _ = reply.send(role);
            }
            Command::Unsubscribe { username, conn_id } => {
                if self.live.get(&username).is_some_and(|s| s.conn_id == conn_id) {
                    self.live.remove(&username);
                    info!("channel {}: {} unsubscribed", self.id, username);
                }
            }
            Command::Message(request) => {
                let sender = request.username.clone();
                debug!("channel {}: processing {:?}", self.id, request.msg);
                match self.apply(&sender, request.msg).await {
                    Outcome::Broadcast(event) => self.broadcast(event),
                    Outcome::Reply(event) => self.reply(&sender, event),
                }
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    async fn join(&mut self, username: &str) -> Role {
        if let Some(role) = self.members.get(username) {
            return *role;
        }
        self.members.insert(username.to_owned(), Role::Member);
        self.users
            .set_channel_role(username, self.id, Role::Member)
            .await;
        Role::Member
    }

    fn role_of(&self, username: &str) -> Role {
        self.members.get(username).copied().unwrap_or(Role::Unknown)
    }

    fn denied(&self, sender: &str, permission: Permission) -> Outcome {
        warn!(
            "channel {}: {} lacks {} permission",
            self.id, sender, permission
        );
        rejected(
            Code::PermissionDenied,
            format!(
                "user '{}' lacks the {} permission in channel {}",
                sender, permission, self.name
            ),
        )
    }

    async fn apply(&mut self, sender: &str, msg: RequestMessage) -> Outcome {
        let role = self.role_of(sender);

        match msg {
            RequestMessage::User(UserMessage::New { content }) => {
                if !self.permissions.allows(role, Permission::Write) {
                    return self.denied(sender, Permission::Write);
                }
                Outcome::Broadcast(ChannelEvent::User {
                    message_id: new_message_id(),
                    username: sender.to_owned(),
                    msg: UserResponse::NewAndUpdate {
                        timestamp: now_millis(),
                        content,
                    },
                })
            }
            RequestMessage::User(UserMessage::Edit { .. }) => rejected(
                Code::Unimplemented,
                "message editing needs persistent storage, which is not implemented".into(),
            ),
            RequestMessage::User(UserMessage::Delete { .. }) => rejected(
                Code::Unimplemented,
                "message deletion needs persistent storage, which is not implemented".into(),
            ),
            RequestMessage::Config(config) => self.configure(sender, role, config).await,
        }
    }

    async fn configure(&mut self, sender: &str, role: Role, config: ConfigMessage) -> Outcome {
        let required = match config {
            ConfigMessage::ChangeRole { .. } => Permission::AssignRole,
            ConfigMessage::RenameChannel { .. }
            | ConfigMessage::PinMessage { .. }
            | ConfigMessage::SetPermission { .. } => Permission::Modify,
        };
        if !self.permissions.allows(role, required) {
            return self.denied(sender, required);
        }

        match &config {
            ConfigMessage::RenameChannel { new_name } => {
                if new_name.trim().is_empty() {
                    return rejected(
                        Code::InvalidArgument,
                        "channel name cannot be empty".into(),
                    );
                }
                info!("channel {}: renamed {} -> {}", self.id, self.name, new_name);
                self.name = new_name.clone();
            }
            ConfigMessage::ChangeRole {
                username,
                role: new_role,
            } => {
                let Some(current) = self.members.get_mut(username) else {
                    return rejected(
                        Code::NotFound,
                        format!("user '{}' is not in the channel {}", username, self.name),
                    );
                };
                *current = *new_role;
                self.users
                    .set_channel_role(username, self.id, *new_role)
                    .await;
                info!("channel {}: {} is now {}", self.id, username, new_role);
            }
            ConfigMessage::PinMessage { message_id } => {
                self.pinned_message_id = *message_id;
            }
            ConfigMessage::SetPermission { permission, roles } => {
                self.permissions.set(*permission, roles.iter().copied());
            }
        }

        Outcome::Broadcast(ChannelEvent::Config {
            username: sender.to_owned(),
            msg: config,
        })
    }

    /// Best-effort fan-out. A subscriber whose buffer is full or whose stream
    /// is gone is dropped from the live set; nobody else is affected.
    fn broadcast(&mut self, event: ChannelEvent) {
        let mut failed = Vec::new();
        for (username, subscriber) in &self.live {
            let role = self.members.get(username).copied().unwrap_or(Role::Unknown);
            if !self.permissions.allows(role, Permission::Read) {
                continue;
            }
            if let Err(e) = subscriber.tx.try_send(event.clone()) {
                warn!(
                    "Could not send message to {} in channel {}: {}",
                    username, self.name, e
                );
                failed.push(username.clone());
            }
        }
        for username in failed {
            self.live.remove(&username);
        }
    }

    fn reply(&mut self, sender: &str, event: ChannelEvent) {
        let Some(subscriber) = self.live.get(sender) else {
            debug!("channel {}: {} is not streaming, reply dropped", self.id, sender);
            return;
        };
        if let Err(e) = subscriber.tx.try_send(event) {
            warn!("Could not reply to {} in channel {}: {}", sender, self.name, e);
            self.live.remove(sender);
        }
    }

    fn snapshot(&self) -> ChannelSnapshot {
        let mut live_subscribers: Vec<String> = self.live.keys().cloned().collect();
        live_subscribers.sort();
        ChannelSnapshot {
            id: self.id,
            name: self.name.clone(),
            is_public: self.is_public,
            pinned_message_id: self.pinned_message_id,
            members: self.members.clone(),
            live_subscribers,
            permissions: self.permissions.clone(),
        }
    }
}
