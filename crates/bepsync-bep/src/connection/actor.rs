//! The connection actor: one task per peer connection.
//!
//! ## Lifecycle
//!
//! ```text
//! Connecting -> Authenticating -> ExchangingClusterConfig -> Active -> Closing -> Closed
//! ```
//!
//! Entry opens the transport, exchanges Hellos, checks the peer certificate
//! against the expected device and exchanges ClusterConfigs. Once active the
//! actor runs a receive loop and a keep-alive loop as sub-tasks while its
//! control loop serves [`ConnectionHandle`] actions. Any failure, a peer
//! Close, a local close or dropping every handle ends in the same teardown.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, timeout, Instant};
use tracing::{debug, info, trace, warn};

use bepsync_core::DeviceId;

use crate::config::{Configuration, ConnectionConfig};
use crate::connection::cluster_config::{
    build_cluster_config, handle_received_cluster_config, ClusterConfigInfo,
};
use crate::connection::hello::{build_hello, process_hello};
use crate::connection::wire::Wire;
use crate::error::{BepError, Result};
use crate::index::IndexHandler;
use crate::messages::{Close, ErrorCode, Index, IndexUpdate, Message, Request, Response};
use crate::transport::{AuthenticatedStream, Connector};

/// Handles wait for the actor to take each action.
const ACTION_CAPACITY: usize = 1;

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticating,
    ExchangingClusterConfig,
    Active,
    Closing,
    Closed,
}

/// Answers block requests from the peer.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, peer: DeviceId, request: Request) -> Response;
}

/// Refuses every request. For peers that only exchange indexes.
#[derive(Debug, Default, Clone, Copy)]
pub struct RejectingRequestHandler;

#[async_trait]
impl RequestHandler for RejectingRequestHandler {
    async fn handle(&self, peer: DeviceId, request: Request) -> Response {
        debug!(peer = %peer, folder = %request.folder, name = %request.name, "rejecting request");
        Response::error(request.id, ErrorCode::InvalidFile)
    }
}

enum ConnectionAction {
    SendRequest {
        request: Request,
        reply: oneshot::Sender<Result<Response>>,
    },
    SendIndexUpdate {
        update: IndexUpdate,
        reply: oneshot::Sender<Result<()>>,
    },
    ConfirmIsConnected {
        reply: oneshot::Sender<Result<ClusterConfigInfo>>,
    },
    Close {
        reason: String,
        reply: oneshot::Sender<()>,
    },
}

/// Reports from sub-tasks to the control loop.
enum ActorEvent {
    Response(Response),
    Request(Request),
    RequestSendFailed { id: i32, error: BepError },
}

enum Exit {
    Local {
        reason: String,
        reply: Option<oneshot::Sender<()>>,
    },
    PeerClosed,
    Failed(BepError),
}

/// Cloneable handle to a running connection. The actor shuts down once every
/// handle is dropped.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    device: DeviceId,
    actions: mpsc::Sender<ConnectionAction>,
    state: watch::Receiver<ConnectionState>,
}

impl ConnectionHandle {
    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Wait until the connection reached [`ConnectionState::Closed`].
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        let _ = state.wait_for(|s| *s == ConnectionState::Closed).await;
    }

    async fn submit<T>(
        &self,
        action: impl FnOnce(oneshot::Sender<T>) -> ConnectionAction,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.actions
            .send(action(reply))
            .await
            .map_err(|_| BepError::ConnectionClosed)?;
        rx.await.map_err(|_| BepError::Cancelled)
    }

    /// Send a block request and wait for its response. The request id is
    /// assigned by the connection.
    pub async fn send_request(&self, request: Request) -> Result<Response> {
        self.submit(|reply| ConnectionAction::SendRequest { request, reply })
            .await?
    }

    /// Send an IndexUpdate. Resolves once the frame was written.
    pub async fn send_index_update(&self, update: IndexUpdate) -> Result<()> {
        self.submit(|reply| ConnectionAction::SendIndexUpdate { update, reply })
            .await?
    }

    /// Wait for the connection to become active and return what was agreed
    /// during the cluster configuration exchange.
    pub async fn confirm_connected(&self) -> Result<ClusterConfigInfo> {
        self.submit(|reply| ConnectionAction::ConfirmIsConnected { reply })
            .await?
    }

    /// Close the connection and wait for teardown to finish.
    pub async fn close(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let _ = self
            .submit(|reply| ConnectionAction::Close { reason, reply })
            .await;
        self.closed().await;
    }
}

/// Everything a connection needs from the rest of the process.
#[derive(Clone)]
pub struct ConnectionContext {
    pub configuration: Arc<Configuration>,
    pub connection: ConnectionConfig,
    pub connector: Arc<dyn Connector>,
    pub index: IndexHandler,
    pub requests: Arc<dyn RequestHandler>,
}

/// A connection to one expected device at one address.
pub struct ConnectionActor {
    context: ConnectionContext,
    device: DeviceId,
    address: String,
}

impl ConnectionActor {
    pub fn new(context: ConnectionContext, device: DeviceId, address: impl Into<String>) -> Self {
        Self {
            context,
            device,
            address: address.into(),
        }
    }

    /// Start the actor. The join handle resolves with the reason the
    /// connection ended: `Ok` for a local or peer close.
    ///
    /// Cancel with [`ConnectionHandle::close`] or by dropping every handle.
    /// Aborting the join handle skips teardown: no Close is sent and pending
    /// requests fail with [`BepError::Cancelled`] only because their reply
    /// channels are dropped.
    pub fn spawn(self) -> (ConnectionHandle, JoinHandle<Result<()>>) {
        let (actions_tx, actions_rx) = mpsc::channel(ACTION_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let handle = ConnectionHandle {
            device: self.device,
            actions: actions_tx,
            state: state_rx,
        };
        let task = tokio::spawn(self.run(actions_rx, state_tx));
        (handle, task)
    }

    async fn run(
        self,
        mut actions: mpsc::Receiver<ConnectionAction>,
        state: watch::Sender<ConnectionState>,
    ) -> Result<()> {
        let mut deferred = VecDeque::new();
        let mut wire_slot = None;

        let entry = {
            let establish = self.establish(&state, &mut wire_slot);
            tokio::pin!(establish);
            loop {
                tokio::select! {
                    result = &mut establish => break Some(result),
                    action = actions.recv() => match action {
                        Some(action) => deferred.push_back(action),
                        None => break None,
                    },
                }
            }
        };

        let (wire, info) = match entry {
            Some(Ok(established)) => established,
            failed => {
                let error = match failed {
                    Some(Err(e)) => e,
                    _ => BepError::Cancelled,
                };
                warn!(peer = %self.device, address = %self.address, error = %error, "connection setup failed");
                state.send_replace(ConnectionState::Closing);
                if let Some(wire) = wire_slot {
                    let _ = timeout(self.context.connection.close_timeout, wire.shutdown()).await;
                }
                state.send_replace(ConnectionState::Closed);
                return Err(error);
            }
        };

        state.send_replace(ConnectionState::Active);
        info!(
            peer = %self.device,
            address = %self.address,
            shared_folders = info.shared_folder_ids.len(),
            "connection active"
        );

        self.run_active(wire, info, actions, deferred, state).await
    }

    async fn establish(
        &self,
        state: &watch::Sender<ConnectionState>,
        wire_slot: &mut Option<Arc<Wire>>,
    ) -> Result<(Arc<Wire>, ClusterConfigInfo)> {
        let ctx = &self.context;

        state.send_replace(ConnectionState::Connecting);
        let AuthenticatedStream {
            stream,
            peer_certificate,
        } = ctx.connector.connect(&self.address).await?;
        let wire = Arc::new(Wire::new(stream));
        *wire_slot = Some(Arc::clone(&wire));

        state.send_replace(ConnectionState::Authenticating);
        let hello = build_hello(&ctx.configuration, &ctx.connection);
        let (_, peer_hello) = tokio::try_join!(wire.send_hello(&hello), wire.recv_hello())?;

        let actual = DeviceId::from_certificate(&peer_certificate);
        if actual != self.device {
            return Err(BepError::Authentication {
                expected: self.device,
                actual,
            });
        }
        process_hello(&peer_hello)?;

        state.send_replace(ConnectionState::ExchangingClusterConfig);
        let ours =
            build_cluster_config(&ctx.configuration, &ctx.index, self.device, &peer_hello.device_name)
                .await?;
        let ours = Message::ClusterConfig(ours);
        let (_, first) = tokio::try_join!(wire.send(&ours), wire.recv())?;
        let theirs = match first {
            Message::ClusterConfig(cc) => cc,
            other => {
                return Err(BepError::ProtocolViolation(format!(
                    "expected cluster config, got {}",
                    other.kind()
                )))
            }
        };

        let info =
            handle_received_cluster_config(&ctx.configuration, &ctx.index, self.device, &theirs, peer_hello)
                .await?;
        Ok((wire, info))
    }

    async fn run_active(
        self,
        wire: Arc<Wire>,
        info: ClusterConfigInfo,
        mut actions: mpsc::Receiver<ConnectionAction>,
        mut deferred: VecDeque<ConnectionAction>,
        state: watch::Sender<ConnectionState>,
    ) -> Result<()> {
        let ctx = self.context;
        let info = Arc::new(info);
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();

        let mut tasks: JoinSet<Result<()>> = JoinSet::new();
        tasks.spawn(receive_loop(
            Arc::clone(&wire),
            ctx.index.clone(),
            Arc::clone(&info),
            self.device,
            events_tx.clone(),
        ));
        tasks.spawn(keepalive_loop(
            Arc::clone(&wire),
            ctx.connection.keepalive_interval,
        ));

        let mut active = ActiveConnection {
            wire: Arc::clone(&wire),
            info: Arc::clone(&info),
            peer: self.device,
            requests: ctx.requests,
            pending: HashMap::new(),
            next_id: 0,
            workers: JoinSet::new(),
            events: events_tx,
        };

        let mut exit = announce_folders(&wire, &info).await.err().map(Exit::Failed);
        while exit.is_none() {
            match deferred.pop_front() {
                Some(action) => exit = active.handle_action(action),
                None => break,
            }
        }

        let exit = match exit {
            Some(exit) => exit,
            None => loop {
                let next = tokio::select! {
                    biased;
                    Some(event) = events_rx.recv() => active.handle_event(event),
                    action = actions.recv() => match action {
                        Some(action) => active.handle_action(action),
                        None => Some(Exit::Local {
                            reason: "connection dropped".into(),
                            reply: None,
                        }),
                    },
                    Some(joined) = tasks.join_next() => Some(match joined {
                        Ok(Ok(())) => Exit::PeerClosed,
                        Ok(Err(e)) => Exit::Failed(e),
                        Err(e) => Exit::Failed(BepError::Worker(e.to_string())),
                    }),
                    Some(_) = active.workers.join_next() => None,
                };
                if let Some(exit) = next {
                    break exit;
                }
            },
        };

        // Teardown. Close goes out while writers are still alive so it
        // queues behind any frame already being written.
        state.send_replace(ConnectionState::Closing);

        let (result, reason, reply) = match exit {
            Exit::Local { reason, reply } => {
                info!(peer = %self.device, reason = %reason, "closing connection");
                (Ok(()), reason, reply)
            }
            Exit::PeerClosed => {
                wire.mark_disconnected();
                (Ok(()), String::new(), None)
            }
            Exit::Failed(error) => {
                warn!(peer = %self.device, error = %error, "connection failed");
                let reason = error.to_string();
                (Err(error), reason, None)
            }
        };

        if wire.is_connected() {
            let close = Message::Close(Close { reason });
            if timeout(ctx.connection.close_timeout, wire.send(&close)).await.is_err() {
                debug!(peer = %self.device, "close message timed out");
            }
            wire.mark_disconnected();
        }

        tasks.shutdown().await;
        active.workers.shutdown().await;

        for (_, pending) in active.pending.drain() {
            let _ = pending.send(Err(BepError::Cancelled));
        }

        let _ = timeout(ctx.connection.close_timeout, wire.shutdown()).await;
        state.send_replace(ConnectionState::Closed);
        info!(peer = %self.device, "connection closed");

        if let Some(reply) = reply {
            let _ = reply.send(());
        }
        result
    }
}

/// State owned by the control loop of an active connection.
struct ActiveConnection {
    wire: Arc<Wire>,
    info: Arc<ClusterConfigInfo>,
    peer: DeviceId,
    requests: Arc<dyn RequestHandler>,
    pending: HashMap<i32, oneshot::Sender<Result<Response>>>,
    next_id: i32,
    workers: JoinSet<()>,
    events: mpsc::UnboundedSender<ActorEvent>,
}

impl ActiveConnection {
    fn handle_action(&mut self, action: ConnectionAction) -> Option<Exit> {
        match action {
            ConnectionAction::SendRequest { mut request, reply } => {
                let id = self.next_id;
                self.next_id = self.next_id.wrapping_add(1);
                request.id = id;
                self.pending.insert(id, reply);

                let wire = Arc::clone(&self.wire);
                let events = self.events.clone();
                self.workers.spawn(async move {
                    if let Err(error) = wire.send(&Message::Request(request)).await {
                        let _ = events.send(ActorEvent::RequestSendFailed { id, error });
                    }
                });
                None
            }
            ConnectionAction::SendIndexUpdate { update, reply } => {
                let wire = Arc::clone(&self.wire);
                self.workers.spawn(async move {
                    let _ = reply.send(wire.send(&Message::IndexUpdate(update)).await);
                });
                None
            }
            ConnectionAction::ConfirmIsConnected { reply } => {
                let answer = if self.wire.is_connected() {
                    Ok(ClusterConfigInfo::clone(&self.info))
                } else {
                    Err(BepError::ConnectionClosed)
                };
                let _ = reply.send(answer);
                None
            }
            ConnectionAction::Close { reason, reply } => Some(Exit::Local {
                reason,
                reply: Some(reply),
            }),
        }
    }

    fn handle_event(&mut self, event: ActorEvent) -> Option<Exit> {
        match event {
            ActorEvent::Response(response) => match self.pending.remove(&response.id) {
                Some(reply) => {
                    let _ = reply.send(Ok(response));
                    None
                }
                None => Some(Exit::Failed(BepError::ProtocolViolation(format!(
                    "response for unknown request id {}",
                    response.id
                )))),
            },
            ActorEvent::Request(request) => {
                let wire = Arc::clone(&self.wire);
                let requests = Arc::clone(&self.requests);
                let peer = self.peer;
                self.workers.spawn(async move {
                    let id = request.id;
                    let mut response = requests.handle(peer, request).await;
                    response.id = id;
                    if let Err(e) = wire.send(&Message::Response(response)).await {
                        debug!(peer = %peer, id, error = %e, "failed to send response");
                    }
                });
                None
            }
            ActorEvent::RequestSendFailed { id, error } => {
                if let Some(reply) = self.pending.remove(&id) {
                    let _ = reply.send(Err(error));
                }
                None
            }
        }
    }
}

/// Tell the peer we are ready by sending an empty Index for every shared
/// folder.
async fn announce_folders(wire: &Wire, info: &ClusterConfigInfo) -> Result<()> {
    for folder in &info.shared_folder_ids {
        wire.send(&Message::Index(Index {
            folder: folder.clone(),
            files: Vec::new(),
        }))
        .await?;
    }
    Ok(())
}

/// Reads messages until the peer closes or breaks the protocol. Index
/// messages are merged here, in arrival order.
async fn receive_loop(
    wire: Arc<Wire>,
    index: IndexHandler,
    info: Arc<ClusterConfigInfo>,
    peer: DeviceId,
    events: mpsc::UnboundedSender<ActorEvent>,
) -> Result<()> {
    loop {
        let message = wire.recv().await?;
        match message {
            Message::Index(Index { folder, files })
            | Message::IndexUpdate(IndexUpdate { folder, files }) => {
                if !info.has_folder(&folder) {
                    warn!(peer = %peer, folder = %folder, "index for folder not shared, dropping");
                    continue;
                }
                match index.handle_index_message_received(&folder, files, peer).await {
                    Ok(_) => {}
                    Err(BepError::IndexInfoNotFound { device, folder }) => {
                        warn!(peer = %device, folder = %folder, "no index info for peer, dropping index");
                    }
                    Err(e) => return Err(e),
                }
            }
            Message::Response(response) => {
                if events.send(ActorEvent::Response(response)).is_err() {
                    return Ok(());
                }
            }
            Message::Request(request) => {
                if events.send(ActorEvent::Request(request)).is_err() {
                    return Ok(());
                }
            }
            Message::Ping => trace!(peer = %peer, "ping"),
            Message::Close(close) => {
                info!(peer = %peer, reason = %close.reason, "peer closed connection");
                wire.mark_disconnected();
                return Ok(());
            }
            other @ (Message::ClusterConfig(_) | Message::DownloadProgress(_)) => {
                return Err(BepError::ProtocolViolation(format!(
                    "unexpected {} message",
                    other.kind()
                )));
            }
        }
    }
}

/// Pings the peer at a fixed period. Only returns on a write failure.
async fn keepalive_loop(wire: Arc<Wire>, period: Duration) -> Result<()> {
    let mut ticker = interval_at(Instant::now() + period, period);
    loop {
        ticker.tick().await;
        wire.send(&Message::Ping).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Hello;

    fn active(wire: Wire) -> (ActiveConnection, mpsc::UnboundedReceiver<ActorEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let info = ClusterConfigInfo {
            shared_folder_ids: Default::default(),
            new_folders: Vec::new(),
            peer_hello: Hello {
                device_name: "peer".into(),
                client_name: "bepsync".into(),
                client_version: "0.1.0".into(),
            },
        };
        let active = ActiveConnection {
            wire: Arc::new(wire),
            info: Arc::new(info),
            peer: DeviceId::from_bytes([1; 32]),
            requests: Arc::new(RejectingRequestHandler),
            pending: HashMap::new(),
            next_id: 0,
            workers: JoinSet::new(),
            events,
        };
        (active, events_rx)
    }

    #[tokio::test]
    async fn test_failed_request_write_reaches_its_caller() {
        let (local, remote) = tokio::io::duplex(64);
        drop(remote);
        let (mut active, mut events) = active(Wire::new(Box::new(local)));

        let (reply, rx) = oneshot::channel();
        let action = ConnectionAction::SendRequest {
            request: Request::default(),
            reply,
        };
        assert!(active.handle_action(action).is_none());
        assert!(active.pending.contains_key(&0));

        let event = events.recv().await.unwrap();
        assert!(matches!(event, ActorEvent::RequestSendFailed { id: 0, .. }));
        assert!(active.handle_event(event).is_none());
        assert!(active.pending.is_empty());
        assert!(matches!(rx.await.unwrap(), Err(BepError::Io(_))));
    }

    #[tokio::test]
    async fn test_request_ids_are_sequential() {
        let (local, _remote) = tokio::io::duplex(64 * 1024);
        let (mut active, _events) = active(Wire::new(Box::new(local)));

        let mut replies = Vec::new();
        for _ in 0..3 {
            let (reply, rx) = oneshot::channel();
            active.handle_action(ConnectionAction::SendRequest {
                request: Request::default(),
                reply,
            });
            replies.push(rx);
        }
        let mut ids: Vec<i32> = active.pending.keys().copied().collect();
        ids.sort();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(active.next_id, 3);
    }
}
