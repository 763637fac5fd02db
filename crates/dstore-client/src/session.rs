//! Live session on top of a negotiated channel
//!
//! Three tasks share the channel:
//! - command dispatch is the only writer and owns the table of commands
//!   waiting for a result
//! - receive is the only reader; it forwards results to dispatch and
//!   updates to notification
//! - update notification fans updates out to subscribers in arrival order
//!
//! All three hang off one root [`CancellationToken`]. A dead channel cancels
//! the root so the roles stop together; an explicit [`Session::disconnect`]
//! stops them one by one instead.

use crate::channel::{read_bounded_bytes, Channel, ChannelReader, ChannelWriter};
use crate::error::SessionError;
use crate::handshake::VersionInfo;
use dstore_config::SessionSettings;
use dstore_protocol::{CommandFrame, InboundFrame, ResultFrame, UpdateFrame, VersionTriple};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Longest inbound session frame; anything larger kills the session.
pub(crate) const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Unsolicited model update pushed by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionUpdate {
    pub source: Option<String>,
    pub data: Value,
}

impl From<UpdateFrame> for SessionUpdate {
    fn from(frame: UpdateFrame) -> Self {
        Self {
            source: frame.source,
            data: frame.data,
        }
    }
}

/// Successful reply to [`Session::command`].
#[derive(Debug, Clone, PartialEq)]
pub struct CommandReply {
    pub id: u64,
    pub data: Value,
}

/// Teardown timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// How long disconnect waits for the server to close after `exit`.
    pub exit_timeout: Duration,
    /// Pause between stopping dispatch and stopping notification.
    pub disconnect_grace: Duration,
}

impl From<&SessionSettings> for SessionOptions {
    fn from(settings: &SessionSettings) -> Self {
        Self {
            exit_timeout: settings.exit_timeout(),
            disconnect_grace: settings.disconnect_grace(),
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from(&SessionSettings::default())
    }
}

type ReplySender = oneshot::Sender<Result<CommandReply, SessionError>>;

enum DispatchMsg {
    Send {
        bytes: Vec<u8>,
        reply: Option<(u64, ReplySender)>,
    },
    Result(ResultFrame),
}

enum UpdateMsg {
    Subscribe(mpsc::UnboundedSender<SessionUpdate>),
    Update(SessionUpdate),
}

struct Flags {
    connected: AtomicBool,
    closing: AtomicBool,
}

struct RoleTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl RoleTask {
    /// Cancel the role and wait for it to finish.
    async fn stop(self, role: &'static str, wait: Duration) {
        self.token.cancel();
        join_within(self.handle, role, wait).await;
    }
}

#[derive(Default)]
struct TaskSet {
    dispatch: Option<RoleTask>,
    notify: Option<RoleTask>,
    receive: Option<RoleTask>,
}

impl TaskSet {
    fn abort_all(self) {
        for task in [self.dispatch, self.notify, self.receive]
            .into_iter()
            .flatten()
        {
            task.token.cancel();
            task.handle.abort();
        }
    }
}

/// Returns false if the task had to be aborted.
async fn join_within(mut handle: JoinHandle<()>, role: &'static str, wait: Duration) -> bool {
    match tokio::time::timeout(wait, &mut handle).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!("{} role ended abnormally: {}", role, e);
            true
        }
        Err(_) => {
            warn!("{} role did not stop within {:?}, aborting", role, wait);
            handle.abort();
            false
        }
    }
}

struct SessionInner {
    peer: String,
    ticket: String,
    versions: VersionInfo,
    options: SessionOptions,
    flags: Arc<Flags>,
    next_id: AtomicU64,
    dispatch_tx: mpsc::UnboundedSender<DispatchMsg>,
    update_tx: mpsc::UnboundedSender<UpdateMsg>,
    root: CancellationToken,
    tasks: Mutex<TaskSet>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

/// Handle to a live session. Clones share the same connection.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Start the session roles on a channel whose handshake succeeded.
    ///
    /// Dispatch starts first, then notification, then receive. If startup
    /// unwinds part way, the roles already spawned are aborted.
    pub fn start(
        channel: Channel,
        ticket: impl Into<String>,
        versions: VersionInfo,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        let runtime = Handle::try_current().map_err(|_| SessionError::NoRuntime)?;
        let (reader, writer, peer) = channel.into_parts();

        let root = CancellationToken::new();
        let flags = Arc::new(Flags {
            connected: AtomicBool::new(true),
            closing: AtomicBool::new(false),
        });
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        let mut tasks = scopeguard::guard(TaskSet::default(), TaskSet::abort_all);

        let token = root.child_token();
        let dispatcher = Dispatcher {
            writer,
            rx: dispatch_rx,
            pending: HashMap::new(),
            peer: peer.clone(),
            flags: flags.clone(),
            root: root.clone(),
            token: token.clone(),
        };
        tasks.dispatch = Some(RoleTask {
            token,
            handle: runtime.spawn(dispatcher.run()),
        });

        let token = root.child_token();
        let notifier = Notifier {
            rx: update_rx,
            subscribers: Vec::new(),
            token: token.clone(),
        };
        tasks.notify = Some(RoleTask {
            token,
            handle: runtime.spawn(notifier.run()),
        });

        let token = root.child_token();
        let receiver = Receiver {
            reader,
            dispatch_tx: dispatch_tx.clone(),
            update_tx: update_tx.clone(),
            peer: peer.clone(),
            flags: flags.clone(),
            root: root.clone(),
            token: token.clone(),
        };
        tasks.receive = Some(RoleTask {
            token,
            handle: runtime.spawn(receiver.run()),
        });

        let tasks = scopeguard::ScopeGuard::into_inner(tasks);
        info!("Session with {} started", peer);

        Ok(Self {
            inner: Arc::new(SessionInner {
                peer,
                ticket: ticket.into(),
                versions,
                options,
                flags,
                next_id: AtomicU64::new(1),
                dispatch_tx,
                update_tx,
                root,
                tasks: Mutex::new(tasks),
            }),
        })
    }

    pub fn peer(&self) -> &str {
        &self.inner.peer
    }

    pub fn ticket(&self) -> &str {
        &self.inner.ticket
    }

    pub fn remote_version(&self) -> Option<VersionTriple> {
        self.inner.versions.remote()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.flags.connected.load(Ordering::SeqCst) && !self.inner.root.is_cancelled()
    }

    fn accepts_commands(&self) -> bool {
        self.is_connected() && !self.inner.flags.closing.load(Ordering::SeqCst)
    }

    /// Queue raw bytes for the server. A missing `\n` terminator is added.
    ///
    /// Bytes reach the wire in the order they were queued.
    pub fn enqueue_command(&self, bytes: impl Into<Vec<u8>>) -> Result<(), SessionError> {
        if !self.accepts_commands() {
            return Err(SessionError::NotConnected);
        }
        let mut bytes = bytes.into();
        if bytes.last() != Some(&b'\n') {
            bytes.push(b'\n');
        }
        self.inner
            .dispatch_tx
            .send(DispatchMsg::Send { bytes, reply: None })
            .map_err(|_| SessionError::NotConnected)
    }

    /// Send a command frame and wait for its result.
    pub async fn command(&self, name: &str, args: Value) -> Result<CommandReply, SessionError> {
        if !self.accepts_commands() {
            return Err(SessionError::NotConnected);
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let bytes = CommandFrame::new(id, name, args).to_line()?;

        let (tx, rx) = oneshot::channel();
        self.inner
            .dispatch_tx
            .send(DispatchMsg::Send {
                bytes,
                reply: Some((id, tx)),
            })
            .map_err(|_| SessionError::NotConnected)?;

        rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Receive every update that arrives from now on.
    ///
    /// The receiver closes when the session stops.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.inner.update_tx.send(UpdateMsg::Subscribe(tx)).is_err() {
            debug!("Subscribed to stopped session with {}", self.inner.peer);
        }
        rx
    }

    /// Tell the server to exit and stop every role.
    ///
    /// Calling it again, or after the channel died, does nothing more.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        if inner.flags.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        let tasks = std::mem::take(&mut *inner.tasks.lock());
        info!("Disconnecting from {}", inner.peer);

        if !inner.root.is_cancelled() {
            let exit = CommandFrame::exit(inner.next_id.fetch_add(1, Ordering::SeqCst));
            match exit.to_line() {
                Ok(bytes) => {
                    let _ = inner
                        .dispatch_tx
                        .send(DispatchMsg::Send { bytes, reply: None });
                }
                Err(e) => warn!("Could not encode exit command: {}", e),
            }
        }

        if let Some(receive) = tasks.receive {
            // Wait for the server to close its side after `exit`.
            if !join_within(receive.handle, "receive", inner.options.exit_timeout).await {
                receive.token.cancel();
            }
        }
        inner.flags.connected.store(false, Ordering::SeqCst);

        if let Some(dispatch) = tasks.dispatch {
            dispatch
                .stop("command dispatch", inner.options.exit_timeout)
                .await;
        }
        tokio::time::sleep(inner.options.disconnect_grace).await;
        if let Some(notify) = tasks.notify {
            notify
                .stop("update notification", inner.options.exit_timeout)
                .await;
        }

        inner.root.cancel();
        info!("Disconnected from {}", inner.peer);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("peer", &self.inner.peer)
            .field("connected", &self.is_connected())
            .finish()
    }
}

struct Dispatcher {
    writer: ChannelWriter,
    rx: mpsc::UnboundedReceiver<DispatchMsg>,
    pending: HashMap<u64, ReplySender>,
    peer: String,
    flags: Arc<Flags>,
    root: CancellationToken,
    token: CancellationToken,
}

impl Dispatcher {
    async fn run(mut self) {
        loop {
            let msg = tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                msg = self.rx.recv() => msg,
            };

            match msg {
                Some(DispatchMsg::Send { bytes, reply }) => {
                    if let Some((id, tx)) = reply {
                        self.pending.insert(id, tx);
                    }
                    if let Err(e) = self.write(&bytes).await {
                        warn!("Write to {} failed: {}", self.peer, e);
                        self.flags.connected.store(false, Ordering::SeqCst);
                        if !self.flags.closing.load(Ordering::SeqCst) {
                            self.root.cancel();
                        }
                        break;
                    }
                }
                Some(DispatchMsg::Result(frame)) => self.complete(frame),
                None => break,
            }
        }

        for (_, tx) in self.pending.drain() {
            let _ = tx.send(Err(SessionError::Closed));
        }
        if let Err(e) = self.writer.shutdown().await {
            debug!("Shutting down writer to {}: {}", self.peer, e);
        }
        debug!("Command dispatch for {} stopped", self.peer);
    }

    async fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await
    }

    fn complete(&mut self, frame: ResultFrame) {
        let Some(tx) = self.pending.remove(&frame.id) else {
            debug!("Result for unknown command {} from {}", frame.id, self.peer);
            return;
        };
        let reply = match frame.error {
            Some(message) => Err(SessionError::Remote(message)),
            None => Ok(CommandReply {
                id: frame.id,
                data: frame.data,
            }),
        };
        let _ = tx.send(reply);
    }
}

struct Notifier {
    rx: mpsc::UnboundedReceiver<UpdateMsg>,
    subscribers: Vec<mpsc::UnboundedSender<SessionUpdate>>,
    token: CancellationToken,
}

impl Notifier {
    async fn run(mut self) {
        loop {
            // Queued updates drain before cancellation is noticed.
            let msg = tokio::select! {
                biased;
                msg = self.rx.recv() => msg,
                _ = self.token.cancelled() => break,
            };

            match msg {
                Some(UpdateMsg::Subscribe(tx)) => self.subscribers.push(tx),
                Some(UpdateMsg::Update(update)) => {
                    self.subscribers
                        .retain(|tx| tx.send(update.clone()).is_ok());
                }
                None => break,
            }
        }
        debug!("Update notification stopped");
    }
}

struct Receiver {
    reader: ChannelReader,
    dispatch_tx: mpsc::UnboundedSender<DispatchMsg>,
    update_tx: mpsc::UnboundedSender<UpdateMsg>,
    peer: String,
    flags: Arc<Flags>,
    root: CancellationToken,
    token: CancellationToken,
}

impl Receiver {
    async fn run(mut self) {
        loop {
            let line = tokio::select! {
                _ = self.token.cancelled() => break,
                line = read_bounded_bytes(&mut self.reader, MAX_FRAME_BYTES) => line,
            };

            match line {
                Ok(Some(bytes)) => match std::str::from_utf8(&bytes) {
                    Ok(line) => self.route(line),
                    Err(e) => warn!("Skipping non UTF-8 frame from {}: {}", self.peer, e),
                },
                Ok(None) => {
                    debug!("{} closed the session", self.peer);
                    break;
                }
                Err(e) => {
                    warn!("Read from {} failed: {}", self.peer, e);
                    break;
                }
            }
        }

        self.flags.connected.store(false, Ordering::SeqCst);
        if !self.flags.closing.load(Ordering::SeqCst) {
            info!("Session with {} lost", self.peer);
            self.root.cancel();
        }
    }

    fn route(&self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        match InboundFrame::parse(line) {
            Ok(InboundFrame::Update(frame)) => {
                let _ = self.update_tx.send(UpdateMsg::Update(frame.into()));
            }
            Ok(InboundFrame::Result(frame)) => {
                let _ = self.dispatch_tx.send(DispatchMsg::Result(frame));
            }
            Err(e) => warn!("Skipping frame from {}: {}", self.peer, e),
        }
    }
}
