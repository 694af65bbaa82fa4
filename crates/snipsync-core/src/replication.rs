//! Replication session controller
//!
//! Drives one collaboration session at a time:
//!
//! ```text
//! Idle ──start──▶ Starting ──▶ CreatorActive | JoinerActive ──stop──▶ Closed
//! ```
//!
//! The two roles are separate bridges. A creator pushes local changes into the
//! session document and never listens to it. A joiner listens to the document
//! and never writes it. Each bridge only holds the capability its direction
//! needs, so a document change can never turn into another push.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::document::{
    DocumentError, ReplicatedDocument, SequenceItem, SharedDocument, SubscriptionId,
};
use crate::local_state::{LocalSink, LocalSource, LocalState};
use crate::models::{CollaborationSession, Collection, Group};
use crate::sync::{
    ConnectionStatus, PeerTransport, TransportCommand, TransportConfig, TransportError,
    TransportEvent,
};

/// Transport events buffered for the host; later ones are dropped
const EVENT_QUEUE_CAPACITY: usize = 64;

/// Lifecycle of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    CreatorActive,
    JoinerActive,
    Closed,
}

/// Errors that abort session setup
#[derive(Error, Debug)]
pub enum ReplicationError {
    #[error("Failed to set up transport: {0}")]
    Transport(#[from] TransportError),

    #[error("Document error: {0}")]
    Document(#[from] DocumentError),
}

/// Counters for the current session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicationStats {
    /// Local values offered to the document by the creator
    pub pushes: u64,
    /// Replicated values applied to local state by a joiner
    pub pulls: u64,
}

#[derive(Debug, Default)]
struct Counters {
    pushes: AtomicU64,
    pulls: AtomicU64,
}

impl Counters {
    fn reset(&self) {
        self.pushes.store(0, Ordering::Relaxed);
        self.pulls.store(0, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ReplicationStats {
        ReplicationStats {
            pushes: self.pushes.load(Ordering::Relaxed),
            pulls: self.pulls.load(Ordering::Relaxed),
        }
    }
}

/// Write access to the session document
///
/// Only the creator bridge holds one.
#[derive(Clone)]
struct DocumentWriter {
    doc: SharedDocument,
    commands: mpsc::Sender<TransportCommand>,
    counters: Arc<Counters>,
}

impl DocumentWriter {
    /// Replace a sequence and ask the transport to ship it
    async fn push<T: SequenceItem>(&self, items: &[T]) -> Result<bool, DocumentError> {
        self.counters.pushes.fetch_add(1, Ordering::Relaxed);

        let changed = self.doc.lock().await.replace_sequence(items)?;
        if changed {
            // A full queue already holds a push that will carry this change
            if let Err(e) = self.commands.try_send(TransportCommand::PushChanges) {
                debug!("Push not queued: {}", e);
            }
        }
        Ok(changed)
    }
}

/// Read-only access to the session document
#[derive(Clone)]
pub struct DocumentReader {
    doc: SharedDocument,
}

impl DocumentReader {
    pub async fn groups(&self) -> Result<Vec<Group>, DocumentError> {
        self.doc.lock().await.groups()
    }

    pub async fn collections(&self) -> Result<Vec<Collection>, DocumentError> {
        self.doc.lock().await.collections()
    }

    /// Replacements made by this instance, always zero on a joiner
    pub async fn local_writes(&self) -> u64 {
        self.doc.lock().await.local_writes()
    }

    pub async fn is_closed(&self) -> bool {
        self.doc.lock().await.is_closed()
    }

    async fn subscribe<T, F>(&self, callback: F) -> SubscriptionId
    where
        T: SequenceItem,
        F: FnMut(Vec<T>) + Send + 'static,
    {
        self.doc.lock().await.subscribe(callback)
    }
}

/// Local state → document, for the creator
struct CreatorBridge {
    push_task: JoinHandle<()>,
}

impl CreatorBridge {
    /// Seed the document with the current local values, then follow changes
    async fn start(source: &dyn LocalSource, writer: DocumentWriter) -> Result<Self, DocumentError> {
        let mut groups_rx = source.watch_groups();
        let mut collections_rx = source.watch_collections();

        let groups = groups_rx.borrow_and_update().clone();
        let collections = collections_rx.borrow_and_update().clone();
        writer.push(&groups).await?;
        writer.push(&collections).await?;
        info!(
            groups = groups.len(),
            collections = collections.len(),
            "Seeded session document"
        );

        let push_task = tokio::spawn(run_push_path(groups_rx, collections_rx, writer));
        Ok(Self { push_task })
    }

    fn stop(self) {
        self.push_task.abort();
    }
}

async fn run_push_path(
    mut groups_rx: watch::Receiver<Vec<Group>>,
    mut collections_rx: watch::Receiver<Vec<Collection>>,
    writer: DocumentWriter,
) {
    loop {
        let result = tokio::select! {
            changed = groups_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let groups = groups_rx.borrow_and_update().clone();
                writer.push(&groups).await
            }
            changed = collections_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let collections = collections_rx.borrow_and_update().clone();
                writer.push(&collections).await
            }
        };

        match result {
            Ok(_) => {}
            Err(DocumentError::Closed) => break,
            Err(e) => warn!("Failed to push local change: {}", e),
        }
    }
    debug!("Push path stopped");
}

/// Document → local state, for a joiner
struct JoinerBridge {
    subscriptions: Vec<SubscriptionId>,
}

impl JoinerBridge {
    /// Register the pull callbacks
    ///
    /// Callbacks do nothing once `live` is cleared, even if one is already
    /// running when teardown begins.
    async fn start(
        sink: Arc<dyn LocalSink>,
        reader: &DocumentReader,
        live: Arc<AtomicBool>,
        counters: Arc<Counters>,
    ) -> Self {
        let groups = {
            let (sink, live, counters) = (sink.clone(), live.clone(), counters.clone());
            reader
                .subscribe(move |groups: Vec<Group>| {
                    if !live.load(Ordering::Acquire) {
                        return;
                    }
                    debug!(groups = groups.len(), "Applying replicated groups");
                    counters.pulls.fetch_add(1, Ordering::Relaxed);
                    sink.set_groups(groups);
                })
                .await
        };

        let collections = reader
            .subscribe(move |collections: Vec<Collection>| {
                if !live.load(Ordering::Acquire) {
                    return;
                }
                debug!(collections = collections.len(), "Applying replicated collections");
                counters.pulls.fetch_add(1, Ordering::Relaxed);
                sink.set_collections(collections);
            })
            .await;

        Self {
            subscriptions: vec![groups, collections],
        }
    }
}

enum RoleBridge {
    Creator(CreatorBridge),
    Joiner(JoinerBridge),
}

/// Everything owned by one running session
struct ActiveSession {
    descriptor: CollaborationSession,
    document: SharedDocument,
    transport: Option<PeerTransport>,
    bridge: Option<RoleBridge>,
    live: Arc<AtomicBool>,
}

impl ActiveSession {
    /// Stop every path, then disconnect, then close the document
    async fn teardown(mut self) {
        self.live.store(false, Ordering::Release);

        let subscriptions = match self.bridge.take() {
            Some(RoleBridge::Creator(creator)) => {
                creator.stop();
                Vec::new()
            }
            Some(RoleBridge::Joiner(joiner)) => joiner.subscriptions,
            None => Vec::new(),
        };

        if let Some(mut transport) = self.transport.take() {
            transport.disconnect().await;
        }

        let mut doc = self.document.lock().await;
        for id in subscriptions {
            doc.unsubscribe(id);
        }
        doc.close();
    }
}

/// Binds the local state to at most one collaboration session
pub struct ReplicationController<L: LocalState> {
    config: TransportConfig,
    local: Arc<L>,
    state: SessionState,
    active: Option<ActiveSession>,
    counters: Arc<Counters>,
    event_tx: mpsc::Sender<TransportEvent>,
    event_rx: Option<mpsc::Receiver<TransportEvent>>,
}

impl<L: LocalState> ReplicationController<L> {
    pub fn new(config: TransportConfig, local: Arc<L>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        Self {
            config,
            local,
            state: SessionState::Idle,
            active: None,
            counters: Arc::default(),
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Start replicating `session`, ending any session already running
    ///
    /// On error every partially acquired resource has been released and the
    /// controller is `Closed`.
    pub async fn start(&mut self, session: CollaborationSession) -> Result<(), ReplicationError> {
        self.stop().await;
        self.state = SessionState::Starting;
        self.counters.reset();

        info!(
            session = %session.session_id(),
            role = ?session.role(),
            "Starting collaboration session"
        );

        let document = ReplicatedDocument::open().into_shared();
        let mut active = ActiveSession {
            descriptor: session.clone(),
            document: document.clone(),
            transport: None,
            bridge: None,
            live: Arc::new(AtomicBool::new(true)),
        };

        // Joiner callbacks go in before any remote data can arrive
        if !session.is_creator() {
            let reader = DocumentReader {
                doc: document.clone(),
            };
            let sink: Arc<dyn LocalSink> = self.local.clone();
            let joiner =
                JoinerBridge::start(sink, &reader, active.live.clone(), self.counters.clone())
                    .await;
            active.bridge = Some(RoleBridge::Joiner(joiner));
        }

        let transport = match PeerTransport::connect(
            &self.config,
            session.session_id(),
            document.clone(),
            self.event_tx.clone(),
        ) {
            Ok(transport) => transport,
            Err(e) => {
                warn!(session = %session.session_id(), "Failed to start session: {}", e);
                active.teardown().await;
                self.state = SessionState::Closed;
                return Err(e.into());
            }
        };
        let commands = transport.command_sender();
        active.transport = Some(transport);

        if session.is_creator() {
            let writer = DocumentWriter {
                doc: document,
                commands,
                counters: self.counters.clone(),
            };
            match CreatorBridge::start(self.local.as_ref(), writer).await {
                Ok(creator) => active.bridge = Some(RoleBridge::Creator(creator)),
                Err(e) => {
                    warn!(session = %session.session_id(), "Failed to seed session: {}", e);
                    active.teardown().await;
                    self.state = SessionState::Closed;
                    return Err(e.into());
                }
            }
        }

        self.state = if session.is_creator() {
            SessionState::CreatorActive
        } else {
            SessionState::JoinerActive
        };
        self.active = Some(active);
        Ok(())
    }

    /// End the current session
    ///
    /// Once this returns no local edit reaches the document and no document
    /// change reaches the local state. Safe to call at any time, repeatedly.
    pub async fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            info!(session = %active.descriptor.session_id(), "Closing collaboration session");
            active.teardown().await;
        }
        if self.state != SessionState::Idle {
            self.state = SessionState::Closed;
        }
    }

    /// Follow the current session descriptor
    ///
    /// `None` stops; a descriptor equal to the running one is a no-op; any
    /// other descriptor restarts.
    pub async fn apply(
        &mut self,
        session: Option<CollaborationSession>,
    ) -> Result<(), ReplicationError> {
        match session {
            Some(session) if self.session() == Some(&session) => Ok(()),
            Some(session) => self.start(session).await,
            None => {
                self.stop().await;
                Ok(())
            }
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Descriptor of the running session
    pub fn session(&self) -> Option<&CollaborationSession> {
        self.active.as_ref().map(|a| &a.descriptor)
    }

    /// Read access to the running session's document
    pub fn reader(&self) -> Option<DocumentReader> {
        self.active.as_ref().map(|a| DocumentReader {
            doc: a.document.clone(),
        })
    }

    pub fn local(&self) -> &Arc<L> {
        &self.local
    }

    pub fn stats(&self) -> ReplicationStats {
        self.counters.snapshot()
    }

    /// Take the transport event stream
    ///
    /// Events from every session arrive here. A stopped session reports
    /// nothing after `stop` returns. Events that find the queue full are
    /// dropped, so an untaken stream holds at most a fixed backlog.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.event_rx.take()
    }

    pub fn transport_status(&self) -> ConnectionStatus {
        self.active
            .as_ref()
            .and_then(|a| a.transport.as_ref())
            .map(PeerTransport::status)
            .unwrap_or(ConnectionStatus::Disconnected)
    }
}

impl<L: LocalState> Drop for ReplicationController<L> {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.live.store(false, Ordering::Release);
            if let Some(RoleBridge::Creator(creator)) = active.bridge {
                creator.stop();
            }
            // Dropping the transport aborts its task
        }
    }
}
