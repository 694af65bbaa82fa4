//! Automerge document handling
//!
//! The replicated document holds two ordered sequences, `groups` and
//! `collections`. A sequence is only ever replaced as a whole: every
//! replacement writes a fresh list object under the root key, so the document
//! always holds a complete snapshot of the writer's local arrays.
//!
//! Subscribers are called synchronously with the full new contents of a
//! sequence whenever it changes, whether the change was made locally or
//! arrived in a sync message from a peer.

use std::fmt;
use std::sync::Arc;

use automerge::sync::{self, SyncDoc};
use automerge::{transaction::Transactable, AutoCommit, ObjId, ObjType, ReadDoc, Value, ROOT};
use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::models::{CodeSnippet, Collection, Group};

/// Errors that can occur during document operations
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("Automerge error: {0}")]
    Automerge(#[from] automerge::AutomergeError),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid field type for {0}")]
    InvalidType(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(i64),

    #[error("Invalid sync message: {0}")]
    InvalidSyncMessage(String),

    #[error("Document is closed")]
    Closed,
}

/// Keys used in the Automerge document structure
mod keys {
    pub const GROUPS: &str = "groups";
    pub const COLLECTIONS: &str = "collections";

    // Entity fields
    pub const NAME: &str = "name";
    pub const COLOR: &str = "color";
    pub const MEMBERS: &str = "members";
    pub const SNIPPETS: &str = "snippets";
    pub const DESCRIPTION: &str = "description";
    pub const FILES: &str = "files";
    pub const UPDATED_BY: &str = "updated_by";
    pub const UPDATED_AT: &str = "updated_at";
}

/// The two top-level sequences of the document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sequence {
    Groups,
    Collections,
}

impl Sequence {
    pub const ALL: [Sequence; 2] = [Sequence::Groups, Sequence::Collections];

    /// Root key of the sequence
    pub fn key(self) -> &'static str {
        match self {
            Sequence::Groups => keys::GROUPS,
            Sequence::Collections => keys::COLLECTIONS,
        }
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// An entity stored as an element of one of the top-level sequences
pub trait SequenceItem: Clone + PartialEq + Send + 'static {
    /// The sequence this entity lives in
    const SEQUENCE: Sequence;

    /// Write this entity's fields into an empty map object
    fn write_fields(&self, doc: &mut AutoCommit, obj: &ObjId) -> Result<(), DocumentError>;

    /// Read an entity back from a map object
    fn read_fields(doc: &AutoCommit, obj: &ObjId) -> Result<Self, DocumentError>;
}

impl SequenceItem for Group {
    const SEQUENCE: Sequence = Sequence::Groups;

    fn write_fields(&self, doc: &mut AutoCommit, obj: &ObjId) -> Result<(), DocumentError> {
        doc.put(obj, keys::NAME, self.name.clone())?;
        doc.put(obj, keys::COLOR, self.color.clone())?;
        put_string_list(doc, obj, keys::MEMBERS, &self.members)?;
        Ok(())
    }

    fn read_fields(doc: &AutoCommit, obj: &ObjId) -> Result<Self, DocumentError> {
        Ok(Group {
            name: get_string(doc, obj, keys::NAME)?,
            members: get_string_list(doc, obj, keys::MEMBERS)?,
            color: get_string(doc, obj, keys::COLOR)?,
        })
    }
}

impl SequenceItem for Collection {
    const SEQUENCE: Sequence = Sequence::Collections;

    fn write_fields(&self, doc: &mut AutoCommit, obj: &ObjId) -> Result<(), DocumentError> {
        doc.put(obj, keys::NAME, self.name.clone())?;
        doc.put(obj, keys::COLOR, self.color.clone())?;

        let groups_id = doc.put_object(obj, keys::GROUPS, ObjType::List)?;
        write_map_list(doc, &groups_id, &self.groups, Group::write_fields)?;

        let snippets_id = doc.put_object(obj, keys::SNIPPETS, ObjType::List)?;
        write_map_list(doc, &snippets_id, &self.snippets, write_snippet_fields)?;

        Ok(())
    }

    fn read_fields(doc: &AutoCommit, obj: &ObjId) -> Result<Self, DocumentError> {
        let groups = match doc.get(obj, keys::GROUPS)? {
            Some((_, list_id)) => read_map_list(doc, &list_id, Group::read_fields)?,
            None => Vec::new(),
        };
        let snippets = match doc.get(obj, keys::SNIPPETS)? {
            Some((_, list_id)) => read_map_list(doc, &list_id, read_snippet)?,
            None => Vec::new(),
        };

        Ok(Collection {
            name: get_string(doc, obj, keys::NAME)?,
            groups,
            snippets,
            color: get_string(doc, obj, keys::COLOR)?,
        })
    }
}

/// Handle returned by [`ReplicatedDocument::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Box<dyn FnMut(&AutoCommit) + Send>;

struct Subscription {
    id: SubscriptionId,
    sequence: Sequence,
    listener: Listener,
}

/// A document shared between the replication controller and the transport
pub type SharedDocument = Arc<Mutex<ReplicatedDocument>>;

/// The replicated groups/collections document, backed by Automerge
pub struct ReplicatedDocument {
    /// The Automerge document
    doc: AutoCommit,
    /// Change listeners, per sequence
    subscriptions: Vec<Subscription>,
    next_subscription: u64,
    /// Number of replacements made through this instance
    local_writes: u64,
    closed: bool,
}

impl ReplicatedDocument {
    /// Create an empty document
    ///
    /// The root sequences are created lazily by the first replacement, so an
    /// instance that only reads never creates objects competing with the
    /// writer's.
    pub fn open() -> Self {
        Self {
            doc: AutoCommit::new(),
            subscriptions: Vec::new(),
            next_subscription: 0,
            local_writes: 0,
            closed: false,
        }
    }

    /// Wrap the document for sharing between tasks
    pub fn into_shared(self) -> SharedDocument {
        Arc::new(Mutex::new(self))
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of effective replacements made through this instance
    pub fn local_writes(&self) -> u64 {
        self.local_writes
    }

    /// Current contents of the sequence holding `T`
    pub fn sequence<T: SequenceItem>(&self) -> Result<Vec<T>, DocumentError> {
        read_sequence(&self.doc)
    }

    pub fn groups(&self) -> Result<Vec<Group>, DocumentError> {
        self.sequence()
    }

    pub fn collections(&self) -> Result<Vec<Collection>, DocumentError> {
        self.sequence()
    }

    /// Replace the whole sequence holding `T` with `items`, in order
    ///
    /// Returns `false` without touching the document when the sequence
    /// already holds exactly these items.
    pub fn replace_sequence<T: SequenceItem>(&mut self, items: &[T]) -> Result<bool, DocumentError> {
        if self.closed {
            return Err(DocumentError::Closed);
        }

        if matches!(read_sequence::<T>(&self.doc), Ok(current) if current == items) {
            return Ok(false);
        }

        let list_id = self
            .doc
            .put_object(ROOT, T::SEQUENCE.key(), ObjType::List)?;
        write_map_list(&mut self.doc, &list_id, items, T::write_fields)?;

        self.local_writes += 1;
        let sequence = T::SEQUENCE;
        debug!(sequence = %sequence, items = items.len(), "Replaced sequence");

        self.notify(T::SEQUENCE);
        Ok(true)
    }

    /// Register a callback for changes to the sequence holding `T`
    ///
    /// The callback receives the complete new contents each time.
    pub fn subscribe<T, F>(&mut self, mut callback: F) -> SubscriptionId
    where
        T: SequenceItem,
        F: FnMut(Vec<T>) + Send + 'static,
    {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;

        let listener: Listener = Box::new(move |doc| match read_sequence::<T>(doc) {
            Ok(items) => callback(items),
            Err(e) => {
                let sequence = T::SEQUENCE;
                warn!(sequence = %sequence, "Skipping undecodable update: {}", e);
            }
        });

        self.subscriptions.push(Subscription {
            id,
            sequence: T::SEQUENCE,
            listener,
        });
        id
    }

    /// Remove a subscription, returning whether it existed
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.id != id);
        self.subscriptions.len() != before
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Drop all subscriptions and refuse further changes
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.subscriptions.clear();
        debug!("Document closed");
    }

    // ==================== Sync ====================

    /// Generate the next sync message for a peer, if there is anything to say
    pub fn generate_sync_message(&mut self, state: &mut sync::State) -> Option<Vec<u8>> {
        if self.closed {
            return None;
        }
        self.doc
            .sync()
            .generate_sync_message(state)
            .map(|m| m.encode())
    }

    /// Apply a sync message received from a peer
    ///
    /// Subscribers of every sequence whose root object changed are notified.
    /// Returns whether any sequence changed.
    pub fn receive_sync_message(
        &mut self,
        state: &mut sync::State,
        bytes: &[u8],
    ) -> Result<bool, DocumentError> {
        if self.closed {
            return Err(DocumentError::Closed);
        }

        let message = sync::Message::decode(bytes)
            .map_err(|e| DocumentError::InvalidSyncMessage(e.to_string()))?;

        let before = [
            self.root_object(Sequence::Groups)?,
            self.root_object(Sequence::Collections)?,
        ];

        self.doc.sync().receive_sync_message(state, message)?;

        let mut changed = false;
        for (sequence, previous) in Sequence::ALL.into_iter().zip(before) {
            if self.root_object(sequence)? != previous {
                debug!(sequence = %sequence, "Sequence changed by peer");
                changed = true;
                self.notify(sequence);
            }
        }
        Ok(changed)
    }

    /// Whether the peer behind `state` has advertised exactly our heads
    pub fn is_reconciled(&mut self, state: &sync::State) -> bool {
        let Some(theirs) = state.their_heads.as_ref() else {
            return false;
        };
        let mut ours = self.doc.get_heads();
        let mut theirs = theirs.clone();
        ours.sort();
        theirs.sort();
        ours == theirs
    }

    // ==================== Private helpers ====================

    fn root_object(&self, sequence: Sequence) -> Result<Option<ObjId>, DocumentError> {
        Ok(self.doc.get(ROOT, sequence.key())?.map(|(_, id)| id))
    }

    fn notify(&mut self, sequence: Sequence) {
        let doc = &self.doc;
        for sub in self
            .subscriptions
            .iter_mut()
            .filter(|s| s.sequence == sequence)
        {
            (sub.listener)(doc);
        }
    }
}

impl Default for ReplicatedDocument {
    fn default() -> Self {
        Self::open()
    }
}

fn read_sequence<T: SequenceItem>(doc: &AutoCommit) -> Result<Vec<T>, DocumentError> {
    match doc.get(ROOT, T::SEQUENCE.key())? {
        Some((Value::Object(ObjType::List), list_id)) => read_map_list(doc, &list_id, T::read_fields),
        Some(_) => Err(DocumentError::InvalidType(T::SEQUENCE.key().to_string())),
        None => Ok(Vec::new()),
    }
}

fn write_map_list<T>(
    doc: &mut AutoCommit,
    list_id: &ObjId,
    items: &[T],
    write: fn(&T, &mut AutoCommit, &ObjId) -> Result<(), DocumentError>,
) -> Result<(), DocumentError> {
    for (i, item) in items.iter().enumerate() {
        let item_id = doc.insert_object(list_id, i, ObjType::Map)?;
        write(item, doc, &item_id)?;
    }
    Ok(())
}

fn read_map_list<T>(
    doc: &AutoCommit,
    list_id: &ObjId,
    read: fn(&AutoCommit, &ObjId) -> Result<T, DocumentError>,
) -> Result<Vec<T>, DocumentError> {
    let len = doc.length(list_id);
    let mut result = Vec::with_capacity(len);
    for i in 0..len {
        match doc.get(list_id, i)? {
            Some((Value::Object(ObjType::Map), item_id)) => result.push(read(doc, &item_id)?),
            Some(_) => return Err(DocumentError::InvalidType(format!("list item {}", i))),
            None => {}
        }
    }
    Ok(result)
}

fn write_snippet_fields(
    snippet: &CodeSnippet,
    doc: &mut AutoCommit,
    obj: &ObjId,
) -> Result<(), DocumentError> {
    doc.put(obj, keys::NAME, snippet.name.clone())?;
    doc.put(obj, keys::DESCRIPTION, snippet.description.clone())?;
    put_string_list(doc, obj, keys::FILES, &snippet.files)?;
    doc.put(obj, keys::UPDATED_BY, snippet.updated_by.clone())?;
    doc.put(obj, keys::UPDATED_AT, snippet.updated_at.timestamp_millis())?;
    Ok(())
}

fn read_snippet(doc: &AutoCommit, obj: &ObjId) -> Result<CodeSnippet, DocumentError> {
    Ok(CodeSnippet {
        name: get_string(doc, obj, keys::NAME)?,
        description: get_string(doc, obj, keys::DESCRIPTION)?,
        files: get_string_list(doc, obj, keys::FILES)?,
        updated_by: get_string(doc, obj, keys::UPDATED_BY)?,
        updated_at: get_timestamp(doc, obj, keys::UPDATED_AT)?,
    })
}

fn put_string_list(
    doc: &mut AutoCommit,
    obj: &ObjId,
    key: &str,
    items: &[String],
) -> Result<(), DocumentError> {
    let list_id = doc.put_object(obj, key, ObjType::List)?;
    for (i, item) in items.iter().enumerate() {
        doc.insert(&list_id, i, item.clone())?;
    }
    Ok(())
}

fn get_string(doc: &AutoCommit, obj: &ObjId, key: &str) -> Result<String, DocumentError> {
    match doc.get(obj, key)? {
        Some((value, _)) => value
            .to_str()
            .map(|s| s.to_string())
            .ok_or_else(|| DocumentError::InvalidType(key.to_string())),
        None => Err(DocumentError::MissingField(key.to_string())),
    }
}

fn get_string_list(doc: &AutoCommit, obj: &ObjId, key: &str) -> Result<Vec<String>, DocumentError> {
    match doc.get(obj, key)? {
        Some((_, list_id)) => {
            let mut result = Vec::new();
            let len = doc.length(&list_id);
            for i in 0..len {
                if let Some((value, _)) = doc.get(&list_id, i)? {
                    let s = value
                        .to_str()
                        .ok_or_else(|| DocumentError::InvalidType(format!("{} item {}", key, i)))?;
                    result.push(s.to_string());
                }
            }
            Ok(result)
        }
        None => Ok(Vec::new()),
    }
}

fn get_timestamp(doc: &AutoCommit, obj: &ObjId, key: &str) -> Result<DateTime<Utc>, DocumentError> {
    match doc.get(obj, key)? {
        Some((value, _)) => {
            let millis = value
                .to_i64()
                .ok_or_else(|| DocumentError::InvalidType(key.to_string()))?;
            Utc.timestamp_millis_opt(millis)
                .single()
                .ok_or(DocumentError::InvalidTimestamp(millis))
        }
        None => Err(DocumentError::MissingField(key.to_string())),
    }
}
