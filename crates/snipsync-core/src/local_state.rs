//! Local state projection
//!
//! The application's own `groups`/`collections` values. The replication
//! controller never owns them; it reads them through [`LocalSource`] (creator)
//! or writes them through [`LocalSink`] (joiner).

use tokio::sync::watch;

use crate::models::{Collection, Group};

/// Read side of the local state: current values plus change notification
pub trait LocalSource: Send + Sync + 'static {
    fn groups(&self) -> Vec<Group>;

    fn collections(&self) -> Vec<Collection>;

    /// Receiver that is notified on every change to `groups`
    fn watch_groups(&self) -> watch::Receiver<Vec<Group>>;

    /// Receiver that is notified on every change to `collections`
    fn watch_collections(&self) -> watch::Receiver<Vec<Collection>>;
}

/// Write side of the local state
pub trait LocalSink: Send + Sync + 'static {
    fn set_groups(&self, groups: Vec<Group>);

    fn set_collections(&self, collections: Vec<Collection>);
}

/// Full local state capability
pub trait LocalState: LocalSource + LocalSink {}

impl<T: LocalSource + LocalSink> LocalState for T {}

/// Observable in-memory application state
#[derive(Debug)]
pub struct AppState {
    groups: watch::Sender<Vec<Group>>,
    collections: watch::Sender<Vec<Collection>>,
}

impl AppState {
    /// Create an empty state
    pub fn new() -> Self {
        Self::with_values(Vec::new(), Vec::new())
    }

    /// Create a state with initial values
    pub fn with_values(groups: Vec<Group>, collections: Vec<Collection>) -> Self {
        let (groups, _) = watch::channel(groups);
        let (collections, _) = watch::channel(collections);
        Self {
            groups,
            collections,
        }
    }

    /// Find a group by name
    pub fn group(&self, name: &str) -> Option<Group> {
        self.groups.borrow().iter().find(|g| g.name == name).cloned()
    }

    /// Find a collection by name
    pub fn collection(&self, name: &str) -> Option<Collection> {
        self.collections
            .borrow()
            .iter()
            .find(|c| c.name == name)
            .cloned()
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalSource for AppState {
    fn groups(&self) -> Vec<Group> {
        self.groups.borrow().clone()
    }

    fn collections(&self) -> Vec<Collection> {
        self.collections.borrow().clone()
    }

    fn watch_groups(&self) -> watch::Receiver<Vec<Group>> {
        self.groups.subscribe()
    }

    fn watch_collections(&self) -> watch::Receiver<Vec<Collection>> {
        self.collections.subscribe()
    }
}

impl LocalSink for AppState {
    fn set_groups(&self, groups: Vec<Group>) {
        self.groups.send_replace(groups);
    }

    fn set_collections(&self, collections: Vec<Collection>) {
        self.collections.send_replace(collections);
    }
}
