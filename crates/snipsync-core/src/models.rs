//! Data models for snipsync
//!
//! Defines the replicated entities (Group, Collection, CodeSnippet) and the
//! CollaborationSession descriptor that starts a replication session.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named set of members sharing collections
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Group {
    /// Unique name within a session
    pub name: String,
    /// Member identifiers
    pub members: Vec<String>,
    /// Color token used by the UI
    pub color: String,
}

impl Group {
    /// Create a group with no members
    pub fn new(name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
            color: color.into(),
        }
    }

    /// Builder-style member list
    pub fn with_members(mut self, members: Vec<String>) -> Self {
        self.members = members;
        self
    }

    /// Add a member if not already present
    pub fn add_member(&mut self, member: impl Into<String>) {
        let member = member.into();
        if !self.members.contains(&member) {
            self.members.push(member);
        }
    }

    /// Remove a member
    pub fn remove_member(&mut self, member: &str) {
        if let Some(pos) = self.members.iter().position(|m| m == member) {
            self.members.remove(pos);
        }
    }
}

/// A collection of code snippets, shared with one or more groups
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Collection {
    /// Unique name
    pub name: String,
    /// Groups this collection belongs to
    pub groups: Vec<Group>,
    /// Snippets owned by this collection
    pub snippets: Vec<CodeSnippet>,
    /// Color token used by the UI
    pub color: String,
}

impl Collection {
    /// Create an empty collection
    pub fn new(name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            groups: Vec::new(),
            snippets: Vec::new(),
            color: color.into(),
        }
    }

    /// Builder-style group list
    pub fn with_groups(mut self, groups: Vec<Group>) -> Self {
        self.groups = groups;
        self
    }

    /// Whether the collection is shared with the named group
    pub fn belongs_to(&self, group_name: &str) -> bool {
        self.groups.iter().any(|g| g.name == group_name)
    }

    /// Find a snippet by name
    pub fn snippet(&self, name: &str) -> Option<&CodeSnippet> {
        self.snippets.iter().find(|s| s.name == name)
    }
}

/// A code snippet made of one or more files
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CodeSnippet {
    pub name: String,
    pub description: String,
    /// File contents
    pub files: Vec<String>,
    /// Who last changed the snippet
    pub updated_by: String,
    /// When the snippet was last changed
    pub updated_at: DateTime<Utc>,
}

impl CodeSnippet {
    /// Create an empty snippet stamped with the current time
    pub fn new(name: impl Into<String>, updated_by: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            files: Vec::new(),
            updated_by: updated_by.into(),
            updated_at: now_millis(),
        }
    }

    /// Builder-style description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Builder-style file list
    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.files = files;
        self
    }

    /// Replace the files and restamp
    pub fn set_files(&mut self, files: Vec<String>, updated_by: impl Into<String>) {
        self.files = files;
        self.updated_by = updated_by.into();
        self.updated_at = now_millis();
    }
}

/// Current time at the millisecond precision the document stores
fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Which side of a session this instance plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Owns the authoritative snapshot and is the only writer
    Creator,
    /// Mirrors the creator's snapshot, never writes
    Joiner,
}

/// Descriptor for a live collaboration session
///
/// Fields are private: the role is fixed by the constructor and can never be
/// changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollaborationSession {
    session_id: String,
    is_creator: bool,
    group: Option<Group>,
}

impl CollaborationSession {
    /// Describe a session this instance creates
    pub fn create(session_id: impl Into<String>, group: Option<Group>) -> Self {
        Self {
            session_id: session_id.into(),
            is_creator: true,
            group,
        }
    }

    /// Create a session with a fresh random session ID
    pub fn generate(group: Option<Group>) -> Self {
        Self::create(Uuid::new_v4().to_string(), group)
    }

    /// Describe a session this instance joins
    pub fn join(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            is_creator: false,
            group: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_creator(&self) -> bool {
        self.is_creator
    }

    pub fn role(&self) -> Role {
        if self.is_creator {
            Role::Creator
        } else {
            Role::Joiner
        }
    }

    /// The group the session was started for, if any
    pub fn group(&self) -> Option<&Group> {
        self.group.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_members() {
        let mut group = Group::new("eng", "blue");
        group.add_member("alice");
        group.add_member("bob");
        group.add_member("alice");
        assert_eq!(group.members, vec!["alice", "bob"]);

        group.remove_member("alice");
        assert_eq!(group.members, vec!["bob"]);
    }

    #[test]
    fn test_collection_belongs_to() {
        let eng = Group::new("eng", "blue");
        let collection = Collection::new("rust", "orange").with_groups(vec![eng]);

        assert!(collection.belongs_to("eng"));
        assert!(!collection.belongs_to("design"));
    }

    #[test]
    fn test_snippet_set_files_restamps() {
        let mut snippet = CodeSnippet::new("hello", "alice");
        let before = snippet.updated_at;

        snippet.set_files(vec!["fn main() {}".to_string()], "bob");

        assert_eq!(snippet.updated_by, "bob");
        assert_eq!(snippet.files.len(), 1);
        assert!(snippet.updated_at >= before);
    }

    #[test]
    fn test_snippet_timestamps_have_millisecond_precision() {
        let snippet = CodeSnippet::new("hello", "alice");
        assert_eq!(snippet.updated_at.timestamp_subsec_nanos() % 1_000_000, 0);
    }

    #[test]
    fn test_session_roles() {
        let created = CollaborationSession::create("abc", Some(Group::new("eng", "blue")));
        assert!(created.is_creator());
        assert_eq!(created.role(), Role::Creator);
        assert_eq!(created.session_id(), "abc");
        assert_eq!(created.group().map(|g| g.name.as_str()), Some("eng"));

        let joined = CollaborationSession::join("abc");
        assert!(!joined.is_creator());
        assert_eq!(joined.role(), Role::Joiner);
        assert!(joined.group().is_none());
    }

    #[test]
    fn test_generated_session_ids_are_unique() {
        let a = CollaborationSession::generate(None);
        let b = CollaborationSession::generate(None);
        assert!(a.is_creator());
        assert_ne!(a.session_id(), b.session_id());
    }

    #[test]
    fn test_session_serializes_fields() {
        let session = CollaborationSession::join("xyz");
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["session_id"], "xyz");
        assert_eq!(json["is_creator"], false);
    }
}
