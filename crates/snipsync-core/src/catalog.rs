//! In-memory catalog of groups and collections
//!
//! Mirrors the backend command surface the UI refreshes its local state from
//! (`get_groups`, `create_group`, `create_snippet`, ...). Entries keep their
//! insertion order. Nothing is persisted.
//!
//! After a successful change, call [`Catalog::refresh`] to copy the catalog
//! into the local state; on a creator that is what drives replication.

use thiserror::Error;
use tracing::debug;

use crate::local_state::LocalSink;
use crate::models::{CodeSnippet, Collection, Group};

/// Errors returned by catalog commands
///
/// Messages keep the `Error: ` prefix the UI uses to recognise failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Error: A group with the name '{0}' already exists.")]
    GroupExists(String),

    #[error("Error: Group '{0}' not found.")]
    GroupNotFound(String),

    #[error("Error: A collection with the name '{0}' already exists.")]
    CollectionExists(String),

    #[error("Error: Collection '{0}' not found.")]
    CollectionNotFound(String),

    #[error("Error: Collection '{collection}' is not part of group '{group}'.")]
    NotInGroup { collection: String, group: String },

    #[error("Error: A snippet with the name '{snippet}' already exists in the collection '{collection}'.")]
    SnippetExists { snippet: String, collection: String },

    #[error("Error: Snippet '{snippet}' not found in collection '{collection}'.")]
    SnippetNotFound { snippet: String, collection: String },
}

/// Groups and collections, keyed by name
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    groups: Vec<Group>,
    collections: Vec<Collection>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the current catalog into the local state
    pub fn refresh(&self, local: &dyn LocalSink) {
        local.set_groups(self.get_groups());
        local.set_collections(self.get_collections());
    }

    // ==================== Groups ====================

    pub fn get_groups(&self) -> Vec<Group> {
        self.groups.clone()
    }

    pub fn get_group(&self, name: &str) -> Option<Group> {
        self.groups.iter().find(|g| g.name == name).cloned()
    }

    /// Create a group; names are unique
    pub fn create_group(
        &mut self,
        name: &str,
        members: Vec<String>,
        color: &str,
    ) -> Result<Group, CatalogError> {
        if self.group_index(name).is_some() {
            return Err(CatalogError::GroupExists(name.to_string()));
        }

        let group = Group::new(name, color).with_members(members);
        self.groups.push(group.clone());
        debug!("Group created: {}", name);
        Ok(group)
    }

    pub fn delete_group(&mut self, name: &str) -> Result<(), CatalogError> {
        let index = self
            .group_index(name)
            .ok_or_else(|| CatalogError::GroupNotFound(name.to_string()))?;
        self.groups.remove(index);
        debug!("Group deleted: {}", name);
        Ok(())
    }

    pub fn rename_group(&mut self, name: &str, new_name: &str) -> Result<(), CatalogError> {
        let index = self
            .group_index(name)
            .ok_or_else(|| CatalogError::GroupNotFound(name.to_string()))?;
        if self.group_index(new_name).is_some() {
            return Err(CatalogError::GroupExists(new_name.to_string()));
        }

        self.groups[index].name = new_name.to_string();
        debug!("Group renamed: {} -> {}", name, new_name);
        Ok(())
    }

    // ==================== Collections ====================

    pub fn get_collections(&self) -> Vec<Collection> {
        self.collections.clone()
    }

    pub fn get_collection(&self, name: &str) -> Option<Collection> {
        self.collections.iter().find(|c| c.name == name).cloned()
    }

    /// Create a collection; names are unique
    pub fn create_collection(
        &mut self,
        name: &str,
        groups: Vec<Group>,
        snippets: Vec<CodeSnippet>,
        color: &str,
    ) -> Result<Collection, CatalogError> {
        if self.collection_index(name).is_some() {
            return Err(CatalogError::CollectionExists(name.to_string()));
        }

        let collection = Collection {
            name: name.to_string(),
            groups,
            snippets,
            color: color.to_string(),
        };
        self.collections.push(collection.clone());
        debug!("Collection created: {}", name);
        Ok(collection)
    }

    /// Delete a collection that is shared with `group_name`
    pub fn delete_collection(
        &mut self,
        group_name: &str,
        collection_name: &str,
    ) -> Result<(), CatalogError> {
        let index = self.collection_in_group(group_name, collection_name)?;
        self.collections.remove(index);
        debug!(
            "Collection '{}' deleted from group '{}'",
            collection_name, group_name
        );
        Ok(())
    }

    pub fn rename_collection(&mut self, name: &str, new_name: &str) -> Result<(), CatalogError> {
        let index = self
            .collection_index(name)
            .ok_or_else(|| CatalogError::CollectionNotFound(name.to_string()))?;
        if self.collection_index(new_name).is_some() {
            return Err(CatalogError::CollectionExists(new_name.to_string()));
        }

        self.collections[index].name = new_name.to_string();
        debug!("Collection renamed: {} -> {}", name, new_name);
        Ok(())
    }

    // ==================== Snippets ====================

    /// Add a snippet to a collection shared with `group_name`
    pub fn create_snippet(
        &mut self,
        group_name: &str,
        collection_name: &str,
        snippet: CodeSnippet,
    ) -> Result<(), CatalogError> {
        let index = self.collection_in_group(group_name, collection_name)?;
        let collection = &mut self.collections[index];

        if collection.snippet(&snippet.name).is_some() {
            return Err(CatalogError::SnippetExists {
                snippet: snippet.name,
                collection: collection_name.to_string(),
            });
        }

        debug!("Snippet created: {}", snippet.name);
        collection.snippets.push(snippet);
        Ok(())
    }

    pub fn delete_snippet(
        &mut self,
        group_name: &str,
        collection_name: &str,
        snippet_name: &str,
    ) -> Result<(), CatalogError> {
        let index = self.collection_in_group(group_name, collection_name)?;
        let collection = &mut self.collections[index];

        let position = collection
            .snippets
            .iter()
            .position(|s| s.name == snippet_name)
            .ok_or_else(|| CatalogError::SnippetNotFound {
                snippet: snippet_name.to_string(),
                collection: collection_name.to_string(),
            })?;

        collection.snippets.remove(position);
        debug!(
            "Snippet '{}' deleted from collection '{}' in group '{}'",
            snippet_name, collection_name, group_name
        );
        Ok(())
    }

    // ==================== Private helpers ====================

    fn group_index(&self, name: &str) -> Option<usize> {
        self.groups.iter().position(|g| g.name == name)
    }

    fn collection_index(&self, name: &str) -> Option<usize> {
        self.collections.iter().position(|c| c.name == name)
    }

    /// Resolve a collection that must exist and be shared with an existing group
    fn collection_in_group(
        &self,
        group_name: &str,
        collection_name: &str,
    ) -> Result<usize, CatalogError> {
        if self.group_index(group_name).is_none() {
            return Err(CatalogError::GroupNotFound(group_name.to_string()));
        }

        let index = self
            .collection_index(collection_name)
            .ok_or_else(|| CatalogError::CollectionNotFound(collection_name.to_string()))?;

        if !self.collections[index].belongs_to(group_name) {
            return Err(CatalogError::NotInGroup {
                collection: collection_name.to_string(),
                group: group_name.to_string(),
            });
        }

        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_state::{AppState, LocalSource};

    fn catalog_with_eng() -> Catalog {
        let mut catalog = Catalog::new();
        let eng = catalog.create_group("eng", vec![], "blue").unwrap();
        catalog
            .create_collection("rust", vec![eng], vec![], "orange")
            .unwrap();
        catalog
    }

    #[test]
    fn test_create_group_rejects_duplicates() {
        let mut catalog = Catalog::new();
        catalog.create_group("eng", vec![], "blue").unwrap();

        let err = catalog.create_group("eng", vec![], "red").unwrap_err();
        assert_eq!(err, CatalogError::GroupExists("eng".to_string()));
        assert!(err.to_string().starts_with("Error"));
    }

    #[test]
    fn test_groups_keep_insertion_order() {
        let mut catalog = Catalog::new();
        catalog.create_group("eng", vec![], "blue").unwrap();
        catalog.create_group("design", vec![], "pink").unwrap();

        let names: Vec<_> = catalog.get_groups().into_iter().map(|g| g.name).collect();
        assert_eq!(names, vec!["eng", "design"]);
    }

    #[test]
    fn test_delete_and_rename_group() {
        let mut catalog = Catalog::new();
        catalog.create_group("eng", vec![], "blue").unwrap();
        catalog.create_group("ops", vec![], "green").unwrap();

        assert_eq!(
            catalog.rename_group("eng", "ops"),
            Err(CatalogError::GroupExists("ops".to_string()))
        );
        catalog.rename_group("eng", "platform").unwrap();
        assert!(catalog.get_group("platform").is_some());

        catalog.delete_group("platform").unwrap();
        assert_eq!(
            catalog.delete_group("platform"),
            Err(CatalogError::GroupNotFound("platform".to_string()))
        );
    }

    #[test]
    fn test_delete_collection_requires_membership() {
        let mut catalog = catalog_with_eng();
        catalog.create_group("design", vec![], "pink").unwrap();

        assert_eq!(
            catalog.delete_collection("design", "rust"),
            Err(CatalogError::NotInGroup {
                collection: "rust".to_string(),
                group: "design".to_string(),
            })
        );
        assert_eq!(
            catalog.delete_collection("nobody", "rust"),
            Err(CatalogError::GroupNotFound("nobody".to_string()))
        );

        catalog.delete_collection("eng", "rust").unwrap();
        assert!(catalog.get_collection("rust").is_none());
    }

    #[test]
    fn test_rename_collection() {
        let mut catalog = catalog_with_eng();
        catalog.rename_collection("rust", "rustlang").unwrap();
        assert!(catalog.get_collection("rustlang").is_some());
        assert_eq!(
            catalog.rename_collection("rust", "x"),
            Err(CatalogError::CollectionNotFound("rust".to_string()))
        );
    }

    #[test]
    fn test_snippet_lifecycle() {
        let mut catalog = catalog_with_eng();
        let snippet = CodeSnippet::new("hello", "alice");

        catalog
            .create_snippet("eng", "rust", snippet.clone())
            .unwrap();
        assert_eq!(
            catalog.create_snippet("eng", "rust", snippet),
            Err(CatalogError::SnippetExists {
                snippet: "hello".to_string(),
                collection: "rust".to_string(),
            })
        );
        assert_eq!(
            catalog.create_snippet("eng", "go", CodeSnippet::new("x", "alice")),
            Err(CatalogError::CollectionNotFound("go".to_string()))
        );

        catalog.delete_snippet("eng", "rust", "hello").unwrap();
        let err = catalog.delete_snippet("eng", "rust", "hello").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error: Snippet 'hello' not found in collection 'rust'."
        );
    }

    #[test]
    fn test_refresh_writes_local_state() {
        let catalog = catalog_with_eng();
        let state = AppState::new();

        catalog.refresh(&state);

        assert_eq!(state.groups(), catalog.get_groups());
        assert_eq!(state.collections().len(), 1);
    }
}
