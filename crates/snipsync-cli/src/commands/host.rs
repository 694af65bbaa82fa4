//! Line commands accepted while hosting a session
//!
//! Each line edits the catalog; the caller refreshes the local state
//! afterwards, which is what replicates the change to joiners.

use snipsync_core::{Catalog, CatalogError, CodeSnippet};

pub const HELP: &str = "\
Commands:
  group add <name> [color]
  group rm <name>
  group rename <name> <new-name>
  collection add <name> <group> [color]
  collection rm <group> <name>
  collection rename <name> <new-name>
  snippet add <group> <collection> <name> [description...]
  snippet rm <group> <collection> <name>
  show
  help
  quit";

const DEFAULT_COLOR: &str = "blue";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCommand {
    AddGroup {
        name: String,
        color: String,
    },
    RemoveGroup {
        name: String,
    },
    RenameGroup {
        name: String,
        new_name: String,
    },
    AddCollection {
        name: String,
        group: String,
        color: String,
    },
    RemoveCollection {
        group: String,
        name: String,
    },
    RenameCollection {
        name: String,
        new_name: String,
    },
    AddSnippet {
        group: String,
        collection: String,
        name: String,
        description: String,
    },
    RemoveSnippet {
        group: String,
        collection: String,
        name: String,
    },
    Show,
    Help,
    Quit,
}

/// Parse one input line
pub fn parse(line: &str) -> Result<HostCommand, String> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let owned = |i: usize| words[i].to_string();
    let color = |i: usize| {
        words
            .get(i)
            .map(|c| c.to_string())
            .unwrap_or_else(|| DEFAULT_COLOR.to_string())
    };

    let command = match words.as_slice() {
        ["group", "add", _] | ["group", "add", _, _] => HostCommand::AddGroup {
            name: owned(2),
            color: color(3),
        },
        ["group", "rm", _] => HostCommand::RemoveGroup { name: owned(2) },
        ["group", "rename", _, _] => HostCommand::RenameGroup {
            name: owned(2),
            new_name: owned(3),
        },
        ["collection", "add", _, _] | ["collection", "add", _, _, _] => {
            HostCommand::AddCollection {
                name: owned(2),
                group: owned(3),
                color: color(4),
            }
        }
        ["collection", "rm", _, _] => HostCommand::RemoveCollection {
            group: owned(2),
            name: owned(3),
        },
        ["collection", "rename", _, _] => HostCommand::RenameCollection {
            name: owned(2),
            new_name: owned(3),
        },
        ["snippet", "add", _, _, _, rest @ ..] => HostCommand::AddSnippet {
            group: owned(2),
            collection: owned(3),
            name: owned(4),
            description: rest.join(" "),
        },
        ["snippet", "rm", _, _, _] => HostCommand::RemoveSnippet {
            group: owned(2),
            collection: owned(3),
            name: owned(4),
        },
        ["show"] | ["ls"] => HostCommand::Show,
        ["help"] | ["?"] => HostCommand::Help,
        ["quit"] | ["exit"] => HostCommand::Quit,
        [] => return Err("Empty command. Type 'help' for commands.".to_string()),
        _ => return Err(format!("Unknown command: '{}'. Type 'help' for commands.", line.trim())),
    };
    Ok(command)
}

/// Apply an editing command to the catalog
///
/// Returns a confirmation message. `Show`, `Help` and `Quit` leave the
/// catalog untouched.
pub fn apply(catalog: &mut Catalog, command: HostCommand, author: &str) -> Result<String, CatalogError> {
    let message = match command {
        HostCommand::AddGroup { name, color } => {
            catalog.create_group(&name, vec![author.to_string()], &color)?;
            format!("Group '{}' created", name)
        }
        HostCommand::RemoveGroup { name } => {
            catalog.delete_group(&name)?;
            format!("Group '{}' deleted", name)
        }
        HostCommand::RenameGroup { name, new_name } => {
            catalog.rename_group(&name, &new_name)?;
            format!("Group '{}' renamed to '{}'", name, new_name)
        }
        HostCommand::AddCollection { name, group, color } => {
            let group = catalog
                .get_group(&group)
                .ok_or(CatalogError::GroupNotFound(group))?;
            catalog.create_collection(&name, vec![group], Vec::new(), &color)?;
            format!("Collection '{}' created", name)
        }
        HostCommand::RemoveCollection { group, name } => {
            catalog.delete_collection(&group, &name)?;
            format!("Collection '{}' deleted", name)
        }
        HostCommand::RenameCollection { name, new_name } => {
            catalog.rename_collection(&name, &new_name)?;
            format!("Collection '{}' renamed to '{}'", name, new_name)
        }
        HostCommand::AddSnippet {
            group,
            collection,
            name,
            description,
        } => {
            let snippet = CodeSnippet::new(&name, author).with_description(description);
            catalog.create_snippet(&group, &collection, snippet)?;
            format!("Snippet '{}' added to '{}'", name, collection)
        }
        HostCommand::RemoveSnippet {
            group,
            collection,
            name,
        } => {
            catalog.delete_snippet(&group, &collection, &name)?;
            format!("Snippet '{}' removed from '{}'", name, collection)
        }
        HostCommand::Show | HostCommand::Help | HostCommand::Quit => String::new(),
    };
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_group_commands() {
        assert_eq!(
            parse("group add eng"),
            Ok(HostCommand::AddGroup {
                name: "eng".to_string(),
                color: "blue".to_string()
            })
        );
        assert_eq!(
            parse("  group rename eng platform "),
            Ok(HostCommand::RenameGroup {
                name: "eng".to_string(),
                new_name: "platform".to_string()
            })
        );
    }

    #[test]
    fn test_parse_snippet_description_keeps_spaces() {
        assert_eq!(
            parse("snippet add eng rust hello prints hello world"),
            Ok(HostCommand::AddSnippet {
                group: "eng".to_string(),
                collection: "rust".to_string(),
                name: "hello".to_string(),
                description: "prints hello world".to_string(),
            })
        );
    }

    #[test]
    fn test_parse_rejects_unknown_and_incomplete() {
        assert!(parse("").is_err());
        assert!(parse("group add").is_err());
        assert!(parse("dance").is_err());
        assert_eq!(parse("quit"), Ok(HostCommand::Quit));
    }

    #[test]
    fn test_apply_builds_catalog() {
        let mut catalog = Catalog::new();

        apply(&mut catalog, parse("group add eng green").unwrap(), "alice").unwrap();
        apply(&mut catalog, parse("collection add rust eng").unwrap(), "alice").unwrap();
        apply(
            &mut catalog,
            parse("snippet add eng rust hello says hi").unwrap(),
            "alice",
        )
        .unwrap();

        let group = catalog.get_group("eng").unwrap();
        assert_eq!(group.color, "green");
        assert_eq!(group.members, vec!["alice"]);

        let rust = catalog.get_collection("rust").unwrap();
        assert!(rust.belongs_to("eng"));
        assert_eq!(rust.snippet("hello").map(|s| s.updated_by.as_str()), Some("alice"));
    }

    #[test]
    fn test_apply_reports_catalog_errors() {
        let mut catalog = Catalog::new();

        let err = apply(&mut catalog, parse("collection add rust eng").unwrap(), "alice")
            .unwrap_err();
        assert_eq!(err, CatalogError::GroupNotFound("eng".to_string()));
        assert!(catalog.get_collections().is_empty());
    }
}
