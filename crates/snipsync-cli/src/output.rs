//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use std::net::SocketAddr;

use snipsync_core::sync::RelayStats;
use snipsync_core::{CollaborationSession, Collection, Group, Role, TransportEvent};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Print the session this instance is part of
    pub fn print_session(&self, session: &CollaborationSession) {
        match self.format {
            OutputFormat::Human => match session.role() {
                Role::Creator => {
                    println!("Hosting session {}", session.session_id());
                    println!("Others can join with:");
                    println!("  snipsync join {}", session.session_id());
                    println!("Type 'help' for commands.");
                }
                Role::Joiner => {
                    println!("Joined session {} (read-only)", session.session_id());
                }
            },
            OutputFormat::Json => {
                println!("{}", serde_json::json!({ "session": session }));
            }
            OutputFormat::Quiet => {
                println!("{}", session.session_id());
            }
        }
    }

    /// Print groups and collections
    pub fn print_state(&self, groups: &[Group], collections: &[Collection]) {
        match self.format {
            OutputFormat::Human => {
                println!("── Groups ({}) ──", groups.len());
                for group in groups {
                    if group.members.is_empty() {
                        println!("  {} [{}]", group.name, group.color);
                    } else {
                        println!(
                            "  {} [{}] members: {}",
                            group.name,
                            group.color,
                            group.members.join(", ")
                        );
                    }
                }

                println!("── Collections ({}) ──", collections.len());
                for collection in collections {
                    let group_names: Vec<&str> =
                        collection.groups.iter().map(|g| g.name.as_str()).collect();
                    println!(
                        "  {} [{}] groups: {}",
                        collection.name,
                        collection.color,
                        group_names.join(", ")
                    );
                    for snippet in &collection.snippets {
                        println!(
                            "    - {} ({} file(s), {}) {}",
                            snippet.name,
                            snippet.files.len(),
                            snippet.updated_by,
                            truncate(&snippet.description, 40)
                        );
                    }
                }
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({ "groups": groups, "collections": collections })
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print a transport event
    pub fn print_event(&self, event: &TransportEvent) {
        let (kind, detail) = match event {
            TransportEvent::Connectivity(true) => ("connected", String::new()),
            TransportEvent::Connectivity(false) => ("disconnected", String::new()),
            TransportEvent::SyncCompleted(synced) => ("synced", synced.to_string()),
            TransportEvent::PeerJoined(peer) => ("peer-joined", peer.clone()),
            TransportEvent::PeerLeft(peer) => ("peer-left", peer.clone()),
        };

        match self.format {
            OutputFormat::Human => match event {
                TransportEvent::Connectivity(true) => println!("● Connected to relay"),
                TransportEvent::Connectivity(false) => println!("○ Disconnected from relay"),
                TransportEvent::SyncCompleted(_) => println!("✓ Initial sync complete"),
                TransportEvent::PeerJoined(peer) => println!("+ {} joined", peer),
                TransportEvent::PeerLeft(peer) => println!("- {} left", peer),
            },
            OutputFormat::Json => {
                println!("{}", serde_json::json!({ "event": kind, "detail": detail }));
            }
            OutputFormat::Quiet => {}
        }
    }

    pub fn print_relay_started(&self, addr: SocketAddr) {
        match self.format {
            OutputFormat::Human => println!("Relay listening on ws://{}", addr),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({ "listening": addr.to_string() }));
            }
            OutputFormat::Quiet => println!("{}", addr),
        }
    }

    pub fn print_relay_stats(&self, stats: &RelayStats) {
        match self.format {
            OutputFormat::Human => {
                println!("Connections: {}", stats.total_connections);
                println!("Forwarded:   {}", stats.forwarded_messages);
                println!("Evicted:     {}", stats.evicted_peers);
                println!(
                    "Active:      {} peer(s) in {} session(s)",
                    stats.active_peers, stats.active_sessions
                );
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({
                        "total_connections": stats.total_connections,
                        "forwarded_messages": stats.forwarded_messages,
                        "evicted_peers": stats.evicted_peers,
                        "active_peers": stats.active_peers,
                        "active_sessions": stats.active_sessions,
                    })
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print a failed command without ending the session
    pub fn error(&self, message: &str) {
        match self.format {
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "error", "message": message})
                );
            }
            _ => eprintln!("{}", message),
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

/// Truncate a string to max characters, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
