//! arena-talk - WebSocket talker for autonomous game clients.
//!
//! This library manages the single persistent WebSocket connection between
//! a bot (player) and a game server.
//!
//! # Architecture
//!
//! - **Establish**: handshake with the player's identification serialized
//!   as JSON into the `X-Player-Specs` header
//! - **Send**: raw payloads written as frames, one writer at a time
//! - **Receive**: one background task per channel pushes events onto a
//!   bounded queue
//! - **Terminate**: close frames are classified so the application can tell
//!   "I closed it" from "the server went away" from "the network broke"
//!
//! # Quick Start
//!
//! ```no_run
//! use arena_talk::{Channel, ChannelEvent, ChannelOptions, Result};
//! use serde::Serialize;
//! use url::Url;
//!
//! #[derive(Serialize)]
//! struct PlayerSpec {
//!     number: String,
//!     team: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let url = Url::parse("ws://localhost:8917/announce").expect("valid url");
//!     let spec = PlayerSpec {
//!         number: "10".into(),
//!         team: "home".into(),
//!     };
//!
//!     let (channel, mut events) = Channel::new(ChannelOptions::default());
//!     let lifecycle = channel.establish(&url, &spec).await?;
//!
//!     channel.send(r#"{"type":"ready"}"#).await?;
//!
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             ChannelEvent::Message(payload) => println!("{} bytes", payload.len()),
//!             _ => break,
//!         }
//!     }
//!
//!     println!("channel ended: {}", lifecycle.done().await);
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`options`] | Channel configuration |
//! | [`protocol`] | Close codes and events |
//! | [`talker`] | Object-safe [`Talker`] trait |
//! | [`transport`] | [`Channel`], [`Lifecycle`] and state machine |

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Channel configuration.
pub mod options;

/// Close codes and events delivered to the application.
pub mod protocol;

/// Object-safe facade over [`Channel`].
pub mod talker;

/// WebSocket transport layer.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::ChannelId;

// Configuration
pub use options::ChannelOptions;

// Protocol types
pub use protocol::{ChannelEvent, CloseInfo, CloseKind};

// Transport types
pub use talker::Talker;
pub use transport::{Channel, ChannelState, EventReceiver, Lifecycle, Termination};
