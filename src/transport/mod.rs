//! WebSocket transport layer.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐                        ┌──────────────────┐
//! │  Channel (client)    │       WebSocket        │   Game server    │
//! │                      │                        │                  │
//! │  send() ── writer ───┼───────────────────────►│                  │
//! │  events ◄─ inbound ──┼◄───────────────────────┤                  │
//! │           task       │  X-Player-Specs: {..}  │                  │
//! └──────────────────────┘                        └──────────────────┘
//! ```
//!
//! # Channel Lifecycle
//!
//! 1. `Channel::new` - Idle channel plus event receiver
//! 2. `Channel::establish` - Handshake with identification header, spawn inbound task
//! 3. `Channel::send` - Serialized writes from any task
//! 4. `Channel::close` / peer close / transport error - [`Lifecycle`] resolves once
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `channel` | Channel and inbound loop |
//! | `handshake` | Identification header and dialing |
//! | `lifecycle` | One-shot termination token |
//! | `state` | Atomic state machine |

// ============================================================================
// Submodules
// ============================================================================

/// Channel and inbound loop.
pub mod channel;

/// Identification header and dialing.
pub(crate) mod handshake;

/// One-shot termination token.
pub mod lifecycle;

/// Atomic state machine.
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use channel::{Channel, EventReceiver};
pub use lifecycle::{Lifecycle, Termination};
pub use state::ChannelState;
