//! Wire-level message types.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `close` | Close codes and their classification |
//! | `event` | Events delivered to the application |

// ============================================================================
// Submodules
// ============================================================================

/// Close codes and their classification.
pub mod close;

/// Events delivered to the application.
pub mod event;

// ============================================================================
// Re-exports
// ============================================================================

pub use close::{CloseInfo, CloseKind, CloseVerdict, classify};
pub use event::ChannelEvent;
