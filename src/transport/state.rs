//! Channel state machine.
//!
//! ```text
//! Idle ──► Connecting ──► Open ──┬──► ClosingLocal ──► ClosedLocally
//!   ▲           │                ├──► ClosedByPeer
//!   └───────────┘ (dial failed)  └──► ClosedAbnormally
//! ```
//!
//! Every transition is a compare-and-swap on a single atomic, so the write
//! path, `close` and the inbound loop agree on who moved the channel out of
//! `Open`.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

// ============================================================================
// ChannelState
// ============================================================================

/// Lifecycle state of a [`Channel`](crate::Channel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ChannelState {
    /// Constructed, not connected yet.
    #[default]
    Idle = 0,
    /// Handshake in progress.
    Connecting = 1,
    /// Connected; sends allowed.
    Open = 2,
    /// `close` was called; waiting for the peer's echo.
    ClosingLocal = 3,
    /// Local close finished.
    ClosedLocally = 4,
    /// The peer ended the channel.
    ClosedByPeer = 5,
    /// The transport failed.
    ClosedAbnormally = 6,
}

impl ChannelState {
    /// Returns `true` only for [`ChannelState::Open`].
    #[inline]
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Returns `true` if no further transition is possible.
    #[inline]
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ClosedLocally | Self::ClosedByPeer | Self::ClosedAbnormally
        )
    }

    /// Returns `true` once a connection was bound, whatever happened since.
    #[inline]
    #[must_use]
    pub const fn was_established(&self) -> bool {
        !matches!(self, Self::Idle | Self::Connecting)
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Connecting,
            2 => Self::Open,
            3 => Self::ClosingLocal,
            4 => Self::ClosedLocally,
            5 => Self::ClosedByPeer,
            _ => Self::ClosedAbnormally,
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Connecting => "Connecting",
            Self::Open => "Open",
            Self::ClosingLocal => "ClosingLocal",
            Self::ClosedLocally => "ClosedLocally",
            Self::ClosedByPeer => "ClosedByPeer",
            Self::ClosedAbnormally => "ClosedAbnormally",
        };
        f.write_str(name)
    }
}

// ============================================================================
// AtomicState
// ============================================================================

/// [`ChannelState`] stored in one atomic byte.
#[derive(Debug, Default)]
pub(crate) struct AtomicState(AtomicU8);

impl AtomicState {
    /// Creates a state cell in [`ChannelState::Idle`].
    pub(crate) const fn new() -> Self {
        Self(AtomicU8::new(ChannelState::Idle as u8))
    }

    /// Returns the current state.
    #[inline]
    pub(crate) fn load(&self) -> ChannelState {
        ChannelState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Moves from `from` to `to`. Returns `false` if the state was not `from`.
    #[inline]
    pub(crate) fn transition(&self, from: ChannelState, to: ChannelState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

// ============================================================================
// Tests
// ============================================================================
