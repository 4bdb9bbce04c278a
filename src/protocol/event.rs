//! Events delivered from the inbound loop to the application.

// ============================================================================
// Imports
// ============================================================================

use bytes::Bytes;

use super::close::CloseInfo;

// ============================================================================
// ChannelEvent
// ============================================================================

/// Notification pushed by the inbound loop onto the channel's event queue.
///
/// At most one of [`PeerClosed`](Self::PeerClosed) or
/// [`Error`](Self::Error) is delivered per channel, and never after a
/// local close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Payload of a text or binary data frame.
    Message(Bytes),

    /// The peer ended the channel (going away, abnormal or unexpected normal
    /// closure).
    PeerClosed(CloseInfo),

    /// The transport failed while the channel was open.
    Error {
        /// Description of the transport failure.
        message: String,
    },
}

impl ChannelEvent {
    /// Returns the payload if this is a data event.
    #[inline]
    #[must_use]
    pub fn as_message(&self) -> Option<&Bytes> {
        match self {
            Self::Message(payload) => Some(payload),
            _ => None,
        }
    }

    /// Returns `true` if this event ends the channel.
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Message(_))
    }
}

// ============================================================================
// Tests
// ============================================================================
