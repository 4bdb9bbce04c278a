//! Close-code classification.
//!
//! A WebSocket close frame carries a numeric status code. The inbound loop
//! reduces it to a [`CloseKind`] and, together with whether the channel was
//! still open when the frame arrived, to a [`CloseVerdict`].
//!
//! | Kind | Channel open | Channel closing locally |
//! |------|--------------|-------------------------|
//! | `GoingAway` (1001) | `PeerClosed` | `Ignored` |
//! | `Abnormal` (1006) | `PeerClosed` | `Ignored` |
//! | `Normal` (1000) | `PeerClosed` | `LocalEcho` |
//! | `Other(_)` | `Unexplained` | `Ignored` |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use tokio_tungstenite::tungstenite::protocol::CloseFrame;

// ============================================================================
// Constants
// ============================================================================

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// Endpoint is going away (server shutdown, page navigation).
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Close frame carried no status code.
pub const CLOSE_NO_STATUS: u16 = 1005;

/// Connection dropped without a close frame. Never sent on the wire.
pub const CLOSE_ABNORMAL: u16 = 1006;

// ============================================================================
// CloseKind
// ============================================================================

/// Classification bucket of a close status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseKind {
    /// 1000.
    Normal,
    /// 1001.
    GoingAway,
    /// 1006.
    Abnormal,
    /// Anything else.
    Other(u16),
}

impl From<u16> for CloseKind {
    fn from(code: u16) -> Self {
        match code {
            CLOSE_NORMAL => Self::Normal,
            CLOSE_GOING_AWAY => Self::GoingAway,
            CLOSE_ABNORMAL => Self::Abnormal,
            other => Self::Other(other),
        }
    }
}

// ============================================================================
// CloseVerdict
// ============================================================================

/// What the inbound loop does with a close frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseVerdict {
    /// The peer ended the channel; notify the application.
    PeerClosed,
    /// Echo of our own close frame; nothing to report.
    LocalEcho,
    /// Channel ended with an unrecognized code; resolve the lifecycle only.
    Unexplained,
    /// Close arrived while a local close was already under way.
    Ignored,
}

/// Classifies a close frame.
///
/// `was_open` must be the outcome of the state transition away from `Open`
/// performed when the frame was observed, not an earlier read of the state.
#[must_use]
pub const fn classify(kind: CloseKind, was_open: bool) -> CloseVerdict {
    match (kind, was_open) {
        (CloseKind::GoingAway | CloseKind::Abnormal | CloseKind::Normal, true) => {
            CloseVerdict::PeerClosed
        }
        (CloseKind::Other(_), true) => CloseVerdict::Unexplained,
        (CloseKind::Normal, false) => CloseVerdict::LocalEcho,
        (_, false) => CloseVerdict::Ignored,
    }
}

// ============================================================================
// CloseInfo
// ============================================================================

/// Status code and reason of a finished channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// Numeric close code.
    pub code: u16,
    /// Human-readable reason sent by the peer (may be empty).
    pub reason: String,
}

impl CloseInfo {
    /// Creates close info from a code and reason.
    #[inline]
    #[must_use]
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Close info for a connection that dropped without a close frame.
    #[inline]
    #[must_use]
    pub fn abnormal() -> Self {
        Self::new(CLOSE_ABNORMAL, "")
    }

    /// Builds close info from a received close frame.
    ///
    /// A frame without a payload maps to 1005 (no status).
    #[must_use]
    pub fn from_frame(frame: Option<CloseFrame>) -> Self {
        match frame {
            Some(frame) => Self::new(frame.code.into(), frame.reason.as_str()),
            None => Self::new(CLOSE_NO_STATUS, ""),
        }
    }

    /// Returns the classification bucket of the code.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> CloseKind {
        CloseKind::from(self.code)
    }
}

impl fmt::Display for CloseInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.reason)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
