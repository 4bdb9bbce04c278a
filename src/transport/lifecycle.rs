//! One-shot lifecycle token.
//!
//! [`Lifecycle`] is handed to the application by
//! [`Channel::establish`](crate::Channel::establish). It resolves exactly once,
//! carrying the [`Termination`] reason; later resolutions are dropped.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use tokio::sync::watch;

use crate::protocol::CloseInfo;

// ============================================================================
// Termination
// ============================================================================

/// Why a channel ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The application called `close`.
    ClosedLocally,
    /// The peer sent a close frame or dropped the connection.
    ClosedByPeer(CloseInfo),
    /// The transport failed.
    ClosedAbnormally {
        /// Description of the failure.
        reason: String,
    },
}

impl Termination {
    /// Returns `true` unless the application asked for the close.
    #[inline]
    #[must_use]
    pub fn is_unexpected(&self) -> bool {
        !matches!(self, Self::ClosedLocally)
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClosedLocally => f.write_str("closed locally"),
            Self::ClosedByPeer(info) => write!(f, "closed by peer ({info})"),
            Self::ClosedAbnormally { reason } => write!(f, "closed abnormally: {reason}"),
        }
    }
}

// ============================================================================
// LifecycleSignal
// ============================================================================

/// Owning side of the lifecycle token.
#[derive(Debug)]
pub(crate) struct LifecycleSignal {
    tx: watch::Sender<Option<Termination>>,
}

impl LifecycleSignal {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Resolves the token. Returns `false` if it was already resolved.
    pub(crate) fn resolve(&self, termination: Termination) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(termination);
            true
        })
    }

    /// Returns a new observer of this signal.
    pub(crate) fn subscribe(&self) -> Lifecycle {
        Lifecycle {
            rx: self.tx.subscribe(),
        }
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Observer of a channel's lifetime.
///
/// Cloneable; every clone sees the same single resolution.
///
/// # Example
///
/// ```ignore
/// let lifecycle = channel.establish(&url, &spec).await?;
/// let termination = lifecycle.done().await;
/// if termination.is_unexpected() {
///     tracing::warn!(%termination, "lost the game server");
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Lifecycle {
    rx: watch::Receiver<Option<Termination>>,
}

impl Lifecycle {
    /// Returns `true` once the channel has ended.
    #[inline]
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// Returns the termination reason, if the channel has ended.
    #[must_use]
    pub fn termination(&self) -> Option<Termination> {
        self.rx.borrow().clone()
    }

    /// Waits until the channel ends and returns the reason.
    ///
    /// If the channel is dropped without ever resolving, the result is
    /// [`Termination::ClosedAbnormally`].
    pub async fn done(&self) -> Termination {
        let mut rx = self.rx.clone();
        let resolved = match rx.wait_for(Option::is_some).await {
            Ok(termination) => termination.clone(),
            Err(_) => None,
        };
        resolved.unwrap_or_else(|| Termination::ClosedAbnormally {
            reason: "channel dropped".to_string(),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
