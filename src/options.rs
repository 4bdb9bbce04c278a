//! Channel configuration.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use arena_talk::ChannelOptions;
//!
//! let options = ChannelOptions::new()
//!     .with_event_capacity(256)
//!     .with_connect_timeout(Duration::from_secs(5))
//!     .with_close_timeout(Duration::from_secs(2));
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::borrow::Cow;
use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Header carrying the serialized identification value.
pub const DEFAULT_IDENTIFICATION_HEADER: &str = "X-Player-Specs";

/// Default capacity of the inbound event queue.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

// ============================================================================
// ChannelOptions
// ============================================================================

/// Configuration for a [`Channel`](crate::Channel).
///
/// No timeouts are applied by default: a blocked handshake or a missing
/// close echo waits until the transport itself gives up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOptions {
    /// Name of the request header carrying the identification value.
    pub identification_header: Cow<'static, str>,

    /// Capacity of the bounded event queue drained by the application.
    pub event_capacity: usize,

    /// Maximum time to wait for the WebSocket handshake.
    pub connect_timeout: Option<Duration>,

    /// Maximum time to wait for the peer's close echo after a local close.
    pub close_timeout: Option<Duration>,
}

// ============================================================================
// Constructors
// ============================================================================

impl ChannelOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            identification_header: Cow::Borrowed(DEFAULT_IDENTIFICATION_HEADER),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            connect_timeout: None,
            close_timeout: None,
        }
    }
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ChannelOptions {
    /// Sets the identification header name.
    #[inline]
    #[must_use]
    pub fn with_identification_header(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.identification_header = name.into();
        self
    }

    /// Sets the event queue capacity.
    ///
    /// A capacity of zero is raised to one.
    #[inline]
    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Sets the handshake timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets the close echo timeout.
    #[inline]
    #[must_use]
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = Some(timeout);
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
