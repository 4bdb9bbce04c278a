//! Error types for arena-talk.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use arena_talk::{Channel, ChannelOptions, Result};
//!
//! async fn example(channel: &Channel) -> Result<()> {
//!     channel.send(r#"{"type":"ping"}"#).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Setup | [`Error::Identification`], [`Error::Connection`], [`Error::ConnectionTimeout`] |
//! | Lifecycle | [`Error::AlreadyEstablished`], [`Error::NotOpen`] |
//! | Outbound | [`Error::InvalidPayload`] |
//! | External | [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::transport::ChannelState;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when channel options cannot be applied (e.g. an invalid
    /// header name).
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Setup Errors
    // ========================================================================
    /// Identification value could not be turned into a header.
    ///
    /// Returned before any network I/O takes place.
    #[error("Failed to build the identification header: {message}")]
    Identification {
        /// Description of the serialization failure.
        message: String,
    },

    /// WebSocket handshake failed.
    ///
    /// Returned when the server cannot be dialed or rejects the upgrade.
    #[error("Failed to dial the server: {message}")]
    Connection {
        /// Description of the dial failure.
        message: String,
    },

    /// Handshake did not complete within the configured timeout.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// The channel was already used.
    ///
    /// A channel establishes at most one connection.
    #[error("Channel already established (state: {state})")]
    AlreadyEstablished {
        /// State the channel was in when establish was called.
        state: ChannelState,
    },

    /// The channel is not open.
    ///
    /// Returned by send operations before establish or after termination.
    #[error("Channel not open (state: {state})")]
    NotOpen {
        /// State the channel was in when the operation was attempted.
        state: ChannelState,
    },

    // ========================================================================
    // Outbound Errors
    // ========================================================================
    /// Payload cannot be carried by the requested frame type.
    #[error("Invalid payload: {message}")]
    InvalidPayload {
        /// Description of the payload problem.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an identification error.
    #[inline]
    pub fn identification(message: impl Into<String>) -> Self {
        Self::Identification {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates an already established error.
    #[inline]
    pub fn already_established(state: ChannelState) -> Self {
        Self::AlreadyEstablished { state }
    }

    /// Creates a not open error.
    #[inline]
    pub fn not_open(state: ChannelState) -> Self {
        Self::NotOpen { state }
    }

    /// Creates an invalid payload error.
    #[inline]
    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::InvalidPayload {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ConnectionTimeout { .. })
    }

    /// Returns `true` if this error happened while setting the channel up.
    ///
    /// Setup errors leave the channel idle; no background task is running.
    #[inline]
    #[must_use]
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            Self::Config { .. }
                | Self::Identification { .. }
                | Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::NotOpen { .. }
                | Self::WebSocket(_)
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
