//! Object-safe facade over [`Channel`].
//!
//! Game logic that only needs connect/send/close can hold a
//! `Box<dyn Talker<Spec>>` and be driven by a test double instead of a real
//! server.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use serde::Serialize;
use url::Url;

use crate::error::Result;
use crate::transport::{Channel, Lifecycle};

// ============================================================================
// Talker
// ============================================================================

/// Connects to a game server and exchanges raw messages with it.
///
/// `I` is the identification value sent in the handshake header.
#[async_trait]
pub trait Talker<I>: Send + Sync
where
    I: Serialize + Sync + ?Sized,
{
    /// Connects and returns the lifecycle of the connection.
    async fn connect(&self, target: &Url, identification: &I) -> Result<Lifecycle>;

    /// Sends a text payload.
    async fn send(&self, data: Vec<u8>) -> Result<()>;

    /// Closes the connection.
    async fn close(&self) -> Result<()>;
}

#[async_trait]
impl<I> Talker<I> for Channel
where
    I: Serialize + Sync + ?Sized,
{
    async fn connect(&self, target: &Url, identification: &I) -> Result<Lifecycle> {
        self.establish(target, identification).await
    }

    async fn send(&self, data: Vec<u8>) -> Result<()> {
        Channel::send(self, data).await
    }

    async fn close(&self) -> Result<()> {
        Channel::close(self).await
    }
}

// ============================================================================
// Tests
// ============================================================================
