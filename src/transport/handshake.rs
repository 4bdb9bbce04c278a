//! Client handshake.
//!
//! Serializes the identification value into a request header and dials the
//! server. Everything that can fail without touching the network is checked
//! before the socket is opened.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde::Serialize;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Types
// ============================================================================

/// WebSocket stream produced by a client handshake.
pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ============================================================================
// Header
// ============================================================================

/// Serializes the identification value as JSON for the handshake header.
///
/// # Errors
///
/// Returns [`Error::Identification`] if serialization fails or the JSON is
/// not a valid header value.
pub(crate) fn identification_header<I>(identification: &I) -> Result<(String, HeaderValue)>
where
    I: Serialize + ?Sized,
{
    let json = serde_json::to_string(identification)
        .map_err(|e| Error::identification(e.to_string()))?;
    let value = HeaderValue::from_bytes(json.as_bytes())
        .map_err(|e| Error::identification(format!("not a valid header value: {e}")))?;
    Ok((json, value))
}

/// Builds the upgrade request for `target`.
///
/// # Errors
///
/// - [`Error::Config`] if `header_name` is not a valid header name
/// - [`Error::Connection`] if `target` is not a WebSocket URL
pub(crate) fn build_request(target: &Url, header_name: &str, value: HeaderValue) -> Result<Request> {
    if !matches!(target.scheme(), "ws" | "wss") {
        return Err(Error::connection(format!(
            "unsupported scheme {:?} in {target}",
            target.scheme()
        )));
    }

    let name = HeaderName::from_bytes(header_name.as_bytes())
        .map_err(|e| Error::config(format!("invalid header name {header_name:?}: {e}")))?;

    let mut request = target
        .as_str()
        .into_client_request()
        .map_err(|e| Error::connection(format!("invalid target {target}: {e}")))?;
    request.headers_mut().insert(name, value);

    Ok(request)
}

// ============================================================================
// Dial
// ============================================================================

/// Performs the WebSocket handshake.
///
/// # Errors
///
/// - [`Error::Connection`] if the server cannot be reached or rejects the upgrade
/// - [`Error::ConnectionTimeout`] if `connect_timeout` elapses first
pub(crate) async fn dial(request: Request, connect_timeout: Option<Duration>) -> Result<WsStream> {
    let uri = request.uri().to_string();
    let handshake = tokio_tungstenite::connect_async(request);

    let result = match connect_timeout {
        Some(limit) => timeout(limit, handshake)
            .await
            .map_err(|_| Error::connection_timeout(millis(limit)))?,
        None => handshake.await,
    };

    let (ws_stream, response) =
        result.map_err(|e| Error::connection(format!("dialing {uri}: {e}")))?;

    debug!(%uri, status = %response.status(), "WebSocket handshake completed");

    Ok(ws_stream)
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Tests
// ============================================================================
