//! Physical-link seam.
//!
//! The engine never owns a socket or a radio. Whatever carries the bytes
//! (BLE GATT, a TCP adapter, a test double) implements [`Transport`]; the
//! engine hands it fully formed CR-terminated command lines and receives
//! raw notification bytes back through
//! [`ObdEngine::handle_notification`](crate::ObdEngine::handle_notification).

use std::fmt;

/// Outbound half of the physical link.
pub trait Transport: Send + Sync {
    /// Write one command line (already CR-terminated) to the link.
    ///
    /// # Errors
    ///
    /// Returns an error when the link is down or the write fails. The
    /// engine logs and drops the line; recovery is driven by the
    /// transport's disconnect event, not by the write error.
    fn write(&self, line: &str) -> Result<(), TransportError>;
}

/// Errors from a [`Transport`] write.
#[derive(Debug, Clone)]
pub enum TransportError {
    /// No physical link is currently attached.
    NotConnected,
    /// The underlying link failed mid-write.
    Io(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "not connected to adapter"),
            Self::Io(e) => write!(f, "transport write failed: {e}"),
        }
    }
}

impl std::error::Error for TransportError {}
