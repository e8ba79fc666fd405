//! Trait abstraction for the controller link to enable testing

use async_trait::async_trait;
use std::io;

/// Outbound side of the connection to the BMS controller
///
/// Inbound bytes are pushed into a [`LineBuffer`](crate::wire::LineBuffer)
/// by the link's own reader; callers only write and close.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Link: Send + Sync {
    /// Write all bytes and flush them to the controller
    async fn write(&self, data: &[u8]) -> io::Result<()>;

    /// Release the port; calling it again has no effect
    async fn close(&self);

    /// Whether `close` has been called
    fn is_closed(&self) -> bool;
}

/// Error returned by writes on a closed link
pub(crate) fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "link is closed")
}
