//! Transport abstraction used by the stream session

use std::sync::Arc;

use crate::error::NetworkError;

/// Callback invoked on the network context for every arriving datagram.
pub type DatagramHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// An open connection (sender) or listening endpoint (receiver).
pub trait Transport: Send + Sync {
    /// Send one datagram. Listening endpoints reject this.
    fn send(&self, datagram: &[u8]) -> Result<(), NetworkError>;

    /// Stop sending and receiving. Once this returns the datagram handler is
    /// not invoked again. Idempotent.
    fn close(&self);

    fn is_closed(&self) -> bool;

    /// Human-readable endpoint, for logs
    fn describe(&self) -> String;
}

/// Opens transports. Failures here are the session's connection errors.
pub trait Connector: Send + Sync {
    fn connect(&self, host: &str, port: u16) -> Result<Box<dyn Transport>, NetworkError>;

    fn listen(
        &self,
        port: u16,
        handler: DatagramHandler,
    ) -> Result<Box<dyn Transport>, NetworkError>;
}
