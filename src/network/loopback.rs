//! In-process transport
//!
//! Listeners register a handler under a port; senders connected to that port
//! invoke it synchronously on their own thread. Connecting to a port nobody
//! listens on fails, which stands in for an unreachable address.

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::NetworkError;
use crate::network::transport::{Connector, DatagramHandler, Transport};

/// Shared registry of in-process listeners. Clones share the registry.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    listeners: Arc<DashMap<u16, DatagramHandler>>,
    delivered: Arc<AtomicU64>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_listening(&self, port: u16) -> bool {
        self.listeners.contains_key(&port)
    }

    /// Datagrams handed to a listener so far
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Inject a raw datagram as if it arrived on `port`. Returns false if
    /// nobody listens there.
    pub fn inject(&self, port: u16, datagram: &[u8]) -> bool {
        // Clone the handler out so the shard lock is not held during the call.
        let handler = match self.listeners.get(&port) {
            Some(entry) => entry.value().clone(),
            None => return false,
        };
        handler(datagram);
        self.delivered.fetch_add(1, Ordering::Relaxed);
        true
    }
}

impl Connector for LoopbackNetwork {
    fn connect(&self, host: &str, port: u16) -> Result<Box<dyn Transport>, NetworkError> {
        if !self.is_listening(port) {
            return Err(NetworkError::ConnectionFailed(format!(
                "{}:{}: nothing listening",
                host, port
            )));
        }
        Ok(Box::new(LoopbackSender {
            network: self.clone(),
            target: format!("{}:{}", host, port),
            port,
            closed: AtomicBool::new(false),
        }))
    }

    fn listen(
        &self,
        port: u16,
        handler: DatagramHandler,
    ) -> Result<Box<dyn Transport>, NetworkError> {
        match self.listeners.entry(port) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(NetworkError::BindFailed(format!(
                "port {} already in use",
                port
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(handler);
                Ok(Box::new(LoopbackListener {
                    network: self.clone(),
                    port,
                    closed: AtomicBool::new(false),
                }))
            }
        }
    }
}

struct LoopbackSender {
    network: LoopbackNetwork,
    target: String,
    port: u16,
    closed: AtomicBool,
}

impl Transport for LoopbackSender {
    fn send(&self, datagram: &[u8]) -> Result<(), NetworkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NetworkError::Closed);
        }
        // Like UDP, a datagram to a vanished listener is silently lost.
        self.network.inject(self.port, datagram);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn describe(&self) -> String {
        format!("loopback://{}", self.target)
    }
}

struct LoopbackListener {
    network: LoopbackNetwork,
    port: u16,
    closed: AtomicBool,
}

impl Transport for LoopbackListener {
    fn send(&self, _datagram: &[u8]) -> Result<(), NetworkError> {
        Err(NetworkError::SendFailed("listening endpoint cannot send".into()))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.network.listeners.remove(&self.port);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn describe(&self) -> String {
        format!("loopback://*:{}", self.port)
    }
}

impl Drop for LoopbackListener {
    fn drop(&mut self) {
        self.close();
    }
}
