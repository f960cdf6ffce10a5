//! UDP transport
//!
//! Sockets are configured through socket2 and then used as plain std
//! sockets. The sending socket is non-blocking since it is written from the
//! audio callback. The listening side runs a dedicated receive thread that
//! hands each datagram to the session's handler.

use parking_lot::Mutex;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::NetworkConfig;
use crate::constants::MAX_DATAGRAM_SIZE;
use crate::error::NetworkError;
use crate::network::transport::{Connector, DatagramHandler, Transport};

/// How often the receive thread wakes up to check for shutdown
const RECV_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Opens UDP senders and listeners
#[derive(Debug, Clone)]
pub struct UdpConnector {
    bind_address: IpAddr,
    recv_buffer_size: usize,
    send_buffer_size: usize,
}

impl UdpConnector {
    pub fn new(config: &NetworkConfig) -> Self {
        Self {
            bind_address: config.bind_address,
            recv_buffer_size: config.recv_buffer_size,
            send_buffer_size: config.send_buffer_size,
        }
    }
}

impl Default for UdpConnector {
    fn default() -> Self {
        Self::new(&NetworkConfig::default())
    }
}

fn new_socket(addr: &SocketAddr) -> std::io::Result<Socket> {
    Socket::new(Domain::for_address(*addr), Type::DGRAM, Some(Protocol::UDP))
}

impl UdpConnector {
    /// Open a connected, non-blocking sending socket
    pub fn open_sender(&self, host: &str, port: u16) -> Result<UdpSender, NetworkError> {
        let target = (host, port)
            .to_socket_addrs()
            .map_err(|e| NetworkError::ConnectionFailed(format!("{}:{}: {}", host, port, e)))?
            .next()
            .ok_or_else(|| {
                NetworkError::ConnectionFailed(format!("{}:{}: no address", host, port))
            })?;

        let socket = new_socket(&target)
            .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;
        if self.send_buffer_size > 0 {
            socket
                .set_send_buffer_size(self.send_buffer_size)
                .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;
        }

        let local: SocketAddr = match target {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (std::net::Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        socket
            .bind(&SockAddr::from(local))
            .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;
        socket
            .connect(&SockAddr::from(target))
            .map_err(|e| NetworkError::ConnectionFailed(format!("{}: {}", target, e)))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;

        tracing::debug!("UDP sender connected to {}", target);

        Ok(UdpSender {
            socket: socket.into(),
            target,
            closed: AtomicBool::new(false),
        })
    }
}

impl Connector for UdpConnector {
    fn connect(&self, host: &str, port: u16) -> Result<Box<dyn Transport>, NetworkError> {
        Ok(Box::new(self.open_sender(host, port)?))
    }

    fn listen(
        &self,
        port: u16,
        handler: DatagramHandler,
    ) -> Result<Box<dyn Transport>, NetworkError> {
        let addr = SocketAddr::new(self.bind_address, port);
        let socket = new_socket(&addr).map_err(|e| NetworkError::BindFailed(e.to_string()))?;
        if self.recv_buffer_size > 0 {
            socket
                .set_recv_buffer_size(self.recv_buffer_size)
                .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
        }
        socket
            .bind(&SockAddr::from(addr))
            .map_err(|e| NetworkError::BindFailed(format!("{}: {}", addr, e)))?;
        socket
            .set_read_timeout(Some(RECV_POLL_INTERVAL))
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

        let socket: UdpSocket = socket.into();
        let local_addr = socket
            .local_addr()
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
        let running = Arc::new(AtomicBool::new(true));

        let handle = {
            let running = running.clone();
            thread::Builder::new()
                .name(format!("udp-recv-{}", local_addr.port()))
                .spawn(move || receive_loop(socket, running, handler))
                .map_err(|e| NetworkError::BindFailed(e.to_string()))?
        };

        tracing::debug!("UDP listener bound to {}", local_addr);

        Ok(Box::new(UdpListener {
            local_addr,
            running,
            thread_handle: Mutex::new(Some(handle)),
        }))
    }
}

fn receive_loop(socket: UdpSocket, running: Arc<AtomicBool>, handler: DatagramHandler) {
    let mut packet_buffer = vec![0u8; MAX_DATAGRAM_SIZE];

    while running.load(Ordering::Acquire) {
        match socket.recv_from(&mut packet_buffer) {
            Ok((len, _from)) => {
                if running.load(Ordering::Acquire) {
                    handler(&packet_buffer[..len]);
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                tracing::warn!("Failed to receive datagram: {}", e);
                thread::sleep(RECV_POLL_INTERVAL);
            }
        }
    }

    tracing::trace!("UDP receive loop exiting");
}

/// Connected UDP socket for the sending side
pub struct UdpSender {
    socket: UdpSocket,
    target: SocketAddr,
    closed: AtomicBool,
}

impl Transport for UdpSender {
    fn send(&self, datagram: &[u8]) -> Result<(), NetworkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NetworkError::Closed);
        }
        match self.socket.send(datagram) {
            Ok(len) if len == datagram.len() => Ok(()),
            Ok(len) => Err(NetworkError::SendFailed(format!(
                "partial datagram: {} of {} bytes",
                len,
                datagram.len()
            ))),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                Err(NetworkError::SendFailed("socket send buffer full".into()))
            }
            Err(e) => Err(NetworkError::SendFailed(e.to_string())),
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn describe(&self) -> String {
        format!("udp://{}", self.target)
    }
}

/// Bound UDP socket plus its receive thread
pub struct UdpListener {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
}

impl UdpListener {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Transport for UdpListener {
    fn send(&self, _datagram: &[u8]) -> Result<(), NetworkError> {
        Err(NetworkError::SendFailed("listening endpoint cannot send".into()))
    }

    fn close(&self) {
        self.running.store(false, Ordering::Release);

        if let Some(handle) = self.thread_handle.lock().take() {
            // Closing from inside the handler must not join itself.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    fn is_closed(&self) -> bool {
        !self.running.load(Ordering::Acquire)
    }

    fn describe(&self) -> String {
        format!("udp://{}", self.local_addr)
    }
}

impl Drop for UdpListener {
    fn drop(&mut self) {
        self.close();
    }
}
