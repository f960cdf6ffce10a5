//! Datagram transports
//!
//! The session talks to the network only through [`Connector`] and
//! [`Transport`]. [`UdpConnector`] is the real thing; [`LoopbackNetwork`]
//! wires sessions together inside one process.

pub mod loopback;
pub mod transport;
pub mod udp;

pub use loopback::LoopbackNetwork;
pub use transport::{Connector, DatagramHandler, Transport};
pub use udp::UdpConnector;
