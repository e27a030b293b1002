//! UDP listeners
//!
//! Two independent listeners, each owning one socket and running on its own
//! thread:
//!
//! - [`FactListener`]: fact frames -> value table -> rule dispatch
//! - [`CommandListener`]: command frames -> [`crate::CommandSink`]
//!
//! Each packet is fully handled (decode, apply, ack, dispatch) before the next
//! one is read. The protocol work lives in [`FactProcessor`] and
//! [`CommandProcessor`] so it can be driven without a socket.
//!
//! A blocked `recv_from` cannot be interrupted from another thread with std
//! sockets, so sockets use a read timeout and the loop checks its
//! [`ListenerHandle`] whenever the receive wakes up.

mod command;
mod fact;

pub use command::{CommandListener, CommandOutcome, CommandProcessor};
pub use fact::{FactListener, FactOutcome, FactProcessor};

use std::any::Any;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::Result;

/// Shared close signal for a listener. Cloning gives another handle to the
/// same listener.
#[derive(Debug, Clone, Default)]
pub struct ListenerHandle {
    closed: Arc<AtomicBool>,
}

impl ListenerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the listener to stop. Safe to call any number of times from any
    /// thread; returns `true` only for the call that actually closed it.
    pub fn close(&self) -> bool {
        self.closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Result of one wait on the socket
enum Received {
    Packet(usize, SocketAddr),
    Idle,
    Closed,
}

fn bind_socket(addr: SocketAddr, poll_interval: Duration) -> Result<UdpSocket> {
    let socket = UdpSocket::bind(addr)?;
    socket.set_read_timeout(Some(poll_interval.max(Duration::from_millis(1))))?;
    Ok(socket)
}

fn receive(socket: &UdpSocket, buf: &mut [u8], handle: &ListenerHandle, name: &str) -> Received {
    let result = socket.recv_from(buf);
    if handle.is_closed() {
        return Received::Closed;
    }

    match result {
        Ok((len, from)) => Received::Packet(len, from),
        Err(e) if is_timeout(&e) => Received::Idle,
        Err(e) => {
            // One bad datagram (or an ICMP error from a previous ack) must not
            // end the loop.
            log::error!("{} read error: {}", name, e);
            Received::Idle
        }
    }
}

/// Text of a caught panic, for logging
fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

fn send_ack(socket: &UdpSocket, ack: &[u8], to: SocketAddr, name: &str) {
    if let Err(e) = socket.send_to(ack, to) {
        log::warn!("{} failed to send ack to {}: {}", name, to, e);
    }
}
