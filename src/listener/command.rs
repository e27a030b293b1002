//! Command listener

use std::net::{SocketAddr, UdpSocket};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use super::{bind_socket, panic_message, receive, send_ack, ListenerHandle, Received};
use crate::config::IngestConfig;
use crate::dispatcher::{Command, CommandSink};
use crate::protocol::{encode_command_ack, CommandFrame, CommandStatus, COMMAND_FRAME_LEN};
use crate::Result;

const NAME: &str = "command listener";

/// Large enough to tell an oversized frame from a valid one
const RECEIVE_BUFFER_LEN: usize = 64;

/// What happened to one command datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandOutcome {
    /// `None` when the datagram was dropped without an answer
    pub status: Option<CommandStatus>,
    pub ack: Option<[u8; COMMAND_FRAME_LEN]>,
}

/// Decodes command frames and forwards them to the timer
#[derive(Clone)]
pub struct CommandProcessor {
    sink: Arc<dyn CommandSink>,
}

impl CommandProcessor {
    pub fn new(sink: Arc<dyn CommandSink>) -> Self {
        Self { sink }
    }

    pub fn handle(&self, packet: &[u8]) -> CommandOutcome {
        let frame = match CommandFrame::parse(packet) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("dropping command packet: {}", e);
                return CommandOutcome {
                    status: None,
                    ack: None,
                };
            }
        };

        let status = match frame.validate() {
            Ok(frame) => self.dispatch(frame.command),
            Err(e) => {
                log::error!("command packet: {}", e);
                CommandStatus::UnsupportedVersion
            }
        };

        CommandOutcome {
            status: Some(status),
            ack: frame.ack_requested.then(|| encode_command_ack(status)),
        }
    }

    fn dispatch(&self, byte: u8) -> CommandStatus {
        let command = Command::from_byte(byte);
        let sink = self.sink.as_ref();
        let result = panic::catch_unwind(AssertUnwindSafe(|| match command {
            Some(command) => sink.dispatch(command, None),
            None => sink.dispatch_unknown(byte, None),
        }));
        let label = command.map_or_else(|| format!("command byte {}", byte), |c| c.to_string());

        match result {
            Ok(Ok(reply)) if reply.is_ok() => {
                log::debug!("dispatched {}", label);
                CommandStatus::Ok
            }
            Ok(Ok(reply)) => {
                log::warn!("{} refused: {} ({})", label, reply.message, reply.code);
                CommandStatus::Rejected
            }
            Ok(Err(e)) => {
                log::warn!("{} failed: {}", label, e);
                CommandStatus::Rejected
            }
            Err(payload) => {
                log::error!("{} panicked in command sink: {}", label, panic_message(&*payload));
                CommandStatus::Rejected
            }
        }
    }
}

/// Listens for command frames on one UDP socket
pub struct CommandListener {
    socket: UdpSocket,
    processor: CommandProcessor,
    handle: ListenerHandle,
}

impl CommandListener {
    /// Bind to `config.command_addr()`
    pub fn bind(config: &IngestConfig, processor: CommandProcessor) -> Result<Self> {
        let socket = bind_socket(config.command_addr(), config.poll_interval())?;
        Ok(Self {
            socket,
            processor,
            handle: ListenerHandle::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn handle(&self) -> ListenerHandle {
        self.handle.clone()
    }

    /// Receive until the handle is closed
    pub fn run(self) {
        let mut buf = [0u8; RECEIVE_BUFFER_LEN];
        if let Ok(addr) = self.socket.local_addr() {
            log::info!("Command listener running on {}", addr);
        }

        loop {
            let (len, from) = match receive(&self.socket, &mut buf, &self.handle, NAME) {
                Received::Packet(len, from) => (len, from),
                Received::Idle => continue,
                Received::Closed => break,
            };

            if let Some(ack) = self.processor.handle(&buf[..len]).ack {
                send_ack(&self.socket, &ack, from, NAME);
            }
        }

        log::info!("Command listener stopped");
    }
}
