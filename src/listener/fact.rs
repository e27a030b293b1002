//! Fact listener

use std::net::{SocketAddr, UdpSocket};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use super::{bind_socket, panic_message, receive, send_ack, ListenerHandle, Received};
use crate::config::IngestConfig;
use crate::protocol::{
    encode_fact_ack, FactFrame, FactHeader, FactStatus, FrameError, FACT_ACK_LEN,
};
use crate::rules::RuleDispatcher;
use crate::values::{ValueChange, ValueTable};
use crate::Result;

const NAME: &str = "fact listener";

/// What happened to one fact datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactOutcome {
    /// `None` when the datagram was dropped without an answer (short or bad magic)
    pub status: Option<FactStatus>,
    /// Reply to send, present only if the sender asked for one
    pub ack: Option<[u8; FACT_ACK_LEN]>,
    /// Changes applied to the table, in record order
    pub changes: Vec<ValueChange>,
}

impl FactOutcome {
    fn dropped() -> Self {
        Self {
            status: None,
            ack: None,
            changes: Vec::new(),
        }
    }
}

/// Decodes fact frames into the value table and feeds the rule dispatcher
#[derive(Clone)]
pub struct FactProcessor {
    table: Arc<ValueTable>,
    rules: RuleDispatcher,
}

impl FactProcessor {
    pub fn new(table: Arc<ValueTable>, rules: RuleDispatcher) -> Self {
        Self { table, rules }
    }

    pub fn table(&self) -> &Arc<ValueTable> {
        &self.table
    }

    /// Decode `packet` and apply its records. Rules are not run.
    ///
    /// Records before a malformed one stay applied and the status reports
    /// [`FactStatus::MalformedTlv`].
    pub fn ingest(&self, packet: &[u8]) -> FactOutcome {
        let header = match FactHeader::parse(packet) {
            Ok(header) => header,
            Err(e) => {
                log::warn!("dropping fact packet: {}", e);
                return FactOutcome::dropped();
            }
        };

        let frame = match FactFrame::validate(header, packet) {
            Ok(frame) => frame,
            Err(e) => return Self::rejected(header, e),
        };

        let mut status = FactStatus::Ok;
        let mut changes = Vec::new();
        {
            let mut batch = self.table.batch();
            for record in frame.records() {
                match record {
                    Ok(record) => changes.extend(batch.set_value(record.id, record.value)),
                    Err(e) => {
                        log::warn!("fact packet {}: {}", header.sequence, e);
                        status = FactStatus::MalformedTlv;
                    }
                }
            }
        }

        FactOutcome {
            status: Some(status),
            ack: header
                .ack_requested()
                .then(|| encode_fact_ack(header.sequence, status)),
            changes,
        }
    }

    fn rejected(header: FactHeader, error: FrameError) -> FactOutcome {
        match error {
            FrameError::UnsupportedVersion(_) => {
                log::error!("fact packet {}: {}", header.sequence, error)
            }
            _ => log::warn!("fact packet {}: {}", header.sequence, error),
        }

        let status = error.fact_status();
        let ack = status
            .filter(|_| header.ack_requested())
            .map(|status| encode_fact_ack(header.sequence, status));
        FactOutcome {
            status,
            ack,
            changes: Vec::new(),
        }
    }

    /// Run rule callbacks for a change batch. Must be called without holding
    /// the table lock.
    ///
    /// A panicking rule engine is logged and the rest of the batch is skipped.
    pub fn dispatch(&self, changes: &[ValueChange]) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.rules.dispatch(changes)));
        if let Err(payload) = result {
            log::error!("rule engine panicked: {}", panic_message(&*payload));
        }
    }

    /// Ingest then dispatch, for transports that have no ack to send
    pub fn process(&self, packet: &[u8]) -> FactOutcome {
        let outcome = self.ingest(packet);
        self.dispatch(&outcome.changes);
        outcome
    }
}

/// Listens for fact frames on one UDP socket
pub struct FactListener {
    socket: UdpSocket,
    processor: FactProcessor,
    handle: ListenerHandle,
    buffer_size: usize,
}

impl FactListener {
    /// Bind to `config.fact_addr()`
    pub fn bind(config: &IngestConfig, processor: FactProcessor) -> Result<Self> {
        let socket = bind_socket(config.fact_addr(), config.poll_interval())?;
        Ok(Self {
            socket,
            processor,
            handle: ListenerHandle::new(),
            buffer_size: config.receive_buffer_size,
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
        let mut buf = vec![0u8; self.buffer_size];
        if let Ok(addr) = self.socket.local_addr() {
            log::info!("Fact listener running on {}", addr);
        }

        loop {
            let (len, from) = match receive(&self.socket, &mut buf, &self.handle, NAME) {
                Received::Packet(len, from) => (len, from),
                Received::Idle => continue,
                Received::Closed => break,
            };

            let outcome = self.processor.ingest(&buf[..len]);
            if let Some(ack) = outcome.ack {
                send_ack(&self.socket, &ack, from, NAME);
            }
            self.processor.dispatch(&outcome.changes);
        }

        log::info!("Fact listener stopped");
    }
}
