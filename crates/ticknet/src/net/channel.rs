use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;
use std::time::Instant;

use log::{debug, info, trace};

use super::event::EventRoutes;
use super::protocol::{next_sequence, sequence_greater_than};
use crate::buffer::codec::{read_to_buffer, write_to_buffer};
use crate::buffer::{BitBuffer, BufferError, VAR_MAX_VALUE, VAR_PREFIX_BITS};
use crate::config::ChannelConfig;

pub const TIMEOUT_REASON: &str = "timed out";

const VAR_BITS_MAX: usize = (VAR_PREFIX_BITS + VAR_MAX_VALUE.count_ones()) as usize;

/// Worst-case framing around one reliable payload: five varbits fields (message
/// id, sequence, acknowledgement, reliable id, payload length) plus the two
/// generation bits, the presence bit and the terminator.
const RELIABLE_OVERHEAD_BITS: usize = 5 * VAR_BITS_MAX + 4;

pub type SendCallback = Box<dyn FnMut(BitBuffer)>;
pub type DisconnectCallback = Box<dyn FnMut(&str)>;
pub type ReadCallback = Box<dyn FnMut(&mut BitBuffer) -> Result<(), BufferError>>;
pub type WriteCallback = Box<dyn FnMut(&mut BitBuffer)>;
pub type ChannelFactory = Box<dyn FnMut(SocketAddr, &mut Channel)>;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("malformed datagram: {0}")]
    Buffer(#[from] BufferError),
    #[error("no reader registered for message {0}")]
    UnknownMessage(u32),
    #[error("reader for message {0} is already registered")]
    DuplicateReader(u32),
    #[error("writer for message {0} is already registered")]
    DuplicateWriter(u32),
    #[error("reliable queue is full ({0} messages)")]
    ReliableQueueFull(usize),
    #[error("reliable payload of {bits} bits exceeds the {limit} bit limit")]
    PayloadTooLarge { bits: usize, limit: usize },
    #[error("event callback for {0:?} is already registered")]
    DuplicateEventCallback(String),
    #[error("channel is closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Active,
    TimedOut,
    Disconnected,
}

#[derive(Debug, Clone, Default)]
pub struct ChannelStats {
    pub datagrams_sent: u64,
    pub datagrams_received: u64,
    pub datagrams_out_of_order: u64,
    pub reliable_sent: u64,
    pub reliable_retransmitted: u64,
    pub reliable_acknowledged: u64,
    pub reliable_delivered: u64,
    pub reliable_duplicates: u64,
}

struct ReliableMessage {
    id: u32,
    payload: BitBuffer,
    attempts: u32,
}

/// Per-peer reliability state over an unreliable datagram transport.
///
/// Every transmission carries a sequence number and the highest sequence
/// received from the peer. At most one reliable message is in flight; its
/// delivery is signalled by the peer toggling a generation bit, so the next
/// queued message is only attached once that toggle has been seen.
pub struct Channel {
    config: ChannelConfig,
    state: ChannelState,
    pending_disconnect: Option<String>,

    outgoing_sequence: u32,
    incoming_sequence: Option<u32>,
    incoming_acknowledgement: Option<u32>,

    reliable_queue: VecDeque<ReliableMessage>,
    reliable_sequence: Option<u32>,
    outgoing_reliable_sequence: bool,
    incoming_reliable_sequence: bool,
    incoming_reliable_acknowledgement: bool,

    last_incoming: Instant,
    last_transmit: Option<Instant>,

    readers: BTreeMap<u32, ReadCallback>,
    writers: BTreeMap<u32, WriteCallback>,
    on_send: Option<SendCallback>,
    on_disconnect: Option<DisconnectCallback>,
    event_routes: Option<EventRoutes>,

    stats: ChannelStats,
}

impl Channel {
    pub fn new(config: ChannelConfig, now: Instant) -> Self {
        Self {
            config,
            state: ChannelState::Active,
            pending_disconnect: None,
            outgoing_sequence: 0,
            incoming_sequence: None,
            incoming_acknowledgement: None,
            reliable_queue: VecDeque::new(),
            reliable_sequence: None,
            outgoing_reliable_sequence: false,
            incoming_reliable_sequence: false,
            incoming_reliable_acknowledgement: false,
            last_incoming: now,
            last_transmit: None,
            readers: BTreeMap::new(),
            writers: BTreeMap::new(),
            on_send: None,
            on_disconnect: None,
            event_routes: None,
            stats: ChannelStats::default(),
        }
    }

    pub fn set_send_callback(&mut self, callback: impl FnMut(BitBuffer) + 'static) {
        self.on_send = Some(Box::new(callback));
    }

    pub fn set_disconnect_callback(&mut self, callback: impl FnMut(&str) + 'static) {
        self.on_disconnect = Some(Box::new(callback));
    }

    /// Readers receive both reliable and regular messages with this id.
    pub fn add_message_reader(
        &mut self,
        id: u32,
        reader: impl FnMut(&mut BitBuffer) -> Result<(), BufferError> + 'static,
    ) -> Result<(), ChannelError> {
        if self.readers.contains_key(&id) {
            return Err(ChannelError::DuplicateReader(id));
        }
        self.readers.insert(id, Box::new(reader));
        Ok(())
    }

    pub fn add_message_writer(
        &mut self,
        id: u32,
        writer: impl FnMut(&mut BitBuffer) + 'static,
    ) -> Result<(), ChannelError> {
        if self.writers.contains_key(&id) {
            return Err(ChannelError::DuplicateWriter(id));
        }
        self.writers.insert(id, Box::new(writer));
        Ok(())
    }

    pub fn remove_message_reader(&mut self, id: u32) -> bool {
        self.readers.remove(&id).is_some()
    }

    pub fn remove_message_writer(&mut self, id: u32) -> bool {
        self.writers.remove(&id).is_some()
    }

    pub fn send_reliable(&mut self, id: u32, payload: BitBuffer) -> Result<(), ChannelError> {
        if self.state != ChannelState::Active {
            return Err(ChannelError::Closed);
        }
        let limit = self.max_reliable_payload_bits();
        if payload.bit_len() > limit {
            return Err(ChannelError::PayloadTooLarge {
                bits: payload.bit_len(),
                limit,
            });
        }
        if self.reliable_queue.len() >= self.config.max_reliable_queue {
            return Err(ChannelError::ReliableQueueFull(self.reliable_queue.len()));
        }

        self.reliable_queue.push_back(ReliableMessage {
            id,
            payload,
            attempts: 0,
        });
        Ok(())
    }

    /// Closes the channel on the next frame. Later requests keep the first
    /// reason.
    pub fn disconnect(&mut self, reason: impl Into<String>) {
        if self.state == ChannelState::Active && self.pending_disconnect.is_none() {
            self.pending_disconnect = Some(reason.into());
        }
    }

    pub fn frame(&mut self, now: Instant) {
        if self.state != ChannelState::Active {
            return;
        }

        if let Some(reason) = self.pending_disconnect.take() {
            self.close(ChannelState::Disconnected, &reason);
            return;
        }

        if now.saturating_duration_since(self.last_incoming) >= self.config.timeout {
            self.close(ChannelState::TimedOut, TIMEOUT_REASON);
            return;
        }

        if let Some(last) = self.last_transmit {
            if now.saturating_duration_since(last) < self.config.transmit_interval {
                return;
            }
        }
        self.last_transmit = Some(now);

        let datagram = self.write_datagram();
        self.stats.datagrams_sent += 1;

        if let Some(on_send) = self.on_send.as_mut() {
            on_send(datagram);
        }
    }

    /// Returns `Ok(false)` when the datagram is stale and was dropped.
    pub fn read(&mut self, buf: &mut BitBuffer, now: Instant) -> Result<bool, ChannelError> {
        if self.state != ChannelState::Active {
            return Err(ChannelError::Closed);
        }

        let sequence = buf.read_bits_var()?;
        let acknowledgement = buf.read_bits_var()?;
        let reliable_sequence = buf.read_bit()?;
        let reliable_acknowledgement = buf.read_bit()?;

        if let Some(last) = self.incoming_sequence {
            if !sequence_greater_than(sequence, last) {
                self.stats.datagrams_out_of_order += 1;
                debug!("Dropping stale datagram {} (last {})", sequence, last);
                return Ok(false);
            }
        }

        trace!("Accepted datagram {} ack {}", sequence, acknowledgement);
        self.incoming_sequence = Some(sequence);
        self.incoming_acknowledgement = Some(acknowledgement);
        self.last_incoming = now;
        self.stats.datagrams_received += 1;

        if buf.read_bit()? {
            let id = buf.read_bits_var()?;
            let bit_len = buf.read_bits_var()? as usize;

            if reliable_sequence != self.incoming_reliable_sequence {
                let mut payload = read_to_buffer(buf, bit_len)?;
                self.incoming_reliable_sequence = reliable_sequence;
                self.stats.reliable_delivered += 1;
                debug!("Delivering reliable message {}", id);
                self.deliver(id, &mut payload)?;
            } else {
                buf.skip_bits(bit_len)?;
                self.stats.reliable_duplicates += 1;
            }
        }

        if !self.is_awaiting_acknowledgement()
            && reliable_acknowledgement != self.incoming_reliable_acknowledgement
        {
            self.incoming_reliable_acknowledgement = reliable_acknowledgement;
            if let Some(message) = self.reliable_queue.pop_front() {
                self.reliable_sequence = None;
                self.stats.reliable_acknowledged += 1;
                debug!(
                    "Reliable message {} acknowledged after {} attempt(s)",
                    message.id, message.attempts
                );
            }
        }

        while buf.read_bit()? {
            let id = buf.read_bits_var()?;
            self.deliver(id, buf)?;
        }

        Ok(true)
    }

    pub fn is_awaiting_acknowledgement(&self) -> bool {
        match self.reliable_sequence {
            None => false,
            Some(attached) => self
                .incoming_acknowledgement
                .is_none_or(|ack| sequence_greater_than(attached, ack)),
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == ChannelState::Active
    }

    pub fn outgoing_sequence(&self) -> u32 {
        self.outgoing_sequence
    }

    pub fn incoming_sequence(&self) -> Option<u32> {
        self.incoming_sequence
    }

    pub fn incoming_acknowledgement(&self) -> Option<u32> {
        self.incoming_acknowledgement
    }

    pub fn reliable_queue_len(&self) -> usize {
        self.reliable_queue.len()
    }

    pub fn last_incoming(&self) -> Instant {
        self.last_incoming
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn stats(&self) -> &ChannelStats {
        &self.stats
    }

    /// Largest reliable payload that still fits one datagram. Regular message
    /// writers share the same datagram and must keep their bodies small.
    pub fn max_reliable_payload_bits(&self) -> usize {
        (self.config.max_datagram_size * 8).saturating_sub(RELIABLE_OVERHEAD_BITS)
    }

    pub(crate) fn event_routes(&self) -> Option<&EventRoutes> {
        self.event_routes.as_ref()
    }

    pub(crate) fn set_event_routes(&mut self, routes: EventRoutes) {
        self.event_routes = Some(routes);
    }

    fn close(&mut self, state: ChannelState, reason: &str) {
        info!("Channel closed: {}", reason);
        self.state = state;
        if let Some(on_disconnect) = self.on_disconnect.as_mut() {
            on_disconnect(reason);
        }
    }

    fn deliver(&mut self, id: u32, buf: &mut BitBuffer) -> Result<(), ChannelError> {
        let reader = self
            .readers
            .get_mut(&id)
            .ok_or(ChannelError::UnknownMessage(id))?;
        reader(buf)?;
        Ok(())
    }

    fn write_datagram(&mut self) -> BitBuffer {
        let mut buf = BitBuffer::new();
        buf.write_bits_var(self.outgoing_sequence);
        buf.write_bits_var(self.incoming_sequence.unwrap_or(0));

        let attach = !self.reliable_queue.is_empty() && !self.is_awaiting_acknowledgement();
        if attach {
            self.outgoing_reliable_sequence = !self.incoming_reliable_acknowledgement;
            self.reliable_sequence = Some(self.outgoing_sequence);
        }

        buf.write_bit(self.outgoing_reliable_sequence);
        buf.write_bit(self.incoming_reliable_sequence);

        match self.reliable_queue.front_mut() {
            Some(message) if attach => {
                buf.write_bit(true);
                buf.write_bits_var(message.id);
                buf.write_bits_var(message.payload.bit_len() as u32);
                write_to_buffer(&message.payload, &mut buf);

                message.attempts += 1;
                self.stats.reliable_sent += 1;
                if message.attempts > 1 {
                    self.stats.reliable_retransmitted += 1;
                    debug!(
                        "Retransmitting reliable message {} (attempt {})",
                        message.id, message.attempts
                    );
                }
            }
            _ => buf.write_bit(false),
        }

        for (&id, writer) in self.writers.iter_mut() {
            buf.write_bit(true);
            buf.write_bits_var(id);
            writer(&mut buf);
        }
        buf.write_bit(false);

        self.outgoing_sequence = next_sequence(self.outgoing_sequence);
        buf
    }
}
