mod address;
mod channel;
mod client;
mod dispatcher;
mod event;
mod protocol;
mod server;
mod socket;
mod stats;

pub use address::{AddressError, ipv4_from_u32, ipv4_to_u32, resolve};
pub use channel::{
    Channel, ChannelError, ChannelFactory, ChannelState, ChannelStats, DisconnectCallback,
    ReadCallback, SendCallback, TIMEOUT_REASON, WriteCallback,
};
pub use client::{Client, ClientEvent};
pub use dispatcher::{DispatchError, Dispatcher, MessageHandler, Messenger};
pub use event::{
    EVENT_MESSAGE, Event, EventCallback, add_event_callback, add_event_reader, send_event,
};
pub use protocol::{
    DEFAULT_PORT, MAX_DATAGRAM_SIZE, Message, RECEIVE_BUFFER_SIZE, next_sequence,
    sequence_greater_than,
};
pub use server::{Server, ServerEvent};
pub use socket::{DatagramSocket, SocketError};
pub use stats::{PacketLossSimulation, SocketStats, rand_percent, rand_u64};

use crate::config::ConfigError;

/// Failures surfaced by [`Server`] and [`Client`].
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}
