pub mod buffer;
pub mod config;
pub mod net;

pub use buffer::{BitBuffer, BufferError, ByteBuffer, Origin, bits_for};
pub use config::{ChannelConfig, ConfigError, NetConfig};
pub use net::{
    Channel, ChannelError, ChannelState, Client, ClientEvent, DEFAULT_PORT, DatagramSocket,
    DispatchError, Dispatcher, Event, Message, NetError, PacketLossSimulation, Server,
    ServerEvent, add_event_callback, add_event_reader, send_event,
};
