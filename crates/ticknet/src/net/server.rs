use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::net::{SocketAddr, ToSocketAddrs};
use std::rc::Rc;
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

use super::NetError;
use super::channel::{Channel, ChannelFactory};
use super::dispatcher::{DispatchError, Dispatcher, Messenger};
use super::protocol::Message;
use super::socket::DatagramSocket;
use super::stats::SocketStats;
use crate::buffer::BitBuffer;
use crate::buffer::codec::{read_string, write_string};
use crate::config::{ChannelConfig, NetConfig};

const RECONNECT_REASON: &str = "reconnect";
const REDIRECT_REASON: &str = "redirected";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    ClientConnected { addr: SocketAddr },
    ClientDisconnected { addr: SocketAddr, reason: String },
}

type Outbox = Rc<RefCell<VecDeque<(SocketAddr, BitBuffer)>>>;
type ClosedQueue = Rc<RefCell<Vec<(SocketAddr, String)>>>;

struct ServerState {
    config: ChannelConfig,
    reconnect_delay: Duration,
    now: Instant,
    channels: HashMap<SocketAddr, Channel>,
    factory: Option<ChannelFactory>,
    outbox: Outbox,
    closed: ClosedQueue,
    events: VecDeque<ServerEvent>,
}

impl ServerState {
    fn open_channel(&mut self, addr: SocketAddr) {
        let mut channel = Channel::new(self.config.clone(), self.now);

        let outbox = Rc::clone(&self.outbox);
        channel.set_send_callback(move |buf| outbox.borrow_mut().push_back((addr, buf)));

        let closed = Rc::clone(&self.closed);
        channel.set_disconnect_callback(move |reason| {
            closed.borrow_mut().push((addr, reason.to_string()));
        });

        if let Some(factory) = self.factory.as_mut() {
            factory(addr, &mut channel);
        }

        self.channels.insert(addr, channel);
        self.events.push_back(ServerEvent::ClientConnected { addr });
        info!("Client connected from {}", addr);
    }

    fn remove_channel(&mut self, addr: SocketAddr, reason: &str) -> bool {
        if self.channels.remove(&addr).is_none() {
            return false;
        }
        self.events.push_back(ServerEvent::ClientDisconnected {
            addr,
            reason: reason.to_string(),
        });
        info!("Client {} disconnected: {}", addr, reason);
        true
    }
}

fn on_connect(
    state: &mut ServerState,
    messenger: &mut Messenger,
    addr: SocketAddr,
    _buf: &mut BitBuffer,
) -> Result<(), DispatchError> {
    if let Some(channel) = state.channels.get(&addr) {
        let silent_for = state.now.saturating_duration_since(channel.last_incoming());
        if channel.incoming_sequence().is_some() && silent_for < state.reconnect_delay {
            debug!("Ignoring duplicate connect from live peer {}", addr);
            return Ok(());
        }
    }

    messenger.send_message(Message::Connect.id(), addr, &BitBuffer::new())?;

    state.remove_channel(addr, RECONNECT_REASON);
    state.open_channel(addr);
    Ok(())
}

fn on_regular(
    state: &mut ServerState,
    _messenger: &mut Messenger,
    addr: SocketAddr,
    buf: &mut BitBuffer,
) -> Result<(), DispatchError> {
    let now = state.now;
    let Some(channel) = state.channels.get_mut(&addr) else {
        trace!("Ignoring datagram from unconnected peer {}", addr);
        return Ok(());
    };

    if let Err(e) = channel.read(buf, now) {
        warn!("Disconnecting {}: {}", addr, e);
        channel.disconnect(e.to_string());
    }
    Ok(())
}

fn on_disconnect(
    state: &mut ServerState,
    _messenger: &mut Messenger,
    addr: SocketAddr,
    buf: &mut BitBuffer,
) -> Result<(), DispatchError> {
    let reason = read_string(buf)?;
    state.remove_channel(addr, &reason);
    Ok(())
}

/// Accepts `Connect` requests and keeps one [`Channel`] per peer address.
pub struct Server {
    dispatcher: Dispatcher<ServerState>,
    state: ServerState,
}

impl Server {
    pub fn bind<A: ToSocketAddrs>(addr: A, config: NetConfig) -> Result<Self, NetError> {
        config.validate()?;

        let mut socket = DatagramSocket::bind(addr)?;
        socket.set_max_datagram_size(config.channel.max_datagram_size);
        socket.set_loss_simulation(config.loss_simulation.clone());

        let mut dispatcher = Dispatcher::new(socket);
        dispatcher.add_message(Message::Connect.id(), on_connect)?;
        dispatcher.add_message(Message::Regular.id(), on_regular)?;
        dispatcher.add_message(Message::Disconnect.id(), on_disconnect)?;

        info!("Server listening on {}", dispatcher.local_addr());

        Ok(Self {
            dispatcher,
            state: ServerState {
                config: config.channel,
                reconnect_delay: config.reconnect_delay,
                now: Instant::now(),
                channels: HashMap::new(),
                factory: None,
                outbox: Outbox::default(),
                closed: ClosedQueue::default(),
                events: VecDeque::new(),
            },
        })
    }

    pub fn frame(&mut self, now: Instant) -> Result<(), NetError> {
        self.state.now = now;
        self.dispatcher.frame(&mut self.state)?;

        for channel in self.state.channels.values_mut() {
            channel.frame(now);
        }

        self.flush();
        self.reap_closed();
        Ok(())
    }

    pub fn set_channel_factory(&mut self, factory: impl FnMut(SocketAddr, &mut Channel) + 'static) {
        self.state.factory = Some(Box::new(factory));
    }

    /// The channel closes on the next frame and the peer is told why.
    pub fn disconnect(&mut self, addr: SocketAddr, reason: &str) -> bool {
        match self.state.channels.get_mut(&addr) {
            Some(channel) => {
                channel.disconnect(reason);
                true
            }
            None => false,
        }
    }

    /// Points a connected peer at another server and forgets it.
    pub fn send_redirect(&mut self, addr: SocketAddr, target: &str) -> Result<(), NetError> {
        let mut payload = BitBuffer::new();
        write_string(&mut payload, target);
        self.dispatcher.send_message(Message::Redirect.id(), addr, &payload)?;

        debug!("Redirected {} to {}", addr, target);
        self.state.remove_channel(addr, REDIRECT_REASON);
        Ok(())
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.state.events.drain(..)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.dispatcher.local_addr()
    }

    pub fn clients_count(&self) -> usize {
        self.state.channels.len()
    }

    pub fn clients(&self) -> impl Iterator<Item = SocketAddr> + '_ {
        self.state.channels.keys().copied()
    }

    pub fn channel(&self, addr: SocketAddr) -> Option<&Channel> {
        self.state.channels.get(&addr)
    }

    pub fn channel_mut(&mut self, addr: SocketAddr) -> Option<&mut Channel> {
        self.state.channels.get_mut(&addr)
    }

    pub fn socket_stats(&self) -> &SocketStats {
        self.dispatcher.messenger().socket().stats()
    }

    fn flush(&mut self) {
        let pending: Vec<_> = self.state.outbox.borrow_mut().drain(..).collect();
        for (addr, buf) in pending {
            if let Err(e) = self
                .dispatcher
                .send_message(Message::Regular.id(), addr, &buf)
            {
                warn!("Failed to send to {}: {}", addr, e);
            }
        }
    }

    fn reap_closed(&mut self) {
        let closed: Vec<_> = self.state.closed.borrow_mut().drain(..).collect();
        for (addr, reason) in closed {
            let mut payload = BitBuffer::new();
            write_string(&mut payload, &reason);
            if let Err(e) = self
                .dispatcher
                .send_message(Message::Disconnect.id(), addr, &payload)
            {
                warn!("Failed to send disconnect to {}: {}", addr, e);
            }
            self.state.remove_channel(addr, &reason);
        }
    }
}
