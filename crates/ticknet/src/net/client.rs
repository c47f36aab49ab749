use std::cell::RefCell;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

use super::NetError;
use super::address::resolve;
use super::channel::{Channel, ChannelFactory};
use super::dispatcher::{DispatchError, Dispatcher, Messenger};
use super::protocol::Message;
use super::socket::DatagramSocket;
use super::stats::SocketStats;
use crate::buffer::BitBuffer;
use crate::buffer::codec::{read_string, write_string};
use crate::config::{ChannelConfig, NetConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Connected,
    Disconnected { reason: String },
    Redirected { address: SocketAddr },
}

struct ClientState {
    config: ChannelConfig,
    reconnect_delay: Duration,
    now: Instant,
    server_address: SocketAddr,
    channel: Option<Channel>,
    factory: Option<ChannelFactory>,
    outbox: Rc<RefCell<VecDeque<BitBuffer>>>,
    closed: Rc<RefCell<Option<String>>>,
    events: VecDeque<ClientEvent>,
    last_connect: Option<Instant>,
    reconnect: bool,
}

impl ClientState {
    fn open_channel(&mut self) {
        let mut channel = Channel::new(self.config.clone(), self.now);

        let outbox = Rc::clone(&self.outbox);
        channel.set_send_callback(move |buf| outbox.borrow_mut().push_back(buf));

        let closed = Rc::clone(&self.closed);
        channel.set_disconnect_callback(move |reason| {
            closed.borrow_mut().get_or_insert(reason.to_string());
        });

        if let Some(factory) = self.factory.as_mut() {
            factory(self.server_address, &mut channel);
        }

        self.channel = Some(channel);
        self.events.push_back(ClientEvent::Connected);
        info!("Connected to {}", self.server_address);
    }

    fn drop_channel(&mut self, reason: &str) {
        if self.channel.take().is_none() {
            return;
        }
        self.outbox.borrow_mut().clear();
        self.closed.borrow_mut().take();
        self.last_connect = Some(self.now);
        self.events.push_back(ClientEvent::Disconnected {
            reason: reason.to_string(),
        });
        info!("Disconnected from {}: {}", self.server_address, reason);
    }
}

fn on_connect(
    state: &mut ClientState,
    _messenger: &mut Messenger,
    addr: SocketAddr,
    _buf: &mut BitBuffer,
) -> Result<(), DispatchError> {
    if addr != state.server_address || state.channel.is_some() {
        return Ok(());
    }
    state.open_channel();
    Ok(())
}

fn on_regular(
    state: &mut ClientState,
    _messenger: &mut Messenger,
    addr: SocketAddr,
    buf: &mut BitBuffer,
) -> Result<(), DispatchError> {
    if addr != state.server_address {
        trace!("Ignoring datagram from {}", addr);
        return Ok(());
    }

    let now = state.now;
    if let Some(channel) = state.channel.as_mut() {
        if let Err(e) = channel.read(buf, now) {
            warn!("Disconnecting from {}: {}", addr, e);
            channel.disconnect(e.to_string());
        }
    }
    Ok(())
}

fn on_disconnect(
    state: &mut ClientState,
    _messenger: &mut Messenger,
    addr: SocketAddr,
    buf: &mut BitBuffer,
) -> Result<(), DispatchError> {
    if addr != state.server_address {
        return Ok(());
    }
    let reason = read_string(buf)?;
    state.drop_channel(&reason);
    Ok(())
}

fn on_redirect(
    state: &mut ClientState,
    _messenger: &mut Messenger,
    addr: SocketAddr,
    buf: &mut BitBuffer,
) -> Result<(), DispatchError> {
    if addr != state.server_address {
        return Ok(());
    }

    let target = read_string(buf)?;
    let address = match resolve(&target) {
        Ok(address) => address,
        Err(e) => {
            warn!("Ignoring redirect to {:?}: {}", target, e);
            return Ok(());
        }
    };

    info!("Redirected from {} to {}", state.server_address, address);
    state.channel = None;
    state.outbox.borrow_mut().clear();
    state.closed.borrow_mut().take();
    state.server_address = address;
    state.last_connect = None;
    state.reconnect = true;
    state.events.push_back(ClientEvent::Redirected { address });
    Ok(())
}

/// Connects to one server and keeps a single [`Channel`] to it, asking
/// again every reconnect delay while no channel is open.
pub struct Client {
    dispatcher: Dispatcher<ClientState>,
    state: ClientState,
}

impl Client {
    /// `server` is `host[:port]`. Nothing is sent until the first frame.
    pub fn connect(server: &str, config: NetConfig) -> Result<Self, NetError> {
        config.validate()?;
        let server_address = resolve(server)?;

        let mut socket = DatagramSocket::bind("0.0.0.0:0")?;
        socket.set_max_datagram_size(config.channel.max_datagram_size);
        socket.set_loss_simulation(config.loss_simulation.clone());

        let mut dispatcher = Dispatcher::new(socket);
        dispatcher.add_message(Message::Connect.id(), on_connect)?;
        dispatcher.add_message(Message::Regular.id(), on_regular)?;
        dispatcher.add_message(Message::Disconnect.id(), on_disconnect)?;
        dispatcher.add_message(Message::Redirect.id(), on_redirect)?;

        Ok(Self {
            dispatcher,
            state: ClientState {
                config: config.channel,
                reconnect_delay: config.reconnect_delay,
                now: Instant::now(),
                server_address,
                channel: None,
                factory: None,
                outbox: Rc::default(),
                closed: Rc::default(),
                events: VecDeque::new(),
                last_connect: None,
                reconnect: true,
            },
        })
    }

    pub fn frame(&mut self, now: Instant) -> Result<(), NetError> {
        self.state.now = now;
        self.dispatcher.frame(&mut self.state)?;

        if self.state.channel.is_none() && self.state.reconnect {
            self.request_connect(now);
        }

        if let Some(channel) = self.state.channel.as_mut() {
            channel.frame(now);
        }

        self.flush();
        self.reap_closed();
        Ok(())
    }

    pub fn set_channel_factory(&mut self, factory: impl FnMut(SocketAddr, &mut Channel) + 'static) {
        self.state.factory = Some(Box::new(factory));
    }

    /// Closes the channel on the next frame and stops reconnecting.
    pub fn disconnect(&mut self, reason: &str) {
        self.state.reconnect = false;
        if let Some(channel) = self.state.channel.as_mut() {
            channel.disconnect(reason);
        }
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ClientEvent> + '_ {
        self.state.events.drain(..)
    }

    pub fn is_connected(&self) -> bool {
        self.state.channel.is_some()
    }

    pub fn server_address(&self) -> SocketAddr {
        self.state.server_address
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.dispatcher.local_addr()
    }

    pub fn channel(&self) -> Option<&Channel> {
        self.state.channel.as_ref()
    }

    pub fn channel_mut(&mut self) -> Option<&mut Channel> {
        self.state.channel.as_mut()
    }

    pub fn socket_stats(&self) -> &SocketStats {
        self.dispatcher.messenger().socket().stats()
    }

    fn request_connect(&mut self, now: Instant) {
        let due = self
            .state
            .last_connect
            .is_none_or(|last| now.saturating_duration_since(last) >= self.state.reconnect_delay);
        if !due {
            return;
        }

        self.state.last_connect = Some(now);
        let address = self.state.server_address;
        debug!("Requesting connection to {}", address);
        if let Err(e) = self
            .dispatcher
            .send_message(Message::Connect.id(), address, &BitBuffer::new())
        {
            warn!("Failed to send connect to {}: {}", address, e);
        }
    }

    fn flush(&mut self) {
        let pending: Vec<_> = self.state.outbox.borrow_mut().drain(..).collect();
        let address = self.state.server_address;
        for buf in pending {
            if let Err(e) = self
                .dispatcher
                .send_message(Message::Regular.id(), address, &buf)
            {
                warn!("Failed to send to {}: {}", address, e);
            }
        }
    }

    fn reap_closed(&mut self) {
        let Some(reason) = self.state.closed.borrow_mut().take() else {
            return;
        };

        let mut payload = BitBuffer::new();
        write_string(&mut payload, &reason);
        let address = self.state.server_address;
        if let Err(e) = self
            .dispatcher
            .send_message(Message::Disconnect.id(), address, &payload)
        {
            warn!("Failed to send disconnect to {}: {}", address, e);
        }
        self.state.drop_channel(&reason);
    }
}
