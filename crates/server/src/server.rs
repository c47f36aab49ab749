use std::cell::RefCell;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::{Duration, Instant};

use ticknet::{Event, NetError, Server, add_event_reader, send_event};

use crate::config::ServerConfig;
use crate::events::LogEvent;

type Inbox = Rc<RefCell<Vec<(SocketAddr, Event)>>>;

pub struct EchoServer {
    server: Server,
    config: ServerConfig,
    inbox: Inbox,
    pending_events: VecDeque<LogEvent>,
}

impl EchoServer {
    pub fn new(bind_addr: &str, config: ServerConfig) -> Result<Self, NetError> {
        let mut server = Server::bind(bind_addr, config.net.clone())?;

        let inbox = Inbox::default();
        let sink = Rc::clone(&inbox);
        server.set_channel_factory(move |addr, channel| {
            let sink = Rc::clone(&sink);
            if let Err(e) = add_event_reader(channel, move |event| {
                sink.borrow_mut().push((addr, event));
            }) {
                log::warn!("Could not register event reader for {}: {}", addr, e);
            }
        });

        Ok(Self {
            server,
            config,
            inbox,
            pending_events: VecDeque::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = LogEvent> + '_ {
        self.pending_events.drain(..)
    }

    /// Ticks until `duration` elapses, or forever without one.
    pub fn run(&mut self, duration: Option<Duration>) {
        let tick = self.config.tick_duration();
        let started = Instant::now();

        while duration.is_none_or(|limit| started.elapsed() < limit) {
            let frame_start = Instant::now();

            self.tick_once(frame_start);
            for event in self.drain_events() {
                event.log();
            }

            if let Some(rest) = tick.checked_sub(frame_start.elapsed()) {
                std::thread::sleep(rest);
            }
        }

        self.shutdown_connections();
    }

    pub fn tick_once(&mut self, now: Instant) {
        if let Err(e) = self.server.frame(now) {
            self.pending_events.push_back(LogEvent::Error {
                message: format!("Network error: {}", e),
            });
        }

        self.pending_events.extend(self.server.drain_events().map(LogEvent::Network));

        let received: Vec<_> = self.inbox.borrow_mut().drain(..).collect();
        for (addr, event) in received {
            if self.config.echo {
                self.echo(addr, &event);
            }
            self.pending_events.push_back(LogEvent::Received { addr, event });
        }
    }

    pub fn shutdown_connections(&mut self) {
        let clients: Vec<_> = self.server.clients().collect();
        for addr in clients {
            self.server.disconnect(addr, "server shutting down");
        }
        self.tick_once(Instant::now());
        for event in self.drain_events() {
            event.log();
        }
    }

    fn echo(&mut self, addr: SocketAddr, event: &Event) {
        let Some(channel) = self.server.channel_mut(addr) else {
            return;
        };
        if let Err(e) = send_event(channel, event) {
            self.pending_events.push_back(LogEvent::Error {
                message: format!("Echo to {} failed: {}", addr, e),
            });
        }
    }
}
