use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use ticknet::{Client, ClientEvent, Event, NetError, add_event_reader, send_event};

use crate::config::ClientConfig;

/// Keeps a client ticking and sends a numbered `ping` event on an interval
/// while connected.
pub struct PingSession {
    client: Client,
    config: ClientConfig,
    inbox: Rc<RefCell<Vec<Event>>>,
    next_ping: u64,
    last_ping: Option<Instant>,
}

impl PingSession {
    pub fn connect(server: &str, config: ClientConfig) -> Result<Self, NetError> {
        let mut client = Client::connect(server, config.net.clone())?;

        let inbox = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&inbox);
        client.set_channel_factory(move |addr, channel| {
            let sink = Rc::clone(&sink);
            if let Err(e) = add_event_reader(channel, move |event| sink.borrow_mut().push(event)) {
                log::warn!("Could not register event reader for {}: {}", addr, e);
            }
        });

        log::info!("Connecting to {}", client.server_address());

        Ok(Self {
            client,
            config,
            inbox,
            next_ping: 0,
            last_ping: None,
        })
    }

    /// Runs until `pings` have been sent and acknowledged, or forever.
    pub fn run(&mut self, pings: Option<u64>) -> Result<(), NetError> {
        let tick = self.config.tick_duration();

        while pings.is_none_or(|limit| self.next_ping < limit || self.awaiting_acknowledgement()) {
            let frame_start = Instant::now();
            self.tick_once(frame_start)?;

            if let Some(rest) = tick.checked_sub(frame_start.elapsed()) {
                std::thread::sleep(rest);
            }
        }

        self.client.disconnect("client closed");
        self.tick_once(Instant::now())
    }

    pub fn tick_once(&mut self, now: Instant) -> Result<(), NetError> {
        self.client.frame(now)?;

        for event in self.client.drain_events() {
            match event {
                ClientEvent::Connected => log::info!("Connected"),
                ClientEvent::Disconnected { reason } => log::info!("Disconnected: {}", reason),
                ClientEvent::Redirected { address } => log::info!("Redirected to {}", address),
            }
        }

        for event in self.inbox.borrow_mut().drain(..) {
            log::info!("Event {:?} {:?}", event.name, event.params);
        }

        if self.client.is_connected() && self.ping_due(now) {
            self.send_ping(now);
        }
        Ok(())
    }

    fn ping_due(&self, now: Instant) -> bool {
        self.last_ping.is_none_or(|last| {
            now.saturating_duration_since(last) >= self.config.ping_interval
        })
    }

    fn awaiting_acknowledgement(&self) -> bool {
        self.client
            .channel()
            .is_some_and(|channel| channel.reliable_queue_len() > 0)
    }

    fn send_ping(&mut self, now: Instant) {
        let Some(channel) = self.client.channel_mut() else {
            return;
        };

        let event = Event::new("ping").with_param("n", self.next_ping.to_string());
        match send_event(channel, &event) {
            Ok(()) => {
                log::debug!("Sent ping {}", self.next_ping);
                self.next_ping += 1;
                self.last_ping = Some(now);
            }
            Err(e) => log::warn!("Ping not queued: {}", e),
        }
    }
}
