use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use log::warn;

use super::channel::{Channel, ChannelError};
use crate::buffer::codec::{read_string, write_string};
use crate::buffer::{BitBuffer, BufferError};

pub const EVENT_MESSAGE: u32 = 0;

pub type EventCallback = Box<dyn FnMut(&BTreeMap<String, String>)>;
pub(crate) type EventRoutes = Rc<RefCell<HashMap<String, EventCallback>>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Event {
    pub name: String,
    pub params: BTreeMap<String, String>,
}

impl Event {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn write(&self, buf: &mut BitBuffer) {
        write_string(buf, &self.name);
        for (key, value) in &self.params {
            buf.write_bit(true);
            write_string(buf, key);
            write_string(buf, value);
        }
        buf.write_bit(false);
    }

    pub fn read(buf: &mut BitBuffer) -> Result<Self, BufferError> {
        let mut event = Event::new(read_string(buf)?);
        while buf.read_bit()? {
            let key = read_string(buf)?;
            let value = read_string(buf)?;
            event.params.insert(key, value);
        }
        Ok(event)
    }
}

pub fn send_event(channel: &mut Channel, event: &Event) -> Result<(), ChannelError> {
    let mut payload = BitBuffer::new();
    event.write(&mut payload);
    channel.send_reliable(EVENT_MESSAGE, payload)
}

pub fn add_event_reader(
    channel: &mut Channel,
    mut reader: impl FnMut(Event) + 'static,
) -> Result<(), ChannelError> {
    channel.add_message_reader(EVENT_MESSAGE, move |buf| {
        reader(Event::read(buf)?);
        Ok(())
    })
}

/// Routes events named `name` to `callback`. The first registration claims
/// the event reader of the channel; events with no callback are logged and
/// dropped.
pub fn add_event_callback(
    channel: &mut Channel,
    name: impl Into<String>,
    callback: impl FnMut(&BTreeMap<String, String>) + 'static,
) -> Result<(), ChannelError> {
    let routes = match channel.event_routes() {
        Some(routes) => Rc::clone(routes),
        None => {
            let routes = EventRoutes::default();
            let table = Rc::clone(&routes);
            channel.add_message_reader(EVENT_MESSAGE, move |buf| {
                let event = Event::read(buf)?;
                match table.borrow_mut().get_mut(&event.name) {
                    Some(callback) => callback(&event.params),
                    None => warn!("Unhandled event {:?}", event.name),
                }
                Ok(())
            })?;
            channel.set_event_routes(Rc::clone(&routes));
            routes
        }
    };

    let name = name.into();
    let mut routes = routes.borrow_mut();
    if routes.contains_key(&name) {
        return Err(ChannelError::DuplicateEventCallback(name));
    }
    routes.insert(name, Box::new(callback));
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::config::ChannelConfig;

    fn deliver(sender: &mut Channel, receiver: &mut Channel, event: &Event, now: Instant) {
        let outbox = Rc::new(RefCell::new(Vec::new()));
        let out = Rc::clone(&outbox);
        sender.set_send_callback(move |buf| out.borrow_mut().push(buf));

        send_event(sender, event).unwrap();
        sender.frame(now);

        let mut datagram = outbox.borrow_mut().remove(0);
        datagram.to_start();
        receiver.read(&mut datagram, now).unwrap();
    }

    #[test]
    fn test_event_wire_format() {
        let event = Event::new("spawn")
            .with_param("x", "12")
            .with_param("kind", "crate");

        let mut buf = BitBuffer::new();
        event.write(&mut buf);
        buf.write_bit(true);

        buf.to_start();
        assert_eq!(Event::read(&mut buf).unwrap(), event);
        assert!(buf.read_bit().unwrap());
    }

    #[test]
    fn test_event_without_params() {
        let mut buf = BitBuffer::new();
        Event::new("ping").write(&mut buf);
        assert_eq!(buf.bit_len(), 5 * 8 + 1);

        buf.to_start();
        let event = Event::read(&mut buf).unwrap();
        assert_eq!(event.name, "ping");
        assert!(event.params.is_empty());
        assert_eq!(event.param("missing"), None);
    }

    #[test]
    fn test_events_cross_channels() {
        let now = Instant::now();
        let outbox = Rc::new(RefCell::new(Vec::new()));
        let mut sender = Channel::new(ChannelConfig::default(), now);
        let out = Rc::clone(&outbox);
        sender.set_send_callback(move |buf| out.borrow_mut().push(buf));

        let received = Rc::new(RefCell::new(Vec::new()));
        let mut receiver = Channel::new(ChannelConfig::default(), now);
        let sink = Rc::clone(&received);
        add_event_reader(&mut receiver, move |event| sink.borrow_mut().push(event)).unwrap();

        let event = Event::new("chat").with_param("text", "hello");
        send_event(&mut sender, &event).unwrap();
        sender.frame(now + Duration::from_millis(1));

        let mut datagram = outbox.borrow_mut().remove(0);
        datagram.to_start();
        receiver.read(&mut datagram, now).unwrap();

        assert_eq!(*received.borrow(), vec![event]);
    }

    #[test]
    fn test_event_callbacks_route_by_name() {
        let now = Instant::now();
        let mut sender = Channel::new(ChannelConfig::default(), now);
        let mut receiver = Channel::new(ChannelConfig::default(), now);

        let chats = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&chats);
        add_event_callback(&mut receiver, "chat", move |params| {
            sink.borrow_mut().push(params.get("text").cloned());
        })
        .unwrap();

        let spawns = Rc::new(RefCell::new(0));
        let count = Rc::clone(&spawns);
        add_event_callback(&mut receiver, "spawn", move |_| *count.borrow_mut() += 1).unwrap();

        let event = Event::new("chat").with_param("text", "hi");
        deliver(&mut sender, &mut receiver, &event, now);

        assert_eq!(*chats.borrow(), vec![Some("hi".to_string())]);
        assert_eq!(*spawns.borrow(), 0);
    }

    #[test]
    fn test_event_callback_registered_once_per_name() {
        let mut channel = Channel::new(ChannelConfig::default(), Instant::now());
        add_event_callback(&mut channel, "chat", |_| {}).unwrap();

        assert!(matches!(
            add_event_callback(&mut channel, "chat", |_| {}),
            Err(ChannelError::DuplicateEventCallback(name)) if name == "chat"
        ));
        assert!(matches!(
            add_event_reader(&mut channel, |_| {}),
            Err(ChannelError::DuplicateReader(EVENT_MESSAGE))
        ));
    }

    #[test]
    fn test_unhandled_event_is_dropped() {
        let now = Instant::now();
        let mut sender = Channel::new(ChannelConfig::default(), now);
        let mut receiver = Channel::new(ChannelConfig::default(), now);

        let seen = Rc::new(RefCell::new(0));
        let count = Rc::clone(&seen);
        add_event_callback(&mut receiver, "chat", move |_| *count.borrow_mut() += 1).unwrap();

        deliver(&mut sender, &mut receiver, &Event::new("unknown"), now);

        assert_eq!(*seen.borrow(), 0);
        assert!(receiver.is_active());
        assert_eq!(receiver.stats().reliable_delivered, 1);
    }
}
