use std::collections::BTreeMap;
use std::net::SocketAddr;

use log::{trace, warn};

use super::socket::{DatagramSocket, SocketError};
use crate::buffer::codec::write_to_buffer;
use crate::buffer::{BitBuffer, BufferError};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("handler for message {0} is already registered")]
    DuplicateHandler(u32),
    #[error("no handler registered for message {0}")]
    UnknownMessage(u32),
    #[error("malformed message: {0}")]
    Buffer(#[from] BufferError),
    #[error(transparent)]
    Socket(#[from] SocketError),
}

/// Handlers get the dispatcher's context, a way to reply, the sender and the
/// datagram positioned just after the message id.
pub type MessageHandler<C> =
    Box<dyn FnMut(&mut C, &mut Messenger, SocketAddr, &mut BitBuffer) -> Result<(), DispatchError>>;

pub struct Messenger {
    socket: DatagramSocket,
}

impl Messenger {
    /// Prefixes `id` as varbits and appends the written bits of `payload`.
    pub fn send_message(
        &mut self,
        id: u32,
        address: SocketAddr,
        payload: &BitBuffer,
    ) -> Result<(), DispatchError> {
        let mut datagram = BitBuffer::new();
        datagram.write_bits_var(id);
        write_to_buffer(payload, &mut datagram);

        self.socket.send_to(datagram.as_bytes(), address)?;
        Ok(())
    }

    pub fn socket(&self) -> &DatagramSocket {
        &self.socket
    }
}

pub struct Dispatcher<C> {
    messenger: Messenger,
    handlers: BTreeMap<u32, MessageHandler<C>>,
}

impl<C> Dispatcher<C> {
    pub fn new(socket: DatagramSocket) -> Self {
        Self {
            messenger: Messenger { socket },
            handlers: BTreeMap::new(),
        }
    }

    pub fn add_message<F>(&mut self, id: u32, handler: F) -> Result<(), DispatchError>
    where
        F: FnMut(&mut C, &mut Messenger, SocketAddr, &mut BitBuffer) -> Result<(), DispatchError>
            + 'static,
    {
        if self.handlers.contains_key(&id) {
            return Err(DispatchError::DuplicateHandler(id));
        }
        self.handlers.insert(id, Box::new(handler));
        Ok(())
    }

    pub fn remove_message(&mut self, id: u32) -> bool {
        self.handlers.remove(&id).is_some()
    }

    pub fn send_message(
        &mut self,
        id: u32,
        address: SocketAddr,
        payload: &BitBuffer,
    ) -> Result<(), DispatchError> {
        self.messenger.send_message(id, address, payload)
    }

    pub fn dispatch(
        &mut self,
        ctx: &mut C,
        address: SocketAddr,
        data: &[u8],
    ) -> Result<(), DispatchError> {
        let mut buf = BitBuffer::from_bytes(data);
        let id = buf.read_bits_var()?;

        let handler = self
            .handlers
            .get_mut(&id)
            .ok_or(DispatchError::UnknownMessage(id))?;

        trace!("Dispatching message {} from {}", id, address);
        handler(ctx, &mut self.messenger, address, &mut buf)
    }

    /// Drains the socket and dispatches every datagram. Malformed or unknown
    /// datagrams are logged and dropped. Returns how many were received.
    pub fn frame(&mut self, ctx: &mut C) -> Result<usize, DispatchError> {
        let datagrams = self.messenger.socket.receive()?;
        let count = datagrams.len();

        for (address, data) in datagrams {
            if let Err(e) = self.dispatch(ctx, address, &data) {
                warn!("Dropping datagram from {}: {}", address, e);
            }
        }

        Ok(count)
    }

    pub fn messenger(&self) -> &Messenger {
        &self.messenger
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.messenger.socket.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::{Duration, Instant};

    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Vec<(u32, u16)>,
    }

    fn dispatcher() -> Dispatcher<Recorder> {
        Dispatcher::new(DatagramSocket::bind("127.0.0.1:0").unwrap())
    }

    fn encode(id: u32, value: u16) -> Vec<u8> {
        let mut buf = BitBuffer::new();
        buf.write_bits_var(id);
        buf.write_u16(value);
        buf.into_vec()
    }

    #[test]
    fn test_duplicate_handler_rejected() {
        let mut d = dispatcher();
        d.add_message(5, |_, _, _, _| Ok(())).unwrap();

        assert!(matches!(
            d.add_message(5, |_, _, _, _| Ok(())),
            Err(DispatchError::DuplicateHandler(5))
        ));

        assert!(d.remove_message(5));
        assert!(!d.remove_message(5));
        d.add_message(5, |_, _, _, _| Ok(())).unwrap();
    }

    #[test]
    fn test_dispatch_routes_by_id() {
        let mut d = dispatcher();
        for id in [3, 40] {
            d.add_message(id, move |ctx: &mut Recorder, _, _, buf| {
                ctx.seen.push((id, buf.read_u16()?));
                Ok(())
            })
            .unwrap();
        }

        let from: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let mut ctx = Recorder::default();
        d.dispatch(&mut ctx, from, &encode(40, 0xBEEF)).unwrap();
        d.dispatch(&mut ctx, from, &encode(3, 7)).unwrap();

        assert_eq!(ctx.seen, vec![(40, 0xBEEF), (3, 7)]);
    }

    #[test]
    fn test_unknown_and_truncated_messages() {
        let mut d = dispatcher();
        d.add_message(1, |ctx: &mut Recorder, _, _, buf| {
            ctx.seen.push((1, buf.read_u16()?));
            Ok(())
        })
        .unwrap();

        let from: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let mut ctx = Recorder::default();

        assert!(matches!(
            d.dispatch(&mut ctx, from, &encode(9, 0)),
            Err(DispatchError::UnknownMessage(9))
        ));
        assert!(matches!(
            d.dispatch(&mut ctx, from, &[]),
            Err(DispatchError::Buffer(_))
        ));
        assert!(ctx.seen.is_empty());
    }

    #[test]
    fn test_send_message_over_socket() {
        let mut sender = dispatcher();
        let mut receiver = dispatcher();
        receiver
            .add_message(6, |ctx: &mut Recorder, _, _, buf| {
                ctx.seen.push((6, buf.read_u16()?));
                Ok(())
            })
            .unwrap();

        let mut payload = BitBuffer::new();
        payload.write_u16(1234);
        sender
            .send_message(6, receiver.local_addr(), &payload)
            .unwrap();
        sender
            .send_message(99, receiver.local_addr(), &payload)
            .unwrap();

        let mut ctx = Recorder::default();
        let start = Instant::now();
        let mut received = 0;
        while received < 2 && start.elapsed() < Duration::from_millis(500) {
            received += receiver.frame(&mut ctx).unwrap();
            thread::sleep(Duration::from_millis(1));
        }

        assert_eq!(received, 2);
        assert_eq!(ctx.seen, vec![(6, 1234)]);
    }
}
