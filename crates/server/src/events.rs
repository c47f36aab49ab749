use std::net::SocketAddr;

use ticknet::{Event, ServerEvent};

/// Everything the server loop reports to the console.
#[derive(Debug, Clone)]
pub enum LogEvent {
    Network(ServerEvent),
    Received { addr: SocketAddr, event: Event },
    Error { message: String },
}

impl LogEvent {
    pub fn log(&self) {
        match self {
            LogEvent::Network(ServerEvent::ClientConnected { addr }) => {
                log::info!("Client {} connected", addr);
            }
            LogEvent::Network(ServerEvent::ClientDisconnected { addr, reason }) => {
                log::info!("Client {} {}", addr, reason);
            }
            LogEvent::Received { addr, event } => {
                log::info!("Event {:?} from {} {:?}", event.name, addr, event.params);
            }
            LogEvent::Error { message } => log::error!("{}", message),
        }
    }
}
