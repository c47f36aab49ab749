use std::io;
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};

#[derive(Debug, thiserror::Error)]
pub enum AddressError {
    #[error("invalid port in address {0:?}")]
    InvalidPort(String),
    #[error("no ipv4 address found for {0:?}")]
    Unresolved(String),
    #[error("address lookup failed: {0}")]
    Io(#[from] io::Error),
}

/// Resolves `host[:port]` to an IPv4 socket address. Literal addresses are
/// taken as-is; anything else goes through the system resolver. A missing
/// port means 0 and an empty host means any interface.
pub fn resolve(address: &str) -> Result<SocketAddr, AddressError> {
    let (host, port) = split_host_port(address)?;

    if host.is_empty() {
        return Ok(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)));
    }

    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Ok(SocketAddr::from((ip, port)));
    }

    (host, port)
        .to_socket_addrs()?
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| AddressError::Unresolved(address.to_string()))
}

fn split_host_port(address: &str) -> Result<(&str, u16), AddressError> {
    match address.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .map_err(|_| AddressError::InvalidPort(address.to_string()))?;
            Ok((host, port))
        }
        None => Ok((address, 0)),
    }
}

/// Network byte order: `1.2.3.4` is `0x01020304` on every platform.
pub fn ipv4_to_u32(ip: Ipv4Addr) -> u32 {
    u32::from_be_bytes(ip.octets())
}

pub fn ipv4_from_u32(value: u32) -> Ipv4Addr {
    Ipv4Addr::from(value.to_be_bytes())
}
