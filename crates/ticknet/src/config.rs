use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::net::{MAX_DATAGRAM_SIZE, PacketLossSimulation, RECEIVE_BUFFER_SIZE};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("timeout must be greater than the transmit interval")]
    TimeoutNotGreaterThanInterval,
    #[error("transmit interval must be non-zero")]
    InvalidTransmitInterval,
    #[error("reliable queue must hold at least one message")]
    InvalidReliableQueue,
    #[error("reconnect delay must be non-zero")]
    InvalidReconnectDelay,
    #[error("max datagram size must be between 1 and {} bytes", RECEIVE_BUFFER_SIZE)]
    InvalidDatagramSize,
    #[error("loss percentage must be within 0-100")]
    InvalidLossPercent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub timeout: Duration,
    pub transmit_interval: Duration,
    pub max_reliable_queue: usize,
    /// Upper bound for one encoded datagram, message id included.
    pub max_datagram_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            transmit_interval: Duration::from_millis(100),
            max_reliable_queue: 1024,
            max_datagram_size: MAX_DATAGRAM_SIZE,
        }
    }
}

impl ChannelConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transmit_interval.is_zero() {
            return Err(ConfigError::InvalidTransmitInterval);
        }
        if self.timeout <= self.transmit_interval {
            return Err(ConfigError::TimeoutNotGreaterThanInterval);
        }
        if self.max_reliable_queue == 0 {
            return Err(ConfigError::InvalidReliableQueue);
        }
        if self.max_datagram_size == 0 || self.max_datagram_size > RECEIVE_BUFFER_SIZE {
            return Err(ConfigError::InvalidDatagramSize);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetConfig {
    pub channel: ChannelConfig,
    /// How long a client waits for a `Connect` reply before asking again. A
    /// server ignores a repeated `Connect` from a peer heard within this window.
    pub reconnect_delay: Duration,
    pub loss_simulation: PacketLossSimulation,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            channel: ChannelConfig::default(),
            reconnect_delay: Duration::from_secs(2),
            loss_simulation: PacketLossSimulation::default(),
        }
    }
}

impl NetConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.channel.validate()?;

        if self.reconnect_delay.is_zero() {
            return Err(ConfigError::InvalidReconnectDelay);
        }
        let loss = self.loss_simulation.loss_percent;
        if !loss.is_finite() || !(0.0..=100.0).contains(&loss) {
            return Err(ConfigError::InvalidLossPercent);
        }
        Ok(())
    }
}
