use std::time::Duration;

use ticknet::{ChannelConfig, NetConfig, PacketLossSimulation};

use crate::Args;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub tick_rate: u32,
    /// Reliable events received from a client are sent back to it.
    pub echo: bool,
    pub net: NetConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            echo: true,
            net: NetConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_args(args: &Args) -> Self {
        let loss_simulation = if args.simulate_packet_loss {
            PacketLossSimulation::new(args.loss_percent)
        } else {
            PacketLossSimulation::default()
        };

        Self {
            tick_rate: args.tick_rate,
            echo: !args.no_echo,
            net: NetConfig {
                channel: ChannelConfig {
                    timeout: Duration::from_secs(args.timeout),
                    transmit_interval: Duration::from_millis(args.transmit_interval),
                    ..Default::default()
                },
                loss_simulation,
                ..Default::default()
            },
        }
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }
}
