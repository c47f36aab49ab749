use std::time::Duration;

use ticknet::{NetConfig, PacketLossSimulation};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub tick_rate: u32,
    pub ping_interval: Duration,
    pub net: NetConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            ping_interval: Duration::from_secs(1),
            net: NetConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }

    pub fn with_loss(mut self, loss_percent: Option<f32>) -> Self {
        if let Some(loss_percent) = loss_percent {
            self.net.loss_simulation = PacketLossSimulation::new(loss_percent);
        }
        self
    }
}
