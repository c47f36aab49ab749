use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

const RATE_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PacketLossSimulation {
    pub enabled: bool,
    pub loss_percent: f32,
}

impl PacketLossSimulation {
    pub fn new(loss_percent: f32) -> Self {
        Self {
            enabled: true,
            loss_percent,
        }
    }

    pub fn should_drop(&self) -> bool {
        if !self.enabled || self.loss_percent <= 0.0 {
            return false;
        }
        if self.loss_percent >= 100.0 {
            return true;
        }
        rand_percent() * 100.0 < self.loss_percent
    }
}

#[derive(Debug, Clone, Default)]
pub struct SocketStats {
    pub datagrams_sent: u64,
    pub datagrams_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Swallowed by the loss simulation.
    pub datagrams_dropped: u64,

    pub datagrams_sent_per_second: u64,
    pub datagrams_received_per_second: u64,
    pub bytes_sent_per_second: u64,
    pub bytes_received_per_second: u64,
    window: Option<RateWindow>,
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    started: Instant,
    datagrams_sent: u64,
    datagrams_received: u64,
    bytes_sent: u64,
    bytes_received: u64,
}

impl SocketStats {
    /// Rates are the totals accumulated over the last full second.
    pub fn update_rates(&mut self, now: Instant) {
        let Some(window) = self.window else {
            self.window = Some(self.open_window(now));
            return;
        };
        if now.saturating_duration_since(window.started) < RATE_WINDOW {
            return;
        }

        self.datagrams_sent_per_second = self.datagrams_sent - window.datagrams_sent;
        self.datagrams_received_per_second = self.datagrams_received - window.datagrams_received;
        self.bytes_sent_per_second = self.bytes_sent - window.bytes_sent;
        self.bytes_received_per_second = self.bytes_received - window.bytes_received;
        self.window = Some(self.open_window(now));
    }

    pub fn datagrams_per_second(&self) -> u64 {
        self.datagrams_sent_per_second + self.datagrams_received_per_second
    }

    pub fn bytes_per_second(&self) -> u64 {
        self.bytes_sent_per_second + self.bytes_received_per_second
    }

    fn open_window(&self, now: Instant) -> RateWindow {
        RateWindow {
            started: now,
            datagrams_sent: self.datagrams_sent,
            datagrams_received: self.datagrams_received,
            bytes_sent: self.bytes_sent,
            bytes_received: self.bytes_received,
        }
    }
}

pub fn rand_percent() -> f32 {
    rand_u64() as f32 / u64::MAX as f32
}

pub fn rand_u64() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hash, Hasher};
    use std::time::Instant;

    let mut hasher = RandomState::new().build_hasher();
    Instant::now().hash(&mut hasher);
    hasher.finish()
}
