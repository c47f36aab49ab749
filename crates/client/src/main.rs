mod config;
mod session;

use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use config::ClientConfig;
use session::PingSession;

#[derive(Parser)]
#[command(name = "ticknet-client")]
#[command(about = "Headless ticknet client that sends periodic ping events")]
struct Args {
    #[arg(
        short,
        long,
        default_value = "127.0.0.1:9999",
        help = "Server address to connect to (host[:port])"
    )]
    server: String,

    #[arg(long, default_value_t = 1000, help = "Ping interval in ms")]
    ping_interval: u64,

    #[arg(long, help = "Stop after sending this many pings")]
    pings: Option<u64>,

    #[arg(long, default_value_t = 15, help = "Channel timeout in seconds")]
    timeout: u64,

    #[arg(long, default_value_t = 100, help = "Transmit interval in ms")]
    transmit_interval: u64,

    #[arg(long, help = "Drop this percentage of outgoing datagrams")]
    loss_percent: Option<f32>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut config = ClientConfig {
        ping_interval: Duration::from_millis(args.ping_interval),
        ..Default::default()
    }
    .with_loss(args.loss_percent);
    config.net.channel.timeout = Duration::from_secs(args.timeout);
    config.net.channel.transmit_interval = Duration::from_millis(args.transmit_interval);
    config.net.validate()?;

    let mut session = PingSession::connect(&args.server, config)?;
    session.run(args.pings)?;

    log::info!("Client exiting");
    Ok(())
}
