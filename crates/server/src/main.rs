mod config;
mod events;
mod server;

use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use config::ServerConfig;
use server::EchoServer;

#[derive(Parser)]
#[command(name = "ticknet-server")]
#[command(about = "Headless ticknet server that echoes reliable events")]
pub struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = ticknet::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = 60)]
    tick_rate: u32,

    #[arg(long, default_value_t = 15, help = "Channel timeout in seconds")]
    timeout: u64,

    #[arg(long, default_value_t = 100, help = "Transmit interval in ms")]
    transmit_interval: u64,

    #[arg(long, help = "Log received events without sending them back")]
    no_echo: bool,

    #[arg(long, help = "Stop after this many seconds")]
    duration: Option<u64>,

    #[arg(long, help = "Enable outgoing packet loss simulation")]
    simulate_packet_loss: bool,

    #[arg(long, default_value_t = 0.0, help = "Packet loss percentage (0-100)")]
    loss_percent: f32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let bind_addr = format!("{}:{}", args.bind, args.port);
    let config = ServerConfig::from_args(&args);
    config.net.validate()?;

    let mut server = EchoServer::new(&bind_addr, config)?;

    log::info!("Server started on {}", server.local_addr());
    server.run(args.duration.map(Duration::from_secs));
    log::info!("Server shutting down");

    Ok(())
}
