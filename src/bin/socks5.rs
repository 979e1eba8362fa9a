use std::time::Duration;

use clap::Parser;
use socks5d::config::Config;
use socks5d::server::Server;
use socks5d::Result;
use tracing::info;

#[derive(Parser, Debug)]
struct Args {
    #[arg(short, default_value_t = 8082)]
    port: u16,

    #[arg(short, long, default_value = "127.0.0.1")]
    listen: String,

    #[arg(long, default_value_t = 1024)]
    backlog: u32,

    /// Seconds without socket activity before a session is closed
    #[arg(long, default_value_t = 300)]
    idle_timeout: u64,

    /// Most bytes read from one socket per readiness event
    #[arg(long, default_value_t = 16 * 1024)]
    read_chunk: usize,

    /// Per-direction buffer size at which reading pauses
    #[arg(long, default_value_t = 256 * 1024)]
    high_water: usize,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Config {
            listen: args.listen,
            port: args.port,
            backlog: args.backlog,
            idle_timeout: Duration::from_secs(args.idle_timeout),
            read_chunk: args.read_chunk,
            high_water: args.high_water,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let server = Server::bind(Config::from(args)).await?;

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    info!("socks5 stopped");
    Ok(())
}
