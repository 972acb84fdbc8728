use anyhow::bail;
use clap::Parser;
use rand::Rng;
use rudp::{Connection, RudpConfig};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, Level};

/// Marks the end of the transfer for the receiver, sent as a separate buffer after all runs
const EXIT_MARKER: &[u8] = b"EXIT";

#[derive(clap_derive::Parser)]
struct Args {
    /// the receiver's IP address
    #[clap(long, default_value = "127.0.0.1")]
    ip: IpAddr,

    #[clap(short, long, default_value_t = 4567)]
    port: u16,

    /// number of random bytes sent per run
    #[clap(short, long, default_value_t = 2 * 1024 * 1024)]
    size: usize,

    /// number of `send` calls the data is split into
    #[clap(short, long, default_value_t = 50)]
    chunks: usize,

    /// number of times the data is sent
    #[clap(short, long, default_value_t = 1)]
    repeat: usize,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .try_init()
        .ok();

    if args.size == 0 || args.chunks == 0 || args.chunks > args.size {
        bail!("size and chunks must be positive, with at least one byte per chunk");
    }

    let mut data = vec![0u8; args.size];
    rand::thread_rng().fill(&mut data[..]);

    let receiver_addr = SocketAddr::new(args.ip, args.port);
    let local_addr = match args.ip {
        IpAddr::V4(_) => SocketAddr::from(([0, 0, 0, 0], 0)),
        IpAddr::V6(_) => SocketAddr::from(([0u16; 8], 0)),
    };

    let mut connection = Connection::dial(local_addr, receiver_addr, Arc::new(RudpConfig::default_ipv4())).await?;
    info!("connected to the receiver at {:?}", receiver_addr);

    let chunk_size = args.size.div_ceil(args.chunks);
    for run in 1..=args.repeat {
        let start = Instant::now();
        for chunk in data.chunks(chunk_size) {
            connection.send(chunk).await?;
        }
        info!("run #{}: sent {} bytes in {:?}", run, args.size, start.elapsed());
    }

    connection.send(EXIT_MARKER).await?;
    info!("exit marker sent");

    connection.close().await?;
    info!("sender finished");
    Ok(())
}
