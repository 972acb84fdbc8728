use clap::Parser;
use rudp::{Connection, ConnectionState, Received, RudpConfig};
use std::fs::File;
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn, Level};

const EXIT_MARKER: &[u8] = b"EXIT";

#[derive(clap_derive::Parser)]
struct Args {
    #[clap(short, long, default_value_t = 4567)]
    port: u16,

    /// the file the received data is written to
    #[clap(short, long, default_value = "received_file.txt")]
    output: PathBuf,

    /// number of bytes per run, must match the sender's
    #[clap(short, long, default_value_t = 2 * 1024 * 1024)]
    size: usize,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,
}

enum Run {
    Complete(Vec<u8>),
    Exit,
    /// the sender closed the connection, possibly in the middle of a run
    Closed(Vec<u8>),
}

/// Reads one run of `size` bytes. Runs are sent by separate `send` calls, so a receive call that
///  is limited to the rest of the current run never returns bytes of the next run.
async fn receive_run(connection: &mut Connection, size: usize) -> anyhow::Result<Run> {
    let mut data = Vec::with_capacity(size);
    while data.len() < size {
        match connection.receive(size - data.len()).await? {
            Received::Data(bytes) => {
                if data.is_empty() && bytes == EXIT_MARKER {
                    return Ok(Run::Exit);
                }
                data.extend_from_slice(&bytes);
            }
            Received::EndOfStream => return Ok(Run::Closed(data)),
        }
    }
    Ok(Run::Complete(data))
}

/// bandwidth in MB/s
fn bandwidth(num_bytes: usize, elapsed: Duration) -> f64 {
    num_bytes as f64 / elapsed.as_secs_f64().max(1e-9) / (1024.0 * 1024.0)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .try_init()
        .ok();

    let mut output = File::create(&args.output)?;

    info!("waiting for RUDP connection on port {}", args.port);
    let mut connection = Connection::listen(SocketAddr::from(([0, 0, 0, 0], args.port)), Arc::new(RudpConfig::default_ipv4())).await?;
    info!("sender {:?} connected, beginning to receive", connection.peer_addr());

    println!("--------------------------------------");
    println!("- * Statistics For Each Run * -");

    let mut runs: Vec<(Duration, f64)> = Vec::new();
    loop {
        let start = Instant::now();
        match receive_run(&mut connection, args.size).await? {
            Run::Complete(data) => {
                output.write_all(&data)?;

                let elapsed = start.elapsed();
                let bandwidth = bandwidth(data.len(), elapsed);
                runs.push((elapsed, bandwidth));
                println!("Run #{}: Time={:.1}ms; Bandwidth={:.2}MB/s", runs.len(), elapsed.as_secs_f64() * 1000.0, bandwidth);
            }
            Run::Exit => {
                info!("received exit marker from sender");
                break;
            }
            Run::Closed(data) => {
                if !data.is_empty() {
                    warn!("sender closed the connection after {} bytes of an incomplete run", data.len());
                    output.write_all(&data)?;
                }
                break;
            }
        }
    }

    if connection.state() == ConnectionState::Established {
        connection.await_close().await?;
    }
    output.flush()?;

    if !runs.is_empty() {
        let average_millis = runs.iter().map(|(t, _)| t.as_secs_f64() * 1000.0).sum::<f64>() / runs.len() as f64;
        let average_bandwidth = runs.iter().map(|(_, b)| b).sum::<f64>() / runs.len() as f64;

        println!("----------------------------------");
        println!("- * Statistics For All Runs * -");
        println!("- Average time: {:.1}ms", average_millis);
        println!("- Average bandwidth: {:.2}MB/s", average_bandwidth);
        println!("----------------------------------");
    }

    info!("receiver finished, data written to {:?}", args.output);
    Ok(())
}
