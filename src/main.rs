use anyhow::{Context, Result, anyhow};
use clap::Parser;
use proxysocket::{Destination, ProxyEndpoint, Socks5Stream, TrafficTotals};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{self, AsyncWriteExt};
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Pipe stdin/stdout through a SOCKS5 proxy", long_about = None)]
struct Args {
    /// Destination address (host:port)
    destination: Destination,

    /// SOCKS5 proxy address
    #[arg(short, long, default_value = "localhost:9050")]
    proxy: ProxyEndpoint,

    /// Handshake timeout in seconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse args
    let args = Args::parse();

    // Initialize tracing subscriber, logging to stderr so stdout
    // carries only relayed data
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let totals = Arc::new(TrafficTotals::new());

    // Negotiate the tunnel, bounded by the timeout if one was given
    let connect = Socks5Stream::connect(&args.proxy, &args.destination, Arc::clone(&totals));
    let stream = match args.timeout {
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs), connect)
            .await
            .map_err(|_| anyhow!("[ERR] SOCKS5 handshake timed out after {secs}s"))??,
        None => connect.await?,
    };

    // Relay
    let (mut from_proxy, mut to_proxy) = io::split(stream);
    let mut stdin = io::stdin();
    let mut stdout = io::stdout();

    let upload = async {
        let n = io::copy(&mut stdin, &mut to_proxy)
            .await
            .context("[ERR] relaying stdin")?;
        to_proxy.shutdown().await?;

        // DEBUG
        debug!("stdin closed after {} bytes", n);
        Ok::<_, anyhow::Error>(n)
    };

    let download = async {
        let n = io::copy(&mut from_proxy, &mut stdout)
            .await
            .context("[ERR] relaying to stdout")?;
        stdout.flush().await?;
        Ok::<_, anyhow::Error>(n)
    };

    let (sent, received) = tokio::try_join!(upload, download)?;

    // DEBUG
    info!(
        "connection closed: {} bytes sent, {} bytes received (totals: {} sent, {} received)",
        sent,
        received,
        totals.total_sent(),
        totals.total_received()
    );

    Ok(())
}
