//! Fetch a page through a local SOCKS5 proxy (Tor's default port)

use proxysocket::{Destination, ProxyEndpoint, Socks5Stream, TrafficTotals};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let totals = Arc::new(TrafficTotals::new());
    let destination = Destination::new("example.com", 80);

    let mut stream =
        Socks5Stream::connect(&ProxyEndpoint::default(), &destination, totals.clone()).await?;
    println!("Connected to {destination}, proxy bound {}", stream.bound_address());

    stream
        .write_all(b"GET / HTTP/1.0\r\nHost: example.com\r\nConnection: close\r\n\r\n")
        .await?;

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await?;
    println!("{}", String::from_utf8_lossy(&response));

    println!(
        "Sent {} bytes, received {} bytes",
        totals.total_sent(),
        totals.total_received()
    );
    Ok(())
}
