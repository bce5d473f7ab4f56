//! End-to-end tests against a minimal SOCKS5 proxy on loopback

use proxysocket::{
    BoundAddress, ConnectReplyError, Destination, ProxyEndpoint, ProxyError, Socks5Stream,
    TrafficTotals,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// spawn_proxy starts a one-shot proxy that answers with `reply_code` and,
/// on success, echoes everything back to the client
async fn spawn_proxy(reply_code: u8) -> (SocketAddr, tokio::task::JoinHandle<(String, u16)>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let target = negotiate(&mut stream, reply_code).await;

        if reply_code == 0x00 {
            let (mut rd, mut wr) = stream.split();
            tokio::io::copy(&mut rd, &mut wr).await.unwrap();
        }

        target
    });

    (addr, handle)
}

async fn negotiate(stream: &mut TcpStream, reply_code: u8) -> (String, u16) {
    // Method selection
    let mut buf = [0u8; 2];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(buf[0], 0x05);
    let mut methods = vec![0u8; buf[1] as usize];
    stream.read_exact(&mut methods).await.unwrap();
    assert_eq!(methods, vec![0x00]);
    stream.write_all(&[0x05, 0x00]).await.unwrap();

    // CONNECT request with a domain name
    let mut header = [0u8; 5];
    stream.read_exact(&mut header).await.unwrap();
    assert_eq!(&header[..4], &[0x05, 0x01, 0x00, 0x03]);
    let mut domain = vec![0u8; header[4] as usize];
    stream.read_exact(&mut domain).await.unwrap();
    let mut port = [0u8; 2];
    stream.read_exact(&mut port).await.unwrap();

    // Reply, bound to the proxy's own address
    stream
        .write_all(&[0x05, reply_code, 0x00, 0x01, 127, 0, 0, 1, 0x04, 0x38])
        .await
        .unwrap();

    (String::from_utf8(domain).unwrap(), u16::from_be_bytes(port))
}

#[tokio::test]
async fn relays_through_proxy() {
    let (addr, proxy) = spawn_proxy(0x00).await;
    let totals = Arc::new(TrafficTotals::new());

    let mut stream = Socks5Stream::connect(
        &ProxyEndpoint::new("127.0.0.1", addr.port()),
        &Destination::new("echo.internal", 7),
        Arc::clone(&totals),
    )
    .await
    .unwrap();

    assert_eq!(
        stream.bound_address(),
        &BoundAddress::Ip("127.0.0.1:1080".parse().unwrap())
    );
    assert_eq!(stream.peer_addr().unwrap(), addr);

    stream.write_all(b"hello through socks").await.unwrap();
    let mut echoed = [0u8; 19];
    stream.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"hello through socks");

    stream.shutdown().await.unwrap();
    let (host, port) = proxy.await.unwrap();
    assert_eq!(host, "echo.internal");
    assert_eq!(port, 7);

    assert_eq!(stream.counters().bytes_written, 19);
    assert_eq!(stream.counters().bytes_read, 19);
    assert_eq!(totals.total_sent(), 19);
    assert_eq!(totals.total_received(), 19);
}

#[tokio::test]
async fn surfaces_reply_code() {
    let (addr, _proxy) = spawn_proxy(0x02).await;

    let err = Socks5Stream::connect(
        &ProxyEndpoint::new("127.0.0.1", addr.port()),
        &Destination::new("blocked.internal", 443),
        Arc::new(TrafficTotals::new()),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        ProxyError::ConnectReply(ConnectReplyError::Rejected { code: 0x02, .. })
    ));
    assert_eq!(
        err.to_string(),
        "SOCKS connection failed: connection not allowed by ruleset"
    );
}
