use crate::address::{BoundAddress, Destination, ProxyEndpoint};
use crate::counters::{ByteCounters, TrafficTotals};
use crate::error::ProxyError;
use crate::handshake::{Handshake, Outcome};
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Size of the read buffer used while negotiating
const HANDSHAKE_BUF_LEN: usize = 512;

/// Socks5Stream is an async stream to a destination, relayed through a
/// SOCKS5 proxy. Reads and writes pass through unmodified once the
/// handshake has completed
#[derive(Debug)]
pub struct Socks5Stream<S> {
    inner: S,
    destination: Destination,
    bound: BoundAddress,
    // Application bytes received together with the CONNECT reply
    pending: Vec<u8>,
    pending_pos: usize,
    counters: ByteCounters,
    totals: Arc<TrafficTotals>,
}

/// Socks5Stream implementation block for TCP
impl Socks5Stream<TcpStream> {
    /// connect dials the proxy and negotiates a tunnel to `destination`
    pub async fn connect(
        proxy: &ProxyEndpoint,
        destination: &Destination,
        totals: Arc<TrafficTotals>,
    ) -> Result<Self, ProxyError> {
        // DEBUG
        info!("dialing SOCKS5 proxy {}", proxy);

        let stream = TcpStream::connect((proxy.host.as_str(), proxy.port)).await?;
        Self::handshake(stream, destination, totals).await
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.inner.peer_addr()
    }
}

/// Socks5Stream implementation block
impl<S: AsyncRead + AsyncWrite + Unpin> Socks5Stream<S> {
    /// handshake negotiates a tunnel to `destination` over an already
    /// connected stream to the proxy
    pub async fn handshake(
        mut inner: S,
        destination: &Destination,
        totals: Arc<TrafficTotals>,
    ) -> Result<Self, ProxyError> {
        let mut handshake = Handshake::new(destination)?;

        // Offer no-auth
        write_all(&mut inner, &Handshake::auth_request()).await?;

        let mut buf = [0u8; HANDSHAKE_BUF_LEN];

        loop {
            let n = inner.read(&mut buf).await?;
            if n == 0 {
                return Err(ProxyError::Transport(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "proxy closed the connection during the handshake",
                )));
            }

            let progress = handshake.feed(&buf[..n])?;

            if let Some(request) = progress.send {
                write_all(&mut inner, &request).await?;
            }

            if let Outcome::Connected(established) = progress.outcome {
                // DEBUG
                info!(
                    "connected to {} (proxy bound {})",
                    destination, established.bound
                );

                return Ok(Self {
                    inner,
                    destination: destination.clone(),
                    bound: established.bound,
                    pending: established.payload,
                    pending_pos: 0,
                    counters: ByteCounters::default(),
                    totals,
                });
            }
        }
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// bound_address is the address the proxy reported for the
    /// outgoing connection
    pub fn bound_address(&self) -> &BoundAddress {
        &self.bound
    }

    pub fn counters(&self) -> ByteCounters {
        self.counters
    }

    pub fn totals(&self) -> &Arc<TrafficTotals> {
        &self.totals
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// into_inner returns the underlying stream. Bytes that arrived with
    /// the CONNECT reply and have not been read yet are returned with it
    pub fn into_inner(mut self) -> (S, Vec<u8>) {
        let pending = self.pending.split_off(self.pending_pos);
        (self.inner, pending)
    }
}

async fn write_all<S: AsyncWrite + Unpin>(stream: &mut S, data: &[u8]) -> Result<(), ProxyError> {
    stream
        .write_all(data)
        .await
        .map_err(ProxyError::TransportWrite)?;
    stream.flush().await.map_err(ProxyError::TransportWrite)
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncRead for Socks5Stream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        // Hand out leftover handshake payload first
        if this.pending_pos < this.pending.len() {
            let n = buf.remaining().min(this.pending.len() - this.pending_pos);
            buf.put_slice(&this.pending[this.pending_pos..this.pending_pos + n]);
            this.pending_pos += n;

            if this.pending_pos == this.pending.len() {
                this.pending = Vec::new();
                this.pending_pos = 0;
            }

            this.counters.record_read(&this.totals, n);
            return Poll::Ready(Ok(()));
        }

        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        let n = buf.filled().len() - before;

        this.counters.record_read(&this.totals, n);
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncWrite for Socks5Stream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        let n = ready!(Pin::new(&mut this.inner).poll_write(cx, buf))?;
        this.counters.record_written(&this.totals, n);
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        // DEBUG
        debug!(
            "shutting down stream to {}: {} bytes read, {} bytes written",
            this.destination, this.counters.bytes_read, this.counters.bytes_written
        );

        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}
