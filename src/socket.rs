use crate::address::{BoundAddress, Destination, ProxyEndpoint};
use crate::counters::{ByteCounters, TrafficTotals};
use crate::error::ProxyError;
use crate::handshake::{Handshake, HandshakeStage, Outcome};
use std::fmt;
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{debug, info, trace, warn};

/// Transport is the byte stream to the SOCKS5 proxy that a
/// [`ProxySocket`] drives. Completion of `connect` and all inbound
/// activity are reported back through [`ProxySocket::handle_event`]
pub trait Transport {
    /// connect starts connecting to the proxy; success is reported
    /// later as [`TransportEvent::Connected`]
    fn connect(&mut self, endpoint: &ProxyEndpoint) -> io::Result<()>;

    /// write queues `data`. `Ok(false)` means the data was accepted but
    /// buffered; a [`TransportEvent::Drain`] follows once it is flushed.
    /// An error means the transport refused the write
    fn write(&mut self, data: &[u8]) -> io::Result<bool>;

    /// end half-closes the stream after optionally writing `data`
    fn end(&mut self, data: Option<&[u8]>) -> io::Result<()>;

    fn destroy(&mut self);

    fn pause(&mut self);

    fn resume(&mut self);

    fn set_timeout(&mut self, timeout: Option<Duration>);

    fn set_keep_alive(&mut self, enable: bool, initial_delay: Duration);

    fn set_no_delay(&mut self, no_delay: bool);

    fn local_addr(&self) -> Option<SocketAddr>;

    fn peer_addr(&self) -> Option<SocketAddr>;

    /// buffer_size is the number of bytes currently queued for writing
    fn buffer_size(&self) -> usize;
}

/// TransportEvent is a notification from the transport
#[derive(Debug)]
pub enum TransportEvent {
    Connected,
    Data(Vec<u8>),
    Error(io::Error),
    End,
    Timeout,
    Close,
    Drain,
    Readable,
}

/// SocketEvent is a notification delivered to the owner of a [`ProxySocket`]
#[derive(Debug)]
pub enum SocketEvent {
    Connect,
    Data(Vec<u8>),
    Error(ProxyError),
    End,
    Timeout,
    Close,
    Drain,
    Readable,
}

/// ConnectionState is the externally visible lifecycle of a socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Handshaking,
    Connected,
    Closed,
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Handshaking => "handshaking",
            ConnectionState::Connected => "connected",
            ConnectionState::Closed => "closed",
            ConnectionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// ConnectionInfo holds the transport properties that become valid
/// once the proxied connection is established
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub local_addr: Option<SocketAddr>,
    pub remote_addr: Option<SocketAddr>,
    pub buffer_size: usize,
}

/// Phase is the internal lifecycle; the in-flight handshake lives
/// only in the phases that need it
enum Phase {
    Idle,
    Connecting(Handshake),
    Handshaking(Handshake),
    Connected,
    Closed,
    Failed,
}

/// ProxySocket is a stream to a destination tunnelled through a
/// SOCKS5 proxy.
///
/// The socket is driven by the transport's events: the owner passes every
/// [`TransportEvent`] to [`handle_event`](ProxySocket::handle_event) and
/// receives [`SocketEvent`]s, in order, on the channel returned by
/// [`new`](ProxySocket::new).
pub struct ProxySocket<T> {
    endpoint: ProxyEndpoint,
    transport: T,
    phase: Phase,
    destination: Option<Destination>,
    bound: Option<BoundAddress>,
    info: Option<ConnectionInfo>,
    counters: ByteCounters,
    totals: Arc<TrafficTotals>,
    events: UnboundedSender<SocketEvent>,
}

/// ProxySocket implementation block
impl<T: Transport> ProxySocket<T> {
    /// new is a constructor for the ProxySocket type. `totals` is shared
    /// with every other socket that should count toward the same figures
    pub fn new(
        endpoint: ProxyEndpoint,
        transport: T,
        totals: Arc<TrafficTotals>,
    ) -> (Self, UnboundedReceiver<SocketEvent>) {
        let (events, rx) = unbounded_channel();

        let socket = Self {
            endpoint,
            transport,
            phase: Phase::Idle,
            destination: None,
            bound: None,
            info: None,
            counters: ByteCounters::default(),
            totals,
            events,
        };

        (socket, rx)
    }

    pub fn state(&self) -> ConnectionState {
        match self.phase {
            Phase::Idle => ConnectionState::Idle,
            Phase::Connecting(_) => ConnectionState::Connecting,
            Phase::Handshaking(_) => ConnectionState::Handshaking,
            Phase::Connected => ConnectionState::Connected,
            Phase::Closed => ConnectionState::Closed,
            Phase::Failed => ConnectionState::Failed,
        }
    }

    /// handshake_stage is the reply being waited for, if handshaking
    pub fn handshake_stage(&self) -> Option<HandshakeStage> {
        match &self.phase {
            Phase::Handshaking(hs) => hs.stage(),
            _ => None,
        }
    }

    pub fn endpoint(&self) -> &ProxyEndpoint {
        &self.endpoint
    }

    pub fn destination(&self) -> Option<&Destination> {
        self.destination.as_ref()
    }

    /// bound_address is the address the proxy reported for the
    /// outgoing connection
    pub fn bound_address(&self) -> Option<&BoundAddress> {
        self.bound.as_ref()
    }

    /// connection_info is only available once connected
    pub fn connection_info(&self) -> Option<&ConnectionInfo> {
        self.info.as_ref()
    }

    pub fn counters(&self) -> ByteCounters {
        self.counters
    }

    pub fn totals(&self) -> &Arc<TrafficTotals> {
        &self.totals
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// connect starts tunnelling to `host:port`. A socket serves a single
    /// destination for its whole lifetime
    pub fn connect(&mut self, host: &str, port: u16) -> Result<(), ProxyError> {
        if !matches!(self.phase, Phase::Idle) {
            return Err(ProxyError::ReentrantConnect(self.state()));
        }

        let destination = Destination::new(host, port);
        let handshake = Handshake::new(&destination)?;

        // DEBUG
        info!(
            "connecting to {} through SOCKS5 proxy {}",
            destination, self.endpoint
        );

        if let Err(e) = self.transport.connect(&self.endpoint) {
            self.phase = Phase::Failed;
            return Err(e.into());
        }

        self.destination = Some(destination);
        self.phase = Phase::Connecting(handshake);
        Ok(())
    }

    /// handle_event advances the socket with one transport notification
    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.on_transport_connected(),
            TransportEvent::Data(data) => self.on_data(data),
            TransportEvent::Error(e) => {
                // DEBUG
                warn!("transport error: {}", e);

                if !matches!(self.phase, Phase::Connected | Phase::Closed) {
                    self.phase = Phase::Failed;
                }
                self.emit(SocketEvent::Error(ProxyError::Transport(e)));
            }
            TransportEvent::End => self.emit(SocketEvent::End),
            TransportEvent::Timeout => self.emit(SocketEvent::Timeout),
            TransportEvent::Close => {
                let was_connected = matches!(self.phase, Phase::Connected);
                if !matches!(self.phase, Phase::Failed) {
                    self.phase = Phase::Closed;
                }
                if was_connected {
                    self.emit(SocketEvent::Close);
                }
            }
            TransportEvent::Drain => self.emit_if_connected(SocketEvent::Drain),
            TransportEvent::Readable => self.emit_if_connected(SocketEvent::Readable),
        }
    }

    /// write relays `data` to the destination. Only valid once connected
    pub fn write(&mut self, data: &[u8]) -> Result<bool, ProxyError> {
        if !matches!(self.phase, Phase::Connected) {
            return Err(ProxyError::NotConnected);
        }

        self.counters.record_written(&self.totals, data.len());
        Ok(self.transport.write(data)?)
    }

    /// end half-closes the stream. Data is only sent once connected
    pub fn end(&mut self, data: Option<&[u8]>) -> Result<(), ProxyError> {
        if !matches!(self.phase, Phase::Connected) {
            return Ok(self.transport.end(None)?);
        }

        if let Some(data) = data {
            self.counters.record_written(&self.totals, data.len());
        }
        Ok(self.transport.end(data)?)
    }

    /// destroy tears down the transport and abandons any handshake in flight
    pub fn destroy(&mut self) {
        self.transport.destroy();
        self.phase = Phase::Closed;
    }

    pub fn pause(&mut self) {
        self.transport.pause();
    }

    pub fn resume(&mut self) {
        self.transport.resume();
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.transport.set_timeout(timeout);
    }

    pub fn set_keep_alive(&mut self, enable: bool, initial_delay: Duration) {
        self.transport.set_keep_alive(enable, initial_delay);
    }

    pub fn set_no_delay(&mut self, no_delay: bool) {
        self.transport.set_no_delay(no_delay);
    }

    /// on_transport_connected sends the method selection once the
    /// proxy is reachable
    fn on_transport_connected(&mut self) {
        let handshake = match mem::replace(&mut self.phase, Phase::Failed) {
            Phase::Connecting(handshake) => handshake,
            other => {
                // DEBUG
                debug!("ignoring transport connect outside of connecting state");
                self.phase = other;
                return;
            }
        };

        if let Err(e) = self.transport.write(&Handshake::auth_request()) {
            self.emit(SocketEvent::Error(ProxyError::TransportWrite(e)));
            return;
        }

        self.phase = Phase::Handshaking(handshake);
    }

    /// on_data routes a delivery to the handshake or, once connected,
    /// straight to the owner
    fn on_data(&mut self, data: Vec<u8>) {
        let mut handshake = match mem::replace(&mut self.phase, Phase::Failed) {
            Phase::Handshaking(handshake) => handshake,
            Phase::Connected => {
                self.phase = Phase::Connected;
                self.relay(data);
                return;
            }
            other => {
                // DEBUG
                trace!(len = data.len(), "dropping data outside of the handshake");
                self.phase = other;
                return;
            }
        };

        let progress = match handshake.feed(&data) {
            Ok(progress) => progress,
            Err(e) => {
                self.emit(SocketEvent::Error(e.into()));
                return;
            }
        };

        if let Some(request) = progress.send {
            if let Err(e) = self.transport.write(&request) {
                self.emit(SocketEvent::Error(ProxyError::TransportWrite(e)));
                return;
            }
        }

        match progress.outcome {
            Outcome::Pending => self.phase = Phase::Handshaking(handshake),
            Outcome::Connected(established) => {
                self.bound = Some(established.bound);
                self.info = Some(ConnectionInfo {
                    local_addr: self.transport.local_addr(),
                    remote_addr: self.transport.peer_addr(),
                    buffer_size: self.transport.buffer_size(),
                });
                self.phase = Phase::Connected;

                // DEBUG
                if let (Some(destination), Some(bound)) = (&self.destination, &self.bound) {
                    info!("connected to {} (proxy bound {})", destination, bound);
                }

                self.emit(SocketEvent::Connect);

                if !established.payload.is_empty() {
                    self.relay(established.payload);
                }
            }
        }
    }

    fn relay(&mut self, data: Vec<u8>) {
        self.counters.record_read(&self.totals, data.len());
        self.emit(SocketEvent::Data(data));
    }

    fn emit_if_connected(&self, event: SocketEvent) {
        if matches!(self.phase, Phase::Connected) {
            self.emit(event);
        }
    }

    fn emit(&self, event: SocketEvent) {
        // A dropped receiver means nobody is listening anymore
        let _ = self.events.send(event);
    }
}
