//! The client side of the SOCKS5 negotiation as a byte-driven state machine.
//!
//! [`Handshake`] performs no I/O. The owner writes [`Handshake::auth_request`]
//! once the transport to the proxy is up, then hands every delivery from the
//! proxy to [`Handshake::feed`], writes whatever [`Progress::send`] carries and
//! stops feeding once the handshake completes or fails. Deliveries may split
//! or merge the proxy's replies arbitrarily: each stage consumes exactly its
//! own bytes and the rest is carried over to the next stage or returned as
//! application payload.

use crate::address::{BoundAddress, Destination, decode_bound_address};
use crate::error::{AddressError, AuthError, ConnectReplyError, HandshakeError};
use crate::protocol::{AddressType, AuthMethod, Command, RSV, ReplyCode, Version, reply_message};
use tracing::{debug, trace};

/// Length of the method selection reply: VER + METHOD
const AUTH_REPLY_LEN: usize = 2;

/// Length of the CONNECT reply before BND.ADDR: VER + REP + RSV
const REPLY_HEADER_LEN: usize = 3;

/// HandshakeStage is the reply the handshake is currently waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HandshakeStage {
    AwaitingAuthReply,
    AwaitingConnectReply,
}

/// Established is the result of a successful negotiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Established {
    /// Address the proxy bound for the outgoing connection
    pub bound: BoundAddress,

    /// Application bytes that followed the CONNECT reply in the same delivery
    pub payload: Vec<u8>,
}

/// Outcome reports whether the handshake finished during a `feed`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Pending,
    Connected(Established),
}

/// Progress is what a single `feed` call produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    /// Bytes that must be written to the proxy before anything else
    pub send: Option<Vec<u8>>,
    pub outcome: Outcome,
}

/// Handshake drives one CONNECT negotiation for one destination
#[derive(Debug)]
pub struct Handshake {
    // None once the handshake has completed or failed
    stage: Option<HandshakeStage>,
    address_type: AddressType,
    connect_request: Vec<u8>,
    buf: Vec<u8>,
}

/// Handshake implementation block
impl Handshake {
    /// new encodes the CONNECT request for `destination` up front, so an
    /// unencodable host is rejected before anything is sent to the proxy
    pub fn new(destination: &Destination) -> Result<Self, AddressError> {
        // SOCKS5 request format
        // +----+-----+-------+------+----------+----------+
        // |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
        // +----+-----+-------+------+----------+----------+
        // | 1  |  1  | X'00' |  1   | Variable |    2     |
        // +----+-----+-------+------+----------+----------+
        let mut request = vec![Version::SOCKS5 as u8, Command::Connect as u8, RSV];
        let address_type = destination.encode(&mut request)?;

        Ok(Self {
            stage: Some(HandshakeStage::AwaitingAuthReply),
            address_type,
            connect_request: request,
            buf: Vec::new(),
        })
    }

    /// auth_request is the method selection message offering "no authentication"
    pub fn auth_request() -> [u8; 3] {
        // ClientHello format
        // +----+----------+----------+
        // |VER | NMETHODS | METHODS  |
        // +----+----------+----------+
        // | 1  |    1     | 1 to 255 |
        // +----+----------+----------+
        [Version::SOCKS5 as u8, 0x01, AuthMethod::NoAuth as u8]
    }

    /// stage is the reply being waited for; there is no stage once the
    /// handshake has completed or failed
    pub fn stage(&self) -> Option<HandshakeStage> {
        self.stage
    }

    pub fn address_type(&self) -> AddressType {
        self.address_type
    }

    /// connect_request is the encoded CONNECT message for the destination
    pub fn connect_request(&self) -> &[u8] {
        &self.connect_request
    }

    /// feed consumes one delivery from the proxy.
    ///
    /// Both an error and `Outcome::Connected` are terminal: later calls
    /// return `HandshakeError::Finished` without looking at the bytes.
    pub fn feed(&mut self, data: &[u8]) -> Result<Progress, HandshakeError> {
        let Some(stage) = self.stage else {
            return Err(HandshakeError::Finished);
        };

        trace!(?stage, bytes = ?data, "socks data");
        self.buf.extend_from_slice(data);

        let result = self.advance();

        if !matches!(
            result,
            Ok(Progress {
                outcome: Outcome::Pending,
                ..
            })
        ) {
            self.stage = None;
            self.buf.clear();
        }

        result
    }

    /// advance runs the buffered bytes through as many stages as they complete
    fn advance(&mut self) -> Result<Progress, HandshakeError> {
        let mut send = None;

        loop {
            match self.stage {
                None => return Err(HandshakeError::Finished),
                Some(HandshakeStage::AwaitingAuthReply) => {
                    if self.buf.len() < AUTH_REPLY_LEN {
                        return Ok(Progress {
                            send,
                            outcome: Outcome::Pending,
                        });
                    }

                    check_auth_reply(&self.buf[..AUTH_REPLY_LEN])?;
                    self.buf.drain(..AUTH_REPLY_LEN);

                    // DEBUG
                    debug!("proxy accepted no-auth, sending CONNECT request");

                    send = Some(self.connect_request.clone());
                    self.stage = Some(HandshakeStage::AwaitingConnectReply);
                }
                Some(HandshakeStage::AwaitingConnectReply) => {
                    check_reply_header(&self.buf)?;

                    let Some((bound, used)) = decode_bound_address(&self.buf, REPLY_HEADER_LEN)?
                    else {
                        return Ok(Progress {
                            send,
                            outcome: Outcome::Pending,
                        });
                    };

                    // Everything after the reply belongs to the application
                    let payload = self.buf.split_off(REPLY_HEADER_LEN + used);

                    // DEBUG
                    debug!(%bound, trailing = payload.len(), "CONNECT granted");

                    return Ok(Progress {
                        send,
                        outcome: Outcome::Connected(Established { bound, payload }),
                    });
                }
            }
        }
    }
}

/// check_auth_reply validates the proxy's method selection
fn check_auth_reply(reply: &[u8]) -> Result<(), AuthError> {
    // ServerChoice method selection reply format
    // +----+--------+
    // |VER | METHOD |
    // +----+--------+
    // | 1  |   1    |
    // +----+--------+
    let (version, method) = (reply[0], reply[1]);

    if version != Version::SOCKS5 as u8 {
        return Err(AuthError::Version(version));
    }

    match method {
        m if m == AuthMethod::NoAuth as u8 => Ok(()),
        m if m == AuthMethod::NoAcceptable as u8 => Err(AuthError::NoAcceptableMethods),
        m => Err(AuthError::Method(m)),
    }
}

/// check_reply_header validates whichever of VER, REP and RSV have
/// arrived so far
fn check_reply_header(reply: &[u8]) -> Result<(), ConnectReplyError> {
    // SOCKS5 reply format
    // +----+-----+-------+------+----------+----------+
    // |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
    // +----+-----+-------+------+----------+----------+
    // | 1  |  1  | X'00' |  1   | Variable |    2     |
    // +----+-----+-------+------+----------+----------+
    if let Some(&version) = reply.first() {
        if version != Version::SOCKS5 as u8 {
            return Err(ConnectReplyError::Version(version));
        }
    }

    if let Some(&code) = reply.get(1) {
        if code != ReplyCode::Succeeded as u8 {
            return Err(ConnectReplyError::Rejected {
                code,
                reason: reply_message(code),
            });
        }
    }

    if let Some(&reserved) = reply.get(2) {
        if reserved != RSV {
            return Err(ConnectReplyError::Reserved(reserved));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const AUTH_OK: [u8; 2] = [0x05, 0x00];
    const REPLY_OK: [u8; 10] = [0x05, 0x00, 0x00, 0x01, 127, 0, 0, 1, 0x1f, 0x90];

    fn handshake(host: &str, port: u16) -> Handshake {
        Handshake::new(&Destination::new(host, port)).unwrap()
    }

    #[test]
    fn auth_request_offers_no_auth() {
        assert_eq!(Handshake::auth_request(), [0x05, 0x01, 0x00]);
    }

    #[test]
    fn auth_reply_triggers_connect_request() {
        let mut hs = handshake("example.com", 80);
        let progress = hs.feed(&AUTH_OK).unwrap();

        let mut expected = vec![0x05, 0x01, 0x00, 0x03, 11];
        expected.extend_from_slice(b"example.com");
        expected.extend_from_slice(&[0x00, 0x50]);

        assert_eq!(progress.send, Some(expected));
        assert_eq!(progress.outcome, Outcome::Pending);
        assert_eq!(hs.stage(), Some(HandshakeStage::AwaitingConnectReply));
        assert_eq!(hs.address_type(), AddressType::DomainName);
    }

    #[test]
    fn connect_request_for_ip_destinations() {
        let hs = handshake("10.1.2.3", 443);
        assert_eq!(
            hs.connect_request(),
            &[0x05, 0x01, 0x00, 0x01, 10, 1, 2, 3, 0x01, 0xbb]
        );

        let hs = handshake("::1", 22);
        let mut expected = vec![0x05, 0x01, 0x00, 0x04];
        expected.extend_from_slice(&[0; 15]);
        expected.extend_from_slice(&[1, 0x00, 0x16]);
        assert_eq!(hs.connect_request(), expected.as_slice());
        assert_eq!(hs.address_type(), AddressType::IPv6);
    }

    #[test]
    fn oversized_domain_is_rejected_up_front() {
        let err = Handshake::new(&Destination::new("a".repeat(256), 80)).unwrap_err();
        assert_eq!(err, AddressError::DomainTooLong(256));
    }

    #[test]
    fn unsupported_method_fails_without_connect_request() {
        let mut hs = handshake("example.com", 80);
        let err = hs.feed(&[0x05, 0x01]).unwrap_err();
        assert_eq!(err, HandshakeError::Authentication(AuthError::Method(0x01)));
        assert_eq!(hs.stage(), None);

        // The reply that would follow is never parsed
        assert_eq!(hs.feed(&[0x05, 0x00]).unwrap_err(), HandshakeError::Finished);
    }

    #[test]
    fn auth_reply_errors() {
        let mut hs = handshake("example.com", 80);
        assert_eq!(
            hs.feed(&[0x04, 0x00]).unwrap_err(),
            HandshakeError::Authentication(AuthError::Version(0x04))
        );

        let mut hs = handshake("example.com", 80);
        assert_eq!(
            hs.feed(&[0x05, 0xff]).unwrap_err(),
            HandshakeError::Authentication(AuthError::NoAcceptableMethods)
        );
    }

    #[test]
    fn successful_reply_connects() {
        let mut hs = handshake("example.com", 80);
        hs.feed(&AUTH_OK).unwrap();

        let progress = hs.feed(&REPLY_OK).unwrap();
        assert_eq!(progress.send, None);
        assert_eq!(
            progress.outcome,
            Outcome::Connected(Established {
                bound: BoundAddress::Ip("127.0.0.1:8080".parse().unwrap()),
                payload: Vec::new(),
            })
        );
    }

    #[test]
    fn host_unreachable_maps_to_message() {
        let mut hs = handshake("example.com", 80);
        hs.feed(&AUTH_OK).unwrap();

        let err = hs.feed(&[0x05, 0x04, 0x00]).unwrap_err();
        assert_eq!(
            err,
            HandshakeError::ConnectReply(ConnectReplyError::Rejected {
                code: 0x04,
                reason: "host unreachable",
            })
        );
        assert_eq!(err.to_string(), "host unreachable");
    }

    #[test]
    fn connect_reply_header_errors() {
        let cases: [(&[u8], ConnectReplyError); 3] = [
            (&[0x04, 0x00, 0x00], ConnectReplyError::Version(0x04)),
            (&[0x05, 0x00, 0x01], ConnectReplyError::Reserved(0x01)),
            (&[0x05, 0x00, 0x00, 0x02], ConnectReplyError::AddressType(0x02)),
        ];

        for (reply, expected) in cases {
            let mut hs = handshake("example.com", 80);
            hs.feed(&AUTH_OK).unwrap();
            assert_eq!(
                hs.feed(reply).unwrap_err(),
                HandshakeError::ConnectReply(expected)
            );
        }
    }

    #[test]
    fn trailing_payload_is_returned_not_parsed() {
        let mut hs = handshake("example.com", 80);
        hs.feed(&AUTH_OK).unwrap();

        let mut delivery = REPLY_OK.to_vec();
        delivery.extend_from_slice(&[0x05, 0x00, 0x00, 0xde, 0xad]);

        let progress = hs.feed(&delivery).unwrap();
        let Outcome::Connected(established) = progress.outcome else {
            panic!("expected the handshake to complete");
        };
        assert_eq!(established.payload, vec![0x05, 0x00, 0x00, 0xde, 0xad]);
    }

    #[test]
    fn single_delivery_spanning_both_replies() {
        let mut hs = handshake("example.com", 80);

        let mut delivery = AUTH_OK.to_vec();
        delivery.extend_from_slice(&REPLY_OK);
        delivery.extend_from_slice(b"hi");

        let progress = hs.feed(&delivery).unwrap();
        assert_eq!(progress.send.as_deref(), Some(hs.connect_request()));
        let Outcome::Connected(established) = progress.outcome else {
            panic!("expected the handshake to complete");
        };
        assert_eq!(established.payload, b"hi".to_vec());
    }

    #[test]
    fn byte_at_a_time_delivery() {
        let mut hs = handshake("example.com", 80);

        let mut stream = AUTH_OK.to_vec();
        stream.extend_from_slice(&REPLY_OK);

        let mut sent = 0;
        let mut outcome = Outcome::Pending;
        for byte in stream {
            let progress = hs.feed(&[byte]).unwrap();
            sent += progress.send.iter().count();
            outcome = progress.outcome;
        }

        assert_eq!(sent, 1);
        assert!(matches!(outcome, Outcome::Connected(_)));
    }

    #[test]
    fn split_auth_reply_is_reassembled() {
        let mut hs = handshake("example.com", 80);
        let progress = hs.feed(&[0x05]).unwrap();
        assert_eq!(progress.send, None);
        assert_eq!(hs.stage(), Some(HandshakeStage::AwaitingAuthReply));

        let progress = hs.feed(&[0x00, 0x05]).unwrap();
        assert!(progress.send.is_some());
        assert_eq!(progress.outcome, Outcome::Pending);
    }

    #[test]
    fn domain_bound_address() {
        let mut hs = handshake("example.com", 80);
        hs.feed(&AUTH_OK).unwrap();

        let mut reply = vec![0x05, 0x00, 0x00, 0x03, 5];
        reply.extend_from_slice(b"proxy");
        reply.extend_from_slice(&[0x04, 0x38]);

        let progress = hs.feed(&reply).unwrap();
        let Outcome::Connected(established) = progress.outcome else {
            panic!("expected the handshake to complete");
        };
        assert_eq!(
            established.bound,
            BoundAddress::Domain("proxy".to_string(), 1080)
        );
    }

    #[test]
    fn no_stage_after_connect() {
        let mut hs = handshake("example.com", 80);
        hs.feed(&AUTH_OK).unwrap();
        hs.feed(&REPLY_OK).unwrap();
        assert_eq!(hs.stage(), None);

        // Later bytes are application data, never another reply
        assert_eq!(hs.feed(&REPLY_OK).unwrap_err(), HandshakeError::Finished);
    }

    #[test]
    fn non_utf8_bound_domain_is_not_validated() {
        let mut hs = handshake("example.com", 80);
        hs.feed(&AUTH_OK).unwrap();

        let progress = hs
            .feed(&[0x05, 0x00, 0x00, 0x03, 0x02, 0xff, 0xfe, 0x00, 0x50, b'h', b'i'])
            .unwrap();
        let Outcome::Connected(established) = progress.outcome else {
            panic!("expected the handshake to complete");
        };
        assert_eq!(established.payload, b"hi".to_vec());
        assert_eq!(
            established.bound,
            BoundAddress::Domain("\u{fffd}\u{fffd}".to_string(), 80)
        );
    }
}
