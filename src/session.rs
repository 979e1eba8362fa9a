//! Per-connection SOCKS5 state machine.
//!
//! A [`Session`] owns the client socket, the remote socket once a connect
//! has started, and one [`ByteQueue`] per direction: `inbound` holds bytes
//! read from the client that are not yet parsed or forwarded, `outbound`
//! holds bytes waiting to be written to the client. It never blocks and never
//! waits; whoever drives it watches the sockets for the interest it reports
//! and calls the matching `on_*` method when a socket is ready.
//!
//! ```text
//! Idle -> Handshaking -> Established
//!   \          |              /
//!    `------> Closing <------'
//! ```

use std::net::{Ipv4Addr, SocketAddrV4};

use strum_macros::Display;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::connect::{probe, ConnectProbe, Connector, Socket};
use crate::parse::{Greeting, Parsed, Parser, Request};
use crate::proto::{
    self, Address, AddressType, Command, Reply, ReplyCode, METHOD_NONE_ACCEPTABLE,
    METHOD_NO_AUTH, VERSION,
};
use crate::queue::ByteQueue;
use crate::resolve::Resolver;

/// Unique session identifier.
pub type SessionId = u64;

/// Session state. Moves forward only; any state may move to `Closing`,
/// which is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum State {
    Idle,
    Handshaking,
    Established,
    Closing,
}

/// Progress inside `Handshaking`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Stage {
    /// Parsing the greeting and the request.
    Negotiating,
    /// Waiting for the domain to resolve.
    Resolving,
    /// Waiting for the outbound connect to complete.
    Connecting,
    /// A failure reply was sent. Further client bytes are discarded until
    /// the client hangs up.
    Rejected,
}

/// Readiness a socket should be watched for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
}

impl Interest {
    pub const NONE: Interest = Interest {
        readable: false,
        writable: false,
    };

    pub fn is_none(&self) -> bool {
        !self.readable && !self.writable
    }
}

/// Per-session buffering limits.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Most bytes read from one socket per readiness event.
    pub read_chunk: usize,
    /// A side is not read while its destination queue holds this many bytes.
    pub high_water: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits::from(&Config::default())
    }
}

impl From<&Config> for Limits {
    fn from(config: &Config) -> Self {
        Limits {
            read_chunk: config.read_chunk,
            high_water: config.high_water,
        }
    }
}

pub struct Session<K: Connector> {
    id: SessionId,
    state: State,
    stage: Stage,
    parser: Parser,
    connector: K,
    client: K::Stream,
    remote: Option<K::Stream>,
    /// Client to remote.
    inbound: ByteQueue,
    /// Remote (and the engine's replies) to client.
    outbound: ByteQueue,
    command: Option<Command>,
    address_type: Option<AddressType>,
    domain: Option<Vec<u8>>,
    port: u16,
    target: Option<SocketAddrV4>,
    client_closing: bool,
    remote_closing: bool,
    /// Set once the relay starts; only then are client bytes owed to the
    /// remote.
    relaying: bool,
    limits: Limits,
}

impl<K: Connector> Session<K> {
    pub fn new(id: SessionId, client: K::Stream, connector: K, limits: Limits) -> Self {
        Session {
            id,
            state: State::Idle,
            stage: Stage::Negotiating,
            parser: Parser::new(),
            connector,
            client,
            remote: None,
            inbound: ByteQueue::new(),
            outbound: ByteQueue::new(),
            command: None,
            address_type: None,
            domain: None,
            port: 0,
            target: None,
            client_closing: false,
            remote_closing: false,
            relaying: false,
            limits,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn client(&self) -> &K::Stream {
        &self.client
    }

    pub fn remote(&self) -> Option<&K::Stream> {
        self.remote.as_ref()
    }

    pub fn command(&self) -> Option<Command> {
        self.command
    }

    pub fn address_type(&self) -> Option<AddressType> {
        self.address_type
    }

    pub fn domain(&self) -> Option<&[u8]> {
        self.domain.as_deref()
    }

    pub fn target(&self) -> Option<SocketAddrV4> {
        self.target
    }

    pub fn is_client_closing(&self) -> bool {
        self.client_closing
    }

    pub fn is_remote_closing(&self) -> bool {
        self.remote_closing
    }

    /// Bytes read from the client and not yet parsed or forwarded.
    pub fn inbound(&self) -> &ByteQueue {
        &self.inbound
    }

    /// Bytes waiting to be written to the client.
    pub fn outbound(&self) -> &ByteQueue {
        &self.outbound
    }

    /// The domain waiting to be resolved, if any.
    pub fn pending_lookup(&self) -> Option<&str> {
        if self.state != State::Handshaking || self.stage != Stage::Resolving {
            return None;
        }
        // checked to be UTF-8 when the request was accepted
        self.domain
            .as_deref()
            .and_then(|name| std::str::from_utf8(name).ok())
    }

    /// True once the session is closing and every queue it still owes to a
    /// live socket has been flushed or abandoned. Dropping the session then
    /// releases both sockets.
    pub fn is_finished(&self) -> bool {
        self.state == State::Closing && self.outbound.is_empty() && !self.owes_remote()
    }

    pub fn client_interest(&self) -> Interest {
        let writable = !self.outbound.is_empty();
        let readable = match self.state {
            State::Idle => true,
            // no reading past an unflushed reply
            State::Handshaking => {
                self.outbound.is_empty()
                    && matches!(self.stage, Stage::Negotiating | Stage::Rejected)
            }
            State::Established => {
                !self.client_closing && self.inbound.size() < self.limits.high_water
            }
            State::Closing => false,
        };
        Interest {
            readable,
            writable,
        }
    }

    pub fn remote_interest(&self) -> Interest {
        if self.remote.is_none() {
            return Interest::NONE;
        }
        match self.state {
            State::Idle => Interest::NONE,
            State::Handshaking => Interest {
                readable: false,
                writable: self.stage == Stage::Connecting,
            },
            State::Established => Interest {
                readable: !self.remote_closing && self.outbound.size() < self.limits.high_water,
                writable: !self.inbound.is_empty(),
            },
            State::Closing => Interest {
                readable: false,
                writable: self.owes_remote(),
            },
        }
    }

    pub fn on_client_readable(&mut self) {
        if self.state == State::Closing {
            return;
        }

        let limit = match self.state {
            State::Established => self
                .limits
                .read_chunk
                .min(self.limits.high_water.saturating_sub(self.inbound.size())),
            _ => self.limits.read_chunk,
        };

        let (read, eof) = match self.inbound.fill_from(&mut self.client, limit) {
            Ok(transfer) => (transfer.bytes(), transfer.is_eof()),
            Err(e) => {
                debug!(session = self.id, "client read failed: {}", e);
                (0, true)
            }
        };

        if self.state == State::Idle && read > 0 {
            debug!(session = self.id, "handshaking");
            self.state = State::Handshaking;
        }

        match self.state {
            State::Handshaking if self.stage == Stage::Rejected => self.inbound.clear(),
            State::Handshaking => self.advance_handshake(),
            State::Established => self.pump_to_remote(),
            _ => {}
        }

        if eof {
            self.client_closing = true;
            self.close("client closed");
        }
    }

    pub fn on_client_writable(&mut self) {
        self.flush_client();
    }

    pub fn on_remote_readable(&mut self) {
        if self.state != State::Established {
            return;
        }
        let Some(remote) = self.remote.as_mut() else {
            return;
        };

        let limit = self
            .limits
            .read_chunk
            .min(self.limits.high_water.saturating_sub(self.outbound.size()));

        let result = self.outbound.fill_from(remote, limit);
        self.flush_client();

        match result {
            Ok(transfer) if transfer.is_eof() => {
                self.remote_closing = true;
                self.close("remote closed");
            }
            Ok(_) => {}
            Err(e) => {
                debug!(session = self.id, "remote read failed: {}", e);
                self.remote_closing = true;
                self.close("remote read failed");
            }
        }
    }

    pub fn on_remote_writable(&mut self) {
        match self.state {
            State::Handshaking if self.stage == Stage::Connecting => self.finish_connect(),
            State::Established | State::Closing => self.pump_to_remote(),
            _ => {}
        }
    }

    /// Continue with the answer for [`Session::pending_lookup`].
    pub fn on_resolved(&mut self, addr: Option<Ipv4Addr>) {
        if self.state != State::Handshaking || self.stage != Stage::Resolving {
            return;
        }

        let Some(ip) = addr else {
            warn!(session = self.id, "could not resolve {}", self.domain_for_log());
            self.fail(ReplyCode::HostUnreachable, "resolution failed");
            return;
        };

        let target = SocketAddrV4::new(ip, self.port);
        self.target = Some(target);
        debug!(
            session = self.id,
            "{} resolved, connecting to {}",
            self.domain_for_log(),
            target
        );

        match self.connector.connect(target) {
            Ok(stream) => {
                self.remote = Some(stream);
                self.stage = Stage::Connecting;
            }
            Err(e) => {
                warn!(session = self.id, "connect to {} failed: {}", target, e);
                self.fail(ReplyCode::HostUnreachable, "connect failed");
            }
        }
    }

    /// Resolve the pending lookup in place with a blocking resolver.
    pub fn resolve_with(&mut self, resolver: &dyn Resolver) {
        let addr = match self.pending_lookup() {
            Some(name) => resolver.resolve(name),
            None => return,
        };
        self.on_resolved(addr);
    }

    /// No activity for the configured idle period. A second timeout while
    /// closing gives up on the queues that are still unflushed.
    pub fn on_idle_timeout(&mut self) {
        if self.state == State::Closing {
            debug!(session = self.id, "abandoning unflushed queues");
            self.outbound.clear();
            self.inbound.clear();
            return;
        }
        self.close("idle timeout");
    }

    fn advance_handshake(&mut self) {
        while self.state == State::Handshaking && self.stage == Stage::Negotiating {
            let Some(parsed) = self.parser.advance(&mut self.inbound) else {
                break;
            };
            match parsed {
                Parsed::Greeting(greeting) => self.on_greeting(greeting),
                Parsed::Request(request) => self.on_request(request),
                Parsed::UnknownAddressType {
                    command, atype, ..
                } => {
                    self.command = Command::from_repr(command);
                    debug!(session = self.id, "unknown address type {}", atype);
                    self.reject(Reply::bare(ReplyCode::AddressTypeNotSupported));
                }
            }
        }
        self.flush_client();
    }

    fn on_greeting(&mut self, greeting: Greeting) {
        if greeting.version == VERSION {
            debug!(session = self.id, methods = ?greeting.methods, "greeting");
            self.outbound
                .append(&proto::method_selection(METHOD_NO_AUTH));
        } else {
            info!(session = self.id, "greeting version mismatch: {}", greeting.version);
            self.outbound
                .append(&proto::method_selection(METHOD_NONE_ACCEPTABLE));
            self.stage = Stage::Rejected;
            self.parser.halt();
            self.inbound.clear();
        }
    }

    fn on_request(&mut self, request: Request) {
        self.command = request.command();
        self.address_type = Some(request.address.address_type());
        self.port = request.port;
        if let Address::Domain(name) = &request.address {
            self.domain = Some(name.clone());
        }

        debug!(
            session = self.id,
            command = request.command,
            atype = %request.address.address_type(),
            port = request.port,
            "request"
        );

        let echo = Reply::new(ReplyCode::Succeeded, Some(request.address.clone()), request.port);

        if request.version != VERSION {
            self.reject(Reply {
                code: ReplyCode::GeneralFailure,
                ..echo
            });
        } else if self.command != Some(Command::Connect) {
            self.reject(Reply {
                code: ReplyCode::CommandNotSupported,
                ..echo
            });
        } else {
            match &request.address {
                Address::Domain(name) if name.is_empty() => self.reject(Reply {
                    code: ReplyCode::GeneralFailure,
                    ..echo
                }),
                Address::Domain(name) if std::str::from_utf8(name).is_err() => {
                    self.fail(ReplyCode::HostUnreachable, "domain is not utf8")
                }
                Address::Domain(_) => self.stage = Stage::Resolving,
                Address::V4(_) | Address::V6(_) => self.reject(Reply {
                    code: ReplyCode::AddressTypeNotSupported,
                    ..echo
                }),
            }
        }
    }

    fn finish_connect(&mut self) {
        let Some(remote) = self.remote.as_mut() else {
            return;
        };

        match probe(remote) {
            ConnectProbe::Connected => {
                info!(
                    session = self.id,
                    "connected to {} via {}",
                    self.domain_for_log(),
                    self.target.map(|t| t.to_string()).unwrap_or_default()
                );
                let reply = Reply::new(
                    ReplyCode::Succeeded,
                    self.domain.clone().map(Address::Domain),
                    self.port,
                );
                self.outbound.append(&reply.encode());
                self.state = State::Established;
                self.relaying = true;
                self.flush_client();
                // bytes the client pipelined behind the request
                self.pump_to_remote();
            }
            ConnectProbe::Pending => {
                debug!(session = self.id, "connect still in progress");
                Socket::clear_write_readiness(remote);
            }
            ConnectProbe::Failed(e) => {
                warn!(session = self.id, "connect to {} failed: {}", self.domain_for_log(), e);
                self.remote = None;
                self.remote_closing = true;
                self.fail(ReplyCode::HostUnreachable, "connect failed");
            }
        }
    }

    /// Answer with a failure reply and keep the session open.
    fn reject(&mut self, reply: Reply) {
        info!(session = self.id, "rejecting request: {}", reply.code);
        self.outbound.append(&reply.encode());
        self.stage = Stage::Rejected;
        self.parser.halt();
        self.inbound.clear();
    }

    /// Answer with a failure reply and close.
    fn fail(&mut self, code: ReplyCode, reason: &str) {
        let reply = Reply::new(code, self.domain.clone().map(Address::Domain), self.port);
        self.outbound.append(&reply.encode());
        self.close(reason);
    }

    fn close(&mut self, reason: &str) {
        self.enter_closing(reason);
        self.flush_client();
        self.pump_to_remote();
    }

    fn enter_closing(&mut self, reason: &str) {
        if self.state != State::Closing {
            info!(session = self.id, from = %self.state, "closing: {}", reason);
            self.state = State::Closing;
        }
    }

    fn flush_client(&mut self) {
        if self.outbound.is_empty() {
            return;
        }
        if let Err(e) = self.outbound.drain_to(&mut self.client) {
            debug!(session = self.id, "client write failed: {}", e);
            self.outbound.clear();
            self.client_closing = true;
            self.enter_closing("client write failed");
        }
    }

    fn pump_to_remote(&mut self) {
        if !self.owes_remote() {
            return;
        }
        let Some(remote) = self.remote.as_mut() else {
            return;
        };
        if let Err(e) = self.inbound.drain_to(remote) {
            debug!(session = self.id, "remote write failed: {}", e);
            self.inbound.clear();
            self.remote_closing = true;
            self.enter_closing("remote write failed");
        }
    }

    fn owes_remote(&self) -> bool {
        self.relaying && self.remote.is_some() && !self.inbound.is_empty()
    }

    fn domain_for_log(&self) -> String {
        self.domain
            .as_deref()
            .map(|name| String::from_utf8_lossy(name).into_owned())
            .unwrap_or_default()
    }
}

impl<K: Connector> Drop for Session<K> {
    fn drop(&mut self) {
        debug!(session = self.id, state = %self.state, "session released");
    }
}
