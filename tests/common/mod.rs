#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io::{self, ErrorKind};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::rc::Rc;

use socks5d::connect::{Connector, Socket};
use socks5d::resolve::Resolver;
use socks5d::session::{Limits, Session};

/// What a peek on a connecting socket reports.
#[derive(Debug, Clone, Copy)]
pub enum Peek {
    Data,
    Empty,
    Eof,
    Connecting,
    Refused,
}

#[derive(Debug)]
struct Script {
    incoming: VecDeque<Vec<u8>>,
    eof: bool,
    read_error: Option<ErrorKind>,
    written: Vec<u8>,
    write_budget: Option<usize>,
    write_chunk: Option<usize>,
    write_error: Option<ErrorKind>,
    peek: Peek,
    readiness_clears: usize,
}

/// A scripted socket. Clones share the same script, so a test keeps one
/// handle while the session owns the other.
#[derive(Debug, Clone)]
pub struct MockSocket(Rc<RefCell<Script>>);

impl Default for MockSocket {
    fn default() -> Self {
        MockSocket(Rc::new(RefCell::new(Script {
            incoming: VecDeque::new(),
            eof: false,
            read_error: None,
            written: Vec::new(),
            write_budget: None,
            write_chunk: None,
            write_error: None,
            peek: Peek::Empty,
            readiness_clears: 0,
        })))
    }
}

impl MockSocket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes for the next read. Each feed is returned by its own read.
    pub fn feed(&self, bytes: &[u8]) {
        assert!(!bytes.is_empty());
        self.0.borrow_mut().incoming.push_back(bytes.to_vec());
    }

    /// Reads return EOF once the fed bytes are used up.
    pub fn hang_up(&self) {
        self.0.borrow_mut().eof = true;
    }

    pub fn fail_reads(&self, kind: ErrorKind) {
        self.0.borrow_mut().read_error = Some(kind);
    }

    pub fn fail_writes(&self, kind: ErrorKind) {
        self.0.borrow_mut().write_error = Some(kind);
    }

    /// Accept `n` more bytes before writes would block. `None` is unlimited.
    pub fn set_write_budget(&self, n: Option<usize>) {
        self.0.borrow_mut().write_budget = n;
    }

    /// Largest write accepted by one call.
    pub fn set_write_chunk(&self, n: usize) {
        self.0.borrow_mut().write_chunk = Some(n);
    }

    pub fn set_peek(&self, peek: Peek) {
        self.0.borrow_mut().peek = peek;
    }

    pub fn written(&self) -> Vec<u8> {
        self.0.borrow().written.clone()
    }

    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.0.borrow_mut().written)
    }

    /// How many times cached write readiness was dropped.
    pub fn readiness_clears(&self) -> usize {
        self.0.borrow().readiness_clears
    }

    pub fn unread(&self) -> usize {
        self.0.borrow().incoming.iter().map(Vec::len).sum()
    }
}

impl Socket for MockSocket {
    fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut s = self.0.borrow_mut();
        if let Some(kind) = s.read_error {
            return Err(kind.into());
        }
        match s.incoming.pop_front() {
            Some(mut chunk) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    chunk.drain(..n);
                    s.incoming.push_front(chunk);
                }
                Ok(n)
            }
            None if s.eof => Ok(0),
            None => Err(ErrorKind::WouldBlock.into()),
        }
    }

    fn try_send(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut s = self.0.borrow_mut();
        if let Some(kind) = s.write_error {
            return Err(kind.into());
        }
        let mut n = buf.len();
        if let Some(chunk) = s.write_chunk {
            n = n.min(chunk);
        }
        if let Some(budget) = s.write_budget {
            if budget == 0 {
                return Err(ErrorKind::WouldBlock.into());
            }
            n = n.min(budget);
            s.write_budget = Some(budget - n);
        }
        s.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn try_peek(&mut self) -> io::Result<usize> {
        let s = self.0.borrow();
        match s.peek {
            Peek::Data => Ok(1),
            Peek::Empty => Err(ErrorKind::WouldBlock.into()),
            Peek::Eof => Ok(0),
            Peek::Connecting => Err(ErrorKind::NotConnected.into()),
            Peek::Refused => Err(ErrorKind::ConnectionRefused.into()),
        }
    }

    fn clear_write_readiness(&mut self) {
        self.0.borrow_mut().readiness_clears += 1;
    }
}

/// Hands out one shared remote socket and records every connect.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    pub remote: MockSocket,
    attempts: Rc<RefCell<Vec<SocketAddrV4>>>,
    refuse: Rc<RefCell<bool>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> Vec<SocketAddrV4> {
        self.attempts.borrow().clone()
    }

    /// Make `connect` itself fail.
    pub fn refuse(&self) {
        *self.refuse.borrow_mut() = true;
    }
}

impl Connector for MockConnector {
    type Stream = MockSocket;

    fn connect(&mut self, target: SocketAddrV4) -> io::Result<MockSocket> {
        self.attempts.borrow_mut().push(target);
        if *self.refuse.borrow() {
            return Err(ErrorKind::NetworkUnreachable.into());
        }
        Ok(self.remote.clone())
    }
}

/// A fixed name table.
#[derive(Debug, Default)]
pub struct Hosts(HashMap<String, Ipv4Addr>);

impl Hosts {
    pub fn with(name: &str, ip: Ipv4Addr) -> Self {
        let mut hosts = Hosts::default();
        hosts.0.insert(name.to_string(), ip);
        hosts
    }
}

impl Resolver for Hosts {
    fn resolve(&self, domain: &str) -> Option<Ipv4Addr> {
        self.0.get(domain).copied()
    }
}

pub const GREETING: &[u8] = &[0x05, 0x01, 0x00];

/// A CONNECT request for `domain:port`.
pub fn connect_request(domain: &str, port: u16) -> Vec<u8> {
    request(0x01, domain, port)
}

pub fn request(command: u8, domain: &str, port: u16) -> Vec<u8> {
    let mut req = vec![0x05, command, 0x00, 0x03, domain.len() as u8];
    req.extend_from_slice(domain.as_bytes());
    req.extend_from_slice(&port.to_be_bytes());
    req
}

/// A domain reply `{5, rep, 0, 3, len, domain, port}`.
pub fn domain_reply(rep: u8, domain: &str, port: u16) -> Vec<u8> {
    let mut reply = vec![0x05, rep, 0x00, 0x03, domain.len() as u8];
    reply.extend_from_slice(domain.as_bytes());
    reply.extend_from_slice(&port.to_be_bytes());
    reply
}

pub fn new_session(client: &MockSocket, connector: &MockConnector) -> Session<MockConnector> {
    new_session_with(client, connector, Limits::default())
}

pub fn new_session_with(
    client: &MockSocket,
    connector: &MockConnector,
    limits: Limits,
) -> Session<MockConnector> {
    Session::new(1, client.clone(), connector.clone(), limits)
}

/// Drive a session through greeting, request and connect to
/// `localhost:80`, leaving the client's written bytes empty.
pub fn established(client: &MockSocket, connector: &MockConnector) -> Session<MockConnector> {
    established_with(client, connector, Limits::default())
}

pub fn established_with(
    client: &MockSocket,
    connector: &MockConnector,
    limits: Limits,
) -> Session<MockConnector> {
    let mut session = new_session_with(client, connector, limits);
    client.feed(GREETING);
    session.on_client_readable();
    client.feed(&connect_request("localhost", 80));
    session.on_client_readable();
    session.resolve_with(&Hosts::with("localhost", Ipv4Addr::LOCALHOST));
    session.on_remote_writable();
    client.take_written();
    session
}
