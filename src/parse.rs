//! Incremental parser for the method negotiation and the request.
//!
//! Bytes arrive in whatever chunks the socket hands out. The parser pulls
//! only what the current field needs from the queue and records where it
//! stopped, so feeding one byte at a time ends in the same place as feeding
//! the whole message at once.

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::proto::{Address, AddressType, Command};
use crate::queue::ByteQueue;

/// Method negotiation message: `{ver, nmethods, methods...}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub version: u8,
    pub methods: Vec<u8>,
}

/// A fully parsed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub version: u8,
    /// Raw command byte, see [`Request::command`].
    pub command: u8,
    pub address: Address,
    pub port: u16,
}

impl Request {
    pub fn command(&self) -> Option<Command> {
        Command::from_repr(self.command)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed {
    Greeting(Greeting),
    Request(Request),
    /// The address type byte is not one of IPv4, domain or IPv6, so the rest
    /// of the request cannot be framed. The parser halts after this.
    UnknownAddressType { version: u8, command: u8, atype: u8 },
}

/// Where the parser is in the byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    AwaitingGreeting,
    AwaitingMethods(usize),
    AwaitingHeader,
    AwaitingDomainLength,
    /// Domain bytes still missing.
    AwaitingDomainBytes(usize),
    /// Fixed-size IPv4 or IPv6 address.
    AwaitingAddress(AddressType),
    AwaitingPort,
    /// A request was produced. Nothing more is parsed.
    Done,
    /// Parsing was stopped after a rejection.
    Halted,
}

#[derive(Debug)]
pub struct Parser {
    state: ParseState,
    greeting_version: u8,
    version: u8,
    command: u8,
    domain: Vec<u8>,
    address: Option<Address>,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Parser {
            state: ParseState::AwaitingGreeting,
            greeting_version: 0,
            version: 0,
            command: 0,
            domain: Vec::new(),
            address: None,
        }
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    /// True once the parser will consume no more bytes.
    pub fn is_finished(&self) -> bool {
        matches!(self.state, ParseState::Done | ParseState::Halted)
    }

    pub fn halt(&mut self) {
        self.state = ParseState::Halted;
    }

    /// Consume bytes from `queue` until a message completes or the queue
    /// runs short. Returns `None` when more bytes are needed, or when the
    /// parser is finished.
    pub fn advance(&mut self, queue: &mut ByteQueue) -> Option<Parsed> {
        loop {
            match self.state {
                ParseState::AwaitingGreeting => {
                    if queue.size() < 2 {
                        return None;
                    }
                    self.greeting_version = queue.extract_u8();
                    let nmethods = queue.extract_u8();
                    self.state = ParseState::AwaitingMethods(nmethods as usize);
                }
                ParseState::AwaitingMethods(n) => {
                    if queue.size() < n {
                        return None;
                    }
                    let methods = queue.extract(n);
                    self.state = ParseState::AwaitingHeader;
                    return Some(Parsed::Greeting(Greeting {
                        version: self.greeting_version,
                        methods,
                    }));
                }
                ParseState::AwaitingHeader => {
                    if queue.size() < 4 {
                        return None;
                    }
                    self.version = queue.extract_u8();
                    self.command = queue.extract_u8();
                    let _reserved = queue.extract_u8();
                    let atype = queue.extract_u8();

                    self.state = match AddressType::from_repr(atype) {
                        Some(AddressType::Domain) => ParseState::AwaitingDomainLength,
                        Some(fixed) => ParseState::AwaitingAddress(fixed),
                        None => {
                            self.state = ParseState::Halted;
                            return Some(Parsed::UnknownAddressType {
                                version: self.version,
                                command: self.command,
                                atype,
                            });
                        }
                    };
                }
                ParseState::AwaitingDomainLength => {
                    if queue.is_empty() {
                        return None;
                    }
                    let len = queue.extract_u8() as usize;
                    self.domain.reserve_exact(len);
                    self.state = ParseState::AwaitingDomainBytes(len);
                }
                ParseState::AwaitingDomainBytes(0) => {
                    let domain = std::mem::take(&mut self.domain);
                    self.address = Some(Address::Domain(domain));
                    self.state = ParseState::AwaitingPort;
                }
                ParseState::AwaitingDomainBytes(remaining) => {
                    let take = remaining.min(queue.size());
                    if take == 0 {
                        return None;
                    }
                    self.domain.extend_from_slice(&queue.extract(take));
                    self.state = ParseState::AwaitingDomainBytes(remaining - take);
                }
                ParseState::AwaitingAddress(atype) => {
                    let address = match atype {
                        AddressType::IPv6 => {
                            if queue.size() < 16 {
                                return None;
                            }
                            let mut octets = [0; 16];
                            queue.extract_into(&mut octets);
                            Address::V6(Ipv6Addr::from(octets))
                        }
                        _ => {
                            if queue.size() < 4 {
                                return None;
                            }
                            Address::V4(Ipv4Addr::from(queue.extract_u32()))
                        }
                    };
                    self.address = Some(address);
                    self.state = ParseState::AwaitingPort;
                }
                ParseState::AwaitingPort => {
                    if queue.size() < 2 {
                        return None;
                    }
                    let port = queue.extract_u16();
                    let address = self.address.take()?;
                    self.state = ParseState::Done;
                    return Some(Parsed::Request(Request {
                        version: self.version,
                        command: self.command,
                        address,
                        port,
                    }));
                }
                ParseState::Done | ParseState::Halted => return None,
            }
        }
    }
}
