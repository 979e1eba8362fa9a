//! Accept loop and the per-session event driver.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{Interest, Ready};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::connect::TcpConnector;
use crate::error::Result;
use crate::registry::SessionRegistry;
use crate::resolve::{Resolver, SystemResolver};
use crate::session::{self, Limits, Session, SessionId, Stage, State};

/// SOCKS5 server: accepts clients and runs one session per connection.
pub struct Server {
    listener: TcpListener,
    config: Config,
    resolver: Arc<dyn Resolver>,
}

impl Server {
    /// Bind the listening socket described by `config`.
    pub async fn bind(config: Config) -> Result<Self> {
        config.validate()?;
        let addr = config.listen_addr()?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(config.backlog)?;

        info!("socks5 listen on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            config,
            resolver: Arc::new(SystemResolver),
        })
    }

    /// Replace the system resolver.
    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept clients forever.
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Accept clients until `shutdown` completes, then abort every session.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<SessionId>();
        let mut registry = SessionRegistry::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let id = registry.next_id();
                        debug!(session = id, "new connection from {}", peer);
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(session = id, "set_nodelay failed: {}", e);
                        }

                        let session = Session::new(id, stream, TcpConnector, Limits::from(&self.config));
                        let task = tokio::spawn(drive(
                            session,
                            Arc::clone(&self.resolver),
                            self.config.idle_timeout,
                            done_tx.clone(),
                        ));
                        registry.register(id, task);
                    }
                    Err(e) => warn!("accept failed: {}", e),
                },
                Some(id) = done_rx.recv() => {
                    registry.unregister(id);
                    debug!(session = id, active = registry.len(), "session destroyed");
                }
                _ = &mut shutdown => {
                    info!("shutting down, {} sessions open", registry.len());
                    registry.shutdown();
                    return Ok(());
                }
            }
        }
    }
}

enum Event {
    Client(Ready),
    Remote(Ready),
    Idle,
}

/// Run one session to completion, then report its id.
///
/// The session is dropped, closing both sockets, before the id is sent.
async fn drive(
    mut session: Session<TcpConnector>,
    resolver: Arc<dyn Resolver>,
    idle: Duration,
    done: mpsc::UnboundedSender<SessionId>,
) {
    let id = session.id();
    let mut deadline = Instant::now() + idle;

    while !session.is_finished() {
        if let Some(name) = session.pending_lookup() {
            let name = name.to_owned();
            let resolver = Arc::clone(&resolver);
            let lookup = tokio::task::spawn_blocking(move || resolver.resolve(&name));

            tokio::select! {
                answer = lookup => session.on_resolved(answer.ok().flatten()),
                _ = sleep_until(deadline) => session.on_idle_timeout(),
            }
            deadline = Instant::now() + idle;
            continue;
        }

        let client_interest = session.client_interest();
        let remote_interest = session.remote_interest();

        let event = tokio::select! {
            ready = wait_ready(Some(session.client()), client_interest) => Event::Client(ready),
            ready = wait_ready(session.remote(), remote_interest) => Event::Remote(ready),
            _ = sleep_until(deadline) => Event::Idle,
        };

        match event {
            Event::Client(ready) => {
                deadline = Instant::now() + idle;
                if client_interest.readable && (ready.is_readable() || ready.is_read_closed()) {
                    session.on_client_readable();
                }
                if client_interest.writable && (ready.is_writable() || ready.is_write_closed()) {
                    session.on_client_writable();
                }
            }
            Event::Remote(ready) => {
                if remote_interest.writable && (ready.is_writable() || ready.is_write_closed()) {
                    session.on_remote_writable();
                }
                if remote_interest.readable && (ready.is_readable() || ready.is_read_closed()) {
                    session.on_remote_readable();
                }
                // a connect that is still pending is not activity
                if session.stage() != Stage::Connecting || session.state() != State::Handshaking {
                    deadline = Instant::now() + idle;
                }
            }
            Event::Idle => {
                debug!(session = id, "idle for {:?}", idle);
                session.on_idle_timeout();
                deadline = Instant::now() + idle;
            }
        }
    }

    drop(session);
    let _ = done.send(id);
}

/// Wait until `stream` is ready for `interest`. Never completes when there
/// is no stream or nothing to wait for.
async fn wait_ready(stream: Option<&TcpStream>, interest: session::Interest) -> Ready {
    let Some(stream) = stream else {
        return std::future::pending().await;
    };
    let interest = match (interest.readable, interest.writable) {
        (true, true) => Interest::READABLE.add(Interest::WRITABLE),
        (true, false) => Interest::READABLE,
        (false, true) => Interest::WRITABLE,
        (false, false) => return std::future::pending().await,
    };
    match stream.ready(interest).await {
        Ok(ready) => ready,
        Err(e) => {
            // let the next read or write surface the error
            debug!("readiness failed: {}", e);
            Ready::READABLE | Ready::WRITABLE
        }
    }
}
