//! Server configuration.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::error::{Error, Result};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address
    pub listen: String,
    /// Listen port
    pub port: u16,
    /// Accept backlog
    pub backlog: u32,
    /// A session with no socket activity for this long is closed
    pub idle_timeout: Duration,
    /// Most bytes read from one socket per readiness event
    pub read_chunk: usize,
    /// Reading a side pauses while its destination queue holds this much
    pub high_water: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1".into(),
            port: 8082,
            backlog: 1024,
            idle_timeout: Duration::from_secs(300),
            read_chunk: 16 * 1024,
            high_water: 256 * 1024,
        }
    }
}

impl Config {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.listen.is_empty() {
            return Err(Error::config("listen address cannot be empty"));
        }
        if self.backlog == 0 {
            return Err(Error::config("backlog must be positive"));
        }
        if self.read_chunk == 0 {
            return Err(Error::config("read chunk must be positive"));
        }
        if self.high_water < self.read_chunk {
            return Err(Error::config(format!(
                "high water mark {} is below the read chunk {}",
                self.high_water, self.read_chunk
            )));
        }
        if self.idle_timeout.is_zero() {
            return Err(Error::config("idle timeout must be positive"));
        }
        Ok(())
    }

    /// The socket address to listen on.
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self.listen.parse()?;
        Ok(SocketAddr::new(ip, self.port))
    }
}
