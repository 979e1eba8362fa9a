pub use error::{Error, Result};

pub mod config;
pub mod connect;
pub mod error;
pub mod parse;
pub mod proto;
pub mod queue;
pub mod registry;
pub mod resolve;
pub mod server;
pub mod session;
