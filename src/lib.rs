//! A Tor control-port client: line framing, reply assembly, command
//! pipelining, GETINFO, event subscriptions, and a circuit/stream tracker
//! that resolves a stream's target domain to the three relays carrying it.

pub mod config;
pub mod connection;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod framing;
pub mod getinfo;
pub mod message;
pub mod pipeline;
pub mod shutdown;
pub mod tracker;

pub use config::Config;
pub use controller::Controller;
pub use error::{ClientError, Result};
pub use getinfo::GetInfoValue;
pub use tracker::NodeInfo;
