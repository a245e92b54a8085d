//! # Node Runtime
//!
//! Wires the stream engine, the sync multiplexer, and the driven-port
//! adapters into one node, and exposes the service surface over HTTP.

pub mod adapters;
pub mod config;
pub mod service;

pub use config::NodeConfig;
pub use service::StreamService;
