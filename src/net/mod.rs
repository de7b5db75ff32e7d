//! TCP intake and lifecycle facades: acceptor, server and client.

pub mod acceptor;
pub mod client;
pub mod config;
pub mod server;

pub use acceptor::{AcceptCallback, Acceptor};
pub use client::Client;
pub use config::{ClientConfig, ServerConfig, TcpOptions};
pub use server::Server;
