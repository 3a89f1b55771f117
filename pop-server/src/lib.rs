pub mod channel;
pub mod config;
pub mod crypto;
pub mod error;
pub mod hub;
pub mod inbox;
pub mod message;
pub mod messagedata;
pub mod rpc;
pub mod schema;
pub mod server;
pub mod sockets;
