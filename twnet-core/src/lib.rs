pub mod addr;
pub mod chunk;
pub mod client;
pub mod config;
pub mod connection;
pub mod control;
pub mod error;
pub mod ffi;
pub mod packet;
pub mod raw;
pub mod stream;

pub use client::Client;
pub use config::Config;
pub use connection::{ConnState, Event};
pub use error::NetError;
pub use packet::PacketConstruct;
