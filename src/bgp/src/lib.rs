pub mod advertisement;
pub mod config;
pub mod error;
pub mod event;
pub mod family;
pub mod packet;
pub mod peer;
pub mod server;
pub(crate) mod sockopt;
