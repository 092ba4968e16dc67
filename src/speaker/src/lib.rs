pub mod announcer;
pub mod bgp;
pub mod config;
pub mod controller;
pub mod error;
pub mod layer2;
pub mod resolver;
pub mod server;
pub mod speaker;
