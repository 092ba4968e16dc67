pub mod announce;
pub mod arp;
pub mod election;
pub mod error;
pub mod interface;
pub mod ndp;
pub mod packet;
pub mod responder;
pub(crate) mod socket;
