pub(crate) mod backoff;
pub mod fsm;
pub(crate) mod router_id;
pub mod session;
