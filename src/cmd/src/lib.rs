pub mod cmd;
pub mod speaker;
