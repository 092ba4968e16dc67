pub mod attribute;
pub mod capability;
pub mod codec;
pub mod message;
pub mod prefix;
