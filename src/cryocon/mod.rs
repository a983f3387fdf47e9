pub mod attribute;
pub mod codec;
pub mod transport;
