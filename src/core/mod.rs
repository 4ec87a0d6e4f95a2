pub mod codec;
pub mod error;
pub mod message;
pub mod publish;
pub mod queue;
pub mod subscribe;
pub mod transport;
