pub mod async_ops;
pub mod key;
pub mod message;

pub use async_ops::*;
pub use key::*;
pub use message::*;
