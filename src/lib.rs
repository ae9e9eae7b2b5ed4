//! Broker-agnostic publishing with emulated request/reply.
//!
//! The [`bus`] module holds the publisher pipeline; [`subscription`] holds
//! stream subscription descriptors.

pub mod bus;
mod error;
pub mod subscription;

pub use bus::{CallArgs, Delivery, MessageOptions, Producer, Publisher, Router};
pub use error::BusError;
pub use subscription::{StreamSub, StreamSubConfig};
