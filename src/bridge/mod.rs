//! External interface: inbound message decoding and the page controller

pub mod controller;
pub mod protocol;

pub use controller::PageController;
pub use protocol::{parse_message, InboundMessage, MediaTarget};
